//! Action command detection and parsing.
//!
//! An action is a uniform command over agents and tools, used on the command
//! line, inside shell scripts and from templates:
//!
//! ```text
//! ai [action] [flags] message...
//!
//! agent:   @pack[/sub]   agent:pack[/sub]   pack[/sub],
//! tool:    /kit:name     /kit
//! ```

use serde_json::Value;

use crate::args::ArgMap;
use crate::error::{Error, Result};
use crate::reference::{AGENT_KIT, AgentRef, ToolRef};

/// Trigger word that may precede an action.
pub const TRIGGER_WORD: &str = "ai";

/// Default number of historical messages to replay.
pub const DEFAULT_MAX_HISTORY: i64 = 3;
/// Default history window in minutes.
pub const DEFAULT_MAX_SPAN: i64 = 480;
/// Default number of inference turns.
pub const DEFAULT_MAX_TURNS: i64 = 8;
/// Default time budget in seconds.
pub const DEFAULT_MAX_TIME: i64 = 180;

/// Returns true if the command line `s` is an action command.
pub fn is_action(s: &str) -> bool {
    let s = s.trim_start();
    if s.is_empty() {
        return false;
    }
    if s.starts_with('@') || s.starts_with('/') || s.starts_with("agent:") {
        return true;
    }
    let first = s.split_whitespace().next().unwrap_or_default();
    first == TRIGGER_WORD || first.ends_with(',')
}

/// Split a command line into words and parse it as an action.
pub fn parse_action_command(line: &str) -> Result<ArgMap> {
    let argv = shell_words::split(line)
        .map_err(|e| Error::bad_request(format!("invalid action command {line:?}: {e}")))?;
    parse_action_args(&argv)
}

/// Typed value a known flag expects.
#[derive(Clone, Copy, PartialEq)]
enum FlagKind {
    Str,
    Int,
    Bool,
    Repeat,
}

fn known_flag(name: &str) -> Option<FlagKind> {
    let kind = match name {
        "option" => FlagKind::Repeat,
        "arguments" | "instruction" | "message" | "model" | "log-level" | "stdin" => FlagKind::Str,
        "max-history" | "max-span" | "max-turns" | "max-time" => FlagKind::Int,
        "quiet" | "info" | "verbose" => FlagKind::Bool,
        _ => return None,
    };
    Some(kind)
}

fn is_flag(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-') && token.parse::<f64>().is_err()
}

/// Parse an argument vector into an argument map.
///
/// Recognized keys: `kit`, `name`, `pack`, `message`, `instruction`, `model`,
/// `arguments`, `max_history`, `max_span`, `max_turns`, `max_time`,
/// `log_level` and `stdin`. Each `--option k=v` becomes its own key and
/// unknown `--key=value` flags are kept verbatim. All keys are normalized to
/// underscore form.
pub fn parse_action_args(argv: &[String]) -> Result<ArgMap> {
    let mut argv: Vec<String> = argv.to_vec();
    if argv
        .first()
        .is_some_and(|a| a.eq_ignore_ascii_case(TRIGGER_WORD))
    {
        argv.remove(0);
    }

    let mut argm = ArgMap::new();
    if argv.is_empty() {
        return Ok(argm);
    }

    // action identity
    let (kit, name) = detect_action(&argv[0]);
    if kit.is_some() || argv[0] == "@" || argv[0] == "/" {
        argv.remove(0);
    }

    // flags
    let mut positional: Vec<String> = Vec::new();
    let mut options: Vec<String> = Vec::new();
    let mut strings: Vec<(String, String)> = Vec::new();
    let mut ints: Vec<(String, i64)> = Vec::new();
    let mut bools: Vec<String> = Vec::new();

    let mut i = 0;
    while i < argv.len() {
        let token = &argv[i];
        i += 1;

        if token == "--" {
            positional.extend(argv[i..].iter().cloned());
            break;
        }
        if !is_flag(token) {
            positional.push(token.clone());
            continue;
        }

        let body = token.trim_start_matches('-');
        let (raw_name, inline) = match body.split_once('=') {
            Some((n, v)) => (n.to_string(), Some(v.to_string())),
            None => (body.to_string(), None),
        };
        let flag_name = raw_name.replace('_', "-").to_lowercase();

        match known_flag(&flag_name) {
            Some(FlagKind::Bool) => {
                let on = match inline.as_deref() {
                    None => true,
                    Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
                };
                if on {
                    bools.push(flag_name);
                }
            }
            Some(kind) => {
                let value = match inline {
                    Some(v) => v,
                    None => {
                        if i >= argv.len() {
                            return Err(Error::bad_request(format!(
                                "flag needs an argument: --{flag_name}"
                            )));
                        }
                        i += 1;
                        argv[i - 1].clone()
                    }
                };
                match kind {
                    FlagKind::Repeat => options.push(value),
                    FlagKind::Int => {
                        let n = value.trim().parse::<i64>().map_err(|_| {
                            Error::bad_request(format!(
                                "invalid value {value:?} for flag --{flag_name}"
                            ))
                        })?;
                        ints.push((flag_name, n));
                    }
                    _ => strings.push((flag_name, value)),
                }
            }
            None => {
                // unknown flags are kept as plain arguments
                let value = match inline {
                    Some(v) => Value::String(v),
                    None if i < argv.len() && !is_flag(&argv[i]) => {
                        i += 1;
                        Value::String(argv[i - 1].clone())
                    }
                    None => Value::Bool(true),
                };
                argm.insert(raw_name, value);
            }
        }
    }

    let get_str = |key: &str| -> Option<String> {
        strings
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.trim().to_string())
    };

    if let Some(arguments) = get_str("arguments") {
        parse_arguments_flag(&arguments, &mut argm)?;
    }

    for opt in &options {
        match opt.split_once('=') {
            Some((k, v)) => {
                argm.insert(k.replace('-', "_"), Value::String(v.to_string()));
            }
            None => {
                return Err(Error::bad_request(format!(
                    "invalid argument format: {opt}"
                )));
            }
        }
    }

    for (k, v) in &ints {
        argm.insert(k.replace('-', "_"), Value::from(*v));
    }

    if let Some(level) = get_str("log-level") {
        argm.insert("log_level".into(), Value::String(level));
    }
    for (flag, level) in [("verbose", "verbose"), ("info", "info"), ("quiet", "quiet")] {
        if bools.iter().any(|b| b == flag) {
            argm.insert("log_level".into(), Value::String(level.into()));
        }
    }

    if let Some(kit) = kit {
        if kit == AGENT_KIT {
            let r = AgentRef::decode(&name).normalized();
            argm.insert("kit".into(), Value::String(kit));
            if !r.owner.is_empty() {
                argm.insert("owner".into(), Value::String(r.owner.clone()));
            }
            argm.insert("pack".into(), Value::String(r.pack.clone()));
            let sub = if r.sub.is_empty() { r.pack } else { r.sub };
            argm.insert("name".into(), Value::String(sub));
        } else {
            argm.insert("kit".into(), Value::String(kit));
            argm.insert("name".into(), Value::String(name));
        }
    }

    let mut message = positional.join(" ");
    if let Some(m) = get_str("message") {
        message = format!("{m} {message}");
    }
    let message = message.trim();
    if !message.is_empty() {
        argm.insert("message".into(), Value::String(message.to_string()));
    }
    for key in ["instruction", "model", "stdin"] {
        if let Some(v) = get_str(key).filter(|v| !v.is_empty()) {
            argm.insert(key.into(), Value::String(v));
        }
    }

    // normalize all keys to underscore form
    let normalized = argm
        .into_iter()
        .map(|(k, v)| (k.replace('-', "_"), v))
        .collect();
    Ok(normalized)
}

/// Identify the action named by the first word, if any.
fn detect_action(first: &str) -> (Option<String>, String) {
    if let Some(rest) = first.strip_prefix('@') {
        if rest.is_empty() {
            return (Some(AGENT_KIT.to_string()), String::new());
        }
        return (Some(AGENT_KIT.to_string()), rest.to_string());
    }
    if let Some(rest) = first.strip_prefix('/') {
        if rest.is_empty() {
            return (None, String::new());
        }
        let r = ToolRef::decode(&rest.to_lowercase());
        if r.kit.is_empty() {
            return (None, String::new());
        }
        if r.is_agent() {
            return (Some(AGENT_KIT.to_string()), r.name);
        }
        return (Some(r.kit), r.name);
    }
    if let Some(rest) = first.strip_prefix("agent:") {
        return (Some(AGENT_KIT.to_string()), rest.to_string());
    }
    if let Some(rest) = first.strip_suffix(',') {
        return (Some(AGENT_KIT.to_string()), rest.to_string());
    }
    (None, String::new())
}

/// Parse the `--arguments` flag: a JSON object, a JSON array or a
/// shell-quoted string.
fn parse_arguments_flag(args: &str, argm: &mut ArgMap) -> Result<()> {
    if args.starts_with('{') {
        let obj: ArgMap = serde_json::from_str(args).map_err(|e| {
            Error::bad_request(format!("invalid json object arguments: {args:?} error: {e}"))
        })?;
        for (k, v) in obj {
            argm.insert(k, v);
        }
    } else if args.starts_with('[') {
        let list = match serde_json::from_str::<Vec<String>>(args) {
            Ok(list) => list,
            Err(e) => {
                let list = parse_string_array(args);
                if list.is_empty() {
                    return Err(Error::bad_request(format!(
                        "invalid json array arguments: {args:?} error: {e}"
                    )));
                }
                list
            }
        };
        argm.insert("arguments".into(), Value::from(list));
    } else {
        let list = shell_words::split(args)
            .map_err(|e| Error::bad_request(format!("invalid arguments {args:?}: {e}")))?;
        argm.insert("arguments".into(), Value::from(list));
    }
    Ok(())
}

/// Parse a loose `[a, "b", c]` list.
pub fn parse_string_array(s: &str) -> Vec<String> {
    let inner = s.trim().trim_start_matches('[').trim_end_matches(']');
    inner
        .split(',')
        .map(|p| p.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Agent reference named by a parsed action, if the action is an agent.
pub fn action_agent(argm: &ArgMap) -> Option<String> {
    if argm.get("kit").and_then(Value::as_str) != Some(AGENT_KIT) {
        return None;
    }
    let field = |key: &str| argm.get(key).and_then(Value::as_str).unwrap_or_default();
    Some(AgentRef::new(field("owner"), field("pack"), field("name")).encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn argv(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_is_action() {
        assert!(is_action("@x"));
        assert!(is_action("/k:n"));
        assert!(is_action("agent:x"));
        assert!(is_action("x,"));
        assert!(is_action("ai what is up"));
        assert!(is_action("ai"));
        assert!(!is_action("hello world"));
        assert!(!is_action(""));
        assert!(!is_action("aim high"));
    }

    #[test]
    fn test_parse_agent_forms() {
        for input in [
            argv(&["ai", "@example"]),
            argv(&["agent:example"]),
            argv(&["example,"]),
        ] {
            let got = parse_action_args(&input).unwrap();
            assert_eq!(got["kit"], "agent");
            assert_eq!(got["pack"], "example");
            assert_eq!(got["name"], "example");
        }
    }

    #[test]
    fn test_parse_agent_with_sub_and_message() {
        let got = parse_action_args(&argv(&["@Pack/Sub", "hello", "there"])).unwrap();
        assert_eq!(got["pack"], "pack");
        assert_eq!(got["name"], "sub");
        assert_eq!(got["message"], "hello there");
        assert_eq!(action_agent(&got).as_deref(), Some("pack/sub"));
    }

    #[test]
    fn test_parse_agent_with_owner() {
        let got = parse_action_args(&argv(&["@alice:Pack/sub", "hi"])).unwrap();
        assert_eq!(got["owner"], "alice");
        assert_eq!(got["pack"], "pack");
        assert_eq!(got["name"], "sub");
        assert_eq!(action_agent(&got).as_deref(), Some("alice:pack/sub"));

        let got = parse_action_args(&argv(&["@bob:helper"])).unwrap();
        assert_eq!(action_agent(&got).as_deref(), Some("bob:helper"));
    }

    #[test]
    fn test_parse_tool_with_unknown_flags() {
        let got =
            parse_action_args(&argv(&["/tool:example", "--format=json", "--message=hello"])).unwrap();
        assert_eq!(
            Value::Object(got),
            json!({"kit": "tool", "name": "example", "message": "hello", "format": "json"})
        );
    }

    #[test]
    fn test_parse_tool_default_name() {
        let got = parse_action_args(&argv(&["/web"])).unwrap();
        assert_eq!(got["kit"], "web");
        assert_eq!(got["name"], "web");
    }

    #[test]
    fn test_message_flag_prepended() {
        let got = parse_action_args(&argv(&["@a", "--message", "first", "second"])).unwrap();
        assert_eq!(got["message"], "first second");
    }

    #[test]
    fn test_limits_and_log_level() {
        let got = parse_action_args(&argv(&[
            "@a",
            "--max-turns",
            "5",
            "--max_time=60",
            "--verbose",
        ]))
        .unwrap();
        assert_eq!(got["max_turns"], 5);
        assert_eq!(got["max_time"], 60);
        assert_eq!(got["log_level"], "verbose");
        assert!(got.get("max_history").is_none());
    }

    #[test]
    fn test_quiet_wins() {
        let got = parse_action_args(&argv(&["@a", "--verbose", "--quiet"])).unwrap();
        assert_eq!(got["log_level"], "quiet");
    }

    #[test]
    fn test_options_and_arguments() {
        let got = parse_action_args(&argv(&[
            "/sh:exec",
            "--option",
            "dry-run=yes",
            "--option",
            "path=/tmp",
            "--arguments",
            r#"{"command": "ls"}"#,
        ]))
        .unwrap();
        assert_eq!(got["dry_run"], "yes");
        assert_eq!(got["path"], "/tmp");
        assert_eq!(got["command"], "ls");
    }

    #[test]
    fn test_arguments_array_and_shell_forms() {
        let got = parse_action_args(&argv(&["/x:y", "--arguments", r#"["a", "b"]"#])).unwrap();
        assert_eq!(got["arguments"], json!(["a", "b"]));

        let got = parse_action_args(&argv(&["/x:y", "--arguments", "[a, b]"])).unwrap();
        assert_eq!(got["arguments"], json!(["a", "b"]));

        let got = parse_action_args(&argv(&["/x:y", "--arguments", "ls -la 'my dir'"])).unwrap();
        assert_eq!(got["arguments"], json!(["ls", "-la", "my dir"]));
    }

    #[test]
    fn test_invalid_syntax() {
        assert!(parse_action_args(&argv(&["@a", "--option", "novalue"])).is_err());
        assert!(parse_action_args(&argv(&["@a", "--max-turns", "many"])).is_err());
        assert!(parse_action_args(&argv(&["@a", "--arguments", "{bad"])).is_err());
        assert!(parse_action_args(&argv(&["@a", "--model"])).is_err());
    }

    #[test]
    fn test_no_action() {
        let got = parse_action_args(&argv(&["hello", "world"])).unwrap();
        assert!(got.get("kit").is_none());
        assert_eq!(got["message"], "hello world");
        assert!(parse_action_args(&argv(&["ai"])).unwrap().is_empty());
    }

    #[test]
    fn test_parse_command_line() {
        let got = parse_action_command(r#"@ask "why is the sky blue""#).unwrap();
        assert_eq!(got["message"], "why is the sky blue");
        assert!(parse_action_command(r#"@ask "unterminated"#).is_err());
    }
}
