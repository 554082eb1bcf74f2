//! Built-in template functions.

use base64::Engine;
use serde_json::{Map, Value};

use super::{display, truthy};
use crate::error::{AgentError, Result};

/// Evaluate built-in `name`; `None` when no such function exists.
pub fn builtin(name: &str, args: &[Value]) -> Option<Result<Value>> {
    let f: fn(&[Value]) -> Result<Value> = match name {
        // logic and comparison
        "and" => and,
        "or" => or,
        "not" => |a| Ok(Value::Bool(!truthy(arg(a, 0)?))),
        "eq" => eq,
        "ne" => |a| Ok(Value::Bool(!as_bool(&eq(a)?))),
        "lt" => |a| compare(a, |o| o.is_lt()),
        "le" => |a| compare(a, |o| o.is_le()),
        "gt" => |a| compare(a, |o| o.is_gt()),
        "ge" => |a| compare(a, |o| o.is_ge()),
        "default" => default,
        "empty" => |a| Ok(Value::Bool(!truthy(arg(a, 0)?))),

        // printing
        "print" => |a| Ok(Value::String(a.iter().map(display).collect::<Vec<_>>().join(""))),
        "println" => |a| {
            let mut s = a.iter().map(display).collect::<Vec<_>>().join(" ");
            s.push('\n');
            Ok(Value::String(s))
        },
        "printf" => printf,

        // strings
        "upper" => |a| str_map(a, |s| s.to_uppercase()),
        "lower" => |a| str_map(a, |s| s.to_lowercase()),
        "title" => |a| str_map(a, title),
        "trim" => |a| str_map(a, |s| s.trim().to_string()),
        "trimPrefix" => |a| {
            let (p, s) = (str_arg(a, 0)?, str_arg(a, 1)?);
            Ok(Value::String(s.strip_prefix(p.as_str()).unwrap_or(&s).to_string()))
        },
        "trimSuffix" => |a| {
            let (p, s) = (str_arg(a, 0)?, str_arg(a, 1)?);
            Ok(Value::String(s.strip_suffix(p.as_str()).unwrap_or(&s).to_string()))
        },
        "replace" => |a| {
            let (from, to, s) = (str_arg(a, 0)?, str_arg(a, 1)?, str_arg(a, 2)?);
            Ok(Value::String(s.replace(&from, &to)))
        },
        "contains" => |a| Ok(Value::Bool(str_arg(a, 1)?.contains(&str_arg(a, 0)?))),
        "hasPrefix" => |a| Ok(Value::Bool(str_arg(a, 1)?.starts_with(&str_arg(a, 0)?))),
        "hasSuffix" => |a| Ok(Value::Bool(str_arg(a, 1)?.ends_with(&str_arg(a, 0)?))),
        "repeat" => |a| {
            let n = int_arg(a, 0)?.max(0) as usize;
            Ok(Value::String(str_arg(a, 1)?.repeat(n)))
        },
        "quote" => |a| Ok(Value::String(format!("{:?}", str_arg(a, 0)?))),
        "squote" => |a| Ok(Value::String(format!("'{}'", str_arg(a, 0)?))),
        "indent" => |a| Ok(Value::String(indent(int_arg(a, 0)?, &str_arg(a, 1)?))),
        "nindent" => |a| Ok(Value::String(format!("\n{}", indent(int_arg(a, 0)?, &str_arg(a, 1)?)))),
        "splitList" => |a| {
            let (sep, s) = (str_arg(a, 0)?, str_arg(a, 1)?);
            Ok(Value::Array(
                s.split(sep.as_str()).map(|p| Value::String(p.to_string())).collect(),
            ))
        },
        "join" => |a| {
            let sep = str_arg(a, 0)?;
            let items = match arg(a, 1)? {
                Value::Array(items) => items.iter().map(display).collect::<Vec<_>>(),
                other => vec![display(other)],
            };
            Ok(Value::String(items.join(&sep)))
        },

        // markdown
        "fence" => |_| Ok(Value::String("```".into())),
        "encodeMD" => |a| str_map(a, encode_md),
        "decodeMD" => |a| str_map(a, |s| s.replace("&grave;", "`")),

        // collections
        "len" => len,
        "index" => index,
        "list" => |a| Ok(Value::Array(a.to_vec())),
        "dict" => dict,

        // encoding
        "toJson" => |a| Ok(Value::String(serde_json::to_string(arg(a, 0)?)?)),
        "toPrettyJson" => |a| Ok(Value::String(serde_json::to_string_pretty(arg(a, 0)?)?)),
        "fromJson" => |a| Ok(serde_json::from_str(&str_arg(a, 0)?)?),
        "b64enc" => |a| {
            Ok(Value::String(
                base64::engine::general_purpose::STANDARD.encode(str_arg(a, 0)?),
            ))
        },
        "b64dec" => |a| {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(str_arg(a, 0)?)
                .map_err(|e| AgentError::template(format!("b64dec: {e}")))?;
            Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        },

        // arithmetic
        "add" => |a| arith(a, "add", i64::checked_add),
        "sub" => |a| arith(a, "sub", i64::checked_sub),
        "mul" => |a| arith(a, "mul", i64::checked_mul),

        _ => return None,
    };
    Some(f(args))
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn arg(args: &[Value], i: usize) -> Result<&Value> {
    args.get(i)
        .ok_or_else(|| AgentError::template(format!("missing argument {}", i + 1)))
}

/// Escape backticks so text can sit inside a markdown code fence.
pub fn encode_md(s: &str) -> String {
    s.replace('`', "&grave;")
}

fn arith(args: &[Value], name: &str, op: fn(i64, i64) -> Option<i64>) -> Result<Value> {
    let (x, y) = (int_arg(args, 0)?, int_arg(args, 1)?);
    op(x, y)
        .map(Value::from)
        .ok_or_else(|| AgentError::template(format!("{name}: integer overflow ({x}, {y})")))
}

fn str_arg(args: &[Value], i: usize) -> Result<String> {
    arg(args, i).map(display)
}

fn int_arg(args: &[Value], i: usize) -> Result<i64> {
    let v = arg(args, i)?;
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| AgentError::template(format!("not an integer: {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| AgentError::template(format!("not an integer: {s:?}"))),
        other => Err(AgentError::template(format!("not an integer: {other}"))),
    }
}

fn as_bool(v: &Value) -> bool {
    matches!(v, Value::Bool(true))
}

/// Apply `f` to the last argument, so piped input works.
fn str_map(args: &[Value], f: fn(&str) -> String) -> Result<Value> {
    let s = str_arg(args, args.len().saturating_sub(1))?;
    Ok(Value::String(f(&s)))
}

fn title(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut start = true;
    for c in s.chars() {
        if start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        start = c.is_whitespace();
    }
    out
}

fn indent(n: i64, s: &str) -> String {
    let pad = " ".repeat(n.max(0) as usize);
    s.lines()
        .map(|l| format!("{pad}{l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn and(args: &[Value]) -> Result<Value> {
    let first = arg(args, 0)?;
    Ok(args
        .iter()
        .find(|v| !truthy(v))
        .or_else(|| args.last())
        .unwrap_or(first)
        .clone())
}

fn or(args: &[Value]) -> Result<Value> {
    let first = arg(args, 0)?;
    Ok(args
        .iter()
        .find(|v| truthy(v))
        .or_else(|| args.last())
        .unwrap_or(first)
        .clone())
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// `eq a b c` is true when `a` equals any of the rest.
fn eq(args: &[Value]) -> Result<Value> {
    let first = arg(args, 0)?;
    arg(args, 1)?;
    Ok(Value::Bool(args[1..].iter().any(|v| loose_eq(first, v))))
}

fn compare(args: &[Value], pred: fn(std::cmp::Ordering) -> bool) -> Result<Value> {
    let (a, b) = (arg(args, 0)?, arg(args, 1)?);
    let ord = match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
    .ok_or_else(|| AgentError::template(format!("incompatible types for comparison: {a} {b}")))?;
    Ok(Value::Bool(pred(ord)))
}

/// `default d v` yields `v` unless it is empty.
fn default(args: &[Value]) -> Result<Value> {
    let d = arg(args, 0)?;
    Ok(match args.get(1) {
        Some(v) if truthy(v) => v.clone(),
        _ => d.clone(),
    })
}

fn len(args: &[Value]) -> Result<Value> {
    let n = match arg(args, 0)? {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        Value::Null => 0,
        other => return Err(AgentError::template(format!("len of {other}"))),
    };
    Ok(Value::from(n))
}

fn index(args: &[Value]) -> Result<Value> {
    let mut v = arg(args, 0)?.clone();
    for key in &args[1..] {
        v = match (&v, key) {
            (Value::Array(a), k) => {
                let i = int_arg(std::slice::from_ref(k), 0)?;
                usize::try_from(i)
                    .ok()
                    .and_then(|i| a.get(i))
                    .cloned()
                    .ok_or_else(|| AgentError::template(format!("index out of range: {i}")))?
            }
            (Value::Object(o), k) => o.get(&display(k)).cloned().unwrap_or(Value::Null),
            (Value::Null, _) => Value::Null,
            (other, _) => return Err(AgentError::template(format!("can't index {other}"))),
        };
    }
    Ok(v)
}

fn dict(args: &[Value]) -> Result<Value> {
    if args.len() % 2 != 0 {
        return Err(AgentError::template("dict expects key/value pairs"));
    }
    let mut map = Map::new();
    for pair in args.chunks(2) {
        map.insert(display(&pair[0]), pair[1].clone());
    }
    Ok(Value::Object(map))
}

/// Subset of Go's `fmt` verbs: `%s %d %v %q %f %t %%`, with `%.Nf`.
fn printf(args: &[Value]) -> Result<Value> {
    let format = str_arg(args, 0)?;
    let mut rest = args[1..].iter();
    let mut out = String::new();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            precision = digits.parse().ok();
        }
        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(v) = rest.next() else {
            out.push_str(&format!("%!{verb}(MISSING)"));
            continue;
        };
        match verb {
            's' | 'v' | 't' => out.push_str(&display(v)),
            'd' => match int_arg(std::slice::from_ref(v), 0) {
                Ok(n) => out.push_str(&n.to_string()),
                Err(_) => out.push_str(&format!("%!d({})", display(v))),
            },
            'f' => {
                let f = v.as_f64().unwrap_or_default();
                out.push_str(&format!("{:.*}", precision.unwrap_or(6), f));
            }
            'q' => out.push_str(&format!("{:?}", display(v))),
            other => out.push_str(&format!("%!{other}({})", display(v))),
        }
    }
    Ok(Value::String(out))
}
