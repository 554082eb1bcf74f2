//! Text templates in the style of Go's `text/template`.
//!
//! Supported: `{{ pipeline }}` with `|`, `{{- -}}` trimming, comments,
//! `if`/`else if`/`else`, `range` (with `$i, $v :=`), `with`, variables
//! (`$x := ...`, `$x = ...`, `$`), field access on the data (`.a.b`) and
//! parenthesized sub-pipelines.
//!
//! Functions come from two places: the built-in set in [`funcs`] (sprig-like
//! string, list and comparison helpers) and a caller-supplied
//! [`TemplateFuncs`] host that provides request-bound helpers such as `env`,
//! `ai` and the core utilities.
//!
//! ```ignore
//! let t = Template::parse("Hello {{ .name | upper }}")?;
//! let out = t.render(&json!({"name": "swarm"}), &NoFuncs).await?;
//! ```

pub mod funcs;
mod parse;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{AgentError, Result};
use parse::{Cmd, Node, Operand, Pipeline};

/// Whether `s` should be rendered as a template: it starts with a `#!`
/// line or is wrapped in `{{ ... }}`.
pub fn is_template(s: &str) -> bool {
    let t = s.trim();
    t.starts_with("#!") || (t.starts_with("{{") && t.ends_with("}}"))
}

/// The template text of `s`, without a leading `#!` line.
pub fn template_source(s: &str) -> &str {
    let t = s.trim_start();
    if t.starts_with("#!") {
        return t.split_once('\n').map(|(_, rest)| rest).unwrap_or_default();
    }
    s
}

/// Host functions available to a template.
#[async_trait]
pub trait TemplateFuncs: Send + Sync {
    /// Whether `name` is provided by this host.
    fn has(&self, name: &str) -> bool;

    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value>;
}

/// A host without functions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFuncs;

#[async_trait]
impl TemplateFuncs for NoFuncs {
    fn has(&self, _name: &str) -> bool {
        false
    }

    async fn call(&self, name: &str, _args: Vec<Value>) -> Result<Value> {
        Err(AgentError::template(format!("function {name:?} not defined")))
    }
}

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    root: Vec<Node>,
}

impl Template {
    pub fn parse(src: &str) -> Result<Self> {
        Ok(Self {
            root: parse::parse(src)?,
        })
    }

    /// Execute against `data`.
    pub async fn render(&self, data: &Value, funcs: &dyn TemplateFuncs) -> Result<String> {
        let mut exec = Exec {
            funcs,
            out: String::new(),
            vars: vec![("$".to_string(), data.clone())],
        };
        exec.walk(&self.root, data).await?;
        Ok(exec.out)
    }
}

/// Render `s` when it is a template, otherwise return it unchanged.
pub async fn apply(s: &str, data: &Value, funcs: &dyn TemplateFuncs) -> Result<String> {
    if !is_template(s) {
        return Ok(s.to_string());
    }
    Template::parse(template_source(s))?.render(data, funcs).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution
// ─────────────────────────────────────────────────────────────────────────────

struct Exec<'a> {
    funcs: &'a dyn TemplateFuncs,
    out: String,
    vars: Vec<(String, Value)>,
}

/// Go truthiness: false, 0, nil and empty values are false.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Printed form of a value: strings verbatim, nil empty, compounds as JSON.
pub fn display(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn field(v: &Value, name: &str) -> Value {
    match v {
        Value::Object(map) => map
            .get(name)
            .or_else(|| {
                map.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn fields(mut v: Value, path: &[String]) -> Value {
    for name in path {
        v = field(&v, name);
    }
    v
}

impl<'a> Exec<'a> {
    fn walk<'s>(&'s mut self, nodes: &'s [Node], dot: &'s Value) -> BoxFuture<'s, Result<()>>
    where
        'a: 's,
    {
        Box::pin(async move {
            for node in nodes {
                match node {
                    Node::Text(text) => self.out.push_str(text),
                    Node::Action(pipe) => {
                        let v = self.pipeline(pipe, dot).await?;
                        if pipe.decl.is_none() {
                            self.out.push_str(&display(&v));
                        }
                    }
                    Node::If { branches, otherwise } => {
                        let mark = self.vars.len();
                        let mut taken = false;
                        for (cond, body) in branches {
                            let v = self.pipeline(cond, dot).await?;
                            if truthy(&v) {
                                self.walk(body, dot).await?;
                                taken = true;
                                break;
                            }
                        }
                        if !taken {
                            self.walk(otherwise, dot).await?;
                        }
                        self.vars.truncate(mark);
                    }
                    Node::With {
                        pipe,
                        body,
                        otherwise,
                    } => {
                        let mark = self.vars.len();
                        let v = self.pipeline(pipe, dot).await?;
                        if truthy(&v) {
                            self.walk(body, &v).await?;
                        } else {
                            self.walk(otherwise, dot).await?;
                        }
                        self.vars.truncate(mark);
                    }
                    Node::Range {
                        keys,
                        pipe,
                        body,
                        otherwise,
                    } => {
                        let mark = self.vars.len();
                        let v = self.pipeline(pipe, dot).await?;
                        let items: Vec<(Value, Value)> = match v {
                            Value::Array(a) => a
                                .into_iter()
                                .enumerate()
                                .map(|(i, e)| (Value::from(i), e))
                                .collect(),
                            Value::Object(o) => {
                                o.into_iter().map(|(k, e)| (Value::String(k), e)).collect()
                            }
                            Value::Number(n) => (0..n.as_i64().unwrap_or(0))
                                .map(|i| (Value::from(i), Value::from(i)))
                                .collect(),
                            Value::Null => Vec::new(),
                            other => {
                                return Err(AgentError::template(format!(
                                    "range can't iterate over {other}"
                                )));
                            }
                        };
                        if items.is_empty() {
                            self.walk(otherwise, dot).await?;
                        }
                        for (k, item) in items {
                            self.vars.truncate(mark);
                            match keys.as_slice() {
                                [] => {}
                                [v] => self.vars.push((v.clone(), item.clone())),
                                [k_name, v_name, ..] => {
                                    self.vars.push((k_name.clone(), k));
                                    self.vars.push((v_name.clone(), item.clone()));
                                }
                            }
                            self.walk(body, &item).await?;
                        }
                        self.vars.truncate(mark);
                    }
                }
            }
            Ok(())
        })
    }

    fn pipeline<'s>(&'s mut self, pipe: &'s Pipeline, dot: &'s Value) -> BoxFuture<'s, Result<Value>>
    where
        'a: 's,
    {
        Box::pin(async move {
            let mut prev: Option<Value> = None;
            for cmd in &pipe.cmds {
                prev = Some(self.command(cmd, dot, prev.take()).await?);
            }
            let v = prev.unwrap_or(Value::Null);
            if let Some((names, assign)) = &pipe.decl {
                for name in names {
                    if *assign {
                        match self.vars.iter_mut().rev().find(|(n, _)| n == name) {
                            Some(slot) => slot.1 = v.clone(),
                            None => {
                                return Err(AgentError::template(format!(
                                    "undefined variable: {name}"
                                )));
                            }
                        }
                    } else {
                        self.vars.push((name.clone(), v.clone()));
                    }
                }
            }
            Ok(v)
        })
    }

    async fn command(&mut self, cmd: &Cmd, dot: &Value, prev: Option<Value>) -> Result<Value> {
        if let Some(Operand::Ident(name)) = cmd.args.first() {
            let mut args = Vec::with_capacity(cmd.args.len());
            for op in &cmd.args[1..] {
                args.push(self.operand(op, dot).await?);
            }
            if let Some(p) = prev {
                args.push(p);
            }
            return self.call(name, args).await;
        }
        if cmd.args.len() > 1 || prev.is_some() {
            return Err(AgentError::template("can't give argument to non-function"));
        }
        match cmd.args.first() {
            Some(op) => self.operand(op, dot).await,
            None => Ok(Value::Null),
        }
    }

    async fn operand(&mut self, op: &Operand, dot: &Value) -> Result<Value> {
        Ok(match op {
            Operand::Dot(path) => fields(dot.clone(), path),
            Operand::Var(name, path) => {
                let v = self
                    .vars
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| AgentError::template(format!("undefined variable: {name}")))?;
                fields(v, path)
            }
            Operand::Literal(v) => v.clone(),
            Operand::Ident(name) => self.call(name, Vec::new()).await?,
            Operand::Sub(pipe, path) => {
                let v = self.pipeline(pipe, dot).await?;
                fields(v, path)
            }
        })
    }

    async fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        if self.funcs.has(name) {
            return self.funcs.call(name, args).await;
        }
        match funcs::builtin(name, &args) {
            Some(result) => result,
            None => Err(AgentError::template(format!("function {name:?} not defined"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    async fn render(src: &str, data: Value) -> String {
        Template::parse(src)
            .unwrap()
            .render(&data, &NoFuncs)
            .await
            .unwrap()
    }

    #[test]
    fn test_is_template() {
        assert!(is_template("{{ .query }}"));
        assert!(is_template("#!\nhello {{ .x }}"));
        assert!(!is_template("plain text"));
        assert!(!is_template("hello {{ .x }}"));
        assert_eq!(template_source("#!/bin/tpl\nbody"), "body");
        assert_eq!(template_source("{{ x }}"), "{{ x }}");
    }

    #[tokio::test]
    async fn test_fields_and_pipes() {
        let out = render(
            "Hi {{ .user.name | upper }}, {{ .missing }}!",
            json!({"user": {"name": "ada"}}),
        )
        .await;
        assert_eq!(out, "Hi ADA, !");
    }

    #[tokio::test]
    async fn test_control_flow() {
        let src = "{{ if .a }}A{{ else if .b }}B{{ else }}C{{ end }}";
        assert_eq!(render(src, json!({"a": true})).await, "A");
        assert_eq!(render(src, json!({"b": 1})).await, "B");
        assert_eq!(render(src, json!({})).await, "C");

        let out = render(
            "{{ range $i, $v := .items }}{{ $i }}={{ $v }};{{ else }}none{{ end }}",
            json!({"items": ["x", "y"]}),
        )
        .await;
        assert_eq!(out, "0=x;1=y;");
        assert_eq!(render("{{ range .items }}x{{ else }}none{{ end }}", json!({})).await, "none");

        let out = render("{{ with .user }}{{ .name }}{{ end }}", json!({"user": {"name": "b"}})).await;
        assert_eq!(out, "b");
    }

    #[tokio::test]
    async fn test_variables_and_trim() {
        let out = render(
            "{{- $x := \"v\" -}}\n  [{{ $x }}] {{/* gone */}}{{ $.top }}",
            json!({"top": 1}),
        )
        .await;
        assert_eq!(out, "[v] 1");
    }

    #[tokio::test]
    async fn test_sub_pipeline_and_printf() {
        let out = render(
            r#"{{ printf "%s-%d" (lower "AB") (len .xs) }}"#,
            json!({"xs": [1, 2, 3]}),
        )
        .await;
        assert_eq!(out, "ab-3");
    }

    #[tokio::test]
    async fn test_parse_errors() {
        assert!(Template::parse("{{ if .x }}open").is_err());
        assert!(Template::parse("{{ end }}").is_err());
        assert!(Template::parse("{{ \"unterminated }}").is_err());
    }

    struct Recorder(Mutex<Vec<(String, Vec<Value>)>>);

    #[async_trait]
    impl TemplateFuncs for Recorder {
        fn has(&self, name: &str) -> bool {
            name == "env"
        }

        async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
            self.0.lock().push((name.to_string(), args));
            Ok(json!("from-host"))
        }
    }

    #[tokio::test]
    async fn test_host_functions() {
        let host = Recorder(Mutex::new(Vec::new()));
        let out = Template::parse("{{ env \"HOME\" }}/{{ \"x\" | env }}")
            .unwrap()
            .render(&json!({}), &host)
            .await
            .unwrap();
        assert_eq!(out, "from-host/from-host");
        let calls = host.0.lock();
        assert_eq!(calls[0].1, vec![json!("HOME")]);
        assert_eq!(calls[1].1, vec![json!("x")]);

        let err = Template::parse("{{ nope }}")
            .unwrap()
            .render(&json!({}), &NoFuncs)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_apply_leaves_plain_text() {
        let out = apply("no braces here", &json!({}), &NoFuncs).await.unwrap();
        assert_eq!(out, "no braces here");
        let out = apply("#!\n{{ .q }}!", &json!({"q": "hi"}), &NoFuncs).await.unwrap();
        assert_eq!(out, "hi!");
    }
}
