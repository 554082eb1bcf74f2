//! Template lexer and parser.

use serde_json::Value;

use crate::error::{AgentError, Result};

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Text(String),
    Action(Pipeline),
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    With {
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Range {
        keys: Vec<String>,
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Pipeline {
    /// Variables declared (`:=`, false) or assigned (`=`, true).
    pub decl: Option<(Vec<String>, bool)>,
    pub cmds: Vec<Cmd>,
}

#[derive(Debug, Clone)]
pub(crate) struct Cmd {
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone)]
pub(crate) enum Operand {
    /// `.` or `.a.b`; the path is empty for the dot itself.
    Dot(Vec<String>),
    /// `$name.a.b`
    Var(String, Vec<String>),
    Literal(Value),
    Ident(String),
    /// `(pipeline).a.b`
    Sub(Box<Pipeline>, Vec<String>),
}

// ─────────────────────────────────────────────────────────────────────────────
// Lexing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Num(Value),
    Ident(String),
    Field(Vec<String>),
    Var(String, Vec<String>),
    Pipe,
    LParen,
    RParen,
    Comma,
    Declare,
    Assign,
}

enum Item {
    Text(String),
    Action(Vec<Token>),
}

/// Split the source into text and action items, applying trim markers.
fn split_items(src: &str) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut rest = src;
    let mut trim_next = false;

    while !rest.is_empty() {
        let Some(open) = rest.find("{{") else {
            let text = if trim_next { rest.trim_start() } else { rest };
            items.push(Item::Text(text.to_string()));
            break;
        };
        let mut text = &rest[..open];
        if trim_next {
            text = text.trim_start();
        }
        let mut inner_start = open + 2;
        let after = &rest[inner_start..];
        if after.starts_with('-') && after[1..].starts_with(char::is_whitespace) {
            text = text.trim_end();
            inner_start += 1;
        }
        if !text.is_empty() {
            items.push(Item::Text(text.to_string()));
        }

        let close = find_close(&rest[inner_start..])
            .ok_or_else(|| AgentError::template("unclosed action"))?;
        let mut inner = &rest[inner_start..inner_start + close];
        rest = &rest[inner_start + close + 2..];

        trim_next = false;
        if inner.ends_with('-') && inner[..inner.len() - 1].ends_with(char::is_whitespace) {
            inner = &inner[..inner.len() - 1];
            trim_next = true;
        }
        let inner = inner.trim();
        if inner.starts_with("/*") {
            if !inner.ends_with("*/") {
                return Err(AgentError::template("unclosed comment"));
            }
            continue;
        }
        items.push(Item::Action(lex(inner)?));
    }
    Ok(items)
}

/// Offset of the closing `}}`, skipping quoted strings.
fn find_close(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' && q == b'"' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'`' {
                    quote = Some(b);
                } else if b == b'}' && bytes.get(i + 1) == Some(&b'}') {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn lex(s: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = s.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let read_ident = |i: &mut usize| -> String {
        let start = *i;
        while *i < chars.len() && is_ident_char(chars[*i]) {
            *i += 1;
        }
        chars[start..*i].iter().collect()
    };
    let read_path = |i: &mut usize| -> Vec<String> {
        let mut path = Vec::new();
        while *i < chars.len() && chars[*i] == '.' {
            *i += 1;
            let start = *i;
            while *i < chars.len() && is_ident_char(chars[*i]) {
                *i += 1;
            }
            if *i > start {
                path.push(chars[start..*i].iter().collect());
            }
        }
        path
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Declare);
                i += 2;
            }
            '=' => {
                tokens.push(Token::Assign);
                i += 1;
            }
            '"' => {
                i += 1;
                let mut out = String::new();
                loop {
                    let Some(&c) = chars.get(i) else {
                        return Err(AgentError::template("unterminated quoted string"));
                    };
                    i += 1;
                    match c {
                        '"' => break,
                        '\\' => {
                            let esc = chars.get(i).copied().unwrap_or('\\');
                            i += 1;
                            out.push(match esc {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => other,
                            });
                        }
                        other => out.push(other),
                    }
                }
                tokens.push(Token::Str(out));
            }
            '`' => {
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != '`' {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(AgentError::template("unterminated raw string"));
                }
                tokens.push(Token::Str(chars[start..i].iter().collect()));
                i += 1;
            }
            '.' => {
                tokens.push(Token::Field(read_path(&mut i)));
            }
            '$' => {
                i += 1;
                let name = format!("${}", read_ident(&mut i));
                let path = read_path(&mut i);
                tokens.push(Token::Var(name, path));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '.' || chars[i] == '_')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect::<String>().replace('_', "");
                let num = if let Ok(n) = text.parse::<i64>() {
                    Value::from(n)
                } else if let Ok(f) = text.parse::<f64>() {
                    Value::from(f)
                } else {
                    return Err(AgentError::template(format!("bad number syntax: {text}")));
                };
                tokens.push(Token::Num(num));
            }
            c if is_ident_char(c) => {
                let word = read_ident(&mut i);
                tokens.push(Token::Ident(word));
            }
            other => {
                return Err(AgentError::template(format!(
                    "unexpected {other:?} in action"
                )));
            }
        }
    }
    Ok(tokens)
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

enum Stop {
    End,
    Else(Vec<Token>),
}

pub(crate) fn parse(src: &str) -> Result<Vec<Node>> {
    let items = split_items(src)?;
    let mut pos = 0;
    let (nodes, stop) = parse_list(&items, &mut pos)?;
    match stop {
        None => Ok(nodes),
        Some(Stop::End) => Err(AgentError::template("unexpected {{end}}")),
        Some(Stop::Else(_)) => Err(AgentError::template("unexpected {{else}}")),
    }
}

fn keyword(tokens: &[Token]) -> Option<&str> {
    match tokens.first() {
        Some(Token::Ident(w)) if matches!(w.as_str(), "if" | "else" | "end" | "range" | "with") => {
            Some(w.as_str())
        }
        _ => None,
    }
}

fn parse_list(items: &[Item], pos: &mut usize) -> Result<(Vec<Node>, Option<Stop>)> {
    let mut nodes = Vec::new();
    while *pos < items.len() {
        let item = &items[*pos];
        *pos += 1;
        let tokens = match item {
            Item::Text(t) => {
                nodes.push(Node::Text(t.clone()));
                continue;
            }
            Item::Action(tokens) => tokens,
        };
        match keyword(tokens) {
            Some("end") => return Ok((nodes, Some(Stop::End))),
            Some("else") => return Ok((nodes, Some(Stop::Else(tokens[1..].to_vec())))),
            Some("if") => nodes.push(parse_if(&tokens[1..], items, pos)?),
            Some("with") => {
                let pipe = parse_pipeline(&tokens[1..])?;
                let (body, otherwise) = parse_body(items, pos, "with")?;
                nodes.push(Node::With {
                    pipe,
                    body,
                    otherwise,
                });
            }
            Some("range") => {
                let mut pipe = parse_pipeline(&tokens[1..])?;
                let keys = match pipe.decl.take() {
                    Some((names, false)) => names,
                    Some((_, true)) => {
                        return Err(AgentError::template("range can't assign variables"));
                    }
                    None => Vec::new(),
                };
                let (body, otherwise) = parse_body(items, pos, "range")?;
                nodes.push(Node::Range {
                    keys,
                    pipe,
                    body,
                    otherwise,
                });
            }
            _ => nodes.push(Node::Action(parse_pipeline(tokens)?)),
        }
    }
    Ok((nodes, None))
}

/// Body and optional plain `else` branch of `with` and `range`.
fn parse_body(items: &[Item], pos: &mut usize, what: &str) -> Result<(Vec<Node>, Vec<Node>)> {
    let (body, stop) = parse_list(items, pos)?;
    match stop {
        Some(Stop::End) => Ok((body, Vec::new())),
        Some(Stop::Else(rest)) if rest.is_empty() => {
            let (otherwise, stop) = parse_list(items, pos)?;
            match stop {
                Some(Stop::End) => Ok((body, otherwise)),
                _ => Err(AgentError::template(format!("unterminated {what}"))),
            }
        }
        Some(Stop::Else(_)) => Err(AgentError::template(format!("unexpected else in {what}"))),
        None => Err(AgentError::template(format!("unterminated {what}"))),
    }
}

fn parse_if(cond: &[Token], items: &[Item], pos: &mut usize) -> Result<Node> {
    let mut branches = Vec::new();
    let mut cond = parse_pipeline(cond)?;
    loop {
        let (body, stop) = parse_list(items, pos)?;
        branches.push((cond, body));
        match stop {
            Some(Stop::End) => {
                return Ok(Node::If {
                    branches,
                    otherwise: Vec::new(),
                });
            }
            Some(Stop::Else(rest)) if rest.is_empty() => {
                let (otherwise, stop) = parse_list(items, pos)?;
                return match stop {
                    Some(Stop::End) => Ok(Node::If {
                        branches,
                        otherwise,
                    }),
                    _ => Err(AgentError::template("unterminated if")),
                };
            }
            Some(Stop::Else(rest)) => match rest.first() {
                Some(Token::Ident(w)) if w == "if" => cond = parse_pipeline(&rest[1..])?,
                _ => return Err(AgentError::template("expected if after else")),
            },
            None => return Err(AgentError::template("unterminated if")),
        }
    }
}

fn parse_pipeline(tokens: &[Token]) -> Result<Pipeline> {
    let mut tokens = tokens;
    let mut decl = None;

    // $x := / $x = / $i, $v :=
    let mut names = Vec::new();
    let mut i = 0;
    while let Some(Token::Var(name, path)) = tokens.get(i) {
        if !path.is_empty() {
            break;
        }
        names.push(name.clone());
        match tokens.get(i + 1) {
            Some(Token::Comma) => i += 2,
            Some(Token::Declare) => {
                decl = Some((names.clone(), false));
                tokens = &tokens[i + 2..];
                break;
            }
            Some(Token::Assign) => {
                decl = Some((names.clone(), true));
                tokens = &tokens[i + 2..];
                break;
            }
            _ => break,
        }
    }

    let mut cmds = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0usize;
    for tok in tokens {
        match tok {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| AgentError::template("unexpected )"))?;
            }
            Token::Pipe if depth == 0 => {
                cmds.push(parse_cmd(&current)?);
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(tok.clone());
    }
    if depth != 0 {
        return Err(AgentError::template("unclosed ("));
    }
    if current.is_empty() {
        return Err(AgentError::template("missing command"));
    }
    cmds.push(parse_cmd(&current)?);
    Ok(Pipeline { decl, cmds })
}

fn parse_cmd(tokens: &[Token]) -> Result<Cmd> {
    if tokens.is_empty() {
        return Err(AgentError::template("missing command"));
    }
    let mut args = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let op = match &tokens[i] {
            Token::Str(s) => Operand::Literal(Value::String(s.clone())),
            Token::Num(n) => Operand::Literal(n.clone()),
            Token::Ident(w) => match w.as_str() {
                "true" => Operand::Literal(Value::Bool(true)),
                "false" => Operand::Literal(Value::Bool(false)),
                "nil" => Operand::Literal(Value::Null),
                _ => Operand::Ident(w.clone()),
            },
            Token::Field(path) => Operand::Dot(path.clone()),
            Token::Var(name, path) => Operand::Var(name.clone(), path.clone()),
            Token::LParen => {
                let mut depth = 0usize;
                let mut end = i;
                for (j, t) in tokens.iter().enumerate().skip(i) {
                    match t {
                        Token::LParen => depth += 1,
                        Token::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                end = j;
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let inner = parse_pipeline(&tokens[i + 1..end])?;
                i = end;
                let path = match tokens.get(i + 1) {
                    Some(Token::Field(path)) if !path.is_empty() => {
                        i += 1;
                        path.clone()
                    }
                    _ => Vec::new(),
                };
                Operand::Sub(Box::new(inner), path)
            }
            other => {
                return Err(AgentError::template(format!("unexpected {other:?} in command")));
            }
        };
        args.push(op);
        i += 1;
    }
    Ok(Cmd { args })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lex_tokens() {
        let toks = lex(r#"$x := printf "a\"b" .f.g 12 -3 (x)"#).unwrap();
        assert_eq!(
            toks,
            vec![
                Token::Var("$x".into(), vec![]),
                Token::Declare,
                Token::Ident("printf".into()),
                Token::Str("a\"b".into()),
                Token::Field(vec!["f".into(), "g".into()]),
                Token::Num(Value::from(12)),
                Token::Num(Value::from(-3)),
                Token::LParen,
                Token::Ident("x".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_close_skips_strings() {
        assert_eq!(find_close(r#" "}}" }}"#), Some(6));
        assert_eq!(find_close("no close"), None);
    }

    #[test]
    fn test_trim_markers() {
        let items = split_items("a  {{- 1 -}}  b").unwrap();
        let texts: Vec<&str> = items
            .iter()
            .filter_map(|i| match i {
                Item::Text(t) => Some(t.as_str()),
                Item::Action(_) => None,
            })
            .collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_else_if_chain() {
        let nodes = parse("{{ if .a }}1{{ else if .b }}2{{ else }}3{{ end }}").unwrap();
        match &nodes[0] {
            Node::If {
                branches,
                otherwise,
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(otherwise.len(), 1);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }
}
