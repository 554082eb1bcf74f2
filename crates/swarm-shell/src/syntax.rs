//! Lexer and parser for the POSIX shell subset.
//!
//! Supported: simple commands with prefix assignments, pipelines, `!`,
//! `&&`, `||`, `;`, newlines, comments, single/double quotes, backslash
//! escapes, `$name`, `${name...}` with the default/alternative/length and
//! prefix/suffix removal operators, `$(...)` and backticks, redirections
//! (`<`, `>`, `>>`, `n>&m`, `&>`, here-documents), `if`, `for`, `while`,
//! `until`, `{ ...; }` groups and `( ... )` subshells.
//!
//! Not supported: background jobs, functions, `case`, arithmetic expansion
//! and arrays.

use crate::error::{Result, ShellError};

// ─────────────────────────────────────────────────────────────────────────────
// AST
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub items: Vec<AndOr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AndOr {
    pub first: Pipeline,
    pub rest: Vec<(Connector, Pipeline)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub negated: bool,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Simple(SimpleCommand),
    Group(Script, Vec<Redirect>),
    Subshell(Script, Vec<Redirect>),
    If {
        branches: Vec<(Script, Script)>,
        else_body: Option<Script>,
    },
    For {
        var: String,
        items: Option<Vec<Word>>,
        body: Script,
    },
    While {
        until: bool,
        cond: Script,
        body: Script,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimpleCommand {
    pub assigns: Vec<(String, Word)>,
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redirect {
    pub fd: u32,
    pub op: RedirOp,
    pub target: Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirOp {
    /// `<`
    Read,
    /// `>`
    Write,
    /// `>>`
    Append,
    /// `n>&m`
    Dup,
    /// `&>`
    WriteBoth,
    /// `<<` body is the target word.
    HereDoc,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    /// Unquoted text; subject to globbing.
    Lit(String),
    /// Single-quoted or backslash-escaped text.
    Quoted(String),
    /// Double-quoted parts; never split or globbed.
    Double(Vec<WordPart>),
    Param(Param),
    Command(Script),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub op: ParamOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamOp {
    None,
    Length,
    Default { colon: bool, word: Word },
    Assign { colon: bool, word: Word },
    Alternative { colon: bool, word: Word },
    Error { colon: bool, word: Word },
    RemovePrefix { longest: bool, pattern: Word },
    RemoveSuffix { longest: bool, pattern: Word },
}

impl Word {
    pub fn lit(s: impl Into<String>) -> Self {
        Self {
            parts: vec![WordPart::Lit(s.into())],
        }
    }

    /// The text of a word made of a single unquoted literal.
    pub fn literal(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [WordPart::Lit(s)] => Some(s.as_str()),
            _ => None,
        }
    }

    /// Text with quotes removed and no expansion; used for here-doc
    /// delimiters.
    fn flat_text(&self) -> String {
        fn flat(parts: &[WordPart], out: &mut String) {
            for p in parts {
                match p {
                    WordPart::Lit(s) | WordPart::Quoted(s) => out.push_str(s),
                    WordPart::Double(inner) => flat(inner, out),
                    WordPart::Param(p) => {
                        out.push('$');
                        out.push_str(&p.name);
                    }
                    WordPart::Command(_) => {}
                }
            }
        }
        let mut out = String::new();
        flat(&self.parts, &mut out);
        out
    }

    fn has_quotes(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, WordPart::Quoted(_) | WordPart::Double(_)))
    }
}

/// Parse a script.
pub fn parse(src: &str) -> Result<Script> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let script = parser.parse_script(&[])?;
    if let Some(tok) = parser.peek() {
        return Err(ShellError::parse(format!("unexpected {}", describe(tok))));
    }
    Ok(script)
}

/// Valid shell variable name.
pub fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ─────────────────────────────────────────────────────────────────────────────
// Lexer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(Word),
    AndIf,
    OrIf,
    Pipe,
    Semi,
    Newline,
    LParen,
    RParen,
    Redir { fd: Option<u32>, op: RedirOp },
    HereDoc { fd: Option<u32>, body: Word },
}

struct PendingHereDoc {
    index: usize,
    delimiter: String,
    strip_tabs: bool,
    quoted: bool,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    tokens: Vec<Token>,
    pending: Vec<PendingHereDoc>,
}

fn is_meta(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | ';' | '&' | '|' | '<' | '>' | '(' | ')')
}

impl Lexer {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            tokens: Vec::new(),
            pending: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => {
                    self.pos += 1;
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                }
                '\n' => {
                    self.pos += 1;
                    self.tokens.push(Token::Newline);
                    self.read_heredocs()?;
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                ';' => {
                    self.pos += 1;
                    if self.peek() == Some(';') {
                        return Err(ShellError::parse("case statements are not supported"));
                    }
                    self.tokens.push(Token::Semi);
                }
                '&' => {
                    self.pos += 1;
                    match self.peek() {
                        Some('&') => {
                            self.pos += 1;
                            self.tokens.push(Token::AndIf);
                        }
                        Some('>') => {
                            self.pos += 1;
                            self.tokens.push(Token::Redir {
                                fd: None,
                                op: RedirOp::WriteBoth,
                            });
                        }
                        _ => {
                            return Err(ShellError::parse(
                                "background jobs are not supported",
                            ));
                        }
                    }
                }
                '|' => {
                    self.pos += 1;
                    if self.peek() == Some('|') {
                        self.pos += 1;
                        self.tokens.push(Token::OrIf);
                    } else {
                        self.tokens.push(Token::Pipe);
                    }
                }
                '(' => {
                    self.pos += 1;
                    self.tokens.push(Token::LParen);
                }
                ')' => {
                    self.pos += 1;
                    self.tokens.push(Token::RParen);
                }
                '<' | '>' => self.lex_redirect(None)?,
                d if d.is_ascii_digit() && self.fd_prefix().is_some() => {
                    let (fd, len) = self.fd_prefix().unwrap_or((0, 0));
                    self.pos += len;
                    self.lex_redirect(Some(fd))?;
                }
                _ => {
                    let word = self.lex_word()?;
                    self.tokens.push(Token::Word(word));
                }
            }
        }
        if !self.pending.is_empty() {
            self.read_heredocs()?;
        }
        Ok(self.tokens)
    }

    /// `2>` style file descriptor: digits directly followed by `<` or `>`.
    fn fd_prefix(&self) -> Option<(u32, usize)> {
        let mut len = 0;
        while self.peek_at(len).is_some_and(|c| c.is_ascii_digit()) {
            len += 1;
        }
        match self.peek_at(len) {
            Some('<') | Some('>') => {
                let digits: String = self.chars[self.pos..self.pos + len].iter().collect();
                digits.parse().ok().map(|fd| (fd, len))
            }
            _ => None,
        }
    }

    fn lex_redirect(&mut self, fd: Option<u32>) -> Result<()> {
        let c = self.bump();
        if c == Some('<') {
            if self.peek() != Some('<') {
                self.tokens.push(Token::Redir {
                    fd,
                    op: RedirOp::Read,
                });
                return Ok(());
            }
            self.pos += 1;
            let strip_tabs = if self.peek() == Some('-') {
                self.pos += 1;
                true
            } else {
                false
            };
            while matches!(self.peek(), Some(' ') | Some('\t')) {
                self.pos += 1;
            }
            let delim = self.lex_word()?;
            if delim.parts.is_empty() {
                return Err(ShellError::parse("missing here-document delimiter"));
            }
            self.pending.push(PendingHereDoc {
                index: self.tokens.len(),
                delimiter: delim.flat_text(),
                strip_tabs,
                quoted: delim.has_quotes(),
            });
            self.tokens.push(Token::HereDoc {
                fd,
                body: Word::default(),
            });
            return Ok(());
        }
        let op = match self.peek() {
            Some('>') => {
                self.pos += 1;
                RedirOp::Append
            }
            Some('&') => {
                self.pos += 1;
                RedirOp::Dup
            }
            Some('|') => {
                self.pos += 1;
                RedirOp::Write
            }
            _ => RedirOp::Write,
        };
        self.tokens.push(Token::Redir { fd, op });
        Ok(())
    }

    fn read_heredocs(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        for doc in pending {
            let mut body = String::new();
            while self.pos < self.chars.len() {
                let start = self.pos;
                while self.peek().is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
                let line: String = self.chars[start..self.pos].iter().collect();
                if self.peek() == Some('\n') {
                    self.pos += 1;
                }
                let line = if doc.strip_tabs {
                    line.trim_start_matches('\t').to_string()
                } else {
                    line
                };
                if line == doc.delimiter {
                    break;
                }
                body.push_str(&line);
                body.push('\n');
            }
            let word = if doc.quoted {
                Word {
                    parts: vec![WordPart::Quoted(body)],
                }
            } else {
                let parts = Lexer::new(&body).lex_double(None)?;
                Word {
                    parts: vec![WordPart::Double(parts)],
                }
            };
            if let Some(Token::HereDoc { body, .. }) = self.tokens.get_mut(doc.index) {
                *body = word;
            }
        }
        Ok(())
    }

    fn lex_word(&mut self) -> Result<Word> {
        let mut parts = Vec::new();
        let mut lit = String::new();
        let flush = |lit: &mut String, parts: &mut Vec<WordPart>| {
            if !lit.is_empty() {
                parts.push(WordPart::Lit(std::mem::take(lit)));
            }
        };
        while let Some(c) = self.peek() {
            if is_meta(c) {
                break;
            }
            match c {
                '\'' => {
                    flush(&mut lit, &mut parts);
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c != '\'') {
                        self.pos += 1;
                    }
                    if self.peek().is_none() {
                        return Err(ShellError::parse("unterminated single quote"));
                    }
                    let s: String = self.chars[start..self.pos].iter().collect();
                    self.pos += 1;
                    parts.push(WordPart::Quoted(s));
                }
                '"' => {
                    flush(&mut lit, &mut parts);
                    self.pos += 1;
                    let inner = self.lex_double(Some('"'))?;
                    parts.push(WordPart::Double(inner));
                }
                '\\' => {
                    self.pos += 1;
                    match self.bump() {
                        Some('\n') => {}
                        Some(c) => {
                            flush(&mut lit, &mut parts);
                            parts.push(WordPart::Quoted(c.to_string()));
                        }
                        None => lit.push('\\'),
                    }
                }
                '$' => {
                    flush(&mut lit, &mut parts);
                    let part = self.lex_dollar()?;
                    parts.push(part);
                }
                '`' => {
                    flush(&mut lit, &mut parts);
                    self.pos += 1;
                    let part = self.lex_backtick()?;
                    parts.push(part);
                }
                _ => {
                    lit.push(c);
                    self.pos += 1;
                }
            }
        }
        flush(&mut lit, &mut parts);
        Ok(Word { parts })
    }

    /// Double-quoted content up to `terminator`, or to end of input for
    /// here-document bodies.
    fn lex_double(&mut self, terminator: Option<char>) -> Result<Vec<WordPart>> {
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            let Some(c) = self.peek() else {
                if terminator.is_some() {
                    return Err(ShellError::parse("unterminated double quote"));
                }
                break;
            };
            if Some(c) == terminator {
                self.pos += 1;
                break;
            }
            match c {
                '\\' => {
                    self.pos += 1;
                    match self.peek() {
                        Some(e @ ('$' | '`' | '\\')) => {
                            self.pos += 1;
                            lit.push(e);
                        }
                        Some('"') if terminator.is_some() => {
                            self.pos += 1;
                            lit.push('"');
                        }
                        Some('\n') => {
                            self.pos += 1;
                        }
                        _ => lit.push('\\'),
                    }
                }
                '$' => {
                    if !lit.is_empty() {
                        parts.push(WordPart::Lit(std::mem::take(&mut lit)));
                    }
                    let part = self.lex_dollar()?;
                    parts.push(part);
                }
                '`' => {
                    if !lit.is_empty() {
                        parts.push(WordPart::Lit(std::mem::take(&mut lit)));
                    }
                    self.pos += 1;
                    let part = self.lex_backtick()?;
                    parts.push(part);
                }
                _ => {
                    lit.push(c);
                    self.pos += 1;
                }
            }
        }
        if !lit.is_empty() {
            parts.push(WordPart::Lit(lit));
        }
        Ok(parts)
    }

    fn lex_dollar(&mut self) -> Result<WordPart> {
        // skip '$'
        self.pos += 1;
        match self.peek() {
            Some('{') => {
                self.pos += 1;
                let start = self.pos;
                let mut depth = 1;
                while let Some(c) = self.peek() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    self.pos += 1;
                }
                if self.peek().is_none() {
                    return Err(ShellError::parse("unterminated ${"));
                }
                let raw: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                Ok(WordPart::Param(parse_braced_param(&raw)?))
            }
            Some('(') => {
                if self.peek_at(1) == Some('(') {
                    return Err(ShellError::parse("arithmetic expansion is not supported"));
                }
                self.pos += 1;
                let inner = self.read_balanced_parens()?;
                Ok(WordPart::Command(parse(&inner)?))
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    self.pos += 1;
                }
                let name: String = self.chars[start..self.pos].iter().collect();
                Ok(WordPart::Param(Param {
                    name,
                    op: ParamOp::None,
                }))
            }
            Some(c) if c.is_ascii_digit() || matches!(c, '?' | '#' | '@' | '*' | '$' | '!' | '-') => {
                self.pos += 1;
                Ok(WordPart::Param(Param {
                    name: c.to_string(),
                    op: ParamOp::None,
                }))
            }
            _ => Ok(WordPart::Lit("$".into())),
        }
    }

    /// Body of `$( ... )` after the opening paren.
    fn read_balanced_parens(&mut self) -> Result<String> {
        let start = self.pos;
        let mut depth = 1;
        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    self.pos += 1;
                }
                '\'' => {
                    self.pos += 1;
                    while self.peek().is_some_and(|c| c != '\'') {
                        self.pos += 1;
                    }
                }
                '"' => {
                    self.pos += 1;
                    while let Some(c) = self.peek() {
                        if c == '\\' {
                            self.pos += 1;
                        } else if c == '"' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        let inner: String = self.chars[start..self.pos].iter().collect();
                        self.pos += 1;
                        return Ok(inner);
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        Err(ShellError::parse("unterminated $("))
    }

    fn lex_backtick(&mut self) -> Result<WordPart> {
        let mut inner = String::new();
        loop {
            match self.bump() {
                None => return Err(ShellError::parse("unterminated backquote")),
                Some('`') => break,
                Some('\\') => match self.bump() {
                    Some(c @ ('`' | '\\' | '$')) => inner.push(c),
                    Some(c) => {
                        inner.push('\\');
                        inner.push(c);
                    }
                    None => inner.push('\\'),
                },
                Some(c) => inner.push(c),
            }
        }
        Ok(WordPart::Command(parse(&inner)?))
    }
}

fn parse_braced_param(raw: &str) -> Result<Param> {
    let bad = || ShellError::parse(format!("${{{raw}}}: bad substitution"));

    if let Some(name) = raw.strip_prefix('#')
        && !name.is_empty()
    {
        if !is_name(name) && !name.chars().all(|c| c.is_ascii_digit()) {
            return Err(bad());
        }
        return Ok(Param {
            name: name.to_string(),
            op: ParamOp::Length,
        });
    }

    let name_len = match raw.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => raw
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(raw.len()),
        Some(c) if c.is_ascii_digit() => raw
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(raw.len()),
        Some('?' | '#' | '@' | '*' | '$' | '!') => 1,
        _ => return Err(bad()),
    };
    let (name, rest) = raw.split_at(name_len);
    let name = name.to_string();
    if rest.is_empty() {
        return Ok(Param {
            name,
            op: ParamOp::None,
        });
    }

    let operand = |s: &str| -> Result<Word> {
        let parts = Lexer::new(s).lex_double(None)?;
        Ok(Word {
            parts: vec![WordPart::Double(parts)],
        })
    };

    let (colon, rest2) = match rest.strip_prefix(':') {
        Some(r) => (true, r),
        None => (false, rest),
    };
    let op = match rest2.chars().next() {
        Some('-') => ParamOp::Default {
            colon,
            word: operand(&rest2[1..])?,
        },
        Some('=') => ParamOp::Assign {
            colon,
            word: operand(&rest2[1..])?,
        },
        Some('+') => ParamOp::Alternative {
            colon,
            word: operand(&rest2[1..])?,
        },
        Some('?') => ParamOp::Error {
            colon,
            word: operand(&rest2[1..])?,
        },
        Some('#') if !colon => {
            let longest = rest2.starts_with("##");
            let pat = if longest { &rest2[2..] } else { &rest2[1..] };
            ParamOp::RemovePrefix {
                longest,
                pattern: operand(pat)?,
            }
        }
        Some('%') if !colon => {
            let longest = rest2.starts_with("%%");
            let pat = if longest { &rest2[2..] } else { &rest2[1..] };
            ParamOp::RemoveSuffix {
                longest,
                pattern: operand(pat)?,
            }
        }
        _ => return Err(bad()),
    };
    Ok(Param { name, op })
}

// ─────────────────────────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────────────────────────

const RESERVED: &[&str] = &[
    "then", "elif", "else", "fi", "do", "done", "}", "in",
];

fn describe(tok: &Token) -> String {
    match tok {
        Token::Word(w) => format!("'{}'", w.flat_text()),
        Token::AndIf => "'&&'".into(),
        Token::OrIf => "'||'".into(),
        Token::Pipe => "'|'".into(),
        Token::Semi => "';'".into(),
        Token::Newline => "newline".into(),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        Token::Redir { .. } | Token::HereDoc { .. } => "redirection".into(),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self) -> Option<&str> {
        match self.peek() {
            Some(Token::Word(w)) => w.literal(),
            _ => None,
        }
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some(Token::Newline)) {
            self.pos += 1;
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.peek_keyword() == Some(kw) {
            self.pos += 1;
            return Ok(());
        }
        Err(match self.peek() {
            Some(tok) => ShellError::parse(format!("expected '{kw}', found {}", describe(tok))),
            None => ShellError::parse(format!("expected '{kw}', found end of input")),
        })
    }

    fn parse_script(&mut self, terminators: &[&str]) -> Result<Script> {
        let mut items = Vec::new();
        loop {
            while matches!(self.peek(), Some(Token::Newline) | Some(Token::Semi)) {
                self.pos += 1;
            }
            match self.peek() {
                None | Some(Token::RParen) => break,
                Some(Token::Word(w)) if w.literal().is_some_and(|k| terminators.contains(&k)) => {
                    break;
                }
                _ => {}
            }
            items.push(self.parse_and_or()?);
            match self.peek() {
                Some(Token::Semi) | Some(Token::Newline) => {
                    self.pos += 1;
                }
                None | Some(Token::RParen) => {}
                Some(Token::Word(w)) if w.literal().is_some_and(|k| terminators.contains(&k)) => {}
                Some(tok) => {
                    return Err(ShellError::parse(format!("unexpected {}", describe(tok))));
                }
            }
        }
        Ok(Script { items })
    }

    fn parse_and_or(&mut self) -> Result<AndOr> {
        let first = self.parse_pipeline()?;
        let mut rest = Vec::new();
        loop {
            let connector = match self.peek() {
                Some(Token::AndIf) => Connector::And,
                Some(Token::OrIf) => Connector::Or,
                _ => break,
            };
            self.pos += 1;
            self.skip_newlines();
            rest.push((connector, self.parse_pipeline()?));
        }
        Ok(AndOr { first, rest })
    }

    fn parse_pipeline(&mut self) -> Result<Pipeline> {
        let negated = if self.peek_keyword() == Some("!") {
            self.pos += 1;
            true
        } else {
            false
        };
        let mut commands = vec![self.parse_command()?];
        while matches!(self.peek(), Some(Token::Pipe)) {
            self.pos += 1;
            self.skip_newlines();
            commands.push(self.parse_command()?);
        }
        Ok(Pipeline { negated, commands })
    }

    fn parse_command(&mut self) -> Result<Command> {
        match self.peek_keyword() {
            Some("if") => return self.parse_if(),
            Some("for") => return self.parse_for(),
            Some("while") => return self.parse_while(false),
            Some("until") => return self.parse_while(true),
            Some("case") => return Err(ShellError::parse("case statements are not supported")),
            Some("function") => {
                return Err(ShellError::parse("function definitions are not supported"));
            }
            Some("{") => {
                self.pos += 1;
                let body = self.parse_script(&["}"])?;
                self.expect_keyword("}")?;
                let redirects = self.parse_redirects()?;
                return Ok(Command::Group(body, redirects));
            }
            Some(kw) if RESERVED.contains(&kw) => {
                return Err(ShellError::parse(format!("unexpected '{kw}'")));
            }
            _ => {}
        }
        if matches!(self.peek(), Some(Token::LParen)) {
            self.pos += 1;
            let body = self.parse_script(&[])?;
            match self.bump() {
                Some(Token::RParen) => {}
                _ => return Err(ShellError::parse("expected ')'")),
            }
            let redirects = self.parse_redirects()?;
            return Ok(Command::Subshell(body, redirects));
        }
        if matches!(self.peek(), Some(Token::Word(_)))
            && matches!(self.tokens.get(self.pos + 1), Some(Token::LParen))
        {
            return Err(ShellError::parse("function definitions are not supported"));
        }
        self.parse_simple()
    }

    fn parse_redirect(&mut self) -> Result<Option<Redirect>> {
        match self.peek().cloned() {
            Some(Token::Redir { fd, op }) => {
                self.pos += 1;
                let target = match self.bump() {
                    Some(Token::Word(w)) => w,
                    _ => return Err(ShellError::parse("missing redirection target")),
                };
                let default_fd = if op == RedirOp::Read { 0 } else { 1 };
                Ok(Some(Redirect {
                    fd: fd.unwrap_or(default_fd),
                    op,
                    target,
                }))
            }
            Some(Token::HereDoc { fd, body }) => {
                self.pos += 1;
                Ok(Some(Redirect {
                    fd: fd.unwrap_or(0),
                    op: RedirOp::HereDoc,
                    target: body,
                }))
            }
            _ => Ok(None),
        }
    }

    fn parse_redirects(&mut self) -> Result<Vec<Redirect>> {
        let mut out = Vec::new();
        while let Some(r) = self.parse_redirect()? {
            out.push(r);
        }
        Ok(out)
    }

    fn parse_simple(&mut self) -> Result<Command> {
        let mut cmd = SimpleCommand::default();
        loop {
            if let Some(r) = self.parse_redirect()? {
                cmd.redirects.push(r);
                continue;
            }
            let Some(Token::Word(w)) = self.peek().cloned() else {
                break;
            };
            self.pos += 1;
            if cmd.words.is_empty()
                && let Some(assign) = split_assignment(&w)
            {
                cmd.assigns.push(assign);
                continue;
            }
            cmd.words.push(w);
        }
        if cmd.assigns.is_empty() && cmd.words.is_empty() && cmd.redirects.is_empty() {
            return Err(match self.peek() {
                Some(tok) => ShellError::parse(format!("unexpected {}", describe(tok))),
                None => ShellError::parse("unexpected end of input"),
            });
        }
        Ok(Command::Simple(cmd))
    }

    fn parse_if(&mut self) -> Result<Command> {
        self.expect_keyword("if")?;
        let mut branches = Vec::new();
        let mut else_body = None;
        let cond = self.parse_script(&["then"])?;
        self.expect_keyword("then")?;
        let body = self.parse_script(&["elif", "else", "fi"])?;
        branches.push((cond, body));
        loop {
            match self.peek_keyword() {
                Some("elif") => {
                    self.pos += 1;
                    let cond = self.parse_script(&["then"])?;
                    self.expect_keyword("then")?;
                    let body = self.parse_script(&["elif", "else", "fi"])?;
                    branches.push((cond, body));
                }
                Some("else") => {
                    self.pos += 1;
                    else_body = Some(self.parse_script(&["fi"])?);
                    self.expect_keyword("fi")?;
                    break;
                }
                _ => {
                    self.expect_keyword("fi")?;
                    break;
                }
            }
        }
        Ok(Command::If {
            branches,
            else_body,
        })
    }

    fn parse_for(&mut self) -> Result<Command> {
        self.expect_keyword("for")?;
        let var = match self.bump() {
            Some(Token::Word(w)) => match w.literal() {
                Some(name) if is_name(name) => name.to_string(),
                _ => return Err(ShellError::parse("invalid for loop variable")),
            },
            _ => return Err(ShellError::parse("expected for loop variable")),
        };
        self.skip_newlines();
        let mut items = None;
        if self.peek_keyword() == Some("in") {
            self.pos += 1;
            let mut list = Vec::new();
            while let Some(Token::Word(w)) = self.peek().cloned() {
                self.pos += 1;
                list.push(w);
            }
            items = Some(list);
        }
        if matches!(self.peek(), Some(Token::Semi) | Some(Token::Newline)) {
            self.pos += 1;
        }
        self.skip_newlines();
        self.expect_keyword("do")?;
        let body = self.parse_script(&["done"])?;
        self.expect_keyword("done")?;
        Ok(Command::For { var, items, body })
    }

    fn parse_while(&mut self, until: bool) -> Result<Command> {
        self.pos += 1;
        let cond = self.parse_script(&["do"])?;
        self.expect_keyword("do")?;
        let body = self.parse_script(&["done"])?;
        self.expect_keyword("done")?;
        Ok(Command::While { until, cond, body })
    }
}

fn split_assignment(w: &Word) -> Option<(String, Word)> {
    let WordPart::Lit(first) = w.parts.first()? else {
        return None;
    };
    let (name, value) = first.split_once('=')?;
    if !is_name(name) {
        return None;
    }
    let mut parts = Vec::new();
    if !value.is_empty() {
        parts.push(WordPart::Lit(value.to_string()));
    }
    parts.extend(w.parts[1..].iter().cloned());
    Some((name.to_string(), Word { parts }))
}
