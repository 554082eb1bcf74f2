//! In-process core utilities.
//!
//! Each utility reads and writes through the workspace filesystem and
//! reports failures the way the real tool would: a message on stderr and a
//! non-zero status. Only cancellation surfaces as an error.
//!
//! `time` and `xargs` need to run other commands and are handled by the
//! interpreter.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::format::{Item, StrftimeItems};
use sha2::Digest;
use tokio_util::sync::CancellationToken;

use crate::env::Environment;
use crate::error::{Result, ShellError};
use crate::vfs::Workspace;

/// Utilities implemented in-process.
pub const CORE_UTILS: &[&str] = &[
    "base64", "basename", "cat", "date", "dirname", "echo", "env", "false", "find", "head", "ls",
    "mkdir", "printenv", "pwd", "shasum", "sleep", "tail", "time", "touch", "true", "wc", "wget",
    "xargs",
];

pub fn is_core_util(name: &str) -> bool {
    CORE_UTILS.contains(&name)
}

/// What a utility may touch.
pub struct UtilContext<'a> {
    pub vfs: &'a Workspace,
    pub cwd: &'a Path,
    pub env: &'a Environment,
    pub cancel: &'a CancellationToken,
}

/// Output buffers of one utility run.
#[derive(Debug, Default)]
pub struct UtilIo {
    pub stdin: Vec<u8>,
    pub out: Vec<u8>,
    pub err: Vec<u8>,
}

impl UtilIo {
    fn fail(&mut self, name: &str, msg: impl std::fmt::Display) -> i32 {
        self.err
            .extend_from_slice(format!("{name}: {msg}\n").as_bytes());
        1
    }
}

impl UtilContext<'_> {
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        self.vfs.resolve(self.cwd, path)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let p = self.resolve(path)?;
        tokio::fs::read(&p).await.map_err(|e| ShellError::io(path, e))
    }

    /// Inputs named by `files`, or stdin when empty or `-`.
    async fn inputs(&self, files: &[String], io: &mut UtilIo, name: &str) -> Vec<(String, Vec<u8>)> {
        if files.is_empty() {
            return vec![("-".into(), io.stdin.clone())];
        }
        let mut out = Vec::new();
        for f in files {
            if f == "-" {
                out.push(("-".into(), io.stdin.clone()));
                continue;
            }
            match self.read(f).await {
                Ok(data) => out.push((f.clone(), data)),
                Err(e) => {
                    io.fail(name, format!("{f}: {}", short_error(&e)));
                }
            }
        }
        out
    }
}

pub(crate) fn short_error(e: &ShellError) -> String {
    match e {
        ShellError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
            "No such file or directory".into()
        }
        ShellError::Io { source, .. } => source.to_string(),
        other => other.to_string(),
    }
}

/// Run a core utility. `argv[0]` must satisfy [`is_core_util`].
pub async fn run(ctx: &UtilContext<'_>, argv: &[String], io: &mut UtilIo) -> Result<i32> {
    let Some(name) = argv.first() else {
        return Ok(0);
    };
    let args = &argv[1..];
    let status = match name.as_str() {
        "true" => 0,
        "false" => 1,
        "echo" => echo(args, io),
        "pwd" => {
            io.out
                .extend_from_slice(format!("{}\n", ctx.cwd.display()).as_bytes());
            0
        }
        "env" | "printenv" => printenv(ctx, args, io),
        "basename" => basename(args, io),
        "dirname" => dirname(args, io),
        "cat" => cat(ctx, args, io).await,
        "head" => head_tail(ctx, "head", args, io).await,
        "tail" => head_tail(ctx, "tail", args, io).await,
        "wc" => wc(ctx, args, io).await,
        "ls" => ls(ctx, args, io).await,
        "mkdir" => mkdir(ctx, args, io).await,
        "touch" => touch(ctx, args, io).await,
        "base64" => base64(ctx, args, io).await,
        "shasum" => shasum(ctx, args, io).await,
        "date" => date(args, io),
        "sleep" => sleep(ctx, args, io).await?,
        "find" => find(ctx, args, io),
        "wget" => wget(ctx, args, io).await?,
        other => io.fail(other, "not a core utility"),
    };
    Ok(status)
}

fn echo(args: &[String], io: &mut UtilIo) -> i32 {
    let mut newline = true;
    let mut escapes = false;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-n" => newline = false,
            "-e" => escapes = true,
            "-E" => escapes = false,
            "-ne" | "-en" => {
                newline = false;
                escapes = true;
            }
            _ => break,
        }
        i += 1;
    }
    let mut text = args[i..].join(" ");
    if escapes {
        text = text
            .replace("\\n", "\n")
            .replace("\\t", "\t")
            .replace("\\\\", "\\");
    }
    io.out.extend_from_slice(text.as_bytes());
    if newline {
        io.out.push(b'\n');
    }
    0
}

fn printenv(ctx: &UtilContext<'_>, args: &[String], io: &mut UtilIo) -> i32 {
    if args.is_empty() {
        let lines = ctx.env.lines();
        if !lines.is_empty() {
            io.out.extend_from_slice(lines.as_bytes());
            io.out.push(b'\n');
        }
        return 0;
    }
    let mut status = 0;
    for key in args {
        match ctx.env.get(key) {
            Some(v) => {
                io.out.extend_from_slice(v.as_bytes());
                io.out.push(b'\n');
            }
            None => status = 1,
        }
    }
    status
}

fn basename(args: &[String], io: &mut UtilIo) -> i32 {
    let Some(path) = args.first() else {
        return io.fail("basename", "missing operand");
    };
    let trimmed = path.trim_end_matches('/');
    let mut base = if trimmed.is_empty() && !path.is_empty() {
        "/".to_string()
    } else {
        trimmed.rsplit('/').next().unwrap_or_default().to_string()
    };
    if let Some(suffix) = args.get(1)
        && base != *suffix
        && let Some(stripped) = base.strip_suffix(suffix.as_str())
    {
        base = stripped.to_string();
    }
    io.out.extend_from_slice(format!("{base}\n").as_bytes());
    0
}

fn dirname(args: &[String], io: &mut UtilIo) -> i32 {
    let Some(path) = args.first() else {
        return io.fail("dirname", "missing operand");
    };
    let trimmed = path.trim_end_matches('/');
    let dir = match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(i) => trimmed[..i].to_string(),
        None if path.starts_with('/') => "/".to_string(),
        None => ".".to_string(),
    };
    io.out.extend_from_slice(format!("{dir}\n").as_bytes());
    0
}

async fn cat(ctx: &UtilContext<'_>, args: &[String], io: &mut UtilIo) -> i32 {
    let files: Vec<String> = args.iter().filter(|a| !a.starts_with("-") || *a == "-").cloned().collect();
    let before = io.err.len();
    for (_, data) in ctx.inputs(&files, io, "cat").await {
        io.out.extend_from_slice(&data);
    }
    i32::from(io.err.len() > before)
}

/// Parse `-n N`, `-nN` and `-N` line counts.
fn line_count(args: &[String]) -> std::result::Result<(usize, Vec<String>), String> {
    let mut n = 10;
    let mut files = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let a = &args[i];
        if a == "-n" {
            i += 1;
            let v = args.get(i).ok_or("option requires an argument -- 'n'")?;
            n = v.parse().map_err(|_| format!("invalid number of lines: '{v}'"))?;
        } else if let Some(v) = a.strip_prefix("-n") {
            n = v.parse().map_err(|_| format!("invalid number of lines: '{v}'"))?;
        } else if a.len() > 1 && a.starts_with('-') && a[1..].chars().all(|c| c.is_ascii_digit()) {
            n = a[1..].parse().unwrap_or(n);
        } else {
            files.push(a.clone());
        }
        i += 1;
    }
    Ok((n, files))
}

async fn head_tail(ctx: &UtilContext<'_>, name: &str, args: &[String], io: &mut UtilIo) -> i32 {
    let (n, files) = match line_count(args) {
        Ok(v) => v,
        Err(msg) => return io.fail(name, msg),
    };
    let before = io.err.len();
    for (_, data) in ctx.inputs(&files, io, name).await {
        let text = String::from_utf8_lossy(&data);
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let selected = if name == "head" {
            &lines[..n.min(lines.len())]
        } else {
            &lines[lines.len().saturating_sub(n)..]
        };
        for line in selected {
            io.out.extend_from_slice(line.as_bytes());
        }
    }
    i32::from(io.err.len() > before)
}

async fn wc(ctx: &UtilContext<'_>, args: &[String], io: &mut UtilIo) -> i32 {
    let mut flags = String::new();
    let mut files = Vec::new();
    for a in args {
        match a.strip_prefix('-') {
            Some(f) if !f.is_empty() => flags.push_str(f),
            _ => files.push(a.clone()),
        }
    }
    if flags.is_empty() {
        flags = "lwc".into();
    }
    let before = io.err.len();
    let named = !files.is_empty();
    for (name, data) in ctx.inputs(&files, io, "wc").await {
        let text = String::from_utf8_lossy(&data);
        let mut cols = Vec::new();
        if flags.contains('l') {
            cols.push(data.iter().filter(|b| **b == b'\n').count().to_string());
        }
        if flags.contains('w') {
            cols.push(text.split_whitespace().count().to_string());
        }
        if flags.contains('c') || flags.contains('m') {
            cols.push(data.len().to_string());
        }
        if named {
            cols.push(name);
        }
        io.out
            .extend_from_slice(format!("{}\n", cols.join(" ")).as_bytes());
    }
    i32::from(io.err.len() > before)
}

async fn ls(ctx: &UtilContext<'_>, args: &[String], io: &mut UtilIo) -> i32 {
    let mut all = false;
    let mut long = false;
    let mut paths = Vec::new();
    for a in args {
        match a.strip_prefix('-') {
            Some(f) if !f.is_empty() => {
                all |= f.contains('a') || f.contains('A');
                long |= f.contains('l');
            }
            _ => paths.push(a.clone()),
        }
    }
    if paths.is_empty() {
        paths.push(".".into());
    }
    let multiple = paths.len() > 1;
    let mut status = 0;
    for (i, path) in paths.iter().enumerate() {
        let resolved = match ctx.resolve(path) {
            Ok(p) => p,
            Err(e) => {
                status = io.fail("ls", format!("{path}: {}", short_error(&e)));
                continue;
            }
        };
        let target = resolved.to_string_lossy().into_owned();
        let info = match ctx.vfs.file_info(&target).await {
            Ok(info) => info,
            Err(e) => {
                status = io.fail(
                    "ls",
                    format!("cannot access '{path}': {}", short_error(&e)),
                );
                continue;
            }
        };
        if !info.is_directory {
            io.out
                .extend_from_slice(format!("{}\n", ls_line(&info, path, long)).as_bytes());
            continue;
        }
        if multiple {
            if i > 0 {
                io.out.push(b'\n');
            }
            io.out.extend_from_slice(format!("{path}:\n").as_bytes());
        }
        match ctx.vfs.read_dir(&target).await {
            Ok(entries) => {
                for e in entries.iter().filter(|e| all || !e.name.starts_with('.')) {
                    io.out
                        .extend_from_slice(format!("{}\n", ls_line(e, &e.name, long)).as_bytes());
                }
            }
            Err(e) => status = io.fail("ls", format!("{path}: {}", short_error(&e))),
        }
    }
    status
}

fn ls_line(info: &crate::vfs::FileInfo, name: &str, long: bool) -> String {
    if !long {
        return name.to_string();
    }
    let modified = info
        .modified
        .map(|m| m.format("%b %e %H:%M").to_string())
        .unwrap_or_default();
    format!("{} {:>8} {} {}", info.permissions, info.size, modified, name)
}

async fn mkdir(ctx: &UtilContext<'_>, args: &[String], io: &mut UtilIo) -> i32 {
    let parents = args.iter().any(|a| a == "-p");
    let mut status = 0;
    for dir in args.iter().filter(|a| !a.starts_with('-')) {
        let p = match ctx.resolve(dir) {
            Ok(p) => p,
            Err(e) => {
                status = io.fail("mkdir", format!("{dir}: {}", short_error(&e)));
                continue;
            }
        };
        let res = if parents {
            tokio::fs::create_dir_all(&p).await
        } else {
            tokio::fs::create_dir(&p).await
        };
        if let Err(e) = res {
            status = io.fail("mkdir", format!("cannot create directory '{dir}': {e}"));
        }
    }
    status
}

async fn touch(ctx: &UtilContext<'_>, args: &[String], io: &mut UtilIo) -> i32 {
    let mut status = 0;
    for f in args.iter().filter(|a| !a.starts_with('-')) {
        let res = match ctx.resolve(f) {
            Ok(p) => std::fs::File::options()
                .create(true)
                .append(true)
                .open(&p)
                .and_then(|file| file.set_modified(std::time::SystemTime::now()))
                .map_err(|e| e.to_string()),
            Err(e) => Err(short_error(&e)),
        };
        if let Err(msg) = res {
            status = io.fail("touch", format!("cannot touch '{f}': {msg}"));
        }
    }
    status
}

async fn base64(ctx: &UtilContext<'_>, args: &[String], io: &mut UtilIo) -> i32 {
    let decode = args.iter().any(|a| a == "-d" || a == "--decode" || a == "-D");
    let files: Vec<String> = args.iter().filter(|a| !a.starts_with('-')).cloned().collect();
    let before = io.err.len();
    for (_, data) in ctx.inputs(&files, io, "base64").await {
        if decode {
            let cleaned: Vec<u8> = data
                .into_iter()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            match STANDARD.decode(&cleaned) {
                Ok(bytes) => io.out.extend_from_slice(&bytes),
                Err(e) => return io.fail("base64", format!("invalid input: {e}")),
            }
        } else {
            io.out.extend_from_slice(STANDARD.encode(&data).as_bytes());
            io.out.push(b'\n');
        }
    }
    i32::from(io.err.len() > before)
}

/// `shasum [-a 224|256|384|512] [files]`. SHA-256 is the default.
async fn shasum(ctx: &UtilContext<'_>, args: &[String], io: &mut UtilIo) -> i32 {
    let mut algo = "256".to_string();
    let mut files = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-a" | "--algorithm" => {
                i += 1;
                algo = args.get(i).cloned().unwrap_or_default();
            }
            a if a.starts_with('-') && a != "-" => {}
            a => files.push(a.to_string()),
        }
        i += 1;
    }
    let digest = |data: &[u8]| -> Option<String> {
        Some(match algo.as_str() {
            "224" => hex::encode(sha2::Sha224::digest(data)),
            "256" => hex::encode(sha2::Sha256::digest(data)),
            "384" => hex::encode(sha2::Sha384::digest(data)),
            "512" => hex::encode(sha2::Sha512::digest(data)),
            _ => return None,
        })
    };
    let before = io.err.len();
    for (name, data) in ctx.inputs(&files, io, "shasum").await {
        let Some(sum) = digest(&data) else {
            return io.fail("shasum", format!("unsupported algorithm: {algo}"));
        };
        io.out.extend_from_slice(format!("{sum}  {name}\n").as_bytes());
    }
    i32::from(io.err.len() > before)
}

const DEFAULT_DATE_FORMAT: &str = "%a %b %e %H:%M:%S %Z %Y";

fn date(args: &[String], io: &mut UtilIo) -> i32 {
    let utc = args.iter().any(|a| a == "-u" || a == "--utc");
    let format = args
        .iter()
        .find_map(|a| a.strip_prefix('+'))
        .unwrap_or(DEFAULT_DATE_FORMAT);
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|i| matches!(i, Item::Error)) {
        return io.fail("date", format!("invalid format '{format}'"));
    }
    let text = if utc {
        chrono::Utc::now().format_with_items(items.into_iter()).to_string()
    } else {
        chrono::Local::now()
            .format_with_items(items.into_iter())
            .to_string()
    };
    io.out.extend_from_slice(format!("{text}\n").as_bytes());
    0
}

/// Parse `1`, `0.5`, `2s`, `1m`, `1h`.
fn parse_duration(s: &str) -> Option<Duration> {
    let (num, mult) = match s.chars().last()? {
        's' => (&s[..s.len() - 1], 1.0),
        'm' => (&s[..s.len() - 1], 60.0),
        'h' => (&s[..s.len() - 1], 3600.0),
        _ => (s, 1.0),
    };
    let secs: f64 = num.parse().ok()?;
    (secs >= 0.0).then(|| Duration::from_secs_f64(secs * mult))
}

async fn sleep(ctx: &UtilContext<'_>, args: &[String], io: &mut UtilIo) -> Result<i32> {
    let Some(arg) = args.first() else {
        return Ok(io.fail("sleep", "missing operand"));
    };
    let Some(dur) = parse_duration(arg) else {
        return Ok(io.fail("sleep", format!("invalid time interval '{arg}'")));
    };
    tokio::select! {
        _ = tokio::time::sleep(dur) => Ok(0),
        _ = ctx.cancel.cancelled() => Err(ShellError::Cancelled),
    }
}

/// `find [paths] [-name P] [-iname P] [-type f|d] [-maxdepth N] [-mindepth N]`
fn find(ctx: &UtilContext<'_>, args: &[String], io: &mut UtilIo) -> i32 {
    let mut roots = Vec::new();
    let mut name: Option<glob::Pattern> = None;
    let mut case_insensitive = false;
    let mut kind: Option<char> = None;
    let mut max_depth = usize::MAX;
    let mut min_depth = 0;

    let mut i = 0;
    while i < args.len() {
        let a = args[i].as_str();
        let value = args.get(i + 1);
        match a {
            "-name" | "-iname" => {
                let Some(v) = value else {
                    return io.fail("find", format!("missing argument to '{a}'"));
                };
                match glob::Pattern::new(v) {
                    Ok(p) => name = Some(p),
                    Err(e) => return io.fail("find", format!("invalid pattern '{v}': {e}")),
                }
                case_insensitive = a == "-iname";
                i += 1;
            }
            "-type" => {
                kind = value.and_then(|v| v.chars().next());
                i += 1;
            }
            "-maxdepth" | "-mindepth" => {
                let Some(n) = value.and_then(|v| v.parse().ok()) else {
                    return io.fail("find", format!("invalid argument to '{a}'"));
                };
                if a == "-maxdepth" {
                    max_depth = n;
                } else {
                    min_depth = n;
                }
                i += 1;
            }
            "-print" => {}
            a if a.starts_with('-') => return io.fail("find", format!("unknown predicate '{a}'")),
            a => roots.push(a.to_string()),
        }
        i += 1;
    }
    if roots.is_empty() {
        roots.push(".".into());
    }

    let options = glob::MatchOptions {
        case_sensitive: !case_insensitive,
        ..Default::default()
    };
    let mut status = 0;
    for root in &roots {
        let base = match ctx.resolve(root) {
            Ok(p) => p,
            Err(e) => {
                status = io.fail("find", format!("'{root}': {}", short_error(&e)));
                continue;
            }
        };
        if !base.exists() {
            status = io.fail("find", format!("'{root}': No such file or directory"));
            continue;
        }
        let walker = walkdir::WalkDir::new(&base)
            .follow_links(ctx.vfs.follow_symlinks())
            .min_depth(min_depth)
            .max_depth(max_depth)
            .sort_by_file_name();
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            let ft = entry.file_type();
            match kind {
                Some('f') if !ft.is_file() => continue,
                Some('d') if !ft.is_dir() => continue,
                Some('l') if !ft.is_symlink() => continue,
                _ => {}
            }
            if let Some(p) = &name {
                let file_name = entry.file_name().to_string_lossy();
                if !p.matches_with(&file_name, options) {
                    continue;
                }
            }
            let rel = entry.path().strip_prefix(&base).unwrap_or(entry.path());
            let shown = if rel.as_os_str().is_empty() {
                root.clone()
            } else {
                format!("{}/{}", root.trim_end_matches('/'), rel.display())
            };
            io.out.extend_from_slice(format!("{shown}\n").as_bytes());
        }
    }
    status
}

/// `wget [-q] [-O file|-] URL`
async fn wget(ctx: &UtilContext<'_>, args: &[String], io: &mut UtilIo) -> Result<i32> {
    let mut quiet = false;
    let mut output: Option<String> = None;
    let mut url = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-q" | "--quiet" => quiet = true,
            "-O" => {
                i += 1;
                output = args.get(i).cloned();
            }
            a if a.starts_with("--output-document=") => {
                output = a.split_once('=').map(|(_, v)| v.to_string());
            }
            a if a.starts_with('-') => {}
            a => url = Some(a.to_string()),
        }
        i += 1;
    }
    let Some(url) = url else {
        return Ok(io.fail("wget", "missing URL"));
    };

    let fetch = async {
        let resp = reqwest::get(&url).await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        Ok::<_, reqwest::Error>((status, body))
    };
    let (status, body) = tokio::select! {
        res = fetch => match res {
            Ok(v) => v,
            Err(e) => return Ok(io.fail("wget", e)),
        },
        _ = ctx.cancel.cancelled() => return Err(ShellError::Cancelled),
    };
    if !status.is_success() {
        io.fail("wget", format!("server returned {status} for {url}"));
        return Ok(8);
    }

    let target = output.unwrap_or_else(|| {
        let name = url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .rsplit('/')
            .next()
            .unwrap_or_default();
        if name.is_empty() || name.contains(':') {
            "index.html".into()
        } else {
            name.to_string()
        }
    });
    if target == "-" {
        io.out.extend_from_slice(&body);
        return Ok(0);
    }
    let path = match ctx.resolve(&target) {
        Ok(p) => p,
        Err(e) => return Ok(io.fail("wget", format!("{target}: {}", short_error(&e)))),
    };
    if let Err(e) = ctx
        .vfs
        .write_file(&path.to_string_lossy(), &body)
        .await
    {
        return Ok(io.fail("wget", short_error(&e)));
    }
    if !quiet {
        io.err
            .extend_from_slice(format!("saved '{target}' ({} bytes)\n", body.len()).as_bytes());
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        vfs: Workspace,
        env: Environment,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let vfs = Workspace::new(dir.path()).unwrap();
            Self {
                _dir: dir,
                vfs,
                env: Environment::new(),
                cancel: CancellationToken::new(),
            }
        }

        async fn run(&self, cmd: &[&str], stdin: &str) -> (i32, String, String) {
            let ctx = UtilContext {
                vfs: &self.vfs,
                cwd: self.vfs.root(),
                env: &self.env,
                cancel: &self.cancel,
            };
            let argv: Vec<String> = cmd.iter().map(|s| s.to_string()).collect();
            let mut io = UtilIo {
                stdin: stdin.as_bytes().to_vec(),
                ..Default::default()
            };
            let status = run(&ctx, &argv, &mut io).await.unwrap();
            (
                status,
                String::from_utf8_lossy(&io.out).into_owned(),
                String::from_utf8_lossy(&io.err).into_owned(),
            )
        }
    }

    #[tokio::test]
    async fn test_echo_and_text_tools() {
        let f = Fixture::new();
        assert_eq!(f.run(&["echo", "-n", "a", "b"], "").await.1, "a b");
        assert_eq!(f.run(&["head", "-n", "2"], "1\n2\n3\n").await.1, "1\n2\n");
        assert_eq!(f.run(&["tail", "-1"], "1\n2\n3\n").await.1, "3\n");
        assert_eq!(f.run(&["wc", "-l"], "a\nb\n").await.1, "2\n");
        assert_eq!(f.run(&["basename", "/a/b/c.txt", ".txt"], "").await.1, "c\n");
        assert_eq!(f.run(&["dirname", "/a/b/c.txt"], "").await.1, "/a/b\n");
        assert_eq!(f.run(&["dirname", "c.txt"], "").await.1, ".\n");
    }

    #[tokio::test]
    async fn test_files() {
        let f = Fixture::new();
        f.vfs.write_file("dir/a.txt", b"alpha\n").await.unwrap();
        f.vfs.write_file("dir/b.md", b"beta\n").await.unwrap();

        assert_eq!(f.run(&["cat", "dir/a.txt", "dir/b.md"], "").await.1, "alpha\nbeta\n");
        assert_eq!(f.run(&["ls", "dir"], "").await.1, "a.txt\nb.md\n");
        assert_eq!(
            f.run(&["find", ".", "-name", "*.txt"], "").await.1,
            "./dir/a.txt\n"
        );
        assert_eq!(f.run(&["find", "dir", "-type", "d"], "").await.1, "dir\n");

        let (status, _, err) = f.run(&["cat", "missing"], "").await;
        assert_eq!(status, 1);
        assert!(err.contains("No such file"));

        let (status, _, err) = f.run(&["cat", "../../etc/passwd"], "").await;
        assert_eq!(status, 1);
        assert!(err.contains("outside the workspace"));

        assert_eq!(f.run(&["mkdir", "-p", "x/y"], "").await.0, 0);
        assert_eq!(f.run(&["touch", "x/y/z"], "").await.0, 0);
        assert!(f.vfs.exists("x/y/z").await);
    }

    #[tokio::test]
    async fn test_base64_and_shasum() {
        let f = Fixture::new();
        assert_eq!(f.run(&["base64"], "hello").await.1, "aGVsbG8=\n");
        assert_eq!(f.run(&["base64", "-d"], "aGVsbG8=\n").await.1, "hello");
        assert_eq!(
            f.run(&["shasum", "-a", "256"], "abc").await.1,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad  -\n"
        );
        assert_eq!(f.run(&["shasum", "-a", "1"], "abc").await.0, 1);
    }

    #[tokio::test]
    async fn test_date_and_env() {
        let f = Fixture::new();
        f.env.set("NAME", "swarm");
        assert_eq!(f.run(&["printenv", "NAME"], "").await.1, "swarm\n");
        assert_eq!(f.run(&["env"], "").await.1, "NAME=swarm\n");
        let (status, out, _) = f.run(&["date", "-u", "+%Y"], "").await;
        assert_eq!(status, 0);
        assert_eq!(out.trim().len(), 4);
        assert_eq!(f.run(&["date", "+%Q"], "").await.0, 1);
    }

    #[tokio::test]
    async fn test_sleep_cancelled() {
        let f = Fixture::new();
        f.cancel.cancel();
        let ctx = UtilContext {
            vfs: &f.vfs,
            cwd: f.vfs.root(),
            env: &f.env,
            cancel: &f.cancel,
        };
        let mut io = UtilIo::default();
        let err = run(&ctx, &["sleep".into(), "5".into()], &mut io)
            .await
            .unwrap_err();
        assert!(matches!(err, ShellError::Cancelled));
    }
}
