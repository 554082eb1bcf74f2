//! Virtual filesystem rooted at the workspace.
//!
//! Every path is joined with a working directory, normalized lexically and
//! checked against the root. Symlinks are only traversed when
//! `follow_symlinks` is set, and even then the target must stay inside the
//! root.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, ShellError};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub is_directory: bool,
    pub is_file: bool,
    pub permissions: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    follow_symlinks: bool,
}

impl Workspace {
    /// Open (and create if missing) a workspace rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| ShellError::io(root.display(), e))?;
        let root = root
            .canonicalize()
            .map_err(|e| ShellError::io(root.display(), e))?;
        Ok(Self {
            root,
            follow_symlinks: false,
        })
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn follow_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    /// Resolve `path` against `cwd` and check it stays inside the root.
    pub fn resolve(&self, cwd: &Path, path: &str) -> Result<PathBuf> {
        let joined = if path.is_empty() {
            cwd.to_path_buf()
        } else {
            let p = Path::new(path);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                cwd.join(p)
            }
        };
        let normalized = normalize(&joined);
        if !normalized.starts_with(&self.root) {
            return Err(ShellError::PathDenied(format!(
                "{path} is outside the workspace"
            )));
        }
        self.check_links(&normalized, path)?;
        Ok(normalized)
    }

    fn check_links(&self, path: &Path, display: &str) -> Result<()> {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return Ok(());
        };
        let mut cur = self.root.clone();
        for comp in rel.components() {
            cur.push(comp);
            let Ok(meta) = std::fs::symlink_metadata(&cur) else {
                // rest of the path does not exist yet
                return Ok(());
            };
            if !meta.file_type().is_symlink() {
                continue;
            }
            if !self.follow_symlinks {
                return Err(ShellError::PathDenied(format!(
                    "{display} traverses a symlink"
                )));
            }
            let target = cur.canonicalize().map_err(|e| ShellError::io(cur.display(), e))?;
            if !target.starts_with(&self.root) {
                return Err(ShellError::PathDenied(format!(
                    "{display} links outside the workspace"
                )));
            }
        }
        Ok(())
    }

    fn resolve_root(&self, path: &str) -> Result<PathBuf> {
        self.resolve(&self.root, path)
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let p = self.resolve_root(path)?;
        tokio::fs::read(&p).await.map_err(|e| ShellError::io(path, e))
    }

    pub async fn read_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.read_file(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write a file, creating parent directories.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let p = self.resolve_root(path)?;
        if let Some(parent) = p.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ShellError::io(path, e))?;
        }
        tokio::fs::write(&p, data)
            .await
            .map_err(|e| ShellError::io(path, e))
    }

    pub async fn append_file(&self, path: &str, data: &[u8]) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        let p = self.resolve_root(path)?;
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&p)
            .await
            .map_err(|e| ShellError::io(path, e))?;
        f.write_all(data).await.map_err(|e| ShellError::io(path, e))
    }

    pub async fn create_dir(&self, path: &str) -> Result<()> {
        let p = self.resolve_root(path)?;
        tokio::fs::create_dir_all(&p)
            .await
            .map_err(|e| ShellError::io(path, e))
    }

    pub async fn exists(&self, path: &str) -> bool {
        match self.resolve_root(path) {
            Ok(p) => tokio::fs::metadata(&p).await.is_ok(),
            Err(_) => false,
        }
    }

    pub async fn file_info(&self, path: &str) -> Result<FileInfo> {
        let p = self.resolve_root(path)?;
        let meta = if self.follow_symlinks {
            tokio::fs::metadata(&p).await
        } else {
            tokio::fs::symlink_metadata(&p).await
        }
        .map_err(|e| ShellError::io(path, e))?;
        Ok(info_from(&p, &meta))
    }

    /// Entries of a directory sorted by name.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        let p = self.resolve_root(path)?;
        let mut rd = tokio::fs::read_dir(&p)
            .await
            .map_err(|e| ShellError::io(path, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = rd.next_entry().await.map_err(|e| ShellError::io(path, e))? {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            entries.push(info_from(&entry.path(), &meta));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// `File: name` / `Directory: name` lines.
    pub async fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .read_dir(path)
            .await?
            .into_iter()
            .map(|e| {
                let prefix = if e.is_directory { "Directory" } else { "File" };
                format!("{prefix}: {}", e.name)
            })
            .collect())
    }
}

fn info_from(path: &Path, meta: &std::fs::Metadata) -> FileInfo {
    FileInfo {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        is_directory: meta.is_dir(),
        is_file: meta.is_file(),
        permissions: permissions(meta),
        size: meta.len(),
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
    }
}

#[cfg(unix)]
fn permissions(meta: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;

    let mode = meta.permissions().mode();
    let mut s = String::with_capacity(10);
    s.push(if meta.is_dir() { 'd' } else { '-' });
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 4 != 0 { 'r' } else { '-' });
        s.push(if bits & 2 != 0 { 'w' } else { '-' });
        s.push(if bits & 1 != 0 { 'x' } else { '-' });
    }
    s
}

#[cfg(not(unix))]
fn permissions(meta: &std::fs::Metadata) -> String {
    if meta.permissions().readonly() {
        "r".into()
    } else {
        "rw".into()
    }
}

/// Lexically normalize `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        assert!(ws.resolve(ws.root(), "a/../b.txt").is_ok());
        assert!(matches!(
            ws.resolve(ws.root(), "../outside"),
            Err(ShellError::PathDenied(_))
        ));
        assert!(ws.resolve(ws.root(), "/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_read_write_list() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        ws.write_file("notes/a.txt", b"hello").await.unwrap();
        ws.append_file("notes/a.txt", b" world").await.unwrap();
        assert_eq!(ws.read_to_string("notes/a.txt").await.unwrap(), "hello world");
        assert_eq!(
            ws.list_directory("notes").await.unwrap(),
            vec!["File: a.txt".to_string()]
        );
        let info = ws.file_info("notes").await.unwrap();
        assert!(info.is_directory);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_need_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        ws.write_file("real.txt", b"x").await.unwrap();
        std::os::unix::fs::symlink(ws.root().join("real.txt"), ws.root().join("link.txt"))
            .unwrap();

        assert!(ws.read_file("link.txt").await.is_err());
        let ws = ws.with_follow_symlinks(true);
        assert_eq!(ws.read_file("link.txt").await.unwrap(), b"x");
    }
}
