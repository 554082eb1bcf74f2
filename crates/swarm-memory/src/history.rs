//! Append-only conversation history with time-bounded replay.
//!
//! Each save writes one batch; loads scan batches newest first and within a
//! batch newest message first, then hand the selection back oldest first.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use swarm_types::{Message, Role};
use tracing::{debug, warn};

use crate::error::{MemoryError, Result};

/// Bound used by [`MemStore::get`]: 500 messages.
pub const GET_MAX_HISTORY: i64 = 500;
/// Bound used by [`MemStore::get`]: 240 hours.
pub const GET_MAX_SPAN: i64 = 14_400;

/// Selection window for a history load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemOption {
    /// Number of messages to return; `<= 0` returns nothing.
    pub max_history: i64,
    /// Window in minutes; `<= 0` returns nothing.
    pub max_span: i64,
    /// Number of newest matching messages to skip.
    pub offset: i64,
    /// Only these roles; empty allows every non-system role.
    pub roles: Vec<Role>,
}

impl MemOption {
    pub fn new(max_history: i64, max_span: i64) -> Self {
        Self {
            max_history,
            max_span,
            ..Default::default()
        }
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_roles(mut self, roles: Vec<Role>) -> Self {
        self.roles = roles;
        self
    }

    fn accepts(&self, m: &Message) -> bool {
        if m.role == Role::System || m.context || !m.is_text() {
            return false;
        }
        self.roles.is_empty() || self.roles.contains(&m.role)
    }

    fn span(&self) -> Duration {
        Duration::from_secs((self.max_span.max(0) as u64).saturating_mul(60))
    }
}

/// Conversation memory.
#[async_trait]
pub trait MemStore: Send + Sync {
    /// Persist a batch of messages.
    async fn save(&self, messages: &[Message]) -> Result<()>;

    /// Historical messages in insertion order.
    async fn load(&self, opt: &MemOption) -> Result<Vec<Message>>;

    /// A message by ID within the last 500 messages and 240 hours.
    async fn get(&self, id: &str) -> Result<Message> {
        let all = self.load(&MemOption::new(GET_MAX_HISTORY, GET_MAX_SPAN)).await?;
        all.into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| MemoryError::NotFound(format!("message {id}")))
    }
}

/// Pick messages from batches ordered newest first.
fn select<I>(batches: I, opt: &MemOption) -> Vec<Message>
where
    I: IntoIterator<Item = Vec<Message>>,
{
    if opt.max_history <= 0 || opt.max_span <= 0 {
        return Vec::new();
    }
    let offset = opt.offset.max(0) as usize;
    let max = opt.max_history as usize;
    let want = offset.saturating_add(max);

    let mut picked = Vec::new();
    'outer: for batch in batches {
        for m in batch.into_iter().rev() {
            if !opt.accepts(&m) {
                continue;
            }
            picked.push(m);
            if picked.len() >= want {
                break 'outer;
            }
        }
    }

    let mut picked: Vec<Message> = picked.into_iter().skip(offset).take(max).collect();
    picked.reverse();
    picked
}

// ─────────────────────────────────────────────────────────────────────────────
// File store
// ─────────────────────────────────────────────────────────────────────────────

static LAST_NANOS: AtomicI64 = AtomicI64::new(0);

/// Strictly increasing nanosecond timestamp within this process.
fn unique_nanos() -> i64 {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut last = LAST_NANOS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_NANOS.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// History as one JSON file per save under a directory,
/// named `YYYY-MM-DD-<nanos>.json`.
#[derive(Debug, Clone)]
pub struct FileMemStore {
    dir: PathBuf,
}

impl FileMemStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// History files modified within the window, newest first.
    async fn recent_files(&self, span: Duration) -> Result<Vec<PathBuf>> {
        let mut rd = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MemoryError::io(self.dir.display(), e)),
        };
        let cutoff = SystemTime::now()
            .checked_sub(span)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut files = Vec::new();
        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|e| MemoryError::io(self.dir.display(), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if modified > cutoff {
                files.push((modified, path));
            }
        }
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(files.into_iter().map(|(_, p)| p).collect())
    }
}

#[async_trait]
impl MemStore for FileMemStore {
    async fn save(&self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| MemoryError::io(self.dir.display(), e))?;

        let name = format!("{}-{}.json", Utc::now().format("%Y-%m-%d"), unique_nanos());
        let path = self.dir.join(name);
        let data = serde_json::to_vec_pretty(messages)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| MemoryError::io(path.display(), e))?;
        debug!(path = %path.display(), count = messages.len(), "Saved history");
        Ok(())
    }

    async fn load(&self, opt: &MemOption) -> Result<Vec<Message>> {
        if opt.max_history <= 0 || opt.max_span <= 0 {
            return Ok(Vec::new());
        }
        let files = self.recent_files(opt.span()).await?;

        let mut batches = Vec::with_capacity(files.len());
        let want = opt.offset.max(0).saturating_add(opt.max_history) as usize;
        let mut seen = 0usize;
        for path in files {
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| MemoryError::io(path.display(), e))?;
            let batch: Vec<Message> = match serde_json::from_slice(&data) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable history file");
                    continue;
                }
            };
            seen += batch.iter().filter(|m| opt.accepts(m)).count();
            batches.push(batch);
            if seen >= want {
                break;
            }
        }
        Ok(select(batches, opt))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────────────────

/// History kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryMemStore {
    batches: Mutex<Vec<(SystemTime, Vec<Message>)>>,
}

impl InMemoryMemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every saved message in insertion order.
    pub fn all(&self) -> Vec<Message> {
        self.batches
            .lock()
            .iter()
            .flat_map(|(_, b)| b.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl MemStore for InMemoryMemStore {
    async fn save(&self, messages: &[Message]) -> Result<()> {
        if !messages.is_empty() {
            self.batches
                .lock()
                .push((SystemTime::now(), messages.to_vec()));
        }
        Ok(())
    }

    async fn load(&self, opt: &MemOption) -> Result<Vec<Message>> {
        let cutoff = SystemTime::now()
            .checked_sub(opt.span())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let batches: Vec<Vec<Message>> = self
            .batches
            .lock()
            .iter()
            .rev()
            .filter(|(at, _)| *at > cutoff)
            .map(|(_, b)| b.clone())
            .collect();
        Ok(select(batches, opt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_zero_bounds_return_nothing() {
        let store = InMemoryMemStore::new();
        store.save(&[Message::user("a")]).await.unwrap();
        assert!(store.load(&MemOption::new(0, 60)).await.unwrap().is_empty());
        assert!(store.load(&MemOption::new(3, 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_k_in_insertion_order() {
        let store = InMemoryMemStore::new();
        store
            .save(&[Message::system("sys"), Message::user("1"), Message::assistant("2")])
            .await
            .unwrap();
        store
            .save(&[
                Message::user("3"),
                Message::assistant("ctx").as_context(),
                Message::assistant("img").with_content_type("image/png"),
                Message::assistant("4"),
            ])
            .await
            .unwrap();

        let got = store.load(&MemOption::new(3, i64::MAX / 120)).await.unwrap();
        assert_eq!(texts(&got), vec!["2", "3", "4"]);

        let got = store.load(&MemOption::new(10, 60)).await.unwrap();
        assert_eq!(texts(&got), vec!["1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_extreme_bounds_saturate() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileMemStore::new(dir.path());
        let memory = InMemoryMemStore::new();
        for store in [&files as &dyn MemStore, &memory] {
            store.save(&[Message::user("1"), Message::assistant("2")]).await.unwrap();

            let opt = MemOption::new(i64::MAX, i64::MAX).with_offset(i64::MAX);
            assert!(store.load(&opt).await.unwrap().is_empty());

            let opt = MemOption::new(i64::MAX, i64::MAX);
            assert_eq!(texts(&store.load(&opt).await.unwrap()), vec!["1", "2"]);
        }
    }

    #[tokio::test]
    async fn test_offset_and_roles() {
        let store = InMemoryMemStore::new();
        store
            .save(&[
                Message::user("u1"),
                Message::assistant("a1"),
                Message::user("u2"),
                Message::assistant("a2"),
            ])
            .await
            .unwrap();

        let got = store.load(&MemOption::new(2, 60).with_offset(1)).await.unwrap();
        assert_eq!(texts(&got), vec!["a1", "u2"]);

        let got = store
            .load(&MemOption::new(5, 60).with_roles(vec![Role::User]))
            .await
            .unwrap();
        assert_eq!(texts(&got), vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let store = InMemoryMemStore::new();
        let m = Message::user("find me");
        store.save(&[m.clone()]).await.unwrap();
        assert_eq!(store.get(&m.id).await.unwrap().content, "find me");
        let err = store.get("nope").await.unwrap_err();
        assert_eq!(err.kind(), swarm_types::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileMemStore::new(dir.path().join("history"));

        assert!(store.load(&MemOption::new(3, 60)).await.unwrap().is_empty());

        store.save(&[Message::user("q1"), Message::assistant("r1")]).await.unwrap();
        store.save(&[Message::user("q2"), Message::assistant("r2")]).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path().join("history"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert!(names.iter().all(|n| n.starts_with(&today) && n.ends_with(".json")));

        let got = store.load(&MemOption::new(3, 60)).await.unwrap();
        assert_eq!(texts(&got), vec!["r1", "q2", "r2"]);
    }

    #[test]
    fn test_unique_nanos_increase() {
        let a = unique_nanos();
        let b = unique_nanos();
        assert!(b > a);
    }
}
