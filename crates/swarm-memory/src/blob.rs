//! Opaque binary storage keyed by UUID.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use swarm_types::Blob;
use tracing::debug;

use crate::error::{MemoryError, Result};

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, blob: &Blob) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Blob>;
}

fn check_id(id: &str) -> Result<()> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| MemoryError::InvalidData(format!("blob id is not a UUID: {id}")))
}

/// Blobs held in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Blob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, blob: &Blob) -> Result<()> {
        check_id(&blob.id)?;
        self.blobs.write().insert(blob.id.clone(), blob.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Blob> {
        self.blobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| MemoryError::NotFound(format!("blob {id}")))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobMeta {
    mime_type: String,
    #[serde(default)]
    meta: serde_json::Map<String, serde_json::Value>,
}

/// Blobs as files: `<root>/<id>` holds the bytes, `<root>/<id>.json` the
/// MIME type and metadata.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn paths(&self, id: &str) -> (PathBuf, PathBuf) {
        (self.root.join(id), self.root.join(format!("{id}.json")))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn put(&self, blob: &Blob) -> Result<()> {
        check_id(&blob.id)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| MemoryError::io(self.root.display(), e))?;

        let (data_path, meta_path) = self.paths(&blob.id);
        let meta = serde_json::to_vec_pretty(&BlobMeta {
            mime_type: blob.mime_type.clone(),
            meta: blob.meta.clone(),
        })?;
        tokio::fs::write(&data_path, &blob.content)
            .await
            .map_err(|e| MemoryError::io(data_path.display(), e))?;
        tokio::fs::write(&meta_path, meta)
            .await
            .map_err(|e| MemoryError::io(meta_path.display(), e))?;
        debug!(id = %blob.id, mime = %blob.mime_type, size = blob.content.len(), "Stored blob");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Blob> {
        check_id(id).map_err(|_| MemoryError::NotFound(format!("blob {id}")))?;
        let (data_path, meta_path) = self.paths(id);

        let read = |path: PathBuf| async move {
            tokio::fs::read(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    MemoryError::NotFound(format!("blob {id}"))
                } else {
                    MemoryError::io(path.display(), e)
                }
            })
        };
        let content = read(data_path).await?;
        let meta: BlobMeta = serde_json::from_slice(&read(meta_path).await?)?;

        Ok(Blob {
            id: id.to_string(),
            mime_type: meta.mime_type,
            content,
            meta: meta.meta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_types::ErrorKind;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryBlobStore::new();
        let blob = Blob::new("image/png", vec![0x89, 0x50, 0x4e, 0x47]);
        store.put(&blob).await.unwrap();
        assert_eq!(store.get(&blob.id).await.unwrap(), blob);
        assert_eq!(store.len(), 1);

        let err = store.get("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_rejects_non_uuid() {
        let store = MemoryBlobStore::new();
        let mut blob = Blob::new("text/plain", b"x".to_vec());
        blob.id = "../../etc/passwd".to_string();
        let err = store.put(&blob).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path().join("blobs"));

        let mut blob = Blob::new("audio/mpeg", vec![1, 2, 3, 4, 5]);
        blob.meta.insert("voice".into(), "alloy".into());
        store.put(&blob).await.unwrap();

        assert!(dir.path().join("blobs").join(&blob.id).exists());
        assert!(dir.path().join("blobs").join(format!("{}.json", blob.id)).exists());

        let back = store.get(&blob.id).await.unwrap();
        assert_eq!(back, blob);

        let err = store.get(&uuid::Uuid::new_v4().to_string()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
