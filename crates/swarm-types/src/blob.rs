//! Opaque binary payloads and their data-URI form.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MIME type of a base64-encoded image returned by image generation.
pub const MIME_B64_JSON: &str = "image/b64-json";

const BLOB_URI_PREFIX: &str = "data:application/x.dhnt.blob;mime=";

/// A binary object held by a blob store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub id: String,
    pub mime_type: String,
    #[serde(skip)]
    pub content: Vec<u8>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl Blob {
    /// New blob with a fresh UUID.
    pub fn new(mime_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mime_type: mime_type.into(),
            content,
            meta: Default::default(),
        }
    }

    /// Decode a base64 payload. `image/b64-json` is stored as `image/png`.
    pub fn from_base64(mime_type: &str, encoded: &str) -> Result<Self> {
        let content = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::internal(format!("invalid base64 payload: {e}")))?;
        let mime = if mime_type == MIME_B64_JSON {
            "image/png"
        } else {
            mime_type
        };
        Ok(Self::new(mime, content))
    }

    /// The data URI handed to the LLM in place of the bytes.
    pub fn uri(&self) -> String {
        blob_uri(&self.mime_type, &self.id)
    }
}

/// Build `data:application/x.dhnt.blob;mime=<mime>;<id>`.
pub fn blob_uri(mime_type: &str, id: &str) -> String {
    format!("{BLOB_URI_PREFIX}{mime_type};{id}")
}

/// Split a blob URI into `(mime, id)`.
pub fn parse_blob_uri(uri: &str) -> Option<(String, String)> {
    let rest = uri.trim().strip_prefix(BLOB_URI_PREFIX)?;
    let (mime, id) = rest.rsplit_once(';')?;
    if mime.is_empty() || id.is_empty() {
        return None;
    }
    Some((mime.to_string(), id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri() {
        let blob = Blob::new("image/png", vec![1, 2, 3]);
        let uri = blob.uri();
        assert!(uri.starts_with("data:application/x.dhnt.blob;mime=image/png;"));
        let (mime, id) = parse_blob_uri(&uri).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(id, blob.id);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_parse_rejects_other_uris() {
        assert!(parse_blob_uri("data:text/plain;base64,aGk=").is_none());
        assert!(parse_blob_uri("data:application/x.dhnt.blob;mime=;x").is_none());
    }

    #[test]
    fn test_from_base64() {
        let blob = Blob::from_base64(MIME_B64_JSON, "aGVsbG8=").unwrap();
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.content, b"hello");
        assert!(Blob::from_base64("image/png", "!!").is_err());
    }
}
