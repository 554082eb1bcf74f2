//! Conversation memory and blob storage.
//!
//! History is append-only: every save writes a new batch and loads replay a
//! bounded window of recent text messages. Blobs hold binary tool output
//! that is referenced from the conversation by data URI.

pub mod blob;
pub mod error;
pub mod history;

pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use error::{MemoryError, Result};
pub use history::{FileMemStore, InMemoryMemStore, MemOption, MemStore};
