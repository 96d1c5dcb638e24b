//! Blob storage for uploaded inputs and produced artifacts
//!
//! Keys are relative, slash-separated paths such as `inputs/<id>.jpg` or
//! `artifacts/<id>.png`. Every backend rejects keys that could escape the
//! store (absolute paths, `..` segments, backslashes).

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

/// Stream of blob chunks
pub type BlobStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// An opened blob, ready to be streamed to a client
pub struct BlobReader {
    /// Total size in bytes
    pub len: u64,
    /// Blob contents
    pub stream: BlobStream,
}

impl std::fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReader").field("len", &self.len).finish()
    }
}

/// Storage backend for file contents
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, replacing any previous blob
    ///
    /// Readers never observe a partially written blob.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Read a whole blob into memory
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Open a blob for streaming
    async fn open(&self, key: &str) -> Result<Option<BlobReader>>;

    /// Delete a blob; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Reject keys that are empty or could address something outside the store
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        return Err(Error::Other(format!("invalid blob key '{key}'")));
    }
    Ok(())
}
