//! Blob storage for extracted texts and merged artifacts.

pub mod filesystem;
pub mod memory;

pub use filesystem::FsBlobStore;
pub use memory::MemoryBlobStore;

use crate::error::StorageError;

/// Durable byte storage keyed by opaque references.
pub trait BlobStore: Send + Sync {
    /// Stores bytes and returns an opaque reference.
    fn put(&self, bytes: &[u8]) -> Result<String, StorageError>;

    /// Fetches the bytes behind a reference.
    fn get(&self, reference: &str) -> Result<Vec<u8>, StorageError>;

    /// Deletes a blob. Deleting a missing blob is a no-op.
    fn delete(&self, reference: &str) -> Result<(), StorageError>;
}
