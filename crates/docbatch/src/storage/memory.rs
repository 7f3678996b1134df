//! In-memory blob store for tests and single-process setups.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use super::BlobStore;
use crate::error::StorageError;

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        match self.blobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, bytes: &[u8]) -> Result<String, StorageError> {
        let reference = Uuid::new_v4().to_string();
        self.lock().insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }

    fn get(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        self.lock()
            .get(reference)
            .cloned()
            .ok_or_else(|| StorageError::BlobNotFound(reference.to_string()))
    }

    fn delete(&self, reference: &str) -> Result<(), StorageError> {
        self.lock().remove(reference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_delete() {
        let store = MemoryBlobStore::new();
        let reference = store.put(b"hello").unwrap();
        assert_eq!(store.get(&reference).unwrap(), b"hello");
        assert_eq!(store.len(), 1);

        store.delete(&reference).unwrap();
        store.delete(&reference).unwrap();
        assert!(store.is_empty());
        assert!(store.get(&reference).is_err());
    }
}
