//! Filesystem-backed blob store.

use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::BlobStore;
use crate::error::StorageError;

/// Stores blobs as uuid-named files under a root directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| StorageError::CreateDirectory {
            path: root.clone(),
            source: e,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rejects references that could escape the root directory.
    fn path_for(&self, reference: &str) -> Result<PathBuf, StorageError> {
        if reference.is_empty()
            || !reference
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(StorageError::BlobNotFound(reference.to_string()));
        }
        Ok(self.root.join(reference))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, bytes: &[u8]) -> Result<String, StorageError> {
        let reference = Uuid::new_v4().to_string();
        let path = self.root.join(&reference);

        // create_new: exclusive creation, no clobbering on uuid collision.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::WriteBlob {
                reference: reference.clone(),
                source: e,
            })?;
        file.write_all(bytes).map_err(|e| StorageError::WriteBlob {
            reference: reference.clone(),
            source: e,
        })?;

        Ok(reference)
    }

    fn get(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(reference)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::BlobNotFound(reference.to_string()))
            }
            Err(e) => Err(StorageError::ReadBlob {
                reference: reference.to_string(),
                source: e,
            }),
        }
    }

    fn delete(&self, reference: &str) -> Result<(), StorageError> {
        let path = self.path_for(reference)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteBlob {
                reference: reference.to_string(),
                source: e,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        let reference = store.put(b"extracted text").unwrap();
        assert_eq!(store.get(&reference).unwrap(), b"extracted text");
    }

    #[test]
    fn test_get_missing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        let err = store.get("00000000-0000-0000-0000-000000000000").unwrap_err();
        assert!(matches!(err, StorageError::BlobNotFound(_)));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        let reference = store.put(b"data").unwrap();
        store.delete(&reference).unwrap();
        store.delete(&reference).unwrap();
        assert!(store.get(&reference).is_err());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        assert!(store.get("../etc/passwd").is_err());
        assert!(store.get("").is_err());
    }
}
