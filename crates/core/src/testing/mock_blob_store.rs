//! In-memory blob store for testing.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::storage::{BlobStore, StorageError, StoredObject};

/// Mock implementation of the BlobStore trait.
///
/// Keeps uploaded bytes in memory and can be told to reject every put.
/// Locations look like `mock://<key>`.
#[derive(Debug, Default)]
pub struct MockBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail: AtomicBool,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent put fail (or succeed again).
    pub fn fail_puts(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn put(&self, key: &str, source: &Path) -> Result<StoredObject, StorageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected {
                status: 500,
                message: "injected failure".to_string(),
            });
        }

        let bytes = tokio::fs::read(source).await.map_err(StorageError::Source)?;
        let stored = StoredObject {
            location: format!("mock://{}", key),
            size_bytes: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(&bytes)),
        };

        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), bytes);
        Ok(stored)
    }
}
