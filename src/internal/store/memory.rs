//! In-memory [`StorageBackend`](super::StorageBackend), for tests and for repositories that
//! never need to survive process exit.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{errors::GitError, hash::ObjectHash};

use super::StorageBackend;

/// Concurrent hash map keyed by object hash, mirroring the `DashMap` usage the pack decoder's
/// [`Caches`](crate::internal::pack::cache::Caches) already relies on for lock-free reads.
#[derive(Default)]
pub struct MemoryBackend {
    objects: DashMap<ObjectHash, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            objects: DashMap::new(),
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn read(&self, hash: &ObjectHash) -> Result<Vec<u8>, GitError> {
        self.objects
            .get(hash)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GitError::ObjectNotFound(hash.to_string()))
    }

    async fn write(&self, hash: &ObjectHash, bytes: &[u8]) -> Result<(), GitError> {
        self.objects.insert(*hash, bytes.to_vec());
        Ok(())
    }

    async fn has(&self, hash: &ObjectHash) -> Result<bool, GitError> {
        Ok(self.objects.contains_key(hash))
    }

    async fn delete(&self, hash: &ObjectHash) -> Result<(), GitError> {
        self.objects.remove(hash);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ObjectHash>, GitError> {
        Ok(self.objects.iter().map(|entry| *entry.key()).collect())
    }

    async fn close(&self) -> Result<(), GitError> {
        Ok(())
    }
}
