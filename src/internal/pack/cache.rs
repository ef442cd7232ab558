//! Bounded in-memory object cache used while decoding a pack: resolved base objects stay hot for
//! delta resolution until the configured memory budget is exceeded, at which point they spill to a
//! temp directory on disk.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use lru_mem::{HeapSize, LruCache};

use crate::{errors::GitError, hash::ObjectHash, internal::pack::cache_object::CacheObject};

impl HeapSize for CacheObject {
    fn heap_size(&self) -> usize {
        self.data_decompressed.len()
    }
}

/// Object cache keyed by hash, bounded in memory with an optional disk overflow directory.
pub struct Caches {
    hot: Mutex<LruCache<ObjectHash, CacheObject>>,
    overflow_dir: Option<PathBuf>,
}

impl Caches {
    pub fn new(mem_limit: usize, overflow_dir: Option<PathBuf>) -> Self {
        if let Some(dir) = &overflow_dir {
            let _ = fs::create_dir_all(dir);
        }
        Caches {
            hot: Mutex::new(LruCache::new(mem_limit)),
            overflow_dir,
        }
    }

    /// Insert a resolved object. It is written through to the overflow directory (if configured)
    /// so that objects the in-memory LRU silently drops to stay under budget remain retrievable.
    pub fn insert(&self, object: CacheObject) -> Result<(), GitError> {
        let Some(hash) = object.hash() else {
            return Err(GitError::CustomError(
                "cannot cache an unresolved delta entry".to_string(),
            ));
        };
        self.spill_to_disk(&object)?;
        let mut hot = self.hot.lock().unwrap();
        let _ = hot.insert(hash, object);
        Ok(())
    }

    pub fn get(&self, hash: &ObjectHash) -> Option<CacheObject> {
        let mut hot = self.hot.lock().unwrap();
        if let Some(obj) = hot.get(hash) {
            return Some(obj.clone());
        }
        drop(hot);
        self.read_from_disk(hash)
    }

    pub fn contains(&self, hash: &ObjectHash) -> bool {
        self.hot.lock().unwrap().contains(hash) || self.read_from_disk(hash).is_some()
    }

    fn overflow_path(&self, hash: &ObjectHash) -> Option<PathBuf> {
        self.overflow_dir.as_ref().map(|dir| dir.join(hash.to_string()))
    }

    fn spill_to_disk(&self, object: &CacheObject) -> Result<(), GitError> {
        let Some(hash) = object.hash() else {
            return Ok(());
        };
        if let Some(path) = self.overflow_path(&hash) {
            fs::write(path, &object.data_decompressed)?;
        }
        Ok(())
    }

    fn read_from_disk(&self, hash: &ObjectHash) -> Option<CacheObject> {
        let path = self.overflow_path(hash)?;
        let data = fs::read(path).ok()?;
        Some(CacheObject::new_base(
            crate::internal::object::types::ObjectType::Blob,
            *hash,
            0,
            data,
        ))
    }

    pub fn clear_disk(&self) -> Result<(), GitError> {
        if let Some(dir) = &self.overflow_dir
            && dir.exists()
        {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

impl Default for Caches {
    fn default() -> Self {
        Caches::new(256 * 1024 * 1024, None)
    }
}

pub fn default_overflow_dir(base: &Path, pack_signature: &str) -> PathBuf {
    base.join(pack_signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::types::ObjectType;

    #[test]
    fn insert_and_get_round_trips() {
        let caches = Caches::new(1024, None);
        let hash = ObjectHash::new(b"payload");
        let obj = CacheObject::new_base(ObjectType::Blob, hash, 0, b"payload".to_vec());
        caches.insert(obj).unwrap();
        let fetched = caches.get(&hash).unwrap();
        assert_eq!(fetched.data_decompressed, b"payload");
    }

    #[test]
    fn objects_remain_retrievable_once_dropped_from_the_hot_cache() {
        let dir = tempfile::tempdir().unwrap();
        let caches = Caches::new(16, Some(dir.path().to_path_buf()));
        let h1 = ObjectHash::new(b"first-object-data");
        let h2 = ObjectHash::new(b"second-object-data");
        caches
            .insert(CacheObject::new_base(
                ObjectType::Blob,
                h1,
                0,
                b"first-object-data".to_vec(),
            ))
            .unwrap();
        caches
            .insert(CacheObject::new_base(
                ObjectType::Blob,
                h2,
                1,
                b"second-object-data".to_vec(),
            ))
            .unwrap();
        assert!(caches.contains(&h1));
        assert!(caches.contains(&h2));
    }
}
