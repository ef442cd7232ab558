//! Filesystem [`StorageBackend`](super::StorageBackend), laying objects out exactly like a
//! classic git repository's loose-object store: `objects/<hex[0..2]>/<hex[2..]>`. Writes go to
//! a temp file in the same directory and are renamed into place, so a reader never observes a
//! partially written object.

use std::io::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use crate::{errors::GitError, hash::ObjectHash};

use super::StorageBackend;

pub struct FilesystemBackend {
    objects_dir: PathBuf,
}

impl FilesystemBackend {
    /// `objects_dir` is the repository's `objects/` directory; it is created if missing.
    pub async fn new(objects_dir: impl Into<PathBuf>) -> Result<Self, GitError> {
        let objects_dir = objects_dir.into();
        fs::create_dir_all(&objects_dir).await?;
        Ok(FilesystemBackend { objects_dir })
    }

    fn path_for(&self, hash: &ObjectHash) -> PathBuf {
        let hex = hash.to_string();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn read(&self, hash: &ObjectHash) -> Result<Vec<u8>, GitError> {
        let path = self.path_for(hash);
        fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GitError::ObjectNotFound(hash.to_string()),
            _ => GitError::IOError(e),
        })
    }

    async fn write(&self, hash: &ObjectHash, bytes: &[u8]) -> Result<(), GitError> {
        let path = self.path_for(hash);
        let dir = path.parent().expect("object path always has a shard directory");
        fs::create_dir_all(dir).await?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        let (file, tmp_path) = tmp.keep().map_err(|e| GitError::IOError(e.error))?;
        drop(file);
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn has(&self, hash: &ObjectHash) -> Result<bool, GitError> {
        Ok(fs::try_exists(self.path_for(hash)).await?)
    }

    async fn delete(&self, hash: &ObjectHash) -> Result<(), GitError> {
        let path = self.path_for(hash);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GitError::IOError(e)),
        }
    }

    async fn list(&self) -> Result<Vec<ObjectHash>, GitError> {
        let mut hashes = Vec::new();
        let mut shard_reader = fs::read_dir(&self.objects_dir).await?;
        while let Some(shard) = shard_reader.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let shard_name = shard.file_name().to_string_lossy().into_owned();
            if shard_name.len() != 2 || !shard_name.chars().all(|c| c.is_ascii_hexdigit()) {
                continue;
            }
            let mut entry_reader = fs::read_dir(shard.path()).await?;
            while let Some(entry) = entry_reader.next_entry().await? {
                let rest = entry.file_name().to_string_lossy().into_owned();
                let hex = format!("{shard_name}{rest}");
                if let Ok(hash) = parse_hash(&hex) {
                    hashes.push(hash);
                }
            }
        }
        Ok(hashes)
    }

    async fn close(&self) -> Result<(), GitError> {
        Ok(())
    }
}

fn parse_hash(hex: &str) -> Result<ObjectHash, GitError> {
    use std::str::FromStr;
    ObjectHash::from_str(hex).map_err(GitError::InvalidHashValue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};

    #[tokio::test]
    async fn writes_then_reads_back_bytes() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path().join("objects")).await.unwrap();
        let hash = ObjectHash::new(b"fs-backend-content");
        assert!(!backend.has(&hash).await.unwrap());

        backend.write(&hash, b"payload").await.unwrap();
        assert!(backend.has(&hash).await.unwrap());
        assert_eq!(backend.read(&hash).await.unwrap(), b"payload");

        let listed = backend.list().await.unwrap();
        assert_eq!(listed, vec![hash]);

        backend.delete(&hash).await.unwrap();
        assert!(!backend.has(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn reading_missing_object_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path().join("objects")).await.unwrap();
        let hash = ObjectHash::new(b"absent");
        assert!(matches!(
            backend.read(&hash).await,
            Err(GitError::ObjectNotFound(_))
        ));
    }
}
