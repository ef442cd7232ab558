//! Filesystem [`RefBackend`](super::RefBackend): one file per ref under the repository root,
//! named after the ref itself (`HEAD`, `refs/heads/main`, ...), written via temp-file-plus-rename
//! the same way [`FilesystemBackend`](crate::internal::store::FilesystemBackend) writes objects.
//!
//! The compare-and-swap here is best-effort rather than a true atomic CAS: it reads the current
//! content, then writes if it still matches. A concurrent writer landing in that gap can still
//! win the race. Real deployments needing stronger guarantees should serialize ref writes through
//! a single process or add filesystem locking; this backend targets the common single-writer case.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::errors::GitError;

use super::RefBackend;

pub struct FilesystemRefBackend {
    root: PathBuf,
}

impl FilesystemRefBackend {
    /// `root` is the repository's git directory (containing `HEAD`, `refs/`, etc).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemRefBackend { root: root.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[async_trait]
impl RefBackend for FilesystemRefBackend {
    async fn read(&self, name: &str) -> Result<Option<String>, GitError> {
        match fs::read_to_string(self.path_for(name)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GitError::IOError(e)),
        }
    }

    async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, GitError> {
        let current = self.read(name).await?;
        if current.as_deref() != expected {
            return Ok(false);
        }

        let path = self.path_for(name);
        let dir = path.parent().expect("ref path always has a parent directory");
        fs::create_dir_all(dir).await?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        use std::io::Write;
        tmp.write_all(new.as_bytes())?;
        tmp.flush()?;
        let (file, tmp_path) = tmp.keep().map_err(|e| GitError::IOError(e.error))?;
        drop(file);
        fs::rename(&tmp_path, &path).await?;
        Ok(true)
    }

    async fn delete(&self, name: &str) -> Result<(), GitError> {
        let path = self.path_for(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GitError::IOError(e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, GitError> {
        let mut names = Vec::new();
        if fs::try_exists(self.path_for("HEAD")).await? && "HEAD".starts_with(prefix) {
            names.push("HEAD".to_string());
        }
        let refs_root = self.root.join("refs");
        if fs::try_exists(&refs_root).await? {
            walk(&refs_root, &self.root, &mut names).await?;
        }
        Ok(names.into_iter().filter(|n| n.starts_with(prefix)).collect())
    }
}

fn walk<'a>(
    dir: &'a Path,
    root: &'a Path,
    names: &'a mut Vec<String>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), GitError>> + Send + 'a>> {
    Box::pin(async move {
        let mut reader = fs::read_dir(dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                walk(&entry.path(), root, names).await?;
            } else {
                let relative = entry
                    .path()
                    .strip_prefix(root)
                    .expect("walked path is always under root")
                    .to_string_lossy()
                    .replace('\\', "/");
                names.push(relative);
            }
        }
        Ok(())
    })
}
