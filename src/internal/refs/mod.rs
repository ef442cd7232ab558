//! Reference storage: symbolic and direct refs under `refs/heads/*`, `refs/tags/*`, and the
//! special `HEAD` ref, behind a pluggable [`RefBackend`] the same way [`ObjectStore`](crate::internal::store::ObjectStore)
//! sits on a pluggable [`StorageBackend`](crate::internal::store::StorageBackend).

pub mod filesystem;
pub mod memory;

use async_trait::async_trait;

use crate::{errors::GitError, hash::ObjectHash};

pub use filesystem::FilesystemRefBackend;
pub use memory::MemoryRefBackend;

/// How deep a chain of symbolic refs may go before resolution gives up. `HEAD -> refs/heads/main`
/// is depth 1; this bounds pathological or cyclic chains rather than any realistic use.
pub const MAX_SYMBOLIC_DEPTH: usize = 8;

/// The two shapes a ref file's content can take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    /// A direct ref: `<hex-hash>\n`.
    Direct(ObjectHash),
    /// A symbolic ref: `ref: <other-ref-name>\n`.
    Symbolic(String),
}

impl RefTarget {
    fn serialize(&self) -> String {
        match self {
            RefTarget::Direct(hash) => format!("{hash}\n"),
            RefTarget::Symbolic(target) => format!("ref: {target}\n"),
        }
    }

    fn parse(content: &str, hash_kind: crate::hash::HashKind) -> Result<Self, GitError> {
        let trimmed = content.trim();
        if let Some(target) = trimmed.strip_prefix("ref: ") {
            Ok(RefTarget::Symbolic(target.trim().to_string()))
        } else {
            let _ = hash_kind;
            ObjectHash::from_str(trimmed)
                .map(RefTarget::Direct)
                .map_err(GitError::InvalidHashValue)
        }
    }
}

use std::str::FromStr;

/// Storage primitive a [`RefStore`] is layered on. Backends deal only in ref names (e.g.
/// `refs/heads/main`, `HEAD`) and their raw file content; chain resolution, HEAD semantics, and
/// compare-and-set retry policy all live in [`RefStore`].
#[async_trait]
pub trait RefBackend: Send + Sync {
    /// Raw content of `name`, or `None` if the ref does not exist.
    async fn read(&self, name: &str) -> Result<Option<String>, GitError>;

    /// Atomically set `name`'s content to `new`, iff its current content equals `expected`
    /// (`None` meaning "must not currently exist"). Returns `false` on a lost race.
    async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, GitError>;

    /// Remove `name` unconditionally.
    async fn delete(&self, name: &str) -> Result<(), GitError>;

    /// List every ref name stored under `prefix` (e.g. `refs/heads/`).
    async fn list(&self, prefix: &str) -> Result<Vec<String>, GitError>;
}

/// Reference store: symbolic-ref resolution, HEAD tracking, and compare-and-set updates over a
/// [`RefBackend`].
#[derive(Clone)]
pub struct RefStore {
    backend: std::sync::Arc<dyn RefBackend>,
    hash_kind: crate::hash::HashKind,
}

impl RefStore {
    pub fn new(backend: std::sync::Arc<dyn RefBackend>, hash_kind: crate::hash::HashKind) -> Self {
        RefStore { backend, hash_kind }
    }

    async fn read_target(&self, name: &str) -> Result<Option<RefTarget>, GitError> {
        match self.backend.read(name).await? {
            Some(content) => Ok(Some(RefTarget::parse(&content, self.hash_kind)?)),
            None => Ok(None),
        }
    }

    /// Resolve `name` to the object hash it ultimately points at, following symbolic refs up
    /// to [`MAX_SYMBOLIC_DEPTH`] hops.
    pub async fn resolve(&self, name: &str) -> Result<ObjectHash, GitError> {
        let mut current = name.to_string();
        for _ in 0..MAX_SYMBOLIC_DEPTH {
            match self.read_target(&current).await? {
                Some(RefTarget::Direct(hash)) => return Ok(hash),
                Some(RefTarget::Symbolic(target)) => current = target,
                None => return Err(GitError::RefNotFound(name.to_string())),
            }
        }
        Err(GitError::RefChainTooDeep(name.to_string()))
    }

    /// Resolve `name` one hop, returning its immediate target without following further
    /// symbolic indirection. Used to tell whether a ref is itself symbolic.
    pub async fn read(&self, name: &str) -> Result<Option<RefTarget>, GitError> {
        self.read_target(name).await
    }

    /// Compare-and-set a direct ref's hash. `expected` must match the ref's current value
    /// (`None` for "must not exist yet"); a race that changes the value underneath the caller
    /// surfaces as [`GitError::RefUpdateStale`].
    pub async fn update(
        &self,
        name: &str,
        expected: Option<ObjectHash>,
        new: ObjectHash,
    ) -> Result<(), GitError> {
        let expected_content = expected.map(|h| RefTarget::Direct(h).serialize());
        let new_content = RefTarget::Direct(new).serialize();
        let ok = self
            .backend
            .compare_and_swap(name, expected_content.as_deref(), &new_content)
            .await?;
        if ok {
            Ok(())
        } else {
            Err(GitError::RefUpdateStale(name.to_string()))
        }
    }

    /// Point a symbolic ref (commonly `HEAD`) at another ref name.
    pub async fn update_symbolic(&self, name: &str, target: &str) -> Result<(), GitError> {
        let current = self.backend.read(name).await?;
        let new_content = RefTarget::Symbolic(target.to_string()).serialize();
        let ok = self
            .backend
            .compare_and_swap(name, current.as_deref(), &new_content)
            .await?;
        if ok {
            Ok(())
        } else {
            Err(GitError::RefUpdateStale(name.to_string()))
        }
    }

    /// Delete `name`, refusing to remove a ref that `HEAD` currently resolves through unless
    /// `force` is set.
    pub async fn delete(&self, name: &str, force: bool) -> Result<(), GitError> {
        if !force && self.is_checked_out(name).await? {
            return Err(GitError::RefIsCheckedOut(name.to_string()));
        }
        self.backend.delete(name).await
    }

    /// Rename `old` to `new`, refusing to overwrite an existing ref and updating `HEAD`'s
    /// symbolic target if it pointed at `old`.
    pub async fn rename(&self, old: &str, new: &str) -> Result<(), GitError> {
        if self.backend.read(new).await?.is_some() {
            return Err(GitError::BranchExists(new.to_string()));
        }
        let content = self
            .backend
            .read(old)
            .await?
            .ok_or_else(|| GitError::RefNotFound(old.to_string()))?;
        let ok = self.backend.compare_and_swap(new, None, &content).await?;
        if !ok {
            return Err(GitError::RefUpdateStale(new.to_string()));
        }
        self.backend.delete(old).await?;

        if let Some(RefTarget::Symbolic(target)) = self.read_target("HEAD").await? {
            if target == old {
                self.update_symbolic("HEAD", new).await?;
            }
        }
        Ok(())
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, GitError> {
        self.backend.list(prefix).await
    }

    /// Resolve `HEAD` all the way to its object hash.
    pub async fn head(&self) -> Result<ObjectHash, GitError> {
        self.resolve("HEAD").await
    }

    /// The branch name `HEAD` currently points at, or `None` if `HEAD` is detached (a direct
    /// ref rather than symbolic).
    pub async fn current_branch(&self) -> Result<Option<String>, GitError> {
        match self.read_target("HEAD").await? {
            Some(RefTarget::Symbolic(target)) => Ok(Some(target)),
            _ => Ok(None),
        }
    }

    /// Point `HEAD` at a branch name (symbolic) or detach it directly at a commit hash.
    pub async fn set_head(&self, target: HeadTarget) -> Result<(), GitError> {
        match target {
            HeadTarget::Branch(branch) => self.update_symbolic("HEAD", &branch).await,
            HeadTarget::Detached(hash) => {
                let current = self.backend.read("HEAD").await?;
                let content = RefTarget::Direct(hash).serialize();
                let ok = self
                    .backend
                    .compare_and_swap("HEAD", current.as_deref(), &content)
                    .await?;
                if ok {
                    Ok(())
                } else {
                    Err(GitError::RefUpdateStale("HEAD".to_string()))
                }
            }
        }
    }

    async fn is_checked_out(&self, name: &str) -> Result<bool, GitError> {
        Ok(matches!(self.read_target("HEAD").await?, Some(RefTarget::Symbolic(t)) if t == name))
    }
}

/// What `HEAD` should be set to.
pub enum HeadTarget {
    Branch(String),
    Detached(ObjectHash),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};
    use std::sync::Arc;

    fn store() -> RefStore {
        RefStore::new(Arc::new(MemoryRefBackend::new()), HashKind::Sha1)
    }

    #[tokio::test]
    async fn direct_ref_round_trips() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let refs = store();
        let hash = ObjectHash::new(b"commit-1");
        refs.update("refs/heads/main", None, hash).await.unwrap();
        assert_eq!(refs.resolve("refs/heads/main").await.unwrap(), hash);
    }

    #[tokio::test]
    async fn head_follows_symbolic_chain_to_branch() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let refs = store();
        let hash = ObjectHash::new(b"commit-1");
        refs.update("refs/heads/main", None, hash).await.unwrap();
        refs.update_symbolic("HEAD", "refs/heads/main").await.unwrap();
        assert_eq!(refs.head().await.unwrap(), hash);
        assert_eq!(
            refs.current_branch().await.unwrap(),
            Some("refs/heads/main".to_string())
        );
    }

    #[tokio::test]
    async fn compare_and_set_rejects_stale_expectation() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let refs = store();
        let h1 = ObjectHash::new(b"one");
        let h2 = ObjectHash::new(b"two");
        refs.update("refs/heads/main", None, h1).await.unwrap();
        let err = refs.update("refs/heads/main", None, h2).await.unwrap_err();
        assert!(matches!(err, GitError::RefUpdateStale(_)));
    }

    #[tokio::test]
    async fn cyclic_symbolic_refs_exceed_depth_cap() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let refs = store();
        refs.update_symbolic("refs/heads/a", "refs/heads/b").await.unwrap();
        refs.update_symbolic("refs/heads/b", "refs/heads/a").await.unwrap();
        assert!(matches!(
            refs.resolve("refs/heads/a").await.unwrap_err(),
            GitError::RefChainTooDeep(_)
        ));
    }

    #[tokio::test]
    async fn delete_refuses_checked_out_branch_without_force() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let refs = store();
        let hash = ObjectHash::new(b"c");
        refs.update("refs/heads/main", None, hash).await.unwrap();
        refs.update_symbolic("HEAD", "refs/heads/main").await.unwrap();
        assert!(matches!(
            refs.delete("refs/heads/main", false).await.unwrap_err(),
            GitError::RefIsCheckedOut(_)
        ));
        refs.delete("refs/heads/main", true).await.unwrap();
    }

    #[tokio::test]
    async fn rename_refuses_to_overwrite_existing_ref() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let refs = store();
        let h1 = ObjectHash::new(b"one");
        let h2 = ObjectHash::new(b"two");
        refs.update("refs/heads/main", None, h1).await.unwrap();
        refs.update("refs/heads/dev", None, h2).await.unwrap();
        assert!(refs.rename("refs/heads/main", "refs/heads/dev").await.is_err());
    }

    #[tokio::test]
    async fn rename_updates_head_when_it_pointed_at_the_old_name() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let refs = store();
        let hash = ObjectHash::new(b"c");
        refs.update("refs/heads/main", None, hash).await.unwrap();
        refs.update_symbolic("HEAD", "refs/heads/main").await.unwrap();
        refs.rename("refs/heads/main", "refs/heads/trunk").await.unwrap();
        assert_eq!(
            refs.current_branch().await.unwrap(),
            Some("refs/heads/trunk".to_string())
        );
        assert_eq!(refs.resolve("HEAD").await.unwrap(), hash);
    }
}
