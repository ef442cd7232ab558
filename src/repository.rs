//! The `Repository` root struct: the single entry point wiring the object store, ref store,
//! staging index, merge engine, history queries, and the smart-HTTP client together behind the
//! public API surface (clone/fetch/push/merge/checkout and friends). Every other module in this
//! crate is a building block `Repository` composes; nothing here duplicates their logic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::{CloneOptions, FetchOptions, InitOptions, MergeOptions, PushOptions},
    errors::GitError,
    hash::{HashKind, ObjectHash, set_hash_kind},
    history::{self, LogOptions},
    internal::{
        index::{Index, IndexEntry},
        object::{
            ObjectTrait,
            blob::Blob,
            commit::Commit,
            signature::Signature,
            tree::{Tree, TreeItemMode},
            types::ObjectType,
        },
        pack::{Pack, entry::Entry},
        refs::{FilesystemRefBackend, HeadTarget, MemoryRefBackend, RefStore},
        store::{FilesystemBackend, MemoryBackend, ObjectStore},
    },
    merge::{self, Conflict, ConflictKind, ConflictState, MergeResult},
    protocol::{
        client::{GitClient, PushResult},
        types::{Capability, GitRef, RefCommand, ServiceType},
    },
};

/// Everything checkout/commit need about where a repository's mutable state lives. `None` for
/// both means a purely in-memory repository with no backing directory at all (usable in
/// environments without a host filesystem, per spec §1).
struct Layout {
    /// The `.git`-equivalent directory holding `HEAD`, `refs/`, `objects/`, and merge state.
    /// `None` for the in-memory backend.
    git_dir: Option<PathBuf>,
    /// The checked-out working tree, if any. `None` for bare repositories and in-memory use.
    work_dir: Option<PathBuf>,
}

/// A git repository: object store, ref store, staging index, and (optionally) the filesystem
/// locations they're backed by.
pub struct Repository {
    pub store: ObjectStore,
    pub refs: RefStore,
    pub hash_kind: HashKind,
    index: Mutex<Index>,
    layout: Layout,
    merge_state: Mutex<Option<ConflictState>>,
}

/// Outcome of [`Repository::fetch`].
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Local ref names that were created or moved.
    pub updated_refs: Vec<String>,
    /// Objects newly stored by this fetch (0 when the remote had nothing new, per spec
    /// property 10, "fetch idempotence").
    pub object_count: usize,
}

/// Outcome of [`Repository::pull`].
#[derive(Debug)]
pub enum PullOutcome {
    UpToDate,
    FastForwarded(ObjectHash),
    Merged(ObjectHash),
    Conflicts(Vec<Conflict>),
}

/// How a conflicted path should be resolved by [`Repository::resolve_conflict`].
#[derive(Debug, Clone)]
pub enum ResolveStrategy {
    Ours,
    Theirs,
    /// Resolve with caller-supplied bytes (the file as hand-edited to remove conflict markers).
    Manual(Vec<u8>),
}

const MERGE_HEAD: &str = "MERGE_HEAD";
const MERGE_MSG: &str = "MERGE_MSG";
const MERGE_CONFLICTS: &str = "MERGE_CONFLICTS";

impl Repository {
    // ---------------------------------------------------------------- construction

    /// Initialize a new repository on disk at `path`. `path` is the work dir for a non-bare
    /// repository (git state lives in `path/.git`) or the git dir itself when `options.bare`.
    #[instrument(skip(options))]
    pub async fn init(path: impl Into<PathBuf>, options: InitOptions) -> Result<Self, GitError> {
        let path = path.into();
        let (git_dir, work_dir) = if options.bare {
            (path.clone(), None)
        } else {
            (path.join(".git"), Some(path.clone()))
        };
        if let Some(work_dir) = &work_dir {
            tokio::fs::create_dir_all(work_dir).await?;
        }
        tokio::fs::create_dir_all(&git_dir).await?;
        tokio::fs::create_dir_all(git_dir.join("refs").join("heads")).await?;
        tokio::fs::create_dir_all(git_dir.join("refs").join("tags")).await?;
        tokio::fs::create_dir_all(git_dir.join("refs").join("remotes")).await?;

        set_hash_kind(options.hash_algorithm);
        let store = ObjectStore::new(Arc::new(
            FilesystemBackend::new(git_dir.join("objects")).await?,
        ));
        let refs = RefStore::new(
            Arc::new(FilesystemRefBackend::new(git_dir.clone())),
            options.hash_algorithm,
        );
        refs.update_symbolic("HEAD", &format!("refs/heads/{}", options.initial_branch))
            .await?;

        info!(branch = %options.initial_branch, bare = options.bare, "initialized repository");
        Ok(Repository {
            store,
            refs,
            hash_kind: options.hash_algorithm,
            index: Mutex::new(Index::new()),
            layout: Layout { git_dir: Some(git_dir), work_dir },
            merge_state: Mutex::new(None),
        })
    }

    /// Open an existing filesystem-backed repository, auto-detecting bare vs. non-bare by
    /// whether `path/.git` exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, GitError> {
        let path = path.into();
        let dot_git = path.join(".git");
        let (git_dir, work_dir) = if tokio::fs::try_exists(&dot_git).await? {
            (dot_git, Some(path.clone()))
        } else {
            (path.clone(), None)
        };

        let refs_probe = RefStore::new(
            Arc::new(FilesystemRefBackend::new(git_dir.clone())),
            HashKind::Sha1,
        );
        let hash_kind = match refs_probe.read("HEAD").await? {
            Some(crate::internal::refs::RefTarget::Direct(hash)) => hash.kind(),
            _ => detect_hash_kind(&git_dir).await.unwrap_or(HashKind::Sha1),
        };
        set_hash_kind(hash_kind);

        let store = ObjectStore::new(Arc::new(FilesystemBackend::new(git_dir.join("objects")).await?));
        let refs = RefStore::new(Arc::new(FilesystemRefBackend::new(git_dir.clone())), hash_kind);

        Ok(Repository {
            store,
            refs,
            hash_kind,
            index: Mutex::new(Index::new()),
            layout: Layout { git_dir: Some(git_dir), work_dir },
            merge_state: Mutex::new(None),
        })
    }

    /// A repository with no backing filesystem at all: object store and refs both live in
    /// process memory. Used for tests and embedded/browser contexts (spec §1, §4.3).
    pub fn init_in_memory(options: InitOptions) -> Self {
        set_hash_kind(options.hash_algorithm);
        let refs = RefStore::new(Arc::new(MemoryRefBackend::new()), options.hash_algorithm);
        Repository {
            store: ObjectStore::new(Arc::new(MemoryBackend::new())),
            refs,
            hash_kind: options.hash_algorithm,
            index: Mutex::new(Index::new()),
            layout: Layout { git_dir: None, work_dir: None },
            merge_state: Mutex::new(None),
        }
    }

    fn git_dir(&self) -> Option<&PathBuf> {
        self.layout.git_dir.as_ref()
    }

    // ---------------------------------------------------------------- refs & HEAD

    pub async fn head(&self) -> Result<ObjectHash, GitError> {
        self.refs.head().await
    }

    pub async fn set_head(&self, target: HeadTarget) -> Result<(), GitError> {
        self.refs.set_head(target).await
    }

    pub async fn current_branch(&self) -> Result<Option<String>, GitError> {
        self.refs.current_branch().await
    }

    pub async fn resolve_ref(&self, name: &str) -> Result<ObjectHash, GitError> {
        self.refs.resolve(name).await
    }

    pub async fn update_ref(
        &self,
        name: &str,
        expected: Option<ObjectHash>,
        new: ObjectHash,
    ) -> Result<(), GitError> {
        self.refs.update(name, expected, new).await
    }

    pub async fn create_branch(
        &self,
        name: &str,
        at: ObjectHash,
        force: bool,
    ) -> Result<(), GitError> {
        let ref_name = format!("refs/heads/{name}");
        if force {
            let current = self.refs.resolve(&ref_name).await.ok();
            self.refs.update(&ref_name, current, at).await
        } else {
            self.refs.update(&ref_name, None, at).await.map_err(|e| match e {
                GitError::RefUpdateStale(_) => GitError::BranchExists(name.to_string()),
                other => other,
            })
        }
    }

    pub async fn delete_branch(&self, name: &str, force: bool) -> Result<(), GitError> {
        self.refs.delete(&format!("refs/heads/{name}"), force).await
    }

    pub async fn rename_branch(&self, old: &str, new: &str) -> Result<(), GitError> {
        self.refs
            .rename(&format!("refs/heads/{old}"), &format!("refs/heads/{new}"))
            .await
    }

    pub async fn list_branches(&self) -> Result<Vec<String>, GitError> {
        let full = self.refs.list("refs/heads/").await?;
        Ok(full
            .into_iter()
            .map(|name| name.trim_start_matches("refs/heads/").to_string())
            .collect())
    }

    // ---------------------------------------------------------------- index & commit

    /// Stage `content` at `path`, storing it as a blob and recording it (stage 0) in the index.
    pub async fn add(&self, path: impl Into<String>, content: Vec<u8>) -> Result<ObjectHash, GitError> {
        self.add_with_mode(path, content, TreeItemMode::Blob).await
    }

    pub async fn add_with_mode(
        &self,
        path: impl Into<String>,
        content: Vec<u8>,
        mode: TreeItemMode,
    ) -> Result<ObjectHash, GitError> {
        let path = path.into();
        let blob = Blob::new(content);
        let hash = self.store.put(&blob).await?;
        self.index.lock().await.add(IndexEntry::new(path, hash, mode));
        Ok(hash)
    }

    /// Stage a file read from the working directory. Errors with [`GitError::UncommittedChanges`]
    /// phrased as a path problem would be misleading, so a missing working tree surfaces as a
    /// plain I/O error instead.
    pub async fn add_path(&self, rel_path: &str) -> Result<ObjectHash, GitError> {
        let work_dir = self
            .layout
            .work_dir
            .as_ref()
            .ok_or_else(|| GitError::CustomError("repository has no working tree".into()))?;
        let bytes = tokio::fs::read(work_dir.join(rel_path)).await?;
        self.add(rel_path, bytes).await
    }

    pub fn unstage(&self) -> &Mutex<Index> {
        &self.index
    }

    /// Build a commit from the current index, parented on `HEAD` (or parentless for the very
    /// first commit on an unborn branch), and advance the current branch/HEAD to it.
    #[instrument(skip(self, author, committer))]
    pub async fn commit(
        &self,
        message: &str,
        author: Signature,
        committer: Signature,
    ) -> Result<ObjectHash, GitError> {
        let index = self.index.lock().await;
        if !index.conflicted_paths().is_empty() {
            return Err(GitError::UnresolvedConflicts(index.conflicted_paths().join(", ")));
        }
        let tree_id = index.build_tree(&self.store).await?;
        drop(index);

        let parent = self.refs.head().await.ok();
        let parents = parent.into_iter().collect::<Vec<_>>();
        let commit = crate::internal::index::create_commit(
            &self.store,
            tree_id,
            parents.clone(),
            author,
            committer,
            message,
        )
        .await?;

        match self.refs.current_branch().await? {
            Some(branch) => self.refs.update(&branch, parents.first().copied(), commit.id).await?,
            None => self.refs.set_head(HeadTarget::Detached(commit.id)).await?,
        }

        info!(commit = %commit.id, "created commit");
        Ok(commit.id)
    }

    // ---------------------------------------------------------------- checkout

    /// Resolve `target` (a branch name, `refs/...` ref, or raw hash) and move HEAD to it,
    /// materializing its tree into the working directory if one is configured. Detaches HEAD
    /// unless `target` names an existing local branch.
    pub async fn checkout(&self, target: &str) -> Result<(), GitError> {
        let branch_ref = format!("refs/heads/{target}");
        let (hash, head_target) = if self.refs.read(&branch_ref).await?.is_some() {
            (self.refs.resolve(&branch_ref).await?, HeadTarget::Branch(branch_ref))
        } else if let Ok(hash) = self.refs.resolve(target).await {
            (hash, HeadTarget::Detached(hash))
        } else {
            let hash = ObjectHash::from_str_checked(target)?;
            (hash, HeadTarget::Detached(hash))
        };

        self.refs.set_head(head_target).await?;

        if let Some(work_dir) = self.layout.work_dir.clone() {
            let commit = self.store.get_commit(&hash).await?;
            self.write_tree(&commit.tree_id, &work_dir).await?;
        }
        Ok(())
    }

    /// Extract a single file's content at `commit`, writing it into the working tree if one is
    /// configured and always returning the bytes.
    pub async fn checkout_file(&self, commit: ObjectHash, path: &str) -> Result<Vec<u8>, GitError> {
        let commit = self.store.get_commit(&commit).await?;
        let mut tree = self.store.get_tree(&commit.tree_id).await?;
        let mut components: Vec<&str> = path.split('/').collect();
        let last = components
            .pop()
            .ok_or_else(|| GitError::InvalidPathError(path.to_string()))?;
        for component in components {
            match tree.get_by_name(component) {
                Some(item) if item.mode.is_tree() => tree = self.store.get_tree(&item.id).await?,
                _ => return Err(GitError::InvalidPathError(path.to_string())),
            }
        }
        let item = tree
            .get_by_name(last)
            .ok_or_else(|| GitError::InvalidPathError(path.to_string()))?;
        let blob = self.store.get_blob(&item.id).await?;

        if let Some(work_dir) = &self.layout.work_dir {
            let dest = work_dir.join(path);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, &blob.data).await?;
        }
        Ok(blob.data)
    }

    fn write_tree<'a>(
        &'a self,
        tree_hash: &'a ObjectHash,
        dir: &'a std::path::Path,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), GitError>> + Send + 'a>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(dir).await?;
            let tree = self.store.get_tree(tree_hash).await?;
            for item in &tree.tree_items {
                let path = dir.join(&item.name);
                if item.mode.is_tree() {
                    self.write_tree(&item.id, &path).await?;
                } else if matches!(item.mode, TreeItemMode::Commit) {
                    // Submodule entries have no blob content of their own to write out.
                    continue;
                } else {
                    let blob = self.store.get_blob(&item.id).await?;
                    tokio::fs::write(&path, &blob.data).await?;
                    #[cfg(unix)]
                    if item.mode == TreeItemMode::BlobExecutable {
                        use std::os::unix::fs::PermissionsExt;
                        let mut perms = tokio::fs::metadata(&path).await?.permissions();
                        perms.set_mode(0o755);
                        tokio::fs::set_permissions(&path, perms).await?;
                    }
                }
            }
            Ok(())
        })
    }

    // ---------------------------------------------------------------- history

    pub async fn log(&self, start: ObjectHash, opts: &LogOptions) -> Result<Vec<Commit>, GitError> {
        history::log(&self.store, start, opts).await
    }

    pub async fn is_ancestor(&self, ancestor: ObjectHash, descendant: ObjectHash) -> Result<bool, GitError> {
        history::is_ancestor(&self.store, ancestor, descendant).await
    }

    pub async fn commits_between(&self, from: ObjectHash, to: ObjectHash) -> Result<Vec<ObjectHash>, GitError> {
        history::commits_between(&self.store, from, to).await
    }

    pub async fn blame(&self, commit: ObjectHash, path: &str) -> Result<Vec<history::BlameLine>, GitError> {
        history::blame(&self.store, commit, path).await
    }

    pub async fn resolve_short_hash(&self, prefix: &str) -> Result<ObjectHash, GitError> {
        history::resolve_short_hash(&self.store, prefix).await
    }

    // ---------------------------------------------------------------- merge

    /// Merge `their_target` (a branch name, ref, or hash) into the current branch.
    #[instrument(skip(self, options))]
    pub async fn merge(
        &self,
        their_target: &str,
        options: MergeOptions,
    ) -> Result<MergeResult, GitError> {
        let ours = self.refs.head().await?;
        let branch_name = self.refs.current_branch().await?;
        let theirs = self.resolve_target(their_target).await?;

        if ours == theirs {
            return Ok(MergeResult::Merged(self.store.get_commit(&ours).await?.tree_id));
        }

        let base = merge::merge_base(&self.store, ours, theirs).await?;

        if options.allow_fast_forward && base == Some(ours) {
            info!(from = %ours, to = %theirs, "fast-forwarding");
            self.fast_forward_to(theirs, branch_name.as_deref()).await?;
            let tree_id = self.store.get_commit(&theirs).await?.tree_id;
            return Ok(MergeResult::Merged(tree_id));
        }

        let our_tree = self.store.get_commit(&ours).await?.tree_id;
        let their_tree = self.store.get_commit(&theirs).await?.tree_id;
        let base_tree = match base {
            Some(hash) => Some(self.store.get_commit(&hash).await?.tree_id),
            None => None,
        };

        match merge::three_way_merge(&self.store, base_tree, our_tree, their_tree).await? {
            MergeResult::Merged(tree_id) => {
                let author = options.author.unwrap_or_else(default_signature);
                let committer = options.committer.unwrap_or_else(|| author.clone());
                let message = options
                    .message
                    .unwrap_or_else(|| format!("Merge {their_target} into current branch"));
                let commit = crate::internal::index::create_commit(
                    &self.store,
                    tree_id,
                    vec![ours, theirs],
                    author,
                    committer,
                    &message,
                )
                .await?;
                match &branch_name {
                    Some(branch) => self.refs.update(branch, Some(ours), commit.id).await?,
                    None => self.refs.set_head(HeadTarget::Detached(commit.id)).await?,
                }
                Ok(MergeResult::Merged(tree_id))
            }
            MergeResult::Conflicts { conflicts, clean } => {
                warn!(count = conflicts.len(), "merge produced conflicts");
                let mut index = self.index.lock().await;
                for (path, mode, hash) in &clean {
                    index.add(IndexEntry::new(path.clone(), *hash, *mode));
                }
                for conflict in &conflicts {
                    for (stage, side) in [(1u8, conflict.base), (2, conflict.ours), (3, conflict.theirs)] {
                        if let Some(hash) = side {
                            let mut entry =
                                IndexEntry::new(conflict.path.clone(), hash, TreeItemMode::Blob);
                            entry.stage = stage;
                            index.add_conflict_stage(entry);
                        }
                    }
                }
                drop(index);

                let state = ConflictState {
                    our_commit: ours,
                    their_commit: theirs,
                    merge_base: base,
                    branch_name: branch_name.clone(),
                    conflicts: conflicts.clone(),
                };
                self.persist_merge_state(&state, options.message.as_deref()).await?;
                *self.merge_state.lock().await = Some(state);

                Ok(MergeResult::Conflicts { conflicts, clean })
            }
        }
    }

    async fn resolve_target(&self, target: &str) -> Result<ObjectHash, GitError> {
        let branch_ref = format!("refs/heads/{target}");
        if self.refs.read(&branch_ref).await?.is_some() {
            return self.refs.resolve(&branch_ref).await;
        }
        if let Ok(hash) = self.refs.resolve(target).await {
            return Ok(hash);
        }
        ObjectHash::from_str_checked(target)
    }

    async fn fast_forward_to(&self, theirs: ObjectHash, branch_name: Option<&str>) -> Result<(), GitError> {
        match branch_name {
            Some(branch) => {
                let current = self.refs.resolve(branch).await.ok();
                self.refs.update(branch, current, theirs).await?;
            }
            None => self.refs.set_head(HeadTarget::Detached(theirs)).await?,
        }
        if let Some(work_dir) = self.layout.work_dir.clone() {
            let commit = self.store.get_commit(&theirs).await?;
            self.write_tree(&commit.tree_id, &work_dir).await?;
        }
        Ok(())
    }

    async fn persist_merge_state(&self, state: &ConflictState, message: Option<&str>) -> Result<(), GitError> {
        if let Some(git_dir) = self.git_dir() {
            tokio::fs::write(git_dir.join(MERGE_HEAD), format!("{}\n", state.their_commit)).await?;
            tokio::fs::write(
                git_dir.join(MERGE_MSG),
                message.unwrap_or("Merge commit").to_string(),
            )
            .await?;
            tokio::fs::write(
                git_dir.join(MERGE_CONFLICTS),
                state.serialize_conflicts(self.hash_kind),
            )
            .await?;
        }
        Ok(())
    }

    /// Conflicts left over from the in-progress merge, if any.
    pub async fn get_conflicts(&self) -> Result<Vec<Conflict>, GitError> {
        Ok(self
            .merge_state
            .lock()
            .await
            .as_ref()
            .map(|s| s.conflicts.clone())
            .unwrap_or_default())
    }

    /// Resolve one conflicted path, staging the winning content at stage 0 and clearing its
    /// conflict stages.
    pub async fn resolve_conflict(&self, path: &str, strategy: ResolveStrategy) -> Result<(), GitError> {
        let mut guard = self.merge_state.lock().await;
        let state = guard.as_mut().ok_or(GitError::NoMergeInProgress)?;
        let conflict_index = state
            .conflicts
            .iter()
            .position(|c| c.path == path)
            .ok_or_else(|| GitError::InvalidPathError(path.to_string()))?;
        let conflict = state.conflicts.remove(conflict_index);

        let (hash, mode) = match strategy {
            ResolveStrategy::Ours => (
                conflict.ours.ok_or_else(|| GitError::InvalidPathError(path.to_string()))?,
                TreeItemMode::Blob,
            ),
            ResolveStrategy::Theirs => (
                conflict.theirs.ok_or_else(|| GitError::InvalidPathError(path.to_string()))?,
                TreeItemMode::Blob,
            ),
            ResolveStrategy::Manual(bytes) => {
                let blob = Blob::new(bytes);
                (self.store.put(&blob).await?, TreeItemMode::Blob)
            }
        };

        self.index
            .lock()
            .await
            .add(IndexEntry::new(path.to_string(), hash, mode));

        if let Some(git_dir) = self.git_dir() {
            tokio::fs::write(git_dir.join(MERGE_CONFLICTS), state.serialize_conflicts(self.hash_kind)).await?;
        }
        Ok(())
    }

    /// Finish an in-progress merge once every conflict has been resolved, creating the merge
    /// commit from the now-clean index.
    pub async fn continue_merge(&self, committer: Signature) -> Result<ObjectHash, GitError> {
        let state = self
            .merge_state
            .lock()
            .await
            .clone()
            .ok_or(GitError::NoMergeInProgress)?;
        if !state.conflicts.is_empty() {
            let paths: Vec<&str> = state.conflicts.iter().map(|c| c.path.as_str()).collect();
            return Err(GitError::UnresolvedConflicts(paths.join(", ")));
        }

        let message = if let Some(git_dir) = self.git_dir() {
            tokio::fs::read_to_string(git_dir.join(MERGE_MSG))
                .await
                .unwrap_or_else(|_| "Merge commit".to_string())
        } else {
            "Merge commit".to_string()
        };

        let tree_id = self.index.lock().await.build_tree(&self.store).await?;
        let commit = crate::internal::index::create_commit(
            &self.store,
            tree_id,
            vec![state.our_commit, state.their_commit],
            committer.clone(),
            committer,
            message.trim_end(),
        )
        .await?;

        match &state.branch_name {
            Some(branch) => self.refs.update(branch, Some(state.our_commit), commit.id).await?,
            None => self.refs.set_head(HeadTarget::Detached(commit.id)).await?,
        }

        self.clear_merge_state().await?;
        Ok(commit.id)
    }

    /// Abandon an in-progress merge, leaving HEAD and the branch untouched.
    pub async fn abort_merge(&self) -> Result<(), GitError> {
        if self.merge_state.lock().await.is_none() {
            return Err(GitError::NoMergeInProgress);
        }
        self.clear_merge_state().await
    }

    async fn clear_merge_state(&self) -> Result<(), GitError> {
        *self.merge_state.lock().await = None;
        if let Some(git_dir) = self.git_dir() {
            for name in [MERGE_HEAD, MERGE_MSG, MERGE_CONFLICTS] {
                let _ = tokio::fs::remove_file(git_dir.join(name)).await;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------- clone/fetch/push

    /// Clone `remote_url` into a fresh filesystem repository at `dest`.
    #[instrument(skip(options))]
    pub async fn clone(
        remote_url: &str,
        dest: impl Into<PathBuf>,
        options: CloneOptions,
    ) -> Result<Self, GitError> {
        let dest = dest.into();
        if tokio::fs::try_exists(&dest).await? {
            let mut entries = tokio::fs::read_dir(&dest).await?;
            if entries.next_entry().await?.is_some() {
                return Err(GitError::CustomError(format!(
                    "destination {} is not empty",
                    dest.display()
                )));
            }
        }

        let repo = Repository::init(
            &dest,
            InitOptions {
                bare: options.bare,
                initial_branch: "main".to_string(),
                hash_algorithm: HashKind::Sha1,
            },
        )
        .await?;
        repo.clone_into(remote_url, options).await?;
        Ok(repo)
    }

    /// Clone into a purely in-memory repository (no working tree, no git dir on disk).
    pub async fn clone_in_memory(remote_url: &str, options: CloneOptions) -> Result<Self, GitError> {
        let repo = Repository::init_in_memory(InitOptions::default());
        repo.clone_into(remote_url, options).await?;
        Ok(repo)
    }

    async fn clone_into(&self, remote_url: &str, options: CloneOptions) -> Result<(), GitError> {
        let mut client = GitClient::new(remote_url);
        if let Some(auth) = options.auth.clone() {
            client = client.with_auth(auth);
        }
        if let Some(progress) = options.progress.clone() {
            client = client.with_progress(progress);
        }

        let advertisement = client.discover_refs(ServiceType::UploadPack).await?;
        if advertisement.refs.is_empty() {
            info!("cloning empty repository; nothing to fetch");
            return Ok(());
        }

        let target_branch = options
            .branch
            .clone()
            .or_else(|| advertisement.head_target.as_ref().map(|t| branch_short_name(t)))
            .unwrap_or_else(|| "main".to_string());

        let wants: Vec<ObjectHash> = advertisement
            .refs
            .iter()
            .filter_map(|r| ObjectHash::from_str_checked(&r.hash).ok())
            .collect();

        let capabilities = vec![
            Capability::MultiAckDetailed,
            Capability::SideBand64k,
            Capability::ThinPack,
            Capability::OfsDelta,
            Capability::Agent("rgit-core/1.0".to_string()),
        ];
        let pack_bytes = client.fetch_pack(&wants, &[], &capabilities).await?;
        let object_count = self.ingest_pack(&pack_bytes).await?;
        debug!(object_count, "ingested clone packfile");

        for git_ref in &advertisement.refs {
            if git_ref.name == "HEAD" || git_ref.name.ends_with("^{}") {
                continue;
            }
            let Ok(hash) = ObjectHash::from_str_checked(&git_ref.hash) else { continue };
            if let Some(branch) = git_ref.name.strip_prefix("refs/heads/") {
                self.refs
                    .update(&format!("refs/remotes/{}/{branch}", options.remote), None, hash)
                    .await?;
            } else if git_ref.name.starts_with("refs/tags/") {
                self.refs.update(&git_ref.name, None, hash).await?;
            }
        }

        let remote_tracking = format!("refs/remotes/{}/{target_branch}", options.remote);
        if let Ok(tip) = self.refs.resolve(&remote_tracking).await {
            self.refs.update(&format!("refs/heads/{target_branch}"), None, tip).await?;
            self.refs
                .set_head(HeadTarget::Branch(format!("refs/heads/{target_branch}")))
                .await?;
            self.fast_forward_to(tip, Some(&format!("refs/heads/{target_branch}"))).await
                .or(Ok::<(), GitError>(()))
                .ok();
            if let Some(work_dir) = self.layout.work_dir.clone() {
                let commit = self.store.get_commit(&tip).await?;
                self.write_tree(&commit.tree_id, &work_dir).await?;
            }
        }

        Ok(())
    }

    /// Decode `pack_bytes` and store every object it contains, returning how many were newly
    /// written (objects already present are skipped by [`ObjectStore::put`]'s idempotence).
    async fn ingest_pack(&self, pack_bytes: &[u8]) -> Result<usize, GitError> {
        let mut pack = Pack::new(None, None, None, true);
        let mut cursor = std::io::Cursor::new(pack_bytes.to_vec());
        let entries = Arc::new(std::sync::Mutex::new(Vec::<Entry>::new()));
        let collected = entries.clone();
        pack.decode(
            &mut cursor,
            move |meta: crate::internal::metadata::MetaAttached<Entry, _>| {
                collected.lock().unwrap().push(meta.inner);
            },
            None::<fn(ObjectHash)>,
        )?;

        let entries = Arc::try_unwrap(entries)
            .map_err(|_| GitError::CustomError("pack decode callback outlived decode()".into()))?
            .into_inner()
            .map_err(|_| GitError::CustomError("pack entry collector lock poisoned".into()))?;

        let mut count = 0;
        for entry in entries {
            let already_present = self.store.has(&entry.hash).await?;
            match entry.obj_type {
                ObjectType::Blob => {
                    self.store.put(&Blob::from_bytes(&entry.data, entry.hash)?).await?;
                }
                ObjectType::Tree => {
                    self.store.put(&Tree::from_bytes(&entry.data, entry.hash)?).await?;
                }
                ObjectType::Commit => {
                    self.store.put(&Commit::from_bytes(&entry.data, entry.hash)?).await?;
                }
                ObjectType::Tag => {
                    self.store
                        .put(&crate::internal::object::tag::Tag::from_bytes(&entry.data, entry.hash)?)
                        .await?;
                }
                ObjectType::OffsetDelta | ObjectType::HashDelta => {
                    return Err(GitError::DeltaChainUnresolvable(
                        "delta entry escaped pack resolution".into(),
                    ));
                }
            }
            if !already_present {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Fetch updates from `remote` per `options.refspecs` (defaulting to every branch under
    /// `refs/remotes/<remote>/*`), storing new objects and updating remote-tracking refs.
    #[instrument(skip(self, options))]
    pub async fn fetch(&self, options: FetchOptions) -> Result<FetchOutcome, GitError> {
        let remote_url = self.remote_url(&options.remote).await?;
        let mut client = GitClient::new(&remote_url);
        if let Some(auth) = options.auth.clone() {
            client = client.with_auth(auth);
        }
        if let Some(progress) = options.progress.clone() {
            client = client.with_progress(progress);
        }

        let advertisement = client.discover_refs(ServiceType::UploadPack).await?;
        let refspecs = if options.refspecs.is_empty() {
            vec![format!("+refs/heads/*:refs/remotes/{}/*", options.remote)]
        } else {
            options.refspecs.clone()
        };
        let updates = expand_refspecs(&refspecs, &advertisement.refs);

        let mut wants = Vec::new();
        let mut planned = Vec::new();
        for update in &updates {
            let Ok(new_hash) = ObjectHash::from_str_checked(&update.remote_hash) else { continue };
            let current = self.refs.resolve(&update.local_ref).await.ok();
            if current == Some(new_hash) {
                continue;
            }
            if let Some(current_hash) = current {
                let is_ff = history::is_ancestor(&self.store, current_hash, new_hash)
                    .await
                    .unwrap_or(false);
                if !is_ff && !update.force && !options.force {
                    return Err(GitError::NonFastForward(update.local_ref.clone()));
                }
            }
            wants.push(new_hash);
            planned.push((update.local_ref.clone(), current, new_hash));
        }

        if wants.is_empty() {
            return Ok(FetchOutcome::default());
        }

        let mut haves: HashSet<ObjectHash> = HashSet::new();
        for branch in self.refs.list("refs/heads/").await? {
            if let Ok(hash) = self.refs.resolve(&branch).await {
                haves.insert(hash);
            }
        }
        for tracking in self.refs.list("refs/remotes/").await? {
            if let Ok(hash) = self.refs.resolve(&tracking).await {
                haves.insert(hash);
            }
        }

        let capabilities = vec![
            Capability::MultiAckDetailed,
            Capability::SideBand64k,
            Capability::ThinPack,
            Capability::OfsDelta,
            Capability::Agent("rgit-core/1.0".to_string()),
        ];
        let pack_bytes = client
            .fetch_pack(&wants, &haves.into_iter().collect::<Vec<_>>(), &capabilities)
            .await?;
        let object_count = self.ingest_pack(&pack_bytes).await?;

        let mut updated_refs = Vec::new();
        for (local_ref, expected, new_hash) in planned {
            self.refs.update(&local_ref, expected, new_hash).await?;
            updated_refs.push(local_ref);
        }

        if options.prune {
            let advertised: HashSet<&str> =
                advertisement.refs.iter().map(|r| r.name.as_str()).collect();
            for tracking in self.refs.list(&format!("refs/remotes/{}/", options.remote)).await? {
                let branch = tracking.trim_start_matches(&format!("refs/remotes/{}/", options.remote));
                if !advertised.contains(format!("refs/heads/{branch}").as_str()) {
                    self.refs.delete(&tracking, true).await?;
                }
            }
        }

        info!(object_count, updated = updated_refs.len(), "fetch complete");
        Ok(FetchOutcome { updated_refs, object_count })
    }

    /// Fetch `branch` from `remote` and fast-forward or merge the local branch of the same name.
    pub async fn pull(
        &self,
        remote: &str,
        branch: &str,
        ff_only: bool,
    ) -> Result<PullOutcome, GitError> {
        self.fetch(FetchOptions {
            remote: remote.to_string(),
            refspecs: vec![format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}")],
            ..FetchOptions::new()
        })
        .await?;

        let local_ref = format!("refs/heads/{branch}");
        let remote_tip = self.refs.resolve(&format!("refs/remotes/{remote}/{branch}")).await?;
        let local_tip = match self.refs.resolve(&local_ref).await {
            Ok(hash) => hash,
            Err(GitError::RefNotFound(_)) => {
                self.refs.update(&local_ref, None, remote_tip).await?;
                return Ok(PullOutcome::FastForwarded(remote_tip));
            }
            Err(e) => return Err(e),
        };

        if local_tip == remote_tip {
            return Ok(PullOutcome::UpToDate);
        }
        if history::is_ancestor(&self.store, local_tip, remote_tip).await? {
            self.fast_forward_to(remote_tip, Some(&local_ref)).await?;
            return Ok(PullOutcome::FastForwarded(remote_tip));
        }
        if ff_only {
            return Err(GitError::NonFastForward(local_ref));
        }

        match self.merge(&format!("refs/remotes/{remote}/{branch}"), MergeOptions::new()).await? {
            MergeResult::Merged(tree_id) => {
                let commit = self.refs.resolve(&local_ref).await?;
                let _ = tree_id;
                Ok(PullOutcome::Merged(commit))
            }
            MergeResult::Conflicts { conflicts, .. } => Ok(PullOutcome::Conflicts(conflicts)),
        }
    }

    /// Push the current branch (or `options.refspecs`) to `remote`.
    #[instrument(skip(self, options))]
    pub async fn push(&self, options: PushOptions) -> Result<Vec<PushResult>, GitError> {
        let remote_url = self.remote_url(&options.remote).await?;
        let mut client = GitClient::new(&remote_url);
        if let Some(auth) = options.auth.clone() {
            client = client.with_auth(auth);
        }
        if let Some(progress) = options.progress.clone() {
            client = client.with_progress(progress);
        }

        let advertisement = client.discover_refs(ServiceType::ReceivePack).await?;
        let advertised: HashMap<&str, &str> = advertisement
            .refs
            .iter()
            .map(|r| (r.name.as_str(), r.hash.as_str()))
            .collect();
        let known: HashSet<ObjectHash> = advertisement
            .refs
            .iter()
            .filter_map(|r| ObjectHash::from_str_checked(&r.hash).ok())
            .collect();

        let refspecs = if options.refspecs.is_empty() {
            let current = self
                .refs
                .current_branch()
                .await?
                .ok_or_else(|| GitError::CustomError("HEAD is detached; no default push target".into()))?;
            vec![format!("{current}:{current}")]
        } else {
            options.refspecs.clone()
        };

        let zero = ObjectHash::zero_str(self.hash_kind);
        let mut commands = Vec::new();
        let mut new_tips = Vec::new();
        for refspec in &refspecs {
            let (force, refspec) = match refspec.strip_prefix('+') {
                Some(rest) => (true, rest),
                None => (false, refspec.as_str()),
            };
            if let Some(delete_target) = refspec.strip_prefix(':') {
                let old = advertised.get(delete_target).map(|s| s.to_string()).unwrap_or_else(|| zero.clone());
                commands.push(RefCommand::new(old, zero.clone(), delete_target.to_string()));
                continue;
            }
            let (src, dst) = refspec.split_once(':').unwrap_or((refspec, refspec));
            let new_hash = self.refs.resolve(src).await?;
            let old = advertised.get(dst).map(|s| s.to_string()).unwrap_or_else(|| zero.clone());

            if let Ok(old_hash) = ObjectHash::from_str_checked(&old) {
                let is_ff = history::is_ancestor(&self.store, old_hash, new_hash).await.unwrap_or(false);
                if !is_ff && !force && !options.force {
                    return Err(GitError::NonFastForward(dst.to_string()));
                }
            }
            commands.push(RefCommand::new(old, new_hash.to_string(), dst.to_string()));
            new_tips.push((dst.to_string(), new_hash));
        }

        let roots: Vec<ObjectHash> = new_tips.iter().map(|(_, hash)| *hash).collect();
        let entries = self.collect_closure(&roots, &known).await?;
        let pack_data = self.encode_pack(entries).await?;

        let capabilities = vec![
            Capability::ReportStatus,
            Capability::SideBand64k,
            Capability::OfsDelta,
            Capability::Agent("rgit-core/1.0".to_string()),
        ];
        let results = client.send_pack(&commands, &pack_data, &capabilities).await?;

        for result in &results {
            if result.ok {
                if let Some((_, hash)) = new_tips.iter().find(|(name, _)| name == &result.ref_name) {
                    let tracking = format!("refs/remotes/{}/{}", options.remote, branch_short_name(&result.ref_name));
                    let current = self.refs.resolve(&tracking).await.ok();
                    self.refs.update(&tracking, current, *hash).await?;
                }
            }
        }

        info!(refs = results.len(), "push complete");
        Ok(results)
    }

    /// BFS the commit/tree/blob graph reachable from `roots`, skipping anything in `known`
    /// (objects the remote already advertised), matching the teacher's `PackGenerator` object
    /// closure walk in `protocol::pack`.
    async fn collect_closure(
        &self,
        roots: &[ObjectHash],
        known: &HashSet<ObjectHash>,
    ) -> Result<Vec<Entry>, GitError> {
        let mut visited: HashSet<ObjectHash> = known.clone();
        let mut queue: VecDeque<ObjectHash> = roots.iter().copied().collect();
        let mut entries = Vec::new();

        while let Some(hash) = queue.pop_front() {
            if !visited.insert(hash) {
                continue;
            }
            if known.contains(&hash) {
                continue;
            }
            let commit = self.store.get_commit(&hash).await?;
            for parent in &commit.parent_commit_ids {
                if !visited.contains(parent) {
                    queue.push_back(*parent);
                }
            }
            self.collect_tree_closure(commit.tree_id, &mut visited, &mut entries).await?;
            entries.push(Entry::from(commit));
        }
        Ok(entries)
    }

    fn collect_tree_closure<'a>(
        &'a self,
        tree_hash: ObjectHash,
        visited: &'a mut HashSet<ObjectHash>,
        entries: &'a mut Vec<Entry>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), GitError>> + Send + 'a>> {
        Box::pin(async move {
            if !visited.insert(tree_hash) {
                return Ok(());
            }
            let tree = self.store.get_tree(&tree_hash).await?;
            for item in &tree.tree_items {
                if item.mode.is_tree() {
                    self.collect_tree_closure(item.id, visited, entries).await?;
                } else if !visited.contains(&item.id) && !matches!(item.mode, TreeItemMode::Commit) {
                    visited.insert(item.id);
                    let blob = self.store.get_blob(&item.id).await?;
                    entries.push(Entry::from(blob));
                }
            }
            entries.push(Entry::from(tree));
            Ok(())
        })
    }

    async fn encode_pack(&self, entries: Vec<Entry>) -> Result<Vec<u8>, GitError> {
        let (pack_tx, mut pack_rx) = tokio::sync::mpsc::channel(1024);
        let (entry_tx, entry_rx) = tokio::sync::mpsc::channel(1024);
        let mut encoder = crate::internal::pack::encode::PackEncoder::new(entries.len(), 10, pack_tx);

        let encode_task = tokio::spawn(async move { encoder.encode(entry_rx).await });
        for entry in entries {
            if entry_tx.send(entry).await.is_err() {
                break;
            }
        }
        drop(entry_tx);

        let mut pack_data = Vec::new();
        while let Some(chunk) = pack_rx.recv().await {
            pack_data.extend_from_slice(&chunk);
        }
        encode_task
            .await
            .map_err(|e| GitError::CustomError(e.to_string()))??;
        Ok(pack_data)
    }

    /// Resolve a configured remote's URL. Without a persisted git-config reader, this crate
    /// tracks remotes as a plain `refs/remotes/<name>` sibling file `url` under the git dir;
    /// in-memory repositories must pass a full URL as the remote name instead.
    async fn remote_url(&self, remote: &str) -> Result<String, GitError> {
        if remote.contains("://") {
            return Ok(remote.to_string());
        }
        if let Some(git_dir) = self.git_dir() {
            let path = git_dir.join("remotes").join(remote);
            if let Ok(content) = tokio::fs::read_to_string(&path).await {
                return Ok(content.trim().to_string());
            }
        }
        Err(GitError::CustomError(format!(
            "no URL configured for remote `{remote}`; pass a URL directly or call set_remote_url first"
        )))
    }

    /// Record a remote's URL so later `fetch`/`push` calls can refer to it by name.
    pub async fn set_remote_url(&self, remote: &str, url: &str) -> Result<(), GitError> {
        if let Some(git_dir) = self.git_dir() {
            let dir = git_dir.join("remotes");
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join(remote), format!("{url}\n")).await?;
        }
        Ok(())
    }
}

/// Planned local-ref update coming out of refspec expansion against a remote's advertisement.
struct PlannedUpdate {
    local_ref: String,
    remote_hash: String,
    force: bool,
}

/// Expand `[+]src:dst` refspecs (with at most one `*` wildcard per side, substituted
/// positionally) against the remote's advertised refs.
fn expand_refspecs(refspecs: &[String], advertised: &[GitRef]) -> Vec<PlannedUpdate> {
    let mut updates = Vec::new();
    for spec in refspecs {
        let (force, spec) = match spec.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, spec.as_str()),
        };
        let (src, dst) = spec.split_once(':').unwrap_or((spec, spec));

        if let Some(src_prefix) = src.strip_suffix('*') {
            let dst_prefix = dst.strip_suffix('*').unwrap_or(dst);
            for git_ref in advertised {
                if let Some(suffix) = git_ref.name.strip_prefix(src_prefix) {
                    updates.push(PlannedUpdate {
                        local_ref: format!("{dst_prefix}{suffix}"),
                        remote_hash: git_ref.hash.clone(),
                        force,
                    });
                }
            }
        } else if let Some(git_ref) = advertised.iter().find(|r| r.name == src) {
            updates.push(PlannedUpdate {
                local_ref: dst.to_string(),
                remote_hash: git_ref.hash.clone(),
                force,
            });
        }
    }
    updates
}

fn branch_short_name(ref_name: &str) -> String {
    ref_name.trim_start_matches("refs/heads/").to_string()
}

fn default_signature() -> Signature {
    Signature::new_at(
        crate::internal::object::signature::SignatureType::Author,
        "rgit".to_string(),
        "rgit@localhost".to_string(),
        0,
        0,
    )
}

/// Peek at an existing repository's `objects/` directory to recover its hash width when `HEAD`
/// is symbolic (and so carries no hash to read the width from directly).
async fn detect_hash_kind(git_dir: &std::path::Path) -> Option<HashKind> {
    let mut entries = tokio::fs::read_dir(git_dir.join("objects")).await.ok()?;
    while let Ok(Some(shard)) = entries.next_entry().await {
        let name = shard.file_name();
        let name = name.to_string_lossy();
        if name.len() != 2 {
            continue;
        }
        let mut inner = tokio::fs::read_dir(shard.path()).await.ok()?;
        if let Ok(Some(object)) = inner.next_entry().await {
            let hex_len = name.len() + object.file_name().to_string_lossy().len();
            return match hex_len {
                40 => Some(HashKind::Sha1),
                64 => Some(HashKind::Sha256),
                _ => None,
            };
        }
    }
    None
}

impl ObjectHash {
    /// Parse a hex hash, mapping the string-keyed parse error onto the crate's error enum.
    fn from_str_checked(s: &str) -> Result<ObjectHash, GitError> {
        s.parse::<ObjectHash>().map_err(GitError::FormatError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::set_hash_kind_for_test;
    use crate::internal::object::signature::SignatureType;

    fn sig() -> Signature {
        Signature::new_at(SignatureType::Author, "A".into(), "a@example.com".into(), 1_700_000_000, 0)
    }

    #[tokio::test]
    async fn init_in_memory_starts_on_an_unborn_branch() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let repo = Repository::init_in_memory(InitOptions::new());
        assert_eq!(
            repo.current_branch().await.unwrap(),
            Some("refs/heads/main".to_string())
        );
        assert!(matches!(repo.head().await, Err(GitError::RefNotFound(_))));
    }

    #[tokio::test]
    async fn add_then_commit_advances_the_current_branch() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let repo = Repository::init_in_memory(InitOptions::new());
        repo.add("a.txt", b"hello".to_vec()).await.unwrap();
        let commit_id = repo.commit("initial", sig(), sig()).await.unwrap();
        assert_eq!(repo.head().await.unwrap(), commit_id);

        let commit = repo.store.get_commit(&commit_id).await.unwrap();
        assert!(commit.parent_commit_ids.is_empty());

        repo.add("b.txt", b"world".to_vec()).await.unwrap();
        let second = repo.commit("second", sig(), sig()).await.unwrap();
        let second_commit = repo.store.get_commit(&second).await.unwrap();
        assert_eq!(second_commit.parent_commit_ids, vec![commit_id]);
    }

    #[tokio::test]
    async fn branch_lifecycle_matches_s6() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let repo = Repository::init_in_memory(InitOptions::new());
        repo.add("a.txt", b"hi".to_vec()).await.unwrap();
        let h = repo.commit("c1", sig(), sig()).await.unwrap();

        repo.create_branch("main", h, true).await.unwrap();
        repo.create_branch("feature", h, false).await.unwrap();
        repo.rename_branch("feature", "development").await.unwrap();

        repo.set_head(HeadTarget::Branch("refs/heads/development".to_string()))
            .await
            .unwrap();
        assert!(matches!(
            repo.delete_branch("development", false).await.unwrap_err(),
            GitError::RefIsCheckedOut(_)
        ));

        repo.set_head(HeadTarget::Branch("refs/heads/main".to_string())).await.unwrap();
        repo.delete_branch("development", false).await.unwrap();

        assert_eq!(repo.list_branches().await.unwrap(), vec!["main".to_string()]);
    }

    #[tokio::test]
    async fn merge_with_no_divergence_is_a_no_op() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let repo = Repository::init_in_memory(InitOptions::new());
        repo.add("a.txt", b"hi".to_vec()).await.unwrap();
        let h = repo.commit("c1", sig(), sig()).await.unwrap();
        repo.create_branch("main", h, true).await.unwrap();
        repo.set_head(HeadTarget::Branch("refs/heads/main".to_string())).await.unwrap();

        let result = repo.merge(&h.to_string(), MergeOptions::new()).await.unwrap();
        assert!(matches!(result, MergeResult::Merged(_)));
    }

    #[test]
    fn refspec_expansion_matches_wildcard_pattern() {
        let advertised = vec![
            GitRef { name: "refs/heads/main".into(), hash: "a".repeat(40) },
            GitRef { name: "refs/heads/dev".into(), hash: "b".repeat(40) },
        ];
        let updates = expand_refspecs(&["+refs/heads/*:refs/remotes/origin/*".to_string()], &advertised);
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().any(|u| u.local_ref == "refs/remotes/origin/main"));
        assert!(updates.iter().any(|u| u.local_ref == "refs/remotes/origin/dev"));
        assert!(updates.iter().all(|u| u.force));
    }
}
