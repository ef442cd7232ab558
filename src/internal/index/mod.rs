//! The staging index: the flat set of `(path, stage)` entries a working tree's changes are
//! recorded into before `commit` folds them into a tree object.
//!
//! Stage 0 is the ordinary, non-conflicted entry for a path. Stages 1/2/3 (base/ours/theirs)
//! hold a path's three versions while a merge conflict over it is unresolved; [`Index::add`]
//! clears any stray 1/2/3 entries for a path the moment a stage-0 entry is written for it,
//! mirroring how resolving a conflict by staging a file clears its conflict entries.

use std::collections::BTreeMap;

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::{
        object::{
            commit::Commit,
            signature::Signature,
            tree::{Tree, TreeItem, TreeItemMode},
        },
        store::ObjectStore,
    },
};

/// A single staged file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: String,
    pub hash: ObjectHash,
    pub mode: TreeItemMode,
    /// 0 for a normal entry; 1/2/3 (base/ours/theirs) while a conflict over this path is open.
    pub stage: u8,
    pub mtime: i64,
    pub ctime: i64,
    pub size: u64,
}

impl IndexEntry {
    pub fn new(path: impl Into<String>, hash: ObjectHash, mode: TreeItemMode) -> Self {
        IndexEntry {
            path: path.into(),
            hash,
            mode,
            stage: 0,
            mtime: 0,
            ctime: 0,
            size: 0,
        }
    }
}

/// The staged entry set, keyed by `(path, stage)` so conflicted paths can hold up to four
/// simultaneous entries (one resolved-away stage-0 plus base/ours/theirs) without colliding.
#[derive(Debug, Clone, Default)]
pub struct Index {
    entries: BTreeMap<(String, u8), IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Index::default()
    }

    /// Stage a normal (stage-0) entry, replacing any prior value and clearing any leftover
    /// conflict stages for the same path.
    pub fn add(&mut self, entry: IndexEntry) {
        let path = entry.path.clone();
        for stage in 1..=3 {
            self.entries.remove(&(path.clone(), stage));
        }
        self.entries.insert((path, 0), entry);
    }

    /// Stage one side (1/2/3) of a conflicted path.
    pub fn add_conflict_stage(&mut self, entry: IndexEntry) {
        debug_assert!((1..=3).contains(&entry.stage));
        self.entries
            .insert((entry.path.clone(), entry.stage), entry);
    }

    pub fn remove(&mut self, path: &str) {
        for stage in 0..=3 {
            self.entries.remove(&(path.to_string(), stage));
        }
    }

    /// The stage-0 entry for `path`, if present and unconflicted.
    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.entries.get(&(path.to_string(), 0))
    }

    /// All stages (including conflict stages) recorded for `path`.
    pub fn get_all_stages(&self, path: &str) -> Vec<&IndexEntry> {
        (0..=3)
            .filter_map(|stage| self.entries.get(&(path.to_string(), stage)))
            .collect()
    }

    /// Every path that currently has a conflict (a stage 1, 2, or 3 entry).
    pub fn conflicted_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .entries
            .keys()
            .filter(|(_, stage)| *stage != 0)
            .map(|(path, _)| path.clone())
            .collect();
        paths.dedup();
        paths
    }

    /// Stage-0 entries only, in path order.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries
            .iter()
            .filter(|((_, stage), _)| *stage == 0)
            .map(|(_, entry)| entry)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold the staged (stage-0) entries into a tree, storing every intermediate subtree along
    /// the way. Entries are partitioned by their path's leading component and recursed on,
    /// bottom-up, so a path `a/b/c.txt` produces (and stores) trees for `a/b` and `a` before the
    /// commit's root tree.
    pub async fn build_tree(&self, store: &ObjectStore) -> Result<ObjectHash, GitError> {
        let paths: Vec<(String, TreeItemMode, ObjectHash)> = self
            .entries()
            .map(|e| (e.path.clone(), e.mode, e.hash))
            .collect();
        build_tree_from_paths(store, &paths).await
    }
}

/// Build (and store) a tree directly from a flat `(path, mode, hash)` list, bypassing the
/// staging index. Used by the merge engine to materialize a merged tree from its own computed
/// path set.
pub async fn build_tree_from_entries(
    store: &ObjectStore,
    paths: &[(String, TreeItemMode, ObjectHash)],
) -> Result<ObjectHash, GitError> {
    build_tree_from_paths(store, paths).await
}

fn build_tree_from_paths<'a>(
    store: &'a ObjectStore,
    paths: &'a [(String, TreeItemMode, ObjectHash)],
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ObjectHash, GitError>> + Send + 'a>>
{
    Box::pin(async move {
        let mut direct: Vec<TreeItem> = Vec::new();
        let mut subdirs: BTreeMap<String, Vec<(String, TreeItemMode, ObjectHash)>> = BTreeMap::new();

        for (path, mode, hash) in paths {
            match path.split_once('/') {
                None => direct.push(TreeItem::new(*mode, *hash, path.clone())),
                Some((top, rest)) => subdirs
                    .entry(top.to_string())
                    .or_default()
                    .push((rest.to_string(), *mode, *hash)),
            }
        }

        for (dir_name, sub_paths) in subdirs {
            let sub_hash = build_tree_from_paths(store, &sub_paths).await?;
            direct.push(TreeItem::new(TreeItemMode::Tree, sub_hash, dir_name));
        }

        let tree = Tree::from_tree_items(direct)?;
        store.put(&tree).await?;
        Ok(tree.id)
    })
}

/// Build and store a commit object from a tree hash, recording it in `store`.
pub async fn create_commit(
    store: &ObjectStore,
    tree_id: ObjectHash,
    parents: Vec<ObjectHash>,
    author: Signature,
    committer: Signature,
    message: &str,
) -> Result<Commit, GitError> {
    let commit = Commit::new(author, committer, tree_id, parents, message);
    store.put(&commit).await?;
    Ok(commit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hash::{HashKind, set_hash_kind_for_test},
        internal::{object::signature::SignatureType, store::MemoryBackend},
    };
    use std::sync::Arc;

    fn sig() -> Signature {
        Signature::new_at(
            SignatureType::Author,
            "A U Thor".into(),
            "a@example.com".into(),
            1_700_000_000,
            0,
        )
    }

    #[tokio::test]
    async fn build_tree_nests_by_path_component() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));

        let mut index = Index::new();
        index.add(IndexEntry::new(
            "README.md",
            ObjectHash::new(b"readme"),
            TreeItemMode::Blob,
        ));
        index.add(IndexEntry::new(
            "src/lib.rs",
            ObjectHash::new(b"lib"),
            TreeItemMode::Blob,
        ));
        index.add(IndexEntry::new(
            "src/bin/main.rs",
            ObjectHash::new(b"main"),
            TreeItemMode::Blob,
        ));

        let root_hash = index.build_tree(&store).await.unwrap();
        let root = store.get_tree(&root_hash).await.unwrap();
        assert_eq!(root.tree_items.len(), 2);

        let src_item = root.get_by_name("src").unwrap();
        assert!(src_item.mode.is_tree());
        let src_tree = store.get_tree(&src_item.id).await.unwrap();
        assert_eq!(src_tree.tree_items.len(), 2);
    }

    #[tokio::test]
    async fn adding_a_resolved_entry_clears_conflict_stages() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let mut index = Index::new();
        let mut base = IndexEntry::new("a.txt", ObjectHash::new(b"base"), TreeItemMode::Blob);
        base.stage = 1;
        index.add_conflict_stage(base);
        assert_eq!(index.conflicted_paths(), vec!["a.txt".to_string()]);

        index.add(IndexEntry::new("a.txt", ObjectHash::new(b"resolved"), TreeItemMode::Blob));
        assert!(index.conflicted_paths().is_empty());
        assert_eq!(index.get("a.txt").unwrap().hash, ObjectHash::new(b"resolved"));
    }

    #[tokio::test]
    async fn create_commit_stores_and_returns_commit() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));
        let mut index = Index::new();
        index.add(IndexEntry::new("a.txt", ObjectHash::new(b"a"), TreeItemMode::Blob));
        let tree_id = index.build_tree(&store).await.unwrap();

        let commit = create_commit(&store, tree_id, vec![], sig(), sig(), "initial commit")
            .await
            .unwrap();
        assert_eq!(commit.tree_id, tree_id);
        assert!(store.get_commit(&commit.id).await.is_ok());
    }
}
