//! Merge-base discovery and three-way tree merge.
//!
//! `merge_base` walks the commit DAG with the same BFS shape [`history`](crate::history) uses
//! for `log`/`is_ancestor`, just tracking which side(s) of the merge have reached each commit.
//! `three_way_merge` flattens both trees (and the base, if any) to `path -> (mode, hash)` maps
//! and classifies every path by how base/ours/theirs agree or disagree on it; content conflicts
//! fall through to a line-level three-way merge built on [`compute_diff`](crate::diff::compute_diff).

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::{
    diff::{DiffOperation, compute_diff},
    errors::GitError,
    hash::ObjectHash,
    internal::{
        object::tree::TreeItemMode,
        store::ObjectStore,
    },
};

const SIDE_OURS: u8 = 0b01;
const SIDE_THEIRS: u8 = 0b10;
const SIDE_BOTH: u8 = SIDE_OURS | SIDE_THEIRS;

/// Find a common ancestor of `a` and `b`. Criss-cross merge histories can have more than one
/// best common ancestor; this returns one of them (never a merge-base that is itself an
/// ancestor of some other valid merge-base), which is all three-way merge needs.
pub async fn merge_base(
    store: &ObjectStore,
    a: ObjectHash,
    b: ObjectHash,
) -> Result<Option<ObjectHash>, GitError> {
    if a == b {
        return Ok(Some(a));
    }

    let mut flags: HashMap<ObjectHash, u8> = HashMap::new();
    let mut queue: VecDeque<ObjectHash> = VecDeque::new();
    flags.insert(a, SIDE_OURS);
    queue.push_back(a);
    *flags.entry(b).or_insert(0) |= SIDE_THEIRS;
    queue.push_back(b);

    let mut candidates: Vec<ObjectHash> = Vec::new();
    while let Some(hash) = queue.pop_front() {
        let flags_here = *flags.get(&hash).unwrap_or(&0);
        if flags_here == SIDE_BOTH && !candidates.contains(&hash) {
            candidates.push(hash);
        }

        let commit = store.get_commit(&hash).await?;
        for parent in commit.parent_commit_ids {
            let existing = *flags.get(&parent).unwrap_or(&0);
            let merged = existing | flags_here;
            if merged != existing {
                flags.insert(parent, merged);
                queue.push_back(parent);
            }
        }
    }

    if candidates.len() <= 1 {
        return Ok(candidates.into_iter().next());
    }

    // Drop any candidate that is itself an ancestor of another candidate, keeping the most
    // recent ones.
    let mut best = Vec::new();
    for (i, candidate) in candidates.iter().enumerate() {
        let mut is_ancestor_of_other = false;
        for (j, other) in candidates.iter().enumerate() {
            if i != j && crate::history::is_ancestor(store, *candidate, *other).await? {
                is_ancestor_of_other = true;
                break;
            }
        }
        if !is_ancestor_of_other {
            best.push(*candidate);
        }
    }
    Ok(best.into_iter().next().or_else(|| candidates.into_iter().next()))
}

/// Why a path could not be merged automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both sides modified the same lines of a text file differently.
    Content,
    /// One side deleted a path the other side modified.
    Delete,
    /// Both sides independently added the same path with different content.
    Add,
    /// A content conflict in a file that isn't valid UTF-8 text, so no line-level merge applies.
    Binary,
}

#[derive(Debug, Clone)]
pub struct Conflict {
    pub path: String,
    pub kind: ConflictKind,
    pub base: Option<ObjectHash>,
    pub ours: Option<ObjectHash>,
    pub theirs: Option<ObjectHash>,
}

#[derive(Debug)]
pub enum MergeResult {
    /// Merge completed with no conflicts; carries the hash of the merged tree.
    Merged(ObjectHash),
    /// One or more paths need manual resolution. `clean` carries every path that merged
    /// automatically despite the conflicts elsewhere, so a caller staging the result into an
    /// index doesn't lose those changes while the conflicted paths are worked out.
    Conflicts {
        conflicts: Vec<Conflict>,
        clean: Vec<(String, TreeItemMode, ObjectHash)>,
    },
}

type FlatTree = BTreeMap<String, (TreeItemMode, ObjectHash)>;

/// Flatten a tree to `path -> (mode, blob/subtree hash)` for every leaf (blob or symlink;
/// submodule entries are kept as opaque leaves too, since merging them is a hash comparison).
async fn flatten_tree(store: &ObjectStore, tree_hash: ObjectHash) -> Result<FlatTree, GitError> {
    let mut out = BTreeMap::new();
    flatten_into(store, tree_hash, "", &mut out).await?;
    Ok(out)
}

fn flatten_into<'a>(
    store: &'a ObjectStore,
    tree_hash: ObjectHash,
    prefix: &'a str,
    out: &'a mut FlatTree,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), GitError>> + Send + 'a>> {
    Box::pin(async move {
        let tree = store.get_tree(&tree_hash).await?;
        for item in &tree.tree_items {
            let path = if prefix.is_empty() {
                item.name.clone()
            } else {
                format!("{prefix}/{}", item.name)
            };
            if item.mode.is_tree() {
                flatten_into(store, item.id, &path, out).await?;
            } else {
                out.insert(path, (item.mode, item.id));
            }
        }
        Ok(())
    })
}

/// Three-way merge of `ours` and `theirs` against their common `base` (`None` for a merge with
/// no common history, where every path is treated as independently added on both sides).
pub async fn three_way_merge(
    store: &ObjectStore,
    base: Option<ObjectHash>,
    ours: ObjectHash,
    theirs: ObjectHash,
) -> Result<MergeResult, GitError> {
    let base_map = match base {
        Some(hash) => flatten_tree(store, hash).await?,
        None => BTreeMap::new(),
    };
    let ours_map = flatten_tree(store, ours).await?;
    let theirs_map = flatten_tree(store, theirs).await?;

    let paths: BTreeSet<String> = base_map
        .keys()
        .chain(ours_map.keys())
        .chain(theirs_map.keys())
        .cloned()
        .collect();

    let mut merged_paths: Vec<(String, TreeItemMode, ObjectHash)> = Vec::new();
    let mut conflicts = Vec::new();

    for path in paths {
        let b = base_map.get(&path).copied();
        let o = ours_map.get(&path).copied();
        let t = theirs_map.get(&path).copied();

        match (b, o, t) {
            (_, Some(o), Some(t)) if o == t => merged_paths.push((path, o.0, o.1)),

            // Only one side touched the path relative to base: take whichever changed.
            (Some(b), Some(o), Some(t)) if b == o => merged_paths.push((path, t.0, t.1)),
            (Some(b), Some(o), Some(t)) if b == t => merged_paths.push((path, o.0, o.1)),

            // Both sides changed the path differently: try a line-level merge.
            (Some(base_entry), Some(o), Some(t)) => {
                match merge_blob(store, Some(base_entry.1), o.1, t.1).await? {
                    MergeBlobOutcome::Merged(merged_hash) => {
                        merged_paths.push((path, o.0, merged_hash))
                    }
                    MergeBlobOutcome::Conflict(kind) => conflicts.push(Conflict {
                        path,
                        kind,
                        base: Some(base_entry.1),
                        ours: Some(o.1),
                        theirs: Some(t.1),
                    }),
                }
            }

            // Added independently on both sides.
            (None, Some(o), Some(t)) => conflicts.push(Conflict {
                path,
                kind: ConflictKind::Add,
                base: None,
                ours: Some(o.1),
                theirs: Some(t.1),
            }),

            // Present in base and ours, deleted by theirs.
            (Some(base_entry), Some(o), None) => {
                if base_entry.1 == o.1 {
                    // unchanged by us, deleted by them: delete wins, no entry emitted
                } else {
                    conflicts.push(Conflict {
                        path,
                        kind: ConflictKind::Delete,
                        base: Some(base_entry.1),
                        ours: Some(o.1),
                        theirs: None,
                    });
                }
            }

            // Present in base and theirs, deleted by ours.
            (Some(base_entry), None, Some(t)) => {
                if base_entry.1 == t.1 {
                    // unchanged by them, deleted by us: delete wins
                } else {
                    conflicts.push(Conflict {
                        path,
                        kind: ConflictKind::Delete,
                        base: Some(base_entry.1),
                        ours: None,
                        theirs: Some(t.1),
                    });
                }
            }

            // Deleted on both sides, or only ever existed on one side: nothing to conflict over.
            (Some(_), None, None) => {}
            (None, Some(o), None) => merged_paths.push((path, o.0, o.1)),
            (None, None, Some(t)) => merged_paths.push((path, t.0, t.1)),
            (None, None, None) => unreachable!("path came from at least one of the three maps"),
        }
    }

    if !conflicts.is_empty() {
        return Ok(MergeResult::Conflicts {
            conflicts,
            clean: merged_paths,
        });
    }

    let tree_hash = crate::internal::index::build_tree_from_entries(store, &merged_paths).await?;
    Ok(MergeResult::Merged(tree_hash))
}

/// Outcome of a single blob's three-way merge attempt.
enum MergeBlobOutcome {
    Merged(ObjectHash),
    Conflict(ConflictKind),
}

/// Merge a single blob's content three ways. A side that isn't valid UTF-8 text can't be
/// diffed line-by-line, so that case reports [`ConflictKind::Binary`] without attempting a
/// merge; incompatible text edits report [`ConflictKind::Content`].
async fn merge_blob(
    store: &ObjectStore,
    base: Option<ObjectHash>,
    ours: ObjectHash,
    theirs: ObjectHash,
) -> Result<MergeBlobOutcome, GitError> {
    let base_blob = match base {
        Some(hash) => store.get_blob(&hash).await?.data,
        None => Vec::new(),
    };
    let ours_blob = store.get_blob(&ours).await?.data;
    let theirs_blob = store.get_blob(&theirs).await?.data;

    let (base_text, ours_text, theirs_text) = match (
        String::from_utf8(base_blob),
        String::from_utf8(ours_blob),
        String::from_utf8(theirs_blob),
    ) {
        (Ok(b), Ok(o), Ok(t)) => (b, o, t),
        _ => return Ok(MergeBlobOutcome::Conflict(ConflictKind::Binary)),
    };

    let base_lines: Vec<String> = split_lines(&base_text);
    let ours_lines: Vec<String> = split_lines(&ours_text);
    let theirs_lines: Vec<String> = split_lines(&theirs_text);

    match merge_lines(&base_lines, &ours_lines, &theirs_lines) {
        Some(merged_lines) => {
            let merged_text = merged_lines.join("");
            let blob = crate::internal::object::blob::Blob::new(merged_text.into_bytes());
            store.put(&blob).await?;
            Ok(MergeBlobOutcome::Merged(blob.id))
        }
        None => Ok(MergeBlobOutcome::Conflict(ConflictKind::Content)),
    }
}

/// Split text into lines, keeping trailing newlines attached so the join-back is exact.
fn split_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, _) in text.match_indices('\n') {
        lines.push(text[start..=i].to_string());
        start = i + 1;
    }
    if start < text.len() {
        lines.push(text[start..].to_string());
    }
    lines
}

/// Line-level three-way merge. `compute_diff(base, side)` walks `base` in order, emitting one
/// `Equal`/`Delete` step per base line (so the two diffs stay in lock-step against the same
/// base sequence) with `Insert` steps interleaved wherever a side added lines. `None` means the
/// two sides made incompatible edits to the same region and the caller should conflict.
fn merge_lines(base: &[String], ours: &[String], theirs: &[String]) -> Option<Vec<String>> {
    let ops_ours = compute_diff(base, ours);
    let ops_theirs = compute_diff(base, theirs);

    let mut out = Vec::new();
    let mut io = 0usize;
    let mut it = 0usize;
    let mut conflict = false;

    loop {
        let mut our_inserts = Vec::new();
        while io < ops_ours.len() {
            match &ops_ours[io] {
                DiffOperation::Insert { content, .. } => {
                    our_inserts.push(content.clone());
                    io += 1;
                }
                _ => break,
            }
        }
        let mut their_inserts = Vec::new();
        while it < ops_theirs.len() {
            match &ops_theirs[it] {
                DiffOperation::Insert { content, .. } => {
                    their_inserts.push(content.clone());
                    it += 1;
                }
                _ => break,
            }
        }

        if our_inserts == their_inserts {
            out.extend(our_inserts);
        } else if our_inserts.is_empty() {
            out.extend(their_inserts);
        } else if their_inserts.is_empty() {
            out.extend(our_inserts);
        } else {
            conflict = true;
            out.push("<<<<<<< ours\n".to_string());
            out.extend(our_inserts);
            out.push("=======\n".to_string());
            out.extend(their_inserts);
            out.push(">>>>>>> theirs\n".to_string());
        }

        let (our_step, their_step) = (ops_ours.get(io), ops_theirs.get(it));
        match (our_step, their_step) {
            (None, None) => break,
            (Some(DiffOperation::Equal { .. }), Some(DiffOperation::Equal { .. })) => {
                // Both sides kept this base line: find which base line it is from either side.
                if let DiffOperation::Equal { old_line, .. } = &ops_ours[io] {
                    let idx = old_line - 1;
                    out.push(base[idx].clone());
                }
                io += 1;
                it += 1;
            }
            (Some(DiffOperation::Delete { .. }), Some(DiffOperation::Equal { .. })) => {
                // We deleted, they kept it unchanged: respect the deletion.
                io += 1;
                it += 1;
            }
            (Some(DiffOperation::Equal { .. }), Some(DiffOperation::Delete { .. })) => {
                // They deleted, we kept it unchanged: respect the deletion.
                io += 1;
                it += 1;
            }
            (Some(DiffOperation::Delete { .. }), Some(DiffOperation::Delete { .. })) => {
                // Both deleted the same base line.
                io += 1;
                it += 1;
            }
            _ => {
                // Structurally shouldn't happen: both diffs consume the same base sequence.
                conflict = true;
                break;
            }
        }
    }

    if conflict { None } else { Some(out) }
}

/// Whether `ancestor` can fast-forward onto `descendant`, i.e. `ancestor` is on `descendant`'s
/// first-parent-or-otherwise ancestry chain and merging would need no new commit.
pub async fn can_fast_forward(
    store: &ObjectStore,
    ancestor: ObjectHash,
    descendant: ObjectHash,
) -> Result<bool, GitError> {
    if ancestor == descendant {
        return Ok(true);
    }
    crate::history::is_ancestor(store, ancestor, descendant).await
}

/// Persisted state of an in-progress merge (written to `MERGE_HEAD`/`MERGE_MSG`/
/// `MERGE_CONFLICTS` by the caller), letting `continue_merge`/`abort_merge` resume or unwind it
/// across process restarts.
#[derive(Debug, Clone)]
pub struct ConflictState {
    pub our_commit: ObjectHash,
    pub their_commit: ObjectHash,
    pub merge_base: Option<ObjectHash>,
    pub branch_name: Option<String>,
    pub conflicts: Vec<Conflict>,
}

impl ConflictState {
    /// Serialize conflicts as `MERGE_CONFLICTS` lines: `<path>\t<base>\t<ours>\t<theirs>`, using
    /// the all-zero hash for a missing side (the delete/add cases).
    pub fn serialize_conflicts(&self, hash_kind: crate::hash::HashKind) -> String {
        let zero = ObjectHash::zero_str(hash_kind);
        let mut out = String::new();
        for conflict in &self.conflicts {
            let base = conflict.base.map(|h| h.to_string()).unwrap_or_else(|| zero.clone());
            let ours = conflict.ours.map(|h| h.to_string()).unwrap_or_else(|| zero.clone());
            let theirs = conflict.theirs.map(|h| h.to_string()).unwrap_or_else(|| zero.clone());
            out.push_str(&format!("{}\t{base}\t{ours}\t{theirs}\n", conflict.path));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hash::{HashKind, set_hash_kind_for_test},
        internal::{
            object::{
                blob::Blob,
                commit::Commit,
                signature::{Signature, SignatureType},
                tree::{Tree, TreeItem, TreeItemMode},
            },
            store::MemoryBackend,
        },
    };
    use std::sync::Arc;

    fn sig() -> Signature {
        Signature::new_at(
            SignatureType::Author,
            "A".into(),
            "a@example.com".into(),
            1_700_000_000,
            0,
        )
    }

    async fn commit_with_tree(
        store: &ObjectStore,
        tree_id: ObjectHash,
        parents: Vec<ObjectHash>,
    ) -> ObjectHash {
        let commit = Commit::new(sig(), sig(), tree_id, parents, "msg");
        store.put(&commit).await.unwrap();
        commit.id
    }

    async fn tree_with_file(store: &ObjectStore, name: &str, content: &str) -> ObjectHash {
        let blob = Blob::from_content(content);
        store.put(&blob).await.unwrap();
        let tree = Tree::from_tree_items(vec![TreeItem::new(
            TreeItemMode::Blob,
            blob.id,
            name.to_string(),
        )])
        .unwrap();
        store.put(&tree).await.unwrap();
        tree.id
    }

    #[tokio::test]
    async fn merge_base_finds_common_ancestor() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));
        let tree = tree_with_file(&store, "a.txt", "base\n").await;
        let root = commit_with_tree(&store, tree, vec![]).await;
        let branch_a = commit_with_tree(&store, tree, vec![root]).await;
        let branch_b = commit_with_tree(&store, tree, vec![root]).await;

        let base = merge_base(&store, branch_a, branch_b).await.unwrap();
        assert_eq!(base, Some(root));
    }

    #[tokio::test]
    async fn non_overlapping_edits_merge_cleanly() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));
        let base_tree = tree_with_file(&store, "a.txt", "one\ntwo\nthree\n").await;
        let ours_tree = tree_with_file(&store, "a.txt", "ONE\ntwo\nthree\n").await;
        let theirs_tree = tree_with_file(&store, "a.txt", "one\ntwo\nTHREE\n").await;

        let result = three_way_merge(&store, Some(base_tree), ours_tree, theirs_tree)
            .await
            .unwrap();
        match result {
            MergeResult::Merged(tree_hash) => {
                let tree = store.get_tree(&tree_hash).await.unwrap();
                let blob = store.get_blob(&tree.get_by_name("a.txt").unwrap().id).await.unwrap();
                assert_eq!(String::from_utf8(blob.data).unwrap(), "ONE\ntwo\nTHREE\n");
            }
            MergeResult::Conflicts { conflicts, .. } => {
                panic!("expected clean merge, got conflicts: {conflicts:?}")
            }
        }
    }

    #[tokio::test]
    async fn overlapping_edits_conflict() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));
        let base_tree = tree_with_file(&store, "a.txt", "one\n").await;
        let ours_tree = tree_with_file(&store, "a.txt", "ONE\n").await;
        let theirs_tree = tree_with_file(&store, "a.txt", "uno\n").await;

        let result = three_way_merge(&store, Some(base_tree), ours_tree, theirs_tree)
            .await
            .unwrap();
        match result {
            MergeResult::Conflicts { conflicts, .. } => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].kind, ConflictKind::Content);
            }
            MergeResult::Merged(_) => panic!("expected a conflict"),
        }
    }

    #[tokio::test]
    async fn delete_modify_conflict_is_detected() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));
        let base_tree = tree_with_file(&store, "a.txt", "one\n").await;
        let ours_tree = tree_with_file(&store, "a.txt", "ONE\n").await;

        let blob = Blob::from_content("placeholder");
        store.put(&blob).await.unwrap();
        let theirs_tree = Tree::from_tree_items(vec![]).unwrap();
        store.put(&theirs_tree).await.unwrap();

        let result = three_way_merge(&store, Some(base_tree), ours_tree, theirs_tree.id)
            .await
            .unwrap();
        match result {
            MergeResult::Conflicts { conflicts, .. } => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].kind, ConflictKind::Delete);
            }
            MergeResult::Merged(_) => panic!("expected a delete/modify conflict"),
        }
    }
}
