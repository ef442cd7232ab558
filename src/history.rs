//! Commit history queries: ancestry walks, log traversal, and blame, all built on the same BFS
//! over `parent_commit_ids` that [`merge::merge_base`](crate::merge::merge_base) uses.

use std::collections::{HashSet, VecDeque};

use crate::{
    diff::{DiffOperation, compute_diff},
    errors::GitError,
    hash::ObjectHash,
    internal::{object::commit::Commit, store::ObjectStore},
};

/// Options narrowing a [`log`] walk.
#[derive(Clone, Default)]
pub struct LogOptions {
    /// Stop after this many commits (0 means unbounded).
    pub max_count: usize,
    /// Follow only the first parent of each commit, like `git log --first-parent`.
    pub first_parent: bool,
    /// Keep only commits whose author name or email contains this substring.
    pub author: Option<String>,
    /// Keep only commits at or after this Unix timestamp.
    pub since: Option<i64>,
    /// Keep only commits at or before this Unix timestamp.
    pub until: Option<i64>,
}

/// Walk history backward from `start`, honoring `opts`, and return matching commits newest-first
/// by committer timestamp. The DAG is walked breadth-first to collect every reachable commit
/// passing the filters, then sorted by timestamp before `max_count` is applied, so a bounded
/// `log` still returns the N *newest* commits rather than merely the first N visited in BFS order.
pub async fn log(
    store: &ObjectStore,
    start: ObjectHash,
    opts: &LogOptions,
) -> Result<Vec<Commit>, GitError> {
    let mut out = Vec::new();
    let mut visited: HashSet<ObjectHash> = HashSet::new();
    let mut queue: VecDeque<ObjectHash> = VecDeque::new();
    queue.push_back(start);
    visited.insert(start);

    while let Some(hash) = queue.pop_front() {
        let commit = store.get_commit(&hash).await?;

        if matches_filters(&commit, opts) {
            out.push(commit.clone());
        }

        let parents = if opts.first_parent {
            commit.parent_commit_ids.iter().take(1)
        } else {
            commit.parent_commit_ids.iter().take(usize::MAX)
        };
        for parent in parents {
            if visited.insert(*parent) {
                queue.push_back(*parent);
            }
        }
    }

    out.sort_by(|a, b| b.committer.timestamp.cmp(&a.committer.timestamp));
    if opts.max_count != 0 {
        out.truncate(opts.max_count);
    }

    Ok(out)
}

fn matches_filters(commit: &Commit, opts: &LogOptions) -> bool {
    if let Some(author) = &opts.author {
        if !commit.author.name.contains(author.as_str()) && !commit.author.email.contains(author.as_str()) {
            return false;
        }
    }
    if let Some(since) = opts.since {
        if commit.author.timestamp < since {
            return false;
        }
    }
    if let Some(until) = opts.until {
        if commit.author.timestamp > until {
            return false;
        }
    }
    true
}

/// Whether `ancestor` is reachable from `descendant` by following parent links (`descendant`
/// counts as its own ancestor).
pub async fn is_ancestor(
    store: &ObjectStore,
    ancestor: ObjectHash,
    descendant: ObjectHash,
) -> Result<bool, GitError> {
    if ancestor == descendant {
        return Ok(true);
    }
    let mut visited: HashSet<ObjectHash> = HashSet::new();
    let mut queue: VecDeque<ObjectHash> = VecDeque::new();
    queue.push_back(descendant);
    visited.insert(descendant);

    while let Some(hash) = queue.pop_front() {
        let commit = store.get_commit(&hash).await?;
        for parent in commit.parent_commit_ids {
            if parent == ancestor {
                return Ok(true);
            }
            if visited.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(false)
}

/// Every commit reachable from `to` but not from `from` (i.e. `from..to` in `git log` notation),
/// newest first.
pub async fn commits_between(
    store: &ObjectStore,
    from: ObjectHash,
    to: ObjectHash,
) -> Result<Vec<ObjectHash>, GitError> {
    let mut excluded: HashSet<ObjectHash> = HashSet::new();
    let mut queue: VecDeque<ObjectHash> = VecDeque::new();
    queue.push_back(from);
    excluded.insert(from);
    while let Some(hash) = queue.pop_front() {
        let commit = store.get_commit(&hash).await?;
        for parent in commit.parent_commit_ids {
            if excluded.insert(parent) {
                queue.push_back(parent);
            }
        }
    }

    if excluded.contains(&to) {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    let mut visited: HashSet<ObjectHash> = excluded.clone();
    let mut queue: VecDeque<ObjectHash> = VecDeque::new();
    visited.insert(to);
    queue.push_back(to);
    while let Some(hash) = queue.pop_front() {
        out.push(hash);
        let commit = store.get_commit(&hash).await?;
        for parent in commit.parent_commit_ids {
            if !excluded.contains(&parent) && visited.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(out)
}

/// One line's attributed origin.
#[derive(Debug, Clone)]
pub struct BlameLine {
    pub line_number: usize,
    pub content: String,
    pub commit: ObjectHash,
}

/// Attribute every line of `path` at `commit` to the most recent commit (walking first-parent
/// history) that last changed it, by diffing each commit's version of the file against its
/// parent's.
pub async fn blame(
    store: &ObjectStore,
    commit: ObjectHash,
    path: &str,
) -> Result<Vec<BlameLine>, GitError> {
    let target_content = read_path_at(store, commit, path).await?;
    let Some(target_content) = target_content else {
        return Ok(Vec::new());
    };
    let target_lines: Vec<String> = target_content.lines().map(|l| l.to_string()).collect();

    let mut attribution: Vec<ObjectHash> = vec![commit; target_lines.len()];
    let mut current_lines = target_lines.clone();
    let mut current_commit = commit;

    loop {
        let commit_obj = store.get_commit(&current_commit).await?;
        let Some(parent) = commit_obj.parent_commit_ids.first().copied() else {
            break;
        };
        let parent_content = read_path_at(store, parent, path).await?.unwrap_or_default();
        let parent_lines: Vec<String> = parent_content.lines().map(|l| l.to_string()).collect();

        let ops = compute_diff(&parent_lines, &current_lines);
        let mut still_unattributed = false;
        for op in ops {
            if let DiffOperation::Equal { new_line, .. } = op {
                let idx = new_line - 1;
                if attribution[idx] == current_commit {
                    attribution[idx] = parent;
                }
            }
        }
        for a in &attribution {
            if *a == current_commit {
                still_unattributed = true;
                break;
            }
        }
        if !still_unattributed {
            break;
        }

        current_lines = parent_lines;
        current_commit = parent;
    }

    Ok(target_lines
        .into_iter()
        .zip(attribution)
        .enumerate()
        .map(|(i, (content, commit))| BlameLine {
            line_number: i + 1,
            content,
            commit,
        })
        .collect())
}

async fn read_path_at(
    store: &ObjectStore,
    commit: ObjectHash,
    path: &str,
) -> Result<Option<String>, GitError> {
    let commit_obj = store.get_commit(&commit).await?;
    let mut tree = store.get_tree(&commit_obj.tree_id).await?;

    let mut components: Vec<&str> = path.split('/').collect();
    let last = components.pop().expect("path always has at least one component");
    for component in components {
        match tree.get_by_name(component) {
            Some(item) if item.mode.is_tree() => tree = store.get_tree(&item.id).await?,
            _ => return Ok(None),
        }
    }
    match tree.get_by_name(last) {
        Some(item) if !item.mode.is_tree() => {
            let blob = store.get_blob(&item.id).await?;
            Ok(String::from_utf8(blob.data).ok())
        }
        _ => Ok(None),
    }
}

/// Resolve an abbreviated hex prefix to the single object hash it matches, erroring if zero or
/// more than one object in the store shares the prefix. Prefixes shorter than 4 hex digits or
/// containing non-hex characters are rejected outright per spec §4.12.
pub async fn resolve_short_hash(store: &ObjectStore, prefix: &str) -> Result<ObjectHash, GitError> {
    if prefix.len() < 4 || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(GitError::FormatError(format!(
            "short hash prefix `{prefix}` must be at least 4 hex characters"
        )));
    }
    let prefix_lower = prefix.to_ascii_lowercase();
    let matches: Vec<ObjectHash> = store
        .list()
        .await?
        .into_iter()
        .filter(|hash| hash.to_string().starts_with(&prefix_lower))
        .collect();

    match matches.len() {
        0 => Err(GitError::ObjectNotFound(prefix.to_string())),
        1 => Ok(matches[0]),
        _ => Err(GitError::AmbiguousShortHash(prefix.to_string())),
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
                signature::{Signature, SignatureType},
                tree::{Tree, TreeItem, TreeItemMode},
            },
            store::MemoryBackend,
        },
    };
    use std::sync::Arc;

    fn sig(ts: i64) -> Signature {
        Signature::new_at(SignatureType::Author, "A".into(), "a@example.com".into(), ts, 0)
    }

    async fn commit_with_file(
        store: &ObjectStore,
        content: &str,
        parents: Vec<ObjectHash>,
        ts: i64,
    ) -> ObjectHash {
        let blob = Blob::from_content(content);
        store.put(&blob).await.unwrap();
        let tree =
            Tree::from_tree_items(vec![TreeItem::new(TreeItemMode::Blob, blob.id, "f.txt".into())])
                .unwrap();
        store.put(&tree).await.unwrap();
        let commit = Commit::new(sig(ts), sig(ts), tree.id, parents, "msg");
        store.put(&commit).await.unwrap();
        commit.id
    }

    #[tokio::test]
    async fn log_walks_back_through_parents() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));
        let c1 = commit_with_file(&store, "a", vec![], 1).await;
        let c2 = commit_with_file(&store, "b", vec![c1], 2).await;
        let c3 = commit_with_file(&store, "c", vec![c2], 3).await;

        let commits = log(&store, c3, &LogOptions::default()).await.unwrap();
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[0].id, c3);
    }

    #[tokio::test]
    async fn is_ancestor_detects_reachability() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));
        let c1 = commit_with_file(&store, "a", vec![], 1).await;
        let c2 = commit_with_file(&store, "b", vec![c1], 2).await;
        assert!(is_ancestor(&store, c1, c2).await.unwrap());
        assert!(!is_ancestor(&store, c2, c1).await.unwrap());
    }

    #[tokio::test]
    async fn short_hash_lookup_disambiguates() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));
        let c1 = commit_with_file(&store, "a", vec![], 1).await;
        let full = c1.to_string();
        let resolved = resolve_short_hash(&store, &full[..8]).await.unwrap();
        assert_eq!(resolved, c1);
    }

    #[tokio::test]
    async fn commits_between_excludes_common_ancestry() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));
        let c1 = commit_with_file(&store, "a", vec![], 1).await;
        let c2 = commit_with_file(&store, "b", vec![c1], 2).await;
        let c3 = commit_with_file(&store, "c", vec![c2], 3).await;

        let between = commits_between(&store, c1, c3).await.unwrap();
        assert_eq!(between.len(), 2);
        assert!(between.contains(&c2));
        assert!(between.contains(&c3));
        assert!(!between.contains(&c1));
    }

    #[tokio::test]
    async fn log_orders_by_timestamp_not_bfs_depth() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));
        // A merge where one side was committed much later than the other, so a BFS over
        // parent links would visit it after commits that are actually older.
        let base = commit_with_file(&store, "base", vec![], 1).await;
        let old_side = commit_with_file(&store, "old", vec![base], 2).await;
        let new_side = commit_with_file(&store, "new", vec![base], 100).await;
        let merge = commit_with_file(&store, "merge", vec![old_side, new_side], 200).await;

        let commits = log(&store, merge, &LogOptions::default()).await.unwrap();
        let timestamps: Vec<i64> = commits.iter().map(|c| c.committer.timestamp).collect();
        let mut sorted = timestamps.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(timestamps, sorted);

        let top_two = log(&store, merge, &LogOptions { max_count: 2, ..LogOptions::default() })
            .await
            .unwrap();
        assert_eq!(top_two.len(), 2);
        assert_eq!(top_two[0].id, merge);
        assert_eq!(top_two[1].id, new_side);
    }

    #[tokio::test]
    async fn short_hash_rejects_prefixes_under_four_hex_chars() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let store = ObjectStore::new(Arc::new(MemoryBackend::new()));
        let c1 = commit_with_file(&store, "a", vec![], 1).await;
        let full = c1.to_string();

        assert!(matches!(
            resolve_short_hash(&store, &full[..3]).await.unwrap_err(),
            GitError::FormatError(_)
        ));
        assert!(matches!(
            resolve_short_hash(&store, "xyzq").await.unwrap_err(),
            GitError::FormatError(_)
        ));
    }
}
