use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use tokio;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::core::RepositoryAccess;
use super::types::ProtocolError;
use crate::internal::metadata::MetaAttached;
use crate::internal::object::types::ObjectType;
use crate::internal::object::{ObjectTrait, blob::Blob, commit::Commit, tree::Tree};
use crate::internal::pack::{Pack, encode::PackEncoder, entry::Entry};

/// Pack generation service for Git protocol operations
///
/// This handles the core Git pack generation logic internally within git-internal,
/// using the RepositoryAccess trait only for data access.
pub struct PackGenerator<'a, R>
where
    R: RepositoryAccess,
{
    repo_access: &'a R,
}

impl<'a, R> PackGenerator<'a, R>
where
    R: RepositoryAccess,
{
    pub fn new(repo_access: &'a R) -> Self {
        Self { repo_access }
    }

    /// Generate a full pack containing all requested objects
    pub async fn generate_full_pack(
        &self,
        want: Vec<String>,
    ) -> Result<ReceiverStream<Vec<u8>>, ProtocolError> {
        let (tx, rx) = mpsc::channel(1024);

        // Collect all objects needed for the wanted commits
        let all_objects = self.collect_all_objects(want).await?;

        // Generate pack data
        tokio::spawn(async move {
            if let Err(e) = Self::generate_pack_stream(all_objects, tx).await {
                tracing::error!("Failed to generate pack stream: {}", e);
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Generate an incremental pack containing only objects not in 'have'
    pub async fn generate_incremental_pack(
        &self,
        want: Vec<String>,
        have: Vec<String>,
    ) -> Result<ReceiverStream<Vec<u8>>, ProtocolError> {
        let (tx, rx) = mpsc::channel(1024);

        // Collect objects for wanted commits
        let wanted_objects = self.collect_all_objects(want).await?;

        // Collect objects for have commits (to exclude)
        let have_objects = self.collect_all_objects(have).await?;

        // Filter out objects that are already in 'have'
        let incremental_objects = Self::filter_objects(wanted_objects, have_objects);

        // Generate pack data
        tokio::spawn(async move {
            if let Err(e) = Self::generate_pack_stream(incremental_objects, tx).await {
                tracing::error!("Failed to generate incremental pack stream: {}", e);
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Unpack incoming pack stream and extract objects
    pub async fn unpack_stream(
        &self,
        pack_data: Bytes,
    ) -> Result<(Vec<Commit>, Vec<Tree>, Vec<Blob>), ProtocolError> {
        use std::sync::{Arc, Mutex};

        let commits = Arc::new(Mutex::new(Vec::new()));
        let trees = Arc::new(Mutex::new(Vec::new()));
        let blobs = Arc::new(Mutex::new(Vec::new()));

        let commits_clone = commits.clone();
        let trees_clone = trees.clone();
        let blobs_clone = blobs.clone();

        // Create a Pack instance for decoding
        let mut pack = Pack::new(None, None, None, true);
        let mut cursor = Cursor::new(pack_data.to_vec());

        // Decode the pack and collect entries
        pack.decode(
            &mut cursor,
            move |meta: MetaAttached<Entry, _>| {
                let entry = meta.inner;
                match entry.obj_type {
                    ObjectType::Commit => {
                        if let Ok(commit) = Commit::from_bytes(&entry.data, entry.hash) {
                            commits_clone.lock().unwrap().push(commit);
                        } else {
                            tracing::warn!("Failed to parse commit from pack entry");
                        }
                    }
                    ObjectType::Tree => {
                        if let Ok(tree) = Tree::from_bytes(&entry.data, entry.hash) {
                            trees_clone.lock().unwrap().push(tree);
                        } else {
                            tracing::warn!("Failed to parse tree from pack entry");
                        }
                    }
                    ObjectType::Blob => {
                        if let Ok(blob) = Blob::from_bytes(&entry.data, entry.hash) {
                            blobs_clone.lock().unwrap().push(blob);
                        } else {
                            tracing::warn!("Failed to parse blob from pack entry");
                        }
                    }
                    _ => {
                        tracing::warn!("Unknown object type in pack: {:?}", entry.obj_type);
                    }
                }
            },
            None::<fn(crate::hash::ObjectHash)>,
        )
        .map_err(|e| ProtocolError::invalid_request(&format!("Failed to decode pack: {}", e)))?;

        // Extract the results
        let commits_result = Arc::try_unwrap(commits).unwrap().into_inner().unwrap();
        let trees_result = Arc::try_unwrap(trees).unwrap().into_inner().unwrap();
        let blobs_result = Arc::try_unwrap(blobs).unwrap().into_inner().unwrap();

        Ok((commits_result, trees_result, blobs_result))
    }

    /// Collect all objects reachable from the given commit hashes
    async fn collect_all_objects(
        &self,
        commit_hashes: Vec<String>,
    ) -> Result<(Vec<Commit>, Vec<Tree>, Vec<Blob>), ProtocolError> {
        let mut commits = Vec::new();
        let mut trees = Vec::new();
        let mut blobs = Vec::new();

        let mut visited_commits = HashSet::new();
        let mut visited_trees = HashSet::new();
        let mut visited_blobs = HashSet::new();

        let mut commit_queue = VecDeque::from(commit_hashes);

        // BFS traversal of commit graph
        while let Some(commit_hash) = commit_queue.pop_front() {
            if visited_commits.contains(&commit_hash) {
                continue;
            }
            visited_commits.insert(commit_hash.clone());

            // Get commit object
            let commit = self
                .repo_access
                .get_commit(&commit_hash)
                .await
                .map_err(|e| {
                    ProtocolError::repository_error(format!(
                        "Failed to get commit {}: {}",
                        commit_hash, e
                    ))
                })?;

            // Add parent commits to queue
            for parent in &commit.parent_commit_ids {
                let parent_str = parent.to_string();
                if !visited_commits.contains(&parent_str) {
                    commit_queue.push_back(parent_str);
                }
            }

            // Collect tree objects
            Box::pin(self.collect_tree_objects(
                &commit.tree_id.to_string(),
                &mut trees,
                &mut blobs,
                &mut visited_trees,
                &mut visited_blobs,
            ))
            .await?;

            commits.push(commit);
        }

        Ok((commits, trees, blobs))
    }

    /// Recursively collect tree and blob objects
    async fn collect_tree_objects(
        &self,
        tree_hash: &str,
        trees: &mut Vec<Tree>,
        blobs: &mut Vec<Blob>,
        visited_trees: &mut HashSet<String>,
        visited_blobs: &mut HashSet<String>,
    ) -> Result<(), ProtocolError> {
        if visited_trees.contains(tree_hash) {
            return Ok(());
        }
        visited_trees.insert(tree_hash.to_string());

        let tree = self
            .repo_access
            .get_tree(tree_hash)
            .await
            .map_err(|e| {
                ProtocolError::repository_error(format!("Failed to get tree {}: {}", tree_hash, e))
            })?;

        for entry in &tree.tree_items {
            let entry_hash = entry.id.to_string();
            match entry.mode {
                crate::internal::object::tree::TreeItemMode::Tree => {
                    Box::pin(self.collect_tree_objects(
                        &entry_hash,
                        trees,
                        blobs,
                        visited_trees,
                        visited_blobs,
                    ))
                    .await?;
                }
                crate::internal::object::tree::TreeItemMode::Blob
                | crate::internal::object::tree::TreeItemMode::BlobExecutable => {
                    if !visited_blobs.contains(&entry_hash) {
                        visited_blobs.insert(entry_hash.clone());
                        let blob = self
                            .repo_access
                            .get_blob(&entry_hash)
                            .await
                            .map_err(|e| {
                                ProtocolError::repository_error(format!(
                                    "Failed to get blob {}: {}",
                                    entry_hash, e
                                ))
                            })?;
                        blobs.push(blob);
                    }
                }
                _ => {}
            }
        }

        trees.push(tree);
        Ok(())
    }

    /// Filter objects to exclude those already in 'have'
    fn filter_objects(
        wanted: (Vec<Commit>, Vec<Tree>, Vec<Blob>),
        have: (Vec<Commit>, Vec<Tree>, Vec<Blob>),
    ) -> (Vec<Commit>, Vec<Tree>, Vec<Blob>) {
        let (wanted_commits, wanted_trees, wanted_blobs) = wanted;
        let (have_commits, have_trees, have_blobs) = have;

        // Create hash sets for efficient lookup
        let have_commit_hashes: HashSet<String> =
            have_commits.iter().map(|c| c.id.to_string()).collect();
        let have_tree_hashes: HashSet<String> =
            have_trees.iter().map(|t| t.id.to_string()).collect();
        let have_blob_hashes: HashSet<String> =
            have_blobs.iter().map(|b| b.id.to_string()).collect();

        // Filter out objects that are in 'have'
        let filtered_commits: Vec<Commit> = wanted_commits
            .into_iter()
            .filter(|c| !have_commit_hashes.contains(&c.id.to_string()))
            .collect();

        let filtered_trees: Vec<Tree> = wanted_trees
            .into_iter()
            .filter(|t| !have_tree_hashes.contains(&t.id.to_string()))
            .collect();

        let filtered_blobs: Vec<Blob> = wanted_blobs
            .into_iter()
            .filter(|b| !have_blob_hashes.contains(&b.id.to_string()))
            .collect();

        (filtered_commits, filtered_trees, filtered_blobs)
    }

    /// Generate pack stream from objects
    async fn generate_pack_stream(
        objects: (Vec<Commit>, Vec<Tree>, Vec<Blob>),
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), ProtocolError> {
        let (commits, trees, blobs) = objects;

        // Convert objects to entries
        let mut entries = Vec::new();

        for commit in commits {
            entries.push(Entry::from(commit));
        }

        for tree in trees {
            entries.push(Entry::from(tree));
        }

        for blob in blobs {
            entries.push(Entry::from(blob));
        }

        // Create PackEncoder and encode entries
        let (pack_tx, mut pack_rx) = mpsc::channel(1024);
        let (entry_tx, entry_rx) = mpsc::channel(1024);
        let mut encoder = PackEncoder::new(entries.len(), 10, pack_tx); // window_size = 10

        // Spawn encoding task
        tokio::spawn(async move {
            if let Err(e) = encoder.encode(entry_rx).await {
                tracing::error!("Failed to encode pack: {}", e);
            }
        });

        // Send entries to encoder
        tokio::spawn(async move {
            for entry in entries {
                if entry_tx.send(entry).await.is_err() {
                    break; // Receiver dropped
                }
            }
            // Drop sender to signal end of entries
        });

        // Forward pack data to output channel
        while let Some(chunk) = pack_rx.recv().await {
            if tx.send(chunk).await.is_err() {
                break; // Receiver dropped
            }
        }

        Ok(())
    }
}
