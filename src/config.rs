//! Ambient configuration surface: pack-decode resource limits plus the caller-supplied
//! option records for `init`/`clone`/`fetch`/`push`/`merge` described in the design notes.

use std::{path::PathBuf, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize};

use crate::hash::HashKind;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PackConfig {
    #[serde(deserialize_with = "string_or_usize")]
    pub pack_decode_mem_size: String,
    #[serde(deserialize_with = "string_or_usize")]
    pub pack_decode_disk_size: String,
    pub pack_decode_cache_path: PathBuf,
    pub clean_cache_after_decode: bool,
    pub channel_message_size: usize,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            pack_decode_mem_size: "4G".to_string(),
            pack_decode_disk_size: "20%".to_string(),
            pack_decode_cache_path: PathBuf::from("pack_decode_cache"),
            clean_cache_after_decode: true,
            channel_message_size: 1_000_000,
        }
    }
}

fn string_or_usize<'deserialize, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'deserialize>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrUSize {
        String(String),
        USize(usize),
    }

    Ok(match StringOrUSize::deserialize(deserializer)? {
        StringOrUSize::String(v) => v,
        StringOrUSize::USize(v) => v.to_string(),
    })
}

/// Credentials supplied to the client side of the protocol before a request is sent.
#[derive(Debug, Clone)]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer(String),
}

/// Supplies credentials lazily, so a caller can refresh a token between retries.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self) -> Option<Credentials>;
}

pub type AuthProvider = Arc<dyn CredentialProvider>;

/// Progress notifications emitted during long-running workflows (clone/fetch/push/checkout).
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Counting { objects: usize },
    Receiving { bytes: usize, total: Option<usize> },
    Resolving { deltas: usize, total: usize },
    Checkout { files: usize, total: usize },
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

#[derive(Clone)]
pub struct InitOptions {
    pub bare: bool,
    pub initial_branch: String,
    pub hash_algorithm: HashKind,
}

impl InitOptions {
    pub fn new() -> Self {
        Self {
            bare: false,
            initial_branch: "main".to_string(),
            hash_algorithm: HashKind::Sha1,
        }
    }
}

impl Default for InitOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct CloneOptions {
    pub bare: bool,
    pub depth: usize,
    pub branch: Option<String>,
    pub remote: String,
    pub auth: Option<AuthProvider>,
    pub progress: Option<ProgressCallback>,
}

impl CloneOptions {
    pub fn new() -> Self {
        Self {
            bare: false,
            depth: 0,
            branch: None,
            remote: "origin".to_string(),
            auth: None,
            progress: None,
        }
    }
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct FetchOptions {
    pub remote: String,
    pub refspecs: Vec<String>,
    pub prune: bool,
    pub force: bool,
    pub depth: usize,
    pub auth: Option<AuthProvider>,
    pub progress: Option<ProgressCallback>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self {
            remote: "origin".to_string(),
            refspecs: Vec::new(),
            prune: false,
            force: false,
            depth: 0,
            auth: None,
            progress: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct PushOptions {
    pub remote: String,
    pub refspecs: Vec<String>,
    pub force: bool,
    pub auth: Option<AuthProvider>,
    pub progress: Option<ProgressCallback>,
}

impl PushOptions {
    pub fn new() -> Self {
        Self {
            remote: "origin".to_string(),
            refspecs: Vec::new(),
            force: false,
            auth: None,
            progress: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct MergeOptions {
    pub allow_fast_forward: bool,
    pub message: Option<String>,
    pub author: Option<crate::internal::object::signature::Signature>,
    pub committer: Option<crate::internal::object::signature::Signature>,
}

impl MergeOptions {
    pub fn new() -> Self {
        Self {
            allow_fast_forward: true,
            message: None,
            author: None,
            committer: None,
        }
    }
}

impl std::fmt::Debug for CloneOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneOptions")
            .field("bare", &self.bare)
            .field("depth", &self.depth)
            .field("branch", &self.branch)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOptions")
            .field("remote", &self.remote)
            .field("refspecs", &self.refspecs)
            .field("prune", &self.prune)
            .field("force", &self.force)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for PushOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushOptions")
            .field("remote", &self.remote)
            .field("refspecs", &self.refspecs)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for MergeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeOptions")
            .field("allow_fast_forward", &self.allow_fast_forward)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
