//! Content-addressed object storage: a pluggable [`StorageBackend`] (filesystem or in-memory)
//! beneath an [`ObjectStore`] that owns canonicalization (`<type> <size>\0<payload>`) and zlib
//! framing, the same split the pack encoder/decoder keep between entry headers and their
//! compressed bytes.

pub mod filesystem;
pub mod memory;

use std::io::{Read, Write};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};

use crate::{
    errors::GitError,
    hash::ObjectHash,
    internal::object::{
        ObjectTrait, blob::Blob, commit::Commit, tag::Tag, tree::Tree, types::ObjectType,
    },
};

pub use filesystem::FilesystemBackend;
pub use memory::MemoryBackend;

/// Storage primitive an [`ObjectStore`] is layered on: put/get/has/delete/list over opaque,
/// already-framed bytes keyed by object hash. Implementations don't need to know about git's
/// object model at all.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the raw (canonicalized + zlib-compressed) bytes stored under `hash`.
    async fn read(&self, hash: &ObjectHash) -> Result<Vec<u8>, GitError>;

    /// Write `bytes` under `hash`. Backends should make this atomic from the perspective of a
    /// concurrent reader: a reader either sees the old absence or the complete new content.
    async fn write(&self, hash: &ObjectHash, bytes: &[u8]) -> Result<(), GitError>;

    /// Whether an object is present under `hash`.
    async fn has(&self, hash: &ObjectHash) -> Result<bool, GitError>;

    /// Remove the object stored under `hash`, if any.
    async fn delete(&self, hash: &ObjectHash) -> Result<(), GitError>;

    /// Enumerate every hash currently held by the backend. Backends are not required to
    /// return these in any particular order.
    async fn list(&self) -> Result<Vec<ObjectHash>, GitError>;

    /// Flush/close any held resources. A no-op for backends with nothing to release.
    async fn close(&self) -> Result<(), GitError>;
}

/// Frame an object's payload the way a loose object is stored on disk: a type/size header,
/// then the payload, separated by a NUL.
fn canonicalize(object_type: ObjectType, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 24);
    out.extend_from_slice(object_type.to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(data.len().to_string().as_bytes());
    out.push(0);
    out.extend_from_slice(data);
    out
}

/// Undo [`canonicalize`], validating the header shape rather than trusting the size field.
fn decanonicalize(bytes: &[u8]) -> Result<(ObjectType, Vec<u8>), GitError> {
    let space = bytes
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| GitError::MalformedObject("missing type/size separator".into()))?;
    let type_str = std::str::from_utf8(&bytes[..space])
        .map_err(|e| GitError::MalformedObject(e.to_string()))?;
    let object_type = ObjectType::from_string(type_str)?;

    let nul = bytes[space + 1..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| GitError::MalformedObject("missing NUL after size".into()))?
        + space
        + 1;
    let size_str = std::str::from_utf8(&bytes[space + 1..nul])
        .map_err(|e| GitError::MalformedObject(e.to_string()))?;
    let size: usize = size_str
        .parse()
        .map_err(|_| GitError::MalformedObject(format!("non-numeric size: {size_str}")))?;

    let payload = &bytes[nul + 1..];
    if payload.len() != size {
        return Err(GitError::MalformedObject(format!(
            "declared size {size} does not match payload length {}",
            payload.len()
        )));
    }
    Ok((object_type, payload.to_vec()))
}

fn zlib_compress(data: &[u8]) -> Result<Vec<u8>, GitError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish().map_err(GitError::IOError)
}

fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>, GitError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Content-addressed object store. `put` is idempotent: writing an object whose hash is
/// already present is a no-op beyond the existence check, matching the invariant that loose
/// objects never need to be rewritten once stored.
#[derive(Clone)]
pub struct ObjectStore {
    backend: Arc<dyn StorageBackend>,
}

impl ObjectStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        ObjectStore { backend }
    }

    /// Store any object implementing [`ObjectTrait`], returning its hash. A no-op if the hash
    /// is already present.
    pub async fn put<T: ObjectTrait>(&self, object: &T) -> Result<ObjectHash, GitError> {
        let hash = object.object_hash()?;
        if self.backend.has(&hash).await? {
            return Ok(hash);
        }
        let data = object.to_data()?;
        let framed = canonicalize(object.get_type(), &data);
        let compressed = zlib_compress(&framed)?;
        self.backend.write(&hash, &compressed).await?;
        Ok(hash)
    }

    /// Store an object behind a trait object rather than a concrete `ObjectTrait` impl, for
    /// callers (like pack unpacking) juggling a mix of blob/tree/commit/tag values at once.
    pub async fn put_dyn(&self, object: &dyn ObjectTrait) -> Result<ObjectHash, GitError> {
        let hash = object.object_hash()?;
        if self.backend.has(&hash).await? {
            return Ok(hash);
        }
        let data = object.to_data()?;
        let framed = canonicalize(object.get_type(), &data);
        let compressed = zlib_compress(&framed)?;
        self.backend.write(&hash, &compressed).await?;
        Ok(hash)
    }

    /// Fetch an object's canonical type and payload bytes, without committing to a concrete
    /// `ObjectTrait` implementation.
    pub async fn get_raw(&self, hash: &ObjectHash) -> Result<(ObjectType, Vec<u8>), GitError> {
        let compressed = self.backend.read(hash).await?;
        let framed = zlib_decompress(&compressed)?;
        decanonicalize(&framed)
    }

    pub async fn has(&self, hash: &ObjectHash) -> Result<bool, GitError> {
        self.backend.has(hash).await
    }

    pub async fn delete(&self, hash: &ObjectHash) -> Result<(), GitError> {
        self.backend.delete(hash).await
    }

    pub async fn list(&self) -> Result<Vec<ObjectHash>, GitError> {
        self.backend.list().await
    }

    pub async fn close(&self) -> Result<(), GitError> {
        self.backend.close().await
    }

    pub async fn get_blob(&self, hash: &ObjectHash) -> Result<Blob, GitError> {
        let (object_type, data) = self.get_raw(hash).await?;
        expect_type(object_type, ObjectType::Blob)?;
        Blob::from_bytes(&data, *hash)
    }

    pub async fn get_tree(&self, hash: &ObjectHash) -> Result<Tree, GitError> {
        let (object_type, data) = self.get_raw(hash).await?;
        expect_type(object_type, ObjectType::Tree)?;
        Tree::from_bytes(&data, *hash)
    }

    pub async fn get_commit(&self, hash: &ObjectHash) -> Result<Commit, GitError> {
        let (object_type, data) = self.get_raw(hash).await?;
        expect_type(object_type, ObjectType::Commit)?;
        Commit::from_bytes(&data, *hash)
    }

    pub async fn get_tag(&self, hash: &ObjectHash) -> Result<Tag, GitError> {
        let (object_type, data) = self.get_raw(hash).await?;
        expect_type(object_type, ObjectType::Tag)?;
        Tag::from_bytes(&data, *hash)
    }
}

fn expect_type(actual: ObjectType, expected: ObjectType) -> Result<(), GitError> {
    if actual == expected {
        Ok(())
    } else {
        Err(GitError::InvalidObjectType(format!(
            "expected {expected}, found {actual}"
        )))
    }
}
