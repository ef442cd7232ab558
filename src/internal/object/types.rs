//! Object type enumeration shared across the object and pack modules.

use std::fmt::{self, Display};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// In Git, each object type is assigned a unique integer value, which is used to identify the
/// type of the object in Git repositories.
///
/// * `Commit` (1): records a point-in-time snapshot plus authorship and parentage.
/// * `Tree` (2): represents a directory listing of further trees and blobs.
/// * `Blob` (3): the content of a single file.
/// * `Tag` (4): an annotated tag pointing at another object.
/// * `OffsetDelta` (6): delta encoded against a base object at a negative pack offset.
/// * `HashDelta` (7): delta encoded against a base object identified by hash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub enum ObjectType {
    Commit = 1,
    Tree,
    Blob,
    Tag,
    OffsetDelta = 6,
    HashDelta = 7,
}

const COMMIT_OBJECT_TYPE: &[u8] = b"commit";
const TREE_OBJECT_TYPE: &[u8] = b"tree";
const BLOB_OBJECT_TYPE: &[u8] = b"blob";
const TAG_OBJECT_TYPE: &[u8] = b"tag";

impl Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectType::Blob => write!(f, "blob"),
            ObjectType::Tree => write!(f, "tree"),
            ObjectType::Commit => write!(f, "commit"),
            ObjectType::Tag => write!(f, "tag"),
            ObjectType::OffsetDelta => write!(f, "ofs-delta"),
            ObjectType::HashDelta => write!(f, "ref-delta"),
        }
    }
}

impl ObjectType {
    /// True for the four base object kinds that have a canonical `<type> <size>\0<payload>`
    /// serialization and a stable hash; false for the two delta variants, which only exist as
    /// pack-stream entries before resolution.
    pub fn is_base(&self) -> bool {
        matches!(
            self,
            ObjectType::Commit | ObjectType::Tree | ObjectType::Blob | ObjectType::Tag
        )
    }

    /// Convert object type to the 3-bit pack header type id (values 1..=7, see §4.7).
    pub fn to_pack_type_u8(&self) -> Result<u8, GitError> {
        match self {
            ObjectType::Commit => Ok(1),
            ObjectType::Tree => Ok(2),
            ObjectType::Blob => Ok(3),
            ObjectType::Tag => Ok(4),
            ObjectType::OffsetDelta => Ok(6),
            ObjectType::HashDelta => Ok(7),
        }
    }

    /// Decode a 3-bit pack header type id to an object type.
    pub fn from_pack_type_u8(number: u8) -> Result<ObjectType, GitError> {
        match number {
            1 => Ok(ObjectType::Commit),
            2 => Ok(ObjectType::Tree),
            3 => Ok(ObjectType::Blob),
            4 => Ok(ObjectType::Tag),
            6 => Ok(ObjectType::OffsetDelta),
            7 => Ok(ObjectType::HashDelta),
            _ => Err(GitError::InvalidObjectType(format!(
                "Invalid pack object type number: {number}"
            ))),
        }
    }

    /// The ASCII type-name bytes used in the canonical `<type> <size>\0` header. Panics for
    /// delta variants, which are never canonicalized or hashed directly.
    pub fn to_bytes(&self) -> &'static [u8] {
        match self {
            ObjectType::Commit => COMMIT_OBJECT_TYPE,
            ObjectType::Tree => TREE_OBJECT_TYPE,
            ObjectType::Blob => BLOB_OBJECT_TYPE,
            ObjectType::Tag => TAG_OBJECT_TYPE,
            ObjectType::OffsetDelta | ObjectType::HashDelta => {
                panic!("delta object types have no canonical header")
            }
        }
    }

    /// Parses the type-name that prefixes a loose object's canonical bytes.
    pub fn from_string(s: &str) -> Result<ObjectType, GitError> {
        match s {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(GitError::InvalidObjectType(s.to_string())),
        }
    }

    /// Owned form of [`ObjectType::to_bytes`], for call sites that need a `Vec<u8>`.
    pub fn to_data(self) -> Result<Vec<u8>, GitError> {
        if !self.is_base() {
            return Err(GitError::InvalidObjectType(self.to_string()));
        }
        Ok(self.to_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_type_round_trips() {
        for t in [
            ObjectType::Commit,
            ObjectType::Tree,
            ObjectType::Blob,
            ObjectType::Tag,
            ObjectType::OffsetDelta,
            ObjectType::HashDelta,
        ] {
            let n = t.to_pack_type_u8().unwrap();
            assert_eq!(ObjectType::from_pack_type_u8(n).unwrap(), t);
        }
    }

    #[test]
    fn string_round_trips_for_base_types() {
        for t in [
            ObjectType::Commit,
            ObjectType::Tree,
            ObjectType::Blob,
            ObjectType::Tag,
        ] {
            assert_eq!(ObjectType::from_string(&t.to_string()).unwrap(), t);
        }
    }
}
