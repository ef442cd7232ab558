//! Blob objects: opaque file content, addressed by the hash of its canonical serialization.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::{ObjectTrait, types::ObjectType};

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub id: ObjectHash,
    pub data: Vec<u8>,
}

impl Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Blob({}, {} bytes)", self.id, self.data.len())
    }
}

impl Blob {
    /// Build a blob from raw bytes, computing its hash.
    pub fn new(data: Vec<u8>) -> Self {
        let id = ObjectHash::from_type_and_data(ObjectType::Blob, &data);
        Blob { id, data }
    }

    /// Convenience constructor for text content.
    pub fn from_content(content: impl Into<String>) -> Self {
        Blob::new(content.into().into_bytes())
    }
}

impl ObjectTrait for Blob {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError> {
        Ok(Blob {
            id: hash,
            data: data.to_vec(),
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn get_size(&self) -> usize {
        self.data.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};

    #[test]
    fn hash_is_deterministic() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let a = Blob::from_content("hello");
        let b = Blob::from_content("hello");
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn known_sha1_hash() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let blob = Blob::from_content("hello\n");
        // `git hash-object` for a file containing "hello\n"
        assert_eq!(blob.id.to_string(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn from_bytes_preserves_given_hash() {
        let blob = Blob::from_bytes(b"content", ObjectHash::default()).unwrap();
        assert_eq!(blob.data, b"content");
    }
}
