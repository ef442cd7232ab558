//! Tag objects: an annotated tag pointing at another object, with a tagger and message.

use std::fmt::Display;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::{
    ObjectTrait,
    signature::{Signature, SignatureType},
    types::ObjectType,
};

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: ObjectHash,
    pub object_hash: ObjectHash,
    pub object_type: ObjectType,
    pub tag_name: String,
    pub tagger: Signature,
    pub message: String,
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "object {}", self.object_hash)?;
        writeln!(f, "type {}", self.object_type)?;
        writeln!(f, "tag {}", self.tag_name)?;
        writeln!(f, "{}", self.tagger)?;
        write!(f, "\n{}", self.message)
    }
}

impl Tag {
    pub fn new(
        object_hash: ObjectHash,
        object_type: ObjectType,
        tag_name: String,
        tagger: Signature,
        message: String,
    ) -> Result<Self, GitError> {
        if !object_type.is_base() {
            return Err(GitError::InvalidTagObject(format!(
                "tag target must be a base object, got {object_type}"
            )));
        }
        let mut tag = Tag {
            id: ObjectHash::default(),
            object_hash,
            object_type,
            tag_name,
            tagger,
            message,
        };
        let data = tag.to_data()?;
        tag.id = ObjectHash::from_type_and_data(ObjectType::Tag, &data);
        Ok(tag)
    }
}

impl ObjectTrait for Tag {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError> {
        let object_line_end = data
            .find(b"\n")
            .ok_or_else(|| GitError::InvalidTagObject("missing object line".to_string()))?;
        let object_line = &data[..object_line_end];
        let object_hex = object_line
            .strip_prefix(b"object ")
            .ok_or_else(|| GitError::InvalidTagObject("missing object line".to_string()))?
            .to_str()
            .map_err(|e| GitError::ConversionError(e.to_string()))?;
        let object_hash = object_hex
            .parse::<ObjectHash>()
            .map_err(GitError::InvalidHashValue)?;

        let mut cursor = &data[object_line_end + 1..];

        let type_line_end = cursor
            .find(b"\n")
            .ok_or_else(|| GitError::InvalidTagObject("missing type line".to_string()))?;
        let type_line = &cursor[..type_line_end];
        let type_str = type_line
            .strip_prefix(b"type ")
            .ok_or_else(|| GitError::InvalidTagObject("missing type line".to_string()))?
            .to_str()
            .map_err(|e| GitError::ConversionError(e.to_string()))?;
        let object_type = ObjectType::from_string(type_str)?;
        cursor = &cursor[type_line_end + 1..];

        let tag_line_end = cursor
            .find(b"\n")
            .ok_or_else(|| GitError::InvalidTagObject("missing tag line".to_string()))?;
        let tag_line = &cursor[..tag_line_end];
        let tag_name = tag_line
            .strip_prefix(b"tag ")
            .ok_or_else(|| GitError::InvalidTagObject("missing tag line".to_string()))?
            .to_str()
            .map_err(|e| GitError::ConversionError(e.to_string()))?
            .to_string();
        cursor = &cursor[tag_line_end + 1..];

        let tagger_line_end = cursor
            .find(b"\n")
            .ok_or_else(|| GitError::InvalidTagObject("missing tagger line".to_string()))?;
        let tagger_line = &cursor[..tagger_line_end];
        let tagger = Signature::from_data(tagger_line.to_vec())?;
        if tagger.signature_type != SignatureType::Tagger {
            return Err(GitError::InvalidTagObject(
                "expected tagger signature".to_string(),
            ));
        }
        cursor = &cursor[tagger_line_end + 1..];

        let message = cursor
            .strip_prefix(b"\n")
            .unwrap_or(cursor)
            .to_str()
            .map_err(|e| GitError::ConversionError(e.to_string()))?
            .to_string();

        Ok(Tag {
            id: hash,
            object_hash,
            object_type,
            tag_name,
            tagger,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn get_size(&self) -> usize {
        0
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        data.extend(format!("object {}\n", self.object_hash).into_bytes());
        data.extend(format!("type {}\n", self.object_type).into_bytes());
        data.extend(format!("tag {}\n", self.tag_name).into_bytes());
        data.extend(self.tagger.to_data()?);
        data.push(b'\n');
        data.push(b'\n');
        data.extend(self.message.as_bytes());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};

    fn tagger() -> Signature {
        Signature::new_at(
            SignatureType::Tagger,
            "A U Thor".to_string(),
            "a@example.com".to_string(),
            1_700_000_000,
            0,
        )
    }

    #[test]
    fn round_trips_through_bytes() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let target = ObjectHash::new(b"target");
        let tag = Tag::new(
            target,
            ObjectType::Commit,
            "v1.0.0".to_string(),
            tagger(),
            "release notes".to_string(),
        )
        .unwrap();
        let data = tag.to_data().unwrap();
        let parsed = Tag::from_bytes(&data, tag.id).unwrap();
        assert_eq!(parsed, tag);
    }

    #[test]
    fn rejects_delta_target_type() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let target = ObjectHash::new(b"target");
        let err = Tag::new(
            target,
            ObjectType::OffsetDelta,
            "v1".to_string(),
            tagger(),
            "msg".to_string(),
        )
        .unwrap_err();
        assert!(matches!(err, GitError::InvalidTagObject(_)));
    }
}
