//! In-flight representation of an object while it is being decoded out of a pack stream, before
//! delta resolution has produced its final bytes and hash.

use crate::{hash::ObjectHash, internal::object::types::ObjectType};

/// How a pack entry identified itself before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheObjectInfo {
    /// A base object: type plus the hash computed once its data is known.
    BaseObject(ObjectType, ObjectHash),
    /// An OFS-delta entry, keyed by the absolute pack offset of its base.
    OffsetDelta(usize),
    /// A REF-delta entry, keyed by the hash of its base object.
    RefDelta(ObjectHash),
}

impl CacheObjectInfo {
    pub fn is_delta(&self) -> bool {
        !matches!(self, CacheObjectInfo::BaseObject(..))
    }
}

/// A decoded pack entry awaiting (or having undergone) delta resolution.
#[derive(Debug, Clone)]
pub struct CacheObject {
    pub info: CacheObjectInfo,
    /// Absolute offset of this entry's header within the pack.
    pub offset: usize,
    /// CRC32 of the entry's compressed bytes, as recorded in the pack.
    pub crc32: u32,
    /// Fully inflated bytes: the delta instruction stream for delta entries, or the object's
    /// canonical payload for base entries.
    pub data_decompressed: Vec<u8>,
    /// Tracks this object's share of a bounded in-memory budget; `None` once evicted to disk.
    pub mem_recorder: Option<usize>,
    /// True if this entry was still a delta when read out of the pack (kept for diagnostics
    /// after resolution replaces `info` with `BaseObject`).
    pub is_delta_in_pack: bool,
}

impl CacheObject {
    pub fn new_base(obj_type: ObjectType, hash: ObjectHash, offset: usize, data: Vec<u8>) -> Self {
        let size = data.len();
        CacheObject {
            info: CacheObjectInfo::BaseObject(obj_type, hash),
            offset,
            crc32: 0,
            data_decompressed: data,
            mem_recorder: Some(size),
            is_delta_in_pack: false,
        }
    }

    pub fn hash(&self) -> Option<ObjectHash> {
        match &self.info {
            CacheObjectInfo::BaseObject(_, hash) => Some(*hash),
            _ => None,
        }
    }

    pub fn obj_type(&self) -> Option<ObjectType> {
        match &self.info {
            CacheObjectInfo::BaseObject(t, _) => Some(*t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_object_reports_non_delta() {
        let info = CacheObjectInfo::BaseObject(ObjectType::Blob, ObjectHash::default());
        assert!(!info.is_delta());
    }

    #[test]
    fn delta_variants_report_delta() {
        assert!(CacheObjectInfo::OffsetDelta(10).is_delta());
        assert!(CacheObjectInfo::RefDelta(ObjectHash::default()).is_delta());
    }
}
