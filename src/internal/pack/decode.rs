//! Packfile decoder: validates the 12-byte header, reads each entry's variable-length type+size
//! header, inflates its zlib payload, resolves OFS/REF deltas against bases already seen in the
//! same pack, and verifies the trailing content digest.
//!
//! Deltas whose base has not been read yet (legal for REF-delta, and for thin packs) are held back
//! and retried in a handful of extra passes once the main entry stream is exhausted; a pack that
//! still has unresolved deltas after that is rejected rather than looped over forever.

use std::{
    collections::HashMap,
    io::{BufRead, Read},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use threadpool::ThreadPool;

use crate::{
    errors::GitError,
    hash::{ObjectHash, get_hash_kind},
    internal::{
        metadata::{EntryMeta, MetaAttached},
        object::{
            ObjectTrait, blob::Blob, commit::Commit, tag::Tag, tree::Tree, types::ObjectType,
        },
        pack::{
            Pack,
            cache::Caches,
            cache_object::CacheObjectInfo,
            entry::Entry,
            utils::{decode_ofs_offset, read_entry_header},
            waitlist::Waitlist,
            wrapper::Wrapper,
        },
        zlib::stream::inflate::ReadBoxed,
    },
};

const MAX_DELTA_RESOLUTION_PASSES: usize = 10;
const PACK_MAGIC: &[u8; 4] = b"PACK";
const PACK_VERSION: u32 = 2;

/// A delta entry read from the pack whose base was not yet known, kept around for the
/// post-pass resolution loop.
struct PendingDelta {
    offset: usize,
    info: CacheObjectInfo,
    data: Vec<u8>,
}

/// A fully resolved object: its canonical type, payload, and delta chain depth (0 for a
/// base object actually stored in the pack).
type Resolved = (ObjectType, Vec<u8>, usize);

impl Pack {
    /// Build a new, empty `Pack` ready to decode a stream.
    ///
    /// `thread_num` sizes the worker pool kept around for future parallel decode work;
    /// `mem_limit` bounds the resolved-object cache, spilling to `temp_path` past that budget.
    pub fn new(
        thread_num: Option<usize>,
        mem_limit: Option<usize>,
        temp_path: Option<std::path::PathBuf>,
        clean_tmp: bool,
    ) -> Self {
        let threads = thread_num.unwrap_or_else(num_cpus::get);
        Pack {
            number: 0,
            signature: ObjectHash::default(),
            objects: Vec::new(),
            pool: Arc::new(ThreadPool::new(threads.max(1))),
            waitlist: Arc::new(Waitlist::new()),
            caches: Arc::new(Caches::new(mem_limit.unwrap_or(256 * 1024 * 1024), temp_path)),
            mem_limit,
            cache_objs_mem: Arc::new(AtomicUsize::new(0)),
            clean_tmp,
        }
    }

    /// Decode a full pack stream, calling `on_entry` once per resolved object (in pack order for
    /// base objects, and as soon as each delta resolves) and `on_complete`, if given, with each
    /// object's final hash.
    pub fn decode<R, F, C>(
        &mut self,
        reader: &mut R,
        mut on_entry: F,
        mut on_complete: Option<C>,
    ) -> Result<(), GitError>
    where
        R: BufRead,
        F: FnMut(MetaAttached<Entry, EntryMeta>),
        C: FnMut(ObjectHash),
    {
        let mut wrapper = Wrapper::new(reader);

        let mut magic = [0u8; 4];
        wrapper.read_exact(&mut magic)?;
        if &magic != PACK_MAGIC {
            return Err(GitError::InvalidPackHeader(format!(
                "bad signature {magic:?}, expected {PACK_MAGIC:?}"
            )));
        }
        let mut version_bytes = [0u8; 4];
        wrapper.read_exact(&mut version_bytes)?;
        let version = u32::from_be_bytes(version_bytes);
        if version != PACK_VERSION {
            return Err(GitError::InvalidPackHeader(format!(
                "unsupported pack version {version}"
            )));
        }
        let mut count_bytes = [0u8; 4];
        wrapper.read_exact(&mut count_bytes)?;
        let object_count = u32::from_be_bytes(count_bytes) as usize;

        let mut resolved_by_offset: HashMap<usize, Resolved> = HashMap::with_capacity(object_count);
        let mut resolved_by_hash: HashMap<ObjectHash, Resolved> = HashMap::with_capacity(object_count);
        let mut pending: Vec<PendingDelta> = Vec::new();

        for _ in 0..object_count {
            let entry_offset = wrapper.bytes_read();
            let (type_id, size) = read_entry_header(&mut wrapper)?;

            match type_id {
                1..=4 => {
                    let obj_type = ObjectType::from_pack_type_u8(type_id)?;
                    let mut inflate = ReadBoxed::new(&mut wrapper, obj_type, size);
                    let mut data = Vec::with_capacity(size);
                    inflate.read_to_end(&mut data)?;
                    let hash = ObjectHash::from_type_and_data(obj_type, &data);

                    resolved_by_offset.insert(entry_offset, (obj_type, data.clone(), 0));
                    resolved_by_hash.insert(hash, (obj_type, data.clone(), 0));
                    self.finalize(
                        entry_offset,
                        obj_type,
                        hash,
                        data,
                        0,
                        &mut on_entry,
                        &mut on_complete,
                    );
                }
                6 => {
                    let neg_offset = decode_ofs_offset(&mut wrapper)?;
                    let base_offset = entry_offset.checked_sub(neg_offset as usize).ok_or_else(|| {
                        GitError::MalformedPackfile(format!(
                            "ofs-delta at {entry_offset} points before the start of the pack"
                        ))
                    })?;
                    let mut inflate = ReadBoxed::new_for_delta(&mut wrapper);
                    let mut delta_bytes = Vec::with_capacity(size);
                    inflate.read_to_end(&mut delta_bytes)?;

                    if let Some((base_type, base_data, base_chain)) =
                        resolved_by_offset.get(&base_offset).cloned()
                    {
                        let data = apply_delta(&base_data, &delta_bytes)?;
                        let hash = ObjectHash::from_type_and_data(base_type, &data);
                        resolved_by_offset.insert(entry_offset, (base_type, data.clone(), base_chain + 1));
                        resolved_by_hash.insert(hash, (base_type, data.clone(), base_chain + 1));
                        self.finalize(
                            entry_offset,
                            base_type,
                            hash,
                            data,
                            base_chain + 1,
                            &mut on_entry,
                            &mut on_complete,
                        );
                    } else {
                        pending.push(PendingDelta {
                            offset: entry_offset,
                            info: CacheObjectInfo::OffsetDelta(base_offset),
                            data: delta_bytes,
                        });
                    }
                }
                7 => {
                    let mut base_hash_bytes = vec![0u8; get_hash_kind().size()];
                    wrapper.read_exact(&mut base_hash_bytes)?;
                    let base_hash =
                        ObjectHash::from_bytes(&base_hash_bytes).map_err(GitError::InvalidHashValue)?;
                    let mut inflate = ReadBoxed::new_for_delta(&mut wrapper);
                    let mut delta_bytes = Vec::with_capacity(size);
                    inflate.read_to_end(&mut delta_bytes)?;

                    if let Some((base_type, base_data, base_chain)) =
                        resolved_by_hash.get(&base_hash).cloned()
                    {
                        let data = apply_delta(&base_data, &delta_bytes)?;
                        let hash = ObjectHash::from_type_and_data(base_type, &data);
                        resolved_by_offset.insert(entry_offset, (base_type, data.clone(), base_chain + 1));
                        resolved_by_hash.insert(hash, (base_type, data.clone(), base_chain + 1));
                        self.finalize(
                            entry_offset,
                            base_type,
                            hash,
                            data,
                            base_chain + 1,
                            &mut on_entry,
                            &mut on_complete,
                        );
                    } else {
                        pending.push(PendingDelta {
                            offset: entry_offset,
                            info: CacheObjectInfo::RefDelta(base_hash),
                            data: delta_bytes,
                        });
                    }
                }
                other => {
                    return Err(GitError::InvalidPackHeader(format!(
                        "unknown pack entry type id {other}"
                    )));
                }
            }
        }

        let mut pass = 0;
        while !pending.is_empty() && pass < MAX_DELTA_RESOLUTION_PASSES {
            pass += 1;
            let mut still_pending = Vec::new();
            for item in pending {
                let base = match &item.info {
                    CacheObjectInfo::OffsetDelta(base_offset) => resolved_by_offset.get(base_offset).cloned(),
                    CacheObjectInfo::RefDelta(base_hash) => resolved_by_hash.get(base_hash).cloned(),
                    CacheObjectInfo::BaseObject(..) => None,
                };
                match base {
                    Some((base_type, base_data, base_chain)) => {
                        let data = apply_delta(&base_data, &item.data)?;
                        let hash = ObjectHash::from_type_and_data(base_type, &data);
                        resolved_by_offset.insert(item.offset, (base_type, data.clone(), base_chain + 1));
                        resolved_by_hash.insert(hash, (base_type, data.clone(), base_chain + 1));
                        self.finalize(
                            item.offset,
                            base_type,
                            hash,
                            data,
                            base_chain + 1,
                            &mut on_entry,
                            &mut on_complete,
                        );
                    }
                    None => still_pending.push(item),
                }
            }
            pending = still_pending;
        }
        if !pending.is_empty() {
            return Err(GitError::DeltaChainUnresolvable(format!(
                "{} object(s) never found their base after {MAX_DELTA_RESOLUTION_PASSES} passes",
                pending.len()
            )));
        }

        let computed = wrapper.final_hash();
        let mut trailer = vec![0u8; get_hash_kind().size()];
        wrapper.read_exact(&mut trailer)?;
        let stored = ObjectHash::from_bytes(&trailer).map_err(GitError::InvalidHashValue)?;
        if stored != computed {
            return Err(GitError::MalformedPackfile(format!(
                "trailer digest mismatch: pack claims {stored}, computed {computed}"
            )));
        }

        self.number = object_count;
        self.signature = stored;
        Ok(())
    }

    /// Record a resolved object: stash its typed form in `self.objects`, then notify the caller's
    /// per-entry and (if given) completion callbacks.
    fn finalize<F, C>(
        &mut self,
        offset: usize,
        obj_type: ObjectType,
        hash: ObjectHash,
        data: Vec<u8>,
        chain_len: usize,
        on_entry: &mut F,
        on_complete: &mut Option<C>,
    ) where
        F: FnMut(MetaAttached<Entry, EntryMeta>),
        C: FnMut(ObjectHash),
    {
        if let Ok(object) = build_object(obj_type, hash, &data) {
            self.cache_objs_mem.fetch_add(data.len(), Ordering::Relaxed);
            self.objects.push(object);
        }

        let mut meta = EntryMeta::new();
        meta.pack_offset = Some(offset);
        meta.is_delta = Some(chain_len > 0);

        let entry = Entry {
            obj_type,
            data,
            hash,
            chain_len,
        };
        on_entry(MetaAttached { inner: entry, meta });
        if let Some(cb) = on_complete.as_mut() {
            cb(hash);
        }
    }
}

fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, GitError> {
    crate::delta::decode::delta_decode(&mut std::io::Cursor::new(delta), base)
        .map_err(|e| GitError::MalformedDelta(e.to_string()))
}

fn build_object(obj_type: ObjectType, hash: ObjectHash, data: &[u8]) -> Result<Box<dyn ObjectTrait>, GitError> {
    Ok(match obj_type {
        ObjectType::Commit => Box::new(Commit::from_bytes(data, hash)?),
        ObjectType::Tree => Box::new(Tree::from_bytes(data, hash)?),
        ObjectType::Blob => Box::new(Blob::from_bytes(data, hash)?),
        ObjectType::Tag => Box::new(Tag::from_bytes(data, hash)?),
        ObjectType::OffsetDelta | ObjectType::HashDelta => {
            return Err(GitError::InvalidObjectType(obj_type.to_string()));
        }
    })
}
