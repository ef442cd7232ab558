//! Integration tests that encode packs in memory, decode them back, rebuild their `.idx` files, and
//! assert offsets match the encoder's own pack layout for both SHA-1 and SHA-256 object formats.

use std::{collections::HashMap, convert::TryInto};

use rgit_core::{
    errors::GitError,
    hash::{HashKind, ObjectHash, set_hash_kind_for_test},
    internal::{
        metadata::{EntryMeta, MetaAttached},
        object::types::ObjectType,
        pack::{
            Pack,
            encode::PackEncoder,
            entry::Entry,
            pack_index::{IdxBuilder, IndexEntry},
        },
    },
};
use tokio::sync::mpsc;

fn blob_entry(data: &[u8]) -> Entry {
    Entry {
        obj_type: ObjectType::Blob,
        data: data.to_vec(),
        hash: ObjectHash::from_type_and_data(ObjectType::Blob, data),
        chain_len: 0,
    }
}

/// Entries for the "small" fixture: a handful of unrelated blobs, none similar enough to delta well.
fn small_entries() -> Vec<Entry> {
    vec![
        blob_entry(b"alpha"),
        blob_entry(b"bravo bravo bravo"),
        blob_entry(b"the quick brown fox jumps over the lazy dog"),
    ]
}

/// Entries for the "delta" fixture: a base blob plus near-duplicates that should compress well as
/// deltas against an earlier same-type entry in the encoder's window.
fn delta_entries() -> Vec<Entry> {
    let base = b"the quick brown fox jumps over the lazy dog, every single day".to_vec();
    let mut near1 = base.clone();
    near1.extend_from_slice(b" and then some more");
    let mut near2 = base.clone();
    near2[4] = b'Q';
    vec![blob_entry(&base), blob_entry(&near1), blob_entry(&near2)]
}

async fn build_pack_bytes(entries: Vec<Entry>) -> Vec<u8> {
    let (entry_tx, entry_rx) = mpsc::channel(entries.len().max(1));
    let (pack_tx, mut pack_rx) = mpsc::channel(64);
    let mut encoder = PackEncoder::new(entries.len(), 10, pack_tx);

    let send_task = tokio::spawn(async move {
        for entry in entries {
            entry_tx.send(entry).await.unwrap();
        }
    });
    let encode_task = tokio::spawn(async move { encoder.encode(entry_rx).await });

    let mut pack_bytes = Vec::new();
    while let Some(chunk) = pack_rx.recv().await {
        pack_bytes.extend_from_slice(&chunk);
    }
    send_task.await.unwrap();
    encode_task.await.unwrap().unwrap();
    pack_bytes
}

type DecodePackResult = Result<(Vec<MetaAttached<Entry, EntryMeta>>, ObjectHash, usize), GitError>;

fn decode_pack(pack_bytes: Vec<u8>) -> DecodePackResult {
    let mut cursor = std::io::Cursor::new(pack_bytes);
    let mut pack = Pack::new(Some(2), Some(64 * 1024 * 1024), None, true);

    let mut metas = Vec::new();
    pack.decode(&mut cursor, |entry| metas.push(entry), None::<fn(ObjectHash)>)?;
    Ok((metas, pack.signature, pack.number))
}

fn parse_idx_offsets(idx_bytes: &[u8], kind: HashKind) -> HashMap<Vec<u8>, u64> {
    assert!(idx_bytes.len() >= 8, "idx too short");
    assert_eq!(&idx_bytes[0..4], &[0xFF, 0x74, 0x4F, 0x63], "idx magic");
    let version = u32::from_be_bytes(idx_bytes[4..8].try_into().unwrap());

    assert_eq!(version, 2, "idx version must be 2 per pack-format spec");
    let mut cursor = 8usize;

    // Fanout
    let mut fanout = [0u32; 256];
    for i in 0..256 {
        fanout[i] = u32::from_be_bytes(
            idx_bytes[cursor + i * 4..cursor + i * 4 + 4]
                .try_into()
                .unwrap(),
        );
    }
    cursor += 256 * 4;

    let object_count = fanout[255] as usize;

    let hash_len = kind.size();
    let names_end = cursor + object_count * hash_len;
    let names = &idx_bytes[cursor..names_end];
    cursor = names_end;

    // Skip CRCs
    cursor += object_count * 4;

    // Offsets table
    let offsets_end = cursor + object_count * 4;
    let offsets_bytes = &idx_bytes[cursor..offsets_end];
    cursor = offsets_end;

    let large_count = offsets_bytes
        .chunks_exact(4)
        .filter(|raw| u32::from_be_bytes((*raw).try_into().unwrap()) & 0x8000_0000 != 0)
        .count();

    let mut large_offsets = Vec::with_capacity(large_count);
    for _ in 0..large_count {
        let v = u64::from_be_bytes(idx_bytes[cursor..cursor + 8].try_into().unwrap());
        large_offsets.push(v);
        cursor += 8;
    }

    let mut map = HashMap::new();
    for (i, raw) in offsets_bytes.chunks_exact(4).enumerate() {
        let raw = u32::from_be_bytes(raw.try_into().unwrap());
        let offset = if raw & 0x8000_0000 == 0 {
            raw as u64
        } else {
            let idx = (raw & 0x7FFF_FFFF) as usize;
            large_offsets[idx]
        };
        let hash = names[i * hash_len..(i + 1) * hash_len].to_vec();
        map.insert(hash, offset);
    }
    map
}

async fn roundtrip(entries: Vec<Entry>, kind: HashKind) -> Result<(), GitError> {
    let _guard = set_hash_kind_for_test(kind);
    let expected_count = entries.len();
    let pack_bytes = build_pack_bytes(entries).await;
    let (metas, pack_hash, count) = decode_pack(pack_bytes)?;
    assert_eq!(count, expected_count, "decoded object count mismatch");
    assert_eq!(metas.len(), count, "decoded entries count mismatch");

    let mut idx_entries = Vec::with_capacity(metas.len());
    for m in &metas {
        idx_entries.push(IndexEntry::try_from(m)?);
    }

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1024);
    let mut builder = IdxBuilder::new(idx_entries.len(), tx, pack_hash);
    builder.write_idx(idx_entries).await?;

    let mut idx_bytes = Vec::new();
    while let Some(chunk) = rx.recv().await {
        idx_bytes.extend_from_slice(&chunk);
    }

    let offsets_map = parse_idx_offsets(&idx_bytes, kind);
    for meta in metas {
        let hash = meta.inner.hash.to_data();
        let expected = meta.meta.pack_offset.expect("missing pack offset") as u64;
        let actual = *offsets_map
            .get(&hash)
            .unwrap_or_else(|| panic!("hash missing in idx: {}", meta.inner.hash));
        assert_eq!(actual, expected, "offset mismatch for {}", meta.inner.hash);
    }
    Ok(())
}

#[tokio::test]
async fn idx_offsets_match_sha1_small() -> Result<(), GitError> {
    roundtrip(small_entries(), HashKind::Sha1).await
}

#[tokio::test]
async fn idx_offsets_match_sha1_delta() -> Result<(), GitError> {
    roundtrip(delta_entries(), HashKind::Sha1).await
}

#[tokio::test]
async fn idx_offsets_match_sha256_small() -> Result<(), GitError> {
    roundtrip(small_entries(), HashKind::Sha256).await
}

#[tokio::test]
async fn idx_offsets_match_sha256_delta() -> Result<(), GitError> {
    roundtrip(delta_entries(), HashKind::Sha256).await
}
