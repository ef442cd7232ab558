//! Packfile encoder: streams a 12-byte header, one entry per incoming [`Entry`], and a trailing
//! content digest out through an async channel as the bytes are produced.
//!
//! Each entry is offered against a small sliding window of recently written same-type objects and
//! stored as an OFS-delta against whichever window candidate shrinks it the most; entries that
//! don't shrink under any candidate are written as plain base objects. This mirrors the tradeoff
//! real packers make without attempting a full similarity search over the whole object set.

use std::io::Write;

use flate2::{Compression, write::ZlibEncoder};
use tokio::sync::mpsc;

use crate::{
    errors::GitError,
    internal::{
        object::types::ObjectType,
        pack::{entry::Entry, utils::write_entry_header},
    },
    utils::HashAlgorithm,
};

/// Recently written base-type objects kept around as delta candidates for later entries.
struct WindowEntry {
    obj_type: ObjectType,
    data: Vec<u8>,
    offset: usize,
}

/// Streaming packfile writer.
pub struct PackEncoder {
    object_count: usize,
    window_size: usize,
    sender: mpsc::Sender<Vec<u8>>,
    hash: HashAlgorithm,
    bytes_written: usize,
}

impl PackEncoder {
    /// `object_count` must match the number of entries later sent through [`PackEncoder::encode`];
    /// `window_size` bounds how many prior objects are tried as delta bases for each new one.
    pub fn new(object_count: usize, window_size: usize, sender: mpsc::Sender<Vec<u8>>) -> Self {
        PackEncoder {
            object_count,
            window_size: window_size.max(1),
            sender,
            hash: HashAlgorithm::new(),
            bytes_written: 0,
        }
    }

    async fn send(&mut self, data: Vec<u8>) -> Result<(), GitError> {
        self.hash.update(&data);
        self.bytes_written += data.len();
        self.sender.send(data).await.map_err(channel_closed)
    }

    async fn send_trailer(&mut self, digest: Vec<u8>) -> Result<(), GitError> {
        self.sender.send(digest).await.map_err(channel_closed)
    }

    async fn write_header(&mut self) -> Result<(), GitError> {
        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(b"PACK");
        header.extend_from_slice(&2u32.to_be_bytes());
        header.extend_from_slice(&(self.object_count as u32).to_be_bytes());
        self.send(header).await
    }

    /// Consume entries off `entries` until the channel closes, writing each one (as a delta
    /// against the window when that's smaller, otherwise as a base object) to the pack stream.
    pub async fn encode(&mut self, mut entries: mpsc::Receiver<Entry>) -> Result<(), GitError> {
        self.write_header().await?;
        let mut window: Vec<WindowEntry> = Vec::with_capacity(self.window_size);
        let mut written = 0usize;

        while let Some(entry) = entries.recv().await {
            let entry_offset = self.bytes_written;
            let best_delta = window
                .iter()
                .rev()
                .filter(|candidate| candidate.obj_type == entry.obj_type)
                .map(|candidate| {
                    let delta = crate::delta::encode::DeltaDiff::new(&candidate.data, &entry.data).encode();
                    (candidate.offset, delta)
                })
                .filter(|(_, delta)| delta.len() < entry.data.len())
                .min_by_key(|(_, delta)| delta.len());

            let bytes = match best_delta {
                Some((base_offset, delta_bytes)) => {
                    encode_ofs_delta_entry(entry_offset, base_offset, &delta_bytes)?
                }
                None => encode_base_entry(entry.obj_type, &entry.data)?,
            };
            self.send(bytes).await?;

            if window.len() >= self.window_size {
                window.remove(0);
            }
            window.push(WindowEntry {
                obj_type: entry.obj_type,
                data: entry.data,
                offset: entry_offset,
            });
            written += 1;
        }

        if written != self.object_count {
            return Err(GitError::PackEncodeError(format!(
                "expected {} objects, received {written}",
                self.object_count
            )));
        }

        let digest = std::mem::replace(&mut self.hash, HashAlgorithm::new()).finalize();
        self.send_trailer(digest).await
    }
}

fn channel_closed(err: mpsc::error::SendError<Vec<u8>>) -> GitError {
    GitError::IOError(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("pack encoder channel closed: {err}"),
    ))
}

fn zlib_compress(data: &[u8]) -> Result<Vec<u8>, GitError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish().map_err(GitError::IOError)
}

fn encode_base_entry(obj_type: ObjectType, data: &[u8]) -> Result<Vec<u8>, GitError> {
    let mut out = Vec::new();
    write_entry_header(&mut out, obj_type, data.len())?;
    out.extend_from_slice(&zlib_compress(data)?);
    Ok(out)
}

fn encode_ofs_delta_entry(entry_offset: usize, base_offset: usize, delta: &[u8]) -> Result<Vec<u8>, GitError> {
    let mut out = Vec::new();
    write_entry_header(&mut out, ObjectType::OffsetDelta, delta.len())?;
    let neg_offset = (entry_offset - base_offset) as u64;
    out.extend_from_slice(&crate::internal::pack::utils::encode_ofs_offset(neg_offset));
    out.extend_from_slice(&zlib_compress(delta)?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hash::{HashKind, ObjectHash, set_hash_kind_for_test},
        internal::pack::Pack,
    };

    #[tokio::test]
    async fn encodes_and_decodes_plain_blobs() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let entries = vec![
            Entry {
                obj_type: ObjectType::Blob,
                data: b"hello".to_vec(),
                hash: ObjectHash::from_type_and_data(ObjectType::Blob, b"hello"),
                chain_len: 0,
            },
            Entry {
                obj_type: ObjectType::Blob,
                data: b"hello, world".to_vec(),
                hash: ObjectHash::from_type_and_data(ObjectType::Blob, b"hello, world"),
                chain_len: 0,
            },
        ];

        let (entry_tx, entry_rx) = mpsc::channel(8);
        let (pack_tx, mut pack_rx) = mpsc::channel(8);
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

        let mut pack = Pack::new(None, None, None, true);
        let mut cursor = std::io::Cursor::new(pack_bytes);
        let mut decoded = Vec::new();
        pack.decode(&mut cursor, |meta| decoded.push(meta.inner), None::<fn(ObjectHash)>)
            .unwrap();

        assert_eq!(decoded.len(), 2);
        assert_eq!(pack.number, 2);
        let mut datas: Vec<_> = decoded.into_iter().map(|e| e.data).collect();
        datas.sort();
        assert_eq!(datas, vec![b"hello".to_vec(), b"hello, world".to_vec()]);
    }
}
