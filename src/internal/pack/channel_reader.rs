//! Bridges a channel of incoming byte chunks (as produced by an async HTTP body stream) into the
//! synchronous [`std::io::BufRead`] that [`super::Pack::decode`] expects, so a pack can be decoded
//! as its bytes arrive instead of being buffered into one `Vec<u8>` first.

use std::io::{self, BufRead, Read};

/// Synchronous reader over a blocking channel of byte chunks.
///
/// Each `recv()` call blocks the current thread until either a chunk arrives or the sender side
/// is dropped, at which point reads return `Ok(0)` (EOF). Intended to be driven from a dedicated
/// blocking thread (e.g. via `tokio::task::spawn_blocking`) while an async task feeds chunks in
/// through the paired sender.
pub struct ChannelReader {
    receiver: std::sync::mpsc::Receiver<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
}

impl ChannelReader {
    pub fn new(receiver: std::sync::mpsc::Receiver<Vec<u8>>) -> Self {
        ChannelReader {
            receiver,
            current: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for ChannelReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.current.len() {
            match self.receiver.recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Err(_) => {
                    self.current.clear();
                    self.pos = 0;
                }
            }
        }
        Ok(&self.current[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.current.len());
    }
}
