//! Chunked byte buffer
//!
//! `Buffer` is an ordered sequence of immutable byte chunks. Appending and
//! consuming move whole or partial chunks; the bytes themselves are never
//! copied (chunks are `bytes::Bytes`, which share refcounted storage).
//!
//! This is the payload carrier for `Event::Data`: a filter that slices a
//! message body out of a network read holds views into the same allocation
//! the socket read produced.

use std::collections::VecDeque;

use bytes::Bytes;

/// Chunk unit for socket reads and file readers.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Ordered sequence of immutable byte chunks.
///
/// Cloning is shallow: both buffers see the same chunk storage.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total byte length across all chunks.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a chunk. Empty chunks are dropped.
    pub fn push(&mut self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        if !chunk.is_empty() {
            self.len += chunk.len();
            self.chunks.push_back(chunk);
        }
    }

    /// Append every chunk of another buffer (shallow).
    pub fn push_buffer(&mut self, other: &Buffer) {
        for chunk in &other.chunks {
            self.chunks.push_back(chunk.clone());
        }
        self.len += other.len;
    }

    /// Consume and return up to `n` bytes from the front.
    ///
    /// Chunks are moved, not copied; a chunk straddling the boundary is
    /// split with `Bytes::split_to` (both halves share storage).
    pub fn shift(&mut self, n: usize) -> Buffer {
        let mut out = Buffer::new();
        let mut remaining = n;
        while remaining > 0 {
            let Some(mut chunk) = self.chunks.pop_front() else {
                break;
            };
            if chunk.len() <= remaining {
                remaining -= chunk.len();
                self.len -= chunk.len();
                out.push(chunk);
            } else {
                let head = chunk.split_to(remaining);
                self.len -= head.len();
                out.push(head);
                self.chunks.push_front(chunk);
                remaining = 0;
            }
        }
        out
    }

    /// Drop all chunks.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }

    /// Take the whole buffer, leaving this one empty.
    pub fn take(&mut self) -> Buffer {
        std::mem::take(self)
    }

    /// Iterate the chunks in order.
    pub fn chunks(&self) -> impl Iterator<Item = &Bytes> {
        self.chunks.iter()
    }

    /// Number of chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Copy out a contiguous view. Codecs use this when they need to parse
    /// across chunk boundaries; the hot path should iterate chunks instead.
    pub fn to_bytes(&self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks[0].clone(),
            _ => {
                let mut out = Vec::with_capacity(self.len);
                for chunk in &self.chunks {
                    out.extend_from_slice(chunk);
                }
                Bytes::from(out)
            }
        }
    }
}

impl From<Bytes> for Buffer {
    fn from(chunk: Bytes) -> Self {
        let mut buf = Buffer::new();
        buf.push(chunk);
        buf
    }
}

impl From<&[u8]> for Buffer {
    fn from(slice: &[u8]) -> Self {
        Buffer::from(Bytes::copy_from_slice(slice))
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(vec: Vec<u8>) -> Self {
        Buffer::from(Bytes::from(vec))
    }
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod buffer_test;
