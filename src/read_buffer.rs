//! The append-and-drain buffer staging inbound bytes until the user reads them.
//! SPDX-License-Identifier: Apache-2.0 OR GPL-3.0-or-later

use std::collections::VecDeque;

use bytes::{Buf, Bytes};

/// Ordered byte sequence that arrived from the wire but hasn't been
/// delivered to the user yet.
///
/// Stored as a deque of `Bytes` chunks rather than one contiguous buffer, so
/// `add` never copies: inbound frame payloads are handed over by reference
/// count and advanced in place rather than re-packed on every partial read.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    chunks: VecDeque<Bytes>,
    size: usize,
}

impl ReadBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes currently buffered.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Append a chunk without copying it.
    pub fn add(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.size += bytes.len();
        self.chunks.push_back(bytes);
    }

    /// Drain up to `dst.len()` bytes into `dst`, in order, advancing past
    /// fully-consumed chunks. Returns the number of bytes copied, which may
    /// be less than `dst.len()` if the buffer runs dry, or `0`.
    pub fn consume(&mut self, dst: &mut [u8]) -> usize {
        let mut n = 0;
        while n < dst.len() {
            let Some(chunk) = self.chunks.front_mut() else {
                break;
            };
            if chunk.is_empty() {
                self.chunks.pop_front();
                continue;
            }
            let k = chunk.remaining().min(dst.len() - n);
            dst[n..n + k].copy_from_slice(&chunk[..k]);
            chunk.advance(k);
            n += k;
            if chunk.is_empty() {
                self.chunks.pop_front();
            }
        }
        self.size -= n;
        n
    }

    /// Append `src` then drain into `dst`, but skip the round trip through
    /// the deque when the buffer is already empty: the incoming chunk is
    /// sliced straight into the user's buffer and only the leftover (if any)
    /// is parked.
    pub fn add_and_consume(&mut self, src: Bytes, dst: &mut [u8]) -> usize {
        if self.chunks.is_empty() {
            let mut src = src;
            let k = src.remaining().min(dst.len());
            dst[..k].copy_from_slice(&src[..k]);
            src.advance(k);
            if !src.is_empty() {
                self.size += src.len();
                self.chunks.push_back(src);
            }
            k
        } else {
            self.add(src);
            self.consume(dst)
        }
    }

    /// Drop all buffered bytes without delivering them anywhere.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.size = 0;
    }
}
