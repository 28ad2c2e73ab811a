//! Chunked byte buffer addressed by absolute file offset.
//!
//! Input arrives as opaque chunks of arbitrary size. The buffer strings them
//! together into one logical byte range aligned with the input file, hands out
//! zero-copy views into it, and releases memory as the tokenizer advances past
//! consumed regions.

use std::collections::VecDeque;
use std::sync::Arc;

/// A reference-counted window into an immutable byte blob.
///
/// Slicing shares the underlying allocation, so views stay valid after the
/// buffer that produced them has advanced past their range.
#[derive(Clone, Debug)]
pub struct TraceBlobView {
    blob: Arc<[u8]>,
    offset: usize,
    len: usize,
}

impl TraceBlobView {
    pub fn new(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            blob: Arc::from(data),
            offset: 0,
            len,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.blob[self.offset..self.offset + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sub-window relative to the start of this view, sharing the blob.
    pub fn slice(&self, offset: usize, len: usize) -> TraceBlobView {
        assert!(offset + len <= self.len, "slice out of view bounds");
        Self {
            blob: Arc::clone(&self.blob),
            offset: self.offset + offset,
            len,
        }
    }
}

impl From<&[u8]> for TraceBlobView {
    fn from(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }
}

struct BufferedBlob {
    // Absolute file offset of the first byte of `view`.
    start: u64,
    view: TraceBlobView,
}

impl BufferedBlob {
    fn end(&self) -> u64 {
        self.start + self.view.len() as u64
    }
}

/// Append-only rope of arrived chunks.
///
/// All addressing is in absolute file offsets. `start_offset` only ever moves
/// forward; bytes before it have been released and must not be requested
/// again.
#[derive(Default)]
pub struct ByteBuffer {
    blobs: VecDeque<BufferedBlob>,
    start_offset: u64,
    end_offset: u64,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, view: TraceBlobView) {
        if view.is_empty() {
            return;
        }
        let start = self.end_offset;
        self.end_offset += view.len() as u64;
        self.blobs.push_back(BufferedBlob { start, view });
    }

    /// Absolute offset of the first byte still held.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Absolute offset one past the last byte received.
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// A view of `[offset, offset + len)` if that range is wholly buffered.
    ///
    /// Zero-copy when the range falls inside a single chunk; ranges spanning
    /// chunk boundaries are stitched into a fresh allocation. `None` means the
    /// range is not (or no longer) available and the caller should wait for
    /// more data.
    pub fn slice_off(&self, offset: u64, len: usize) -> Option<TraceBlobView> {
        if len == 0 {
            return Some(TraceBlobView::new(Vec::new()));
        }
        let end = offset.checked_add(len as u64)?;
        if offset < self.start_offset || end > self.end_offset {
            return None;
        }

        let idx = self.blobs.partition_point(|b| b.end() <= offset);
        let first = &self.blobs[idx];
        let rel = (offset - first.start) as usize;
        if rel + len <= first.view.len() {
            return Some(first.view.slice(rel, len));
        }

        let mut out = Vec::with_capacity(len);
        let mut remaining = len;
        let mut rel = rel;
        for blob in self.blobs.iter().skip(idx) {
            let take = remaining.min(blob.view.len() - rel);
            out.extend_from_slice(&blob.view.data()[rel..rel + take]);
            remaining -= take;
            rel = 0;
            if remaining == 0 {
                break;
            }
        }
        Some(TraceBlobView::new(out))
    }

    /// Advances `start_offset` to `offset`, releasing everything before it.
    ///
    /// Returns false if `offset` lies beyond the received data. Moving the
    /// start backwards violates the memory discipline and panics.
    pub fn pop_front_until(&mut self, offset: u64) -> bool {
        assert!(
            offset >= self.start_offset,
            "buffer start offset must not move backwards"
        );
        if offset > self.end_offset {
            return false;
        }
        while let Some(front) = self.blobs.front() {
            if front.end() <= offset {
                self.blobs.pop_front();
            } else {
                break;
            }
        }
        if let Some(front) = self.blobs.front_mut() {
            if offset > front.start {
                let cut = (offset - front.start) as usize;
                front.view = front.view.slice(cut, front.view.len() - cut);
                front.start = offset;
            }
        }
        self.start_offset = offset;
        true
    }

    pub fn pop_front_bytes(&mut self, bytes: u64) {
        let target = self.start_offset + bytes;
        let ok = self.pop_front_until(target);
        assert!(ok, "pop_front_bytes past end of buffered data");
    }
}
