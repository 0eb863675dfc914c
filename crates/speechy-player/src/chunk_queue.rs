//! FIFO of chunks waiting to be appended to the decode buffer.
//!
//! The queue is not synchronized; it lives inside the session state mutex and only
//! the active drain loop removes entries from it.

use std::collections::VecDeque;

/// Pending chunks in arrival order plus the producer's end-of-stream marker.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    chunks: VecDeque<Vec<u8>>,
    queued_bytes: usize,
    end_of_stream: bool,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk to the tail and optionally mark the stream final.
    ///
    /// Empty chunks carry no audio; only their final flag is kept.
    pub fn enqueue(&mut self, chunk: Vec<u8>, is_final: bool) {
        if !chunk.is_empty() {
            self.queued_bytes += chunk.len();
            self.chunks.push_back(chunk);
        }
        if is_final {
            self.end_of_stream = true;
        }
    }

    /// Remove and return the head chunk, or `None` when empty.
    pub fn dequeue(&mut self) -> Option<Vec<u8>> {
        let chunk = self.chunks.pop_front()?;
        self.queued_bytes -= chunk.len();
        Some(chunk)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Bytes currently queued across all chunks.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// Whether the producer has flagged its final chunk.
    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Up to `max` leading bytes of the queued stream, spanning chunk boundaries.
    pub fn prefix(&self, max: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(max.min(self.queued_bytes));
        for chunk in &self.chunks {
            let take = (max - out.len()).min(chunk.len());
            out.extend_from_slice(&chunk[..take]);
            if out.len() == max {
                break;
            }
        }
        out
    }

    /// Drop every pending chunk and forget the end-of-stream marker.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.queued_bytes = 0;
        self.end_of_stream = false;
    }
}
