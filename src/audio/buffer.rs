//! # Streaming Buffer
//!
//! Implements the bounded window of recent capture chunks that feeds the live view.
//! Chunks arrive one per tick; once the window is full, each new chunk evicts the
//! oldest one, so the buffer always describes the most recent `capacity` chunks.
//!
//! ## Key Features:
//! - **Bounded FIFO**: Length never exceeds capacity, eviction is oldest-first
//! - **Whole chunks only**: A chunk of the wrong length is rejected, never partially inserted
//! - **Contiguous view**: Concatenation yields one waveform at the capture rate

use crate::error::{AppError, AppResult};
use std::collections::VecDeque;

/// Bounded FIFO of raw 16-bit chunks.
///
/// ## Memory Management:
/// - At most `capacity * chunk_size` samples are held at any time
/// - VecDeque gives O(1) push at the back and eviction at the front
#[derive(Debug, Clone)]
pub struct StreamingBuffer {
    /// Most recent chunks, oldest first
    chunks: VecDeque<Vec<i16>>,

    /// Maximum number of chunks kept
    capacity: usize,

    /// Expected length of every chunk in samples
    chunk_size: usize,
}

impl StreamingBuffer {
    /// Create an empty buffer holding at most `capacity` chunks of `chunk_size` samples.
    ///
    /// ## Example:
    /// 5 chunks of 3200 samples at 16kHz = 16,000 samples = 1 second of audio
    pub fn new(capacity: usize, chunk_size: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(capacity),
            capacity,
            chunk_size,
        }
    }

    /// Append one chunk, evicting the oldest chunk when the window is full.
    ///
    /// ## Error Handling:
    /// Returns `StreamRead` when the chunk length is not `chunk_size`; the buffer is
    /// left untouched in that case.
    pub fn push(&mut self, chunk: Vec<i16>) -> AppResult<()> {
        if chunk.len() != self.chunk_size {
            return Err(AppError::StreamRead(format!(
                "expected a {}-sample chunk, got {}",
                self.chunk_size,
                chunk.len()
            )));
        }

        if self.capacity == 0 {
            return Ok(());
        }
        while self.chunks.len() >= self.capacity {
            self.chunks.pop_front();
        }
        self.chunks.push_back(chunk);
        Ok(())
    }

    /// Number of chunks currently held.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total samples across all chunks.
    pub fn sample_count(&self) -> usize {
        self.chunks.len() * self.chunk_size
    }

    /// Chunks in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &[i16]> {
        self.chunks.iter().map(|c| c.as_slice())
    }

    /// All samples concatenated in arrival order.
    pub fn concat(&self) -> Vec<i16> {
        let mut samples = Vec::with_capacity(self.sample_count());
        for chunk in &self.chunks {
            samples.extend_from_slice(chunk);
        }
        samples
    }

    /// Clear all chunks.
    ///
    /// ## Usage:
    /// Called when a recording starts and after a recording is saved.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(value: i16, len: usize) -> Vec<i16> {
        vec![value; len]
    }

    #[test]
    fn test_fifo_eviction_keeps_most_recent() {
        let mut buffer = StreamingBuffer::new(5, 4);
        for i in 0..7 {
            buffer.push(chunk(i, 4)).unwrap();
        }
        assert_eq!(buffer.len(), 5);
        let firsts: Vec<i16> = buffer.iter().map(|c| c[0]).collect();
        assert_eq!(firsts, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let mut buffer = StreamingBuffer::new(3, 2);
        for i in 0..20 {
            buffer.push(chunk(i, 2)).unwrap();
            assert!(buffer.len() <= 3);
        }
    }

    #[test]
    fn test_concat_length_is_k_times_chunk() {
        let mut buffer = StreamingBuffer::new(5, 3200);
        for k in 1..=5 {
            buffer.push(chunk(k as i16, 3200)).unwrap();
            assert_eq!(buffer.concat().len(), k * 3200);
        }
        buffer.push(chunk(9, 3200)).unwrap();
        assert_eq!(buffer.concat().len(), 5 * 3200);
    }

    #[test]
    fn test_wrong_chunk_length_rejected() {
        let mut buffer = StreamingBuffer::new(2, 4);
        buffer.push(chunk(1, 4)).unwrap();
        let err = buffer.push(chunk(2, 3)).unwrap_err();
        assert!(matches!(err, AppError::StreamRead(_)));
        assert_eq!(buffer.len(), 1);
    }
}
