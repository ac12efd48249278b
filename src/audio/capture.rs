//! # Streaming Capture
//!
//! Defines the seam between a recording session and whatever produces samples.
//! The session only ever sees two traits:
//!
//! - **AudioInput**: an open device that hands out one fixed-size chunk per read
//! - **InputOpener**: a factory that opens such a device for a capture format
//!
//! ## Implementations:
//! - **ReaderInput**: raw little-endian 16-bit PCM from any `Read` (stdin, a pipe, a file)
//! - **Microphone** (feature `microphone`): the default system input via cpal
//!
//! Reads block until a full chunk is available or the source fails. A failed or short
//! read is reported as `StreamRead` and nothing from it is kept.

use crate::config::CaptureConfig;
use crate::error::{AppError, AppResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

/// An open input device.
pub trait AudioInput {
    /// Block until exactly one chunk of `chunk_size` samples is available.
    fn read_chunk(&mut self) -> AppResult<Vec<i16>>;

    /// Release the device. Calling it more than once is harmless.
    fn close(&mut self);
}

/// Opens input devices in the fixed capture format.
pub trait InputOpener {
    fn open(&mut self, config: &CaptureConfig) -> AppResult<Box<dyn AudioInput>>;
}

impl<F> InputOpener for F
where
    F: FnMut(&CaptureConfig) -> AppResult<Box<dyn AudioInput>>,
{
    fn open(&mut self, config: &CaptureConfig) -> AppResult<Box<dyn AudioInput>> {
        self(config)
    }
}

/// Raw PCM input from a byte stream.
///
/// ## Example:
/// `arecord -f S16_LE -r 16000 -c 1 | voice-feature-analyzer live --stdin`
pub struct ReaderInput<R: Read> {
    reader: Option<R>,
    chunk_size: usize,
}

impl<R: Read> ReaderInput<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader: Some(reader),
            chunk_size,
        }
    }
}

impl<R: Read> AudioInput for ReaderInput<R> {
    fn read_chunk(&mut self) -> AppResult<Vec<i16>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| AppError::StreamRead("input is closed".to_string()))?;

        let mut chunk = vec![0i16; self.chunk_size];
        reader
            .read_i16_into::<LittleEndian>(&mut chunk)
            .map_err(|e| AppError::StreamRead(format!("chunk read failed: {}", e)))?;
        Ok(chunk)
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Opener that wraps stdin. It can be opened once; stdin cannot be reopened.
pub fn stdin_opener() -> impl InputOpener {
    let mut consumed = false;
    move |config: &CaptureConfig| -> AppResult<Box<dyn AudioInput>> {
        if consumed {
            return Err(AppError::Device("stdin was already consumed".to_string()));
        }
        consumed = true;
        Ok(Box::new(ReaderInput::new(std::io::stdin(), config.chunk_size)))
    }
}
