//! # Audio Module
//!
//! Getting samples in and out: live capture, the streaming window, the recording
//! session and decoded/encoded WAV audio.
//!
//! ## Key Components:
//! - **Capture**: `AudioInput`/`InputOpener` seam, raw PCM reader input
//! - **Microphone**: cpal-backed system input (feature `microphone`)
//! - **Streaming Buffer**: Bounded FIFO of the most recent chunks
//! - **Recording Session**: Start/stop/tick/save around one open device
//! - **Waveform**: Normalized mono samples plus WAV decode/encode
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod buffer;       // Bounded chunk window for the live view
pub mod capture;      // Device seam and raw PCM input
#[cfg(feature = "microphone")]
pub mod microphone;   // System microphone via cpal
pub mod session;      // Recording lifecycle
pub mod waveform;     // Decoded audio and WAV I/O
