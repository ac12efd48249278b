//! # Waveform Source
//!
//! Produces the immutable [`Waveform`] every analysis consumes, either from the live
//! streaming window or from an uploaded WAV file, and encodes waveforms back to WAV.
//!
//! ## Sample Representation:
//! - Samples are `f64` normalized to [-1.0, 1.0) by dividing 16-bit values by 32768
//! - That scale makes a 16-bit round trip exact: decode(encode(w)) == w
//! - Multi-channel input is downmixed to mono by averaging the channels of each frame

use crate::audio::buffer::StreamingBuffer;
use crate::error::{AppError, AppResult};
use std::io::Cursor;
use std::path::Path;

/// Full-scale value of 16-bit PCM
const I16_SCALE: f64 = 32768.0;

/// Mono audio samples at a fixed rate.
///
/// ## Invariants:
/// - `sample_rate` is positive
/// - The value is never mutated after construction; analyses borrow it
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Vec<f64>,
    sample_rate: u32,
}

impl Waveform {
    /// Wrap normalized samples.
    pub fn new(samples: Vec<f64>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Build from raw 16-bit samples.
    pub fn from_i16(samples: &[i16], sample_rate: u32) -> Self {
        Self::new(
            samples.iter().map(|&s| s as f64 / I16_SCALE).collect(),
            sample_rate,
        )
    }

    /// Concatenate the streaming window in arrival order at the capture rate.
    pub fn from_streaming_buffer(buffer: &StreamingBuffer, sample_rate: u32) -> Self {
        Self::from_i16(&buffer.concat(), sample_rate)
    }

    /// Decode an uncompressed WAV file.
    ///
    /// ## Supported Formats:
    /// - PCM 8, 16 or 24 bit, any channel count, any rate
    /// - IEEE float 32 bit
    ///
    /// ## Error Handling:
    /// Returns `Decode` for anything that is not a readable WAV container, and for a
    /// container that holds zero sample frames.
    pub fn from_encoded_file(bytes: &[u8]) -> AppResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let (header, data) = wav::read(&mut cursor)
            .map_err(|e| AppError::Decode(format!("not a readable WAV file: {}", e)))?;

        if header.sampling_rate == 0 || header.channel_count == 0 {
            return Err(AppError::Decode(format!(
                "invalid WAV header: {} Hz, {} channels",
                header.sampling_rate, header.channel_count
            )));
        }

        let interleaved: Vec<f64> = match data {
            wav::BitDepth::Eight(v) => v.iter().map(|&s| (s as f64 - 128.0) / 128.0).collect(),
            wav::BitDepth::Sixteen(v) => v.iter().map(|&s| s as f64 / I16_SCALE).collect(),
            wav::BitDepth::TwentyFour(v) => v.iter().map(|&s| s as f64 / 8_388_608.0).collect(),
            wav::BitDepth::ThirtyTwoFloat(v) => v.iter().map(|&s| s as f64).collect(),
            wav::BitDepth::Empty => Vec::new(),
        };

        let channels = header.channel_count as usize;
        let samples: Vec<f64> = interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f64>() / channels as f64)
            .collect();

        if samples.is_empty() {
            return Err(AppError::Decode("WAV file contains no sample frames".to_string()));
        }

        Ok(Self::new(samples, header.sampling_rate))
    }

    /// Read and decode a WAV file from disk.
    pub fn read_wav(path: &Path) -> AppResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_encoded_file(&bytes)
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds: sample count / sample rate.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Samples quantized back to 16-bit, with clipping.
    #[cfg(test)]
    pub fn to_i16(&self) -> Vec<i16> {
        self.samples
            .iter()
            .map(|&s| (s * I16_SCALE).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16)
            .collect()
    }
}

/// Encode raw 16-bit mono samples as a WAV file in memory.
pub fn encode_pcm16(sample_rate: u32, samples: &[i16]) -> AppResult<Vec<u8>> {
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, sample_rate, 16);
    let mut cursor = Cursor::new(Vec::new());
    wav::write(header, &wav::BitDepth::Sixteen(samples.to_vec()), &mut cursor)?;
    Ok(cursor.into_inner())
}

/// Write raw 16-bit mono samples to a WAV file on disk.
pub fn write_pcm16(path: &Path, sample_rate: u32, samples: &[i16]) -> AppResult<()> {
    std::fs::write(path, encode_pcm16(sample_rate, samples)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<i16> {
        (0..n).map(|i| ((i as i32 * 37) % 65536 - 32768) as i16).collect()
    }

    #[test]
    fn test_wav_round_trip_is_lossless() {
        let raw = ramp(4000);
        let original = Waveform::from_i16(&raw, 16000);
        let bytes = encode_pcm16(16000, &original.to_i16()).unwrap();
        let decoded = Waveform::from_encoded_file(&bytes).unwrap();
        assert_eq!(decoded.sample_rate(), 16000);
        assert_eq!(decoded.len(), original.len());
        assert_eq!(decoded, original);
        assert_eq!(decoded.to_i16(), raw);
    }

    #[test]
    fn test_duration() {
        let w = Waveform::from_i16(&vec![0; 8000], 16000);
        assert!((w.duration() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_non_audio_bytes_fail_to_decode() {
        let err = Waveform::from_encoded_file(b"this is definitely not a wav file").unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[test]
    fn test_empty_container_fails_to_decode() {
        let bytes = encode_pcm16(16000, &[]).unwrap();
        let err = Waveform::from_encoded_file(&bytes).unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 2, 8000, 16);
        let mut cursor = Cursor::new(Vec::new());
        let interleaved = vec![1000i16, 3000, -2000, 0];
        wav::write(header, &wav::BitDepth::Sixteen(interleaved), &mut cursor).unwrap();
        let w = Waveform::from_encoded_file(&cursor.into_inner()).unwrap();
        assert_eq!(w.len(), 2);
        assert_eq!(w.to_i16(), vec![2000, -1000]);
    }

    #[test]
    fn test_from_streaming_buffer_preserves_order() {
        let mut buffer = StreamingBuffer::new(3, 2);
        buffer.push(vec![1, 2]).unwrap();
        buffer.push(vec![3, 4]).unwrap();
        let w = Waveform::from_streaming_buffer(&buffer, 16000);
        assert_eq!(w.to_i16(), vec![1, 2, 3, 4]);
    }
}
