//! # Microphone Input
//!
//! Live capture from the default system input device through cpal.
//!
//! ## Format Negotiation:
//! The device is asked for the supported configuration closest to the capture
//! format: the configured rate if any range covers it, native i16 before f32 and
//! u16, mono before multi-channel. Whatever the device delivers is converted to
//! the capture format before chunking:
//! - **Samples**: `f32`, `i16` or `u16` via cpal's `Sample::to_sample`
//! - **Channels**: every frame is averaged down to one sample
//! - **Rate**: linear interpolation from the device rate to `sample_rate`
//!
//! ## Buffering:
//! The audio callback runs on the driver's thread and queues mono samples on a
//! bounded crossbeam channel holding two seconds of device audio. When the reader
//! falls that far behind, new samples are dropped and the next `read_chunk` reports
//! `StreamRead("input overflowed")`, discarding the stale backlog so the following
//! read is live again.

use crate::audio::capture::{AudioInput, InputOpener};
use crate::config::CaptureConfig;
use crate::error::{AppError, AppResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Seconds of device audio the callback may queue ahead of the reader
const BACKLOG_SECONDS: usize = 2;

/// Open cpal input stream plus the reader side that turns its samples into chunks.
pub struct Microphone {
    stream: Option<cpal::Stream>,
    chunks: ChunkAssembler,
}

impl Microphone {
    /// Open the default input device in the best format it supports.
    pub fn open(config: &CaptureConfig) -> AppResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AppError::Device("no input device available".to_string()))?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let supported = choose_input_config(&device, config.sample_rate)?;
        let device_rate = supported.sample_rate().0;
        let stream_config: cpal::StreamConfig = supported.clone().into();

        let (tx, rx) = crossbeam_channel::bounded(device_rate as usize * BACKLOG_SECONDS);
        let overflowed = Arc::new(AtomicBool::new(false));

        let build = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>,
            SampleFormat::I16 => build_stream::<i16>,
            SampleFormat::U16 => build_stream::<u16>,
            other => {
                return Err(AppError::Device(format!(
                    "{} offers unsupported sample format {:?}",
                    device_name, other
                )))
            }
        };
        let stream = build(&device, &stream_config, tx, overflowed.clone())
            .map_err(|e| AppError::Device(format!("{} cannot open an input stream: {}", device_name, e)))?;

        stream
            .play()
            .map_err(|e| AppError::Device(format!("failed to start {}: {}", device_name, e)))?;

        info!(
            device = %device_name,
            device_rate,
            device_channels = stream_config.channels,
            device_format = ?supported.sample_format(),
            sample_rate = config.sample_rate,
            "Microphone opened"
        );

        Ok(Self {
            stream: Some(stream),
            chunks: ChunkAssembler::new(
                rx,
                overflowed,
                LinearResampler::new(device_rate, config.sample_rate),
                config.chunk_size,
                Duration::from_millis(config.read_timeout_ms),
            ),
        })
    }
}

impl AudioInput for Microphone {
    fn read_chunk(&mut self) -> AppResult<Vec<i16>> {
        if self.stream.is_none() {
            return Err(AppError::StreamRead("microphone is closed".to_string()));
        }
        self.chunks.next_chunk()
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            self.chunks.reset();
            info!("Microphone closed");
        }
    }
}

/// Opener for the default system microphone.
pub fn microphone_opener() -> impl InputOpener {
    |config: &CaptureConfig| -> AppResult<Box<dyn AudioInput>> {
        Ok(Box::new(Microphone::open(config)?))
    }
}

/// Pick the supported configuration that needs the least conversion.
fn choose_input_config(device: &cpal::Device, target_rate: u32) -> AppResult<cpal::SupportedStreamConfig> {
    let ranges = device
        .supported_input_configs()
        .map_err(|e| AppError::Device(format!("cannot query input formats: {}", e)))?;

    let mut best: Option<(i32, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let min = range.min_sample_rate().0;
        let max = range.max_sample_rate().0;
        let candidate = range.with_sample_rate(cpal::SampleRate(target_rate.clamp(min, max)));

        let Some(score) = config_score(&candidate, target_rate) else {
            continue;
        };
        if best.as_ref().map_or(true, |(top, _)| score > *top) {
            best = Some((score, candidate));
        }
    }

    best.map(|(_, config)| config)
        .ok_or_else(|| AppError::Device("no supported input config".to_string()))
}

/// Preference of one device configuration; `None` when it cannot be converted.
fn config_score(config: &cpal::SupportedStreamConfig, target_rate: u32) -> Option<i32> {
    let mut score = match config.sample_format() {
        SampleFormat::I16 => 2,
        SampleFormat::F32 => 1,
        SampleFormat::U16 => 0,
        _ => return None,
    };
    if config.sample_rate().0 == target_rate {
        score += 4;
    }
    if config.channels() == 1 {
        score += 1;
    }
    Some(score)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: Sender<f32>,
    overflowed: Arc<AtomicBool>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| forward(data, channels, &tx, &overflowed),
        |err| warn!(error = %err, "Input stream error"),
        None,
    )
}

/// Downmix interleaved `data` to mono and queue it for the reader.
///
/// Samples that do not fit in the queue are dropped and raise `overflowed`.
fn forward<T>(data: &[T], channels: usize, tx: &Sender<f32>, overflowed: &AtomicBool)
where
    T: Sample,
    f32: FromSample<T>,
{
    for frame in data.chunks(channels.max(1)) {
        match tx.try_send(downmix(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => overflowed.store(true, Ordering::Release),
            // Reader gone means the session closed the device
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

/// Mean of one interleaved frame as a normalized f32 sample.
fn downmix<T>(frame: &[T]) -> f32
where
    T: Sample,
    f32: FromSample<T>,
{
    if frame.is_empty() {
        return 0.0;
    }
    frame.iter().map(|s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32
}

/// Normalized sample back to 16-bit, clipping at full scale.
fn quantize(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Streaming linear-interpolation resampler.
///
/// Output sample `k` sits at input position `k * from / to`. Every input sample
/// emits the outputs that fall between it and the previous one, so output lags
/// the input by one sample.
#[derive(Debug, Clone)]
struct LinearResampler {
    step: f64,
    /// Position of the next output, relative to `last`
    next: f64,
    last: Option<f32>,
}

impl LinearResampler {
    fn new(from_hz: u32, to_hz: u32) -> Self {
        Self {
            step: from_hz as f64 / to_hz.max(1) as f64,
            next: 0.0,
            last: None,
        }
    }

    fn push(&mut self, sample: f32, out: &mut VecDeque<i16>) {
        let Some(last) = self.last.replace(sample) else {
            return;
        };
        while self.next < 1.0 {
            let t = self.next as f32;
            out.push_back(quantize(last + (sample - last) * t));
            self.next += self.step;
        }
        self.next -= 1.0;
    }

    fn reset(&mut self) {
        self.next = 0.0;
        self.last = None;
    }
}

/// Reader side of the capture: converted samples in, fixed-size chunks out.
struct ChunkAssembler {
    samples: Receiver<f32>,
    overflowed: Arc<AtomicBool>,
    resampler: LinearResampler,
    pending: VecDeque<i16>,
    chunk_size: usize,
    timeout: Duration,
}

impl ChunkAssembler {
    fn new(
        samples: Receiver<f32>,
        overflowed: Arc<AtomicBool>,
        resampler: LinearResampler,
        chunk_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            samples,
            overflowed,
            resampler,
            pending: VecDeque::with_capacity(chunk_size * 2),
            chunk_size,
            timeout,
        }
    }

    /// Block until one chunk at the capture rate is assembled.
    ///
    /// ## Error Handling:
    /// `StreamRead` on overflow, when no sample arrives within the timeout, or
    /// once the stream has ended.
    fn next_chunk(&mut self) -> AppResult<Vec<i16>> {
        while self.pending.len() < self.chunk_size {
            if self.overflowed.swap(false, Ordering::AcqRel) {
                let dropped = self.samples.try_iter().count() + self.pending.len();
                self.reset();
                debug!(dropped, "Discarded stale input after overflow");
                return Err(AppError::StreamRead("input overflowed".to_string()));
            }

            match self.samples.recv_timeout(self.timeout) {
                Ok(sample) => self.resampler.push(sample, &mut self.pending),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(AppError::StreamRead(format!(
                        "no audio within {:?} ({} of {} samples buffered)",
                        self.timeout,
                        self.pending.len(),
                        self.chunk_size
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AppError::StreamRead("input stream ended".to_string()));
                }
            }
        }

        Ok(self.pending.drain(..self.chunk_size).collect())
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.resampler.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resample(from_hz: u32, to_hz: u32, input: &[f32]) -> Vec<i16> {
        let mut resampler = LinearResampler::new(from_hz, to_hz);
        let mut out = VecDeque::new();
        for &s in input {
            resampler.push(s, &mut out);
        }
        out.into_iter().collect()
    }

    fn assembler(capacity: usize, chunk_size: usize) -> (Sender<f32>, Arc<AtomicBool>, ChunkAssembler) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let overflowed = Arc::new(AtomicBool::new(false));
        let chunks = ChunkAssembler::new(
            rx,
            overflowed.clone(),
            LinearResampler::new(16000, 16000),
            chunk_size,
            Duration::from_millis(20),
        );
        (tx, overflowed, chunks)
    }

    #[test]
    fn test_downmix_converts_every_sample_format() {
        assert_eq!(downmix(&[1000i16]), 1000.0 / 32768.0);
        assert_eq!(downmix(&[1000i16, 3000]), 2000.0 / 32768.0);
        assert_eq!(downmix(&[0.5f32, -0.25]), 0.125);
        assert_eq!(downmix(&[32768u16, 32768]), 0.0);
        assert_eq!(quantize(downmix(&[-1234i16])), -1234);
        assert_eq!(quantize(2.0), i16::MAX);
        assert_eq!(quantize(-2.0), i16::MIN);
    }

    #[test]
    fn test_resampler_identity_lags_one_sample() {
        assert_eq!(resample(16000, 16000, &[0.0, 0.5, -0.5, 0.25]), vec![0, 16384, -16384]);
    }

    #[test]
    fn test_resampler_downsamples_48k_to_16k() {
        let input: Vec<f32> = (0..10).map(|i| i as f32 / 100.0).collect();
        let expected: Vec<i16> = [0.0f32, 0.03, 0.06].iter().map(|&s| quantize(s)).collect();
        assert_eq!(resample(48000, 16000, &input), expected);
    }

    #[test]
    fn test_resampler_upsamples_8k_to_16k() {
        assert_eq!(resample(8000, 16000, &[0.0, 0.25, 0.5]), vec![0, 4096, 8192, 12288]);
    }

    #[test]
    fn test_stereo_callback_is_queued_as_mono() {
        let (tx, rx) = crossbeam_channel::bounded(8);
        let overflowed = AtomicBool::new(false);
        forward(&[1000i16, 3000, -500, -1500], 2, &tx, &overflowed);
        let queued: Vec<f32> = rx.try_iter().collect();
        assert_eq!(queued, vec![2000.0 / 32768.0, -1000.0 / 32768.0]);
        assert!(!overflowed.load(Ordering::Acquire));
    }

    #[test]
    fn test_full_queue_raises_overflow() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        let overflowed = AtomicBool::new(false);
        forward(&[0.1f32; 6], 1, &tx, &overflowed);
        assert_eq!(rx.len(), 4);
        assert!(overflowed.load(Ordering::Acquire));
    }

    #[test]
    fn test_overflow_is_reported_then_capture_resumes() {
        let (tx, overflowed, mut chunks) = assembler(8, 4);
        forward(&[0.5f32; 10], 1, &tx, &overflowed);

        let err = chunks.next_chunk().unwrap_err();
        assert!(matches!(err, AppError::StreamRead(ref msg) if msg == "input overflowed"));
        assert!(chunks.samples.is_empty());

        let fresh: Vec<f32> = (1..=5).map(|i| i as f32 / 8.0).collect();
        forward(&fresh, 1, &tx, &overflowed);
        let chunk = chunks.next_chunk().unwrap();
        assert_eq!(chunk, vec![4096, 8192, 12288, 16384]);
    }

    #[test]
    fn test_read_times_out_without_audio() {
        let (_tx, _overflowed, mut chunks) = assembler(8, 4);
        assert!(matches!(chunks.next_chunk(), Err(AppError::StreamRead(_))));
    }

    #[test]
    fn test_read_fails_once_stream_ended() {
        let (tx, _overflowed, mut chunks) = assembler(8, 4);
        drop(tx);
        let err = chunks.next_chunk().unwrap_err();
        assert!(matches!(err, AppError::StreamRead(ref msg) if msg == "input stream ended"));
    }

    #[test]
    fn test_config_score_prefers_least_conversion() {
        let config = |channels, rate, format| {
            cpal::SupportedStreamConfig::new(
                channels,
                cpal::SampleRate(rate),
                cpal::SupportedBufferSize::Unknown,
                format,
            )
        };
        let exact = config_score(&config(1, 16000, SampleFormat::I16), 16000).unwrap();
        let float_48k = config_score(&config(2, 48000, SampleFormat::F32), 16000).unwrap();
        let float_16k = config_score(&config(2, 16000, SampleFormat::F32), 16000).unwrap();
        assert!(exact > float_16k);
        assert!(float_16k > float_48k);
        assert_eq!(config_score(&config(1, 16000, SampleFormat::I8), 16000), None);
    }
}
