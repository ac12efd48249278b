//! # Recording Session
//!
//! Owns the live capture: the open input device, the full recording so far and the
//! short streaming window used for the live display.
//!
//! ## Session Lifecycle:
//! 1. **Idle**: Nothing open, nothing captured
//! 2. **Recording**: Device open; every `tick()` reads one chunk
//! 3. **Stopped**: Device released, captured audio kept until saved or restarted
//!
//! `start()` while recording is a no-op. Starting from Idle or Stopped opens a new
//! device and discards whatever was captured before. `save()` stops, writes the
//! recording as 16-bit PCM WAV and returns to Idle.
//!
//! ## Ownership:
//! The session is driven through `&mut self` by a single tick driver, so the device
//! and both buffers need no locking.

use crate::analysis::pipeline::{Analyzer, LiveView};
use crate::audio::buffer::StreamingBuffer;
use crate::audio::capture::{AudioInput, InputOpener};
use crate::audio::waveform::write_pcm16;
use crate::config::CaptureConfig;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Current state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No device, no captured audio
    Idle,
    /// Device open and capturing
    Recording,
    /// Device released, captured audio still held
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Recording => "recording",
            SessionStatus::Stopped => "stopped",
        }
    }
}

/// Coarse result of a start/stop request, surfaced to whoever pressed the button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    RecordingStarted,
    AlreadyRecording,
    RecordingStopped,
    NotRecording,
    DeviceError,
}

impl ControlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlStatus::RecordingStarted => "recording_started",
            ControlStatus::AlreadyRecording => "already_recording",
            ControlStatus::RecordingStopped => "recording_stopped",
            ControlStatus::NotRecording => "not_recording",
            ControlStatus::DeviceError => "device_error",
        }
    }
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    /// Latest live view; the previous one when this tick read nothing
    pub view: Option<LiveView>,
    /// Whether a chunk was read on this tick
    pub fresh: bool,
}

#[derive(Debug, Default)]
struct SessionStats {
    chunks_read: u64,
    read_errors: u64,
}

/// What was written by [`RecordingSession::save`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Option<Uuid>,
    pub path: PathBuf,
    pub samples: usize,
    pub duration_seconds: f64,
    pub chunks_read: u64,
    pub read_errors: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// The single live recording.
pub struct RecordingSession {
    capture: CaptureConfig,
    opener: Box<dyn InputOpener>,
    device: Option<Box<dyn AudioInput>>,

    /// Every chunk since the last start, in arrival order
    accumulated: Vec<Vec<i16>>,

    /// Most recent `buffer_chunks` chunks for the live view
    streaming: StreamingBuffer,

    session_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    last_view: Option<LiveView>,
    stats: SessionStats,
}

impl RecordingSession {
    pub fn new(capture: CaptureConfig, opener: Box<dyn InputOpener>) -> Self {
        let streaming = StreamingBuffer::new(capture.buffer_chunks, capture.chunk_size);
        Self {
            capture,
            opener,
            device: None,
            accumulated: Vec::new(),
            streaming,
            session_id: None,
            started_at: None,
            ended_at: None,
            last_view: None,
            stats: SessionStats::default(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        if self.device.is_some() {
            SessionStatus::Recording
        } else if self.accumulated.is_empty() {
            SessionStatus::Idle
        } else {
            SessionStatus::Stopped
        }
    }

    pub fn is_recording(&self) -> bool {
        self.device.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Samples captured since the last start.
    pub fn accumulated_samples(&self) -> usize {
        self.accumulated.iter().map(Vec::len).sum()
    }

    pub fn streaming(&self) -> &StreamingBuffer {
        &self.streaming
    }

    /// Open the device and begin a fresh capture.
    ///
    /// ## State Transition:
    /// Idle/Stopped → Recording. Already recording: nothing changes.
    /// If the device cannot be opened the session stays where it was.
    pub fn start(&mut self) -> ControlStatus {
        if self.device.is_some() {
            debug!(
                session_id = ?self.session_id,
                status = self.status().as_str(),
                "Start ignored"
            );
            return ControlStatus::AlreadyRecording;
        }

        match self.opener.open(&self.capture) {
            Ok(device) => {
                self.device = Some(device);
                self.accumulated.clear();
                self.streaming.clear();
                self.last_view = None;
                self.stats = SessionStats::default();
                self.session_id = Some(Uuid::new_v4());
                self.started_at = Some(Utc::now());
                self.ended_at = None;
                info!(
                    session_id = ?self.session_id,
                    sample_rate = self.capture.sample_rate,
                    chunk_size = self.capture.chunk_size,
                    "Recording started"
                );
                ControlStatus::RecordingStarted
            }
            Err(e) => {
                error!(error = %e, "Could not open input device");
                ControlStatus::DeviceError
            }
        }
    }

    /// Release the device. Safe to call at any time.
    pub fn stop(&mut self) -> ControlStatus {
        match self.device.take() {
            Some(mut device) => {
                device.close();
                self.ended_at = Some(Utc::now());
                info!(
                    session_id = ?self.session_id,
                    chunks = self.accumulated.len(),
                    read_errors = self.stats.read_errors,
                    "Recording stopped"
                );
                ControlStatus::RecordingStopped
            }
            None => ControlStatus::NotRecording,
        }
    }

    /// Read one chunk and refresh the live view.
    ///
    /// A failed read is skipped: nothing is appended and the previous view is returned.
    pub fn tick(&mut self, analyzer: &Analyzer) -> TickOutcome {
        let Some(device) = self.device.as_mut() else {
            return self.stale();
        };

        let chunk = match device.read_chunk() {
            Ok(chunk) => chunk,
            Err(e) => {
                self.stats.read_errors += 1;
                warn!(session_id = ?self.session_id, error = %e, "Skipping tick");
                return self.stale();
            }
        };

        if let Err(e) = self.streaming.push(chunk.clone()) {
            self.stats.read_errors += 1;
            warn!(session_id = ?self.session_id, error = %e, "Discarding chunk");
            return self.stale();
        }
        self.accumulated.push(chunk);
        self.stats.chunks_read += 1;

        self.last_view = analyzer.live_view(&self.streaming);
        TickOutcome {
            view: self.last_view.clone(),
            fresh: true,
        }
    }

    fn stale(&self) -> TickOutcome {
        TickOutcome {
            view: self.last_view.clone(),
            fresh: false,
        }
    }

    /// Stop, write the whole capture to `path` as mono 16-bit PCM and reset.
    ///
    /// ## Error Handling:
    /// `InsufficientData` when nothing was captured; I/O errors from writing. On
    /// error the captured audio is kept.
    pub fn save(&mut self, path: &Path) -> AppResult<SessionSummary> {
        self.stop();
        if self.accumulated.is_empty() {
            return Err(AppError::insufficient("recording", "no audio was captured"));
        }

        let samples = self.accumulated.concat();
        write_pcm16(path, self.capture.sample_rate, &samples)?;

        let summary = SessionSummary {
            session_id: self.session_id,
            path: path.to_path_buf(),
            samples: samples.len(),
            duration_seconds: samples.len() as f64 / self.capture.sample_rate as f64,
            chunks_read: self.stats.chunks_read,
            read_errors: self.stats.read_errors,
            started_at: self.started_at,
            ended_at: self.ended_at,
        };
        info!(
            session_id = ?summary.session_id,
            path = %path.display(),
            samples = summary.samples,
            "Recording saved"
        );

        self.reset();
        Ok(summary)
    }

    fn reset(&mut self) {
        self.accumulated.clear();
        self.streaming.clear();
        self.last_view = None;
        self.stats = SessionStats::default();
        self.session_id = None;
        self.started_at = None;
        self.ended_at = None;
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::waveform::Waveform;
    use crate::config::AnalysisConfig;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    const CHUNK: usize = 4;

    /// Plays back a fixed script of reads, then fails every further read.
    struct ScriptedInput {
        script: VecDeque<AppResult<Vec<i16>>>,
        closed: Rc<Cell<bool>>,
    }

    impl AudioInput for ScriptedInput {
        fn read_chunk(&mut self) -> AppResult<Vec<i16>> {
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(AppError::StreamRead("script exhausted".to_string())))
        }

        fn close(&mut self) {
            self.closed.set(true);
        }
    }

    struct Harness {
        session: RecordingSession,
        opens: Rc<Cell<usize>>,
        closed: Rc<Cell<bool>>,
    }

    fn capture() -> CaptureConfig {
        CaptureConfig {
            chunk_size: CHUNK,
            buffer_chunks: 2,
            ..CaptureConfig::default()
        }
    }

    fn harness(script: Vec<AppResult<Vec<i16>>>) -> Harness {
        let opens = Rc::new(Cell::new(0));
        let closed = Rc::new(Cell::new(false));
        let mut script = Some(VecDeque::from(script));
        let (opens_in, closed_in) = (opens.clone(), closed.clone());
        let opener = move |_: &CaptureConfig| -> AppResult<Box<dyn AudioInput>> {
            opens_in.set(opens_in.get() + 1);
            Ok(Box::new(ScriptedInput {
                script: script.take().unwrap_or_default(),
                closed: closed_in.clone(),
            }))
        };
        Harness {
            session: RecordingSession::new(capture(), Box::new(opener)),
            opens,
            closed,
        }
    }

    fn analyzer() -> Analyzer {
        Analyzer::new(AnalysisConfig::default(), 16000)
    }

    fn temp_wav() -> PathBuf {
        std::env::temp_dir().join(format!("{}-session.wav", Uuid::new_v4()))
    }

    #[test]
    fn test_double_start_keeps_device_and_capture() {
        let mut h = harness(vec![Ok(vec![1, 2, 3, 4])]);
        assert_eq!(h.session.start(), ControlStatus::RecordingStarted);
        let id = h.session.session_id();
        assert!(h.session.tick(&analyzer()).fresh);

        assert_eq!(h.session.start(), ControlStatus::AlreadyRecording);
        assert_eq!(h.opens.get(), 1);
        assert_eq!(h.session.accumulated_samples(), CHUNK);
        assert_eq!(h.session.session_id(), id);
    }

    #[test]
    fn test_failed_open_stays_idle() {
        let opener = |_: &CaptureConfig| -> AppResult<Box<dyn AudioInput>> {
            Err(AppError::Device("no input device".to_string()))
        };
        let mut session = RecordingSession::new(capture(), Box::new(opener));
        assert_eq!(session.start(), ControlStatus::DeviceError);
        assert!(!session.is_recording());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(!session.tick(&analyzer()).fresh);
    }

    #[test]
    fn test_read_failure_keeps_previous_view() {
        let mut h = harness(vec![
            Ok(vec![10, 20, 30, 40]),
            Err(AppError::StreamRead("overrun".to_string())),
        ]);
        h.session.start();
        let first = h.session.tick(&analyzer());
        assert!(first.fresh);
        assert_eq!(first.view.as_ref().unwrap().oscillogram.amplitude, vec![10, 20, 30, 40]);

        let second = h.session.tick(&analyzer());
        assert!(!second.fresh);
        assert_eq!(second.view, first.view);
        assert_eq!(h.session.accumulated_samples(), CHUNK);
    }

    #[test]
    fn test_wrong_length_chunk_is_discarded() {
        let mut h = harness(vec![Ok(vec![1, 2, 3])]);
        h.session.start();
        assert!(!h.session.tick(&analyzer()).fresh);
        assert_eq!(h.session.accumulated_samples(), 0);
        assert!(h.session.streaming().is_empty());
    }

    #[test]
    fn test_streaming_window_evicts_but_recording_keeps_everything() {
        let mut h = harness(vec![
            Ok(vec![1; CHUNK]),
            Ok(vec![2; CHUNK]),
            Ok(vec![3; CHUNK]),
        ]);
        h.session.start();
        for _ in 0..3 {
            h.session.tick(&analyzer());
        }
        assert_eq!(h.session.streaming().len(), 2);
        assert_eq!(h.session.streaming().concat(), vec![2, 2, 2, 2, 3, 3, 3, 3]);
        assert_eq!(h.session.accumulated_samples(), 3 * CHUNK);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut h = harness(vec![Ok(vec![0; CHUNK])]);
        assert_eq!(h.session.stop(), ControlStatus::NotRecording);
        h.session.start();
        h.session.tick(&analyzer());
        assert_eq!(h.session.stop(), ControlStatus::RecordingStopped);
        assert!(h.closed.get());
        assert_eq!(h.session.status(), SessionStatus::Stopped);
        assert_eq!(h.session.stop(), ControlStatus::NotRecording);
    }

    #[test]
    fn test_save_writes_capture_and_resets() {
        let mut h = harness(vec![
            Ok(vec![100, -100, 200, -200]),
            Ok(vec![i16::MAX, i16::MIN, 0, 1]),
        ]);
        h.session.start();
        h.session.tick(&analyzer());
        h.session.tick(&analyzer());

        let path = temp_wav();
        let summary = h.session.save(&path).unwrap();
        assert_eq!(summary.samples, 2 * CHUNK);
        assert_eq!(summary.chunks_read, 2);
        assert!(summary.session_id.is_some());
        assert!(h.closed.get());

        let saved = Waveform::read_wav(&path).unwrap();
        assert_eq!(saved.sample_rate(), 16000);
        assert_eq!(saved.to_i16(), vec![100, -100, 200, -200, i16::MAX, i16::MIN, 0, 1]);

        assert_eq!(h.session.status(), SessionStatus::Idle);
        assert_eq!(h.session.accumulated_samples(), 0);
        assert!(h.session.session_id().is_none());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_save_without_audio() {
        let mut h = harness(Vec::new());
        let path = temp_wav();
        assert!(matches!(
            h.session.save(&path),
            Err(AppError::InsufficientData { .. })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_status_and_control_names_follow_lifecycle() {
        let mut h = harness(vec![Ok(vec![7; CHUNK])]);
        assert_eq!(h.session.status().as_str(), "idle");
        assert_eq!(h.session.start().as_str(), "recording_started");
        assert_eq!(h.session.status().as_str(), "recording");
        assert_eq!(h.session.start().as_str(), "already_recording");
        h.session.tick(&analyzer());
        assert_eq!(h.session.stop().as_str(), "recording_stopped");
        assert_eq!(h.session.status().as_str(), "stopped");
        assert_eq!(h.session.stop().as_str(), "not_recording");
        assert_eq!(ControlStatus::DeviceError.as_str(), "device_error");
    }

    #[test]
    fn test_restart_discards_previous_capture() {
        let mut h = harness(vec![Ok(vec![5; CHUNK])]);
        h.session.start();
        h.session.tick(&analyzer());
        h.session.stop();
        assert_eq!(h.session.accumulated_samples(), CHUNK);

        assert_eq!(h.session.start(), ControlStatus::RecordingStarted);
        assert_eq!(h.opens.get(), 2);
        assert_eq!(h.session.accumulated_samples(), 0);
        assert!(h.session.streaming().is_empty());
    }
}
