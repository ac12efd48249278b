//! # Analysis Pipeline
//!
//! Runs every tracker over one waveform and assembles the presentation-ready result.
//!
//! ## Key Components:
//! - **Analyzer**: Holds the configured trackers; all entry points take `&self`
//! - **FeatureSet**: Serialized result with a status and one optional field per view
//! - **LiveView**: Oscillogram and heat-map of the live streaming window
//!
//! ## Partial Results:
//! A feature that lacks data (`InsufficientData`) is left out and logged; the others
//! are still returned. Only when nothing at all could be produced is the result
//! marked `failed`.

use crate::analysis::dsp;
use crate::analysis::formant::{FormantTrack, FormantTracker};
use crate::analysis::intensity::IntensityTracker;
use crate::analysis::pitch::{PitchContour, PitchTracker};
use crate::analysis::spectrogram::{HeatmapView, SpectralEngine, SurfaceView};
use crate::analysis::spectrum::{PowerSpectrumAnalyzer, PowerSpectrumView};
use crate::analysis::TimeSeries;
use crate::audio::buffer::StreamingBuffer;
use crate::audio::waveform::Waveform;
use crate::config::AnalysisConfig;
use crate::error::AppResult;
use crate::report::ReportSerializer;
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Fixed frequency axis of the pitch side of the pitch/intensity chart
const PITCH_AXIS_HZ: [f64; 2] = [0.0, 1000.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// Nothing to analyze yet
    Empty,
    /// Input could not be decoded or no feature could be computed
    Failed,
    Ready,
}

/// One formant's filtered track drawn over the spectrogram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormantOverlay {
    pub formant: usize,
    pub track: TimeSeries<Option<f64>>,
}

/// Heat-map with the smoothed pitch and the formant tracks on top.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrogramOverlay {
    pub heatmap: HeatmapView,
    /// Absent when there are too few voiced frames to smooth
    pub pitch: Option<TimeSeries<Option<f64>>>,
    pub formants: Vec<FormantOverlay>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveformView {
    pub time: Vec<f64>,
    pub amplitude: Vec<f64>,
}

/// Unsmoothed pitch (left axis) and intensity (right axis) on a shared time axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContourView {
    pub pitch: TimeSeries<Option<f64>>,
    pub intensity: TimeSeries<f64>,
    pub pitch_axis: [f64; 2],
    pub intensity_axis: [f64; 2],
}

/// Everything produced for one recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSet {
    pub status: AnalysisStatus,
    pub mean_pitch: Option<f64>,
    pub spectrogram_3d: Option<SurfaceView>,
    pub spectrogram_2d: Option<SpectrogramOverlay>,
    pub power_spectrum: Option<PowerSpectrumView>,
    pub waveform_view: Option<WaveformView>,
    pub combined_pitch_intensity: Option<ContourView>,
    pub report_text: Option<String>,
}

impl FeatureSet {
    fn with_status(status: AnalysisStatus) -> Self {
        Self {
            status,
            mean_pitch: None,
            spectrogram_3d: None,
            spectrogram_2d: None,
            power_spectrum: None,
            waveform_view: None,
            combined_pitch_intensity: None,
            report_text: None,
        }
    }

    /// No recording available yet.
    pub fn empty() -> Self {
        Self::with_status(AnalysisStatus::Empty)
    }

    /// Analysis failed as a whole.
    pub fn failed() -> Self {
        Self::with_status(AnalysisStatus::Failed)
    }

    fn has_any_feature(&self) -> bool {
        self.mean_pitch.is_some()
            || self.spectrogram_3d.is_some()
            || self.spectrogram_2d.is_some()
            || self.power_spectrum.is_some()
            || self.waveform_view.is_some()
            || self.combined_pitch_intensity.is_some()
            || self.report_text.is_some()
    }
}

/// Raw 16-bit samples against time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Oscillogram {
    pub time: Vec<f64>,
    pub amplitude: Vec<i16>,
}

/// Live display of the most recent streaming window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveView {
    pub oscillogram: Oscillogram,
    /// Absent while the window is shorter than one spectrogram frame
    pub spectrogram: Option<HeatmapView>,
}

/// Configured set of trackers.
#[derive(Debug, Clone)]
pub struct Analyzer {
    settings: AnalysisConfig,
    capture_rate: u32,
    spectral: SpectralEngine,
    pitch: PitchTracker,
    formants: FormantTracker,
    intensity: IntensityTracker,
    spectrum: PowerSpectrumAnalyzer,
}

impl Analyzer {
    /// `capture_rate` is the sample rate of live streaming chunks.
    pub fn new(settings: AnalysisConfig, capture_rate: u32) -> Self {
        Self {
            spectral: SpectralEngine::new(settings.spectrogram.clone()),
            pitch: PitchTracker::new(settings.pitch.clone()),
            formants: FormantTracker::new(settings.formant.clone(), settings.track_time_step),
            intensity: IntensityTracker::new(settings.intensity.clone(), settings.track_time_step),
            spectrum: PowerSpectrumAnalyzer::new(settings.power_spectrum.clone()),
            settings,
            capture_rate,
        }
    }

    /// Compute every feature of `waveform`.
    pub fn analyze(&self, waveform: &Waveform) -> FeatureSet {
        debug!(
            samples = waveform.len(),
            sample_rate = waveform.sample_rate(),
            "Analyzing waveform"
        );

        let spectrogram = keep("spectrogram", self.spectral.compute(waveform)).map(|s| s.to_db());
        let pitch = keep("pitch", self.pitch.compute(waveform));
        let formants = keep("formants", self.formants.compute(waveform));
        let intensity = keep("intensity", self.intensity.compute(waveform));
        if let Some(contour) = &pitch {
            debug!(voiced_frames = contour.voiced_count(), "Pitch tracked");
        }

        let mut features = FeatureSet::failed();

        features.mean_pitch = pitch
            .as_ref()
            .and_then(|contour| keep("mean pitch", contour.mean()));

        if let Some(db) = &spectrogram {
            features.spectrogram_3d = Some(db.surface());
            features.spectrogram_2d = Some(self.spectrogram_overlay(db.heatmap(), pitch.as_ref(), formants.as_deref()));
        }

        features.power_spectrum = keep(
            "power spectrum",
            self.spectrum.view(waveform, formants.as_deref().unwrap_or(&[])),
        );

        if !waveform.is_empty() {
            features.waveform_view = Some(WaveformView {
                time: dsp::linspace(0.0, waveform.duration(), waveform.len()),
                amplitude: waveform.samples().to_vec(),
            });
        }

        if let (Some(pitch), Some(intensity)) = (&pitch, &intensity) {
            features.combined_pitch_intensity = Some(contour_view(pitch, intensity));
        }

        if let (Some(pitch), Some(intensity), Some(formants)) = (&pitch, &intensity, &formants) {
            features.report_text = Some(ReportSerializer::render(pitch, intensity, formants));
        }

        if features.has_any_feature() {
            features.status = AnalysisStatus::Ready;
        } else {
            warn!("No feature could be computed");
        }
        features
    }

    fn spectrogram_overlay(
        &self,
        heatmap: HeatmapView,
        pitch: Option<&PitchContour>,
        formants: Option<&[FormantTrack]>,
    ) -> SpectrogramOverlay {
        let smoothing = &self.settings.pitch;
        let pitch = pitch.and_then(|contour| {
            keep(
                "pitch overlay",
                contour.smoothed(smoothing.smoothing_window, smoothing.smoothing_order),
            )
        });
        let formants = formants
            .unwrap_or(&[])
            .iter()
            .map(|track| FormantOverlay {
                formant: track.number(),
                track: track.filtered().clone(),
            })
            .collect();
        SpectrogramOverlay {
            heatmap,
            pitch,
            formants,
        }
    }

    /// Decode an uploaded file and analyze it. Undecodable input yields a `failed`
    /// result with no features.
    pub fn analyze_encoded(&self, bytes: &[u8]) -> FeatureSet {
        match Waveform::from_encoded_file(bytes) {
            Ok(waveform) => self.analyze(&waveform),
            Err(e) => {
                warn!(error = %e, bytes = bytes.len(), "Could not decode audio");
                FeatureSet::failed()
            }
        }
    }

    /// Analyze the upload if there is one, otherwise the saved recording at
    /// `saved_path`. With neither, the result is `empty`.
    pub fn analyze_saved(&self, upload: Option<&[u8]>, saved_path: &Path) -> FeatureSet {
        if let Some(bytes) = upload {
            return self.analyze_encoded(bytes);
        }
        if !saved_path.exists() {
            debug!(path = %saved_path.display(), "No recording to analyze");
            return FeatureSet::empty();
        }
        match std::fs::read(saved_path) {
            Ok(bytes) => self.analyze_encoded(&bytes),
            Err(e) => {
                warn!(path = %saved_path.display(), error = %e, "Could not read saved recording");
                FeatureSet::failed()
            }
        }
    }

    /// Analyze independent waveforms in parallel; results keep the input order.
    pub fn analyze_many(&self, waveforms: &[Waveform]) -> Vec<FeatureSet> {
        info!(count = waveforms.len(), "Analyzing batch");
        waveforms.par_iter().map(|w| self.analyze(w)).collect()
    }

    /// Oscillogram and spectrogram of the current streaming window; `None` when the
    /// window is empty.
    pub fn live_view(&self, buffer: &StreamingBuffer) -> Option<LiveView> {
        if buffer.is_empty() {
            return None;
        }
        let amplitude = buffer.concat();
        let n = amplitude.len();
        let duration = n as f64 / self.capture_rate as f64;
        let waveform = Waveform::from_streaming_buffer(buffer, self.capture_rate);
        let spectrogram = keep("live spectrogram", self.spectral.compute(&waveform))
            .map(|s| s.to_db().heatmap());

        Some(LiveView {
            oscillogram: Oscillogram {
                time: dsp::linspace(0.0, duration, n),
                amplitude,
            },
            spectrogram,
        })
    }
}

fn contour_view(pitch: &PitchContour, intensity: &TimeSeries<f64>) -> ContourView {
    let (min, max) = intensity
        .values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    ContourView {
        pitch: pitch.series().clone(),
        intensity: intensity.clone(),
        pitch_axis: PITCH_AXIS_HZ,
        intensity_axis: [min, max],
    }
}

/// Keep a feature, or log why it is left out.
fn keep<T>(feature: &'static str, result: AppResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(feature, kind = e.kind(), error = %e, "Feature omitted");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::waveform::{encode_pcm16, write_pcm16};
    use std::f64::consts::PI;

    fn analyzer() -> Analyzer {
        Analyzer::new(AnalysisConfig::default(), 16000)
    }

    /// Harmonic-rich 200 Hz voice-like signal
    fn voiced(seconds: f64) -> Waveform {
        let rate = 16000u32;
        let n = (seconds * rate as f64) as usize;
        let samples = (0..n)
            .map(|i| {
                let t = i as f64 / rate as f64;
                (1..=8)
                    .map(|h| 0.3 / h as f64 * (2.0 * PI * 200.0 * h as f64 * t).sin())
                    .sum()
            })
            .collect();
        Waveform::new(samples, rate)
    }

    #[test]
    fn test_full_analysis() {
        let features = analyzer().analyze(&voiced(1.0));
        assert_eq!(features.status, AnalysisStatus::Ready);

        let mean = features.mean_pitch.unwrap();
        assert!((mean - 200.0).abs() < 5.0, "mean pitch {}", mean);

        let overlay = features.spectrogram_2d.as_ref().unwrap();
        assert!(overlay.pitch.is_some());
        assert_eq!(overlay.formants.len(), 3);
        assert_eq!(overlay.heatmap.db, features.spectrogram_3d.as_ref().unwrap().z);

        let contours = features.combined_pitch_intensity.as_ref().unwrap();
        assert_eq!(contours.pitch_axis, [0.0, 1000.0]);
        assert!(contours.intensity_axis[0] <= contours.intensity_axis[1]);

        assert!(features.power_spectrum.is_some());
        assert_eq!(features.waveform_view.as_ref().unwrap().time.len(), 16000);

        let report = features.report_text.as_ref().unwrap();
        assert!(report.starts_with("Pitch Data (Frequency vs Time):\n"));
        assert!(report.contains("Formant 3:\n"));
    }

    #[test]
    fn test_silence_omits_pitch_features_only() {
        let features = analyzer().analyze(&Waveform::new(vec![0.0; 16000], 16000));
        assert_eq!(features.status, AnalysisStatus::Ready);
        assert!(features.mean_pitch.is_none());
        assert!(features.power_spectrum.is_none());
        assert!(features.spectrogram_2d.as_ref().unwrap().pitch.is_none());
        assert!(features.spectrogram_3d.is_some());
        assert!(features.report_text.is_some());
    }

    #[test]
    fn test_empty_waveform_fails() {
        let features = analyzer().analyze(&Waveform::new(Vec::new(), 16000));
        assert_eq!(features.status, AnalysisStatus::Failed);
        assert!(!features.has_any_feature());
    }

    #[test]
    fn test_undecodable_upload() {
        let features = analyzer().analyze_encoded(b"definitely not a wav file");
        assert_eq!(features, FeatureSet::failed());
        let json = serde_json::to_value(&features).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json["mean_pitch"].is_null());
    }

    #[test]
    fn test_saved_recording_fallback() {
        let missing = std::env::temp_dir().join(format!("{}-missing.wav", uuid::Uuid::new_v4()));
        assert_eq!(analyzer().analyze_saved(None, &missing), FeatureSet::empty());

        let path = std::env::temp_dir().join(format!("{}-saved.wav", uuid::Uuid::new_v4()));
        write_pcm16(&path, 16000, &voiced(0.5).to_i16()).unwrap();
        let from_disk = analyzer().analyze_saved(None, &path);
        assert_eq!(from_disk.status, AnalysisStatus::Ready);

        // An upload takes precedence over the saved file
        let upload = encode_pcm16(16000, &[0i16; 10]).unwrap();
        let from_upload = analyzer().analyze_saved(Some(&upload), &path);
        assert!(from_upload.spectrogram_3d.is_none());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_batch_keeps_order() {
        let inputs = vec![voiced(0.5), Waveform::new(Vec::new(), 16000), voiced(0.3)];
        let results = analyzer().analyze_many(&inputs);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, AnalysisStatus::Ready);
        assert_eq!(results[1].status, AnalysisStatus::Failed);
        assert_eq!(results[2].status, AnalysisStatus::Ready);
    }

    #[test]
    fn test_live_view() {
        let analyzer = analyzer();
        let mut buffer = StreamingBuffer::new(5, 3200);
        assert!(analyzer.live_view(&buffer).is_none());

        buffer.push(vec![100; 3200]).unwrap();
        buffer.push(vec![-100; 3200]).unwrap();
        let view = analyzer.live_view(&buffer).unwrap();
        assert_eq!(view.oscillogram.amplitude.len(), 6400);
        assert_eq!(view.oscillogram.amplitude[0], 100);
        assert_eq!(view.oscillogram.amplitude[6399], -100);
        assert_eq!(view.oscillogram.time[0], 0.0);
        assert!((view.oscillogram.time[6399] - 0.4).abs() < 1e-12);
        assert!(view.spectrogram.is_some());
    }
}
