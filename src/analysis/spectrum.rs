//! # Power Spectrum Analyzer
//!
//! Whole-signal power spectrum with a smoothed envelope and formant resonance markers.
//!
//! ## Steps:
//! 1. One FFT over the whole signal, zero-padded to a power of two
//! 2. One-sided power density in dB; bins with no power become NaN (never zero-filled)
//! 3. Frequency and power arrays truncated to their common length, non-finite bins dropped
//! 4. Savitzky-Golay envelope (101 points, order 2 by default)
//! 5. One vertical marker per tracked formant at its time-averaged frequency, spanning
//!    the envelope's min..max

use crate::analysis::dsp::{self, PowerSpectrumFft};
use crate::analysis::formant::FormantTrack;
use crate::audio::waveform::Waveform;
use crate::config::PowerSpectrumConfig;
use crate::error::{AppError, AppResult};
use serde::Serialize;
use tracing::warn;

const FEATURE: &str = "power spectrum";

/// Finite (frequency, dB) pairs, ascending in frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSpectrum {
    frequencies: Vec<f64>,
    power_db: Vec<f64>,
}

impl PowerSpectrum {
    /// Reconcile two possibly different-length arrays and keep finite power only.
    pub fn from_parts(mut frequencies: Vec<f64>, mut power_db: Vec<f64>) -> Self {
        dsp::align_lengths(&mut frequencies, &mut power_db);
        let (frequencies, power_db) = frequencies
            .into_iter()
            .zip(power_db)
            .filter(|(_, p)| p.is_finite())
            .unzip();
        Self {
            frequencies,
            power_db,
        }
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn power_db(&self) -> &[f64] {
        &self.power_db
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

/// Vertical line at a formant's mean frequency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResonanceMarker {
    pub formant: usize,
    pub frequency: f64,
    /// Envelope [min, max] in dB, the vertical extent of the line
    pub power_range: [f64; 2],
}

/// Everything the spectrum chart needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerSpectrumView {
    pub frequency: Vec<f64>,
    pub smoothed_db: Vec<f64>,
    pub markers: Vec<ResonanceMarker>,
    /// Formant numbers whose marker could not be placed
    pub skipped_markers: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct PowerSpectrumAnalyzer {
    settings: PowerSpectrumConfig,
}

impl PowerSpectrumAnalyzer {
    pub fn new(settings: PowerSpectrumConfig) -> Self {
        Self { settings }
    }

    /// Power spectrum of the whole waveform.
    pub fn compute(&self, waveform: &Waveform) -> AppResult<PowerSpectrum> {
        if waveform.is_empty() {
            return Err(AppError::insufficient(FEATURE, "empty waveform"));
        }
        let rate = waveform.sample_rate() as f64;
        let nfft = waveform.len().next_power_of_two();
        let mut fft = PowerSpectrumFft::new(nfft);
        let window = vec![1.0; waveform.len()];
        let density = fft.density(waveform.samples(), &window, rate);

        let power_db: Vec<f64> = density
            .iter()
            .map(|&p| if p > 0.0 { 10.0 * p.log10() } else { f64::NAN })
            .collect();
        let frequencies = (0..density.len())
            .map(|k| k as f64 * rate / nfft as f64)
            .collect();

        Ok(PowerSpectrum::from_parts(frequencies, power_db))
    }

    /// Savitzky-Golay envelope of the spectrum.
    ///
    /// ## Error Handling:
    /// `InsufficientData` unless the window is strictly smaller than the number of
    /// finite bins.
    pub fn smooth(&self, spectrum: &PowerSpectrum) -> AppResult<Vec<f64>> {
        dsp::savgol_filter(
            spectrum.power_db(),
            self.settings.smoothing_window,
            self.settings.smoothing_order,
            dsp::WindowBound::Shorter,
            FEATURE,
        )
    }

    /// Smoothed spectrum plus resonance markers for `tracks`.
    pub fn view(&self, waveform: &Waveform, tracks: &[FormantTrack]) -> AppResult<PowerSpectrumView> {
        let spectrum = self.compute(waveform)?;
        let smoothed = self.smooth(&spectrum)?;
        let (min, max) = smoothed
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        let mut markers = Vec::new();
        let mut skipped_markers = Vec::new();
        for track in tracks {
            match track.mean_frequency() {
                Ok(frequency) => markers.push(ResonanceMarker {
                    formant: track.number(),
                    frequency,
                    power_range: [min, max],
                }),
                Err(e) => {
                    warn!(formant = track.number(), error = %e, "Skipping resonance marker");
                    skipped_markers.push(track.number());
                }
            }
        }

        Ok(PowerSpectrumView {
            frequency: spectrum.frequencies,
            smoothed_db: smoothed,
            markers,
            skipped_markers,
        })
    }
}
