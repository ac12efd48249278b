//! # Spectral Engine
//!
//! Short-time power spectrogram of a waveform.
//!
//! ## Algorithm:
//! 1. Gaussian analysis window of physical length 2 × `window_length`
//! 2. Centered frames every `time_step` seconds
//! 3. Each frame zero-padded to a power-of-two FFT with bin spacing ≤ `frequency_step`
//! 4. One-sided power density per bin, bins above `max_frequency` dropped
//!
//! The power grid is converted to dB once ([`Spectrogram::to_db`]); the heat-map and
//! the surface presentation are both views of that single dB grid.

use crate::analysis::dsp::{self, FrameGrid, PowerSpectrumFft};
use crate::audio::waveform::Waveform;
use crate::config::SpectrogramConfig;
use crate::error::{AppError, AppResult};
use serde::Serialize;

const FEATURE: &str = "spectrogram";

/// Power spectral density per (time, frequency) cell.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    times: Vec<f64>,
    frequencies: Vec<f64>,
    /// `power[t][f]`
    power: Vec<Vec<f64>>,
}

impl Spectrogram {
    #[cfg(test)]
    pub(crate) fn from_power(times: Vec<f64>, frequencies: Vec<f64>, power: Vec<Vec<f64>>) -> Self {
        Self {
            times,
            frequencies,
            power,
        }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn power(&self) -> &[Vec<f64>] {
        &self.power
    }

    /// Convert every cell with `10 * log10`, clamping non-positive power first.
    pub fn to_db(&self) -> SpectrogramDb {
        SpectrogramDb {
            times: self.times.clone(),
            frequencies: self.frequencies.clone(),
            db: self
                .power
                .iter()
                .map(|frame| frame.iter().map(|&p| dsp::power_to_db(p)).collect())
                .collect(),
        }
    }
}

/// Spectrogram in dB. The only source for both presentations.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrogramDb {
    times: Vec<f64>,
    frequencies: Vec<f64>,
    /// `db[t][f]`
    db: Vec<Vec<f64>>,
}

impl SpectrogramDb {
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Frequency-major grid: `z[f][t]`.
    fn frequency_major(&self) -> Vec<Vec<f64>> {
        (0..self.frequencies.len())
            .map(|f| self.db.iter().map(|frame| frame[f]).collect())
            .collect()
    }

    /// Flat 2-D heat-map: time on x, frequency on y, dB as color.
    pub fn heatmap(&self) -> HeatmapView {
        HeatmapView {
            time: self.times.clone(),
            frequency: self.frequencies.clone(),
            db: self.frequency_major(),
        }
    }

    /// 3-D surface: time on x, frequency on y, dB as height.
    pub fn surface(&self) -> SurfaceView {
        let z = self.frequency_major();
        let (min, max) = z
            .iter()
            .flatten()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        SurfaceView {
            x: self.times.clone(),
            y: self.frequencies.clone(),
            z,
            z_range: [min, max],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapView {
    pub time: Vec<f64>,
    pub frequency: Vec<f64>,
    /// `db[frequency][time]`
    pub db: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceView {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<Vec<f64>>,
    pub z_range: [f64; 2],
}

/// Short-time spectrogram computation.
#[derive(Debug, Clone)]
pub struct SpectralEngine {
    settings: SpectrogramConfig,
}

impl SpectralEngine {
    pub fn new(settings: SpectrogramConfig) -> Self {
        Self { settings }
    }

    /// Compute the power spectrogram.
    ///
    /// ## Error Handling:
    /// `InsufficientData` when the waveform is shorter than one analysis window.
    pub fn compute(&self, waveform: &Waveform) -> AppResult<Spectrogram> {
        let rate = waveform.sample_rate() as f64;
        let physical_window = 2.0 * self.settings.window_length;
        let window_len = ((physical_window * rate).round() as usize).max(1);

        let grid = FrameGrid::centered(waveform.duration(), physical_window, self.settings.time_step)
            .ok_or_else(|| {
                AppError::insufficient(
                    FEATURE,
                    format!(
                        "{:.4}s of audio is shorter than the {:.4}s window",
                        waveform.duration(),
                        physical_window
                    ),
                )
            })?;

        let min_fft = (rate / self.settings.frequency_step).ceil() as usize;
        let nfft = window_len.max(min_fft).next_power_of_two();
        let bin_width = rate / nfft as f64;
        let ceiling = self.settings.max_frequency.min(rate / 2.0);
        let bins = (ceiling / bin_width).floor() as usize + 1;
        let bins = bins.min(nfft / 2 + 1);

        let window = dsp::gaussian_window(window_len);
        let mut fft = PowerSpectrumFft::new(nfft);
        let samples = waveform.samples();

        let power = (0..grid.count)
            .map(|i| {
                let frame = dsp::extract_frame(samples, rate, grid.time(i), window_len);
                let mut density = fft.density(&frame, &window, rate);
                density.truncate(bins);
                density
            })
            .collect();

        Ok(Spectrogram {
            times: grid.times(),
            frequencies: (0..bins).map(|k| k as f64 * bin_width).collect(),
            power,
        })
    }
}
