//! # Acoustic Analysis Module
//!
//! Converts a complete [`Waveform`](crate::audio::waveform::Waveform) into speech features.
//! Every analysis is a pure function of its input waveform and settings.
//!
//! ## Key Components:
//! - **SpectralEngine**: Short-time spectrogram in dB, heat-map and surface views
//! - **PitchTracker**: Fundamental frequency contour with unvoiced frames masked
//! - **FormantTracker**: Burg-LPC formant tracks F1-F3, range filtered
//! - **IntensityTracker**: Loudness contour in dB
//! - **PowerSpectrumAnalyzer**: Whole-signal spectrum, smoothed, with formant markers
//! - **Analyzer**: Runs all of the above and assembles the result set
//!
//! ## Frame Rates:
//! - Spectrogram: 2ms hop
//! - Pitch: 0.75 / pitch floor (10ms at 75 Hz)
//! - Formants and intensity: shared 6.25ms hop

pub mod dsp;
pub mod formant;
pub mod intensity;
pub mod pipeline;
pub mod pitch;
pub mod spectrogram;
pub mod spectrum;

use serde::Serialize;

/// Values sampled at strictly increasing times (seconds).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries<T> {
    pub times: Vec<f64>,
    pub values: Vec<T>,
}

impl<T> TimeSeries<T> {
    /// Pair times with values. Both must have the same length and the times must
    /// strictly increase; frame grids always produce such times.
    pub fn new(times: Vec<f64>, values: Vec<T>) -> Self {
        debug_assert_eq!(times.len(), values.len());
        debug_assert!(times.windows(2).all(|w| w[0] < w[1]));
        Self { times, values }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &T)> {
        self.times.iter().copied().zip(self.values.iter())
    }
}

impl TimeSeries<Option<f64>> {
    /// Present values only, in time order.
    pub fn present(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.iter().filter_map(|(t, v)| v.map(|v| (t, v)))
    }

    /// Mean of the present values, `None` if there are none.
    pub fn mean_present(&self) -> Option<f64> {
        let (sum, count) = self
            .values
            .iter()
            .flatten()
            .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}
