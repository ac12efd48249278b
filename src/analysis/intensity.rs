//! # Intensity Tracker
//!
//! Loudness contour in dB relative to the auditory threshold (2·10⁻⁵)².
//! Each frame is a Gaussian-weighted mean square over 3.2 periods of the minimum
//! pitch, with the weighted mean removed first so DC offset does not count as
//! loudness. There is no voicing mask: silent frames simply report the floor.

use crate::analysis::dsp::{self, FrameGrid};
use crate::analysis::TimeSeries;
use crate::audio::waveform::Waveform;
use crate::config::IntensityConfig;
use crate::error::{AppError, AppResult};

const FEATURE: &str = "intensity";

/// Squared reference pressure
const REFERENCE_POWER: f64 = 4.0e-10;

/// Reported for frames with (practically) no energy
pub const SILENCE_DB: f64 = -300.0;

#[derive(Debug, Clone)]
pub struct IntensityTracker {
    settings: IntensityConfig,
    time_step: f64,
}

impl IntensityTracker {
    pub fn new(settings: IntensityConfig, time_step: f64) -> Self {
        Self {
            settings,
            time_step,
        }
    }

    pub fn compute(&self, waveform: &Waveform) -> AppResult<TimeSeries<f64>> {
        let rate = waveform.sample_rate() as f64;
        let window_duration = 3.2 / self.settings.minimum_pitch;
        let window_len = ((window_duration * rate).round() as usize).max(1);

        let grid = FrameGrid::centered(waveform.duration(), window_duration, self.time_step)
            .ok_or_else(|| {
                AppError::insufficient(
                    FEATURE,
                    format!(
                        "{:.4}s of audio is shorter than the {:.4}s window",
                        waveform.duration(),
                        window_duration
                    ),
                )
            })?;

        let window = dsp::gaussian_window(window_len);
        let weight_sum: f64 = window.iter().sum();
        let samples = waveform.samples();

        let values = (0..grid.count)
            .map(|i| {
                let frame = dsp::extract_frame(samples, rate, grid.time(i), window_len);
                let mean = if self.settings.subtract_mean {
                    frame.iter().zip(&window).map(|(x, w)| x * w).sum::<f64>() / weight_sum
                } else {
                    0.0
                };
                let power = frame
                    .iter()
                    .zip(&window)
                    .map(|(x, w)| w * (x - mean) * (x - mean))
                    .sum::<f64>()
                    / weight_sum;

                let relative = power / REFERENCE_POWER;
                if relative < 1e-30 {
                    SILENCE_DB
                } else {
                    dsp::power_to_db(relative)
                }
            })
            .collect();

        Ok(TimeSeries::new(grid.times(), values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn tracker() -> IntensityTracker {
        IntensityTracker::new(IntensityConfig::default(), 0.00625)
    }

    #[test]
    fn test_sine_level() {
        // Amplitude 0.02 → mean square 2e-4 → 10·log10(2e-4 / 4e-10) ≈ 57 dB
        let rate = 16000u32;
        let samples: Vec<f64> = (0..16000)
            .map(|i| 0.02 * (2.0 * PI * 250.0 * i as f64 / rate as f64).sin())
            .collect();
        let series = tracker().compute(&Waveform::new(samples, rate)).unwrap();
        let expected = 10.0 * (2e-4f64 / 4e-10).log10();
        for (_, &db) in series.iter() {
            assert!((db - expected).abs() < 0.5, "{} vs {}", db, expected);
        }
    }

    #[test]
    fn test_dc_offset_is_removed() {
        let series = tracker()
            .compute(&Waveform::new(vec![0.25; 8000], 16000))
            .unwrap();
        // Only rounding noise is left after the mean is removed
        assert!(series.values.iter().all(|&db| db < -100.0), "{:?}", series.values);
    }

    #[test]
    fn test_shared_frame_step() {
        let series = tracker()
            .compute(&Waveform::new(vec![0.0; 16000], 16000))
            .unwrap();
        assert!((series.times[1] - series.times[0] - 0.00625).abs() < 1e-12);
        assert!(series.values.iter().all(|&db| db == SILENCE_DB));
    }

    #[test]
    fn test_too_short_input() {
        assert!(tracker().compute(&Waveform::new(vec![0.1; 100], 16000)).is_err());
    }
}
