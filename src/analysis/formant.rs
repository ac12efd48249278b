//! # Formant Tracker
//!
//! Vocal-tract resonances by Burg linear prediction.
//!
//! ## Algorithm:
//! 1. Resample to 2 × `max_formant_hz` (11 kHz for the 5500 Hz default)
//! 2. Pre-emphasize: x'[i] = x[i] - α·x[i-1], α = exp(-2π·F·Δt) with F = `pre_emphasis_from`
//! 3. Per frame: Gaussian window of physical length 2 × `window_length`
//! 4. Burg LPC of order 2 × `max_formants`
//! 5. Polynomial roots by Durand-Kerner iteration; roots outside the unit circle are
//!    reflected inside, then polished with Newton steps
//! 6. Upper-half-plane roots between 50 Hz and `max_formant_hz - 50` become formant
//!    candidates, sorted by frequency; the first `max_formants` are kept
//!
//! ## Tracks:
//! Each exposed track (F1..F3 by default) keeps the raw per-frame estimate and a
//! range-filtered copy where values outside [300, 5000] Hz become `None`.

use crate::analysis::dsp::{self, FrameGrid};
use crate::analysis::TimeSeries;
use crate::audio::waveform::Waveform;
use crate::config::FormantConfig;
use crate::error::{AppError, AppResult};
use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

const FEATURE: &str = "formants";

/// One formant number over time.
#[derive(Debug, Clone, PartialEq)]
pub struct FormantTrack {
    number: usize,
    raw: TimeSeries<Option<f64>>,
    filtered: TimeSeries<Option<f64>>,
}

impl FormantTrack {
    /// Build a track from raw estimates, masking values outside `[min_hz, max_hz]`.
    pub fn from_raw(number: usize, raw: TimeSeries<Option<f64>>, min_hz: f64, max_hz: f64) -> Self {
        let filtered = TimeSeries::new(
            raw.times.clone(),
            raw.values
                .iter()
                .map(|v| v.filter(|&f| f >= min_hz && f <= max_hz))
                .collect(),
        );
        Self {
            number,
            raw,
            filtered,
        }
    }

    /// 1-based formant number.
    pub fn number(&self) -> usize {
        self.number
    }

    /// Unfiltered estimates; `None` where the frame had fewer formants.
    pub fn raw(&self) -> &TimeSeries<Option<f64>> {
        &self.raw
    }

    /// Range-filtered values used by graphs and markers.
    pub fn filtered(&self) -> &TimeSeries<Option<f64>> {
        &self.filtered
    }

    /// Time-averaged frequency of the filtered values.
    ///
    /// ## Error Handling:
    /// `InsufficientData` when no frame has a value inside the valid range.
    pub fn mean_frequency(&self) -> AppResult<f64> {
        self.filtered.mean_present().ok_or_else(|| {
            AppError::insufficient(
                FEATURE,
                format!("formant {} has no value inside the valid range", self.number),
            )
        })
    }
}

/// Burg-LPC formant tracker.
#[derive(Debug, Clone)]
pub struct FormantTracker {
    settings: FormantConfig,
    time_step: f64,
}

impl FormantTracker {
    pub fn new(settings: FormantConfig, time_step: f64) -> Self {
        Self {
            settings,
            time_step,
        }
    }

    /// Compute tracks F1..F`tracked`.
    pub fn compute(&self, waveform: &Waveform) -> AppResult<Vec<FormantTrack>> {
        let s = &self.settings;
        let physical_window = 2.0 * s.window_length;
        let grid = FrameGrid::centered(waveform.duration(), physical_window, self.time_step)
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

        let original_rate = waveform.sample_rate() as f64;
        let target_rate = 2.0 * s.max_formant_hz;
        let (samples, rate) = if target_rate < original_rate {
            (dsp::resample(waveform.samples(), original_rate, target_rate), target_rate)
        } else {
            (waveform.samples().to_vec(), original_rate)
        };

        let emphasized = pre_emphasize(&samples, rate, s.pre_emphasis_from);

        let mut window_len = (physical_window * rate).round() as usize;
        if window_len % 2 == 0 {
            window_len += 1;
        }
        let window = dsp::gaussian_window(window_len);
        let order = 2 * s.max_formants;
        let max_candidate = s.max_formant_hz - 50.0;

        let frames: Vec<Vec<f64>> = (0..grid.count)
            .map(|i| {
                let frame = dsp::extract_frame(&emphasized, rate, grid.time(i), window_len);
                let windowed: Vec<f64> = frame.iter().zip(&window).map(|(x, w)| x * w).collect();
                let lpc = burg_lpc(&windowed, order);
                let roots = lpc_roots(&lpc);
                let mut formants = roots_to_frequencies(&roots, rate, 50.0, max_candidate);
                formants.truncate(s.max_formants);
                formants
            })
            .collect();

        let times = grid.times();
        Ok((1..=s.tracked)
            .map(|n| {
                let raw = TimeSeries::new(
                    times.clone(),
                    frames.iter().map(|f| f.get(n - 1).copied()).collect(),
                );
                FormantTrack::from_raw(n, raw, s.min_valid_hz, s.max_valid_hz)
            })
            .collect())
    }
}

fn pre_emphasize(samples: &[f64], rate: f64, from_hz: f64) -> Vec<f64> {
    let alpha = (-2.0 * PI * from_hz / rate).exp();
    let mut out = Vec::with_capacity(samples.len());
    let mut previous = 0.0;
    for (i, &x) in samples.iter().enumerate() {
        out.push(if i == 0 { x } else { x - alpha * previous });
        previous = x;
    }
    out
}

/// LPC coefficients by Burg's method; `a[0] = 1`.
fn burg_lpc(samples: &[f64], order: usize) -> Vec<f64> {
    let n = samples.len();
    let mut a = vec![0.0; order + 1];
    a[0] = 1.0;
    if n <= order {
        return a;
    }

    // Forward and backward prediction errors
    let mut ef = samples.to_vec();
    let mut eb = samples.to_vec();

    for k in 1..=order {
        let mut num = 0.0;
        let mut den = 0.0;
        for i in k..n {
            num += ef[i] * eb[i - 1];
            den += ef[i] * ef[i] + eb[i - 1] * eb[i - 1];
        }
        if den < 1e-30 {
            break;
        }
        let reflection = -2.0 * num / den;

        // Update from the top so eb[i - 1] still holds the previous stage
        for i in (k..n).rev() {
            let f = ef[i];
            ef[i] = f + reflection * eb[i - 1];
            eb[i] = eb[i - 1] + reflection * f;
        }

        let previous = a.clone();
        for i in 1..k {
            a[i] = previous[i] + reflection * previous[k - i];
        }
        a[k] = reflection;
    }

    a
}

/// Value and derivative of z^p + a[1]·z^(p-1) + ... + a[p].
fn eval_polynomial(a: &[f64], z: Complex64) -> (Complex64, Complex64) {
    let mut value = Complex64::new(a[0], 0.0);
    let mut derivative = Complex64::new(0.0, 0.0);
    for &c in &a[1..] {
        derivative = derivative * z + value;
        value = value * z + Complex64::new(c, 0.0);
    }
    (value, derivative)
}

/// Roots of the LPC polynomial, all inside the unit circle.
fn lpc_roots(a: &[f64]) -> Vec<Complex64> {
    let degree = a.len().saturating_sub(1);
    if degree == 0 || a[1..].iter().map(|c| c.abs()).sum::<f64>() < 1e-10 {
        // Silent frame
        return Vec::new();
    }

    let mut roots = durand_kerner(a, 200, 1e-12);
    for root in roots.iter_mut() {
        let r = root.norm();
        if r > 1.0 {
            *root = root.conj() / (r * r);
        }
        *root = polish_root(a, *root, 10, 1e-10);
    }
    roots
}

/// Simultaneous root finding for a monic polynomial.
fn durand_kerner(a: &[f64], max_iter: usize, tol: f64) -> Vec<Complex64> {
    let n = a.len() - 1;
    let radius = 0.9;
    // Rotated start keeps no initial guess on the real axis
    let mut roots: Vec<Complex64> = (0..n)
        .map(|k| Complex64::from_polar(radius, 2.0 * PI * k as f64 / n as f64 + 0.4))
        .collect();

    for _ in 0..max_iter {
        let mut converged = true;
        for i in 0..n {
            let mut denom = Complex64::new(1.0, 0.0);
            for j in 0..n {
                if i != j {
                    denom *= roots[i] - roots[j];
                }
            }
            let (value, _) = eval_polynomial(a, roots[i]);
            let delta = if denom.norm() < 1e-14 {
                Complex64::new(1e-6, 1e-6)
            } else {
                value / denom
            };
            roots[i] -= delta;
            if delta.norm() > tol {
                converged = false;
            }
        }
        if converged {
            break;
        }
    }
    roots
}

fn polish_root(a: &[f64], mut z: Complex64, max_iter: usize, tol: f64) -> Complex64 {
    for _ in 0..max_iter {
        let (value, derivative) = eval_polynomial(a, z);
        if derivative.norm() < 1e-30 {
            break;
        }
        let delta = value / derivative;
        z -= delta;
        if delta.norm() < tol * z.norm() {
            break;
        }
    }
    z
}

/// Frequencies (Hz) of upper-half-plane roots in `[min_hz, max_hz]`, ascending.
fn roots_to_frequencies(roots: &[Complex64], rate: f64, min_hz: f64, max_hz: f64) -> Vec<f64> {
    let mut frequencies: Vec<f64> = roots
        .iter()
        .filter(|z| z.im > 0.0)
        .filter_map(|z| {
            let r = z.norm();
            let frequency = z.arg() * rate / (2.0 * PI);
            let bandwidth = if r > 0.0 { -r.ln() * rate / PI } else { f64::INFINITY };
            (frequency >= min_hz && frequency <= max_hz && bandwidth > 0.0).then_some(frequency)
        })
        .collect();
    frequencies.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    frequencies
}

#[cfg(test)]
mod tests {
    use super::*;

    /// White noise through two resonators at 700 and 1800 Hz, sampled at 11 kHz.
    fn synthetic_vowel(mut seed: u64) -> Waveform {
        let rate = 11000.0;
        let mut noise = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((seed >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        };
        let resonator = |freq: f64, bw: f64| {
            let r = (-PI * bw / rate).exp();
            (2.0 * r * (2.0 * PI * freq / rate).cos(), -r * r)
        };
        let (a1, a2) = resonator(700.0, 80.0);
        let (b1, b2) = resonator(1800.0, 100.0);

        let (mut y1, mut y2, mut z1, mut z2) = (0.0, 0.0, 0.0, 0.0);
        let samples: Vec<f64> = (0..5500)
            .map(|_| {
                let y = noise() + a1 * y1 + a2 * y2;
                y2 = y1;
                y1 = y;
                let z = y + b1 * z1 + b2 * z2;
                z2 = z1;
                z1 = z;
                z
            })
            .collect();
        let peak = samples.iter().fold(0.0f64, |m, x| m.max(x.abs()));
        Waveform::new(samples.iter().map(|x| 0.5 * x / peak).collect(), 11000)
    }

    #[test]
    fn test_range_filter_masks_out_of_band_values() {
        let raw = TimeSeries::new(vec![0.0, 0.1, 0.2, 0.3], vec![Some(250.0), Some(6000.0), Some(1000.0), None]);
        let track = FormantTrack::from_raw(1, raw, 300.0, 5000.0);
        assert_eq!(track.filtered().values, vec![None, None, Some(1000.0), None]);
        assert_eq!(track.raw().values[0], Some(250.0));
        assert_eq!(track.mean_frequency().unwrap(), 1000.0);
    }

    #[test]
    fn test_empty_track_mean_is_insufficient() {
        let raw = TimeSeries::new(vec![0.0, 0.1], vec![Some(100.0), None]);
        let track = FormantTrack::from_raw(2, raw, 300.0, 5000.0);
        assert!(matches!(
            track.mean_frequency(),
            Err(AppError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_durand_kerner_finds_known_roots() {
        // (z - 0.5)(z + 0.25)(z^2 + 0.81) = z^4 - 0.25z^3 + 0.685z^2 - 0.2025z - 0.10125
        let a = [1.0, -0.25, 0.685, -0.2025, -0.10125];
        let roots = lpc_roots(&a);
        assert_eq!(roots.len(), 4);
        for expected in [
            Complex64::new(0.5, 0.0),
            Complex64::new(-0.25, 0.0),
            Complex64::new(0.0, 0.9),
            Complex64::new(0.0, -0.9),
        ] {
            assert!(
                roots.iter().any(|r| (r - expected).norm() < 1e-8),
                "missing root {}",
                expected
            );
        }
    }

    /// Per frame, the candidate closest to `target` across all tracks.
    fn nearest_per_frame(tracks: &[FormantTrack], target: f64) -> Vec<f64> {
        (0..tracks[0].raw().len())
            .filter_map(|i| {
                tracks
                    .iter()
                    .filter_map(|t| t.raw().values[i])
                    .min_by(|a, b| (a - target).abs().total_cmp(&(b - target).abs()))
            })
            .collect()
    }

    fn median(mut values: Vec<f64>) -> f64 {
        values.sort_by(|a, b| a.total_cmp(b));
        values[values.len() / 2]
    }

    #[test]
    fn test_burg_recovers_resonances() {
        let settings = FormantConfig {
            tracked: 5,
            ..FormantConfig::default()
        };
        let tracker = FormantTracker::new(settings, 0.00625);

        // Single frames of a noise realization can split a resonance; the median
        // over every frame of several realizations must not.
        for seed in [0x2545_F491_4F6C_DD1D, 0x9E37_79B9_7F4A_7C15, 0xD1B5_4A32_D192_ED03] {
            let tracks = tracker.compute(&synthetic_vowel(seed)).unwrap();
            assert_eq!(tracks.len(), 5);

            let first = nearest_per_frame(&tracks, 700.0);
            let second = nearest_per_frame(&tracks, 1800.0);
            assert!(first.len() > tracks[0].raw().len() / 2, "seed {:#x}", seed);
            assert!(second.len() > tracks[0].raw().len() / 2, "seed {:#x}", seed);

            let f1 = median(first);
            let f2 = median(second);
            assert!((f1 - 700.0).abs() < 80.0, "seed {:#x}: F1 median {}", seed, f1);
            assert!((f2 - 1800.0).abs() < 120.0, "seed {:#x}: F2 median {}", seed, f2);
        }
    }

    #[test]
    fn test_silence_has_no_formants() {
        let tracker = FormantTracker::new(FormantConfig::default(), 0.00625);
        let tracks = tracker.compute(&Waveform::new(vec![0.0; 8000], 16000)).unwrap();
        assert_eq!(tracks.len(), 3);
        for track in &tracks {
            assert!(track.raw().values.iter().all(|v| v.is_none()));
        }
    }

    #[test]
    fn test_too_short_input() {
        let tracker = FormantTracker::new(FormantConfig::default(), 0.00625);
        assert!(tracker.compute(&Waveform::new(vec![0.1; 400], 16000)).is_err());
    }
}
