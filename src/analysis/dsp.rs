//! # Signal Processing Helpers
//!
//! Shared numeric building blocks for the trackers:
//!
//! - **Windows**: Gaussian (alpha 12, the short-time analysis window) and Hann
//! - **Frame grid**: centered analysis frames over a signal
//! - **Spectra**: one-sided power density of a windowed frame via rustfft
//! - **Resampling**: FFT-domain sinc resampling
//! - **Savitzky-Golay**: least-squares polynomial smoothing with polynomial-fit edges
//! - **dB conversion** with a floor so no `-inf` or NaN escapes

use crate::error::{AppError, AppResult};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;

/// Gaussian window with the edges at exp(-12) of the peak.
pub fn gaussian_window(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }

    let alpha = 12.0;
    let mid = (n - 1) as f64 / 2.0;

    (0..n)
        .map(|i| {
            let x = (i as f64 - mid) / mid;
            (-alpha * x * x).exp()
        })
        .collect()
}

/// Symmetric Hann window.
pub fn hann_window(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// Convert a power value to decibels.
///
/// Values that are not strictly positive (or not finite) are clamped to the
/// smallest positive `f64` first, so the result is always finite.
pub fn power_to_db(power: f64) -> f64 {
    let p = if power.is_finite() && power > 0.0 {
        power
    } else {
        f64::MIN_POSITIVE
    };
    10.0 * p.log10()
}

/// Truncate two parallel arrays to their common minimum length.
pub fn align_lengths<A, B>(a: &mut Vec<A>, b: &mut Vec<B>) {
    let n = a.len().min(b.len());
    a.truncate(n);
    b.truncate(n);
}

/// Evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Centered analysis frames: as many whole windows as fit, the block of frames
/// centered on the signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGrid {
    pub count: usize,
    pub first_time: f64,
    pub step: f64,
}

impl FrameGrid {
    /// Returns `None` when not even one window of `window_duration` fits.
    pub fn centered(duration: f64, window_duration: f64, step: f64) -> Option<Self> {
        if step <= 0.0 || duration < window_duration {
            return None;
        }
        // Tolerance keeps exact multiples from losing a frame to rounding
        let count = ((duration - window_duration) / step + 1e-9).floor() as usize + 1;
        let first_time = (duration - (count - 1) as f64 * step) / 2.0;
        Some(Self {
            count,
            first_time,
            step,
        })
    }

    pub fn time(&self, index: usize) -> f64 {
        self.first_time + index as f64 * self.step
    }

    pub fn times(&self) -> Vec<f64> {
        (0..self.count).map(|i| self.time(i)).collect()
    }
}

/// Copy `len` samples centered at `time`, zero-padding outside the signal.
pub fn extract_frame(samples: &[f64], sample_rate: f64, time: f64, len: usize) -> Vec<f64> {
    let center = (time * sample_rate).round() as isize;
    let start = center - (len / 2) as isize;
    let mut frame = vec![0.0; len];
    for (i, slot) in frame.iter_mut().enumerate() {
        let src = start + i as isize;
        if src >= 0 && (src as usize) < samples.len() {
            *slot = samples[src as usize];
        }
    }
    frame
}

/// Reusable forward FFT of a fixed size that returns one-sided power density.
pub struct PowerSpectrumFft {
    fft: std::sync::Arc<dyn rustfft::Fft<f64>>,
    buffer: Vec<Complex<f64>>,
    nfft: usize,
}

impl PowerSpectrumFft {
    pub fn new(nfft: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        Self {
            fft: planner.plan_fft_forward(nfft),
            buffer: vec![Complex { re: 0.0, im: 0.0 }; nfft],
            nfft,
        }
    }

    /// One-sided power density (per Hz) of `frame` weighted by `window`.
    ///
    /// Returns `nfft / 2 + 1` bins. The frame is zero-padded to `nfft`. With
    /// `window_energy` = sum of squared window values, Parseval holds for the
    /// one-sided sum times the bin width.
    pub fn density(&mut self, frame: &[f64], window: &[f64], sample_rate: f64) -> Vec<f64> {
        for slot in self.buffer.iter_mut() {
            *slot = Complex { re: 0.0, im: 0.0 };
        }
        let mut window_energy = 0.0;
        for (i, (&x, &w)) in frame.iter().zip(window.iter()).take(self.nfft).enumerate() {
            self.buffer[i].re = x * w;
            window_energy += w * w;
        }
        self.fft.process(&mut self.buffer);

        let half = self.nfft / 2;
        let norm = if window_energy > 0.0 {
            1.0 / (window_energy * sample_rate)
        } else {
            0.0
        };
        (0..=half)
            .map(|k| {
                let p = self.buffer[k].norm_sqr() * norm;
                if k == 0 || (k == half && self.nfft % 2 == 0) {
                    p
                } else {
                    2.0 * p
                }
            })
            .collect()
    }
}

/// FFT-domain resampling (band-limited sinc interpolation).
///
/// The spectrum is truncated when downsampling or zero-padded when upsampling;
/// the Nyquist bin is folded or split so real input stays real.
pub fn resample(samples: &[f64], old_rate: f64, new_rate: f64) -> Vec<f64> {
    if (old_rate - new_rate).abs() < 1e-6 {
        return samples.to_vec();
    }

    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    let m = (n as f64 * new_rate / old_rate).round() as usize;
    if m == 0 {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f64>::new();
    let mut spectrum: Vec<Complex<f64>> =
        samples.iter().map(|&x| Complex { re: x, im: 0.0 }).collect();
    planner.plan_fft_forward(n).process(&mut spectrum);

    let short = n.min(m);
    let positive = short / 2 + 1;
    let mut resized = vec![Complex { re: 0.0, im: 0.0 }; m];
    for k in 0..positive.min(short) {
        resized[k] = spectrum[k];
    }
    for k in 1..(short - positive.min(short) + 1) {
        resized[m - k] = spectrum[n - k];
    }
    if short % 2 == 0 {
        let nyquist = short / 2;
        if m < n {
            resized[nyquist] = spectrum[nyquist] + spectrum[n - nyquist];
        } else if m > n {
            let half = spectrum[nyquist] * 0.5;
            resized[nyquist] = half;
            resized[m - nyquist] = half;
        }
    }

    planner.plan_fft_inverse(m).process(&mut resized);
    resized.iter().map(|c| c.re / n as f64).collect()
}

/// How many values a Savitzky-Golay window needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowBound {
    /// More values than the window
    Shorter,
    /// At least as many values as the window
    Fits,
}

impl WindowBound {
    fn admits(self, window: usize, len: usize) -> bool {
        match self {
            WindowBound::Shorter => window < len,
            WindowBound::Fits => window <= len,
        }
    }
}

/// Savitzky-Golay smoothing.
///
/// Interior points use the least-squares convolution of a centered window of
/// `window` points with a polynomial of degree `order`; the first and last
/// `window / 2` points are taken from polynomials fitted to the first and last
/// window. The window must be odd and larger than `order`. `bound` sets whether
/// it may span every value or must be strictly shorter.
pub fn savgol_filter(
    values: &[f64],
    window: usize,
    order: usize,
    bound: WindowBound,
    feature: &'static str,
) -> AppResult<Vec<f64>> {
    if window % 2 == 0 || window <= order {
        return Err(AppError::insufficient(
            feature,
            format!("smoothing window {} must be odd and exceed order {}", window, order),
        ));
    }
    if !bound.admits(window, values.len()) {
        return Err(AppError::insufficient(
            feature,
            format!(
                "smoothing window {} does not fit {} samples",
                window,
                values.len()
            ),
        ));
    }

    let half = window / 2;
    let scale = half.max(1) as f64;
    let offsets: Vec<f64> = (0..window)
        .map(|j| (j as f64 - half as f64) / scale)
        .collect();

    // Convolution weights: value at the center of the least-squares fit.
    let gram = gram_matrix(&offsets, order);
    let mut unit = vec![0.0; order + 1];
    unit[0] = 1.0;
    let h = solve_linear(gram.clone(), unit).ok_or_else(|| {
        AppError::insufficient(feature, "singular smoothing system".to_string())
    })?;
    let weights: Vec<f64> = offsets.iter().map(|&x| eval_poly(&h, x)).collect();

    let n = values.len();
    let mut out = vec![0.0; n];
    for i in half..n - half {
        out[i] = values[i - half..=i + half]
            .iter()
            .zip(weights.iter())
            .map(|(v, w)| v * w)
            .sum();
    }

    let head = fit_poly(&gram, &offsets, &values[..window], order)
        .ok_or_else(|| AppError::insufficient(feature, "singular edge fit".to_string()))?;
    for i in 0..half {
        out[i] = eval_poly(&head, offsets[i]);
    }
    let tail = fit_poly(&gram, &offsets, &values[n - window..], order)
        .ok_or_else(|| AppError::insufficient(feature, "singular edge fit".to_string()))?;
    for i in 0..half {
        out[n - half + i] = eval_poly(&tail, offsets[half + 1 + i]);
    }

    Ok(out)
}

fn gram_matrix(xs: &[f64], order: usize) -> Vec<Vec<f64>> {
    let mut gram = vec![vec![0.0; order + 1]; order + 1];
    for &x in xs {
        for (r, row) in gram.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell += x.powi((r + c) as i32);
            }
        }
    }
    gram
}

fn fit_poly(gram: &[Vec<f64>], xs: &[f64], ys: &[f64], order: usize) -> Option<Vec<f64>> {
    let rhs: Vec<f64> = (0..=order)
        .map(|k| xs.iter().zip(ys).map(|(&x, &y)| x.powi(k as i32) * y).sum())
        .collect();
    solve_linear(gram.to_vec(), rhs)
}

fn eval_poly(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Gaussian elimination with partial pivoting.
fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}
