//! # Pitch Tracker
//!
//! Fundamental-frequency contour by the autocorrelation method.
//!
//! ## Per Frame:
//! 1. Take 3 periods of the pitch floor around the frame time, remove the local mean
//! 2. Apply a Hann window and autocorrelate through the FFT
//! 3. Divide by the window's own autocorrelation to undo its taper
//! 4. Collect local maxima between 1/ceiling and 1/floor, refined by parabolic interpolation
//! 5. Score each candidate with an octave cost that slightly favours higher pitches
//! 6. Compare the best candidate to an "unvoiced" score driven by the voicing and
//!    silence thresholds; the frame is voiced only if the candidate wins
//!
//! Unvoiced frames have frequency 0 at the source and are represented as `None`.

use crate::analysis::dsp::{self, FrameGrid};
use crate::analysis::TimeSeries;
use crate::audio::waveform::Waveform;
use crate::config::PitchConfig;
use crate::error::{AppError, AppResult};
use rustfft::{num_complex::Complex, FftPlanner};

const FEATURE: &str = "pitch";

/// Number of floor periods covered by one analysis window
const PERIODS_PER_WINDOW: f64 = 3.0;

/// Pitch in Hz per frame; `None` for unvoiced frames.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchContour {
    series: TimeSeries<Option<f64>>,
}

impl PitchContour {
    /// Build from source frequencies where 0 marks an unvoiced frame.
    pub fn from_frequencies(times: Vec<f64>, frequencies: Vec<f64>) -> Self {
        let values = frequencies
            .into_iter()
            .map(|f| if f > 0.0 && f.is_finite() { Some(f) } else { None })
            .collect();
        Self {
            series: TimeSeries::new(times, values),
        }
    }

    pub fn series(&self) -> &TimeSeries<Option<f64>> {
        &self.series
    }

    pub fn voiced_count(&self) -> usize {
        self.series.values.iter().flatten().count()
    }

    /// Mean over voiced frames only.
    ///
    /// ## Error Handling:
    /// `InsufficientData` when no frame is voiced; never 0 or NaN.
    pub fn mean(&self) -> AppResult<f64> {
        self.series
            .mean_present()
            .ok_or_else(|| AppError::insufficient(FEATURE, "no voiced frames"))
    }

    /// Savitzky-Golay smoothing over the voiced samples in order, written back to
    /// their own frames. Unvoiced frames stay `None`.
    pub fn smoothed(&self, window: usize, order: usize) -> AppResult<TimeSeries<Option<f64>>> {
        let voiced: Vec<f64> = self.series.values.iter().flatten().copied().collect();
        let smoothed = dsp::savgol_filter(&voiced, window, order, dsp::WindowBound::Fits, FEATURE)?;

        let mut next = smoothed.into_iter();
        let values = self
            .series
            .values
            .iter()
            .map(|v| v.and_then(|_| next.next()))
            .collect();
        Ok(TimeSeries::new(self.series.times.clone(), values))
    }
}

/// Autocorrelation pitch tracker.
#[derive(Debug, Clone)]
pub struct PitchTracker {
    settings: PitchConfig,
}

impl PitchTracker {
    pub fn new(settings: PitchConfig) -> Self {
        Self { settings }
    }

    /// Compute the pitch contour at `0.75 / floor` seconds per frame (unless a
    /// time step is configured).
    pub fn compute(&self, waveform: &Waveform) -> AppResult<PitchContour> {
        let s = &self.settings;
        let rate = waveform.sample_rate() as f64;
        let window_duration = PERIODS_PER_WINDOW / s.floor;
        let window_len = (window_duration * rate).round() as usize;

        let grid = FrameGrid::centered(waveform.duration(), window_duration, s.effective_time_step())
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

        let min_lag = ((rate / s.ceiling).ceil() as usize).max(2);
        let max_lag = ((rate / s.floor).floor() as usize).min(window_len.saturating_sub(2));
        if min_lag >= max_lag {
            return Err(AppError::insufficient(
                FEATURE,
                format!("sample rate {} Hz cannot resolve the pitch range", rate),
            ));
        }

        let samples = waveform.samples();
        let global_mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let global_peak = samples
            .iter()
            .map(|x| (x - global_mean).abs())
            .fold(0.0, f64::max);

        let window = dsp::hann_window(window_len);
        let mut autocorr = Autocorrelator::new(window_len);
        let window_ac = autocorr.normalized(&window);

        let frequencies = (0..grid.count)
            .map(|i| {
                let mut frame = dsp::extract_frame(samples, rate, grid.time(i), window_len);
                let local_mean = frame.iter().sum::<f64>() / frame.len() as f64;
                let mut local_peak: f64 = 0.0;
                for (x, w) in frame.iter_mut().zip(window.iter()) {
                    *x -= local_mean;
                    local_peak = local_peak.max(x.abs());
                    *x *= w;
                }

                if global_peak <= 0.0 || local_peak <= 0.0 {
                    return 0.0;
                }

                let r = autocorr.normalized(&frame);
                let best = best_candidate(&r, &window_ac, (min_lag, max_lag), rate, s);

                let unvoiced_strength = s.voicing_threshold
                    + (2.0
                        - (local_peak / global_peak)
                            / (s.silence_threshold / (1.0 + s.voicing_threshold)))
                        .max(0.0);

                match best {
                    Some((lag, strength)) if strength > unvoiced_strength => rate / lag,
                    _ => 0.0,
                }
            })
            .collect();

        Ok(PitchContour::from_frequencies(grid.times(), frequencies))
    }
}

/// Best (lag in samples, strength) among the local maxima in the lag range.
fn best_candidate(
    r: &[f64],
    window_ac: &[f64],
    lags: (usize, usize),
    rate: f64,
    s: &PitchConfig,
) -> Option<(f64, f64)> {
    let corrected = |i: usize| {
        if window_ac[i] > 0.0 {
            r[i] / window_ac[i]
        } else {
            0.0
        }
    };

    let mut best: Option<(f64, f64)> = None;
    for i in lags.0..=lags.1 {
        let (prev, here, next) = (corrected(i - 1), corrected(i), corrected(i + 1));
        if here < 0.5 * s.voicing_threshold || here < prev || here < next {
            continue;
        }

        // Parabolic refinement of the peak position and height
        let denom = prev - 2.0 * here + next;
        let (offset, mut height) = if denom.abs() > 1e-12 {
            let offset = 0.5 * (prev - next) / denom;
            (offset, here - 0.25 * (prev - next) * offset)
        } else {
            (0.0, here)
        };
        if height > 1.0 {
            height = 1.0 / height;
        }
        let lag = i as f64 + offset;

        let period = lag / rate;
        let strength = height - s.octave_cost * (s.floor * period).log2();
        if best.map_or(true, |(_, b)| strength > b) {
            best = Some((lag, strength));
        }
    }
    best
}

/// Normalized autocorrelation through a zero-padded FFT.
struct Autocorrelator {
    forward: std::sync::Arc<dyn rustfft::Fft<f64>>,
    inverse: std::sync::Arc<dyn rustfft::Fft<f64>>,
    buffer: Vec<Complex<f64>>,
    len: usize,
}

impl Autocorrelator {
    fn new(len: usize) -> Self {
        // Twice the frame length keeps the circular wrap out of every lag we read
        let nfft = (2 * len).next_power_of_two();
        let mut planner = FftPlanner::<f64>::new();
        Self {
            forward: planner.plan_fft_forward(nfft),
            inverse: planner.plan_fft_inverse(nfft),
            buffer: vec![Complex { re: 0.0, im: 0.0 }; nfft],
            len,
        }
    }

    /// Autocorrelation for lags `0..len`, divided by the lag-0 value.
    fn normalized(&mut self, frame: &[f64]) -> Vec<f64> {
        for slot in self.buffer.iter_mut() {
            *slot = Complex { re: 0.0, im: 0.0 };
        }
        for (slot, &x) in self.buffer.iter_mut().zip(frame.iter()) {
            slot.re = x;
        }
        self.forward.process(&mut self.buffer);
        for slot in self.buffer.iter_mut() {
            *slot = Complex {
                re: slot.norm_sqr(),
                im: 0.0,
            };
        }
        self.inverse.process(&mut self.buffer);

        let zero = self.buffer[0].re;
        if zero <= 0.0 {
            return vec![0.0; self.len];
        }
        self.buffer[..self.len].iter().map(|c| c.re / zero).collect()
    }
}
