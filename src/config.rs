//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between Rust structs and TOML/env representations
//! - **derive macros**: Automatically generate Debug, Clone, Serialize, Deserialize
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_CAPTURE__CHUNK_SIZE, APP_ANALYSIS__PITCH__FLOOR, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impls)
//!
//! The defaults reproduce the classic speech-analysis settings: 16 kHz mono 16-bit
//! capture in 3200-sample chunks, a 5 ms spectrogram window up to 5 kHz, pitch between
//! 75 and 600 Hz, five formants below 5500 Hz.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Capture, analysis and output are tuned independently, so each gets its own table
/// in config.toml (`[capture]`, `[analysis.pitch]`, `[output]`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub analysis: AnalysisConfig,
    pub output: OutputConfig,
}

/// Live capture settings.
///
/// ## Fields:
/// - `sample_rate`, `channels`, `bits_per_sample`: the capture format every input delivers
/// - `chunk_size`: samples per device read (one chunk)
/// - `buffer_chunks`: how many recent chunks the streaming window keeps
/// - `tick_interval_ms`: period of the external tick driver
/// - `read_timeout_ms`: upper bound on a single blocking chunk read
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub chunk_size: usize,
    pub buffer_chunks: usize,
    pub tick_interval_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,    // 16kHz - speech band is fully covered
            channels: 1,           // Mono audio
            bits_per_sample: 16,   // 16-bit signed PCM
            chunk_size: 3200,      // 200ms per read at 16kHz
            buffer_chunks: 5,      // 1 second live window
            tick_interval_ms: 200, // one tick per chunk
            read_timeout_ms: 1000,
        }
    }
}

/// Settings for every analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Frame period shared by the formant and intensity tracks (seconds)
    pub track_time_step: f64,
    pub spectrogram: SpectrogramConfig,
    pub pitch: PitchConfig,
    pub formant: FormantConfig,
    pub intensity: IntensityConfig,
    pub power_spectrum: PowerSpectrumConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            track_time_step: 0.00625, // 25% of the 25ms formant window
            spectrogram: SpectrogramConfig::default(),
            pitch: PitchConfig::default(),
            formant: FormantConfig::default(),
            intensity: IntensityConfig::default(),
            power_spectrum: PowerSpectrumConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramConfig {
    /// Effective window length in seconds; the Gaussian window spans twice this
    pub window_length: f64,
    pub max_frequency: f64,
    pub time_step: f64,
    /// Upper bound on the FFT bin spacing in Hz
    pub frequency_step: f64,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            window_length: 0.005, // wide-band: resolves formants, not harmonics
            max_frequency: 5000.0,
            time_step: 0.002,
            frequency_step: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    /// Frame period in seconds; 0 means 0.75 / floor
    pub time_step: f64,
    pub floor: f64,
    pub ceiling: f64,
    pub voicing_threshold: f64,
    pub silence_threshold: f64,
    pub octave_cost: f64,
    /// Savitzky-Golay window for the overlay trace (odd)
    pub smoothing_window: usize,
    pub smoothing_order: usize,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            time_step: 0.0,
            floor: 75.0,
            ceiling: 600.0,
            voicing_threshold: 0.45,
            silence_threshold: 0.03,
            octave_cost: 0.01,
            smoothing_window: 11,
            smoothing_order: 2,
        }
    }
}

impl PitchConfig {
    /// Frame period actually used by the tracker.
    pub fn effective_time_step(&self) -> f64 {
        if self.time_step > 0.0 {
            self.time_step
        } else {
            0.75 / self.floor
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormantConfig {
    pub max_formants: usize,
    pub max_formant_hz: f64,
    /// Effective window length in seconds; the Gaussian window spans twice this
    pub window_length: f64,
    pub pre_emphasis_from: f64,
    /// Number of formant tracks exposed to consumers (F1..Fn)
    pub tracked: usize,
    pub min_valid_hz: f64,
    pub max_valid_hz: f64,
}

impl Default for FormantConfig {
    fn default() -> Self {
        Self {
            max_formants: 5,
            max_formant_hz: 5500.0, // adult speaker default
            window_length: 0.025,
            pre_emphasis_from: 50.0,
            tracked: 3,
            min_valid_hz: 300.0,
            max_valid_hz: 5000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntensityConfig {
    /// Lowest pitch expected; the window spans 3.2 periods of it
    pub minimum_pitch: f64,
    pub subtract_mean: bool,
}

impl Default for IntensityConfig {
    fn default() -> Self {
        Self {
            minimum_pitch: 100.0,
            subtract_mean: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerSpectrumConfig {
    pub smoothing_window: usize,
    pub smoothing_order: usize,
}

impl Default for PowerSpectrumConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 101,
            smoothing_order: 2,
        }
    }
}

/// Where recordings and reports are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub recording_path: PathBuf,
    pub report_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            recording_path: PathBuf::from("output.wav"),
            report_path: PathBuf::from("audio_analysis.txt"),
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    ///
    /// ## Environment Variable Examples:
    /// - `APP_CAPTURE__CHUNK_SIZE=1600`: Smaller reads
    /// - `APP_ANALYSIS__PITCH__CEILING=800`: Allow higher voices
    /// - `APP_OUTPUT__REPORT_PATH=/tmp/report.txt`: Report location
    ///
    /// Double underscores separate nesting levels because field names contain
    /// single underscores.
    pub fn load() -> AppResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Capture format is the fixed mono 16-bit layout the streaming buffer stores
    /// - All sizes and periods are positive
    /// - Smoothing windows are odd and wider than their polynomial order
    /// - Pitch floor is below the ceiling, valid formant range is ordered
    pub fn validate(&self) -> AppResult<()> {
        let capture = &self.capture;
        if capture.channels != 1 {
            return Err(AppError::Config("Capture must be mono (channels = 1)".to_string()));
        }
        if capture.bits_per_sample != 16 {
            return Err(AppError::Config("Capture must be 16-bit PCM".to_string()));
        }
        if capture.sample_rate == 0 || capture.chunk_size == 0 || capture.buffer_chunks == 0 {
            return Err(AppError::Config(
                "Sample rate, chunk size and buffer chunks must be greater than 0".to_string(),
            ));
        }
        if capture.tick_interval_ms == 0 {
            return Err(AppError::Config("Tick interval must be greater than 0".to_string()));
        }

        let analysis = &self.analysis;
        if analysis.track_time_step <= 0.0 {
            return Err(AppError::Config("Track time step must be positive".to_string()));
        }
        let spectrogram = &analysis.spectrogram;
        if spectrogram.window_length <= 0.0
            || spectrogram.time_step <= 0.0
            || spectrogram.frequency_step <= 0.0
            || spectrogram.max_frequency <= 0.0
        {
            return Err(AppError::Config(
                "Spectrogram window, steps and maximum frequency must be positive".to_string(),
            ));
        }

        let pitch = &analysis.pitch;
        if pitch.floor <= 0.0 || pitch.floor >= pitch.ceiling {
            return Err(AppError::Config(format!(
                "Pitch floor ({}) must be positive and below the ceiling ({})",
                pitch.floor, pitch.ceiling
            )));
        }
        validate_smoothing("pitch", pitch.smoothing_window, pitch.smoothing_order)?;
        validate_smoothing(
            "power spectrum",
            analysis.power_spectrum.smoothing_window,
            analysis.power_spectrum.smoothing_order,
        )?;

        let formant = &analysis.formant;
        if formant.max_formants == 0 || formant.tracked == 0 || formant.tracked > formant.max_formants {
            return Err(AppError::Config(
                "Tracked formants must be between 1 and max_formants".to_string(),
            ));
        }
        if formant.max_formant_hz <= 100.0 || formant.window_length <= 0.0 {
            return Err(AppError::Config(
                "Formant ceiling must exceed 100 Hz and the window must be positive".to_string(),
            ));
        }
        if formant.min_valid_hz >= formant.max_valid_hz {
            return Err(AppError::Config("Formant valid range is empty".to_string()));
        }

        if analysis.intensity.minimum_pitch <= 0.0 {
            return Err(AppError::Config("Intensity minimum pitch must be positive".to_string()));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML (what `config.toml` would contain).
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))
    }
}

fn validate_smoothing(name: &str, window: usize, order: usize) -> AppResult<()> {
    if window % 2 == 0 || window <= order {
        return Err(AppError::Config(format!(
            "{} smoothing window ({}) must be odd and larger than its order ({})",
            name, window, order
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.capture.sample_rate, 16000);
        assert_eq!(config.capture.chunk_size, 3200);
        assert_eq!(config.capture.buffer_chunks, 5);
        assert_eq!(config.analysis.spectrogram.max_frequency, 5000.0);
        assert!((config.analysis.pitch.effective_time_step() - 0.01).abs() < 1e-12);
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.capture.channels = 2;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.analysis.pitch.floor = 700.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.analysis.power_spectrum.smoothing_window = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[capture]"));
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.capture.chunk_size, config.capture.chunk_size);
        assert_eq!(parsed.output.report_path, config.output.report_path);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let parsed: AppConfig = toml::from_str("[capture]\nchunk_size = 1600\n").unwrap();
        assert_eq!(parsed.capture.chunk_size, 1600);
        assert_eq!(parsed.capture.sample_rate, 16000);
        assert_eq!(parsed.analysis.formant.max_formants, 5);
    }
}
