//! # Error Handling
//!
//! This module defines the error taxonomy shared by capture, decoding and analysis.
//! Every failure the core can produce is one of the variants below, and each variant
//! maps to a specific recovery policy in the caller.
//!
//! ## Error Categories and Recovery:
//! - **Device**: The input device could not be opened. Recording stays off.
//! - **StreamRead**: One chunk read failed. The tick is skipped, the previous view kept.
//! - **Decode**: Uploaded bytes are not audio we understand. Analysis reports failure.
//! - **InsufficientData**: One feature cannot be computed. Only that feature is omitted.
//! - **Config / Io / Serialization**: Ambient failures surfaced to the binary.
//!
//! ## Rust Concepts:
//! - **thiserror**: Derives `Display` and `std::error::Error` from the `#[error]` attributes
//! - **#[from]**: Generates `From` impls so `?` converts foreign errors automatically

use thiserror::Error;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::insufficient("pitch", "no voiced frames"));
/// ```
#[derive(Debug, Error)]
pub enum AppError {
    /// The input device could not be opened or configured
    #[error("Device error: {0}")]
    Device(String),

    /// A single chunk read failed or came back short
    #[error("Stream read error: {0}")]
    StreamRead(String),

    /// Input bytes could not be decoded as audio
    #[error("Decode error: {0}")]
    Decode(String),

    /// A feature cannot be computed from the available samples
    #[error("Insufficient data for {feature}: {reason}")]
    InsufficientData {
        feature: &'static str,
        reason: String,
    },

    /// Configuration file or environment variable problems
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Shorthand for [`AppError::InsufficientData`].
    pub fn insufficient(feature: &'static str, reason: impl Into<String>) -> Self {
        AppError::InsufficientData {
            feature,
            reason: reason.into(),
        }
    }

    /// Short machine-readable name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Device(_) => "device_error",
            AppError::StreamRead(_) => "stream_read_error",
            AppError::Decode(_) => "decode_error",
            AppError::InsufficientData { .. } => "insufficient_data",
            AppError::Config(_) => "config_error",
            AppError::Io(_) => "io_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }
}

/// Automatic conversion from configuration errors to AppError.
///
/// ## When this happens:
/// - config.toml file has invalid syntax
/// - An `APP_*` environment variable cannot be parsed into its field type
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
///
/// ## Rust Concepts:
/// - **type alias**: Creates a new name for an existing type
/// - **Generic type**: `T` can be any type (Waveform, PitchContour, etc.)
pub type AppResult<T> = Result<T, AppError>;
