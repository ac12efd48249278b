//! # Voice Feature Analyzer - Main Application Entry Point
//!
//! Command-line driver for the speech analysis pipeline.
//!
//! ## Commands:
//! - `analyze <file.wav>...`: Analyze recordings in parallel, print the results as JSON
//!   and write the text report of the first file
//! - `live [--stdin] [--ticks N]`: Record from the microphone (or raw PCM on stdin),
//!   refreshing the live view on every tick; on Ctrl+C or after N ticks the capture is
//!   saved and analyzed
//! - `config`: Print the effective configuration as TOML
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **error**: Error kinds shared by every module
//! - **audio**: Capture, streaming window, recording session, WAV I/O
//! - **analysis**: Spectrogram, pitch, formants, intensity, power spectrum
//! - **report**: Tab-separated text report

// Module declarations
mod analysis;    // Acoustic analysis (analysis/ directory)
mod audio;       // Audio capture and I/O (audio/ directory)
mod config;      // Configuration management (config.rs)
mod error;       // Error handling types (error.rs)
mod report;      // Text report (report.rs)

use analysis::pipeline::{Analyzer, FeatureSet};
use anyhow::{bail, Context, Result};
use audio::capture::{stdin_opener, InputOpener};
use audio::session::{ControlStatus, RecordingSession};
use audio::waveform::Waveform;
use clap::{Parser, Subcommand};
use config::AppConfig;
use report::ReportSerializer;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by SIGINT/SIGTERM; the live loop checks it once per tick.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// Live capture gives up after this many failed reads in a row (e.g. stdin closed)
const MAX_CONSECUTIVE_READ_FAILURES: u32 = 5;

/// Speech acoustic analysis from the command line.
#[derive(Parser, Debug)]
#[command(name = "voice-feature-analyzer", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Analyze recordings and print the features as JSON
    Analyze {
        /// WAV files to analyze
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Record, then save and analyze the capture
    Live {
        /// Read raw 16-bit little-endian PCM from stdin instead of the microphone
        #[arg(long)]
        stdin: bool,
        /// Stop after this many ticks instead of waiting for Ctrl+C
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Print the effective configuration as TOML
    Config,
}

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Parses the command line** (clap prints usage and exits on bad input)
/// 2. **Sets up logging** and loads `.env`
/// 3. **Loads configuration** from files and environment variables
/// 4. **Dispatches** to the requested command
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-feature-analyzer v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Analyze { files } => run_analyze(config, &files).await,
        Command::Live { stdin, ticks } => run_live(config, stdin, ticks).await,
        Command::Config => {
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Analyze every file given on the command line.
async fn run_analyze(config: AppConfig, files: &[PathBuf]) -> Result<()> {
    let waveforms = files
        .iter()
        .map(|file| {
            Waveform::read_wav(file).with_context(|| format!("Failed to load {}", file.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let analyzer = Analyzer::new(config.analysis.clone(), config.capture.sample_rate);
    let results = tokio::task::spawn_blocking(move || analyzer.analyze_many(&waveforms)).await?;

    if let Some(report) = results.first().and_then(|r| r.report_text.as_deref()) {
        ReportSerializer::write(&config.output.report_path, report)?;
    }

    for (file, features) in files.iter().zip(&results) {
        info!(file = %file.display(), status = ?features.status, mean_pitch = ?features.mean_pitch, "Analysis finished");
    }
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

/// Record until interrupted (or for a fixed number of ticks), then save and analyze.
async fn run_live(config: AppConfig, use_stdin: bool, max_ticks: Option<u64>) -> Result<()> {
    let opener = open_input(use_stdin)?;
    let analyzer = Analyzer::new(config.analysis.clone(), config.capture.sample_rate);
    let mut session = RecordingSession::new(config.capture.clone(), opener);

    let started = session.start();
    info!(
        control = started.as_str(),
        status = session.status().as_str(),
        session_id = ?session.session_id(),
        "Capture control"
    );
    if started == ControlStatus::DeviceError {
        bail!("could not open the input device");
    }

    setup_signal_handlers();

    let mut interval = tokio::time::interval(Duration::from_millis(config.capture.tick_interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut ticks = 0u64;
    let mut consecutive_failures = 0u32;
    loop {
        interval.tick().await;
        if SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
            info!("Shutdown signal received, stopping capture...");
            break;
        }
        if !session.is_recording() {
            break;
        }

        // Device reads block; keep them off the scheduler's other work
        let outcome = tokio::task::block_in_place(|| session.tick(&analyzer));
        ticks += 1;

        if outcome.fresh {
            consecutive_failures = 0;
            if let Some(view) = &outcome.view {
                let peak = view
                    .oscillogram
                    .amplitude
                    .iter()
                    .map(|s| s.unsigned_abs())
                    .max()
                    .unwrap_or(0);
                debug!(
                    tick = ticks,
                    window_chunks = session.streaming().len(),
                    window_samples = view.oscillogram.amplitude.len(),
                    captured_samples = session.accumulated_samples(),
                    peak,
                    spectrogram_frames = view.spectrogram.as_ref().map_or(0, |s| s.time.len()),
                    "Live view updated"
                );
            }
        } else {
            consecutive_failures += 1;
            if consecutive_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                warn!(failures = consecutive_failures, "Input keeps failing, stopping capture");
                break;
            }
        }

        if max_ticks.is_some_and(|max| ticks >= max) {
            break;
        }
    }

    let stopped = session.stop();
    info!(
        control = stopped.as_str(),
        status = session.status().as_str(),
        ticks,
        "Capture control"
    );

    let recording_path = config.output.recording_path.clone();
    let summary = session.save(&recording_path)?;
    info!(
        samples = summary.samples,
        duration_seconds = summary.duration_seconds,
        read_errors = summary.read_errors,
        "Capture saved"
    );

    let features = analyze_saved(analyzer, recording_path).await?;
    if let Some(report) = &features.report_text {
        ReportSerializer::write(&config.output.report_path, report)?;
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "session": summary,
            "features": features,
        }))?
    );
    Ok(())
}

async fn analyze_saved(analyzer: Analyzer, path: PathBuf) -> Result<FeatureSet> {
    let features = tokio::task::spawn_blocking(move || analyzer.analyze_saved(None, &path)).await?;
    Ok(features)
}

/// Pick the capture backend.
fn open_input(use_stdin: bool) -> Result<Box<dyn InputOpener>> {
    if use_stdin {
        return Ok(Box::new(stdin_opener()));
    }

    #[cfg(feature = "microphone")]
    {
        Ok(Box::new(audio::microphone::microphone_opener()))
    }

    #[cfg(not(feature = "microphone"))]
    {
        bail!("built without the `microphone` feature; pipe raw PCM and use --stdin")
    }
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "info", "voice_feature_analyzer=trace")
/// - If not set, defaults to "voice_feature_analyzer=debug"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_feature_analyzer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// SIGTERM or SIGINT (Ctrl+C) sets the global shutdown flag; the capture loop then
/// saves what it has recorded before exiting.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_live_flags() {
        let cli = Cli::try_parse_from(["voice-feature-analyzer", "live", "--stdin", "--ticks", "3"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Live {
                stdin: true,
                ticks: Some(3)
            }
        );

        let cli = Cli::try_parse_from(["voice-feature-analyzer", "live"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Live {
                stdin: false,
                ticks: None
            }
        );
    }

    #[test]
    fn test_bad_live_options_are_rejected() {
        assert!(Cli::try_parse_from(["voice-feature-analyzer", "live", "--ticks"]).is_err());
        assert!(Cli::try_parse_from(["voice-feature-analyzer", "live", "--ticks", "many"]).is_err());
        assert!(Cli::try_parse_from(["voice-feature-analyzer", "live", "--loud"]).is_err());
    }

    #[test]
    fn test_analyze_needs_files() {
        assert!(Cli::try_parse_from(["voice-feature-analyzer", "analyze"]).is_err());

        let cli = Cli::try_parse_from(["voice-feature-analyzer", "analyze", "a.wav", "b.wav"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Analyze {
                files: vec![PathBuf::from("a.wav"), PathBuf::from("b.wav")]
            }
        );
    }

    #[test]
    fn test_missing_or_unknown_command() {
        assert!(Cli::try_parse_from(["voice-feature-analyzer"]).is_err());
        assert!(Cli::try_parse_from(["voice-feature-analyzer", "record"]).is_err());
        let cli = Cli::try_parse_from(["voice-feature-analyzer", "config"]).unwrap();
        assert_eq!(cli.command, Command::Config);
    }
}
