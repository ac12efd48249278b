//! # Analysis Report
//!
//! Tab-separated plain-text report of the pitch, intensity and formant contours.
//!
//! ## Layout:
//! - **Pitch section**: one row per frame; unvoiced frames print `0.00`
//! - **Intensity section**: one row per frame in dB
//! - **Formant sections**: formants 1..3, each followed by a blank line; rows carry the
//!   unfiltered estimate, so out-of-range values still appear here while the charts
//!   mask them. Frames with no estimate print `nan`.
//!
//! Times use 4 decimals, values 2.

use crate::analysis::formant::FormantTrack;
use crate::analysis::pitch::PitchContour;
use crate::analysis::TimeSeries;
use crate::error::AppResult;
use std::path::Path;
use tracing::info;

pub struct ReportSerializer;

impl ReportSerializer {
    pub fn render(
        pitch: &PitchContour,
        intensity: &TimeSeries<f64>,
        formants: &[FormantTrack],
    ) -> String {
        let mut out = String::new();

        out.push_str("Pitch Data (Frequency vs Time):\n");
        out.push_str("Time [s]\tFrequency [Hz]\n");
        for (time, value) in pitch.series().iter() {
            out.push_str(&row(time, value.unwrap_or(0.0)));
        }

        out.push_str("\nIntensity Data (dB vs Time):\n");
        out.push_str("Time [s]\tIntensity [dB]\n");
        for (time, value) in intensity.iter() {
            out.push_str(&row(time, *value));
        }

        out.push_str("\nFormants Data:\n");
        for track in formants {
            out.push_str(&format!("Formant {}:\n", track.number()));
            out.push_str("Time [s]\tFormant Frequency [Hz]\n");
            for (time, value) in track.raw().iter() {
                // No estimate prints as nan
                out.push_str(&row(time, value.unwrap_or(f64::NAN)));
            }
            out.push('\n');
        }

        out
    }

    /// Write an already rendered report to disk.
    pub fn write(path: &Path, report: &str) -> AppResult<()> {
        std::fs::write(path, report)?;
        info!(path = %path.display(), bytes = report.len(), "Report written");
        Ok(())
    }
}

/// One `time<TAB>value` line.
fn row(time: f64, value: f64) -> String {
    if value.is_nan() {
        format!("{:.4}\tnan\n", time)
    } else {
        format!("{:.4}\t{:.2}\n", time, value)
    }
}
