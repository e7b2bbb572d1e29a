//! CLI command handlers. Each returns whether the age check passed.

pub mod extract;
pub mod verify;

use std::io::Write;
use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::config::ConfigError;
use crate::pipeline::extraction::ExtractionError;
use crate::verification::{AgeGate, AttemptReport, AttemptResult, FlowEvent, FlowStage, Verdict};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Cannot read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output error: {0}")]
    Output(#[from] std::io::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// `--today` argument parser.
pub fn parse_today(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

/// `--mask-top` argument parser.
pub fn parse_fraction(s: &str) -> Result<f32, String> {
    let value: f32 = s.trim().parse().map_err(|e| format!("not a number: {e}"))?;
    if (0.0..1.0).contains(&value) {
        Ok(value)
    } else {
        Err("must be at least 0.0 and below 1.0".into())
    }
}

pub fn describe_attempt(report: &AttemptReport, gate: &AgeGate) -> String {
    let source = match report.stage {
        FlowStage::Image => "Image",
        FlowStage::Manual => "Entry",
    };
    match &report.result {
        AttemptResult::Read {
            birth_date,
            age,
            verdict: Verdict::Granted,
        } => format!("{source}: born {birth_date}, age {age}. Verified."),
        AttemptResult::Read {
            birth_date,
            verdict: Verdict::Underage,
            ..
        } => format!(
            "{source}: born {birth_date}, under {}.",
            gate.minimum_age
        ),
        AttemptResult::Read {
            birth_date,
            age,
            verdict: Verdict::Implausible,
        } => format!("{source}: born {birth_date} gives age {age}, which is not plausible."),
        AttemptResult::Failed { failure } => format!("{source}: {failure}."),
    }
}

/// Terminal line for one flow event.
pub fn describe_event(event: &FlowEvent, gate: &AgeGate) -> String {
    match event {
        FlowEvent::AwaitingImage { .. } => "Checking document image...".to_string(),
        FlowEvent::Processing => "Image received, recognizing text...".to_string(),
        FlowEvent::Attempt(report) => describe_attempt(report, gate),
        FlowEvent::AwaitingManualEntry { timeout_secs } => format!(
            "Type your date of birth (YYYY/MM/DD or YYYY-MM-DD). You have {timeout_secs} seconds."
        ),
        FlowEvent::TimedOut {
            stage: FlowStage::Image,
        } => "Timed out waiting for the image.".to_string(),
        FlowEvent::TimedOut {
            stage: FlowStage::Manual,
        } => "Timed out waiting for typed entry.".to_string(),
        FlowEvent::Abandoned { .. } => "Input closed.".to_string(),
        FlowEvent::Finished { granted: true } => "Verification passed.".to_string(),
        FlowEvent::Finished { granted: false } => "Verification failed.".to_string(),
    }
}

fn write_report(
    out: &mut impl Write,
    report: &AttemptReport,
    gate: &AgeGate,
    json: bool,
) -> Result<(), CommandError> {
    if json {
        serde_json::to_writer_pretty(&mut *out, report)?;
        writeln!(out)?;
    } else {
        writeln!(out, "{}", describe_attempt(report, gate))?;
    }
    Ok(())
}
