use std::io::Write;
use std::path::Path;

use chrono::NaiveDate;

use super::{write_report, CommandError};
use crate::config::AppConfig;
use crate::pipeline::extraction::{local_today, DateExtractor, RegionMask};
use crate::verification::{assess, AgeGate, AttemptReport, FlowStage};

/// `agegate text`: read a typed date.
pub fn run_text(
    config: &AppConfig,
    text: &str,
    today: Option<NaiveDate>,
    json: bool,
    out: &mut impl Write,
) -> Result<bool, CommandError> {
    let extractor = DateExtractor::text_only(config.extractor.pattern);
    let today = today.unwrap_or_else(local_today);

    let report = assess(
        &config.gate,
        FlowStage::Manual,
        extractor.extract_from_text_on(text, today),
    );
    write_report(out, &report, &config.gate, json)?;
    Ok(report.is_granted())
}

/// `agegate image`: OCR a document photo with the configured engine.
pub fn run_image(
    config: &AppConfig,
    path: &Path,
    mask_top: Option<f32>,
    today: Option<NaiveDate>,
    json: bool,
    out: &mut impl Write,
) -> Result<bool, CommandError> {
    let mut extractor_config = config.extractor.clone();
    if let Some(top_fraction) = mask_top {
        extractor_config.preprocess = extractor_config
            .preprocess
            .with_mask(RegionMask { top_fraction });
    }

    let extractor = DateExtractor::from_backend(&config.backend, extractor_config)?;
    let report = image_report(
        &extractor,
        &config.gate,
        path,
        today.unwrap_or_else(local_today),
    )?;
    write_report(out, &report, &config.gate, json)?;
    Ok(report.is_granted())
}

pub fn image_report(
    extractor: &DateExtractor,
    gate: &AgeGate,
    path: &Path,
    today: NaiveDate,
) -> Result<AttemptReport, CommandError> {
    let bytes = read_image_file(path)?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Image loaded");
    Ok(assess(
        gate,
        FlowStage::Image,
        extractor.extract_from_image_on(&bytes, today),
    ))
}

pub(crate) fn read_image_file(path: &Path) -> Result<Vec<u8>, CommandError> {
    std::fs::read(path).map_err(|source| CommandError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}
