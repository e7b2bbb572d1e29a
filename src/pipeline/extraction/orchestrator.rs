use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use super::age::evaluate_candidate;
use super::date_pattern::{extract_date_candidate, PatternConfig};
use super::ocr::{build_recognizer, OcrBackend, UnavailableRecognizer};
use super::preprocess::{DocumentPreprocessor, ImagePreprocessor, PreprocessConfig};
use super::types::{BirthDateReading, ExtractionFailure, ReadingSource, TextRecognizer};
use super::ExtractionError;

/// Everything the extractor needs besides its engines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub pattern: PatternConfig,
    pub preprocess: PreprocessConfig,
}

/// Reads a birth date from an image or from typed text.
/// Engines are injected as trait objects, built once and reused for every call.
pub struct DateExtractor {
    preprocessor: Box<dyn ImagePreprocessor>,
    recognizer: Box<dyn TextRecognizer>,
    pattern: PatternConfig,
}

impl DateExtractor {
    pub fn new(
        preprocessor: Box<dyn ImagePreprocessor>,
        recognizer: Box<dyn TextRecognizer>,
        pattern: PatternConfig,
    ) -> Self {
        Self {
            preprocessor,
            recognizer,
            pattern,
        }
    }

    /// Production wiring: document preprocessing plus the configured engine.
    pub fn from_backend(
        backend: &OcrBackend,
        config: ExtractorConfig,
    ) -> Result<Self, ExtractionError> {
        let recognizer = build_recognizer(backend)?;
        Ok(Self::new(
            Box::new(DocumentPreprocessor::new(config.preprocess)),
            recognizer,
            config.pattern,
        ))
    }

    /// Typed entry only; image submissions fail with a recognition error.
    pub fn text_only(pattern: PatternConfig) -> Self {
        Self::new(
            Box::new(DocumentPreprocessor::default()),
            Box::new(UnavailableRecognizer::new("no OCR engine configured")),
            pattern,
        )
    }

    pub fn pattern_config(&self) -> &PatternConfig {
        &self.pattern
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    /// Image path against the local calendar date.
    pub fn extract_from_image(&self, image_bytes: &[u8]) -> Result<BirthDateReading, ExtractionFailure> {
        self.extract_from_image_on(image_bytes, local_today())
    }

    /// Preprocess, recognize, extract, validate.
    pub fn extract_from_image_on(
        &self,
        image_bytes: &[u8],
        today: NaiveDate,
    ) -> Result<BirthDateReading, ExtractionFailure> {
        let span = tracing::info_span!(
            "extract_from_image",
            bytes = image_bytes.len(),
            engine = self.recognizer.name()
        );
        let _guard = span.enter();

        let result = self.read_image(image_bytes, today);
        log_outcome(&result);
        result
    }

    /// Manual path against the local calendar date.
    pub fn extract_from_text(&self, text: &str) -> Result<BirthDateReading, ExtractionFailure> {
        self.extract_from_text_on(text, local_today())
    }

    /// Extract and validate only; no image stages run.
    pub fn extract_from_text_on(
        &self,
        text: &str,
        today: NaiveDate,
    ) -> Result<BirthDateReading, ExtractionFailure> {
        let span = tracing::info_span!("extract_from_text", chars = text.chars().count());
        let _guard = span.enter();

        let result = self.read_date(text.to_string(), ReadingSource::Manual, today);
        log_outcome(&result);
        result
    }

    fn read_image(
        &self,
        image_bytes: &[u8],
        today: NaiveDate,
    ) -> Result<BirthDateReading, ExtractionFailure> {
        let prepared = self
            .preprocessor
            .preprocess(image_bytes)
            .map_err(|e| ExtractionFailure::decode(e.to_string()))?;

        if !prepared.warnings.is_empty() {
            tracing::warn!(warnings = ?prepared.warnings, "Image quality issues detected");
        }

        let recognition = self
            .recognizer
            .recognize(&prepared.png_bytes)
            .map_err(|e| ExtractionFailure::recognition(e.to_string()))?;

        tracing::debug!(
            fragments = recognition.fragments.len(),
            confidence = ?recognition.confidence,
            "Recognition complete"
        );

        self.read_date(recognition.joined(), ReadingSource::Ocr, today)
    }

    fn read_date(
        &self,
        raw_text: String,
        source: ReadingSource,
        today: NaiveDate,
    ) -> Result<BirthDateReading, ExtractionFailure> {
        let candidate =
            extract_date_candidate(&raw_text, &self.pattern).ok_or(ExtractionFailure::NoDateFound)?;
        let (age, birth_date) = evaluate_candidate(&candidate, today)?;

        Ok(BirthDateReading {
            birth_date,
            age,
            candidate,
            source,
            raw_text,
        })
    }
}

/// Today's date on the host's local calendar.
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

fn log_outcome(result: &Result<BirthDateReading, ExtractionFailure>) {
    match result {
        Ok(reading) => tracing::info!(
            age = reading.age.years(),
            shape = ?reading.candidate.shape,
            source = ?reading.source,
            "Birth date extracted"
        ),
        Err(failure) => tracing::info!(
            failure = failure.code(),
            reason = %failure,
            "No usable birth date"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};

    use super::*;
    use crate::pipeline::extraction::ocr::MockRecognizer;
    use crate::pipeline::extraction::preprocess::MockImagePreprocessor;
    use crate::pipeline::extraction::types::{Age, FieldOrder, InvalidDateReason};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn extractor_with(text: &str) -> (DateExtractor, Arc<MockRecognizer>) {
        let mock = Arc::new(MockRecognizer::new(text));
        let extractor = DateExtractor::new(
            Box::new(MockImagePreprocessor::new()),
            Box::new(mock.clone()),
            PatternConfig::default(),
        );
        (extractor, mock)
    }

    fn card_png() -> Vec<u8> {
        let img = GrayImage::from_fn(60, 20, |x, _| Luma([if x % 7 < 2 { 20 } else { 230 }]));
        let mut cursor = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut cursor, ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    #[test]
    fn image_path_reads_date_and_age() {
        let (extractor, mock) = extractor_with("出生日期 2001/07/15 其他文字");
        let reading = extractor.extract_from_image_on(b"img", today()).unwrap();
        assert_eq!(reading.birth_date.to_string(), "2001-07-15");
        assert_eq!(reading.age, Age(22));
        assert_eq!(reading.source, ReadingSource::Ocr);
        assert_eq!(reading.raw_text, "出生日期 2001/07/15 其他文字");
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn image_path_with_real_preprocessing() {
        let mock = Arc::new(MockRecognizer::new("1990-12-31"));
        let extractor = DateExtractor::new(
            Box::new(DocumentPreprocessor::default()),
            Box::new(mock.clone()),
            PatternConfig::default(),
        );
        let reading = extractor.extract_from_image_on(&card_png(), today()).unwrap();
        assert_eq!(reading.age, Age(33));
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn undecodable_image_is_decode_failure_and_skips_ocr() {
        let mock = Arc::new(MockRecognizer::new("2001-07-15"));
        let extractor = DateExtractor::new(
            Box::new(DocumentPreprocessor::default()),
            Box::new(mock.clone()),
            PatternConfig::default(),
        );
        let err = extractor.extract_from_image_on(&[0u8; 256], today()).unwrap_err();
        assert!(matches!(err, ExtractionFailure::Decode { .. }));
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn preprocessor_failure_is_decode_failure() {
        let extractor = DateExtractor::new(
            Box::new(MockImagePreprocessor::failing()),
            Box::new(MockRecognizer::new("2001-07-15")),
            PatternConfig::default(),
        );
        let err = extractor.extract_from_image_on(b"x", today()).unwrap_err();
        assert_eq!(err.code(), "decode_error");
    }

    #[test]
    fn engine_failure_is_recognition_failure() {
        let extractor = DateExtractor::new(
            Box::new(MockImagePreprocessor::new()),
            Box::new(MockRecognizer::failing("tessdata missing")),
            PatternConfig::default(),
        );
        let err = extractor.extract_from_image_on(b"x", today()).unwrap_err();
        match err {
            ExtractionFailure::Recognition { reason } => assert!(reason.contains("tessdata missing")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_recognition_is_no_date_found() {
        let (extractor, _) = extractor_with("");
        let err = extractor.extract_from_image_on(b"x", today()).unwrap_err();
        assert_eq!(err, ExtractionFailure::NoDateFound);
    }

    #[test]
    fn impossible_date_is_invalid() {
        let (extractor, _) = extractor_with("2023/02/29");
        let err = extractor.extract_from_image_on(b"x", today()).unwrap_err();
        assert!(matches!(
            err,
            ExtractionFailure::InvalidDate {
                reason: InvalidDateReason::DayOutOfRange,
                ..
            }
        ));
    }

    #[test]
    fn future_date_is_invalid() {
        let (extractor, _) = extractor_with("2030-01-01");
        let err = extractor.extract_from_image_on(b"x", today()).unwrap_err();
        assert!(matches!(
            err,
            ExtractionFailure::InvalidDate {
                reason: InvalidDateReason::InFuture,
                ..
            }
        ));
    }

    #[test]
    fn text_path_never_touches_engines() {
        let (extractor, mock) = extractor_with("1999-01-01");
        let reading = extractor.extract_from_text_on("07-15-2001", today()).unwrap();
        assert_eq!(reading.birth_date.to_string(), "2001-07-15");
        assert_eq!(reading.source, ReadingSource::Manual);
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn text_path_honours_day_first() {
        let extractor = DateExtractor::new(
            Box::new(MockImagePreprocessor::new()),
            Box::new(MockRecognizer::empty()),
            PatternConfig {
                field_order: FieldOrder::DayFirst,
                ..PatternConfig::default()
            },
        );
        let reading = extractor.extract_from_text_on("15.07.2001", today()).unwrap();
        assert_eq!(reading.birth_date.to_string(), "2001-07-15");
    }

    #[test]
    fn text_path_defaults_to_local_today() {
        let (extractor, _) = extractor_with("");
        let reading = extractor.extract_from_text("1950-01-01").unwrap();
        assert!(reading.age.years() >= 74);
    }

    #[test]
    fn text_without_date_is_no_date_found() {
        let (extractor, _) = extractor_with("");
        let err = extractor
            .extract_from_text_on("I was born in spring", today())
            .unwrap_err();
        assert_eq!(err, ExtractionFailure::NoDateFound);
    }

    #[test]
    fn text_only_extractor_reads_text_and_rejects_images() {
        let extractor = DateExtractor::text_only(PatternConfig::default());
        assert!(extractor.extract_from_text_on("2001-07-15", today()).is_ok());
        let err = extractor.extract_from_image_on(&card_png(), today()).unwrap_err();
        assert_eq!(err.code(), "recognition_error");
    }

    #[test]
    fn from_backend_reports_engine_name() {
        let backend = OcrBackend::OcrSpace(
            crate::pipeline::extraction::ocr_space::OcrSpaceSettings::new("key"),
        );
        let extractor = DateExtractor::from_backend(&backend, ExtractorConfig::default()).unwrap();
        assert_eq!(extractor.recognizer_name(), "ocrspace");
        assert_eq!(extractor.pattern_config(), &PatternConfig::default());
    }
}
