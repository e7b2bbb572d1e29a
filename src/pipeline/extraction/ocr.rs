use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use super::ocr_space::{OcrSpaceRecognizer, OcrSpaceSettings};
use super::types::{Recognition, TextRecognizer};
use super::ExtractionError;

/// Characters a printed date is made of.
pub const DATE_CHAR_ALLOWLIST: &str = "0123456789/-.";

/// Tesseract page segmentation mode 7: treat the image as a single text line.
pub const SINGLE_LINE_PSM: u32 = 7;

/// Bundled Tesseract OCR engine.
/// Only available when compiled with the `ocr` feature flag.
#[cfg(feature = "ocr")]
pub struct TesseractRecognizer {
    tessdata_dir: Option<PathBuf>,
    lang: String,
    page_seg_mode: u32,
    allowlist: String,
}

#[cfg(feature = "ocr")]
impl TesseractRecognizer {
    /// `tessdata_dir = None` lets Tesseract use its compiled-in search path.
    /// When a directory is given, every `+`-joined language must have its
    /// traineddata there.
    pub fn new(tessdata_dir: Option<&std::path::Path>, lang: &str) -> Result<Self, ExtractionError> {
        if let Some(dir) = tessdata_dir {
            for code in lang.split('+').filter(|c| !c.is_empty()) {
                if !dir.join(format!("{code}.traineddata")).exists() {
                    return Err(ExtractionError::TessdataNotFound(dir.to_path_buf()));
                }
            }
        }

        Ok(Self {
            tessdata_dir: tessdata_dir.map(|d| d.to_path_buf()),
            lang: lang.to_string(),
            page_seg_mode: SINGLE_LINE_PSM,
            allowlist: DATE_CHAR_ALLOWLIST.to_string(),
        })
    }

    pub fn with_page_seg_mode(mut self, psm: u32) -> Self {
        self.page_seg_mode = psm;
        self
    }

    /// Empty string lifts the restriction.
    pub fn with_allowlist(mut self, chars: &str) -> Self {
        self.allowlist = chars.to_string();
        self
    }
}

#[cfg(feature = "ocr")]
impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image_bytes: &[u8]) -> Result<Recognition, ExtractionError> {
        let datapath = match &self.tessdata_dir {
            Some(dir) => Some(
                dir.to_str()
                    .ok_or_else(|| ExtractionError::OcrInit("Invalid tessdata path".into()))?,
            ),
            None => None,
        };

        let tess = tesseract::Tesseract::new(datapath, Some(&self.lang))
            .map_err(|e| ExtractionError::OcrInit(format!("{e:?}")))?
            .set_variable("tessedit_pageseg_mode", &self.page_seg_mode.to_string())
            .map_err(|e| ExtractionError::OcrConfig(format!("Failed to set page mode: {e:?}")))?;

        let tess = if self.allowlist.is_empty() {
            tess
        } else {
            tess.set_variable("tessedit_char_whitelist", &self.allowlist)
                .map_err(|e| ExtractionError::OcrConfig(format!("Failed to set allowlist: {e:?}")))?
        };

        let mut tess = tess
            .set_image_from_mem(image_bytes)
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;

        let text = tess
            .get_text()
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;

        // Negative mean confidence means the engine found nothing to score.
        let mean = tess.mean_text_conf();
        let confidence = (mean >= 0).then(|| mean as f32 / 100.0);

        Ok(Recognition {
            fragments: split_fragments(&text),
            confidence,
        })
    }
}

/// One fragment per non-blank line.
pub fn split_fragments(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

// ──────────────────────────────────────────────
// Backend selection
// ──────────────────────────────────────────────

/// Which recognition engine to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum OcrBackend {
    Tesseract {
        tessdata_dir: Option<PathBuf>,
        lang: String,
    },
    OcrSpace(OcrSpaceSettings),
}

impl OcrBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tesseract { .. } => "tesseract",
            Self::OcrSpace(_) => "ocrspace",
        }
    }
}

impl Default for OcrBackend {
    fn default() -> Self {
        Self::Tesseract {
            tessdata_dir: None,
            lang: "eng".into(),
        }
    }
}

/// Construct the configured engine once; the caller owns it for the
/// lifetime of the extractor.
pub fn build_recognizer(backend: &OcrBackend) -> Result<Box<dyn TextRecognizer>, ExtractionError> {
    tracing::info!(engine = backend.name(), "Building text recognizer");
    match backend {
        OcrBackend::Tesseract { tessdata_dir, lang } => {
            build_tesseract(tessdata_dir.as_deref(), lang)
        }
        OcrBackend::OcrSpace(settings) => {
            Ok(Box::new(OcrSpaceRecognizer::new(settings.clone())?))
        }
    }
}

#[cfg(feature = "ocr")]
fn build_tesseract(
    tessdata_dir: Option<&std::path::Path>,
    lang: &str,
) -> Result<Box<dyn TextRecognizer>, ExtractionError> {
    Ok(Box::new(TesseractRecognizer::new(tessdata_dir, lang)?))
}

#[cfg(not(feature = "ocr"))]
fn build_tesseract(
    _tessdata_dir: Option<&std::path::Path>,
    _lang: &str,
) -> Result<Box<dyn TextRecognizer>, ExtractionError> {
    Err(ExtractionError::BackendUnavailable(
        "tesseract (rebuild with --features ocr)".into(),
    ))
}

/// Stand-in when no engine could be built. Every call fails, so image
/// submissions end as recognition failures and callers fall back to text.
pub struct UnavailableRecognizer {
    reason: String,
}

impl UnavailableRecognizer {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

impl TextRecognizer for UnavailableRecognizer {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn recognize(&self, _image_bytes: &[u8]) -> Result<Recognition, ExtractionError> {
        Err(ExtractionError::BackendUnavailable(self.reason.clone()))
    }
}

// ──────────────────────────────────────────────
// Mock
// ──────────────────────────────────────────────

/// Mock recognizer for unit testing without an engine.
pub struct MockRecognizer {
    fragments: Vec<String>,
    confidence: Option<f32>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl MockRecognizer {
    /// Recognizes `text`, one fragment per line.
    pub fn new(text: &str) -> Self {
        Self {
            fragments: split_fragments(text),
            confidence: Some(0.9),
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Recognizes nothing at all.
    pub fn empty() -> Self {
        Self::new("")
    }

    /// Every call fails with `OcrProcessing(message)`.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::empty()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextRecognizer for MockRecognizer {
    fn name(&self) -> &str {
        "mock"
    }

    fn recognize(&self, _image_bytes: &[u8]) -> Result<Recognition, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(ExtractionError::OcrProcessing(message.clone()));
        }
        Ok(Recognition {
            fragments: self.fragments.clone(),
            confidence: self.confidence,
        })
    }
}
