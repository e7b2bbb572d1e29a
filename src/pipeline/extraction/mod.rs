pub mod types;
pub mod sanitize;
pub mod preprocess;
pub mod ocr;
pub mod ocr_space;
pub mod date_pattern;
pub mod age;
pub mod orchestrator;

pub use types::*;
pub use sanitize::*;
pub use preprocess::*;
pub use ocr::*;
pub use ocr_space::*;
pub use date_pattern::*;
pub use age::*;
pub use orchestrator::*;

use std::path::PathBuf;

use thiserror::Error;

/// Infrastructure errors: engine construction, I/O and transport problems.
///
/// Expected outcomes of untrusted input live in `ExtractionFailure` instead.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR engine initialization failed: {0}")]
    OcrInit(String),

    #[error("OCR engine configuration error: {0}")]
    OcrConfig(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Tessdata not found at: {0}")]
    TessdataNotFound(PathBuf),

    #[error("OCR backend '{0}' is not available in this build")]
    BackendUnavailable(String),

    #[error("HTTP error: {0}")]
    Http(String),
}
