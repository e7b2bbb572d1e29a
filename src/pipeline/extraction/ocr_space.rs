//! Cloud OCR through the OCR.space HTTP API.
//!
//! The image goes up as a base64 data URI in a form POST; the JSON reply
//! carries one `ParsedText` per page plus an error flag.

use std::fmt;
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::ocr::split_fragments;
use super::types::{Recognition, TextRecognizer};
use super::ExtractionError;

pub const DEFAULT_OCRSPACE_ENDPOINT: &str = "https://api.ocr.space/parse/image";

/// Engine 2 handles digits and punctuation better than engine 1.
const DEFAULT_OCRSPACE_ENGINE: u8 = 2;

const DEFAULT_OCRSPACE_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrSpaceSettings {
    pub api_key: String,
    pub endpoint: String,
    pub language: String,
    pub engine: u8,
    pub timeout_secs: u64,
}

impl OcrSpaceSettings {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            endpoint: DEFAULT_OCRSPACE_ENDPOINT.to_string(),
            language: "eng".to_string(),
            engine: DEFAULT_OCRSPACE_ENGINE,
            timeout_secs: DEFAULT_OCRSPACE_TIMEOUT_SECS,
        }
    }
}

// The key must never end up in logs.
impl fmt::Debug for OcrSpaceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrSpaceSettings")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("language", &self.language)
            .field("engine", &self.engine)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// OCR.space HTTP client.
pub struct OcrSpaceRecognizer {
    settings: OcrSpaceSettings,
    client: reqwest::blocking::Client,
}

impl OcrSpaceRecognizer {
    pub fn new(settings: OcrSpaceSettings) -> Result<Self, ExtractionError> {
        if settings.api_key.trim().is_empty() {
            return Err(ExtractionError::OcrConfig("OCR.space API key is empty".into()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ExtractionError::OcrInit(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { settings, client })
    }
}

/// Response body from POST /parse/image
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrSpaceResponse {
    #[serde(default)]
    parsed_results: Vec<ParsedResult>,
    #[serde(default)]
    is_errored_on_processing: bool,
    /// A string or an array of strings, depending on the failure.
    #[serde(default)]
    error_message: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    #[serde(default)]
    parsed_text: String,
}

impl TextRecognizer for OcrSpaceRecognizer {
    fn name(&self) -> &str {
        "ocrspace"
    }

    fn recognize(&self, image_bytes: &[u8]) -> Result<Recognition, ExtractionError> {
        let data_uri = png_data_uri(image_bytes);
        let engine = self.settings.engine.to_string();
        let form = [
            ("apikey", self.settings.api_key.as_str()),
            ("language", self.settings.language.as_str()),
            ("OCREngine", engine.as_str()),
            ("scale", "true"),
            ("base64Image", data_uri.as_str()),
        ];

        let response = self
            .client
            .post(&self.settings.endpoint)
            .form(&form)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    ExtractionError::Http(format!("Cannot reach {}", self.settings.endpoint))
                } else if e.is_timeout() {
                    ExtractionError::Http(format!(
                        "Request timed out after {}s",
                        self.settings.timeout_secs
                    ))
                } else {
                    ExtractionError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExtractionError::Http(format!(
                "OCR.space returned {}: {body}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .map_err(|e| ExtractionError::Http(e.to_string()))?;

        let recognition = parse_ocr_space_response(&body)?;
        tracing::debug!(
            fragments = recognition.fragments.len(),
            "OCR.space recognition complete"
        );
        Ok(recognition)
    }
}

pub fn png_data_uri(image_bytes: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(image_bytes)
    )
}

/// Parse an OCR.space JSON reply into fragments.
pub fn parse_ocr_space_response(body: &str) -> Result<Recognition, ExtractionError> {
    let parsed: OcrSpaceResponse = serde_json::from_str(body)
        .map_err(|e| ExtractionError::OcrProcessing(format!("Unreadable OCR.space response: {e}")))?;

    if parsed.is_errored_on_processing {
        return Err(ExtractionError::OcrProcessing(render_error_message(
            parsed.error_message.as_ref(),
        )));
    }

    let fragments = parsed
        .parsed_results
        .iter()
        .flat_map(|r| split_fragments(&r.parsed_text))
        .collect();

    Ok(Recognition {
        fragments,
        confidence: None,
    })
}

fn render_error_message(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect::<Vec<_>>()
            .join("; "),
        Some(other) if !other.is_null() => other.to_string(),
        _ => "OCR.space reported an unspecified error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_successful_response() {
        let body = r#"{
            "ParsedResults": [
                {"TextOverlay": {"Lines": []}, "FileParseExitCode": 1,
                 "ParsedText": "DATE OF BIRTH\r\n2001/07/15\r\n", "ErrorMessage": ""}
            ],
            "OCRExitCode": 1,
            "IsErroredOnProcessing": false,
            "ProcessingTimeInMilliseconds": "312"
        }"#;
        let rec = parse_ocr_space_response(body).unwrap();
        assert_eq!(rec.fragments, vec!["DATE OF BIRTH", "2001/07/15"]);
        assert_eq!(rec.confidence, None);
    }

    #[test]
    fn concatenates_pages_in_order() {
        let body = r#"{"ParsedResults": [{"ParsedText": "a"}, {"ParsedText": "b\nc"}],
                       "IsErroredOnProcessing": false}"#;
        let rec = parse_ocr_space_response(body).unwrap();
        assert_eq!(rec.joined(), "a\nb\nc");
    }

    #[test]
    fn missing_results_is_empty_recognition() {
        let rec = parse_ocr_space_response(r#"{"IsErroredOnProcessing": false}"#).unwrap();
        assert!(rec.fragments.is_empty());
    }

    #[test]
    fn errored_response_with_message_array() {
        let body = r#"{"IsErroredOnProcessing": true,
                       "ErrorMessage": ["File failed validation", "Invalid image"]}"#;
        let err = parse_ocr_space_response(body).unwrap_err();
        match err {
            ExtractionError::OcrProcessing(m) => {
                assert_eq!(m, "File failed validation; Invalid image")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn errored_response_with_string_or_null_message() {
        let err = parse_ocr_space_response(
            r#"{"IsErroredOnProcessing": true, "ErrorMessage": "Invalid API key"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Invalid API key"));

        let err = parse_ocr_space_response(
            r#"{"IsErroredOnProcessing": true, "ErrorMessage": null}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unspecified"));
    }

    #[test]
    fn malformed_json_is_processing_error() {
        let err = parse_ocr_space_response("<html>502</html>").unwrap_err();
        assert!(matches!(err, ExtractionError::OcrProcessing(_)));
    }

    #[test]
    fn data_uri_is_base64_png() {
        assert_eq!(png_data_uri(b"hi"), "data:image/png;base64,aGk=");
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let err = OcrSpaceRecognizer::new(OcrSpaceSettings::new("  ")).err().unwrap();
        assert!(matches!(err, ExtractionError::OcrConfig(_)));
    }

    #[test]
    fn debug_output_hides_api_key() {
        let rendered = format!("{:?}", OcrSpaceSettings::new("secret-key"));
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn unreachable_endpoint_is_http_error() {
        let settings = OcrSpaceSettings {
            endpoint: "http://127.0.0.1:9/parse/image".into(),
            timeout_secs: 2,
            ..OcrSpaceSettings::new("k")
        };
        let recognizer = OcrSpaceRecognizer::new(settings).unwrap();
        let err = recognizer.recognize(b"png").unwrap_err();
        assert!(matches!(err, ExtractionError::Http(_)));
    }
}
