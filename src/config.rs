use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::extraction::{
    ExtractorConfig, FieldOrder, OcrBackend, OcrSpaceSettings, PatternConfig, PreprocessConfig,
    RegionMask, DEFAULT_OCRSPACE_ENDPOINT, DEFAULT_YEAR_PIVOT,
};
use crate::verification::{
    AgeGate, DEFAULT_MANUAL_TIMEOUT, DEFAULT_MAXIMUM_AGE, DEFAULT_MINIMUM_AGE,
    DEFAULT_UPLOAD_TIMEOUT,
};

/// Application-level constants
pub const APP_NAME: &str = "agegate";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "warn,agegate=info"
}

/// Usual tessdata install locations, checked when `TESSDATA_PREFIX` is unset.
const TESSDATA_CANDIDATES: &[&str] = &[
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
    "/opt/homebrew/share/tessdata",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {var}: '{value}' ({reason})")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &str, value: &str, reason: impl Display) -> Self {
        Self::InvalidValue {
            var: var.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub gate: AgeGate,
    pub extractor: ExtractorConfig,
    pub backend: OcrBackend,
    pub upload_timeout: Duration,
    pub manual_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gate: AgeGate::default(),
            extractor: ExtractorConfig::default(),
            backend: OcrBackend::default(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            manual_timeout: DEFAULT_MANUAL_TIMEOUT,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let minimum_age = parse_var(&var, "AGEGATE_MIN_AGE")?.unwrap_or(DEFAULT_MINIMUM_AGE);
        let maximum_age = parse_var(&var, "AGEGATE_MAX_AGE")?.unwrap_or(DEFAULT_MAXIMUM_AGE);
        if minimum_age > maximum_age {
            return Err(ConfigError::invalid(
                "AGEGATE_MAX_AGE",
                &maximum_age.to_string(),
                format!("below AGEGATE_MIN_AGE ({minimum_age})"),
            ));
        }

        let field_order: FieldOrder =
            parse_var(&var, "AGEGATE_FIELD_ORDER")?.unwrap_or_default();

        let year_pivot: u32 = parse_var(&var, "AGEGATE_YEAR_PIVOT")?.unwrap_or(DEFAULT_YEAR_PIVOT);
        if year_pivot > 99 {
            return Err(ConfigError::invalid(
                "AGEGATE_YEAR_PIVOT",
                &year_pivot.to_string(),
                "must be 0-99",
            ));
        }

        let mut preprocess = PreprocessConfig::default();
        if let Some(top_fraction) = parse_var::<f32>(&var, "AGEGATE_MASK_TOP")? {
            if !(0.0..1.0).contains(&top_fraction) {
                return Err(ConfigError::invalid(
                    "AGEGATE_MASK_TOP",
                    &top_fraction.to_string(),
                    "must be at least 0.0 and below 1.0",
                ));
            }
            preprocess = preprocess.with_mask(RegionMask { top_fraction });
        }

        let backend = backend_from(&var)?;

        let upload_timeout = parse_timeout(&var, "AGEGATE_UPLOAD_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_UPLOAD_TIMEOUT);
        let manual_timeout = parse_timeout(&var, "AGEGATE_MANUAL_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_MANUAL_TIMEOUT);

        Ok(Self {
            gate: AgeGate::new(minimum_age, maximum_age),
            extractor: ExtractorConfig {
                pattern: PatternConfig {
                    field_order,
                    year_pivot,
                },
                preprocess,
            },
            backend,
            upload_timeout,
            manual_timeout,
        })
    }
}

fn backend_from(var: &impl Fn(&str) -> Option<String>) -> Result<OcrBackend, ConfigError> {
    let lang = var("AGEGATE_OCR_LANG").unwrap_or_else(|| "eng".to_string());
    let engine = var("AGEGATE_OCR_ENGINE").unwrap_or_else(|| "tesseract".to_string());

    match engine.to_ascii_lowercase().as_str() {
        "tesseract" => Ok(OcrBackend::Tesseract {
            tessdata_dir: var("TESSDATA_PREFIX")
                .map(PathBuf::from)
                .or_else(find_system_tessdata),
            lang,
        }),
        "ocrspace" | "ocr_space" | "ocr.space" => {
            let api_key = var("OCRSPACE_API_KEY")
                .ok_or_else(|| ConfigError::MissingEnvVar("OCRSPACE_API_KEY".to_string()))?;
            Ok(OcrBackend::OcrSpace(OcrSpaceSettings {
                endpoint: var("OCRSPACE_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_OCRSPACE_ENDPOINT.to_string()),
                language: lang,
                ..OcrSpaceSettings::new(&api_key)
            }))
        }
        _ => Err(ConfigError::invalid(
            "AGEGATE_OCR_ENGINE",
            &engine,
            "expected tesseract or ocrspace",
        )),
    }
}

fn parse_var<T>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    var(name)
        .map(|raw| raw.parse::<T>().map_err(|e| ConfigError::invalid(name, &raw, e)))
        .transpose()
}

fn parse_timeout(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<Duration>, ConfigError> {
    match parse_var::<u64>(var, name)? {
        Some(0) => Err(ConfigError::invalid(name, "0", "must be positive")),
        other => Ok(other.map(Duration::from_secs)),
    }
}

/// First well-known directory holding English traineddata.
pub fn find_system_tessdata() -> Option<PathBuf> {
    TESSDATA_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.join("eng.traineddata").exists())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.gate, AgeGate::default());
        assert_eq!(config.extractor.pattern, PatternConfig::default());
        assert_eq!(config.upload_timeout, Duration::from_secs(600));
        assert_eq!(config.manual_timeout, Duration::from_secs(300));
        assert_eq!(config.backend.name(), "tesseract");
        assert!(config.extractor.preprocess.mask.is_none());
    }

    #[test]
    fn reads_every_setting() {
        let config = config_from(&[
            ("AGEGATE_MIN_AGE", "21"),
            ("AGEGATE_MAX_AGE", "110"),
            ("AGEGATE_FIELD_ORDER", "dmy"),
            ("AGEGATE_YEAR_PIVOT", "40"),
            ("AGEGATE_MASK_TOP", "0.4"),
            ("AGEGATE_UPLOAD_TIMEOUT_SECS", "60"),
            ("AGEGATE_MANUAL_TIMEOUT_SECS", "30"),
            ("AGEGATE_OCR_LANG", "chi_tra"),
            ("TESSDATA_PREFIX", "/data/tess"),
        ])
        .unwrap();

        assert_eq!(config.gate, AgeGate::new(21, 110));
        assert_eq!(config.extractor.pattern.field_order, FieldOrder::DayFirst);
        assert_eq!(config.extractor.pattern.year_pivot, 40);
        assert_eq!(
            config.extractor.preprocess.mask,
            Some(RegionMask { top_fraction: 0.4 })
        );
        assert_eq!(config.upload_timeout, Duration::from_secs(60));
        assert_eq!(config.manual_timeout, Duration::from_secs(30));
        assert_eq!(
            config.backend,
            OcrBackend::Tesseract {
                tessdata_dir: Some(PathBuf::from("/data/tess")),
                lang: "chi_tra".into(),
            }
        );
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = config_from(&[("AGEGATE_MIN_AGE", "  ")]).unwrap();
        assert_eq!(config.gate.minimum_age, 18);
    }

    #[test]
    fn ocrspace_needs_api_key() {
        let err = config_from(&[("AGEGATE_OCR_ENGINE", "ocrspace")]).unwrap_err();
        assert_eq!(err, ConfigError::MissingEnvVar("OCRSPACE_API_KEY".into()));
    }

    #[test]
    fn ocrspace_settings_from_env() {
        let config = config_from(&[
            ("AGEGATE_OCR_ENGINE", "OCRSpace"),
            ("OCRSPACE_API_KEY", "k-1"),
            ("OCRSPACE_ENDPOINT", "http://localhost:8080/parse"),
        ])
        .unwrap();
        match config.backend {
            OcrBackend::OcrSpace(settings) => {
                assert_eq!(settings.api_key, "k-1");
                assert_eq!(settings.endpoint, "http://localhost:8080/parse");
                assert_eq!(settings.language, "eng");
            }
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_engine() {
        let err = config_from(&[("AGEGATE_OCR_ENGINE", "paddle")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref var, .. } if var == "AGEGATE_OCR_ENGINE"));
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(config_from(&[("AGEGATE_MIN_AGE", "eighteen")]).is_err());
        assert!(config_from(&[("AGEGATE_YEAR_PIVOT", "100")]).is_err());
        assert!(config_from(&[("AGEGATE_MASK_TOP", "1.5")]).is_err());
        assert!(config_from(&[("AGEGATE_UPLOAD_TIMEOUT_SECS", "0")]).is_err());
        assert!(config_from(&[("AGEGATE_FIELD_ORDER", "ymd")]).is_err());
    }

    #[test]
    fn rejects_min_above_max() {
        let err = config_from(&[("AGEGATE_MIN_AGE", "50"), ("AGEGATE_MAX_AGE", "40")]).unwrap_err();
        assert!(err.to_string().contains("AGEGATE_MIN_AGE"));
    }

    #[test]
    fn app_name_is_agegate() {
        assert_eq!(APP_NAME, "agegate");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }
}
