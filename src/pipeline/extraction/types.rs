use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use super::ExtractionError;

/// Which textual layout produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateShape {
    /// `YYYY-MM-DD` and friends.
    YearFirst,
    /// `MM-DD-YYYY` or `DD-MM-YYYY`, depending on `FieldOrder`.
    YearLast,
    /// `YY-MM-DD`, century resolved by the pivot rule.
    TwoDigitYear,
}

/// Field order applied to the year-last shape, where the text alone cannot
/// tell `07-08-2001` apart as July 8th or August 7th.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrder {
    #[default]
    MonthFirst,
    DayFirst,
}

impl FieldOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MonthFirst => "mdy",
            Self::DayFirst => "dmy",
        }
    }
}

impl std::str::FromStr for FieldOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mdy" | "month_first" | "us" => Ok(Self::MonthFirst),
            "dmy" | "day_first" | "eu" => Ok(Self::DayFirst),
            other => Err(format!("unknown field order '{other}' (expected mdy or dmy)")),
        }
    }
}

/// An unvalidated year/month/day triple pulled out of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateCandidate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub shape: DateShape,
    /// The substring the pattern matched, after normalization.
    pub matched: String,
}

impl DateCandidate {
    pub fn new(year: i32, month: u32, day: u32, shape: DateShape) -> Self {
        Self {
            year,
            month,
            day,
            shape,
            matched: String::new(),
        }
    }

    pub fn ymd(&self) -> (i32, u32, u32) {
        (self.year, self.month, self.day)
    }
}

impl fmt::Display for DateCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.year, self.month, self.day)
    }
}

/// A birth date that passed calendar validation. Always `YYYY-MM-DD` on display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NormalizedBirthDate(NaiveDate);

impl NormalizedBirthDate {
    /// Only the validator in `age` builds these; everything else receives them.
    pub(crate) fn new_unchecked(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }
}

impl fmt::Display for NormalizedBirthDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl Serialize for NormalizedBirthDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Age in whole years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Age(pub u32);

impl Age {
    pub fn years(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Age {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the text behind a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingSource {
    Ocr,
    Manual,
}

/// Successful extraction: the birth date, the age it implies, and how we got there.
#[derive(Debug, Clone, Serialize)]
pub struct BirthDateReading {
    pub birth_date: NormalizedBirthDate,
    pub age: Age,
    pub candidate: DateCandidate,
    pub source: ReadingSource,
    pub raw_text: String,
}

/// Why a submission did not yield a birth date.
///
/// Every variant is an expected outcome for untrusted input; callers move on
/// to their next fallback step rather than treating these as faults.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionFailure {
    #[error("image could not be decoded: {reason}")]
    Decode { reason: String },

    #[error("text recognition failed: {reason}")]
    Recognition { reason: String },

    #[error("no date found in text")]
    NoDateFound,

    #[error("'{candidate}' is not a valid birth date: {reason}")]
    InvalidDate {
        candidate: DateCandidate,
        reason: InvalidDateReason,
    },
}

impl ExtractionFailure {
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    pub fn recognition(reason: impl Into<String>) -> Self {
        Self::Recognition {
            reason: reason.into(),
        }
    }

    /// Stable short code for logs and JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "decode_error",
            Self::Recognition { .. } => "recognition_error",
            Self::NoDateFound => "no_date_found",
            Self::InvalidDate { .. } => "invalid_date",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidDateReason {
    YearOutOfRange,
    MonthOutOfRange,
    DayOutOfRange,
    InFuture,
}

impl fmt::Display for InvalidDateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::YearOutOfRange => "year before 1000",
            Self::MonthOutOfRange => "month outside 1-12",
            Self::DayOutOfRange => "day does not exist in that month",
            Self::InFuture => "date is in the future",
        };
        f.write_str(s)
    }
}

/// Raw output of a recognition engine: one fragment per detected line or region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    pub fragments: Vec<String>,
    /// Mean engine confidence in 0.0-1.0, when the engine reports one.
    pub confidence: Option<f32>,
}

impl Recognition {
    pub fn joined(&self) -> String {
        self.fragments.join("\n")
    }
}

/// OCR engine abstraction (allows mocking for tests).
///
/// Implementations are built once and shared read-only across calls.
pub trait TextRecognizer: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Recognize text in an encoded image (PNG from the preprocessor).
    fn recognize(&self, image_bytes: &[u8]) -> Result<Recognition, ExtractionError>;
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn recognize(&self, image_bytes: &[u8]) -> Result<Recognition, ExtractionError> {
        (**self).recognize(image_bytes)
    }
}
