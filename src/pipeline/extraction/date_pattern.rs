//! Date pattern extraction: find the first date-shaped numeric run in text
//! and decide which group is the year, the month and the day.
//!
//! Shapes are tried in a fixed priority order and the first shape that
//! matches anywhere wins. No attempt is made to rank several candidates.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::sanitize::sanitize_date_text;
use super::types::{DateCandidate, DateShape, FieldOrder};

/// Two-digit years above this map to the 1900s, the rest to the 2000s.
pub const DEFAULT_YEAR_PIVOT: u32 = 30;

/// One of `-`, `/`, `.` with optional surrounding blanks, or a run of blanks.
/// Never crosses a line break: each recognized fragment sits on its own line.
const SEP: &str = r"(?:[ \t]*[-/.][ \t]*|[ \t]+)";

/// Digit groups must not be carved out of a longer digit run.
const LEAD: &str = r"(?:^|[^0-9])";
const TRAIL: &str = r"(?:[^0-9]|$)";

static YEAR_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "{LEAD}([0-9]{{4}}){SEP}([0-9]{{1,2}}){SEP}([0-9]{{1,2}}){TRAIL}"
    ))
    .expect("year-first pattern compiles")
});

static YEAR_LAST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "{LEAD}([0-9]{{1,2}}){SEP}([0-9]{{1,2}}){SEP}([0-9]{{4}}){TRAIL}"
    ))
    .expect("year-last pattern compiles")
});

static TWO_DIGIT_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "{LEAD}([0-9]{{2}}){SEP}([0-9]{{1,2}}){SEP}([0-9]{{1,2}}){TRAIL}"
    ))
    .expect("two-digit-year pattern compiles")
});

/// How ambiguous shapes are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternConfig {
    pub field_order: FieldOrder,
    pub year_pivot: u32,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            field_order: FieldOrder::MonthFirst,
            year_pivot: DEFAULT_YEAR_PIVOT,
        }
    }
}

/// Locate the first date-shaped substring of `text`.
///
/// Returns `None` when nothing matches; absence is an ordinary outcome.
pub fn extract_date_candidate(text: &str, config: &PatternConfig) -> Option<DateCandidate> {
    let clean = sanitize_date_text(text);

    if let Some(caps) = YEAR_FIRST.captures(&clean) {
        let (year, month, day) = (group(&caps, 1)?, group(&caps, 2)?, group(&caps, 3)?);
        return Some(candidate(&clean, &caps, year as i32, month, day, DateShape::YearFirst));
    }

    if let Some(caps) = YEAR_LAST.captures(&clean) {
        let (first, second, year) = (group(&caps, 1)?, group(&caps, 2)?, group(&caps, 3)?);
        let (month, day) = match config.field_order {
            FieldOrder::MonthFirst => (first, second),
            FieldOrder::DayFirst => (second, first),
        };
        return Some(candidate(&clean, &caps, year as i32, month, day, DateShape::YearLast));
    }

    if let Some(caps) = TWO_DIGIT_YEAR.captures(&clean) {
        let (yy, month, day) = (group(&caps, 1)?, group(&caps, 2)?, group(&caps, 3)?);
        let year = resolve_two_digit_year(yy, config.year_pivot);
        return Some(candidate(&clean, &caps, year, month, day, DateShape::TwoDigitYear));
    }

    None
}

/// Pivot rule: `yy > pivot` is 19yy, otherwise 20yy.
pub fn resolve_two_digit_year(yy: u32, pivot: u32) -> i32 {
    if yy > pivot {
        1900 + yy as i32
    } else {
        2000 + yy as i32
    }
}

fn group(caps: &Captures<'_>, idx: usize) -> Option<u32> {
    caps.get(idx)?.as_str().parse().ok()
}

fn candidate(
    text: &str,
    caps: &Captures<'_>,
    year: i32,
    month: u32,
    day: u32,
    shape: DateShape,
) -> DateCandidate {
    let matched = match (caps.get(1), caps.get(3)) {
        (Some(first), Some(last)) => text[first.start()..last.end()].to_string(),
        _ => String::new(),
    };

    DateCandidate {
        year,
        month,
        day,
        shape,
        matched,
    }
}
