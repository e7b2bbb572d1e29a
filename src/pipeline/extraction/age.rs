use chrono::{Datelike, NaiveDate};

use super::types::{Age, DateCandidate, ExtractionFailure, InvalidDateReason, NormalizedBirthDate};

/// Earliest year we accept; anything shorter than four digits is OCR noise.
pub const MIN_BIRTH_YEAR: i32 = 1000;

/// Turn a candidate into a real calendar date no later than `today`.
pub fn validate_candidate(
    candidate: &DateCandidate,
    today: NaiveDate,
) -> Result<NormalizedBirthDate, ExtractionFailure> {
    let reject = |reason| ExtractionFailure::InvalidDate {
        candidate: candidate.clone(),
        reason,
    };

    if candidate.year < MIN_BIRTH_YEAR {
        return Err(reject(InvalidDateReason::YearOutOfRange));
    }
    if !(1..=12).contains(&candidate.month) {
        return Err(reject(InvalidDateReason::MonthOutOfRange));
    }

    let date = NaiveDate::from_ymd_opt(candidate.year, candidate.month, candidate.day)
        .ok_or_else(|| reject(InvalidDateReason::DayOutOfRange))?;

    if date > today {
        return Err(reject(InvalidDateReason::InFuture));
    }

    Ok(NormalizedBirthDate::new_unchecked(date))
}

/// Whole years between `birth` and `today` on the civil calendar.
///
/// A birthday not yet reached this year takes one off the year difference.
/// Feb 29 birthdays therefore tick over on Mar 1 in non-leap years.
pub fn age_on(birth: NormalizedBirthDate, today: NaiveDate) -> Age {
    let birthday_pending = (today.month(), today.day()) < (birth.month(), birth.day());
    let years = today.year() - birth.year() - i32::from(birthday_pending);
    Age(years.max(0) as u32)
}

/// Validate a candidate and compute the age it implies on `today`.
pub fn evaluate_candidate(
    candidate: &DateCandidate,
    today: NaiveDate,
) -> Result<(Age, NormalizedBirthDate), ExtractionFailure> {
    let birth = validate_candidate(candidate, today)?;
    Ok((age_on(birth, today), birth))
}
