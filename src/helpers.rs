//! Shared numeric helpers.
//!
//! Two concerns live here:
//!
//! - `Decimal` ↔ `f64` conversion for NUMERIC columns (the store keeps full
//!   precision; the engines work in `f64`).
//! - Presentation rounding. PMC values are carried at full `f64` precision
//!   through the recurrence and only rounded to one decimal place by
//!   `round_1dp` when a response is built.
//!
//! Non-finite inputs (NaN, ±Inf) collapse to zero with a warning.
//!
//! Client-supplied dates are parsed and range-checked here too, and date
//! offsets go through `days_before` so they never overflow.

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::errors::AppError;

/// Round to one decimal place for API responses.
pub fn round_1dp(v: f64) -> f64 {
    if !v.is_finite() {
        tracing::warn!("round_1dp received non-finite value {}, defaulting to 0", v);
        return 0.0;
    }
    (v * 10.0).round() / 10.0
}

/// Convert an f64 to Decimal preserving full precision.
pub(crate) fn f64_to_decimal(v: f64) -> Decimal {
    if !v.is_finite() {
        tracing::warn!(
            "f64_to_decimal received non-finite value {}, defaulting to 0",
            v
        );
        return Decimal::ZERO;
    }
    Decimal::from_f64(v).unwrap_or_else(|| Decimal::new(v as i64, 0))
}

/// Convert an optional f64 to Decimal, returning None if input is None.
pub(crate) fn opt_f64_to_decimal(v: Option<f64>) -> Option<Decimal> {
    v.map(f64_to_decimal)
}

/// Convert an Option<Decimal> to Option<f64>.
pub(crate) fn opt_dec_to_f64(d: Option<Decimal>) -> Option<f64> {
    d.and_then(|v| v.to_f64())
}

/// Years accepted for any date supplied by a client.
const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 9999;

/// Reject dates outside the supported range.
pub fn check_date(date: NaiveDate) -> Result<NaiveDate, AppError> {
    if (MIN_YEAR..=MAX_YEAR).contains(&date.year()) {
        Ok(date)
    } else {
        Err(AppError::BadRequest(format!(
            "Date {} out of range (years {}-{})",
            date, MIN_YEAR, MAX_YEAR
        )))
    }
}

/// Parse a `YYYY-MM-DD` date within the supported range.
pub fn parse_date(raw: &str) -> Result<NaiveDate, AppError> {
    let raw = raw.trim();
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| AppError::BadRequest(format!("Invalid date '{}': {}", raw, e)))?;
    check_date(date)
}

/// Parse an optional `YYYY-MM-DD` query parameter, defaulting to today.
pub fn parse_date_param(raw: Option<&str>) -> Result<NaiveDate, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Utc::now().date_naive()),
        Some(s) => parse_date(s),
    }
}

/// `date` minus `days`, or `BadRequest` when that leaves the calendar.
pub fn days_before(date: NaiveDate, days: i64) -> Result<NaiveDate, AppError> {
    ChronoDuration::try_days(days)
        .and_then(|d| date.checked_sub_signed(d))
        .ok_or_else(|| {
            AppError::BadRequest(format!("{} days before {} is out of range", days, date))
        })
}
