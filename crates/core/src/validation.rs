//! Payload validation against domain constraints.
//!
//! Validation is a pure function of the record: it never fails, never logs,
//! and reports every violated constraint at once so the caller can log the
//! full picture in one line.

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use crate::weather::WeatherRecord;

pub const MIN_TEMPERATURE_C: f64 = -100.0;
pub const MAX_TEMPERATURE_C: f64 = 60.0;
pub const MIN_HUMIDITY: i32 = 0;
pub const MAX_HUMIDITY: i32 = 100;

/// One violated constraint.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    #[error("city is required")]
    CityRequired,

    #[error("country is required")]
    CountryRequired,

    #[error("temperature out of valid range (-100 to 60)")]
    TemperatureOutOfRange,

    #[error("humidity must be between 0 and 100")]
    HumidityOutOfRange,

    #[error("collected_at is required")]
    CollectedAtRequired,
}

/// Check a record, returning violations in check order (empty = valid).
///
/// Order: city, country, temperature, humidity, collection timestamp.
pub fn validate(record: &WeatherRecord) -> Vec<Violation> {
    let mut violations = Vec::new();

    if record.city.is_empty() {
        violations.push(Violation::CityRequired);
    }
    if record.country.is_empty() {
        violations.push(Violation::CountryRequired);
    }
    // NaN fails the range check as well.
    if !(MIN_TEMPERATURE_C..=MAX_TEMPERATURE_C).contains(&record.temperature) {
        violations.push(Violation::TemperatureOutOfRange);
    }
    if !(MIN_HUMIDITY..=MAX_HUMIDITY).contains(&record.humidity) {
        violations.push(Violation::HumidityOutOfRange);
    }
    if is_zero_timestamp(&record.collected_at) {
        violations.push(Violation::CollectedAtRequired);
    }

    violations
}

/// A timestamp counts as absent when it is the decode default (Unix epoch) or
/// the `0001-01-01T00:00:00Z` zero instant some producers emit.
fn is_zero_timestamp(ts: &DateTime<Utc>) -> bool {
    *ts == DateTime::<Utc>::default() || Some(*ts) == Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).single()
}
