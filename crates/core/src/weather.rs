//! The transported entity: one weather observation for one city.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;

/// A weather observation as it travels on the queue and to the downstream API.
///
/// Field names are the wire contract; do not rename them.
///
/// Missing fields decode to their zero value (empty string, `0`, Unix epoch)
/// so the validator can report them. A field with the wrong JSON type is a
/// decode error instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherRecord {
    pub city: String,
    pub country: String,

    /// °C
    pub temperature: f64,
    /// °C
    pub feels_like: f64,
    /// %
    pub humidity: i32,
    /// hPa
    pub pressure: i32,
    /// m/s
    pub wind_speed: f64,
    /// degrees
    pub wind_direction: i32,
    /// %
    pub clouds: i32,
    /// metres
    pub visibility: i32,

    pub condition: String,
    pub condition_description: String,
    pub icon: String,

    /// mm over the last hour; `None` means "not reported", never zero.
    pub rain_1h: Option<f64>,
    /// mm over the last hour; `None` means "not reported", never zero.
    pub snow_1h: Option<f64>,

    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
}

impl WeatherRecord {
    /// Serialize to the canonical wire JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Decode one queue body into a record.
///
/// Never panics; anything that is not a JSON object of the right shape comes
/// back as [`PayloadError::Malformed`].
pub fn decode_record(body: &[u8]) -> Result<WeatherRecord, PayloadError> {
    Ok(serde_json::from_slice(body)?)
}
