//! Test doubles shared by the unit tests of this crate.

use std::cell::{Cell, RefCell};
use std::time::Duration;

use chrono::{TimeZone, Utc};

use skyrelay_core::WeatherRecord;

use crate::delivery::{DeliveryClient, DeliveryError, DeliveryOutcome};
use crate::retry::Sleeper;

/// Replays a fixed script of outcomes, then fails with 503 forever.
pub struct ScriptedClient {
    script: RefCell<Vec<DeliveryOutcome>>,
    calls: Cell<u32>,
}

impl ScriptedClient {
    pub fn new(mut script: Vec<DeliveryOutcome>) -> Self {
        script.reverse();
        Self {
            script: RefCell::new(script),
            calls: Cell::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl DeliveryClient for ScriptedClient {
    fn deliver(&self, _record: &WeatherRecord) -> DeliveryOutcome {
        self.calls.set(self.calls.get() + 1);
        self.script
            .borrow_mut()
            .pop()
            .unwrap_or(DeliveryOutcome::RetriableFailure(DeliveryError::Status(503)))
    }
}

/// Records requested delays instead of sleeping.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.borrow_mut().push(duration);
    }
}

pub fn failed(status: u16) -> DeliveryOutcome {
    DeliveryOutcome::RetriableFailure(DeliveryError::Status(status))
}

pub fn delivered(id: &str) -> DeliveryOutcome {
    DeliveryOutcome::Delivered {
        id: Some(id.to_string()),
    }
}

pub fn valid_record() -> WeatherRecord {
    WeatherRecord {
        city: "Fortaleza".to_string(),
        country: "BR".to_string(),
        temperature: 29.3,
        feels_like: 32.0,
        humidity: 70,
        pressure: 1011,
        wind_speed: 6.2,
        wind_direction: 110,
        clouds: 20,
        visibility: 10000,
        condition: "Clouds".to_string(),
        condition_description: "few clouds".to_string(),
        icon: "02d".to_string(),
        rain_1h: None,
        snow_1h: None,
        sunrise: Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap(),
        sunset: Utc.with_ymd_and_hms(2024, 6, 1, 20, 30, 0).unwrap(),
        collected_at: Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap(),
    }
}

pub fn body_of(record: &WeatherRecord) -> Vec<u8> {
    serde_json::to_vec(record).unwrap()
}
