//! Delivery client: one HTTP attempt per call, no retries.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use skyrelay_core::WeatherRecord;

use crate::config::Settings;

/// Why one delivery attempt failed. Every variant is retriable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("failed to serialize record: {0}")]
    Serialize(String),

    /// Connection refused, DNS failure, timeout, broken body stream...
    #[error("request failed: {0}")]
    Transport(String),

    #[error("api returned status {0}")]
    Status(u16),
}

/// Result of exactly one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The API accepted the record (status < 400). `id` is the downstream
    /// identifier when the acknowledgment body could be decoded.
    Delivered { id: Option<String> },

    /// The attempt failed; the caller decides whether to try again.
    RetriableFailure(DeliveryError),
}

/// Acknowledgment body returned by the downstream API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiAcknowledgement {
    pub success: bool,
    pub message: Option<String>,
    pub id: Option<String>,
}

/// Performs one delivery attempt of a validated record.
pub trait DeliveryClient {
    fn deliver(&self, record: &WeatherRecord) -> DeliveryOutcome;
}

impl<C> DeliveryClient for &C
where
    C: DeliveryClient + ?Sized,
{
    fn deliver(&self, record: &WeatherRecord) -> DeliveryOutcome {
        (**self).deliver(record)
    }
}

/// Blocking HTTP client for `POST <base_url>/api/weather/logs`.
///
/// Must be built and used outside of an async runtime context (it is driven
/// from the worker thread).
#[derive(Debug, Clone)]
pub struct HttpDeliveryClient {
    http: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpDeliveryClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, reqwest::Error> {
        Self::new(settings.weather_logs_url(), settings.http_timeout)
    }
}

impl DeliveryClient for HttpDeliveryClient {
    fn deliver(&self, record: &WeatherRecord) -> DeliveryOutcome {
        let body = match record.to_json() {
            Ok(body) => body,
            Err(e) => return DeliveryOutcome::RetriableFailure(DeliveryError::Serialize(e.to_string())),
        };

        info!(url = %self.endpoint, city = %record.city, "sending_to_api");

        let response = match self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
        {
            Ok(response) => response,
            Err(e) => {
                return DeliveryOutcome::RetriableFailure(DeliveryError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        if status.as_u16() >= 400 {
            return DeliveryOutcome::RetriableFailure(DeliveryError::Status(status.as_u16()));
        }

        // The status code alone decides success; the body is informational.
        let ack = match response.json::<ApiAcknowledgement>() {
            Ok(ack) => ack,
            Err(e) => {
                warn!(status = status.as_u16(), error = %e, "could_not_decode_response");
                ApiAcknowledgement::default()
            }
        };

        info!(
            status = status.as_u16(),
            success = ack.success,
            id = ack.id.as_deref().unwrap_or(""),
            "api_response"
        );

        DeliveryOutcome::Delivered { id: ack.id }
    }
}
