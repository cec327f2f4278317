//! Weather payload model, decoding and validation.
//!
//! This crate contains **pure domain** code (no broker, no HTTP, no IO).

pub mod error;
pub mod validation;
pub mod weather;

pub use error::PayloadError;
pub use validation::{Violation, validate};
pub use weather::{WeatherRecord, decode_record};
