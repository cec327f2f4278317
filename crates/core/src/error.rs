//! Payload error model.

use thiserror::Error;

use crate::validation::Violation;

/// Why a queue body could not become a deliverable [`WeatherRecord`](crate::WeatherRecord).
///
/// Both variants are non-retriable: the same bytes will fail the same way on
/// every redelivery.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The body is not JSON, or a field has the wrong JSON type.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The body decoded but violates domain constraints.
    #[error("invalid payload: {}", join_violations(.0))]
    Invalid(Vec<Violation>),
}

impl PayloadError {
    /// The violations carried by [`PayloadError::Invalid`], empty otherwise.
    pub fn violations(&self) -> &[Violation] {
        match self {
            PayloadError::Invalid(v) => v,
            PayloadError::Malformed(_) => &[],
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
