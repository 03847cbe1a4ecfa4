//! Error types for validation operations.

use thiserror::Error;

/// Errors that can occur while checking a tested implementation against the reference.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("FAILED with an error of {error_percent}%! (tolerance {tolerance}, scale {scale})")]
    ToleranceExceeded {
        error_percent: f64,
        tolerance: f64,
        scale: f64,
    },

    #[error("Invalid validation setting {name}: '{value}'")]
    InvalidSetting { name: String, value: String },
}
