use thiserror::Error;

use super::backend_error::BackendError;
use super::convolution_error::ConvolutionError;
use super::validation_error::ValidationError;

/// Errors surfaced by the reference harness and its configuration layer.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Convolution(#[from] ConvolutionError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to read configuration file '{path}': {source}")]
    ConfigIo {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file '{path}': {source}")]
    ConfigParse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Invalid value '{value}' for argument {name}")]
    InvalidArgument { name: String, value: String },
}
