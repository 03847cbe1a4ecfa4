//! Error types for the convolution reference library.
//!
//! Each concern gets its own error enum instead of a generic wrapper like
//! `anyhow` or `Box<dyn Error>`; the harness error collects them all.

mod backend_error;
mod convolution_error;
mod harness_error;
mod parallel_for_error;
mod validation_error;

pub use backend_error::{BackendError, BackendResult};
pub use convolution_error::ConvolutionError;
pub use harness_error::HarnessError;
pub use parallel_for_error::{ParallelForError, ParallelForResult};
pub use validation_error::ValidationError;

/// Result type alias for descriptor, tensor and reference-engine operations.
pub type ConvolutionResult<T> = std::result::Result<T, ConvolutionError>;

/// Result type alias for validation operations.
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Result type alias for harness operations.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;
