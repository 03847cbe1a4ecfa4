//! Error types for descriptor validation, tensor allocation and the reference engine.

use thiserror::Error;

use super::parallel_for_error::ParallelForError;

/// Errors raised while validating a convolution layer or running the reference passes.
///
/// Everything except `Parallel` is detected before any compute starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvolutionError {
    #[error("The {dimension} must be greater than 0")]
    ZeroDimension { dimension: String },

    #[error("The {axis} stride must be greater than 0")]
    ZeroStride { axis: String },

    #[error(
        "Derived output {axis} must be at least 1: input {input} + 2 * pad {pad} - kernel {kernel} gives {derived}"
    )]
    InvalidOutputSize {
        axis: String,
        input: usize,
        pad: usize,
        kernel: usize,
        derived: i64,
    },

    #[error("Unrecognized pass selector '{selector}': expected 'A' (all), 'F' (forward) or 'B' (backward)")]
    UnknownPassSelector { selector: String },

    #[error("Unsupported data types: {input} input with {output} output")]
    UnsupportedDataTypes { input: String, output: String },

    #[error("Unsupported fused operation {fused_ops} for {input} input with {output} output")]
    UnsupportedFusedOps {
        fused_ops: String,
        input: String,
        output: String,
    },

    #[error("Failed to allocate {elements} elements of {element_size} bytes")]
    AllocationFailed {
        elements: usize,
        element_size: usize,
    },

    #[error("The {tensor} tensor has shape {actual:?} but the descriptor requires {expected:?}")]
    ShapeMismatch {
        tensor: String,
        expected: [usize; 4],
        actual: [usize; 4],
    },

    #[error("Cannot compare buffers of different lengths: reference {reference} != test {test}")]
    LengthMismatch { reference: usize, test: usize },

    #[error(transparent)]
    Parallel(#[from] ParallelForError),
}
