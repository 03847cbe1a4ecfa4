//! Error types for the optimized-convolution binding protocol.

use thiserror::Error;

use super::convolution_error::ConvolutionError;
use crate::backend::{ComputeKind, ExternalLayout, TensorRole};

/// Errors reported by a convolution backend while creating, binding or executing a layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Unsupported layer configuration: {message}")]
    UnsupportedConfiguration { message: String },

    #[error("Thread count must be at least 1, got {count}")]
    InvalidThreadCount { count: usize },

    #[error("Thread index {index} is out of range for {threads} threads")]
    ThreadIndexOutOfRange { index: usize, threads: usize },

    #[error("No tensor is bound to the {role:?} role")]
    TensorNotBound { role: TensorRole },

    #[error("A tensor is already bound to the {role:?} role")]
    TensorAlreadyBound { role: TensorRole },

    #[error("Tensor linked as {expected:?} cannot be bound to the {actual:?} role")]
    RoleMismatch {
        expected: TensorRole,
        actual: TensorRole,
    },

    #[error("The {role:?} tensor cannot be converted from or to the {layout:?} layout")]
    LayoutMismatch {
        role: TensorRole,
        layout: ExternalLayout,
    },

    #[error("The {role:?} tensor stores {expected} elements, the external buffer holds {actual}")]
    DataTypeMismatch {
        role: TensorRole,
        expected: String,
        actual: String,
    },

    #[error("External buffer for the {role:?} tensor has {actual} elements, expected {expected}")]
    BufferSizeMismatch {
        role: TensorRole,
        expected: usize,
        actual: usize,
    },

    #[error("Compute kind {kind:?} is not supported by this backend")]
    UnsupportedComputeKind { kind: ComputeKind },

    #[error("No scratch is bound for {kind:?}")]
    ScratchNotBound { kind: ComputeKind },

    #[error("Scratch for {kind:?} holds {provided} bytes, {required} bytes are required")]
    ScratchTooSmall {
        kind: ComputeKind,
        required: usize,
        provided: usize,
    },

    #[error("A worker panicked during collective execution")]
    WorkerPanicked,

    #[error(transparent)]
    Convolution(#[from] ConvolutionError),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;
