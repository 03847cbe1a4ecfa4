//! Naive fixed-point convolution reference and validation harness.
//!
//! This library provides a direct int16 x int16 -> int32 convolution (forward and
//! backward-data) used as ground truth for optimized convolution kernels, the
//! padding planner both sides are configured from, error-norm comparison,
//! throughput timing, and a harness that drives an implementation under test
//! through a create/bind/execute/copy protocol.

pub mod backend;
pub mod convolution_descriptor;
pub mod convolution_info;
pub mod data_generator;
pub mod error_metrics;
pub mod errors;
pub mod harness;
pub mod naive_convolution;
pub mod parallel_for;
pub mod performance_timer;
pub mod tensor;
pub mod tensor_layout;

pub use convolution_descriptor::ConvolutionDescriptor;
pub use convolution_info::{ConvolutionInfo, DataType, FusedOps};
pub use error_metrics::ErrorMetrics;
pub use naive_convolution::NaiveConvolution;
pub use tensor::{FilterTensor, Tensor4D};
pub use tensor_layout::{PaddingStrategy, TensorLayout};
