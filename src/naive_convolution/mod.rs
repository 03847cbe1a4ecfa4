//! Naive direct convolution used as ground truth for optimized kernels.
//!
//! Both passes are literal loop nests over 16-bit operands accumulating into
//! 32-bit integers. Out-of-range filter taps are skipped, which realizes
//! implicit zero-padding without reading a border; with a materialized border
//! the same taps would only read zeros, so the result does not depend on the
//! padding strategy.
//!
//! The passes accumulate (`+=`) into their destination and never assign: the
//! destination must be zeroed before each fresh run.

mod backward_data;
mod forward;

use std::ops::Range;

use log::debug;

use crate::convolution_descriptor::ConvolutionDescriptor;
use crate::errors::ConvolutionResult;
use crate::parallel_for::ParallelConfig;
use crate::tensor::{FilterTensor, Tensor4D};

/// Fixed-point operand types the reference engine multiplies.
///
/// Operands are widened to `i32` before multiplying, so a product never overflows.
pub trait FixedPointOperand: Copy + Default + Send + Sync + Into<i32> {}

impl FixedPointOperand for i8 {}
impl FixedPointOperand for i16 {}

/// The loop pair a pass distributes across threads.
///
/// Every value of the axis owns one destination plane that no other value touches:
/// forward writes the output plane of `(image, output channel)`, backward-data
/// writes the input-gradient plane of `(image, input channel)`. Distributing
/// backward-data over output channels instead would let several threads
/// accumulate into the same input-gradient cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelAxis {
    ImageOutputChannel,
    ImageInputChannel,
}

impl ParallelAxis {
    /// Number of channels on the inner side of the axis.
    pub fn channels(self, descriptor: &ConvolutionDescriptor) -> usize {
        match self {
            ParallelAxis::ImageOutputChannel => descriptor.output_channels(),
            ParallelAxis::ImageInputChannel => descriptor.input_channels(),
        }
    }

    /// Splits a destination plane index into `(image, channel)`.
    #[inline]
    pub fn split(self, descriptor: &ConvolutionDescriptor, plane_index: usize) -> (usize, usize) {
        let channels = self.channels(descriptor);
        (plane_index / channels, plane_index % channels)
    }
}

/// Kernel taps `k` in `0..taps` for which `origin + k` falls inside `0..extent`.
#[inline]
pub(crate) fn tap_range(origin: isize, extent: usize, taps: usize) -> Range<usize> {
    let start = (-origin).max(0) as usize;
    let end = (extent as isize - origin).clamp(0, taps as isize) as usize;
    start.min(end)..end
}

/// Reference convolution engine bound to one layer descriptor.
///
/// The engine borrows its tensors and allocates nothing.
pub struct NaiveConvolution<'d> {
    descriptor: &'d ConvolutionDescriptor,
    parallel: ParallelConfig,
}

impl<'d> NaiveConvolution<'d> {
    pub const FORWARD_AXIS: ParallelAxis = ParallelAxis::ImageOutputChannel;
    pub const BACKWARD_DATA_AXIS: ParallelAxis = ParallelAxis::ImageInputChannel;

    pub fn new(descriptor: &'d ConvolutionDescriptor, parallel: ParallelConfig) -> Self {
        Self {
            descriptor,
            parallel,
        }
    }

    pub fn descriptor(&self) -> &ConvolutionDescriptor {
        self.descriptor
    }

    pub fn parallel(&self) -> &ParallelConfig {
        &self.parallel
    }

    /// Accumulates the forward convolution of `input` with `filter` into `output`.
    pub fn forward<I: FixedPointOperand>(
        &self,
        input: &Tensor4D<I>,
        filter: &FilterTensor<I>,
        output: &mut Tensor4D<i32>,
    ) -> ConvolutionResult<()> {
        debug!(
            "naive forward: {:?} -> {:?} on {} threads",
            self.descriptor.input_extent(),
            self.descriptor.output_extent(),
            self.parallel.get_threads()
        );
        forward::run(self, input, filter, output)
    }

    /// Accumulates the gradient with respect to the input into `input_grad`.
    pub fn backward_data<I: FixedPointOperand>(
        &self,
        output_grad: &Tensor4D<I>,
        filter: &FilterTensor<I>,
        input_grad: &mut Tensor4D<i32>,
    ) -> ConvolutionResult<()> {
        debug!(
            "naive backward-data: {:?} -> {:?} on {} threads",
            self.descriptor.output_extent(),
            self.descriptor.input_extent(),
            self.parallel.get_threads()
        );
        backward_data::run(self, output_grad, filter, input_grad)
    }
}
