//! Deterministic test data for convolution runs.
//!
//! All tensors of a run are drawn from one seeded stream, in a fixed order:
//! input, filter, output gradient. The same seed and descriptor therefore give
//! bit-identical data on every run.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::convolution_descriptor::ConvolutionDescriptor;
use crate::errors::ConvolutionResult;
use crate::tensor::{FilterTensor, Tensor4D};
use crate::tensor_layout::PaddingStrategy;

/// Value distribution of generated tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPattern {
    /// Uniform in `[-3, 3]`.
    #[default]
    Signed,
    /// Uniform in `[0, 6]`.
    Positive,
    /// Every element is `1`.
    Ones,
}

pub struct DataGenerator {
    rng: StdRng,
    pattern: InitPattern,
}

impl DataGenerator {
    pub fn new(seed: u64, pattern: InitPattern) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            pattern,
        }
    }

    pub fn pattern(&self) -> InitPattern {
        self.pattern
    }

    pub fn next_value(&mut self) -> i16 {
        match self.pattern {
            InitPattern::Signed => self.rng.gen_range(-3..=3),
            InitPattern::Positive => self.rng.gen_range(0..=6),
            InitPattern::Ones => 1,
        }
    }

    /// Input activations in the physical extent of the descriptor.
    ///
    /// With materialized padding the unpadded tensor is generated first and then
    /// embedded into a zero-initialized buffer at the pad offset.
    pub fn generate_input(&mut self, descriptor: &ConvolutionDescriptor) -> ConvolutionResult<Tensor4D<i16>> {
        let layout = descriptor.layout();
        let mut input = Tensor4D::zeroed(
            descriptor.batch(),
            descriptor.input_channels(),
            descriptor.input_height(),
            descriptor.input_width(),
            0,
            0,
        )?;
        input.fill_active_with(|| self.next_value());

        match descriptor.strategy() {
            PaddingStrategy::Implicit => Ok(input),
            PaddingStrategy::Materialized => input.padded(layout.pad_h_in, layout.pad_w_in),
        }
    }

    pub fn generate_filter(&mut self, descriptor: &ConvolutionDescriptor) -> ConvolutionResult<FilterTensor<i16>> {
        let [k, c, r, s] = descriptor.filter_extent();
        let mut filter = FilterTensor::zeroed(k, c, r, s)?;
        filter.fill_with(|| self.next_value());
        Ok(filter)
    }

    /// Output gradient: the active window is filled, any materialized border stays zero.
    pub fn generate_output_grad(&mut self, descriptor: &ConvolutionDescriptor) -> ConvolutionResult<Tensor4D<i16>> {
        let layout = descriptor.layout();
        let mut output_grad = Tensor4D::zeroed(
            descriptor.batch(),
            descriptor.output_channels(),
            layout.ofh,
            layout.ofw,
            layout.pad_h_out,
            layout.pad_w_out,
        )?;
        output_grad.fill_active_with(|| self.next_value());
        Ok(output_grad)
    }
}
