//! Validated, immutable description of one convolution layer.

use log::debug;

use crate::convolution_info::{ConvolutionInfo, DataType, FusedOps};
use crate::errors::{ConvolutionError, ConvolutionResult};
use crate::tensor_layout::{PaddingStrategy, TensorLayout};

/// A convolution layer whose parameters have been checked and whose sizes have been derived.
///
/// Created once per run and never mutated. Both the reference engine and any tested
/// implementation are configured from the same descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionDescriptor {
    info: ConvolutionInfo,
    layout: TensorLayout,
}

impl ConvolutionDescriptor {
    /// Validates the raw parameters and derives the tensor layout.
    pub fn new(info: ConvolutionInfo) -> ConvolutionResult<Self> {
        if info.datatype_in != DataType::I16 || info.datatype_out != DataType::I32 {
            return Err(ConvolutionError::UnsupportedDataTypes {
                input: info.datatype_in.to_string(),
                output: info.datatype_out.to_string(),
            });
        }

        let layout = TensorLayout::plan(&info)?;
        debug!(
            "planned {:?} padding: output {}x{}, input buffer {}x{}, output buffer {}x{}",
            layout.strategy, layout.ofh, layout.ofw, layout.ifhp, layout.ifwp, layout.ofhp, layout.ofwp
        );

        Ok(Self { info, layout })
    }

    pub fn info(&self) -> &ConvolutionInfo {
        &self.info
    }

    pub fn layout(&self) -> &TensorLayout {
        &self.layout
    }

    pub fn strategy(&self) -> PaddingStrategy {
        self.layout.strategy
    }

    pub fn batch(&self) -> usize {
        self.info.batch
    }

    pub fn input_channels(&self) -> usize {
        self.info.input_channels
    }

    pub fn output_channels(&self) -> usize {
        self.info.output_channels
    }

    pub fn input_height(&self) -> usize {
        self.info.input_height
    }

    pub fn input_width(&self) -> usize {
        self.info.input_width
    }

    pub fn kernel_height(&self) -> usize {
        self.info.kernel_height
    }

    pub fn kernel_width(&self) -> usize {
        self.info.kernel_width
    }

    pub fn stride_h(&self) -> usize {
        self.info.stride_h
    }

    pub fn stride_w(&self) -> usize {
        self.info.stride_w
    }

    pub fn fused_ops(&self) -> FusedOps {
        self.info.fused_ops
    }

    pub fn datatype_in(&self) -> DataType {
        self.info.datatype_in
    }

    pub fn datatype_out(&self) -> DataType {
        self.info.datatype_out
    }

    /// Physical NCHW extent of the input (and input-gradient) buffer.
    pub fn input_extent(&self) -> [usize; 4] {
        [
            self.info.batch,
            self.info.input_channels,
            self.layout.ifhp,
            self.layout.ifwp,
        ]
    }

    /// Physical NCHW extent of the output (and output-gradient) buffer.
    pub fn output_extent(&self) -> [usize; 4] {
        [
            self.info.batch,
            self.info.output_channels,
            self.layout.ofhp,
            self.layout.ofwp,
        ]
    }

    /// KCRS extent of the filter.
    pub fn filter_extent(&self) -> [usize; 4] {
        [
            self.info.output_channels,
            self.info.input_channels,
            self.info.kernel_height,
            self.info.kernel_width,
        ]
    }

    /// Number of low-precision multiply and add operations in one pass.
    pub fn low_precision_ops(&self) -> f64 {
        self.info.batch as f64
            * self.info.input_channels as f64
            * self.info.output_channels as f64
            * self.layout.ofh as f64
            * self.layout.ofw as f64
            * (2 * self.info.kernel_height * self.info.kernel_width) as f64
    }
}
