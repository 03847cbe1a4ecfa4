//! Data structures for convolution layer configuration.
//!
//! `ConvolutionInfo` is the raw, serializable description of a layer as it comes
//! from a JSON file or the command line. It is validated into an immutable
//! [`ConvolutionDescriptor`](crate::convolution_descriptor::ConvolutionDescriptor)
//! before anything is allocated.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a tensor taking part in the convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    I8,
    I16,
    I32,
    F32,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size_of(self) -> usize {
        match self {
            DataType::I8 => 1,
            DataType::I16 => 2,
            DataType::I32 | DataType::F32 => 4,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::I8 => "I8",
            DataType::I16 => "I16",
            DataType::I32 => "I32",
            DataType::F32 => "F32",
        };
        write!(f, "{}", name)
    }
}

/// Post-operations an optimized implementation may fuse into the convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FusedOps {
    #[default]
    None,
    Bias,
    Relu,
    BiasRelu,
}

impl fmt::Display for FusedOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FusedOps::None => "NONE",
            FusedOps::Bias => "BIAS",
            FusedOps::Relu => "RELU",
            FusedOps::BiasRelu => "BIAS_RELU",
        };
        write!(f, "{}", name)
    }
}

fn default_datatype_in() -> DataType {
    DataType::I16
}

fn default_datatype_out() -> DataType {
    DataType::I32
}

/// Raw convolution layer parameters.
///
/// `padding_mode` selects the padding strategy: `0` keeps zero-padding implicit,
/// any other value materializes a zero border of the compute pad around the
/// input and output buffers. Values greater than `1` additionally replace
/// `pad_w` (and only `pad_w`) before the output size is derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvolutionInfo {
    /// Mini-batch size, "N".
    pub batch: usize,
    /// Number of input feature maps, "C".
    pub input_channels: usize,
    /// Number of output feature maps, "K".
    pub output_channels: usize,
    /// Input height, "H".
    pub input_height: usize,
    /// Input width, "W".
    pub input_width: usize,
    /// Filter height, "R".
    pub kernel_height: usize,
    /// Filter width, "S".
    pub kernel_width: usize,
    /// Vertical stride, "u".
    pub stride_h: usize,
    /// Horizontal stride, "v".
    pub stride_w: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    #[serde(default)]
    pub padding_mode: i32,
    #[serde(default)]
    pub fused_ops: FusedOps,
    #[serde(default = "default_datatype_in")]
    pub datatype_in: DataType,
    #[serde(default = "default_datatype_out")]
    pub datatype_out: DataType,
}

impl Default for ConvolutionInfo {
    /// An inner layer of OverFeat: 32 images of 256x18x14, 512 filters of 3x3.
    fn default() -> Self {
        Self {
            batch: 32,
            input_channels: 256,
            output_channels: 512,
            input_height: 18,
            input_width: 14,
            kernel_height: 3,
            kernel_width: 3,
            stride_h: 1,
            stride_w: 1,
            pad_h: 1,
            pad_w: 1,
            padding_mode: 0,
            fused_ops: FusedOps::None,
            datatype_in: DataType::I16,
            datatype_out: DataType::I32,
        }
    }
}
