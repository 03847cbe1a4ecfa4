//! Output size derivation and physical buffer extents.
//!
//! The planner turns raw layer parameters into the sizes the rest of the crate
//! works with: the logical output size `ofh x ofw` and the physical extents of
//! the input and output buffers, which include a zero border when the padding
//! is materialized.

use log::debug;

use crate::convolution_info::ConvolutionInfo;
use crate::errors::{ConvolutionError, ConvolutionResult};
use crate::tensor::{padded_size, size_overflow};

/// How the compute zero-padding is realized in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingStrategy {
    /// No physical border. Taps falling outside the input are skipped.
    Implicit,
    /// Input and output buffers carry a zero border as wide as the compute pad.
    /// The border must be zero-filled once after allocation.
    Materialized,
}

impl PaddingStrategy {
    /// Maps the legacy padding-mode integer: `0` is implicit, anything else materialized.
    pub fn from_mode(padding_mode: i32) -> Self {
        if padding_mode == 0 {
            PaddingStrategy::Implicit
        } else {
            PaddingStrategy::Materialized
        }
    }
}

/// Derived sizes of one convolution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorLayout {
    pub strategy: PaddingStrategy,
    /// Compute pad after any padding-mode override.
    pub pad_h: usize,
    pub pad_w: usize,
    pub pad_h_in: usize,
    pub pad_w_in: usize,
    pub pad_h_out: usize,
    pub pad_w_out: usize,
    pub ofh: usize,
    pub ofw: usize,
    pub ifhp: usize,
    pub ifwp: usize,
    pub ofhp: usize,
    pub ofwp: usize,
}

impl TensorLayout {
    /// Plans the layout of a layer, rejecting configurations whose output would be empty.
    pub fn plan(info: &ConvolutionInfo) -> ConvolutionResult<Self> {
        Self::validate_dimensions(info)?;

        let strategy = PaddingStrategy::from_mode(info.padding_mode);
        let pad_h = info.pad_h;
        let mut pad_w = info.pad_w;

        let (pad_h_in, pad_w_in, pad_h_out, pad_w_out) = match strategy {
            PaddingStrategy::Implicit => (0, 0, 0, 0),
            PaddingStrategy::Materialized => {
                // Width-only override, height keeps the configured pad.
                if info.padding_mode > 1 {
                    pad_w = info.padding_mode as usize;
                    debug!("padding mode {} overrides pad_w to {}", info.padding_mode, pad_w);
                }
                (pad_h, pad_w, pad_h, pad_w)
            }
        };

        let ofh = Self::output_extent("height", info.input_height, pad_h, info.kernel_height, info.stride_h)?;
        let ofw = Self::output_extent("width", info.input_width, pad_w, info.kernel_width, info.stride_w)?;

        let padded = |size: usize, pad: usize| padded_size(size, pad).ok_or_else(|| size_overflow(1));

        Ok(Self {
            strategy,
            pad_h,
            pad_w,
            pad_h_in,
            pad_w_in,
            pad_h_out,
            pad_w_out,
            ofh,
            ofw,
            ifhp: padded(info.input_height, pad_h_in)?,
            ifwp: padded(info.input_width, pad_w_in)?,
            ofhp: padded(ofh, pad_h_out)?,
            ofwp: padded(ofw, pad_w_out)?,
        })
    }

    /// `floor((input + 2 * pad - kernel) / stride) + 1`, which must be at least 1.
    pub fn output_extent(
        axis: &str,
        input: usize,
        pad: usize,
        kernel: usize,
        stride: usize,
    ) -> ConvolutionResult<usize> {
        if stride == 0 {
            return Err(ConvolutionError::ZeroStride {
                axis: axis.to_string(),
            });
        }
        // Wide enough for any usize operands.
        let span = input as i128 + 2 * pad as i128 - kernel as i128;
        let derived = span.div_euclid(stride as i128) + 1;
        if derived < 1 {
            return Err(ConvolutionError::InvalidOutputSize {
                axis: axis.to_string(),
                input,
                pad,
                kernel,
                derived: derived.max(i64::MIN as i128) as i64,
            });
        }
        usize::try_from(derived).map_err(|_| size_overflow(1))
    }

    fn validate_dimensions(info: &ConvolutionInfo) -> ConvolutionResult<()> {
        let dimensions = [
            ("batch size", info.batch),
            ("number of input channels", info.input_channels),
            ("number of output channels", info.output_channels),
            ("input height", info.input_height),
            ("input width", info.input_width),
            ("kernel height", info.kernel_height),
            ("kernel width", info.kernel_width),
        ];
        for (dimension, value) in dimensions {
            if value == 0 {
                return Err(ConvolutionError::ZeroDimension {
                    dimension: dimension.to_string(),
                });
            }
        }
        if info.stride_h == 0 {
            return Err(ConvolutionError::ZeroStride {
                axis: "height".to_string(),
            });
        }
        if info.stride_w == 0 {
            return Err(ConvolutionError::ZeroStride {
                axis: "width".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_extent_floor_division() {
        assert_eq!(TensorLayout::output_extent("height", 7, 0, 3, 2).unwrap(), 3);
        assert_eq!(TensorLayout::output_extent("height", 8, 0, 3, 2).unwrap(), 3);
        assert_eq!(TensorLayout::output_extent("height", 18, 1, 3, 1).unwrap(), 18);
    }

    #[test]
    fn test_output_extent_rejects_negative_span_with_stride() {
        // -1 / 2 truncates to 0 but floors to -1; the layer must be rejected.
        let result = TensorLayout::output_extent("width", 1, 0, 2, 2);
        assert!(matches!(
            result,
            Err(ConvolutionError::InvalidOutputSize { derived: 0, .. })
        ));
    }

    #[test]
    fn test_huge_pad_does_not_wrap() {
        let result = TensorLayout::output_extent("width", usize::MAX, usize::MAX, 1, 1);
        assert!(matches!(result, Err(ConvolutionError::AllocationFailed { .. })));

        let info = ConvolutionInfo {
            pad_w: usize::MAX / 2,
            padding_mode: 1,
            ..ConvolutionInfo::default()
        };
        assert!(matches!(
            TensorLayout::plan(&info),
            Err(ConvolutionError::AllocationFailed { .. })
        ));
    }

    #[test]
    fn test_padding_strategy_from_mode() {
        assert_eq!(PaddingStrategy::from_mode(0), PaddingStrategy::Implicit);
        assert_eq!(PaddingStrategy::from_mode(1), PaddingStrategy::Materialized);
        assert_eq!(PaddingStrategy::from_mode(-1), PaddingStrategy::Materialized);
        assert_eq!(PaddingStrategy::from_mode(3), PaddingStrategy::Materialized);
    }
}
