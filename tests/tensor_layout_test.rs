use naiveconv::errors::ConvolutionError;
use naiveconv::{ConvolutionDescriptor, ConvolutionInfo, PaddingStrategy, TensorLayout};

fn info(height: usize, width: usize, kernel: usize, stride: usize, pad: usize, padding_mode: i32) -> ConvolutionInfo {
    ConvolutionInfo {
        batch: 2,
        input_channels: 3,
        output_channels: 4,
        input_height: height,
        input_width: width,
        kernel_height: kernel,
        kernel_width: kernel,
        stride_h: stride,
        stride_w: stride,
        pad_h: pad,
        pad_w: pad,
        padding_mode,
        ..ConvolutionInfo::default()
    }
}

#[test]
fn test_default_layer_plans_same_size_output() {
    let layout = TensorLayout::plan(&ConvolutionInfo::default()).unwrap();
    assert_eq!(layout.strategy, PaddingStrategy::Implicit);
    assert_eq!((layout.ofh, layout.ofw), (18, 14));
    assert_eq!((layout.ifhp, layout.ifwp), (18, 14));
    assert_eq!((layout.ofhp, layout.ofwp), (18, 14));
}

#[test]
fn test_implicit_has_no_storage_border() {
    let layout = TensorLayout::plan(&info(7, 9, 3, 2, 1, 0)).unwrap();
    assert_eq!((layout.ofh, layout.ofw), (4, 5));
    assert_eq!((layout.pad_h_in, layout.pad_w_in, layout.pad_h_out, layout.pad_w_out), (0, 0, 0, 0));
    assert_eq!((layout.ifhp, layout.ifwp, layout.ofhp, layout.ofwp), (7, 9, 4, 5));
}

#[test]
fn test_materialized_adds_border_of_compute_pad() {
    let layout = TensorLayout::plan(&info(7, 9, 3, 2, 1, 1)).unwrap();
    assert_eq!(layout.strategy, PaddingStrategy::Materialized);
    assert_eq!((layout.ofh, layout.ofw), (4, 5));
    assert_eq!((layout.ifhp, layout.ifwp), (9, 11));
    assert_eq!((layout.ofhp, layout.ofwp), (6, 7));
}

#[test]
fn test_mode_above_one_overrides_width_pad_only() {
    let layout = TensorLayout::plan(&info(6, 6, 3, 1, 1, 3)).unwrap();
    assert_eq!((layout.pad_h, layout.pad_w), (1, 3));
    assert_eq!((layout.pad_h_in, layout.pad_w_in), (1, 3));
    assert_eq!((layout.ofh, layout.ofw), (6, 10));
    assert_eq!((layout.ifhp, layout.ifwp), (8, 12));
    assert_eq!((layout.ofhp, layout.ofwp), (8, 16));
}

#[test]
fn test_output_size_formula_over_a_grid() {
    for input in 1..10 {
        for kernel in 1..5 {
            for stride in 1..4 {
                for pad in 0..3 {
                    let span = input as i64 + 2 * pad as i64 - kernel as i64;
                    let result = TensorLayout::output_extent("height", input, pad, kernel, stride);
                    if span < 0 {
                        assert!(matches!(result, Err(ConvolutionError::InvalidOutputSize { .. })));
                    } else {
                        assert_eq!(result.unwrap() as i64, span / stride as i64 + 1);
                    }
                }
            }
        }
    }
}

#[test]
fn test_rejects_kernel_larger_than_padded_input() {
    let result = ConvolutionDescriptor::new(info(2, 2, 5, 1, 1, 0));
    assert!(matches!(
        result,
        Err(ConvolutionError::InvalidOutputSize { derived: 0, .. })
    ));
}

#[test]
fn test_rejects_zero_dimensions_and_strides() {
    let zero_batch = ConvolutionInfo {
        batch: 0,
        ..info(4, 4, 3, 1, 1, 0)
    };
    assert!(matches!(
        TensorLayout::plan(&zero_batch),
        Err(ConvolutionError::ZeroDimension { .. })
    ));

    let zero_stride = ConvolutionInfo {
        stride_w: 0,
        ..info(4, 4, 3, 1, 1, 0)
    };
    assert!(matches!(
        TensorLayout::plan(&zero_stride),
        Err(ConvolutionError::ZeroStride { .. })
    ));
}
