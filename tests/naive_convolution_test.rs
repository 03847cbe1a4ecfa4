use naiveconv::data_generator::{DataGenerator, InitPattern};
use naiveconv::errors::ConvolutionError;
use naiveconv::parallel_for::ParallelConfig;
use naiveconv::{ConvolutionDescriptor, ConvolutionInfo, FilterTensor, NaiveConvolution, Tensor4D};

#[allow(clippy::too_many_arguments)]
fn layer(
    batch: usize,
    channels: usize,
    filters: usize,
    height: usize,
    width: usize,
    kernel: usize,
    stride: usize,
    pad: usize,
    padding_mode: i32,
) -> ConvolutionDescriptor {
    ConvolutionDescriptor::new(ConvolutionInfo {
        batch,
        input_channels: channels,
        output_channels: filters,
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
    })
    .expect("valid layer")
}

fn zeroed_output(d: &ConvolutionDescriptor) -> Tensor4D<i32> {
    let layout = d.layout();
    Tensor4D::zeroed(
        d.batch(),
        d.output_channels(),
        layout.ofh,
        layout.ofw,
        layout.pad_h_out,
        layout.pad_w_out,
    )
    .unwrap()
}

fn zeroed_input_grad(d: &ConvolutionDescriptor) -> Tensor4D<i32> {
    let layout = d.layout();
    Tensor4D::zeroed(
        d.batch(),
        d.input_channels(),
        d.input_height(),
        d.input_width(),
        layout.pad_h_in,
        layout.pad_w_in,
    )
    .unwrap()
}

/// Straightforward forward convolution over the active windows, used as an oracle.
fn direct_forward(d: &ConvolutionDescriptor, input: &Tensor4D<i16>, filter: &FilterTensor<i16>) -> Vec<i32> {
    let layout = d.layout();
    let mut result = Vec::new();
    for n in 0..d.batch() {
        for k in 0..d.output_channels() {
            for oj in 0..layout.ofh {
                for oi in 0..layout.ofw {
                    let mut sum = 0i32;
                    for c in 0..d.input_channels() {
                        for r in 0..d.kernel_height() {
                            for s in 0..d.kernel_width() {
                                let y = (oj * d.stride_h() + r) as isize - layout.pad_h as isize;
                                let x = (oi * d.stride_w() + s) as isize - layout.pad_w as isize;
                                if y < 0 || x < 0 || y >= d.input_height() as isize || x >= d.input_width() as isize {
                                    continue;
                                }
                                sum += input.get(n, c, y as usize, x as usize) as i32 * filter.get(k, c, r, s) as i32;
                            }
                        }
                    }
                    result.push(sum);
                }
            }
        }
    }
    result
}

fn active_values(d: &ConvolutionDescriptor, output: &Tensor4D<i32>) -> Vec<i32> {
    let layout = d.layout();
    let mut values = Vec::new();
    for n in 0..d.batch() {
        for k in 0..d.output_channels() {
            for y in 0..layout.ofh {
                for x in 0..layout.ofw {
                    values.push(output.get(n, k, y, x));
                }
            }
        }
    }
    values
}

#[test]
fn test_all_ones_counts_in_bounds_taps() {
    let d = layer(1, 1, 1, 3, 3, 3, 1, 1, 0);
    let mut input = Tensor4D::<i16>::zeroed(1, 1, 3, 3, 0, 0).unwrap();
    input.fill(1);
    let mut filter = FilterTensor::<i16>::zeroed(1, 1, 3, 3).unwrap();
    filter.fill(1);
    let mut output = zeroed_output(&d);

    NaiveConvolution::new(&d, ParallelConfig::single_threaded())
        .forward(&input, &filter, &mut output)
        .unwrap();

    assert_eq!(output.get(0, 0, 1, 1), 9);
    for (y, x) in [(0, 0), (0, 2), (2, 0), (2, 2)] {
        assert_eq!(output.get(0, 0, y, x), 4);
    }
    for (y, x) in [(0, 1), (1, 0), (1, 2), (2, 1)] {
        assert_eq!(output.get(0, 0, y, x), 6);
    }
}

#[test]
fn test_materialized_padding_matches_implicit() {
    let implicit = layer(2, 3, 4, 6, 5, 3, 1, 1, 0);
    let materialized = layer(2, 3, 4, 6, 5, 3, 1, 1, 1);

    let run = |d: &ConvolutionDescriptor| {
        let mut generator = DataGenerator::new(11, InitPattern::Signed);
        let input = generator.generate_input(d).unwrap();
        let filter = generator.generate_filter(d).unwrap();
        let mut output = zeroed_output(d);
        NaiveConvolution::new(d, ParallelConfig::new().with_threads(2))
            .forward(&input, &filter, &mut output)
            .unwrap();
        output
    };

    let implicit_output = run(&implicit);
    let materialized_output = run(&materialized);

    assert_eq!(materialized_output.extent(), [2, 4, 8, 7]);
    assert_eq!(
        active_values(&implicit, &implicit_output),
        active_values(&materialized, &materialized_output)
    );
    let border = materialized_output.index(1, 3, 0, 0);
    assert_eq!(materialized_output.as_slice()[border], 0);
}

#[test]
fn test_width_override_matches_explicit_pad() {
    let overridden = layer(1, 2, 2, 5, 5, 3, 1, 1, 2);
    let explicit = ConvolutionDescriptor::new(ConvolutionInfo {
        pad_w: 2,
        padding_mode: 0,
        ..overridden.info().clone()
    })
    .unwrap();

    assert_eq!(overridden.layout().ofw, explicit.layout().ofw);
    assert_eq!(overridden.layout().ofh, explicit.layout().ofh);

    let mut generator = DataGenerator::new(4, InitPattern::Positive);
    let input = generator.generate_input(&overridden).unwrap();
    let filter = generator.generate_filter(&overridden).unwrap();
    let mut overridden_output = zeroed_output(&overridden);
    NaiveConvolution::new(&overridden, ParallelConfig::single_threaded())
        .forward(&input, &filter, &mut overridden_output)
        .unwrap();

    let mut generator = DataGenerator::new(4, InitPattern::Positive);
    let input = generator.generate_input(&explicit).unwrap();
    let filter = generator.generate_filter(&explicit).unwrap();
    let mut explicit_output = zeroed_output(&explicit);
    NaiveConvolution::new(&explicit, ParallelConfig::single_threaded())
        .forward(&input, &filter, &mut explicit_output)
        .unwrap();

    assert_eq!(
        active_values(&overridden, &overridden_output),
        active_values(&explicit, &explicit_output)
    );
}

#[test]
fn test_one_by_one_kernel_is_channel_dot_product() {
    let d = layer(2, 3, 2, 4, 4, 1, 1, 0, 0);
    let mut generator = DataGenerator::new(9, InitPattern::Signed);
    let input = generator.generate_input(&d).unwrap();
    let filter = generator.generate_filter(&d).unwrap();
    let mut output = zeroed_output(&d);
    NaiveConvolution::new(&d, ParallelConfig::single_threaded())
        .forward(&input, &filter, &mut output)
        .unwrap();

    for n in 0..2 {
        for k in 0..2 {
            for y in 0..4 {
                for x in 0..4 {
                    let expected: i32 = (0..3)
                        .map(|c| input.get(n, c, y, x) as i32 * filter.get(k, c, 0, 0) as i32)
                        .sum();
                    assert_eq!(output.get(n, k, y, x), expected);
                }
            }
        }
    }
}

#[test]
fn test_strided_forward_matches_direct_oracle() {
    for (stride, pad, mode) in [(2, 0, 0), (2, 1, 0), (3, 1, 1), (2, 2, 1)] {
        let d = layer(1, 2, 3, 7, 6, 3, stride, pad, mode);
        let mut generator = DataGenerator::new(21, InitPattern::Signed);
        let input = generator.generate_input(&d).unwrap();
        let filter = generator.generate_filter(&d).unwrap();
        let mut output = zeroed_output(&d);
        NaiveConvolution::new(&d, ParallelConfig::new().with_threads(3))
            .forward(&input, &filter, &mut output)
            .unwrap();

        assert_eq!(active_values(&d, &output), direct_forward(&d, &input, &filter));
    }
}

#[test]
fn test_forward_accumulates_into_destination() {
    let d = layer(1, 2, 2, 4, 4, 3, 1, 1, 0);
    let mut generator = DataGenerator::new(2, InitPattern::Signed);
    let input = generator.generate_input(&d).unwrap();
    let filter = generator.generate_filter(&d).unwrap();
    let engine = NaiveConvolution::new(&d, ParallelConfig::single_threaded());

    let mut once = zeroed_output(&d);
    engine.forward(&input, &filter, &mut once).unwrap();
    let mut twice = zeroed_output(&d);
    engine.forward(&input, &filter, &mut twice).unwrap();
    engine.forward(&input, &filter, &mut twice).unwrap();

    let doubled: Vec<i32> = once.as_slice().iter().map(|v| 2 * v).collect();
    assert_eq!(twice.as_slice(), doubled.as_slice());
}

#[test]
fn test_backward_data_scatters_filter() {
    let d = layer(1, 1, 1, 2, 2, 2, 1, 0, 0);
    let mut output_grad = Tensor4D::<i16>::zeroed(1, 1, 1, 1, 0, 0).unwrap();
    output_grad.set(0, 0, 0, 0, 3);
    let filter = FilterTensor::from_vec([1, 1, 2, 2], vec![1i16, 2, 3, 4]).unwrap();
    let mut input_grad = zeroed_input_grad(&d);

    NaiveConvolution::new(&d, ParallelConfig::single_threaded())
        .backward_data(&output_grad, &filter, &mut input_grad)
        .unwrap();

    assert_eq!(input_grad.as_slice(), &[3, 6, 9, 12]);
}

#[test]
fn test_backward_data_sums_overlapping_taps() {
    // 1x3 input, 1x2 kernel, stride 1: the middle input feeds both outputs.
    let d = ConvolutionDescriptor::new(ConvolutionInfo {
        batch: 1,
        input_channels: 1,
        output_channels: 2,
        input_height: 1,
        input_width: 3,
        kernel_height: 1,
        kernel_width: 2,
        stride_h: 1,
        stride_w: 1,
        pad_h: 0,
        pad_w: 0,
        ..ConvolutionInfo::default()
    })
    .unwrap();
    let output_grad = Tensor4D::from_vec([1, 2, 1, 2], 0, 0, vec![1i16, 1, 2, 2]).unwrap();
    let filter = FilterTensor::from_vec([2, 1, 1, 2], vec![1i16, 10, 100, 1000]).unwrap();
    let mut input_grad = zeroed_input_grad(&d);

    NaiveConvolution::new(&d, ParallelConfig::single_threaded())
        .backward_data(&output_grad, &filter, &mut input_grad)
        .unwrap();

    // k=0 contributes [1, 11, 10], k=1 contributes [200, 2200, 2000].
    assert_eq!(input_grad.as_slice(), &[201, 2211, 2010]);
}

#[test]
fn test_thread_count_does_not_change_results() {
    let d = layer(2, 5, 3, 6, 7, 3, 1, 1, 1);
    let mut generator = DataGenerator::new(13, InitPattern::Signed);
    let input = generator.generate_input(&d).unwrap();
    let filter = generator.generate_filter(&d).unwrap();
    let output_grad = generator.generate_output_grad(&d).unwrap();

    let run = |threads: usize| {
        let engine = NaiveConvolution::new(&d, ParallelConfig::new().with_threads(threads));
        let mut output = zeroed_output(&d);
        engine.forward(&input, &filter, &mut output).unwrap();
        let mut input_grad = zeroed_input_grad(&d);
        engine.backward_data(&output_grad, &filter, &mut input_grad).unwrap();
        (output, input_grad)
    };

    let (single_output, single_grad) = run(1);
    for threads in [2, 3, 8, 64] {
        let (output, grad) = run(threads);
        assert_eq!(output, single_output);
        assert_eq!(grad, single_grad);
    }
}

#[test]
fn test_rejects_mismatched_shapes() {
    let d = layer(1, 2, 2, 4, 4, 3, 1, 1, 0);
    let input = Tensor4D::<i16>::zeroed(1, 2, 4, 4, 0, 0).unwrap();
    let filter = FilterTensor::<i16>::zeroed(2, 2, 3, 3).unwrap();
    let mut wrong_output = Tensor4D::<i32>::zeroed(1, 2, 3, 3, 0, 0).unwrap();
    let result = NaiveConvolution::new(&d, ParallelConfig::single_threaded()).forward(
        &input,
        &filter,
        &mut wrong_output,
    );
    assert!(matches!(result, Err(ConvolutionError::ShapeMismatch { .. })));

    let wrong_filter = FilterTensor::<i16>::zeroed(2, 1, 3, 3).unwrap();
    let mut output = zeroed_output(&d);
    let result = NaiveConvolution::new(&d, ParallelConfig::single_threaded()).forward(
        &input,
        &wrong_filter,
        &mut output,
    );
    assert!(matches!(result, Err(ConvolutionError::ShapeMismatch { .. })));
}
