use super::{FixedPointOperand, NaiveConvolution, tap_range};
use crate::errors::ConvolutionResult;
use crate::parallel_for::{WriteRegion, parallel_for_planes};
use crate::tensor::{FilterTensor, Tensor4D};

/// Forward pass: `output[n][k][oj][oi] += input[n][c][oj*u - pad_h + kj][oi*v - pad_w + ki] * filter[k][c][kj][ki]`.
pub(super) fn run<I: FixedPointOperand>(
    engine: &NaiveConvolution<'_>,
    input: &Tensor4D<I>,
    filter: &FilterTensor<I>,
    output: &mut Tensor4D<i32>,
) -> ConvolutionResult<()> {
    let descriptor = engine.descriptor();
    input.check_extent("input", descriptor.input_extent())?;
    filter.check_extent(descriptor.filter_extent())?;
    output.check_extent("output", descriptor.output_extent())?;

    let layout = *descriptor.layout();
    let (nifm, ifh, ifw) = (
        descriptor.input_channels(),
        descriptor.input_height(),
        descriptor.input_width(),
    );
    let (kh, kw) = (descriptor.kernel_height(), descriptor.kernel_width());
    let (stride_h, stride_w) = (descriptor.stride_h(), descriptor.stride_w());
    let axis = NaiveConvolution::FORWARD_AXIS;

    let input_data = input.as_slice();
    let filter_data = filter.as_slice();
    let plane_len = layout.ofhp * layout.ofwp;

    parallel_for_planes(
        output.as_mut_slice(),
        plane_len,
        engine.parallel(),
        |plane_index, plane| {
            let (img, ofm) = axis.split(descriptor, plane_index);
            let base = plane_index * plane_len;
            let mut region = WriteRegion::new(base, plane);

            for ifm in 0..nifm {
                let input_plane =
                    ((img * nifm + ifm) * layout.ifhp + layout.pad_h_in) * layout.ifwp + layout.pad_w_in;
                let filter_plane = (ofm * nifm + ifm) * kh * kw;

                for oj in 0..layout.ofh {
                    let ij = (oj * stride_h) as isize - layout.pad_h as isize;
                    let rows = tap_range(ij, ifh, kh);
                    let output_row = base + (oj + layout.pad_h_out) * layout.ofwp + layout.pad_w_out;

                    for oi in 0..layout.ofw {
                        let ii = (oi * stride_w) as isize - layout.pad_w as isize;
                        let cols = tap_range(ii, ifw, kw);
                        let slot = region.slot(output_row + oi);

                        for kj in rows.clone() {
                            let input_row = input_plane + (ij + kj as isize) as usize * layout.ifwp;
                            let filter_row = filter_plane + kj * kw;
                            for ki in cols.clone() {
                                let x = (ii + ki as isize) as usize;
                                let a: i32 = input_data[input_row + x].into();
                                let b: i32 = filter_data[filter_row + ki].into();
                                *slot = slot.wrapping_add(a * b);
                            }
                        }
                    }
                }
            }
        },
    )?;

    Ok(())
}
