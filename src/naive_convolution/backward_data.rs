use super::{FixedPointOperand, NaiveConvolution, tap_range};
use crate::errors::ConvolutionResult;
use crate::parallel_for::{WriteRegion, parallel_for_planes};
use crate::tensor::{FilterTensor, Tensor4D};

/// Backward-data pass, the adjoint of the forward pass:
/// `input_grad[n][c][oj*u - pad_h + kj][oi*v - pad_w + ki] += output_grad[n][k][oj][oi] * filter[k][c][kj][ki]`.
///
/// Several `(oj, oi, kj, ki)` combinations hit the same input cell, and so do
/// all output channels; the loop is therefore distributed over `(image, input channel)`
/// with output channels reduced sequentially inside each unit.
pub(super) fn run<I: FixedPointOperand>(
    engine: &NaiveConvolution<'_>,
    output_grad: &Tensor4D<I>,
    filter: &FilterTensor<I>,
    input_grad: &mut Tensor4D<i32>,
) -> ConvolutionResult<()> {
    let descriptor = engine.descriptor();
    output_grad.check_extent("output gradient", descriptor.output_extent())?;
    filter.check_extent(descriptor.filter_extent())?;
    input_grad.check_extent("input gradient", descriptor.input_extent())?;

    let layout = *descriptor.layout();
    let (nifm, nofm, ifh, ifw) = (
        descriptor.input_channels(),
        descriptor.output_channels(),
        descriptor.input_height(),
        descriptor.input_width(),
    );
    let (kh, kw) = (descriptor.kernel_height(), descriptor.kernel_width());
    let (stride_h, stride_w) = (descriptor.stride_h(), descriptor.stride_w());
    let axis = NaiveConvolution::BACKWARD_DATA_AXIS;

    let grad_data = output_grad.as_slice();
    let filter_data = filter.as_slice();
    let plane_len = layout.ifhp * layout.ifwp;

    parallel_for_planes(
        input_grad.as_mut_slice(),
        plane_len,
        engine.parallel(),
        |plane_index, plane| {
            let (img, ifm) = axis.split(descriptor, plane_index);
            let base = plane_index * plane_len;
            let window = base + layout.pad_h_in * layout.ifwp + layout.pad_w_in;
            let mut region = WriteRegion::new(base, plane);

            for ofm in 0..nofm {
                let grad_plane =
                    ((img * nofm + ofm) * layout.ofhp + layout.pad_h_out) * layout.ofwp + layout.pad_w_out;
                let filter_plane = (ofm * nifm + ifm) * kh * kw;

                for oj in 0..layout.ofh {
                    let ij = (oj * stride_h) as isize - layout.pad_h as isize;
                    let rows = tap_range(ij, ifh, kh);
                    let grad_row = grad_plane + oj * layout.ofwp;

                    for oi in 0..layout.ofw {
                        let ii = (oi * stride_w) as isize - layout.pad_w as isize;
                        let cols = tap_range(ii, ifw, kw);
                        let g: i32 = grad_data[grad_row + oi].into();

                        for kj in rows.clone() {
                            let target_row = window + (ij + kj as isize) as usize * layout.ifwp;
                            let filter_row = filter_plane + kj * kw;
                            for ki in cols.clone() {
                                let x = (ii + ki as isize) as usize;
                                let w: i32 = filter_data[filter_row + ki].into();
                                let slot = region.slot(target_row + x);
                                *slot = slot.wrapping_add(g * w);
                            }
                        }
                    }
                }
            }
        },
    )?;

    Ok(())
}
