//! Restoration filters: the gaborish convolution and the edge-preserving
//! filter.

use hematite_frame::data::LfGroup;
use hematite_frame::filter::{EdgePreservingFilter, EpfParams, Gabor};
use hematite_frame::FrameHeader;
use hematite_grid::SimpleGrid;

/// Applies the gaborish 3x3 sharpening convolution to the colour planes,
/// replicating samples at the borders. The planes are in X, Y, B order; the
/// signaled weights are per X, Y, B channel as well.
pub fn apply_gabor(planes: &mut [SimpleGrid<f32>; 3], gabor: &Gabor) {
    let Gabor::Enabled(weights) = gabor else {
        return;
    };

    let span = tracing::span!(tracing::Level::TRACE, "apply gabor");
    let _guard = span.enter();

    for (plane, [w_side, w_diag]) in planes.iter_mut().zip(*weights) {
        let width = plane.width();
        let height = plane.height();
        let norm = 1.0 / (1.0 + 4.0 * (w_side + w_diag));
        let input = plane.buf().to_vec();
        let sample = |x: isize, y: isize| -> f32 {
            let x = x.clamp(0, width as isize - 1) as usize;
            let y = y.clamp(0, height as isize - 1) as usize;
            input[y * width + x]
        };

        for y in 0..height {
            let row = plane.row_mut(y);
            let yi = y as isize;
            for (x, out) in row.iter_mut().enumerate() {
                let xi = x as isize;
                let center = input[y * width + x];
                let side = sample(xi - 1, yi)
                    + sample(xi + 1, yi)
                    + sample(xi, yi - 1)
                    + sample(xi, yi + 1);
                let diag = sample(xi - 1, yi - 1)
                    + sample(xi + 1, yi - 1)
                    + sample(xi - 1, yi + 1)
                    + sample(xi + 1, yi + 1);
                *out = (center + side * w_side + diag * w_diag) * norm;
            }
        }
    }
}

fn mirror(pos: isize, size: usize) -> usize {
    let mut pos = if pos < 0 {
        (pos + 1).unsigned_abs()
    } else {
        pos as usize
    };
    if pos >= size {
        let wrapped = pos % (size * 2);
        if wrapped >= size {
            pos = size * 2 - wrapped - 1;
        } else {
            pos = wrapped;
        }
    }
    pos
}

fn epf_weight(scaled_distance: f32, sigma: f32, step_multiplier: f32) -> f32 {
    let inv_sigma = step_multiplier * 6.6 * (std::f32::consts::FRAC_1_SQRT_2 - 1.0) / sigma;
    (1.0 - scaled_distance * inv_sigma).max(0.0)
}

#[allow(clippy::too_many_arguments)]
fn epf_step(
    input: &[SimpleGrid<f32>; 3],
    output: &mut [SimpleGrid<f32>; 3],
    sigma_grid: &SimpleGrid<f32>,
    channel_scale: [f32; 3],
    border_sad_mul: f32,
    step_multiplier: f32,
    kernel_offsets: &[(isize, isize)],
    dist_offsets: &[(isize, isize)],
) {
    let width = input[0].width();
    let height = input[0].height();

    for y in 0..height {
        let y8 = y / 8;
        let is_y_border = y % 8 == 0 || y % 8 == 7;
        for x in 0..width {
            let sigma = *sigma_grid.get(x / 8, y8).unwrap();
            if sigma < 0.3 {
                for (input, output) in input.iter().zip(output.iter_mut()) {
                    *output.get_mut(x, y).unwrap() = *input.get(x, y).unwrap();
                }
                continue;
            }
            let is_border = is_y_border || x % 8 == 0 || x % 8 == 7;
            let sad_mul = if is_border { border_sad_mul } else { 1.0 };

            let mut sum_weights = epf_weight(0.0, sigma, step_multiplier);
            let mut sums = [0.0f32; 3];
            for (sum, input) in sums.iter_mut().zip(input) {
                *sum = *input.get(x, y).unwrap() * sum_weights;
            }

            for &(dx, dy) in kernel_offsets {
                let tx = x as isize + dx;
                let ty = y as isize + dy;
                let mut dist = 0.0f32;
                for (input, scale) in input.iter().zip(channel_scale) {
                    let buf = input.buf();
                    for &(ddx, ddy) in dist_offsets {
                        let ax = mirror(x as isize + ddx, width);
                        let ay = mirror(y as isize + ddy, height);
                        let bx = mirror(tx + ddx, width);
                        let by = mirror(ty + ddy, height);
                        dist += (buf[ay * width + ax] - buf[by * width + bx]).abs() * scale;
                    }
                }

                let weight = epf_weight(dist * sad_mul, sigma, step_multiplier);
                sum_weights += weight;

                let sx = mirror(tx, width);
                let sy = mirror(ty, height);
                for (sum, input) in sums.iter_mut().zip(input) {
                    *sum += *input.get(sx, sy).unwrap() * weight;
                }
            }

            for (sum, output) in sums.into_iter().zip(output.iter_mut()) {
                *output.get_mut(x, y).unwrap() = sum / sum_weights;
            }
        }
    }
}

/// Applies up to three passes of the edge-preserving filter.
///
/// The sigma grid is assembled from the per-LF-group varblock metadata for
/// VarDCT frames, or filled with the signaled constant for Modular frames.
pub fn apply_epf(
    planes: &mut [SimpleGrid<f32>; 3],
    lf_groups: &[LfGroup],
    frame_header: &FrameHeader,
) {
    let EdgePreservingFilter::Enabled(EpfParams {
        iters,
        channel_scale,
        quant_mul: _,
        pass0_sigma_scale,
        pass2_sigma_scale,
        border_sad_mul,
        sigma_for_modular,
        ..
    }) = frame_header.restoration_filter.epf.clone()
    else {
        return;
    };

    let span = tracing::span!(tracing::Level::TRACE, "apply epf");
    let _guard = span.enter();

    let width = planes[0].width();
    let height = planes[0].height();
    let mut sigma_grid = SimpleGrid::<f32>::new(width.div_ceil(8), height.div_ceil(8));

    let mut have_meta = false;
    let lf_dim8 = (frame_header.lf_group_dim() / 8) as usize;
    let lf_groups_per_row = frame_header.lf_groups_per_row() as usize;
    for (lf_group_idx, lf_group) in lf_groups.iter().enumerate() {
        let Some(hf_meta) = &lf_group.hf_meta else {
            continue;
        };
        have_meta = true;
        let x0 = (lf_group_idx % lf_groups_per_row) * lf_dim8;
        let y0 = (lf_group_idx / lf_groups_per_row) * lf_dim8;
        for y in 0..hf_meta.epf_sigma.height() {
            for x in 0..hf_meta.epf_sigma.width() {
                if let Some(out) = sigma_grid.get_mut(x0 + x, y0 + y) {
                    *out = *hf_meta.epf_sigma.get(x, y).unwrap();
                }
            }
        }
    }
    if !have_meta {
        sigma_grid.buf_mut().fill(sigma_for_modular);
    }

    let mut scratch = planes.clone();

    // Step 0: wide kernel, only with three iterations.
    if iters == 3 {
        epf_step(
            planes,
            &mut scratch,
            &sigma_grid,
            channel_scale,
            border_sad_mul,
            pass0_sigma_scale,
            &[
                (0, -1),
                (-1, 0),
                (1, 0),
                (0, 1),
                (0, -2),
                (-1, -1),
                (1, -1),
                (-2, 0),
                (2, 0),
                (-1, 1),
                (1, 1),
                (0, 2),
            ],
            &[(0, 0), (0, -1), (-1, 0), (1, 0), (0, 1)],
        );
        std::mem::swap(planes, &mut scratch);
    }

    // Step 1: the main pass.
    epf_step(
        planes,
        &mut scratch,
        &sigma_grid,
        channel_scale,
        border_sad_mul,
        1.0,
        &[(0, -1), (-1, 0), (1, 0), (0, 1)],
        &[(0, 0), (0, -1), (-1, 0), (1, 0), (0, 1)],
    );
    std::mem::swap(planes, &mut scratch);

    // Step 2: refinement with point distances.
    if iters >= 2 {
        epf_step(
            planes,
            &mut scratch,
            &sigma_grid,
            channel_scale,
            border_sad_mul,
            pass2_sigma_scale,
            &[(0, -1), (-1, 0), (1, 0), (0, 1)],
            &[(0, 0)],
        );
        std::mem::swap(planes, &mut scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::mirror;

    #[test]
    fn mirror_reflects_without_repeating_edge() {
        assert_eq!(mirror(-1, 4), 0);
        assert_eq!(mirror(-2, 4), 1);
        assert_eq!(mirror(3, 4), 3);
        assert_eq!(mirror(4, 4), 3);
        assert_eq!(mirror(5, 4), 2);
    }
}
