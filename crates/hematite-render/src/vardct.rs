//! The VarDCT reconstruction pipeline: LF dequantization and smoothing,
//! HF dequantization, chroma-from-luma, and the inverse transforms.

use hematite_frame::data::{HfGlobal, LfGlobal, LfGroup};
use hematite_frame::FrameHeader;
use hematite_grid::SimpleGrid;
use hematite_image::ImageHeader;
use hematite_vardct::BlockInfo;

use crate::transform::{transform_varblock, CoeffBlock};
use crate::{Error, Result};

/// Reconstructs the colour channels of a VarDCT frame into `[X, Y, B]`
/// planes padded to whole 8x8 blocks.
pub fn render_vardct(
    image_header: &ImageHeader,
    frame_header: &FrameHeader,
    lf_global: &LfGlobal,
    lf_groups: &[LfGroup],
    hf_global: &HfGlobal,
    group_coeffs: &[Option<[SimpleGrid<i32>; 3]>],
) -> Result<[SimpleGrid<f32>; 3]> {
    let span = tracing::span!(tracing::Level::TRACE, "render vardct");
    let _guard = span.enter();

    let lf_vardct = lf_global
        .vardct
        .as_ref()
        .ok_or(Error::IncompleteFrame("VarDCT frame without VarDCT globals"))?;

    // Frame-level LF image, assembled from the LF groups.
    let mut lf_planes = dequant_lf(frame_header, lf_global, lf_groups)?;
    chroma_from_luma_lf(&mut lf_planes, &lf_vardct.lf_chan_corr);
    if !frame_header.flags.skip_adaptive_lf_smoothing() {
        adaptive_lf_smoothing(&mut lf_planes, lf_global);
    }

    let width8 = frame_header.width.div_ceil(8) as usize;
    let height8 = frame_header.height.div_ceil(8) as usize;
    let mut planes: [SimpleGrid<f32>; 3] = std::array::from_fn(|_| {
        SimpleGrid::new(width8 * 8, height8 * 8)
    });

    let oim = &image_header.metadata.opsin_inverse_matrix;
    let quantizer = &lf_vardct.quantizer;
    let qm_scale = [
        0.8f32.powi(frame_header.x_qm_scale as i32 - 2),
        1.0,
        0.8f32.powi(frame_header.b_qm_scale as i32 - 2),
    ];

    let group_dim = frame_header.group_dim();
    let groups_per_row = frame_header.groups_per_row();
    for (group_idx, coeffs) in group_coeffs.iter().enumerate() {
        let group_idx = group_idx as u32;
        let Some(coeffs) = coeffs else {
            return Err(Error::IncompleteFrame("missing group coefficients"));
        };
        let lf_group_idx = frame_header.lf_group_idx_from_group_idx(group_idx);
        let lf_group = lf_groups
            .get(lf_group_idx as usize)
            .ok_or(Error::IncompleteFrame("missing LF group"))?;
        let hf_meta = lf_group
            .hf_meta
            .as_ref()
            .ok_or(Error::IncompleteFrame("missing HF metadata"))?;

        let group_col = group_idx % groups_per_row;
        let group_row = group_idx / groups_per_row;
        // Position of this group within its LF group, in blocks.
        let block_left = (group_col % 8) as usize * (group_dim / 8) as usize;
        let block_top = (group_row % 8) as usize * (group_dim / 8) as usize;
        let block_width = (hf_meta.block_info.width() - block_left).min((group_dim / 8) as usize);
        let block_height = (hf_meta.block_info.height() - block_top).min((group_dim / 8) as usize);
        // Position of this group in the frame, in blocks.
        let frame_left = (group_col * group_dim / 8) as usize;
        let frame_top = (group_row * group_dim / 8) as usize;

        let coeff_width = coeffs[0].width();
        let coeff_height = coeffs[0].height();
        let mut samples: [Vec<f32>; 3] =
            std::array::from_fn(|_| vec![0.0f32; coeff_width * coeff_height]);

        // First pass: dequantize every varblock into the group buffer.
        for by in 0..block_height {
            for bx in 0..block_width {
                let BlockInfo::Data { dct_select, hf_mul } =
                    *hf_meta.block_info.get(block_left + bx, block_top + by).unwrap()
                else {
                    continue;
                };
                let (vw, vh) = dct_select.size_in_blocks();
                if (bx + vw as usize) * 8 > coeff_width || (by + vh as usize) * 8 > coeff_height {
                    return Err(Error::IncompleteFrame("varblock crosses group boundary"));
                }
                let width = vw as usize * 8;
                let height = vh as usize * 8;
                let mul_base = 65536.0 / (quantizer.global_scale as f32 * hf_mul as f32);

                for (channel, out) in samples.iter_mut().enumerate() {
                    let matrix = hf_global.dequant_matrices.matrix(channel, dct_select);
                    let quant_bias = oim.quant_bias[channel];
                    let mul = mul_base * qm_scale[channel];
                    let transposed = dct_select.transposed();

                    for y in 0..height {
                        for x in 0..width {
                            let q = *coeffs[channel].get(bx * 8 + x, by * 8 + y).unwrap();
                            let mut value = q as f32;
                            if q.abs() <= 1 {
                                value *= quant_bias;
                            } else {
                                value -= oim.quant_bias_numerator / value;
                            }
                            let weight = if transposed {
                                matrix.value(y, x)
                            } else {
                                matrix.value(x, y)
                            };
                            out[(by * 8 + y) * coeff_width + bx * 8 + x] = value * weight * mul;
                        }
                    }
                }
            }
        }

        // Second pass: chroma-from-luma, with factors varying per 64x64
        // pixel tile of the LF group.
        {
            let corr = &lf_vardct.lf_chan_corr;
            let [sx, sy, sb] = &mut samples;
            for y in 0..coeff_height {
                let tile_y = (block_top * 8 + y) / 64;
                let row_x = &mut sx[y * coeff_width..][..coeff_width];
                let row_y = &sy[y * coeff_width..][..coeff_width];
                let row_b = &mut sb[y * coeff_width..][..coeff_width];
                for x in 0..coeff_width {
                    let tile_x = (block_left * 8 + x) / 64;
                    let kx = corr.base_correlation_x
                        + *hf_meta.x_from_y.get(tile_x, tile_y).unwrap() as f32
                            / corr.colour_factor as f32;
                    let kb = corr.base_correlation_b
                        + *hf_meta.b_from_y.get(tile_x, tile_y).unwrap() as f32
                            / corr.colour_factor as f32;
                    row_x[x] += kx * row_y[x];
                    row_b[x] += kb * row_y[x];
                }
            }
        }

        // Third pass: write the LLF corners and run the inverse transforms.
        for by in 0..block_height {
            for bx in 0..block_width {
                let BlockInfo::Data { dct_select, .. } =
                    *hf_meta.block_info.get(block_left + bx, block_top + by).unwrap()
                else {
                    continue;
                };
                let (vw, vh) = dct_select.size_in_blocks();
                let width = vw as usize * 8;
                let height = vh as usize * 8;

                for (channel, samples) in samples.iter_mut().enumerate() {
                    let mut block =
                        CoeffBlock::new(samples, coeff_width, bx * 8, by * 8, width, height);
                    transform_varblock(
                        &mut block,
                        dct_select,
                        &lf_planes[channel],
                        frame_left + bx,
                        frame_top + by,
                    );
                }
            }
        }

        // Blit the group into the frame planes.
        for (plane, samples) in planes.iter_mut().zip(&samples) {
            let x0 = frame_left * 8;
            let y0 = frame_top * 8;
            for y in 0..coeff_height {
                plane.row_mut(y0 + y)[x0..][..coeff_width]
                    .copy_from_slice(&samples[y * coeff_width..][..coeff_width]);
            }
        }
    }

    Ok(planes)
}

/// Dequantizes the LF image of every LF group into frame-level `[X, Y, B]`
/// planes at 1/8 resolution.
fn dequant_lf(
    frame_header: &FrameHeader,
    lf_global: &LfGlobal,
    lf_groups: &[LfGroup],
) -> Result<[SimpleGrid<f32>; 3]> {
    let quantizer = &lf_global
        .vardct
        .as_ref()
        .expect("checked by caller")
        .quantizer;
    let lf_dequant = &lf_global.lf_dequant;
    let scale_base =
        1.0 / (quantizer.global_scale as f64 * quantizer.quant_lf as f64);

    let width8 = frame_header.width.div_ceil(8) as usize;
    let height8 = frame_header.height.div_ceil(8) as usize;
    let mut planes: [SimpleGrid<f32>; 3] =
        std::array::from_fn(|_| SimpleGrid::new(width8, height8));

    let lf_groups_per_row = frame_header.lf_groups_per_row();
    let lf_dim8 = (frame_header.lf_group_dim() / 8) as usize;
    for (lf_group_idx, lf_group) in lf_groups.iter().enumerate() {
        let lf_coeff = lf_group
            .lf_coeff
            .as_ref()
            .ok_or(Error::IncompleteFrame("missing LF coefficients"))?;
        let precision_scale = (1 << (9 - lf_coeff.extra_precision)) as f64;
        let x0 = (lf_group_idx % lf_groups_per_row as usize) * lf_dim8;
        let y0 = (lf_group_idx / lf_groups_per_row as usize) * lf_dim8;

        // Quantized channels are stored Y, X, B.
        let m = [lf_dequant.m_x_lf, lf_dequant.m_y_lf, lf_dequant.m_b_lf];
        for (plane_idx, &channel_idx) in [1usize, 0, 2].iter().enumerate() {
            let channel = &lf_coeff.channels[channel_idx];
            let scale = (m[plane_idx] as f64 * precision_scale * scale_base) as f32;
            let plane = &mut planes[plane_idx];
            for y in 0..channel.height as usize {
                let row = channel.grid.row(y);
                let out = &mut plane.row_mut(y0 + y)[x0..][..channel.width as usize];
                for (out, &q) in out.iter_mut().zip(row) {
                    *out = q as f32 * scale;
                }
            }
        }
    }

    Ok(planes)
}

fn chroma_from_luma_lf(
    planes: &mut [SimpleGrid<f32>; 3],
    corr: &hematite_vardct::LfChannelCorrelation,
) {
    let kx = corr.base_correlation_x
        + (corr.x_factor_lf as i32 - 128) as f32 / corr.colour_factor as f32;
    let kb = corr.base_correlation_b
        + (corr.b_factor_lf as i32 - 128) as f32 / corr.colour_factor as f32;

    let [x, y, b] = planes;
    for ((x, y), b) in x
        .buf_mut()
        .iter_mut()
        .zip(y.buf().iter())
        .zip(b.buf_mut().iter_mut())
    {
        *x += kx * *y;
        *b += kb * *y;
    }
}

/// Self-guided 3x3 smoothing of the LF image: each sample moves toward the
/// weighted neighborhood average unless the move is large relative to the
/// LF quantization step.
fn adaptive_lf_smoothing(planes: &mut [SimpleGrid<f32>; 3], lf_global: &LfGlobal) {
    const W_SELF: f32 = 0.052262735;
    const W_SIDE: f32 = 0.2034514;
    const W_DIAG: f32 = 0.03348292;

    let quantizer = &lf_global.vardct.as_ref().expect("checked by caller").quantizer;
    let lf_dequant = &lf_global.lf_dequant;
    let scale_inv = quantizer.global_scale as f64 * quantizer.quant_lf as f64;
    let step: [f32; 3] = [
        (512.0 * lf_dequant.m_x_lf as f64 / scale_inv) as f32,
        (512.0 * lf_dequant.m_y_lf as f64 / scale_inv) as f32,
        (512.0 * lf_dequant.m_b_lf as f64 / scale_inv) as f32,
    ];

    let width = planes[0].width();
    let height = planes[0].height();
    if width <= 2 || height <= 2 {
        return;
    }

    let orig: [Vec<f32>; 3] = std::array::from_fn(|c| planes[c].buf().to_vec());
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut wa = [0.0f32; 3];
            let mut gap = 0.5f32;
            for c in 0..3 {
                let buf = &orig[c];
                let center = buf[y * width + x];
                let side = buf[y * width + x - 1]
                    + buf[y * width + x + 1]
                    + buf[(y - 1) * width + x]
                    + buf[(y + 1) * width + x];
                let diag = buf[(y - 1) * width + x - 1]
                    + buf[(y - 1) * width + x + 1]
                    + buf[(y + 1) * width + x - 1]
                    + buf[(y + 1) * width + x + 1];
                wa[c] = center * W_SELF + side * W_SIDE + diag * W_DIAG;
                gap = gap.max((wa[c] - center).abs() / step[c]);
            }
            let gap_scale = (3.0 - 4.0 * gap).max(0.0);
            for c in 0..3 {
                let center = orig[c][y * width + x];
                *planes[c].get_mut(x, y).unwrap() = (wa[c] - center) * gap_scale + center;
            }
        }
    }
}
