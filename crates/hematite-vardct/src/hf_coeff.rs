//! HF coefficient decoding for one (pass, group) section.

use hematite_bitstream::{unpack_signed, Bitstream};
use hematite_grid::SimpleGrid;

use crate::{BlockInfo, HfBlockContext, HfPass, Result};

const COEFF_FREQ_CONTEXT: [u32; 63] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 15, 16, 16, 17, 17, 18, 18, 19, 19, 20,
    20, 21, 21, 22, 22, 23, 23, 23, 23, 24, 24, 24, 24, 25, 25, 25, 25, 26, 26, 26, 26, 27, 27,
    27, 27, 28, 28, 28, 28, 29, 29, 29, 29, 30, 30, 30, 30,
];
const COEFF_NUM_NONZERO_CONTEXT: [u32; 63] = [
    0, 31, 62, 62, 93, 93, 93, 93, 123, 123, 123, 123, 152, 152, 152, 152, 152, 152, 152, 152,
    180, 180, 180, 180, 180, 180, 180, 180, 180, 180, 180, 180, 206, 206, 206, 206, 206, 206, 206,
    206, 206, 206, 206, 206, 206, 206, 206, 206, 206, 206, 206, 206, 206, 206, 206, 206, 206, 206,
    206, 206, 206, 206, 206,
];

/// Parameters for decoding the HF coefficients of one group.
#[derive(Debug)]
pub struct HfCoeffParams<'a> {
    pub num_hf_presets: u32,
    pub hf_block_ctx: &'a HfBlockContext,
    /// Varblock grid of the covering LF group.
    pub block_info: &'a SimpleGrid<BlockInfo>,
    /// Origin and size of this group within the LF group, in 8x8 blocks.
    pub block_left: usize,
    pub block_top: usize,
    pub block_width: usize,
    pub block_height: usize,
    /// Quantized LF planes of the LF group in `[X, Y, B]` order, used for
    /// the LF context buckets.
    pub lf_quant: Option<[&'a SimpleGrid<i32>; 3]>,
    pub hf_pass: &'a HfPass,
    pub coeff_shift: u32,
}

/// Decodes the coefficients of every varblock whose top-left cell lies in
/// the group, adding them into the `[X, Y, B]` coefficient grids.
///
/// The coefficient grids are group-local: their origin corresponds to
/// `(block_left * 8, block_top * 8)` in the LF group.
pub fn decode_hf_coeff(
    bitstream: &mut Bitstream,
    params: HfCoeffParams<'_>,
    out: &mut [SimpleGrid<i32>; 3],
) -> Result<()> {
    let HfCoeffParams {
        num_hf_presets,
        hf_block_ctx,
        block_info,
        block_left,
        block_top,
        block_width,
        block_height,
        lf_quant,
        hf_pass,
        coeff_shift,
    } = params;
    let HfBlockContext {
        qf_thresholds,
        lf_thresholds,
        block_ctx_map,
        num_block_clusters,
    } = hf_block_ctx;
    let lf_idx_mul = hf_block_ctx.lf_idx_mul();
    let qf_idx_mul = hf_block_ctx.qf_idx_mul();

    let mut decoder = hf_pass.clone_decoder();

    let hfp_bits = num_hf_presets.next_power_of_two().trailing_zeros() as usize;
    let hfp = bitstream.read_bits(hfp_bits)?;
    if hfp >= num_hf_presets {
        tracing::error!(hfp, num_hf_presets, "HF preset out of bounds");
        return Err(crate::Error::InvalidHfCoeff("HF preset out of bounds"));
    }
    let ctx_size = (495 * num_block_clusters) as usize;
    let cluster_map: Vec<u8> =
        decoder.cluster_map()[ctx_size * hfp as usize..][..ctx_size].to_vec();

    decoder.begin(bitstream)?;

    // Per-channel nonzero-count predictor: one row of per-column counts,
    // holding the block above until the current row overwrites it.
    let mut non_zeros_rows = vec![vec![0u32; block_width]; 3];

    for by in 0..block_height {
        for bx in 0..block_width {
            let BlockInfo::Data { dct_select, hf_mul } =
                *block_info.get(block_left + bx, block_top + by).unwrap()
            else {
                continue;
            };
            let (vw, vh) = dct_select.size_in_blocks();
            if bx + vw as usize > block_width || by + vh as usize > block_height {
                return Err(crate::Error::InvalidHfCoeff(
                    "varblock crosses group boundary",
                ));
            }
            let num_blocks = vw * vh;
            let num_blocks_log = num_blocks.trailing_zeros();
            let order_idx = dct_select.order_index();

            let lf_idx = if let Some(lf_quant) = &lf_quant {
                let mut idx = 0usize;
                for c in [0, 2, 1] {
                    let thresholds = &lf_thresholds[c];
                    idx *= thresholds.len() + 1;
                    let q = *lf_quant[c].get(block_left + bx, block_top + by).unwrap();
                    idx += thresholds.iter().filter(|&&t| q > t).count();
                }
                idx
            } else {
                0
            };
            let qf_idx = qf_thresholds.iter().filter(|&&t| hf_mul > t as i32).count();

            for c in 0..3 {
                let order_ch = c * 13 + order_idx;
                let channel = [1usize, 0, 2][c];

                let ctx_idx = (order_ch * qf_idx_mul + qf_idx) * lf_idx_mul + lf_idx;
                let block_ctx = block_ctx_map[ctx_idx] as u32;

                let non_zeros_ctx = {
                    let row = &non_zeros_rows[channel];
                    let predicted = if by == 0 {
                        if bx == 0 {
                            32
                        } else {
                            row[bx - 1]
                        }
                    } else if bx == 0 {
                        row[bx]
                    } else {
                        (row[bx] + row[bx - 1] + 1) >> 1
                    };
                    debug_assert!(predicted < 64);
                    let bucket = if predicted >= 8 {
                        4 + predicted / 2
                    } else {
                        predicted
                    };
                    block_ctx + bucket * num_block_clusters
                };

                let mut non_zeros = decoder.read_varint_clustered(
                    bitstream,
                    cluster_map[non_zeros_ctx as usize],
                    0,
                )?;
                if non_zeros > 63 << num_blocks_log {
                    tracing::error!(non_zeros, num_blocks, "nonzero count too large");
                    return Err(crate::Error::InvalidHfCoeff("nonzero count too large"));
                }

                let per_block = (non_zeros + num_blocks - 1) >> num_blocks_log;
                for dx in 0..vw as usize {
                    non_zeros_rows[channel][bx + dx] = per_block;
                }
                if non_zeros == 0 {
                    continue;
                }

                let order = hf_pass.order(order_idx, c);
                let transposed = dct_select.transposed();
                let grid = &mut out[channel];

                let mut prev_nonzero = (non_zeros <= num_blocks * 4) as u32;
                let coeff_ctx_base = (block_ctx * 458 + 37 * num_block_clusters) as usize;
                let cluster_map = &cluster_map[coeff_ctx_base..][..458];

                for (scan_idx, &(cx, cy)) in order[num_blocks as usize..].iter().enumerate() {
                    let coeff_ctx = {
                        let nz_bucket = (non_zeros - 1) >> num_blocks_log;
                        let freq_bucket = scan_idx >> num_blocks_log;
                        (COEFF_NUM_NONZERO_CONTEXT[nz_bucket as usize]
                            + COEFF_FREQ_CONTEXT[freq_bucket])
                            * 2
                            + prev_nonzero
                    };
                    let Some(&cluster) = cluster_map.get(coeff_ctx as usize) else {
                        tracing::error!("ran out of coefficient contexts");
                        return Err(crate::Error::InvalidHfCoeff(
                            "ran out of coefficient contexts",
                        ));
                    };
                    let ucoeff = decoder.read_varint_clustered(bitstream, cluster, 0)?;
                    if ucoeff == 0 {
                        prev_nonzero = 0;
                        continue;
                    }

                    let coeff = unpack_signed(ucoeff) << coeff_shift;
                    let (mut dx, mut dy) = (cx as usize, cy as usize);
                    if transposed {
                        std::mem::swap(&mut dx, &mut dy);
                    }
                    let x = bx * 8 + dx;
                    let y = by * 8 + dy;
                    *grid.get_mut(x, y).unwrap() += coeff;

                    prev_nonzero = 1;
                    non_zeros -= 1;
                    if non_zeros == 0 {
                        break;
                    }
                }
            }
        }
    }

    decoder.finalize()?;
    Ok(())
}
