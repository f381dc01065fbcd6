//! Per-pass coefficient orders and the HF coefficient distribution bundle.

use hematite_bitstream::{Bits, Bitstream, Bundle};
use hematite_coding::Decoder;

use crate::{HfBlockContext, Result};

/// `(width, height)` of the 13 coefficient order classes, wide side first.
const ORDER_SIZES: [(u32, u32); 13] = [
    (8, 8),
    (8, 8),
    (16, 16),
    (32, 32),
    (16, 8),
    (32, 8),
    (32, 16),
    (64, 64),
    (64, 32),
    (128, 128),
    (128, 64),
    (256, 256),
    (256, 128),
];

#[derive(Debug, Copy, Clone)]
pub struct HfPassParams<'a> {
    pub hf_block_ctx: &'a HfBlockContext,
    pub num_hf_presets: u32,
}

/// One pass worth of HF decoding state: the (possibly permuted) scan orders
/// and the coefficient distribution bundle.
#[derive(Debug)]
pub struct HfPass {
    order: [[Vec<(u8, u8)>; 3]; 13],
    hf_dist: Decoder,
}

impl Bundle<HfPassParams<'_>> for HfPass {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, params: HfPassParams<'_>) -> Result<Self> {
        let HfPassParams {
            hf_block_ctx,
            num_hf_presets,
        } = params;

        let mut used_orders = bitstream.read_u32(0x5f, 0x13, 0, Bits(13))?;
        let mut decoder = (used_orders != 0)
            .then(|| Decoder::parse(bitstream, 8))
            .transpose()?;
        if let Some(decoder) = &mut decoder {
            decoder.begin(bitstream)?;
        }

        let mut order: [[Vec<(u8, u8)>; 3]; 13] = Default::default();
        for (order_idx, order) in order.iter_mut().enumerate() {
            let natural = natural_order(order_idx);
            if used_orders & 1 != 0 {
                let decoder = decoder.as_mut().unwrap();
                let size = natural.len() as u32;
                let skip = size / 64;
                for order in order.iter_mut() {
                    let permutation =
                        hematite_coding::read_permutation(bitstream, decoder, size, skip)?;
                    *order = permutation.into_iter().map(|idx| natural[idx]).collect();
                }
            } else {
                for order in order.iter_mut() {
                    *order = natural.clone();
                }
            }
            used_orders >>= 1;
        }
        if let Some(decoder) = &decoder {
            decoder.finalize()?;
        }

        let num_dist = 495u32
            .checked_mul(num_hf_presets)
            .and_then(|v| v.checked_mul(hf_block_ctx.num_block_clusters))
            .ok_or(hematite_bitstream::Error::ProfileConformance(
                "too many HF coefficient contexts",
            ))?;
        let hf_dist = Decoder::parse(bitstream, num_dist)?;

        Ok(Self { order, hf_dist })
    }
}

impl HfPass {
    /// Scan order for the given order class and channel, in coefficient
    /// coordinates of the wide-side-first layout.
    #[inline]
    pub fn order(&self, order_idx: usize, channel: usize) -> &[(u8, u8)] {
        &self.order[order_idx][channel]
    }

    /// Returns a fresh clone of the coefficient decoder.
    #[inline]
    pub fn clone_decoder(&self) -> Decoder {
        self.hf_dist.clone()
    }
}

/// Computes the natural (zigzag) coefficient order of an order class.
///
/// The first `width/8 * height/8` entries are the LLF corner in raster
/// order; the rest follow a zigzag over a virtual square in which the y axis
/// is stretched by `width / height`.
fn natural_order(order_idx: usize) -> Vec<(u8, u8)> {
    let (width, height) = ORDER_SIZES[order_idx];
    let width = width as usize;
    let height = height as usize;
    let y_scale = width / height;
    let llf_w = width / 8;
    let llf_h = height / 8;

    let mut out = Vec::with_capacity(width * height);
    for y in 0..llf_h {
        for x in 0..llf_w {
            out.push((x as u8, y as u8));
        }
    }

    let mut dist = 0usize;
    let mut along = 0usize;
    while out.len() < width * height {
        let (x, y) = if dist % 2 == 0 {
            (along, dist - along)
        } else {
            (dist - along, along)
        };

        along += 1;
        if along > dist || along >= width {
            dist += 1;
            along = if dist < width { 0 } else { dist - width + 1 };
        }

        // Skip the LLF corner (a square in scaled coordinates) and rows
        // that don't exist in the stretched grid.
        if x < llf_w && y < llf_w {
            continue;
        }
        if y % y_scale != 0 {
            continue;
        }
        out.push((x as u8, (y / y_scale) as u8));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_order_covers_every_coefficient() {
        for order_idx in 0..13 {
            let (width, height) = ORDER_SIZES[order_idx];
            let order = natural_order(order_idx);
            assert_eq!(order.len(), (width * height) as usize);

            let mut seen = vec![false; order.len()];
            for &(x, y) in &order {
                let idx = y as usize * width as usize + x as usize;
                assert!(!seen[idx], "duplicate coefficient in order {order_idx}");
                seen[idx] = true;
            }
            assert!(seen.into_iter().all(|seen| seen));
        }
    }

    #[test]
    fn natural_order_starts_at_llf() {
        let order = natural_order(0);
        assert_eq!(order[0], (0, 0));
        // First AC coefficients of the 8x8 zigzag.
        assert_eq!(order[1], (1, 0));
        assert_eq!(order[2], (0, 1));
    }
}
