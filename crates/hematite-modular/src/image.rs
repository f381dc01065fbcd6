//! The per-channel sample decode loop.

use hematite_bitstream::{unpack_signed, Bitstream};
use hematite_coding::Decoder;

use crate::ma::MaConfig;
use crate::predictor::{Neighbors, WeightedPredictor, WpHeader};
use crate::transform::gather_neighbors;
use crate::{Channel, Error, Result};

pub(crate) struct ChannelDecodeParams<'a> {
    pub ma_config: &'a MaConfig,
    pub wp_params: &'a WpHeader,
    pub stream_index: u32,
    pub dist_mult: u32,
}

/// Decodes channel `idx`, reading residuals and reconstructing samples
/// row by row.
pub(crate) fn decode_channel(
    bitstream: &mut Bitstream,
    decoder: &mut Decoder,
    channels: &mut [Channel],
    idx: usize,
    params: &ChannelDecodeParams<'_>,
) -> Result<()> {
    let (prev_channels, rest) = channels.split_at_mut(idx);
    let channel = &mut rest[0];
    let width = channel.width as usize;
    let height = channel.height as usize;
    if width == 0 || height == 0 {
        return Ok(());
    }

    let ma_config = params.ma_config;
    // Earlier channels with identical geometry feed properties 16 and up,
    // nearest channel first.
    let prev_refs: Vec<&Channel> = if ma_config.needs_prev_channels() {
        prev_channels
            .iter()
            .rev()
            .filter(|prev| {
                prev.width == channel.width
                    && prev.height == channel.height
                    && prev.hshift == channel.hshift
                    && prev.vshift == channel.vshift
            })
            .collect()
    } else {
        Vec::new()
    };

    let mut wp = ma_config
        .needs_self_correcting()
        .then(|| WeightedPredictor::new(width, params.wp_params.clone()));

    for y in 0..height {
        let mut prev_grad = 0i32;
        for x in 0..width {
            let nb = gather_neighbors(&channel.grid, x, y);
            let wp_pred = wp.as_ref().map(|wp| wp.predict(&nb));

            let base_props = [
                idx as i32,
                params.stream_index as i32,
                y as i32,
                x as i32,
                nb.n.abs(),
                nb.w.abs(),
                nb.n,
                nb.w,
                nb.w.wrapping_sub(prev_grad),
                (nb.w as i64 + nb.n as i64 - nb.nw as i64) as i32,
                nb.w.wrapping_sub(nb.nw),
                nb.nw.wrapping_sub(nb.n),
                nb.n.wrapping_sub(nb.ne),
                nb.n.wrapping_sub(nb.nn),
                nb.w.wrapping_sub(nb.ww),
                wp_pred.as_ref().map(|p| p.max_error).unwrap_or(0),
            ];
            prev_grad = base_props[9];

            let leaf = ma_config.leaf(|property| {
                if let Some(extra) = (property as usize).checked_sub(16) {
                    prev_channel_property(&prev_refs, extra, x, y)
                } else {
                    base_props[property as usize]
                }
            });

            let token =
                decoder.read_varint_with_multiplier(bitstream, leaf.ctx, params.dist_mult)?;
            let diff = unpack_signed(token) as i64 * leaf.multiplier as i64 + leaf.offset as i64;
            let value = diff + leaf.predictor.predict(&nb, wp_pred.as_ref());
            if value < i16::MIN as i64 || value > i16::MAX as i64 {
                return Err(Error::SampleOutOfRange);
            }
            let value = value as i32;
            *channel.grid.get_mut(x, y).unwrap() = value;

            if let (Some(wp), Some(prediction)) = (&mut wp, &wp_pred) {
                wp.record(prediction, value);
            }
        }
    }

    Ok(())
}

fn prev_channel_property(prev_refs: &[&Channel], extra: usize, x: usize, y: usize) -> i32 {
    let Some(prev) = prev_refs.get(extra / 4) else {
        return 0;
    };
    let grid = &prev.grid;
    let value = *grid.get(x, y).unwrap();
    match extra % 4 {
        0 => value.abs(),
        1 => value,
        kind => {
            let w = if x > 0 { *grid.get(x - 1, y).unwrap() } else { 0 };
            let n = if y > 0 { *grid.get(x, y - 1).unwrap() } else { w };
            let nw = if x > 0 {
                if y > 0 {
                    *grid.get(x - 1, y - 1).unwrap()
                } else {
                    w
                }
            } else {
                0
            };
            let gradient = Neighbors {
                w,
                n,
                nw,
                ..Default::default()
            };
            let g = (gradient.n as i64 + gradient.w as i64 - gradient.nw as i64)
                .clamp(
                    (gradient.w as i64).min(gradient.n as i64),
                    (gradient.w as i64).max(gradient.n as i64),
                ) as i32;
            if kind == 2 {
                value.abs_diff(g) as i32
            } else {
                value.wrapping_sub(g)
            }
        }
    }
}
