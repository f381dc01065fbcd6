//! Modular channel transforms: RCT and palette, applied in reverse order
//! after all channels are decoded. Squeeze is recognized but not supported.

use hematite_bitstream::{Bits, Bitstream};
use hematite_grid::SimpleGrid;

use crate::predictor::{Neighbors, Predictor, WeightedPredictor, WpHeader};
use crate::{Channel, Error, Result};

/// Palette entries below zero index this table of colour deltas. Only the
/// first three channels take deltas; later channels read zero.
#[rustfmt::skip]
const PALETTE_DELTAS: [[i16; 3]; 72] = [
    [0, 0, 0], [4, 4, 4], [11, 0, 0], [0, 0, -13], [0, -12, 0], [-10, -10, -10],
    [-18, -18, -18], [-27, -27, -27], [-18, -18, 0], [0, 0, -32], [-32, 0, 0], [-37, -37, -37],
    [0, -32, -32], [24, 24, 45], [50, 50, 50], [-45, -24, -24], [-24, -45, -45], [0, -24, -24],
    [-34, -34, 0], [-24, 0, -24], [-45, -45, -24], [64, 64, 64], [-32, 0, -32], [0, -32, 0],
    [-32, 0, 32], [-24, -45, -24], [45, 24, 45], [24, -24, -45], [-45, -24, 24], [80, 80, 80],
    [64, 0, 0], [0, 0, -64], [0, -64, -64], [-24, -24, 45], [96, 96, 96], [64, 64, 0],
    [45, -24, -24], [34, -34, 0], [112, 112, 112], [24, -45, -45], [45, 45, -24], [0, -32, 32],
    [24, -24, 45], [0, 96, 96], [45, -24, 24], [24, -45, -24], [-24, -45, 24], [0, -64, 0],
    [96, 0, 0], [128, 128, 128], [64, 0, 64], [144, 144, 144], [96, 96, 0], [-36, -36, 36],
    [45, -24, -45], [45, -45, -24], [0, 0, -96], [0, 128, 128], [0, 96, 0], [45, 24, -45],
    [-128, 0, 0], [24, -45, 24], [-45, 24, -45], [64, 0, -64], [64, -64, -64], [96, 0, 96],
    [45, -45, 24], [24, 45, -45], [64, 64, -64], [128, 128, 0], [0, 0, -128], [-24, 45, -45],
];

#[derive(Debug, Clone)]
pub enum TransformInfo {
    Rct(Rct),
    Palette(Palette),
}

#[derive(Debug, Clone)]
pub struct Rct {
    pub begin_c: u32,
    pub rct_type: u32,
}

#[derive(Debug, Clone)]
pub struct Palette {
    pub begin_c: u32,
    pub num_c: u32,
    pub nb_colours: u32,
    pub nb_deltas: u32,
    pub d_pred: Predictor,
    wp_header: Option<WpHeader>,
}

impl TransformInfo {
    pub fn parse(bitstream: &mut Bitstream, wp_header: &WpHeader) -> Result<Self> {
        match bitstream.read_bits(2)? {
            0 => {
                let begin_c =
                    bitstream.read_u32(Bits(3), 8 + Bits(6), 72 + Bits(10), 1096 + Bits(13))?;
                let rct_type = bitstream.read_u32(6, Bits(2), 2 + Bits(4), 10 + Bits(6))?;
                if rct_type >= 42 {
                    return Err(Error::InvalidRctParams);
                }
                Ok(Self::Rct(Rct { begin_c, rct_type }))
            }
            1 => {
                let begin_c =
                    bitstream.read_u32(Bits(3), 8 + Bits(6), 72 + Bits(10), 1096 + Bits(13))?;
                let num_c = bitstream.read_u32(1, 3, 4, 1 + Bits(13))?;
                let nb_colours =
                    bitstream.read_u32(Bits(8), 256 + Bits(10), 1280 + Bits(12), 5376 + Bits(16))?;
                let nb_deltas =
                    bitstream.read_u32(0, 1 + Bits(8), 257 + Bits(10), 1281 + Bits(16))?;
                let d_pred = Predictor::try_from(bitstream.read_bits(4)?)?;
                Ok(Self::Palette(Palette {
                    begin_c,
                    num_c,
                    nb_colours,
                    nb_deltas,
                    d_pred,
                    wp_header: (d_pred == Predictor::SelfCorrecting).then(|| wp_header.clone()),
                }))
            }
            2 => {
                // Consume the squeeze parameter list before rejecting, so
                // the error is reported against well-formed syntax.
                let num_sq = bitstream.read_u32(0, 1 + Bits(4), 9 + Bits(6), 41 + Bits(8))?;
                for _ in 0..num_sq {
                    bitstream.read_bool()?; // horizontal
                    bitstream.read_bool()?; // in_place
                    bitstream.read_u32(Bits(3), 8 + Bits(6), 72 + Bits(10), 1096 + Bits(13))?;
                    bitstream.read_u32(1, 2, 3, 4 + Bits(4))?;
                }
                Err(Error::Bitstream(hematite_bitstream::Error::Unsupported(
                    "squeeze transform",
                )))
            }
            value => Err(Error::Bitstream(hematite_bitstream::Error::InvalidEnum {
                name: "TransformId",
                value,
            })),
        }
    }

    /// Applies the transform to the channel list, turning the original
    /// channels into the list that is actually coded.
    pub fn apply_channel_info(
        &self,
        channels: &mut Vec<Channel>,
        nb_meta_channels: &mut u32,
    ) -> Result<()> {
        match self {
            Self::Rct(rct) => rct.check_channels(channels),
            Self::Palette(palette) => palette.apply_channel_info(channels, nb_meta_channels),
        }
    }

    /// Undoes the transform on fully decoded channels.
    pub fn inverse(&self, channels: &mut Vec<Channel>, bit_depth: u32) -> Result<()> {
        match self {
            Self::Rct(rct) => rct.inverse(channels),
            Self::Palette(palette) => palette.inverse(channels, bit_depth),
        }
    }
}

impl Rct {
    fn check_channels(&self, channels: &[Channel]) -> Result<()> {
        let begin = self.begin_c as usize;
        let Some(targets) = channels.get(begin..begin + 3) else {
            return Err(Error::InvalidRctParams);
        };
        if targets
            .iter()
            .any(|ch| ch.width != targets[0].width || ch.height != targets[0].height)
        {
            return Err(Error::InvalidRctParams);
        }
        Ok(())
    }

    fn inverse(&self, channels: &mut [Channel]) -> Result<()> {
        self.check_channels(channels)?;
        let permutation = self.rct_type / 7;
        let ty = self.rct_type % 7;
        let begin = self.begin_c as usize;

        let [ch0, ch1, ch2] = &mut channels[begin..begin + 3] else {
            return Err(Error::InvalidRctParams);
        };
        let height = ch0.height as usize;
        for y in 0..height {
            let row0 = ch0.grid.row_mut(y);
            let row1 = ch1.grid.row_mut(y);
            let row2 = ch2.grid.row_mut(y);
            for ((s0, s1), s2) in row0.iter_mut().zip(row1.iter_mut()).zip(row2.iter_mut()) {
                let a = *s0;
                let b = *s1;
                let c = *s2;
                let (d, e, f);
                if ty == 6 {
                    // Reversible YCgCo.
                    let tmp = a.wrapping_sub(c >> 1);
                    e = c.wrapping_add(tmp);
                    f = tmp.wrapping_sub(b >> 1);
                    d = f.wrapping_add(b);
                } else {
                    d = a;
                    f = if ty & 1 != 0 { c.wrapping_add(a) } else { c };
                    e = match ty >> 1 {
                        1 => b.wrapping_add(a),
                        2 => b.wrapping_add(a.wrapping_add(f) >> 1),
                        _ => b,
                    };
                }
                *s0 = d;
                *s1 = e;
                *s2 = f;
            }

            match permutation {
                1 => {
                    row0.swap_with_slice(row1);
                    row0.swap_with_slice(row2);
                }
                2 => {
                    row0.swap_with_slice(row1);
                    row1.swap_with_slice(row2);
                }
                3 => row1.swap_with_slice(row2),
                4 => row0.swap_with_slice(row1),
                5 => row0.swap_with_slice(row2),
                _ => {}
            }
        }
        Ok(())
    }
}

impl Palette {
    fn apply_channel_info(
        &self,
        channels: &mut Vec<Channel>,
        nb_meta_channels: &mut u32,
    ) -> Result<()> {
        let begin = self.begin_c as usize;
        let end = begin + self.num_c as usize;
        if self.num_c == 0 || end > channels.len() {
            return Err(Error::InvalidPaletteParams);
        }
        if self.begin_c < *nb_meta_channels {
            if end as u32 > *nb_meta_channels {
                return Err(Error::InvalidPaletteParams);
            }
            *nb_meta_channels = *nb_meta_channels + 2 - self.num_c;
        } else {
            *nb_meta_channels += 1;
        }

        let (width, height) = (channels[begin].width, channels[begin].height);
        if channels[begin..end]
            .iter()
            .any(|ch| ch.width != width || ch.height != height)
        {
            return Err(Error::InvalidPaletteParams);
        }

        channels.drain(begin + 1..end);
        channels.insert(0, Channel::meta(self.nb_colours, self.num_c)?);
        Ok(())
    }

    fn inverse(&self, channels: &mut Vec<Channel>, bit_depth: u32) -> Result<()> {
        if channels.is_empty() {
            return Err(Error::InvalidPaletteParams);
        }
        let palette = channels.remove(0);
        let begin = self.begin_c as usize;
        if begin >= channels.len()
            || palette.width != self.nb_colours
            || palette.height != self.num_c
        {
            return Err(Error::InvalidPaletteParams);
        }

        // Expand the index channel into `num_c` output channels.
        let (index_width, index_height, hshift, vshift) = {
            let ch = &channels[begin];
            (ch.width, ch.height, ch.hshift, ch.vshift)
        };
        let width = index_width as usize;
        let height = index_height as usize;
        for c in 1..self.num_c as usize {
            let restored = Channel::with_dims(index_width, index_height, hshift, vshift)?;
            channels.insert(begin + c, restored);
        }

        let nb_colours = self.nb_colours as i32;
        let nb_deltas = self.nb_deltas as i32;
        let mut delta_positions = Vec::new();
        for y in 0..height {
            for x in 0..width {
                let index = *channels[begin].grid.get(x, y).unwrap();
                if index < nb_deltas {
                    delta_positions.push((x, y));
                }
                for c in 0..self.num_c as usize {
                    let sample = lookup_palette_sample(&palette.grid, index, c, nb_colours, bit_depth);
                    *channels[begin + c].grid.get_mut(x, y).unwrap() = sample;
                }
            }
        }

        if delta_positions.is_empty() {
            return Ok(());
        }

        // Delta entries hold differences against the `d_pred` prediction
        // over the reconstructed channel, applied in raster order.
        for c in 0..self.num_c as usize {
            let grid = &mut channels[begin + c].grid;
            let mut wp = self
                .wp_header
                .as_ref()
                .map(|header| WeightedPredictor::new(width, header.clone()));
            let mut positions = delta_positions.iter().copied().peekable();

            'outer: for y in 0..height {
                for x in 0..width {
                    if positions.peek().is_none() {
                        break 'outer;
                    }
                    let nb = gather_neighbors(grid, x, y);
                    let wp_pred = wp.as_ref().map(|wp| wp.predict(&nb));
                    let mut sample = *grid.get(x, y).unwrap();
                    if positions.peek() == Some(&(x, y)) {
                        positions.next();
                        let diff = self.d_pred.predict(&nb, wp_pred.as_ref());
                        sample = (sample as i64 + diff) as i32;
                        *grid.get_mut(x, y).unwrap() = sample;
                    }
                    if let (Some(wp), Some(prediction)) = (&mut wp, &wp_pred) {
                        wp.record(prediction, sample);
                    }
                }
            }
        }
        Ok(())
    }
}

fn lookup_palette_sample(
    palette: &SimpleGrid<i32>,
    index: i32,
    c: usize,
    nb_colours: i32,
    bit_depth: u32,
) -> i32 {
    if (0..nb_colours).contains(&index) {
        return *palette.get(index as usize, c).unwrap();
    }
    if index >= nb_colours {
        // Implicit palette: small indices form a base-4 cube, larger ones a
        // base-5 cube.
        let index = index - nb_colours;
        let max_value = (1i32 << bit_depth) - 1;
        return if index < 64 {
            ((index >> (2 * c)) % 4) * max_value / 4 + (1i32 << bit_depth.saturating_sub(3))
        } else {
            let mut index = index - 64;
            for _ in 0..c {
                index /= 5;
            }
            index % 5 * max_value / 4
        };
    }

    // Negative indices read the fixed delta table.
    if c >= 3 {
        return 0;
    }
    let index = (-(index + 1) % 143) as usize;
    let mut sample = PALETTE_DELTAS[(index + 1) >> 1][c] as i32;
    if index & 1 == 0 {
        sample = -sample;
    }
    if bit_depth > 8 {
        sample <<= bit_depth.min(24) - 8;
    }
    sample
}

/// Neighbor gathering for the palette delta pass, with the standard edge
/// substitutions.
pub(crate) fn gather_neighbors(grid: &SimpleGrid<i32>, x: usize, y: usize) -> Neighbors {
    let width = grid.width();
    let get = |x: usize, y: usize| *grid.get(x, y).unwrap();

    let w = if x > 0 {
        get(x - 1, y)
    } else if y > 0 {
        get(x, y - 1)
    } else {
        0
    };
    let n = if y > 0 { get(x, y - 1) } else { w };
    let nw = if x > 0 && y > 0 { get(x - 1, y - 1) } else { w };
    let ne = if y > 0 && x + 1 < width {
        get(x + 1, y - 1)
    } else {
        n
    };
    let nn = if y > 1 { get(x, y - 2) } else { n };
    let ww = if x > 1 { get(x - 2, y) } else { w };
    let nee = if y > 0 && x + 2 < width {
        get(x + 2, y - 1)
    } else {
        ne
    };

    Neighbors {
        w,
        n,
        nw,
        ne,
        nn,
        ww,
        nee,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_from(values: &[i32], width: u32, height: u32) -> Channel {
        let mut ch = Channel::with_dims(width, height, 0, 0).unwrap();
        ch.grid.buf_mut().copy_from_slice(values);
        ch
    }

    #[test]
    fn rct_zero_is_identity() {
        let mut channels = vec![
            channel_from(&[1, 2], 2, 1),
            channel_from(&[3, 4], 2, 1),
            channel_from(&[5, 6], 2, 1),
        ];
        let rct = Rct {
            begin_c: 0,
            rct_type: 0,
        };
        rct.inverse(&mut channels).unwrap();
        assert_eq!(channels[0].grid.buf(), [1, 2]);
        assert_eq!(channels[1].grid.buf(), [3, 4]);
        assert_eq!(channels[2].grid.buf(), [5, 6]);
    }

    #[test]
    fn rct_ycgco_round_trip() {
        // Forward YCgCo-R: Co = r - b; tmp = b + (Co >> 1); Cg = g - tmp;
        // Y = tmp + (Cg >> 1).
        let (r, g, b) = (137, 42, -25);
        let co: i32 = r - b;
        let tmp = b + (co >> 1);
        let cg = g - tmp;
        let y = tmp + (cg >> 1);

        let mut channels = vec![
            channel_from(&[y], 1, 1),
            channel_from(&[cg], 1, 1),
            channel_from(&[co], 1, 1),
        ];
        let rct = Rct {
            begin_c: 0,
            rct_type: 6,
        };
        rct.inverse(&mut channels).unwrap();
        assert_eq!(channels[0].grid.buf(), [r]);
        assert_eq!(channels[1].grid.buf(), [g]);
        assert_eq!(channels[2].grid.buf(), [b]);
    }

    #[test]
    fn rct_type_one_adds_first_channel() {
        let mut channels = vec![
            channel_from(&[10], 1, 1),
            channel_from(&[1], 1, 1),
            channel_from(&[2], 1, 1),
        ];
        let rct = Rct {
            begin_c: 0,
            rct_type: 1,
        };
        rct.inverse(&mut channels).unwrap();
        assert_eq!(channels[0].grid.buf(), [10]);
        assert_eq!(channels[1].grid.buf(), [1]);
        assert_eq!(channels[2].grid.buf(), [12]);
    }

    #[test]
    fn palette_restores_colors() {
        // Palette of 2 colours x 3 channels; 2x2 index image.
        let mut palette = Channel::meta(2, 3).unwrap();
        palette.grid.buf_mut().copy_from_slice(&[10, 20, 30, 40, 50, 60]);

        let mut channels = vec![palette, channel_from(&[0, 1, 1, 0], 2, 2)];
        let transform = Palette {
            begin_c: 0,
            num_c: 3,
            nb_colours: 2,
            nb_deltas: 0,
            d_pred: Predictor::Zero,
            wp_header: None,
        };
        transform.inverse(&mut channels, 8).unwrap();

        assert_eq!(channels.len(), 3);
        assert_eq!(channels[0].grid.buf(), [10, 20, 20, 10]);
        assert_eq!(channels[1].grid.buf(), [30, 40, 40, 30]);
        assert_eq!(channels[2].grid.buf(), [50, 60, 60, 50]);
    }

    #[test]
    fn palette_delta_entries_accumulate_prediction() {
        // Index 0 is a delta entry (nb_deltas = 1): west + delta.
        let mut palette = Channel::meta(1, 1).unwrap();
        palette.grid.buf_mut()[0] = 5;

        let channels = vec![palette, channel_from(&[0, 0, 0], 3, 1)];
        let transform = Palette {
            begin_c: 0,
            num_c: 1,
            nb_colours: 1,
            nb_deltas: 1,
            d_pred: Predictor::West,
            wp_header: None,
        };
        let mut channels = channels;
        transform.inverse(&mut channels, 8).unwrap();
        assert_eq!(channels[0].grid.buf(), [5, 10, 15]);
    }
}
