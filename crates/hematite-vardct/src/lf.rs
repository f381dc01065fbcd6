//! LF-side headers: channel dequantization, quantizer scales, channel
//! correlation, and the HF block context map.

use hematite_bitstream::{Bits, Bitstream, Bundle, Error as BitstreamError};

use crate::Result;

/// Per-channel LF dequantization scales. The coded values are 128 times the
/// effective multipliers.
#[derive(Debug, Clone)]
pub struct LfChannelDequantization {
    pub m_x_lf: f32,
    pub m_y_lf: f32,
    pub m_b_lf: f32,
}

impl Default for LfChannelDequantization {
    fn default() -> Self {
        Self {
            m_x_lf: 1.0 / 32.0,
            m_y_lf: 1.0 / 4.0,
            m_b_lf: 1.0 / 2.0,
        }
    }
}

impl<Ctx> Bundle<Ctx> for LfChannelDequantization {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        if bitstream.read_bool()? {
            return Ok(Self::default());
        }
        Ok(Self {
            m_x_lf: bitstream.read_f16_as_f32()?,
            m_y_lf: bitstream.read_f16_as_f32()?,
            m_b_lf: bitstream.read_f16_as_f32()?,
        })
    }
}

/// Global quantizer multipliers.
#[derive(Debug, Clone)]
pub struct Quantizer {
    pub global_scale: u32,
    pub quant_lf: u32,
}

impl<Ctx> Bundle<Ctx> for Quantizer {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        Ok(Self {
            global_scale: bitstream.read_u32(
                1 + Bits(11),
                2049 + Bits(11),
                4097 + Bits(12),
                8193 + Bits(16),
            )?,
            quant_lf: bitstream.read_u32(16, 1 + Bits(5), 1 + Bits(8), 1 + Bits(16))?,
        })
    }
}

/// Channel correlation constants for chroma-from-luma.
#[derive(Debug, Clone)]
pub struct LfChannelCorrelation {
    pub colour_factor: u32,
    pub base_correlation_x: f32,
    pub base_correlation_b: f32,
    pub x_factor_lf: u32,
    pub b_factor_lf: u32,
}

impl Default for LfChannelCorrelation {
    fn default() -> Self {
        Self {
            colour_factor: 84,
            base_correlation_x: 0.0,
            base_correlation_b: 1.0,
            x_factor_lf: 128,
            b_factor_lf: 128,
        }
    }
}

impl<Ctx> Bundle<Ctx> for LfChannelCorrelation {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        if bitstream.read_bool()? {
            return Ok(Self::default());
        }
        let colour_factor = bitstream.read_u32(84, 256, 2 + Bits(8), 258 + Bits(16))?;
        let base_correlation_x = bitstream.read_f16_as_f32()?;
        let base_correlation_b = bitstream.read_f16_as_f32()?;
        let x_factor_lf = bitstream.read_bits(8)?;
        let b_factor_lf = bitstream.read_bits(8)?;
        if base_correlation_x.abs() > 4.0 || base_correlation_b.abs() > 4.0 {
            return Err(BitstreamError::ValidationFailed("base correlation too large").into());
        }
        Ok(Self {
            colour_factor,
            base_correlation_x,
            base_correlation_b,
            x_factor_lf,
            b_factor_lf,
        })
    }
}

/// Context model configuration for HF coefficient decoding.
#[derive(Debug, Default)]
pub struct HfBlockContext {
    pub qf_thresholds: Vec<u32>,
    pub lf_thresholds: [Vec<i32>; 3],
    pub block_ctx_map: Vec<u8>,
    pub num_block_clusters: u32,
}

impl<Ctx> Bundle<Ctx> for HfBlockContext {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        let mut qf_thresholds = Vec::new();
        let mut lf_thresholds = [Vec::new(), Vec::new(), Vec::new()];
        let (num_block_clusters, block_ctx_map) = if bitstream.read_bool()? {
            // Default map over the 39 (DctSelect x channel) contexts.
            (
                15,
                vec![
                    0, 1, 2, 2, 3, 3, 4, 5, 6, 6, 6, 6, 6, //
                    7, 8, 9, 9, 10, 11, 12, 13, 14, 14, 14, 14, 14, //
                    7, 8, 9, 9, 10, 11, 12, 13, 14, 14, 14, 14, 14,
                ],
            )
        } else {
            let mut bsize = 1u32;
            for thresholds in &mut lf_thresholds {
                let count = bitstream.read_bits(4)?;
                bsize *= count + 1;
                for _ in 0..count {
                    // The last branch reads a full 32-bit field, so the
                    // offset add may wrap.
                    let t = match bitstream.read_bits(2)? {
                        0 => bitstream.read_bits(4)?,
                        1 => 16 + bitstream.read_bits(8)?,
                        2 => 272 + bitstream.read_bits(16)?,
                        _ => 65808u32.wrapping_add(bitstream.read_bits(32)?),
                    };
                    thresholds.push(hematite_bitstream::unpack_signed(t));
                }
            }
            let count = bitstream.read_bits(4)?;
            bsize *= count + 1;
            for _ in 0..count {
                let t = bitstream.read_u32(Bits(2), 4 + Bits(3), 12 + Bits(5), 44 + Bits(8))?;
                qf_thresholds.push(1 + t);
            }

            if bsize > 64 {
                return Err(BitstreamError::ValidationFailed("too many HF block contexts").into());
            }

            let (num_clusters, ctx_map) = hematite_coding::read_clusters(bitstream, bsize * 39)?;
            if num_clusters > 16 {
                return Err(
                    BitstreamError::ValidationFailed("too many HF block clusters").into(),
                );
            }
            (num_clusters, ctx_map)
        };

        Ok(Self {
            qf_thresholds,
            lf_thresholds,
            block_ctx_map,
            num_block_clusters,
        })
    }
}

impl HfBlockContext {
    /// Number of `(LF bucket, QF bucket)` combinations per DctSelect class.
    pub fn lf_idx_mul(&self) -> usize {
        (self.lf_thresholds[0].len() + 1)
            * (self.lf_thresholds[1].len() + 1)
            * (self.lf_thresholds[2].len() + 1)
    }

    pub fn qf_idx_mul(&self) -> usize {
        self.qf_thresholds.len() + 1
    }
}
