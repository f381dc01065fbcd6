//! Restoration filter parameters: gaborish and the edge-preserving filter.

use hematite_bitstream::{Bitstream, Bundle, Error as BitstreamError};

use crate::header::Encoding;
use crate::Result;

#[derive(Debug, Clone)]
pub struct RestorationFilter {
    pub gabor: Gabor,
    pub epf: EdgePreservingFilter,
}

impl Default for RestorationFilter {
    fn default() -> Self {
        Self {
            gabor: Gabor::default(),
            epf: EdgePreservingFilter::default(),
        }
    }
}

impl Bundle<Encoding> for RestorationFilter {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, encoding: Encoding) -> Result<Self> {
        if bitstream.read_bool()? {
            return Ok(Self::default());
        }
        let gabor = Gabor::parse(bitstream, ())?;
        let epf = EdgePreservingFilter::parse(bitstream, encoding)?;
        hematite_image::skip_extensions(bitstream)?;
        Ok(Self { gabor, epf })
    }
}

/// Gaborish sharpening convolution, with per-channel side and diagonal
/// weights.
#[derive(Debug, Clone)]
pub enum Gabor {
    Disabled,
    Enabled([[f32; 2]; 3]),
}

impl Default for Gabor {
    fn default() -> Self {
        Self::Enabled([[0.115169525, 0.061248592]; 3])
    }
}

impl Gabor {
    #[inline]
    pub fn enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }
}

impl<Ctx> Bundle<Ctx> for Gabor {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        if !bitstream.read_bool()? {
            return Ok(Self::Disabled);
        }
        if !bitstream.read_bool()? {
            return Ok(Self::default());
        }

        let mut weights = [[0.0f32; 2]; 3];
        for channel in &mut weights {
            for weight in channel.iter_mut() {
                *weight = bitstream.read_f16_as_f32()?;
            }
            // The kernel is normalized by 1 + 4*(w1 + w2); that sum must not
            // vanish.
            if (1.0 + (channel[0] + channel[1]) * 4.0).abs() < f32::EPSILON {
                return Err(
                    BitstreamError::ValidationFailed("gaborish kernel sums to zero").into(),
                );
            }
        }
        Ok(Self::Enabled(weights))
    }
}

#[derive(Debug, Clone)]
pub enum EdgePreservingFilter {
    Disabled,
    Enabled(EpfParams),
}

impl Default for EdgePreservingFilter {
    fn default() -> Self {
        Self::Enabled(EpfParams::default())
    }
}

impl EdgePreservingFilter {
    #[inline]
    pub fn enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }
}

#[derive(Debug, Clone)]
pub struct EpfParams {
    pub iters: u32,
    pub sharp_lut: [f32; 8],
    pub channel_scale: [f32; 3],
    pub quant_mul: f32,
    pub pass0_sigma_scale: f32,
    pub pass2_sigma_scale: f32,
    pub border_sad_mul: f32,
    pub sigma_for_modular: f32,
}

const EPF_SHARP_LUT_DEFAULT: [f32; 8] = [
    0.0,
    1.0 / 7.0,
    2.0 / 7.0,
    3.0 / 7.0,
    4.0 / 7.0,
    5.0 / 7.0,
    6.0 / 7.0,
    1.0,
];

impl Default for EpfParams {
    fn default() -> Self {
        Self {
            iters: 2,
            sharp_lut: EPF_SHARP_LUT_DEFAULT,
            channel_scale: [40.0, 5.0, 3.5],
            quant_mul: 0.46,
            pass0_sigma_scale: 0.9,
            pass2_sigma_scale: 6.5,
            border_sad_mul: 2.0 / 3.0,
            sigma_for_modular: 1.0,
        }
    }
}

impl Bundle<Encoding> for EdgePreservingFilter {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, encoding: Encoding) -> Result<Self> {
        let iters = bitstream.read_bits(2)?;
        if iters == 0 {
            return Ok(Self::Disabled);
        }
        let mut params = EpfParams {
            iters,
            ..EpfParams::default()
        };

        let sharp_custom = if encoding == Encoding::VarDct {
            bitstream.read_bool()?
        } else {
            false
        };
        if sharp_custom {
            for value in &mut params.sharp_lut {
                *value = bitstream.read_f16_as_f32()?;
            }
        }

        if bitstream.read_bool()? {
            for value in &mut params.channel_scale {
                *value = bitstream.read_f16_as_f32()?;
            }
            // An obsolete fourth weight, kept in the syntax.
            bitstream.read_bits(32)?;
        }

        if bitstream.read_bool()? {
            if encoding == Encoding::VarDct {
                params.quant_mul = bitstream.read_f16_as_f32()?;
            }
            params.pass0_sigma_scale = bitstream.read_f16_as_f32()?;
            params.pass2_sigma_scale = bitstream.read_f16_as_f32()?;
            params.border_sad_mul = bitstream.read_f16_as_f32()?;
        }

        if encoding == Encoding::Modular {
            params.sigma_for_modular = bitstream.read_f16_as_f32()?;
            if params.sigma_for_modular < f32::EPSILON {
                return Err(
                    BitstreamError::ValidationFailed("EPF sigma for modular too small").into(),
                );
            }
        }

        Ok(Self::Enabled(params))
    }
}
