//! Colour-related header structures.

use hematite_bitstream::{Bits, Bitstream, Bundle, Error, Result};

/// Colour encoding signaled in the image metadata.
///
/// When the image is XYB encoded this describes the suggested presentation
/// colour space; otherwise it describes the space the samples are already in.
#[derive(Debug, Clone)]
pub struct ColourEncoding {
    pub want_icc: bool,
    pub colour_space: ColourSpace,
    pub white_point: WhitePoint,
    pub primaries: Primaries,
    pub tf: TransferFunction,
    pub rendering_intent: RenderingIntent,
}

impl Default for ColourEncoding {
    fn default() -> Self {
        Self {
            want_icc: false,
            colour_space: ColourSpace::Rgb,
            white_point: WhitePoint::D65,
            primaries: Primaries::Srgb,
            tf: TransferFunction::Srgb,
            rendering_intent: RenderingIntent::Relative,
        }
    }
}

impl<Ctx> Bundle<Ctx> for ColourEncoding {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        let all_default = bitstream.read_bool()?;
        if all_default {
            return Ok(Self::default());
        }

        let want_icc = bitstream.read_bool()?;
        let colour_space = bitstream.read_enum::<ColourSpace>()?;
        if want_icc {
            return Ok(Self {
                want_icc,
                colour_space,
                ..Self::default()
            });
        }

        let white_point = if colour_space == ColourSpace::Xyb {
            WhitePoint::D65
        } else {
            WhitePoint::parse(bitstream, ())?
        };
        let primaries = if matches!(colour_space, ColourSpace::Xyb | ColourSpace::Grey) {
            Primaries::Srgb
        } else {
            Primaries::parse(bitstream, ())?
        };
        let tf = TransferFunction::parse(bitstream, ())?;
        let rendering_intent = bitstream.read_enum::<RenderingIntent>()?;

        Ok(Self {
            want_icc,
            colour_space,
            white_point,
            primaries,
            tf,
            rendering_intent,
        })
    }
}

impl ColourEncoding {
    /// Returns whether this encoding is exactly sRGB.
    #[inline]
    pub fn is_srgb(&self) -> bool {
        !self.want_icc
            && self.colour_space == ColourSpace::Rgb
            && self.white_point == WhitePoint::D65
            && self.primaries == Primaries::Srgb
            && self.tf == TransferFunction::Srgb
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ColourSpace {
    #[default]
    Rgb = 0,
    Grey = 1,
    Xyb = 2,
    Unknown = 3,
}

impl TryFrom<u32> for ColourSpace {
    type Error = ();

    fn try_from(value: u32) -> std::result::Result<Self, ()> {
        Ok(match value {
            0 => Self::Rgb,
            1 => Self::Grey,
            2 => Self::Xyb,
            3 => Self::Unknown,
            _ => return Err(()),
        })
    }
}

/// Signed chromaticity coordinate pair in millionths.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Customxy {
    pub x: i32,
    pub y: i32,
}

impl<Ctx> Bundle<Ctx> for Customxy {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        let mut read = || -> Result<i32> {
            let v = bitstream.read_u32(
                Bits(19),
                524288 + Bits(19),
                1048576 + Bits(20),
                2097152 + Bits(21),
            )?;
            Ok(hematite_bitstream::unpack_signed(v))
        };
        let x = read()?;
        let y = read()?;
        Ok(Self { x, y })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum WhitePoint {
    #[default]
    D65,
    Custom(Customxy),
    E,
    Dci,
}

impl<Ctx> Bundle<Ctx> for WhitePoint {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        Ok(match bitstream.read_u32(0, 1, 2 + Bits(4), 18 + Bits(6))? {
            1 => Self::D65,
            2 => Self::Custom(Customxy::parse(bitstream, ())?),
            10 => Self::E,
            11 => Self::Dci,
            value => {
                return Err(Error::InvalidEnum {
                    name: "WhitePoint",
                    value,
                })
            }
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Primaries {
    #[default]
    Srgb,
    Custom {
        red: Customxy,
        green: Customxy,
        blue: Customxy,
    },
    Bt2100,
    P3,
}

impl<Ctx> Bundle<Ctx> for Primaries {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        Ok(match bitstream.read_u32(0, 1, 2 + Bits(4), 18 + Bits(6))? {
            1 => Self::Srgb,
            2 => Self::Custom {
                red: Customxy::parse(bitstream, ())?,
                green: Customxy::parse(bitstream, ())?,
                blue: Customxy::parse(bitstream, ())?,
            },
            9 => Self::Bt2100,
            11 => Self::P3,
            value => {
                return Err(Error::InvalidEnum {
                    name: "Primaries",
                    value,
                })
            }
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TransferFunction {
    Gamma(u32),
    Bt709,
    Unknown,
    Linear,
    #[default]
    Srgb,
    Pq,
    Dci,
    Hlg,
}

impl<Ctx> Bundle<Ctx> for TransferFunction {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        if bitstream.read_bool()? {
            let gamma = bitstream.read_bits(24)?;
            if gamma == 0 || gamma > 1_000_000 {
                return Err(Error::ValidationFailed("invalid gamma"));
            }
            return Ok(Self::Gamma(gamma));
        }
        Ok(match bitstream.read_u32(0, 1, 2 + Bits(4), 18 + Bits(6))? {
            1 => Self::Bt709,
            2 => Self::Unknown,
            8 => Self::Linear,
            13 => Self::Srgb,
            16 => Self::Pq,
            17 => Self::Dci,
            18 => Self::Hlg,
            value => {
                return Err(Error::InvalidEnum {
                    name: "TransferFunction",
                    value,
                })
            }
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RenderingIntent {
    Perceptual = 0,
    #[default]
    Relative = 1,
    Saturation = 2,
    Absolute = 3,
}

impl TryFrom<u32> for RenderingIntent {
    type Error = ();

    fn try_from(value: u32) -> std::result::Result<Self, ()> {
        Ok(match value {
            0 => Self::Perceptual,
            1 => Self::Relative,
            2 => Self::Saturation,
            3 => Self::Absolute,
            _ => return Err(()),
        })
    }
}

/// HDR-to-SDR tone mapping parameters.
#[derive(Debug, Clone)]
pub struct ToneMapping {
    pub intensity_target: f32,
    pub min_nits: f32,
    pub relative_to_max_display: bool,
    pub linear_below: f32,
}

impl Default for ToneMapping {
    fn default() -> Self {
        Self {
            intensity_target: 255.0,
            min_nits: 0.0,
            relative_to_max_display: false,
            linear_below: 0.0,
        }
    }
}

impl<Ctx> Bundle<Ctx> for ToneMapping {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        if bitstream.read_bool()? {
            return Ok(Self::default());
        }
        Ok(Self {
            intensity_target: bitstream.read_f16_as_f32()?,
            min_nits: bitstream.read_f16_as_f32()?,
            relative_to_max_display: bitstream.read_bool()?,
            linear_below: bitstream.read_f16_as_f32()?,
        })
    }
}

/// Inverse of the opsin absorbance matrix, plus quantization biases.
#[derive(Debug, Clone)]
pub struct OpsinInverseMatrix {
    pub inv_mat: [[f32; 3]; 3],
    pub opsin_bias: [f32; 3],
    pub quant_bias: [f32; 3],
    pub quant_bias_numerator: f32,
}

impl Default for OpsinInverseMatrix {
    fn default() -> Self {
        Self {
            inv_mat: [
                [11.031566901960783, -9.866943921568629, -0.16462299647058826],
                [-3.254147380392157, 4.418770392156863, -0.16462299647058826],
                [-3.6588512862745097, 2.7129230470588235, 1.9459282392156863],
            ],
            opsin_bias: [-0.0037930732552754493; 3],
            quant_bias: [
                1.0 - 0.05465007330715401,
                1.0 - 0.07005449891748593,
                1.0 - 0.049935103337343655,
            ],
            quant_bias_numerator: 0.145,
        }
    }
}

impl<Ctx> Bundle<Ctx> for OpsinInverseMatrix {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        let mut inv_mat = [[0.0f32; 3]; 3];
        for value in inv_mat.iter_mut().flatten() {
            *value = bitstream.read_f16_as_f32()?;
        }
        let mut opsin_bias = [0.0f32; 3];
        for value in &mut opsin_bias {
            *value = bitstream.read_f16_as_f32()?;
        }
        let mut quant_bias = [0.0f32; 3];
        for value in &mut quant_bias {
            *value = bitstream.read_f16_as_f32()?;
        }
        let quant_bias_numerator = bitstream.read_f16_as_f32()?;
        Ok(Self {
            inv_mat,
            opsin_bias,
            quant_bias,
            quant_bias_numerator,
        })
    }
}
