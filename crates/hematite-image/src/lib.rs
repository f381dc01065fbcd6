//! JPEG XL image header parsing for jxl-hematite.
//!
//! The image header sits at the start of the codestream and carries the
//! image size plus [`ImageMetadata`]: bit depth, extra channel descriptors,
//! colour encoding, tone mapping and the opsin inverse matrix.

use hematite_bitstream::{Bits, Bitstream, Bundle, Error, Name, Result};
use hematite_color::{ColourEncoding, OpsinInverseMatrix, ToneMapping};

/// Level 5 ceilings on the image dimensions.
const MAX_DIMENSION: u64 = 1 << 18;
const MAX_PIXELS: u64 = 1 << 28;

/// Parsed image header: size and metadata.
#[derive(Debug)]
pub struct ImageHeader {
    pub size: SizeHeader,
    pub metadata: ImageMetadata,
}

impl<Ctx> Bundle<Ctx> for ImageHeader {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        let signature = bitstream.read_bits(16)?;
        if signature != 0x0aff {
            return Err(Error::InvalidSignature);
        }

        let size = SizeHeader::parse(bitstream, ())?;
        if size.width == 0 || size.height == 0 {
            return Err(Error::ValidationFailed("zero image dimension"));
        }
        if size.width as u64 > MAX_DIMENSION
            || size.height as u64 > MAX_DIMENSION
            || size.width as u64 * size.height as u64 > MAX_PIXELS
        {
            tracing::error!(size.width, size.height, "image too large for level 5");
            return Err(Error::ProfileConformance("image too large"));
        }

        let metadata = ImageMetadata::parse(bitstream, ())?;
        if metadata.tone_mapping.intensity_target <= 0.0 {
            return Err(Error::ValidationFailed("invalid intensity target"));
        }

        Ok(Self { size, metadata })
    }
}

/// Image dimensions, with the shared aspect-ratio shorthand.
#[derive(Debug, Clone, Copy)]
pub struct SizeHeader {
    pub width: u32,
    pub height: u32,
}

impl<Ctx> Bundle<Ctx> for SizeHeader {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        let div8 = bitstream.read_bool()?;
        let height = if div8 {
            8 * (1 + bitstream.read_bits(5)?)
        } else {
            bitstream.read_u32(
                1 + Bits(9),
                1 + Bits(13),
                1 + Bits(18),
                1 + Bits(30),
            )?
        };
        let ratio = bitstream.read_bits(3)?;
        let width = match ratio {
            0 if div8 => 8 * (1 + bitstream.read_bits(5)?),
            0 => bitstream.read_u32(
                1 + Bits(9),
                1 + Bits(13),
                1 + Bits(18),
                1 + Bits(30),
            )?,
            ratio => width_from_ratio(ratio, height),
        };
        Ok(Self { width, height })
    }
}

fn width_from_ratio(ratio: u32, height: u32) -> u32 {
    let height = height as u64;
    let width = match ratio {
        1 => height,
        2 => height * 12 / 10,
        3 => height * 4 / 3,
        4 => height * 3 / 2,
        5 => height * 16 / 9,
        6 => height * 5 / 4,
        7 => height * 2,
        _ => unreachable!(),
    };
    width.min(u32::MAX as u64) as u32
}

/// Ticks-per-second information for animated images.
#[derive(Debug, Clone)]
pub struct AnimationHeader {
    pub tps_numerator: u32,
    pub tps_denominator: u32,
    pub num_loops: u32,
    pub have_timecodes: bool,
}

impl<Ctx> Bundle<Ctx> for AnimationHeader {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        Ok(Self {
            tps_numerator: bitstream.read_u32(100, 1000, 1 + Bits(10), 1 + Bits(30))?,
            tps_denominator: bitstream.read_u32(1, 1001, 1 + Bits(8), 1 + Bits(10))?,
            num_loops: bitstream.read_u32(0, Bits(3), Bits(16), Bits(32))?,
            have_timecodes: bitstream.read_bool()?,
        })
    }
}

/// Size of the preview frame.
#[derive(Debug, Clone, Copy)]
pub struct PreviewHeader {
    pub width: u32,
    pub height: u32,
}

impl<Ctx> Bundle<Ctx> for PreviewHeader {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        let div8 = bitstream.read_bool()?;
        let height = if div8 {
            8 * bitstream.read_u32(16, 32, 1 + Bits(5), 33 + Bits(9))?
        } else {
            bitstream.read_u32(1 + Bits(6), 65 + Bits(8), 321 + Bits(10), 1345 + Bits(12))?
        };
        let ratio = bitstream.read_bits(3)?;
        let width = match ratio {
            0 if div8 => 8 * bitstream.read_u32(16, 32, 1 + Bits(5), 33 + Bits(9))?,
            0 => bitstream.read_u32(1 + Bits(6), 65 + Bits(8), 321 + Bits(10), 1345 + Bits(12))?,
            ratio => width_from_ratio(ratio, height),
        };
        Ok(Self { width, height })
    }
}

/// Extension fields; their payloads are skipped.
pub fn skip_extensions(bitstream: &mut Bitstream) -> Result<()> {
    let extensions = bitstream.read_u64()?;
    if extensions == 0 {
        return Ok(());
    }
    let mut total_bits = 0u64;
    for bit in 0..64 {
        if extensions & (1 << bit) != 0 {
            let bits = bitstream.read_u64()?;
            total_bits = total_bits
                .checked_add(bits)
                .ok_or(Error::ProfileConformance("extension payload too large"))?;
        }
    }
    bitstream.skip_bits(total_bits)
}

/// Image-wide metadata.
#[derive(Debug)]
pub struct ImageMetadata {
    pub orientation: u32,
    pub intrinsic_size: Option<SizeHeader>,
    pub preview: Option<PreviewHeader>,
    pub animation: Option<AnimationHeader>,
    pub bit_depth: BitDepth,
    pub modular_16bit_buffers: bool,
    pub ec_info: Vec<ExtraChannelInfo>,
    pub xyb_encoded: bool,
    pub colour_encoding: ColourEncoding,
    pub tone_mapping: ToneMapping,
    pub opsin_inverse_matrix: OpsinInverseMatrix,
}

impl Default for ImageMetadata {
    fn default() -> Self {
        Self {
            orientation: 1,
            intrinsic_size: None,
            preview: None,
            animation: None,
            bit_depth: BitDepth::default(),
            modular_16bit_buffers: true,
            ec_info: Vec::new(),
            xyb_encoded: true,
            colour_encoding: ColourEncoding::default(),
            tone_mapping: ToneMapping::default(),
            opsin_inverse_matrix: OpsinInverseMatrix::default(),
        }
    }
}

impl<Ctx> Bundle<Ctx> for ImageMetadata {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        let mut meta = Self::default();

        let all_default = bitstream.read_bool()?;
        if !all_default {
            let extra_fields = bitstream.read_bool()?;
            if extra_fields {
                meta.orientation = 1 + bitstream.read_bits(3)?;
                if bitstream.read_bool()? {
                    meta.intrinsic_size = Some(SizeHeader::parse(bitstream, ())?);
                }
                if bitstream.read_bool()? {
                    meta.preview = Some(PreviewHeader::parse(bitstream, ())?);
                }
                if bitstream.read_bool()? {
                    meta.animation = Some(AnimationHeader::parse(bitstream, ())?);
                }
            }

            meta.bit_depth = BitDepth::parse(bitstream, ())?;
            meta.modular_16bit_buffers = bitstream.read_bool()?;

            let num_extra = bitstream.read_u32(0, 1, 2 + Bits(4), 1 + Bits(12))?;
            if num_extra > 4 {
                return Err(Error::ProfileConformance("too many extra channels"));
            }
            meta.ec_info = (0..num_extra)
                .map(|_| ExtraChannelInfo::parse(bitstream, ()))
                .collect::<Result<Vec<_>>>()?;

            meta.xyb_encoded = bitstream.read_bool()?;
            meta.colour_encoding = ColourEncoding::parse(bitstream, ())?;
            if extra_fields {
                meta.tone_mapping = ToneMapping::parse(bitstream, ())?;
            }
            skip_extensions(bitstream)?;
        }

        let default_m = bitstream.read_bool()?;
        if !default_m {
            if meta.xyb_encoded {
                meta.opsin_inverse_matrix = OpsinInverseMatrix::parse(bitstream, ())?;
            }
            let cw_mask = bitstream.read_bits(3)?;
            // Custom upsampling weights; upsampling itself is unsupported,
            // so the values are consumed and dropped.
            for (bit, count) in [(1, 15), (2, 55), (4, 210)] {
                if cw_mask & bit != 0 {
                    for _ in 0..count {
                        bitstream.read_f16_as_f32()?;
                    }
                }
            }
        }

        Ok(meta)
    }
}

impl ImageMetadata {
    /// Returns whether the image is grayscale.
    #[inline]
    pub fn grayscale(&self) -> bool {
        self.colour_encoding.colour_space == hematite_color::ColourSpace::Grey
    }

    /// Number of colour channels actually encoded in the codestream.
    #[inline]
    pub fn encoded_color_channels(&self) -> usize {
        if !self.xyb_encoded && self.grayscale() {
            1
        } else {
            3
        }
    }

    /// Index of the first alpha channel, if any.
    pub fn alpha(&self) -> Option<usize> {
        self.ec_info
            .iter()
            .position(|info| matches!(info.ty, ExtraChannelType::Alpha { .. }))
    }

    /// Size of the displayed image after orientation.
    pub fn oriented_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.orientation >= 5 {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Source position that the displayed position `(x, y)` reads from,
    /// given the source (pre-orientation) dimensions.
    pub fn source_position(&self, width: u32, height: u32, x: u32, y: u32) -> (u32, u32) {
        match self.orientation {
            1 => (x, y),
            2 => (width - x - 1, y),
            3 => (width - x - 1, height - y - 1),
            4 => (x, height - y - 1),
            5 => (y, x),
            // 90-degree clockwise rotation on display.
            6 => (y, height - x - 1),
            7 => (width - y - 1, height - x - 1),
            8 => (width - y - 1, x),
            _ => unreachable!(),
        }
    }
}

/// Descriptor of one extra channel.
#[derive(Debug, Clone)]
pub struct ExtraChannelInfo {
    pub ty: ExtraChannelType,
    pub bit_depth: BitDepth,
    pub dim_shift: u32,
    pub name: Name,
}

impl Default for ExtraChannelInfo {
    fn default() -> Self {
        Self {
            ty: ExtraChannelType::Alpha {
                alpha_associated: false,
            },
            bit_depth: BitDepth::default(),
            dim_shift: 0,
            name: Name::default(),
        }
    }
}

impl<Ctx> Bundle<Ctx> for ExtraChannelInfo {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        if bitstream.read_bool()? {
            // Default: 8-bit unassociated alpha.
            return Ok(Self::default());
        }

        let ty_id = bitstream.read_u32(0, 1, 2 + Bits(4), 18 + Bits(6))?;
        let bit_depth = BitDepth::parse(bitstream, ())?;
        let dim_shift = bitstream.read_u32(0, 3, 4, 1 + Bits(3))?;
        let name = Name::parse(bitstream, ())?;

        let ty = match ty_id {
            0 => ExtraChannelType::Alpha {
                alpha_associated: bitstream.read_bool()?,
            },
            1 => ExtraChannelType::Depth,
            2 => ExtraChannelType::SpotColour {
                red: bitstream.read_f16_as_f32()?,
                green: bitstream.read_f16_as_f32()?,
                blue: bitstream.read_f16_as_f32()?,
                solidity: bitstream.read_f16_as_f32()?,
            },
            3 => ExtraChannelType::SelectionMask,
            4 => ExtraChannelType::Black,
            5 => ExtraChannelType::Cfa {
                cfa_channel: bitstream.read_u32(1, Bits(2), 3 + Bits(4), 19 + Bits(8))?,
            },
            6 => ExtraChannelType::Thermal,
            15 => ExtraChannelType::NonOptional,
            16 => ExtraChannelType::Optional,
            value => {
                return Err(Error::InvalidEnum {
                    name: "ExtraChannelType",
                    value,
                })
            }
        };

        Ok(Self {
            ty,
            bit_depth,
            dim_shift,
            name,
        })
    }
}

impl ExtraChannelInfo {
    #[inline]
    pub fn is_alpha(&self) -> bool {
        matches!(self.ty, ExtraChannelType::Alpha { .. })
    }

    #[inline]
    pub fn alpha_associated(&self) -> bool {
        matches!(
            self.ty,
            ExtraChannelType::Alpha {
                alpha_associated: true
            }
        )
    }
}

/// Type of an extra channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtraChannelType {
    Alpha {
        alpha_associated: bool,
    },
    Depth,
    SpotColour {
        red: f32,
        green: f32,
        blue: f32,
        solidity: f32,
    },
    SelectionMask,
    Black,
    Cfa {
        cfa_channel: u32,
    },
    Thermal,
    NonOptional,
    Optional,
}

/// Sample interpretation of integer channel values.
#[derive(Debug, Clone, Copy)]
pub enum BitDepth {
    Integer { bits_per_sample: u32 },
    Float { bits_per_sample: u32, exp_bits: u32 },
}

impl Default for BitDepth {
    fn default() -> Self {
        Self::Integer { bits_per_sample: 8 }
    }
}

impl<Ctx> Bundle<Ctx> for BitDepth {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        Ok(if bitstream.read_bool()? {
            let bits_per_sample = bitstream.read_u32(32, 16, 24, 1 + Bits(6))?;
            let exp_bits = 1 + bitstream.read_bits(4)?;
            Self::Float {
                bits_per_sample,
                exp_bits,
            }
        } else {
            let bits_per_sample = bitstream.read_u32(8, 10, 12, 1 + Bits(6))?;
            Self::Integer { bits_per_sample }
        })
    }
}

impl BitDepth {
    #[inline]
    pub fn bits_per_sample(self) -> u32 {
        match self {
            Self::Integer { bits_per_sample } | Self::Float { bits_per_sample, .. } => {
                bits_per_sample
            }
        }
    }

    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, Self::Float { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_by_one_size_header() {
        // div8 = 0, height = 1 (selector 0, 9 bits of 0), ratio = 1 (square).
        let mut bytes = [0u8; 4];
        // Bits in order: 0, 00, 000000000, 100 -> bit 12 is set.
        bytes[1] = 0b0001_0000;
        let mut bitstream = Bitstream::new(&bytes);
        let size = SizeHeader::parse(&mut bitstream, ()).unwrap();
        assert_eq!((size.width, size.height), (1, 1));
    }

    #[test]
    fn orientation_flips() {
        let meta = ImageMetadata {
            orientation: 2,
            ..Default::default()
        };
        assert_eq!(meta.oriented_size(4, 3), (4, 3));
        assert_eq!(meta.source_position(4, 3, 0, 0), (3, 0));

        let meta = ImageMetadata {
            orientation: 5,
            ..Default::default()
        };
        assert_eq!(meta.oriented_size(4, 3), (3, 4));
        assert_eq!(meta.source_position(4, 3, 1, 2), (2, 1));
    }

    #[test]
    fn orientation_rotation_round_trips() {
        // Every display position of a rotated 3x2 image must map to a
        // distinct in-bounds source position.
        for orientation in 1..=8 {
            let meta = ImageMetadata {
                orientation,
                ..Default::default()
            };
            let (ow, oh) = meta.oriented_size(3, 2);
            let mut seen = [[false; 2]; 3];
            for y in 0..oh {
                for x in 0..ow {
                    let (sx, sy) = meta.source_position(3, 2, x, y);
                    assert!(sx < 3 && sy < 2, "orientation {orientation}");
                    assert!(!seen[sx as usize][sy as usize]);
                    seen[sx as usize][sy as usize] = true;
                }
            }
        }
    }
}
