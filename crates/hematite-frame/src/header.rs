//! Frame header parsing.

use hematite_bitstream::{unpack_signed, Bits, Bitstream, Bundle, Error as BitstreamError, Name};
use hematite_image::ImageHeader;

use crate::filter::RestorationFilter;
use crate::Result;

#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum FrameType {
    #[default]
    Regular = 0,
    LfFrame,
    ReferenceOnly,
    SkipProgressive,
}

impl FrameType {
    #[inline]
    pub fn is_normal_frame(self) -> bool {
        matches!(self, Self::Regular | Self::SkipProgressive)
    }
}

#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum Encoding {
    #[default]
    VarDct = 0,
    Modular,
}

/// Frame feature flags.
#[derive(Debug, Default, Copy, Clone)]
pub struct FrameFlags(pub u64);

impl FrameFlags {
    const NOISE: u64 = 0x1;
    const PATCHES: u64 = 0x2;
    const SPLINES: u64 = 0x10;
    const USE_LF_FRAME: u64 = 0x20;
    const SKIP_ADAPTIVE_LF_SMOOTHING: u64 = 0x80;

    pub fn noise(self) -> bool {
        self.0 & Self::NOISE != 0
    }

    pub fn patches(self) -> bool {
        self.0 & Self::PATCHES != 0
    }

    pub fn splines(self) -> bool {
        self.0 & Self::SPLINES != 0
    }

    pub fn use_lf_frame(self) -> bool {
        self.0 & Self::USE_LF_FRAME != 0
    }

    pub fn skip_adaptive_lf_smoothing(self) -> bool {
        self.0 & Self::SKIP_ADAPTIVE_LF_SMOOTHING != 0
    }
}

#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum BlendMode {
    #[default]
    Replace = 0,
    Add,
    Blend,
    MulAdd,
    Mul,
}

#[derive(Debug, Clone)]
pub struct BlendingInfo {
    pub mode: BlendMode,
    pub alpha_channel: u32,
    pub clamp: bool,
    pub source: u32,
}

#[derive(Debug, Clone)]
pub struct Passes {
    pub num_passes: u32,
    pub num_ds: u32,
    pub shift: Vec<u32>,
    pub downsample: Vec<u32>,
    pub last_pass: Vec<u32>,
}

impl Default for Passes {
    fn default() -> Self {
        Self {
            num_passes: 1,
            num_ds: 0,
            shift: Vec::new(),
            downsample: Vec::new(),
            last_pass: Vec::new(),
        }
    }
}

impl<Ctx> Bundle<Ctx> for Passes {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> Result<Self> {
        let num_passes = bitstream.read_u32(1, 2, 3, 4 + Bits(3))?;
        if num_passes == 1 {
            return Ok(Self::default());
        }
        let num_ds = bitstream.read_u32(0, 1, 2, 3 + Bits(1))?;
        let shift = (0..num_passes - 1)
            .map(|_| bitstream.read_bits(2))
            .collect::<std::result::Result<_, _>>()?;
        let downsample = (0..num_ds)
            .map(|_| bitstream.read_u32(1, 2, 4, 8))
            .collect::<std::result::Result<_, _>>()?;
        let last_pass = (0..num_ds)
            .map(|_| bitstream.read_u32(0, 1, 2, Bits(3)))
            .collect::<std::result::Result<_, _>>()?;
        Ok(Self {
            num_passes,
            num_ds,
            shift,
            downsample,
            last_pass,
        })
    }
}

/// Parsed frame header.
///
/// Every field the syntax defines is read; features this decoder does not
/// implement are rejected by [`FrameHeader::check_supported`].
#[derive(Debug)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub encoding: Encoding,
    pub flags: FrameFlags,
    pub do_ycbcr: bool,
    pub jpeg_upsampling: [u32; 3],
    pub upsampling: u32,
    pub ec_upsampling: Vec<u32>,
    pub group_size_shift: u32,
    pub x_qm_scale: u32,
    pub b_qm_scale: u32,
    pub passes: Passes,
    pub lf_level: u32,
    pub have_crop: bool,
    pub x0: i32,
    pub y0: i32,
    pub width: u32,
    pub height: u32,
    pub blending_info: BlendingInfo,
    pub ec_blending_info: Vec<BlendingInfo>,
    pub duration: u32,
    pub timecode: u32,
    pub is_last: bool,
    pub save_as_reference: u32,
    pub resets_canvas: bool,
    pub save_before_ct: bool,
    pub name: Name,
    pub restoration_filter: RestorationFilter,
    /// Number of colour channels coded in this frame.
    pub encoded_color_channels: usize,
}

impl Bundle<&ImageHeader> for FrameHeader {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, image_header: &ImageHeader) -> Result<Self> {
        let metadata = &image_header.metadata;
        let num_ec = metadata.ec_info.len();
        let all_default = bitstream.read_bool()?;

        let frame_type = if all_default {
            FrameType::Regular
        } else {
            match bitstream.read_bits(2)? {
                0 => FrameType::Regular,
                1 => FrameType::LfFrame,
                2 => FrameType::ReferenceOnly,
                _ => FrameType::SkipProgressive,
            }
        };
        let encoding = if all_default {
            Encoding::VarDct
        } else if bitstream.read_bool()? {
            Encoding::Modular
        } else {
            Encoding::VarDct
        };
        let flags = if all_default {
            FrameFlags::default()
        } else {
            FrameFlags(bitstream.read_u64()?)
        };

        let do_ycbcr = if !all_default && !metadata.xyb_encoded {
            bitstream.read_bool()?
        } else {
            false
        };
        let mut jpeg_upsampling = [0u32; 3];
        if do_ycbcr && !flags.use_lf_frame() {
            for value in &mut jpeg_upsampling {
                *value = bitstream.read_bits(2)?;
            }
        }

        let (upsampling, ec_upsampling) = if !all_default && !flags.use_lf_frame() {
            let upsampling = bitstream.read_u32(1, 2, 4, 8)?;
            let ec_upsampling = (0..num_ec)
                .map(|_| bitstream.read_u32(1, 2, 4, 8))
                .collect::<std::result::Result<_, _>>()?;
            (upsampling, ec_upsampling)
        } else {
            (1, vec![1; num_ec])
        };

        let group_size_shift = if encoding == Encoding::Modular {
            bitstream.read_bits(2)?
        } else {
            1
        };

        let qm_signaled = !all_default && metadata.xyb_encoded && encoding == Encoding::VarDct;
        let x_qm_scale = if qm_signaled {
            bitstream.read_bits(3)?
        } else if metadata.xyb_encoded && encoding == Encoding::VarDct {
            3
        } else {
            2
        };
        let b_qm_scale = if qm_signaled { bitstream.read_bits(3)? } else { 2 };

        let passes = if !all_default && frame_type != FrameType::ReferenceOnly {
            Passes::parse(bitstream, ())?
        } else {
            Passes::default()
        };

        let lf_level = if frame_type == FrameType::LfFrame {
            1 + bitstream.read_bits(2)?
        } else {
            0
        };

        let have_crop = if !all_default && frame_type != FrameType::LfFrame {
            bitstream.read_bool()?
        } else {
            false
        };
        let (mut x0, mut y0) = (0i32, 0i32);
        if have_crop && frame_type != FrameType::ReferenceOnly {
            x0 = unpack_signed(bitstream.read_u32(
                Bits(8),
                256 + Bits(11),
                2304 + Bits(14),
                18688 + Bits(30),
            )?);
            y0 = unpack_signed(bitstream.read_u32(
                Bits(8),
                256 + Bits(11),
                2304 + Bits(14),
                18688 + Bits(30),
            )?);
        }
        let (width, height) = if have_crop {
            (
                bitstream.read_u32(Bits(8), 256 + Bits(11), 2304 + Bits(14), 18688 + Bits(30))?,
                bitstream.read_u32(Bits(8), 256 + Bits(11), 2304 + Bits(14), 18688 + Bits(30))?,
            )
        } else {
            (image_header.size.width, image_header.size.height)
        };

        let full_frame = !have_crop
            || (x0 <= 0
                && y0 <= 0
                && x0 as i64 + width as i64 >= image_header.size.width as i64
                && y0 as i64 + height as i64 >= image_header.size.height as i64);

        let parse_blending_info =
            |bitstream: &mut Bitstream, outer_mode: Option<BlendMode>| -> Result<BlendingInfo> {
                let mode = match bitstream.read_u32(0, 1, 2, 3 + Bits(2))? {
                    0 => BlendMode::Replace,
                    1 => BlendMode::Add,
                    2 => BlendMode::Blend,
                    3 => BlendMode::MulAdd,
                    4 => BlendMode::Mul,
                    value => {
                        return Err(BitstreamError::InvalidEnum {
                            name: "BlendMode",
                            value,
                        }
                        .into())
                    }
                };
                let uses_alpha = matches!(mode, BlendMode::Blend | BlendMode::MulAdd);
                let alpha_channel = if num_ec > 0 && uses_alpha {
                    bitstream.read_u32(0, 1, 2, 3 + Bits(3))?
                } else {
                    0
                };
                let clamp = if (num_ec > 0 && uses_alpha) || mode == BlendMode::Mul {
                    bitstream.read_bool()?
                } else {
                    false
                };
                let canvas_mode = outer_mode.unwrap_or(mode);
                let source = if !(canvas_mode == BlendMode::Replace && full_frame) {
                    bitstream.read_bits(2)?
                } else {
                    0
                };
                Ok(BlendingInfo {
                    mode,
                    alpha_channel,
                    clamp,
                    source,
                })
            };

        let (blending_info, ec_blending_info) = if !all_default && frame_type.is_normal_frame() {
            let blending_info = parse_blending_info(bitstream, None)?;
            let mode = blending_info.mode;
            let ec = (0..num_ec)
                .map(|_| parse_blending_info(bitstream, Some(mode)))
                .collect::<Result<Vec<_>>>()?;
            (blending_info, ec)
        } else {
            let default = BlendingInfo {
                mode: BlendMode::Replace,
                alpha_channel: 0,
                clamp: false,
                source: 0,
            };
            (default.clone(), vec![default; num_ec])
        };

        let (duration, timecode) = if !all_default && frame_type.is_normal_frame() {
            let duration = if metadata.animation.is_some() {
                bitstream.read_u32(0, 1, Bits(8), Bits(32))?
            } else {
                0
            };
            let timecode = if metadata
                .animation
                .as_ref()
                .is_some_and(|a| a.have_timecodes)
            {
                bitstream.read_bits(32)?
            } else {
                0
            };
            (duration, timecode)
        } else {
            (0, 0)
        };

        let is_last = if !all_default && frame_type.is_normal_frame() {
            bitstream.read_bool()?
        } else {
            frame_type == FrameType::Regular
        };

        let save_as_reference = if !all_default && frame_type != FrameType::LfFrame && !is_last {
            bitstream.read_bits(2)?
        } else {
            0
        };

        let resets_canvas = blending_info.mode == BlendMode::Replace && full_frame;

        let save_before_ct = if !all_default
            && (frame_type == FrameType::ReferenceOnly
                || (resets_canvas
                    && !is_last
                    && (duration == 0 || save_as_reference != 0)
                    && frame_type != FrameType::LfFrame))
        {
            bitstream.read_bool()?
        } else {
            !frame_type.is_normal_frame()
        };

        let name = if all_default {
            Name::default()
        } else {
            Name::parse(bitstream, ())?
        };

        let restoration_filter = if all_default {
            RestorationFilter::default()
        } else {
            RestorationFilter::parse(bitstream, encoding)?
        };

        if !all_default {
            hematite_image::skip_extensions(bitstream)?;
        }

        let encoded_color_channels = if encoding == Encoding::Modular
            && !do_ycbcr
            && !metadata.xyb_encoded
            && metadata.grayscale()
        {
            1
        } else {
            3
        };

        Ok(Self {
            frame_type,
            encoding,
            flags,
            do_ycbcr,
            jpeg_upsampling,
            upsampling,
            ec_upsampling,
            group_size_shift,
            x_qm_scale,
            b_qm_scale,
            passes,
            lf_level,
            have_crop,
            x0,
            y0,
            width,
            height,
            blending_info,
            ec_blending_info,
            duration,
            timecode,
            is_last,
            save_as_reference,
            resets_canvas,
            save_before_ct,
            name,
            restoration_filter,
            encoded_color_channels,
        })
    }
}

impl FrameHeader {
    /// Rejects syntactically valid frames that use features outside this
    /// decoder's scope.
    pub fn check_supported(&self) -> Result<()> {
        let unsupported = |what: &'static str| -> Result<()> {
            tracing::error!(what, "unsupported frame feature");
            Err(BitstreamError::Unsupported(what).into())
        };

        if !self.frame_type.is_normal_frame() {
            return unsupported("non-regular frames");
        }
        if self.flags.patches() {
            return unsupported("patches");
        }
        if self.flags.splines() {
            return unsupported("splines");
        }
        if self.flags.noise() {
            return unsupported("noise synthesis");
        }
        if self.flags.use_lf_frame() {
            return unsupported("LF frame reuse");
        }
        if self.do_ycbcr {
            return unsupported("YCbCr frames");
        }
        if self.upsampling != 1 || self.ec_upsampling.iter().any(|&u| u != 1) {
            return unsupported("upsampling");
        }
        if self.passes.num_passes != 1 {
            return unsupported("progressive passes");
        }
        if !self.resets_canvas || self.blending_info.mode != BlendMode::Replace {
            return unsupported("frame blending");
        }
        if self
            .ec_blending_info
            .iter()
            .any(|info| info.mode != BlendMode::Replace)
        {
            return unsupported("extra channel blending");
        }
        if !self.is_last {
            return unsupported("reference frames");
        }
        Ok(())
    }

    #[inline]
    pub fn group_dim(&self) -> u32 {
        128 << self.group_size_shift
    }

    #[inline]
    pub fn lf_group_dim(&self) -> u32 {
        self.group_dim() * 8
    }

    pub fn groups_per_row(&self) -> u32 {
        self.width.div_ceil(self.group_dim())
    }

    pub fn num_groups(&self) -> u32 {
        self.groups_per_row() * self.height.div_ceil(self.group_dim())
    }

    pub fn lf_groups_per_row(&self) -> u32 {
        self.width.div_ceil(self.lf_group_dim())
    }

    pub fn num_lf_groups(&self) -> u32 {
        self.lf_groups_per_row() * self.height.div_ceil(self.lf_group_dim())
    }

    /// Size of the given group in pixels, clipped at the frame edges.
    pub fn group_size_for(&self, group_idx: u32) -> (u32, u32) {
        self.clipped_size(self.group_dim(), group_idx, self.groups_per_row())
    }

    pub fn lf_group_size_for(&self, lf_group_idx: u32) -> (u32, u32) {
        self.clipped_size(self.lf_group_dim(), lf_group_idx, self.lf_groups_per_row())
    }

    fn clipped_size(&self, dim: u32, idx: u32, per_row: u32) -> (u32, u32) {
        let col = idx % per_row;
        let row = idx / per_row;
        let width = (self.width - col * dim).min(dim);
        let height = (self.height - row * dim).min(dim);
        (width, height)
    }

    /// LF group covering the given group.
    pub fn lf_group_idx_from_group_idx(&self, group_idx: u32) -> u32 {
        let per_row = self.groups_per_row();
        let lf_col = (group_idx % per_row) / 8;
        let lf_row = (group_idx / per_row) / 8;
        lf_row * self.lf_groups_per_row() + lf_col
    }
}
