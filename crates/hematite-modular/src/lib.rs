//! JPEG XL Modular image decoder.
//!
//! A Modular image is a set of integer channel grids decoded with a shared
//! entropy stream, a meta-adaptive decision tree and per-sample predictors.
//! Lossless frames are Modular end to end; VarDCT frames also use Modular
//! images for quantized LF data, varblock metadata and dequant matrices.

use hematite_bitstream::{Bits, Bitstream, Bundle};
use hematite_grid::SimpleGrid;

mod error;
mod image;
pub mod ma;
pub mod predictor;
pub mod transform;

pub use error::{Error, Result};
pub use ma::MaConfig;
pub use predictor::{Predictor, WpHeader};
pub use transform::TransformInfo;

/// One decoded channel: a grid of `i32` samples bounded to the 16-bit range,
/// plus its downsampling shifts.
#[derive(Debug, Clone)]
pub struct Channel {
    pub width: u32,
    pub height: u32,
    pub hshift: i32,
    pub vshift: i32,
    pub grid: SimpleGrid<i32>,
}

impl Channel {
    pub fn with_dims(width: u32, height: u32, hshift: i32, vshift: i32) -> Result<Self> {
        let grid = SimpleGrid::try_new(width as usize, height as usize).ok_or(Error::Bitstream(
            hematite_bitstream::Error::ProfileConformance("channel too large"),
        ))?;
        Ok(Self {
            width,
            height,
            hshift,
            vshift,
            grid,
        })
    }

    /// A meta channel generated by a transform; it has no geometry shift.
    pub fn meta(width: u32, height: u32) -> Result<Self> {
        Self::with_dims(width, height, -1, -1)
    }
}

/// Geometry of one channel before transforms.
#[derive(Debug, Clone, Copy)]
pub struct ChannelInfo {
    pub width: u32,
    pub height: u32,
    pub hshift: i32,
    pub vshift: i32,
}

impl ChannelInfo {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            hshift: 0,
            vshift: 0,
        }
    }

    /// Channel stored downsampled by `2^shift` in both directions.
    pub fn with_shift(width: u32, height: u32, shift: i32) -> Self {
        let round = (1u32 << shift) - 1;
        Self {
            width: (width + round) >> shift,
            height: (height + round) >> shift,
            hshift: shift,
            vshift: shift,
        }
    }
}

/// Parameters for parsing a Modular sub-bitstream header.
#[derive(Debug)]
pub struct ModularParams<'a> {
    pub group_dim: u32,
    pub bit_depth: u32,
    pub channels: Vec<ChannelInfo>,
    pub global_ma_config: Option<&'a MaConfig>,
}

/// One Modular sub-bitstream: the channel list actually coded (after the
/// transform chain), its MA tree and entropy configuration.
#[derive(Debug)]
pub struct Modular {
    wp_params: WpHeader,
    transforms: Vec<TransformInfo>,
    ma_config: Option<MaConfig>,
    channels: Vec<Channel>,
    nb_meta_channels: u32,
    group_dim: u32,
    bit_depth: u32,
    dist_mult: u32,
    /// Channels below this index are decoded in the stream that carried the
    /// header; the rest are split over group sections.
    global_channel_end: usize,
}

impl Bundle<ModularParams<'_>> for Modular {
    type Error = Error;

    fn parse(bitstream: &mut Bitstream, params: ModularParams<'_>) -> Result<Self> {
        // An empty channel list encodes nothing, not even a header.
        if params.channels.is_empty() {
            return Ok(Self::empty());
        }

        let use_global_tree = bitstream.read_bool()?;
        let wp_params = WpHeader::parse(bitstream, ())?;
        let nb_transforms = bitstream.read_u32(0, 1, 2 + Bits(4), 18 + Bits(8))?;
        if nb_transforms > 512 {
            tracing::error!(nb_transforms, "too many transforms");
            return Err(
                hematite_bitstream::Error::ProfileConformance("too many transforms").into(),
            );
        }
        let transforms = (0..nb_transforms)
            .map(|_| TransformInfo::parse(bitstream, &wp_params))
            .collect::<Result<Vec<_>>>()?;

        let mut channels = params
            .channels
            .iter()
            .map(|info| Channel::with_dims(info.width, info.height, info.hshift, info.vshift))
            .collect::<Result<Vec<_>>>()?;
        let mut nb_meta_channels = 0u32;
        for transform in &transforms {
            transform.apply_channel_info(&mut channels, &mut nb_meta_channels)?;
        }
        if channels.len() > 1 << 16 {
            tracing::error!(nb_channels = channels.len(), "too many channels");
            return Err(hematite_bitstream::Error::ProfileConformance("too many channels").into());
        }

        let ma_config = if use_global_tree {
            params
                .global_ma_config
                .cloned()
                .ok_or(Error::GlobalMaTreeNotAvailable)?
        } else {
            let total_samples: u64 = channels
                .iter()
                .map(|ch| ch.width as u64 * ch.height as u64)
                .sum();
            let node_limit = (1024 + total_samples / 16).min(1 << 20) as usize;
            MaConfig::parse(bitstream, node_limit)?
        };

        let dist_mult = channels
            .iter()
            .skip(nb_meta_channels as usize)
            .map(|ch| ch.width)
            .max()
            .unwrap_or(0)
            .min(1 << 21);

        let group_dim = params.group_dim;
        let global_channel_end = channels
            .iter()
            .enumerate()
            .position(|(idx, ch)| {
                idx >= nb_meta_channels as usize && (ch.width > group_dim || ch.height > group_dim)
            })
            .unwrap_or(channels.len());

        Ok(Self {
            wp_params,
            transforms,
            ma_config: Some(ma_config),
            channels,
            nb_meta_channels,
            group_dim,
            bit_depth: params.bit_depth,
            dist_mult,
            global_channel_end,
        })
    }
}

impl Modular {
    pub fn empty() -> Self {
        Self {
            wp_params: WpHeader::default(),
            transforms: Vec::new(),
            ma_config: None,
            channels: Vec::new(),
            nb_meta_channels: 0,
            group_dim: 128,
            bit_depth: 8,
            dist_mult: 0,
            global_channel_end: 0,
        }
    }

    /// Decodes every channel from a single entropy stream. Used for
    /// self-contained Modular images such as LF coefficients or varblock
    /// metadata.
    pub fn decode_image(&mut self, bitstream: &mut Bitstream, stream_index: u32) -> Result<()> {
        self.decode_range(bitstream, stream_index, self.channels.len())
    }

    /// Decodes the globally coded channels; the remainder arrive in group
    /// sections via [`decode_group`](Self::decode_group).
    pub fn decode_global(&mut self, bitstream: &mut Bitstream, stream_index: u32) -> Result<()> {
        self.decode_range(bitstream, stream_index, self.global_channel_end)
    }

    /// Returns whether some channels are left to group sections.
    pub fn has_group_channels(&self) -> bool {
        self.global_channel_end < self.channels.len()
    }

    fn decode_range(
        &mut self,
        bitstream: &mut Bitstream,
        stream_index: u32,
        end: usize,
    ) -> Result<()> {
        if self.channels.is_empty() {
            return Ok(());
        }
        let ma_config = self.ma_config.as_ref().expect("non-empty image without MA tree");

        // The entropy stream is present even if every channel of this
        // section is deferred to group sections.
        let mut decoder = ma_config.decoder();
        decoder.begin(bitstream)?;
        let params = image::ChannelDecodeParams {
            ma_config,
            wp_params: &self.wp_params,
            stream_index,
            dist_mult: self.dist_mult,
        };
        for idx in 0..end {
            image::decode_channel(bitstream, &mut decoder, &mut self.channels, idx, &params)?;
        }
        decoder.finalize()?;
        Ok(())
    }

    /// Decodes the group-local sub-bitstream covering group
    /// `(group_x, group_y)`, including its own Modular header.
    pub fn decode_group(
        &mut self,
        bitstream: &mut Bitstream,
        stream_index: u32,
        group_x: u32,
        group_y: u32,
        global_ma_config: Option<&MaConfig>,
    ) -> Result<()> {
        struct GroupRect {
            channel_idx: usize,
            x0: u32,
            y0: u32,
            info: ChannelInfo,
        }

        let group_dim = self.group_dim;
        let mut rects = Vec::new();
        for (channel_idx, channel) in self
            .channels
            .iter()
            .enumerate()
            .skip(self.global_channel_end)
        {
            // Channels squeezed beyond 8x land in LF group sections; without
            // the squeeze transform there are none.
            if channel.hshift >= 3 && channel.vshift >= 3 {
                continue;
            }
            let x0 = (group_x * group_dim) >> channel.hshift;
            let y0 = (group_y * group_dim) >> channel.vshift;
            if x0 >= channel.width || y0 >= channel.height {
                continue;
            }
            let width = (channel.width - x0).min(group_dim >> channel.hshift);
            let height = (channel.height - y0).min(group_dim >> channel.vshift);
            rects.push(GroupRect {
                channel_idx,
                x0,
                y0,
                info: ChannelInfo {
                    width,
                    height,
                    hshift: channel.hshift,
                    vshift: channel.vshift,
                },
            });
        }
        if rects.is_empty() {
            return Ok(());
        }

        let sub_params = ModularParams {
            group_dim,
            bit_depth: self.bit_depth,
            channels: rects.iter().map(|rect| rect.info).collect(),
            global_ma_config,
        };
        let mut sub = Modular::parse(bitstream, sub_params)?;
        sub.decode_image(bitstream, stream_index)?;
        sub.inverse_transform()?;

        let sub_channels = sub.into_channels();
        if sub_channels.len() != rects.len() {
            return Err(Error::InvalidPaletteParams);
        }
        for (rect, sub_channel) in rects.into_iter().zip(sub_channels) {
            let target = &mut self.channels[rect.channel_idx];
            for y in 0..sub_channel.height as usize {
                let src = sub_channel.grid.row(y);
                let dst = target.grid.row_mut(rect.y0 as usize + y);
                dst[rect.x0 as usize..][..src.len()].copy_from_slice(src);
            }
        }
        Ok(())
    }

    /// Undoes the transform chain, restoring the original channel list.
    pub fn inverse_transform(&mut self) -> Result<()> {
        for transform in self.transforms.iter().rev() {
            transform.inverse(&mut self.channels, self.bit_depth)?;
        }
        Ok(())
    }

    /// Returns the MA configuration of this image, for sharing with nested
    /// streams.
    pub fn ma_config(&self) -> Option<&MaConfig> {
        self.ma_config.as_ref()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Channel> {
        self.channels
    }
}
