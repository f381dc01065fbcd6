//! The LfGlobal section: frame-wide dequantization, VarDCT globals and the
//! global Modular image.

use hematite_bitstream::{Bitstream, Bundle, Error as BitstreamError};
use hematite_image::ImageHeader;
use hematite_modular::{ChannelInfo, MaConfig, Modular, ModularParams};
use hematite_vardct::{HfBlockContext, LfChannelCorrelation, LfChannelDequantization, Quantizer};

use crate::header::Encoding;
use crate::{FrameHeader, Result};

#[derive(Debug)]
pub struct LfGlobal {
    pub lf_dequant: LfChannelDequantization,
    pub vardct: Option<LfGlobalVarDct>,
    pub gmodular: GlobalModular,
}

#[derive(Debug)]
pub struct LfGlobalVarDct {
    pub quantizer: Quantizer,
    pub hf_block_ctx: HfBlockContext,
    pub lf_chan_corr: LfChannelCorrelation,
}

#[derive(Debug, Clone, Copy)]
pub struct LfGlobalParams<'a> {
    pub image_header: &'a ImageHeader,
    pub frame_header: &'a FrameHeader,
}

impl Bundle<LfGlobalParams<'_>> for LfGlobal {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, params: LfGlobalParams<'_>) -> Result<Self> {
        let LfGlobalParams { frame_header, .. } = params;

        // Patches, splines and noise parameters would come first; those
        // frame flags are rejected before section decoding starts.
        debug_assert!(
            !frame_header.flags.patches()
                && !frame_header.flags.splines()
                && !frame_header.flags.noise()
        );

        let lf_dequant = LfChannelDequantization::parse(bitstream, ())?;
        if lf_dequant.m_x_lf < 1e-5 || lf_dequant.m_y_lf < 1e-5 || lf_dequant.m_b_lf < 1e-5 {
            return Err(BitstreamError::ValidationFailed("LF dequant scale too small").into());
        }

        let vardct = (frame_header.encoding == Encoding::VarDct)
            .then(|| -> Result<_> {
                Ok(LfGlobalVarDct {
                    quantizer: Quantizer::parse(bitstream, ())?,
                    hf_block_ctx: HfBlockContext::parse(bitstream, ())?,
                    lf_chan_corr: LfChannelCorrelation::parse(bitstream, ())?,
                })
            })
            .transpose()?;

        let gmodular = GlobalModular::parse(bitstream, params)?;

        Ok(Self {
            lf_dequant,
            vardct,
            gmodular,
        })
    }
}

/// The global Modular image: colour channels for Modular frames and the
/// full-size extra channels, plus the optional global MA tree.
#[derive(Debug)]
pub struct GlobalModular {
    pub ma_config: Option<MaConfig>,
    pub modular: Modular,
    /// Index of the first extra channel within the channel list.
    pub extra_channel_from: usize,
}

impl Bundle<LfGlobalParams<'_>> for GlobalModular {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, params: LfGlobalParams<'_>) -> Result<Self> {
        let LfGlobalParams {
            image_header,
            frame_header,
        } = params;
        let metadata = &image_header.metadata;

        let span = tracing::span!(tracing::Level::TRACE, "decode global modular");
        let _guard = span.enter();

        let num_channels =
            frame_header.encoded_color_channels as u64 + metadata.ec_info.len() as u64;
        let node_limit = (1024
            + frame_header.width as u64 * frame_header.height as u64 * num_channels / 16)
            .min(1 << 20) as usize;
        let ma_config = bitstream
            .read_bool()?
            .then(|| MaConfig::parse(bitstream, node_limit))
            .transpose()
            .map_err(crate::Error::Modular)?;

        let mut channels = Vec::new();
        if frame_header.encoding == Encoding::Modular {
            for _ in 0..frame_header.encoded_color_channels {
                channels.push(ChannelInfo::new(frame_header.width, frame_header.height));
            }
        }
        let extra_channel_from = channels.len();
        for ec_info in &metadata.ec_info {
            if ec_info.dim_shift != 0 {
                return Err(BitstreamError::Unsupported("subsampled extra channels").into());
            }
            channels.push(ChannelInfo::new(frame_header.width, frame_header.height));
        }

        let modular_params = ModularParams {
            group_dim: frame_header.group_dim(),
            bit_depth: metadata.bit_depth.bits_per_sample(),
            channels,
            global_ma_config: ma_config.as_ref(),
        };
        let mut modular = Modular::parse(bitstream, modular_params)?;
        modular.decode_global(bitstream, 0)?;

        Ok(Self {
            ma_config,
            modular,
            extra_channel_from,
        })
    }
}
