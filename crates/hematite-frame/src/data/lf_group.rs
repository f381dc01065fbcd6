//! LfGroup sections: quantized LF image and varblock metadata.

use hematite_bitstream::{Bitstream, Bundle};
use hematite_modular::{Channel, ChannelInfo, MaConfig, Modular, ModularParams};
use hematite_vardct::{HfMetadata, HfMetadataParams};

use crate::filter::EdgePreservingFilter;
use crate::header::Encoding;
use crate::{FrameHeader, Result};

#[derive(Debug)]
pub struct LfGroupParams<'a> {
    pub frame_header: &'a FrameHeader,
    pub global_ma_config: Option<&'a MaConfig>,
    /// Global scale of the quantizer; present for VarDCT frames.
    pub quantizer_global_scale: Option<u32>,
    pub lf_group_idx: u32,
    pub bits_per_sample: u32,
}

/// Decoded contents of one LfGroup section.
#[derive(Debug)]
pub struct LfGroup {
    pub lf_coeff: Option<LfCoeff>,
    pub hf_meta: Option<HfMetadata>,
}

/// Quantized LF image of one LF group, in `[Y, X, B]` channel order.
#[derive(Debug)]
pub struct LfCoeff {
    pub extra_precision: u8,
    pub channels: Vec<Channel>,
}

impl Bundle<LfGroupParams<'_>> for LfGroup {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, params: LfGroupParams<'_>) -> Result<Self> {
        let LfGroupParams {
            frame_header,
            global_ma_config,
            quantizer_global_scale,
            lf_group_idx,
            bits_per_sample,
        } = params;
        let is_vardct = frame_header.encoding == Encoding::VarDct;
        let (lf_width, lf_height) = frame_header.lf_group_size_for(lf_group_idx);

        let lf_coeff = is_vardct
            .then(|| -> Result<LfCoeff> {
                let extra_precision = bitstream.read_bits(2)? as u8;
                let w8 = lf_width.div_ceil(8);
                let h8 = lf_height.div_ceil(8);
                let modular_params = ModularParams {
                    group_dim: 0x7fff_ffff,
                    bit_depth: bits_per_sample,
                    channels: vec![ChannelInfo::new(w8, h8); 3],
                    global_ma_config,
                };
                let mut modular = Modular::parse(bitstream, modular_params)?;
                modular.decode_image(bitstream, 1 + lf_group_idx)?;
                modular.inverse_transform()?;
                Ok(LfCoeff {
                    extra_precision,
                    channels: modular.into_channels(),
                })
            })
            .transpose()?;

        // Modular channels downsampled at least 8x would be decoded here;
        // they only exist with the squeeze transform.

        let hf_meta = is_vardct
            .then(|| {
                let epf = match &frame_header.restoration_filter.epf {
                    EdgePreservingFilter::Disabled => None,
                    EdgePreservingFilter::Enabled(params) => {
                        Some((params.quant_mul, params.sharp_lut))
                    }
                };
                HfMetadata::parse(
                    bitstream,
                    HfMetadataParams {
                        num_lf_groups: frame_header.num_lf_groups(),
                        lf_group_idx,
                        lf_width,
                        lf_height,
                        bits_per_sample,
                        global_ma_config,
                        epf,
                        quantizer_global_scale: quantizer_global_scale
                            .expect("VarDCT frame without quantizer"),
                    },
                )
            })
            .transpose()?;

        Ok(Self { lf_coeff, hf_meta })
    }
}
