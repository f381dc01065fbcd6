//! The HfGlobal section: dequantization matrices and per-pass HF state.

use hematite_bitstream::{Bitstream, Bundle};
use hematite_image::ImageHeader;
use hematite_modular::MaConfig;
use hematite_vardct::{DequantMatrixSet, DequantMatrixSetParams, HfPass, HfPassParams};

use super::LfGlobal;
use crate::{FrameHeader, Result};

#[derive(Debug)]
pub struct HfGlobalParams<'a> {
    pub image_header: &'a ImageHeader,
    pub frame_header: &'a FrameHeader,
    pub lf_global: &'a LfGlobal,
}

#[derive(Debug)]
pub struct HfGlobal {
    pub dequant_matrices: DequantMatrixSet,
    pub num_hf_presets: u32,
    pub hf_passes: Vec<HfPass>,
}

impl Bundle<HfGlobalParams<'_>> for HfGlobal {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, params: HfGlobalParams<'_>) -> Result<Self> {
        let HfGlobalParams {
            image_header,
            frame_header,
            lf_global,
        } = params;
        let lf_vardct = lf_global
            .vardct
            .as_ref()
            .expect("HfGlobal requires a VarDCT frame");
        let global_ma_config: Option<&MaConfig> = lf_global.gmodular.ma_config.as_ref();

        let num_lf_groups = frame_header.num_lf_groups();
        let dequant_matrices = DequantMatrixSet::parse(
            bitstream,
            DequantMatrixSetParams {
                bit_depth: image_header.metadata.bit_depth.bits_per_sample(),
                stream_index_base: 1 + 3 * num_lf_groups,
                global_ma_config,
            },
        )?;

        let num_groups = frame_header.num_groups();
        let preset_bits = num_groups.next_power_of_two().trailing_zeros() as usize;
        let num_hf_presets = bitstream.read_bits(preset_bits)? + 1;

        let hf_passes = (0..frame_header.passes.num_passes)
            .map(|_| {
                HfPass::parse(
                    bitstream,
                    HfPassParams {
                        hf_block_ctx: &lf_vardct.hf_block_ctx,
                        num_hf_presets,
                    },
                )
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            dequant_matrices,
            num_hf_presets,
            hf_passes,
        })
    }
}
