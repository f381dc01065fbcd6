//! Per-(pass, group) sections: HF coefficients and group-local Modular data.

use hematite_bitstream::Bitstream;
use hematite_grid::SimpleGrid;
use hematite_modular::{MaConfig, Modular};
use hematite_vardct::{decode_hf_coeff, HfCoeffParams};

use super::{HfGlobal, LfGlobalVarDct, LfGroup};
use crate::{FrameHeader, Result};

#[derive(Debug)]
pub struct PassGroupParams<'a> {
    pub frame_header: &'a FrameHeader,
    pub lf_group: &'a LfGroup,
    pub pass_idx: u32,
    pub group_idx: u32,
    pub global_ma_config: Option<&'a MaConfig>,
    pub vardct: Option<PassGroupVarDct<'a>>,
}

#[derive(Debug)]
pub struct PassGroupVarDct<'a> {
    pub lf_vardct: &'a LfGlobalVarDct,
    pub hf_global: &'a HfGlobal,
}

/// Decodes one pass-group section.
///
/// For VarDCT frames, HF coefficients are accumulated into `coeff_out`, a
/// group-local `[X, Y, B]` grid array sized `group_width8 * 8` by
/// `group_height8 * 8`. Group-local Modular data is decoded into the global
/// Modular image.
pub fn decode_pass_group(
    bitstream: &mut Bitstream,
    params: PassGroupParams<'_>,
    coeff_out: Option<&mut [SimpleGrid<i32>; 3]>,
    gmodular: &mut Modular,
) -> Result<()> {
    let PassGroupParams {
        frame_header,
        lf_group,
        pass_idx,
        group_idx,
        global_ma_config,
        vardct,
    } = params;

    if let (Some(PassGroupVarDct {
        lf_vardct,
        hf_global,
    }), Some(hf_meta), Some(coeff_out)) = (vardct, &lf_group.hf_meta, coeff_out)
    {
        let hf_pass = &hf_global.hf_passes[pass_idx as usize];
        let coeff_shift = frame_header
            .passes
            .shift
            .get(pass_idx as usize)
            .copied()
            .unwrap_or(0);

        let group_col = group_idx % frame_header.groups_per_row();
        let group_row = group_idx / frame_header.groups_per_row();
        let group_dim_blocks = (frame_header.group_dim() / 8) as usize;
        let block_info = &hf_meta.block_info;

        let block_left = (group_col % 8) as usize * group_dim_blocks;
        let block_top = (group_row % 8) as usize * group_dim_blocks;
        let block_width = (block_info.width() - block_left).min(group_dim_blocks);
        let block_height = (block_info.height() - block_top).min(group_dim_blocks);

        // Channels are stored Y, X, B; the context model wants X, Y, B.
        let lf_quant = lf_group.lf_coeff.as_ref().map(|lf_coeff| {
            [
                &lf_coeff.channels[1].grid,
                &lf_coeff.channels[0].grid,
                &lf_coeff.channels[2].grid,
            ]
        });

        decode_hf_coeff(
            bitstream,
            HfCoeffParams {
                num_hf_presets: hf_global.num_hf_presets,
                hf_block_ctx: &lf_vardct.hf_block_ctx,
                block_info,
                block_left,
                block_top,
                block_width,
                block_height,
                lf_quant,
                hf_pass,
                coeff_shift,
            },
            coeff_out,
        )?;
    }

    if gmodular.has_group_channels() {
        let group_col = group_idx % frame_header.groups_per_row();
        let group_row = group_idx / frame_header.groups_per_row();
        let stream_index = 1
            + 3 * frame_header.num_lf_groups()
            + 17
            + pass_idx * frame_header.num_groups()
            + group_idx;
        gmodular.decode_group(
            bitstream,
            stream_index,
            group_col,
            group_row,
            global_ma_config,
        )?;
    }

    Ok(())
}
