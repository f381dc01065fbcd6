//! Per-LF-group varblock metadata: chroma-from-luma factors, varblock
//! placement, and EPF sharpness.

use hematite_bitstream::{Bitstream, Bundle, Error as BitstreamError};
use hematite_grid::SimpleGrid;
use hematite_modular::{ChannelInfo, MaConfig, Modular, ModularParams};

use crate::{Result, TransformType};

/// Parameters for decoding [`HfMetadata`].
#[derive(Debug)]
pub struct HfMetadataParams<'ma> {
    pub num_lf_groups: u32,
    pub lf_group_idx: u32,
    /// Size of this LF group in pixels.
    pub lf_width: u32,
    pub lf_height: u32,
    pub bits_per_sample: u32,
    pub global_ma_config: Option<&'ma MaConfig>,
    /// `(quant_mul, sharp_lut)` when the edge-preserving filter is enabled.
    pub epf: Option<(f32, [f32; 8])>,
    pub quantizer_global_scale: u32,
}

/// State of one 8x8 cell in the varblock grid.
#[derive(Debug, Default, Clone, Copy)]
pub enum BlockInfo {
    #[default]
    Uninit,
    /// Covered by a varblock whose top-left is elsewhere.
    Occupied,
    /// Top-left cell of a varblock.
    Data {
        dct_select: TransformType,
        hf_mul: i32,
    },
}

impl BlockInfo {
    fn is_occupied(self) -> bool {
        !matches!(self, Self::Uninit)
    }
}

/// Decoded varblock metadata for one LF group.
#[derive(Debug)]
pub struct HfMetadata {
    /// Chroma-from-luma factor grid for the X channel, one entry per 64x64
    /// pixel tile.
    pub x_from_y: SimpleGrid<i32>,
    /// Chroma-from-luma factor grid for the B channel.
    pub b_from_y: SimpleGrid<i32>,
    /// Varblock placement at 8x8 granularity.
    pub block_info: SimpleGrid<BlockInfo>,
    /// EPF sigma per 8x8 block; zero when EPF is disabled.
    pub epf_sigma: SimpleGrid<f32>,
}

impl Bundle<HfMetadataParams<'_>> for HfMetadata {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, params: HfMetadataParams<'_>) -> Result<Self> {
        let HfMetadataParams {
            num_lf_groups,
            lf_group_idx,
            lf_width,
            lf_height,
            bits_per_sample,
            global_ma_config,
            epf,
            quantizer_global_scale,
        } = params;

        let bw = lf_width.div_ceil(8);
        let bh = lf_height.div_ceil(8);
        let w64 = lf_width.div_ceil(64);
        let h64 = lf_height.div_ceil(64);

        let nb_bits = (bw * bh).next_power_of_two().trailing_zeros() as usize;
        let nb_blocks = 1 + bitstream.read_bits(nb_bits)?;

        let channels = vec![
            ChannelInfo::new(w64, h64),
            ChannelInfo::new(w64, h64),
            ChannelInfo::new(nb_blocks, 2),
            ChannelInfo::new(bw, bh),
        ];
        let modular_params = ModularParams {
            group_dim: 0x7fff_ffff,
            bit_depth: bits_per_sample,
            channels,
            global_ma_config,
        };
        let mut modular = Modular::parse(bitstream, modular_params)?;
        modular.decode_image(bitstream, 1 + 2 * num_lf_groups + lf_group_idx)?;
        modular.inverse_transform()?;

        let mut channels = modular.into_channels().into_iter();
        let x_from_y = channels.next().unwrap().grid;
        let b_from_y = channels.next().unwrap().grid;
        let block_data = channels.next().unwrap().grid;
        let sharpness = channels.next().unwrap().grid;

        let epf = epf.map(|(quant_mul, sharp_lut)| {
            (
                quant_mul * 65536.0 / quantizer_global_scale as f32,
                sharp_lut,
            )
        });
        let mut epf_sigma = SimpleGrid::<f32>::new(bw as usize, bh as usize);
        let mut block_info = SimpleGrid::<BlockInfo>::new(bw as usize, bh as usize);

        // Tile varblocks over the 8x8 grid in raster order: each unclaimed
        // cell consumes the next metadata entry.
        let mut data_idx = 0usize;
        for by in 0..bh as usize {
            let mut bx = 0usize;
            while bx < bw as usize {
                if block_info.get(bx, by).unwrap().is_occupied() {
                    bx += 1;
                    continue;
                }

                let Some(&raw_select) = block_data.get(data_idx, 0) else {
                    tracing::error!(lf_group_idx, bx, by, "varblock metadata exhausted");
                    return Err(crate::Error::InvalidVarblock("metadata exhausted"));
                };
                let dct_select = TransformType::try_from(raw_select)?;
                let mul = *block_data.get(data_idx, 1).unwrap();
                if mul < 0 {
                    return Err(crate::Error::InvalidVarblock("negative HfMul"));
                }
                let hf_mul = mul + 1;
                data_idx += 1;

                let (vw, vh) = dct_select.size_in_blocks();
                if bx + vw as usize > bw as usize || by + vh as usize > bh as usize {
                    tracing::error!(
                        lf_group_idx,
                        bx,
                        by,
                        ?dct_select,
                        "varblock does not fit in the LF group"
                    );
                    return Err(crate::Error::InvalidVarblock("varblock out of bounds"));
                }

                let block_sigma = epf.map(|(scale, sharp_lut)| (scale / hf_mul as f32, sharp_lut));
                for dy in 0..vh as usize {
                    for dx in 0..vw as usize {
                        let cell = block_info.get_mut(bx + dx, by + dy).unwrap();
                        if cell.is_occupied() {
                            tracing::error!(lf_group_idx, bx, by, "varblocks overlap");
                            return Err(crate::Error::InvalidVarblock("varblocks overlap"));
                        }
                        *cell = if dx == 0 && dy == 0 {
                            BlockInfo::Data { dct_select, hf_mul }
                        } else {
                            BlockInfo::Occupied
                        };

                        if let Some((sigma, sharp_lut)) = block_sigma {
                            let sharpness = *sharpness.get(bx + dx, by + dy).unwrap();
                            if !(0..8).contains(&sharpness) {
                                return Err(BitstreamError::ValidationFailed(
                                    "invalid EPF sharpness value",
                                )
                                .into());
                            }
                            *epf_sigma.get_mut(bx + dx, by + dy).unwrap() =
                                sigma * sharp_lut[sharpness as usize];
                        }
                    }
                }
                bx += vw as usize;
            }
        }

        Ok(Self {
            x_from_y,
            b_from_y,
            block_info,
            epf_sigma,
        })
    }
}
