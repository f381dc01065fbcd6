//! Dequantization matrices: the built-in parameter library and the seven
//! encoded representations.

use hematite_bitstream::{Bitstream, Bundle};
use hematite_modular::{ChannelInfo, MaConfig, Modular, ModularParams};

use crate::{Result, TransformType};

/// One dequantization matrix, stored wide side first: `height` rows of
/// `width` multipliers.
#[derive(Debug, Clone)]
pub struct DequantMatrix {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl DequantMatrix {
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Multiplier at natural (non-transposed) coordinates.
    #[inline]
    pub fn value(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }
}

/// The 17 matrix parameter sets, one per [`TransformType::param_index`]
/// class, for the three channels in X, Y, B order.
#[derive(Debug)]
pub struct DequantMatrixSet {
    matrices: Vec<[DequantMatrix; 3]>,
}

/// Transform classes in parameter-library order.
const PARAM_CLASSES: [TransformType; 17] = [
    TransformType::Dct8,
    TransformType::Hornuss,
    TransformType::Dct2,
    TransformType::Dct4,
    TransformType::Dct16,
    TransformType::Dct32,
    TransformType::Dct8x16,
    TransformType::Dct8x32,
    TransformType::Dct16x32,
    TransformType::Dct4x8,
    TransformType::Afv0,
    TransformType::Dct64,
    TransformType::Dct32x64,
    TransformType::Dct128,
    TransformType::Dct64x128,
    TransformType::Dct256,
    TransformType::Dct128x256,
];

#[derive(Debug)]
pub struct DequantMatrixSetParams<'a> {
    pub bit_depth: u32,
    /// Modular stream index of the first quant table.
    pub stream_index_base: u32,
    pub global_ma_config: Option<&'a MaConfig>,
}

impl Bundle<DequantMatrixSetParams<'_>> for DequantMatrixSet {
    type Error = crate::Error;

    fn parse(bitstream: &mut Bitstream, params: DequantMatrixSetParams<'_>) -> Result<Self> {
        let all_default = bitstream.read_bool()?;
        let matrices = PARAM_CLASSES
            .iter()
            .enumerate()
            .map(|(idx, &dct_select)| {
                let encoding = if all_default {
                    MatrixEncoding::library(dct_select)
                } else {
                    MatrixEncoding::parse(bitstream, dct_select, &params, idx as u32)?
                };
                encoding.into_matrices(dct_select)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { matrices })
    }
}

impl DequantMatrixSet {
    pub fn library() -> Self {
        let matrices = PARAM_CLASSES
            .iter()
            .map(|&dct_select| MatrixEncoding::library(dct_select).into_matrices(dct_select))
            .collect::<Result<Vec<_>>>()
            .expect("library matrices are well-formed");
        Self { matrices }
    }

    /// Matrix for the given channel (X, Y, B order) and transform type.
    #[inline]
    pub fn matrix(&self, channel: usize, dct_select: TransformType) -> &DequantMatrix {
        &self.matrices[dct_select.param_index()][channel]
    }
}

#[derive(Debug)]
enum MatrixEncoding {
    Hornuss([[f32; 3]; 3]),
    Dct2([[f32; 6]; 3]),
    Dct4 {
        mults: [[f32; 2]; 3],
        dct_params: [Vec<f32>; 3],
    },
    Dct4x8 {
        mults: [[f32; 1]; 3],
        dct_params: [Vec<f32>; 3],
    },
    Afv {
        weights: [[f32; 9]; 3],
        dct_params: [Vec<f32>; 3],
        dct4x4_params: [Vec<f32>; 3],
    },
    Dct([Vec<f32>; 3]),
    Raw {
        denominator: f32,
        channels: Vec<hematite_modular::Channel>,
    },
}

impl MatrixEncoding {
    fn parse(
        bitstream: &mut Bitstream,
        dct_select: TransformType,
        params: &DequantMatrixSetParams<'_>,
        idx: u32,
    ) -> Result<Self> {
        fn read_fixed<const N: usize>(bitstream: &mut Bitstream) -> Result<[[f32; N]; 3]> {
            let mut out = [[0.0f32; N]; 3];
            for value in out.iter_mut().flatten() {
                *value = bitstream.read_f16_as_f32()?;
            }
            Ok(out)
        }

        fn read_dct_params(bitstream: &mut Bitstream) -> Result<[Vec<f32>; 3]> {
            let num_params = bitstream.read_bits(4)? as usize + 1;
            let mut out = [
                vec![0.0f32; num_params],
                vec![0.0f32; num_params],
                vec![0.0f32; num_params],
            ];
            for value in out.iter_mut().flatten() {
                *value = bitstream.read_f16_as_f32()?;
            }
            for channel in &mut out {
                channel[0] *= 64.0;
            }
            Ok(out)
        }

        let mode = bitstream.read_bits(3)?;
        if mode != 0 {
            tracing::debug!(?dct_select, mode, "reading custom dequant matrix");
        }
        Ok(match mode {
            0 => Self::library(dct_select),
            1 => Self::Hornuss(read_fixed(bitstream)?),
            2 => Self::Dct2(read_fixed(bitstream)?),
            3 => Self::Dct4 {
                mults: read_fixed(bitstream)?,
                dct_params: read_dct_params(bitstream)?,
            },
            4 => Self::Dct4x8 {
                mults: read_fixed(bitstream)?,
                dct_params: read_dct_params(bitstream)?,
            },
            5 => {
                let mut weights = read_fixed::<9>(bitstream)?;
                for channel in &mut weights {
                    for weight in &mut channel[..6] {
                        *weight *= 64.0;
                    }
                }
                Self::Afv {
                    weights,
                    dct_params: read_dct_params(bitstream)?,
                    dct4x4_params: read_dct_params(bitstream)?,
                }
            }
            6 => Self::Dct(read_dct_params(bitstream)?),
            7 => {
                let (width, height) = dct_select.matrix_size();
                let denominator = bitstream.read_f16_as_f32()?;
                if !denominator.is_finite() || denominator == 0.0 {
                    return Err(crate::Error::InvalidDequantMatrix);
                }
                let modular_params = ModularParams {
                    group_dim: 0x7fff_ffff,
                    bit_depth: params.bit_depth,
                    channels: vec![ChannelInfo::new(width, height); 3],
                    global_ma_config: params.global_ma_config,
                };
                let mut modular = Modular::parse(bitstream, modular_params)?;
                modular.decode_image(bitstream, params.stream_index_base + idx)?;
                modular.inverse_transform()?;
                Self::Raw {
                    denominator,
                    channels: modular.into_channels(),
                }
            }
            _ => unreachable!(),
        })
    }

    fn library(dct_select: TransformType) -> Self {
        use TransformType::*;

        // Parameter sets from the format's built-in matrix library.
        #[allow(clippy::excessive_precision)]
        match dct_select {
            Dct8 => Self::Dct([
                vec![3150.0, 0.0, -0.4, -0.4, -0.4, -2.0],
                vec![560.0, 0.0, -0.3, -0.3, -0.3, -0.3],
                vec![512.0, -2.0, -1.0, 0.0, -1.0, -2.0],
            ]),
            Hornuss => Self::Hornuss([
                [280.0, 3160.0, 3160.0],
                [60.0, 864.0, 864.0],
                [18.0, 200.0, 200.0],
            ]),
            Dct2 => Self::Dct2([
                [3840.0, 2560.0, 1280.0, 640.0, 480.0, 300.0],
                [960.0, 640.0, 320.0, 180.0, 140.0, 120.0],
                [640.0, 320.0, 128.0, 64.0, 32.0, 16.0],
            ]),
            Dct4 => Self::Dct4 {
                mults: [[1.0; 2]; 3],
                dct_params: DCT4_PARAMS.map(|v| v.to_vec()),
            },
            Dct16 => Self::Dct([
                vec![
                    8996.873, -1.3000778, -0.4942453, -0.43909377, -0.6350102, -0.9017726,
                    -1.6162099,
                ],
                vec![
                    3191.4836, -0.67424583, -0.80745816, -0.4492584, -0.3586544, -0.3132239,
                    -0.37615025,
                ],
                vec![
                    1157.504, -2.0531423, -1.4, -0.5068713, -0.4270873, -1.4856834, -4.920914,
                ],
            ]),
            Dct32 => Self::Dct([
                vec![
                    15718.408, -1.025, -0.98, -0.9012, -0.4, -0.48819396, -0.421064, -0.27,
                ],
                vec![
                    7305.7637, -0.8041958, -0.76330364, -0.5566038, -0.49785304, -0.43699592,
                    -0.40180868, -0.27321684,
                ],
                vec![
                    3803.5317, -3.0607336, -2.041327, -2.023565, -0.54953897, -0.4, -0.4, -0.3,
                ],
            ]),
            Dct8x16 | Dct16x8 => Self::Dct([
                vec![7240.7734, -0.7, -0.7, -0.2, -0.2, -0.2, -0.5],
                vec![1448.1547, -0.5, -0.5, -0.5, -0.2, -0.2, -0.2],
                vec![506.85413, -1.4, -0.2, -0.5, -0.5, -1.5, -3.6],
            ]),
            Dct8x32 | Dct32x8 => Self::Dct([
                vec![
                    16283.249, -1.7812846, -1.6309059, -1.0382179, -0.85, -0.7, -0.9, -1.2360638,
                ],
                vec![
                    5089.1577, -0.3200494, -0.3536285, -0.3034, -0.61, -0.5, -0.5, -0.6,
                ],
                vec![
                    3397.7761, -0.32132736, -0.3450762, -0.7034, -0.9, -1.0, -1.0, -1.1754606,
                ],
            ]),
            Dct16x32 | Dct32x16 => Self::Dct([
                vec![
                    13844.971, -0.971138, -0.658, -0.42026, -0.22712, -0.2206, -0.226, -0.6,
                ],
                vec![
                    4798.964, -0.6112531, -0.8377079, -0.7901486, -0.26927274, -0.38272768,
                    -0.22924222, -0.20719099,
                ],
                vec![1807.2369, -1.2, -1.2, -0.7, -0.7, -0.7, -0.4, -0.5],
            ]),
            Dct4x8 | Dct8x4 => Self::Dct4x8 {
                mults: [[1.0]; 3],
                dct_params: DCT4X8_PARAMS.map(|v| v.to_vec()),
            },
            Afv0 | Afv1 | Afv2 | Afv3 => Self::Afv {
                weights: [
                    [3072.0, 3072.0, 256.0, 256.0, 256.0, 414.0, 0.0, 0.0, 0.0],
                    [1024.0, 1024.0, 50.0, 50.0, 50.0, 58.0, 0.0, 0.0, 0.0],
                    [384.0, 384.0, 12.0, 12.0, 12.0, 22.0, -0.25, -0.25, -0.25],
                ],
                dct_params: DCT4X8_PARAMS.map(|v| v.to_vec()),
                dct4x4_params: DCT4_PARAMS.map(|v| v.to_vec()),
            },
            Dct64 => Self::large_dct(23966.166, 8380.191, 4493.024),
            Dct32x64 | Dct64x32 => Self::large_dct(15358.898, 5597.3604, 2919.9617),
            Dct128 => Self::large_dct(47932.332, 16760.383, 8986.048),
            Dct64x128 | Dct128x64 => Self::large_dct(30717.797, 11194.721, 5839.9233),
            Dct256 => Self::large_dct(95864.664, 33520.766, 17972.096),
            Dct128x256 | Dct256x128 => Self::large_dct(61435.594, 24209.441, 12979.847),
        }
    }

    /// Large transforms share one band shape, differing only in the DC
    /// weight per channel.
    fn large_dct(x: f32, y: f32, b: f32) -> Self {
        #[allow(clippy::excessive_precision)]
        const SEQ_X: [f32; 7] = [
            -1.025, -0.78, -0.65012, -0.19041574, -0.20819396, -0.421064, -0.32733846,
        ];
        #[allow(clippy::excessive_precision)]
        const SEQ_Y: [f32; 7] = [
            -0.30419582, 0.36330363, -0.3566038, -0.34430745, -0.33699593, -0.30180866,
            -0.27321684,
        ];
        const SEQ_B: [f32; 7] = [-1.2, -1.2, -0.8, -0.7, -0.7, -0.4, -0.5];

        let build = |dc: f32, seq: &[f32]| {
            let mut params = vec![dc];
            params.extend_from_slice(seq);
            params
        };
        Self::Dct([build(x, &SEQ_X), build(y, &SEQ_Y), build(b, &SEQ_B)])
    }

    fn into_matrices(self, dct_select: TransformType) -> Result<[DequantMatrix; 3]> {
        let (width, height) = dct_select.matrix_size();
        let width = width as usize;
        let height = height as usize;
        let is_raw = matches!(self, Self::Raw { .. });

        let mut weights: [Vec<f32>; 3] = match self {
            Self::Dct(params) => {
                let mut out: [Vec<f32>; 3] = Default::default();
                for (out, params) in out.iter_mut().zip(&params) {
                    *out = dct_band_weights(params, width, height)?;
                }
                out
            }
            Self::Hornuss(params) => params.map(|params| {
                let mut out = vec![params[0]; 64];
                out[0] = 1.0;
                out[1] = params[1];
                out[8] = params[1];
                out[9] = params[2];
                out
            }),
            Self::Dct2(params) => params.map(|params| {
                let mut out = vec![0.0f32; 64];
                for (idx, value) in params.into_iter().enumerate() {
                    let dim = 1usize << (idx / 2);
                    if idx % 2 == 0 {
                        // Off-diagonal quadrants.
                        for y in 0..dim {
                            for x in 0..dim {
                                out[y * 8 + dim + x] = value;
                                out[(y + dim) * 8 + x] = value;
                            }
                        }
                    } else {
                        for y in 0..dim {
                            for x in 0..dim {
                                out[(y + dim) * 8 + dim + x] = value;
                            }
                        }
                    }
                }
                out
            }),
            Self::Dct4 { mults, dct_params } => {
                let mut out: [Vec<f32>; 3] = Default::default();
                for (out, (mults, params)) in out.iter_mut().zip(mults.iter().zip(&dct_params)) {
                    let quarter = dct_band_weights(params, 4, 4)?;
                    let mut full = vec![0.0f32; 64];
                    for y in 0..8 {
                        for x in 0..8 {
                            full[y * 8 + x] = quarter[(y / 2) * 4 + x / 2];
                        }
                    }
                    full[1] /= mults[0];
                    full[8] /= mults[0];
                    full[9] /= mults[1];
                    *out = full;
                }
                out
            }
            Self::Dct4x8 { mults, dct_params } => {
                let mut out: [Vec<f32>; 3] = Default::default();
                for (out, (mults, params)) in out.iter_mut().zip(mults.iter().zip(&dct_params)) {
                    let half = dct_band_weights(params, 8, 4)?;
                    let mut full = vec![0.0f32; 64];
                    for y in 0..8 {
                        full[y * 8..][..8].copy_from_slice(&half[(y / 2) * 8..][..8]);
                    }
                    full[8] /= mults[0];
                    *out = full;
                }
                out
            }
            Self::Afv {
                weights,
                dct_params,
                dct4x4_params,
            } => {
                let mut out: [Vec<f32>; 3] = Default::default();
                for (c, out) in out.iter_mut().enumerate() {
                    *out = afv_weights(&weights[c], &dct_params[c], &dct4x4_params[c])?;
                }
                out
            }
            Self::Raw {
                denominator,
                channels,
            } => {
                let mut out: [Vec<f32>; 3] = Default::default();
                for (out, channel) in out.iter_mut().zip(&channels) {
                    if channel.width as usize != width || channel.height as usize != height {
                        return Err(crate::Error::InvalidDequantMatrix);
                    }
                    *out = channel
                        .grid
                        .buf()
                        .iter()
                        .map(|&v| v as f32 * denominator)
                        .collect();
                }
                out
            }
        };

        if !is_raw {
            for value in weights.iter_mut().flat_map(|w| w.iter_mut()) {
                if !value.is_finite() || *value <= 0.0 {
                    return Err(crate::Error::InvalidDequantMatrix);
                }
                *value = 1.0 / *value;
            }
        }
        for value in weights.iter().flat_map(|w| w.iter()) {
            if !value.is_finite() {
                return Err(crate::Error::InvalidDequantMatrix);
            }
        }

        Ok(weights.map(|data| {
            debug_assert_eq!(data.len(), width * height);
            DequantMatrix {
                width,
                height,
                data,
            }
        }))
    }
}

#[allow(clippy::excessive_precision)]
const DCT4X8_PARAMS: [[f32; 4]; 3] = [
    [2198.0505, -0.96269625, -0.7619425, -0.65511405],
    [764.36554, -0.926302, -0.967523, -0.2784529],
    [527.10754, -1.4594386, -1.4500821, -1.5843723],
];
const DCT4_PARAMS: [[f32; 4]; 3] = [
    [2200.0, 0.0, 0.0, 0.0],
    [392.0, 0.0, 0.0, 0.0],
    [112.0, -0.25, -0.25, -0.5],
];

fn band_mult(x: f32) -> f32 {
    if x > 0.0 {
        1.0 + x
    } else {
        1.0 / (1.0 - x)
    }
}

fn interpolate(pos: f32, max: f32, bands: &[f32]) -> f32 {
    if let &[value] = bands {
        return value;
    }
    let scaled = pos * (bands.len() - 1) as f32 / max;
    let idx = scaled as usize;
    let frac = scaled - idx as f32;
    let a = bands[idx];
    let b = bands[idx + 1];
    a * (b / a).powf(frac)
}

/// Radial band interpolation used by the generic DCT encodings.
fn dct_band_weights(params: &[f32], width: usize, height: usize) -> Result<Vec<f32>> {
    if params.is_empty() {
        return Err(crate::Error::InvalidDequantMatrix);
    }
    let mut bands = Vec::with_capacity(params.len());
    let mut last = params[0];
    bands.push(last);
    for &value in &params[1..] {
        last *= band_mult(value);
        if !(last > 0.0) || !last.is_finite() {
            return Err(crate::Error::InvalidDequantMatrix);
        }
        bands.push(last);
    }

    let mut out = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let dx = x as f32 / (width - 1) as f32;
            let dy = y as f32 / (height - 1) as f32;
            let distance = (dx * dx + dy * dy).sqrt();
            out.push(interpolate(
                distance,
                std::f32::consts::SQRT_2 + 1e-6,
                &bands,
            ));
        }
    }
    Ok(out)
}

/// AFV matrix assembly: a 4x4 corner from the hand-crafted frequency table,
/// interleaved with DCT4x4 and DCT4x8 band weights.
fn afv_weights(params: &[f32; 9], dct_params: &[f32], dct4x4_params: &[f32]) -> Result<Vec<f32>> {
    #[allow(clippy::excessive_precision)]
    const FREQS: [f32; 16] = [
        0.0, 0.0, 0.8517779, 5.3777843, 0.0, 0.0, 4.734748, 5.4492455, 1.659827, 4.0, 7.275749,
        10.423227, 2.6629324, 7.6306577, 8.962389, 12.971662,
    ];
    const FREQ_LO: f32 = FREQS[2];
    const FREQ_HI: f32 = FREQS[15];

    let weights_4x8 = dct_band_weights(dct_params, 8, 4)?;
    let weights_4x4 = dct_band_weights(dct4x4_params, 4, 4)?;

    let mut bands = [params[5], 0.0, 0.0, 0.0];
    for i in 1..4 {
        bands[i] = bands[i - 1] * band_mult(params[5 + i]);
        if !(bands[i] > 0.0) {
            return Err(crate::Error::InvalidDequantMatrix);
        }
    }

    let mut out = vec![0.0f32; 64];
    // Even rows, even columns: the AFV quadrant.
    for y in 0..4 {
        for x in 0..4 {
            out[2 * y * 8 + 2 * x] = match (x, y) {
                (0, 0) => 1.0,
                (0, 1) => params[2],
                (1, 0) => params[3],
                (1, 1) => params[4],
                (x, y) => interpolate(
                    FREQS[y * 4 + x] - FREQ_LO,
                    FREQ_HI + FREQ_LO + 1e-6,
                    &bands,
                ),
            };
        }
    }
    // Odd rows take the DCT4x8 weights; even rows, odd columns the DCT4x4.
    for y in 0..4 {
        for x in 0..8 {
            out[(2 * y + 1) * 8 + x] = if x == 0 && y == 0 {
                params[0]
            } else {
                weights_4x8[y * 8 + x]
            };
        }
        for x in 0..4 {
            out[2 * y * 8 + 2 * x + 1] = if x == 0 && y == 0 {
                params[1]
            } else {
                weights_4x4[y * 4 + x]
            };
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_matrices_are_positive() {
        let set = DequantMatrixSet::library();
        for &dct_select in &PARAM_CLASSES {
            for channel in 0..3 {
                let matrix = set.matrix(channel, dct_select);
                let (width, height) = dct_select.matrix_size();
                assert_eq!(matrix.width(), width as usize);
                assert_eq!(matrix.height(), height as usize);
                for y in 0..matrix.height() {
                    for x in 0..matrix.width() {
                        let value = matrix.value(x, y);
                        assert!(value.is_finite() && value > 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn transposed_classes_share_matrices() {
        let set = DequantMatrixSet::library();
        let a = set.matrix(1, TransformType::Dct16x8);
        let b = set.matrix(1, TransformType::Dct8x16);
        assert_eq!(a.value(3, 1), b.value(3, 1));
    }
}
