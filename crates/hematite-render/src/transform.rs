//! Inverse varblock transforms, including the special small transforms and
//! the LF-to-LLF embedding.

use hematite_vardct::TransformType;

use crate::dct::{dct_1d, dct_2d, DctDirection};

/// Resampling scale between a length-`8n` inverse DCT and the averages of
/// its length-8 blocks: dividing the forward DCT of the averages by this
/// factor yields the low coefficients of the full transform.
pub fn llf_scale(n: usize, k: usize) -> f32 {
    if k == 0 {
        return 1.0;
    }
    let theta = std::f64::consts::PI * k as f64 / (2 * n) as f64;
    (theta.sin() / (8.0 * (theta / 8.0).sin())) as f32
}

/// A mutable view into one varblock's coefficient region.
pub struct CoeffBlock<'a> {
    buf: &'a mut [f32],
    stride: usize,
    pub width: usize,
    pub height: usize,
}

impl<'a> CoeffBlock<'a> {
    pub fn new(
        buf: &'a mut [f32],
        stride: usize,
        x0: usize,
        y0: usize,
        width: usize,
        height: usize,
    ) -> Self {
        Self {
            buf: &mut buf[y0 * stride + x0..],
            stride,
            width,
            height,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.buf[y * self.stride + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.buf[y * self.stride + x] = value;
    }

    fn to_vec(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            out.extend_from_slice(&self.buf[y * self.stride..][..self.width]);
        }
        out
    }

    fn copy_from(&mut self, data: &[f32]) {
        for (y, row) in data.chunks_exact(self.width).enumerate() {
            self.buf[y * self.stride..][..self.width].copy_from_slice(row);
        }
    }
}

/// Writes the varblock's LLF coefficients from the LF samples and runs the
/// inverse transform, leaving samples in the block region.
///
/// `lf` is accessed at `(lf_x + i, lf_y + j)` for the varblock's LF cells.
pub fn transform_varblock(
    block: &mut CoeffBlock<'_>,
    dct_select: TransformType,
    lf: &hematite_grid::SimpleGrid<f32>,
    lf_x: usize,
    lf_y: usize,
) {
    let (vw, vh) = dct_select.size_in_blocks();
    let vw = vw as usize;
    let vh = vh as usize;

    if vw * vh == 1 {
        // Small transforms carry their DC directly.
        block.set(0, 0, *lf.get(lf_x, lf_y).unwrap());
    } else {
        // The LLF corner is the forward DCT of the LF samples, compensated
        // for the 8x resampling. For tall varblocks the coefficient storage
        // is transposed, which lands the LLF entries at the same positions.
        let mut llf = vec![0.0f32; vw * vh];
        for ky in 0..vh {
            for kx in 0..vw {
                llf[ky * vw + kx] = *lf.get(lf_x + kx, lf_y + ky).unwrap();
            }
        }
        dct_2d(&mut llf, vw, vh, DctDirection::Forward);

        for ky in 0..vh {
            for kx in 0..vw {
                let value = llf[ky * vw + kx] / (llf_scale(vh, ky) * llf_scale(vw, kx));
                block.set(kx, ky, value);
            }
        }
    }

    inverse_transform(block, dct_select);
}

fn inverse_transform(block: &mut CoeffBlock<'_>, dct_select: TransformType) {
    use TransformType::*;
    match dct_select {
        Dct2 => inverse_dct2(block),
        Dct4 => inverse_dct4(block),
        Hornuss => inverse_hornuss(block),
        Dct4x8 => inverse_dct4x8(block, false),
        Dct8x4 => inverse_dct4x8(block, true),
        Afv0 => inverse_afv(block, false, false),
        Afv1 => inverse_afv(block, true, false),
        Afv2 => inverse_afv(block, false, true),
        Afv3 => inverse_afv(block, true, true),
        _ => inverse_dct(block, dct_select),
    }
}

/// Generic inverse DCT; coefficients are stored wide side first and column
/// major relative to tall blocks.
fn inverse_dct(block: &mut CoeffBlock<'_>, dct_select: TransformType) {
    let (vw, vh) = dct_select.size_in_blocks();
    let width = vw as usize * 8;
    let height = vh as usize * 8;

    if width >= height {
        let mut data = block.to_vec();
        dct_2d(&mut data, width, height, DctDirection::Inverse);
        block.copy_from(&data);
    } else {
        // Tall block: the region holds the transposed (wide-side-first)
        // coefficient layout, and the transposed inverse lands back on the
        // same positions.
        let cw = height;
        let ch = width;
        let mut wide = vec![0.0f32; cw * ch];
        for r in 0..ch {
            for c in 0..cw {
                wide[r * cw + c] = block.get(r, c);
            }
        }
        dct_2d(&mut wide, cw, ch, DctDirection::Inverse);
        for r in 0..ch {
            for c in 0..cw {
                block.set(r, c, wide[r * cw + c]);
            }
        }
    }
}

/// Doubles resolution by reinterpreting each coefficient as a 2x2 DC/detail
/// quad, `size`-to-`2*size`.
fn idct2_step(block: &mut CoeffBlock<'_>, size: usize) {
    let half = size / 2;
    let mut scratch = vec![0.0f32; size * size];
    for y in 0..half {
        for x in 0..half {
            let c00 = block.get(x, y);
            let c01 = block.get(x + half, y);
            let c10 = block.get(x, y + half);
            let c11 = block.get(x + half, y + half);
            scratch[2 * y * size + 2 * x] = c00 + c01 + c10 + c11;
            scratch[2 * y * size + 2 * x + 1] = c00 + c01 - c10 - c11;
            scratch[(2 * y + 1) * size + 2 * x] = c00 - c01 + c10 - c11;
            scratch[(2 * y + 1) * size + 2 * x + 1] = c00 - c01 - c10 + c11;
        }
    }
    for y in 0..size {
        block.buf[y * block.stride..][..size].copy_from_slice(&scratch[y * size..][..size]);
    }
}

fn inverse_dct2(block: &mut CoeffBlock<'_>) {
    idct2_step(block, 2);
    idct2_step(block, 4);
    idct2_step(block, 8);
}

fn inverse_dct4(block: &mut CoeffBlock<'_>) {
    idct2_step(block, 2);

    let mut quads = [[0.0f32; 16]; 4];
    for (idx, quad) in quads.iter_mut().enumerate() {
        let (qx, qy) = (idx % 2, idx / 2);
        // The interleaved 4x4 sub-blocks store their coefficients
        // transposed.
        for iy in 0..4 {
            for ix in 0..4 {
                quad[ix * 4 + iy] = block.get(qx + ix * 2, qy + iy * 2);
            }
        }
        dct_2d(quad, 4, 4, DctDirection::Inverse);
    }
    for (idx, quad) in quads.iter().enumerate() {
        let (qx, qy) = (idx % 2, idx / 2);
        for iy in 0..4 {
            for ix in 0..4 {
                block.set(qx * 4 + ix, qy * 4 + iy, quad[iy * 4 + ix]);
            }
        }
    }
}

fn inverse_hornuss(block: &mut CoeffBlock<'_>) {
    idct2_step(block, 2);

    let mut quads = [[0.0f32; 16]; 4];
    for (idx, quad) in quads.iter_mut().enumerate() {
        let (qx, qy) = (idx % 2, idx / 2);
        for iy in 0..4 {
            for ix in 0..4 {
                quad[iy * 4 + ix] = block.get(qx + ix * 2, qy + iy * 2);
            }
        }
        // Block average with a bespoke residual: sample (1, 1) holds the
        // residual-corrected DC.
        let residual_sum: f32 = quad[1..].iter().sum();
        let avg = quad[0] - residual_sum / 16.0;
        quad[0] = quad[5] + avg;
        quad[5] = avg;
        for (pos, value) in quad.iter_mut().enumerate() {
            if pos != 0 && pos != 5 {
                *value += avg;
            }
        }
    }
    for (idx, quad) in quads.iter().enumerate() {
        let (qx, qy) = (idx % 2, idx / 2);
        for iy in 0..4 {
            for ix in 0..4 {
                block.set(qx * 4 + ix, qy * 4 + iy, quad[iy * 4 + ix]);
            }
        }
    }
}

fn inverse_dct4x8(block: &mut CoeffBlock<'_>, transpose: bool) {
    let c0 = block.get(0, 0);
    let c1 = block.get(0, 1);
    block.set(0, 0, c0 + c1);
    block.set(0, 1, c0 - c1);

    let mut halves = [[0.0f32; 32]; 2];
    for (idx, half) in halves.iter_mut().enumerate() {
        for iy in 0..4 {
            for ix in 0..8 {
                half[iy * 8 + ix] = block.get(ix, iy * 2 + idx);
            }
        }
        dct_2d(half, 8, 4, DctDirection::Inverse);
    }

    for (idx, half) in halves.iter().enumerate() {
        for iy in 0..4 {
            for ix in 0..8 {
                let (x, y) = if transpose {
                    (idx * 4 + iy, ix)
                } else {
                    (ix, idx * 4 + iy)
                };
                block.set(x, y, half[iy * 8 + ix]);
            }
        }
    }
}

fn inverse_afv(block: &mut CoeffBlock<'_>, flip_x: bool, flip_y: bool) {
    // The AFV quadrant: 16 coefficients through a hand-crafted orthonormal
    // basis covering a 4x4 corner.
    let mut coeff_afv = [0.0f32; 16];
    coeff_afv[0] = (block.get(0, 0) + block.get(1, 0) + block.get(0, 1)) * 4.0;
    for (idx, value) in coeff_afv.iter_mut().enumerate().skip(1) {
        let iy = idx / 4;
        let ix = idx % 4;
        *value = block.get(2 * ix, 2 * iy);
    }

    let mut samples_afv = [0.0f32; 16];
    for (coeff, basis) in coeff_afv.into_iter().zip(AFV_BASIS) {
        for (sample, basis) in samples_afv.iter_mut().zip(basis) {
            *sample += coeff * basis;
        }
    }

    // The other quadrant of the top half is a DCT4x4.
    let mut quad_4x4 = [0.0f32; 16];
    quad_4x4[0] = block.get(0, 0) - block.get(1, 0) + block.get(0, 1);
    for iy in 0..4 {
        for ix in 0..4 {
            if ix | iy == 0 {
                continue;
            }
            quad_4x4[ix * 4 + iy] = block.get(2 * ix + 1, 2 * iy);
        }
    }
    dct_2d(&mut quad_4x4, 4, 4, DctDirection::Inverse);

    // The bottom half is a DCT4x8.
    let mut half_4x8 = [0.0f32; 32];
    half_4x8[0] = block.get(0, 0) - block.get(0, 1);
    for iy in 0..4 {
        for ix in 0..8 {
            if ix | iy == 0 {
                continue;
            }
            half_4x8[iy * 8 + ix] = block.get(ix, 2 * iy + 1);
        }
    }
    dct_2d(&mut half_4x8, 8, 4, DctDirection::Inverse);

    let afv_x0 = if flip_x { 4 } else { 0 };
    let afv_y0 = if flip_y { 4 } else { 0 };
    for iy in 0..4 {
        let sy = if flip_y { 3 - iy } else { iy };
        for ix in 0..4 {
            let sx = if flip_x { 3 - ix } else { ix };
            block.set(afv_x0 + ix, afv_y0 + iy, samples_afv[sy * 4 + sx]);
        }
    }
    for iy in 0..4 {
        for ix in 0..4 {
            block.set(4 - afv_x0 + ix, afv_y0 + iy, quad_4x4[iy * 4 + ix]);
        }
    }
    for iy in 0..4 {
        for ix in 0..8 {
            block.set(ix, 4 - afv_y0 + iy, half_4x8[iy * 8 + ix]);
        }
    }
}

#[allow(clippy::excessive_precision)]
const AFV_BASIS: [[f32; 16]; 16] = [
    [
        0.25, 0.25, 0.25, 0.25, 0.25, 0.25, 0.25, 0.25, 0.25, 0.25, 0.25, 0.25, 0.25, 0.25, 0.25,
        0.25,
    ],
    [
        0.876902929799142,
        0.2206518106944235,
        -0.10140050393753763,
        -0.1014005039375375,
        0.2206518106944236,
        -0.10140050393753777,
        -0.10140050393753772,
        -0.10140050393753763,
        -0.10140050393753758,
        -0.10140050393753769,
        -0.1014005039375375,
        -0.10140050393753768,
        -0.10140050393753768,
        -0.10140050393753759,
        -0.10140050393753763,
        -0.10140050393753741,
    ],
    [
        0.0,
        0.0,
        0.40670075830260755,
        0.44444816619734445,
        0.0,
        0.0,
        0.19574399372042936,
        0.2929100136981264,
        -0.40670075830260716,
        -0.19574399372042872,
        0.0,
        0.11379074460448091,
        -0.44444816619734384,
        -0.29291001369812636,
        -0.1137907446044814,
        0.0,
    ],
    [
        0.0,
        0.0,
        -0.21255748058288748,
        0.3085497062849767,
        0.0,
        0.4706702258572536,
        -0.1621205195722993,
        0.0,
        -0.21255748058287047,
        -0.16212051957228327,
        -0.47067022585725277,
        -0.1464291867126764,
        0.3085497062849487,
        0.0,
        -0.14642918671266536,
        0.4251149611657548,
    ],
    [
        0.0,
        -0.7071067811865474,
        0.0,
        0.0,
        std::f32::consts::FRAC_1_SQRT_2,
        0.0,
        0.0,
        0.0,
        0.0,
        0.0,
        0.0,
        0.0,
        0.0,
        0.0,
        0.0,
        0.0,
    ],
    [
        -0.4105377591765233,
        0.6235485373547691,
        -0.06435071657946274,
        -0.06435071657946266,
        0.6235485373547694,
        -0.06435071657946284,
        -0.0643507165794628,
        -0.06435071657946274,
        -0.06435071657946272,
        -0.06435071657946279,
        -0.06435071657946266,
        -0.06435071657946277,
        -0.06435071657946277,
        -0.06435071657946273,
        -0.06435071657946274,
        -0.0643507165794626,
    ],
    [
        0.0,
        0.0,
        -0.4517556589999482,
        0.15854503551840063,
        0.0,
        -0.04038515160822202,
        0.0074182263792423875,
        0.39351034269210167,
        -0.45175565899994635,
        0.007418226379244351,
        0.1107416575309343,
        0.08298163094882051,
        0.15854503551839705,
        0.3935103426921022,
        0.0829816309488214,
        -0.45175565899994796,
    ],
    [
        0.0,
        0.0,
        -0.304684750724869,
        0.5112616136591823,
        0.0,
        0.0,
        -0.290480129728998,
        -0.06578701549142804,
        0.304684750724884,
        0.2904801297290076,
        0.0,
        -0.23889773523344604,
        -0.5112616136592012,
        0.06578701549142545,
        0.23889773523345467,
        0.0,
    ],
    [
        0.0,
        0.0,
        0.3017929516615495,
        0.25792362796341184,
        0.0,
        0.16272340142866204,
        0.09520022653475037,
        0.0,
        0.3017929516615503,
        0.09520022653475055,
        -0.16272340142866173,
        -0.35312385449816297,
        0.25792362796341295,
        0.0,
        -0.3531238544981624,
        -0.6035859033230976,
    ],
    [
        0.0,
        0.0,
        0.40824829046386274,
        0.0,
        0.0,
        0.0,
        0.0,
        -0.4082482904638628,
        -0.4082482904638635,
        0.0,
        0.0,
        -0.40824829046386296,
        0.0,
        0.4082482904638634,
        0.408248290463863,
        0.0,
    ],
    [
        0.0,
        0.0,
        0.1747866975480809,
        0.0812611176717539,
        0.0,
        0.0,
        -0.3675398009862027,
        -0.307882213957909,
        -0.17478669754808135,
        0.3675398009862011,
        0.0,
        0.4826689115059883,
        -0.08126111767175039,
        0.30788221395790305,
        -0.48266891150598584,
        0.0,
    ],
    [
        0.0,
        0.0,
        -0.21105601049335784,
        0.18567180916109802,
        0.0,
        0.0,
        0.49215859013738733,
        -0.38525013709251915,
        0.21105601049335806,
        -0.49215859013738905,
        0.0,
        0.17419412659916217,
        -0.18567180916109904,
        0.3852501370925211,
        -0.1741941265991621,
        0.0,
    ],
    [
        0.0,
        0.0,
        -0.14266084808807264,
        -0.3416446842253372,
        0.0,
        0.7367497537172237,
        0.24627107722075148,
        -0.08574019035519306,
        -0.14266084808807344,
        0.24627107722075137,
        0.14883399227113567,
        -0.04768680350229251,
        -0.3416446842253373,
        -0.08574019035519267,
        -0.047686803502292804,
        -0.14266084808807242,
    ],
    [
        0.0,
        0.0,
        -0.13813540350758585,
        0.3302282550303788,
        0.0,
        0.08755115000587084,
        -0.07946706605909573,
        -0.4613374887461511,
        -0.13813540350758294,
        -0.07946706605910261,
        0.49724647109535086,
        0.12538059448563663,
        0.3302282550303805,
        -0.4613374887461554,
        0.12538059448564315,
        -0.13813540350758452,
    ],
    [
        0.0,
        0.0,
        -0.17437602599651067,
        0.0702790691196284,
        0.0,
        -0.2921026642334881,
        0.3623817333531167,
        0.0,
        -0.1743760259965108,
        0.36238173335311646,
        0.29210266423348785,
        -0.4326608024727445,
        0.07027906911962818,
        0.0,
        -0.4326608024727457,
        0.34875205199302267,
    ],
    [
        0.0,
        0.0,
        0.11354987314994337,
        -0.07417504595810355,
        0.0,
        0.19402893032594343,
        -0.435190496523228,
        0.21918684838857466,
        0.11354987314994257,
        -0.4351904965232251,
        0.5550443808910661,
        -0.25468277124066463,
        -0.07417504595810233,
        0.2191868483885728,
        -0.25468277124066413,
        0.1135498731499429,
    ],
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn afv_basis_is_orthonormal() {
        for i in 0..16 {
            for j in 0..16 {
                let dot: f32 = AFV_BASIS[i]
                    .iter()
                    .zip(AFV_BASIS[j])
                    .map(|(a, b)| a * b)
                    .sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-5, "basis {i} . {j} = {dot}");
            }
        }
    }

    #[test]
    fn llf_scale_of_dc_is_one() {
        assert_eq!(llf_scale(4, 0), 1.0);
    }

    #[test]
    fn llf_scale_matches_block_averages() {
        // Build a length-16 inverse DCT from 2 low coefficients; its two
        // 8-sample block averages must equal the inverse DCT of the scaled
        // coefficients at length 2.
        let coeffs = [0.7f32, -0.3];
        let mut full = [0.0f32; 16];
        full[0] = coeffs[0];
        full[1] = coeffs[1];
        let mut scratch = [0.0f32; 16];
        dct_1d(&mut full, &mut scratch, DctDirection::Inverse);

        let avg0: f32 = full[..8].iter().sum::<f32>() / 8.0;
        let avg1: f32 = full[8..].iter().sum::<f32>() / 8.0;

        let mut low = [coeffs[0], coeffs[1] * llf_scale(2, 1)];
        let mut scratch = [0.0f32; 2];
        dct_1d(&mut low, &mut scratch, DctDirection::Inverse);

        assert!((low[0] - avg0).abs() < 1e-5, "{} vs {avg0}", low[0]);
        assert!((low[1] - avg1).abs() < 1e-5, "{} vs {avg1}", low[1]);
    }
}
