//! Sample predictors, including the self-correcting (weighted) predictor.

use hematite_bitstream::{Bitstream, Bundle, Result as BitstreamResult};

/// Parameters of the self-correcting predictor.
#[derive(Debug, Clone)]
pub struct WpHeader {
    pub p1: u32,
    pub p2: u32,
    pub p3: [u32; 5],
    pub w: [u32; 4],
}

impl Default for WpHeader {
    fn default() -> Self {
        Self {
            p1: 16,
            p2: 10,
            p3: [7, 7, 7, 0, 0],
            w: [13, 12, 12, 12],
        }
    }
}

impl<Ctx> Bundle<Ctx> for WpHeader {
    type Error = hematite_bitstream::Error;

    fn parse(bitstream: &mut Bitstream, _: Ctx) -> BitstreamResult<Self> {
        if bitstream.read_bool()? {
            return Ok(Self::default());
        }
        let p1 = bitstream.read_bits(5)?;
        let p2 = bitstream.read_bits(5)?;
        let mut p3 = [0u32; 5];
        for p in &mut p3 {
            *p = bitstream.read_bits(5)?;
        }
        let mut w = [0u32; 4];
        for w in &mut w {
            *w = bitstream.read_bits(4)?;
        }
        Ok(Self { p1, p2, p3, w })
    }
}

/// The 14 fixed predictors.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[repr(u8)]
pub enum Predictor {
    #[default]
    Zero = 0,
    West,
    North,
    AvgWestAndNorth,
    Select,
    Gradient,
    SelfCorrecting,
    NorthEast,
    NorthWest,
    WestWest,
    AvgWestAndNorthWest,
    AvgNorthAndNorthWest,
    AvgNorthAndNorthEast,
    WeightedAverage,
}

impl TryFrom<u32> for Predictor {
    type Error = crate::Error;

    fn try_from(value: u32) -> crate::Result<Self> {
        use Predictor::*;
        Ok(match value {
            0 => Zero,
            1 => West,
            2 => North,
            3 => AvgWestAndNorth,
            4 => Select,
            5 => Gradient,
            6 => SelfCorrecting,
            7 => NorthEast,
            8 => NorthWest,
            9 => WestWest,
            10 => AvgWestAndNorthWest,
            11 => AvgNorthAndNorthWest,
            12 => AvgNorthAndNorthEast,
            13 => WeightedAverage,
            _ => return Err(crate::Error::InvalidPredictor(value)),
        })
    }
}

/// Neighborhood of the sample being decoded, with out-of-range neighbors
/// already substituted.
#[derive(Debug, Copy, Clone, Default)]
pub struct Neighbors {
    pub w: i32,
    pub n: i32,
    pub nw: i32,
    pub ne: i32,
    pub nn: i32,
    pub ww: i32,
    pub nee: i32,
}

impl Predictor {
    /// Computes the prediction. `wp` must be present when the predictor is
    /// [`Predictor::SelfCorrecting`].
    pub fn predict(self, nb: &Neighbors, wp: Option<&WpPrediction>) -> i64 {
        use Predictor::*;
        let w = nb.w as i64;
        let n = nb.n as i64;
        let nw = nb.nw as i64;
        let ne = nb.ne as i64;

        match self {
            Zero => 0,
            West => w,
            North => n,
            AvgWestAndNorth => (w + n) / 2,
            Select => {
                if nb.n.abs_diff(nb.nw) < nb.w.abs_diff(nb.nw) {
                    w
                } else {
                    n
                }
            }
            Gradient => (n + w - nw).clamp(w.min(n), w.max(n)),
            SelfCorrecting => {
                let wp = wp.expect("self-correcting predictor without weighted state");
                (wp.pred + 3) >> 3
            }
            NorthEast => ne,
            NorthWest => nw,
            WestWest => nb.ww as i64,
            AvgWestAndNorthWest => (w + nw) / 2,
            AvgNorthAndNorthWest => (n + nw) / 2,
            AvgNorthAndNorthEast => (n + ne) / 2,
            WeightedAverage => {
                let nn = nb.nn as i64;
                let ww = nb.ww as i64;
                let nee = nb.nee as i64;
                (6 * n - 2 * nn + 7 * w + ww + nee + 3 * ne + 8) / 16
            }
        }
    }
}

/// Output of the self-correcting predictor for one sample.
#[derive(Debug, Clone)]
pub struct WpPrediction {
    /// Prediction scaled by 8.
    pub pred: i64,
    /// Largest-magnitude true error among the W/N/NW/NE neighbors; this is
    /// MA tree property 15.
    pub max_error: i32,
    subpred: [i64; 4],
}

/// Running state of the self-correcting predictor over one channel.
///
/// Keeps a two-row trail of per-column errors: four sub-predictor
/// approximation errors plus the signed true error.
#[derive(Debug)]
pub struct WeightedPredictor {
    width: usize,
    params: WpHeader,
    x: usize,
    true_err_prev: Vec<i32>,
    true_err_curr: Vec<i32>,
    sub_err_prev: Vec<[u32; 4]>,
    sub_err_curr: Vec<[u32; 4]>,
    // Error registers around the current position.
    true_w: i32,
    true_n: i32,
    true_nw: i32,
    true_ne: i32,
    sub_nw_ww: [u32; 4],
    sub_n_w: [u32; 4],
    sub_ne: [u32; 4],
}

impl WeightedPredictor {
    const DIV_LOOKUP: [u32; 65] = Self::build_div_lookup();

    const fn build_div_lookup() -> [u32; 65] {
        let mut table = [0u32; 65];
        let mut i = 1usize;
        while i <= 64 {
            table[i] = ((1u64 << 24) / i as u64) as u32;
            i += 1;
        }
        table
    }

    pub fn new(width: usize, params: WpHeader) -> Self {
        Self {
            width,
            params,
            x: 0,
            true_err_prev: vec![0; width],
            true_err_curr: vec![0; width],
            sub_err_prev: vec![[0; 4]; width],
            sub_err_curr: vec![[0; 4]; width],
            true_w: 0,
            true_n: 0,
            true_nw: 0,
            true_ne: 0,
            sub_nw_ww: [0; 4],
            sub_n_w: [0; 4],
            sub_ne: [0; 4],
        }
    }

    /// Computes the weighted prediction for the current position.
    pub fn predict(&self, nb: &Neighbors) -> WpPrediction {
        let params = &self.params;
        let true_w = self.true_w as i64;
        let true_n = self.true_n as i64;
        let true_nw = self.true_nw as i64;
        let true_ne = self.true_ne as i64;

        let n8 = (nb.n as i64) << 3;
        let nw8 = (nb.nw as i64) << 3;
        let ne8 = (nb.ne as i64) << 3;
        let w8 = (nb.w as i64) << 3;
        let nn8 = (nb.nn as i64) << 3;

        let subpred = [
            w8 + ne8 - n8,
            n8 - (((true_w + true_n + true_ne) * params.p1 as i64) >> 5),
            w8 - (((true_w + true_n + true_nw) * params.p2 as i64) >> 5),
            n8 - ((true_nw * params.p3[0] as i64
                + true_n * params.p3[1] as i64
                + true_ne * params.p3[2] as i64
                + (nn8 - n8) * params.p3[3] as i64
                + (nw8 - w8) * params.p3[4] as i64)
                >> 5),
        ];

        let mut weight = [0u32; 4];
        for (i, weight) in weight.iter_mut().enumerate() {
            let err_sum = self.sub_nw_ww[i]
                .wrapping_add(self.sub_n_w[i])
                .wrapping_add(self.sub_ne[i]);
            let shift = floor_log2(err_sum as u64 + 1).saturating_sub(5);
            *weight =
                4 + ((params.w[i] * Self::DIV_LOOKUP[(err_sum >> shift) as usize + 1]) >> shift);
        }

        let sum_weights: u32 = weight.iter().sum();
        let log_weight = floor_log2(sum_weights as u64) - 4;
        for weight in &mut weight {
            *weight >>= log_weight;
        }
        let sum_weights: u32 = weight.iter().sum();

        let mut acc = (sum_weights as i64 >> 1) - 1;
        for (subpred, weight) in subpred.iter().zip(weight) {
            acc += subpred * weight as i64;
        }
        let mut pred = (acc * Self::DIV_LOOKUP[sum_weights as usize] as i64) >> 24;
        if ((self.true_n ^ self.true_w) | (self.true_n ^ self.true_nw)) <= 0 {
            pred = pred.clamp(n8.min(w8).min(ne8), n8.max(w8).max(ne8));
        }

        let mut max_error = self.true_w;
        for err in [self.true_n, self.true_nw, self.true_ne] {
            if err.abs() > max_error.abs() {
                max_error = err;
            }
        }

        WpPrediction {
            pred,
            max_error,
            subpred,
        }
    }

    /// Records the decoded sample, advancing the error trail by one column.
    pub fn record(&mut self, prediction: &WpPrediction, sample: i32) {
        let sample8 = (sample as i64) << 3;
        let true_err = prediction.pred - sample8;
        let mut sub_err = [0u32; 4];
        for (err, subpred) in sub_err.iter_mut().zip(prediction.subpred) {
            *err = ((subpred.abs_diff(sample8) + 3) >> 3) as u32;
        }

        let x = self.x;
        self.true_err_curr[x] = true_err as i32;
        self.sub_err_curr[x] = sub_err;
        self.x += 1;

        if self.x >= self.width {
            // Row wrap: the trail of the finished row becomes the previous
            // row, and the registers restart at column 0.
            std::mem::swap(&mut self.true_err_prev, &mut self.true_err_curr);
            std::mem::swap(&mut self.sub_err_prev, &mut self.sub_err_curr);
            self.x = 0;

            self.true_w = 0;
            self.true_n = self.true_err_prev[0];
            self.true_nw = self.true_n;
            self.sub_n_w = self.sub_err_prev[0];
            self.sub_nw_ww = self.sub_n_w;
            if self.width <= 1 {
                self.true_ne = self.true_n;
                self.sub_ne = self.sub_n_w;
            } else {
                self.true_ne = self.true_err_prev[1];
                self.sub_ne = self.sub_err_prev[1];
            }
        } else {
            self.true_w = true_err as i32;
            self.true_nw = self.true_n;
            self.true_n = self.true_ne;
            self.sub_nw_ww = self.sub_n_w;
            self.sub_n_w = self.sub_ne;
            // Accumulating the new error into the N/W register spreads it to
            // the E and EE positions of the next predictions.
            for (acc, err) in self.sub_n_w.iter_mut().zip(sub_err) {
                *acc = acc.wrapping_add(err);
            }

            if self.x + 1 >= self.width {
                self.true_ne = self.true_n;
                self.sub_ne = self.sub_n_w;
            } else {
                self.true_ne = self.true_err_prev[self.x + 1];
                self.sub_ne = self.sub_err_prev[self.x + 1];
            }
        }
    }
}

fn floor_log2(x: u64) -> u32 {
    u64::BITS - 1 - x.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_clamps_to_neighbor_range() {
        let nb = Neighbors {
            w: 10,
            n: 20,
            nw: 25,
            ..Default::default()
        };
        // n + w - nw = 5, clamped into [10, 20].
        assert_eq!(Predictor::Gradient.predict(&nb, None), 10);
    }

    #[test]
    fn select_picks_smoother_side() {
        let nb = Neighbors {
            w: 3,
            n: 100,
            nw: 99,
            ..Default::default()
        };
        assert_eq!(Predictor::Select.predict(&nb, None), 100);
    }

    #[test]
    fn weighted_predictor_tracks_constant_signal() {
        // On a constant channel every sub-predictor is exact, so the
        // prediction must stay at the constant value.
        let mut wp = WeightedPredictor::new(4, WpHeader::default());
        let nb = |v: i32| Neighbors {
            w: v,
            n: v,
            nw: v,
            ne: v,
            nn: v,
            ww: v,
            nee: v,
        };

        // First sample has a zero neighborhood.
        let first = wp.predict(&nb(0));
        assert_eq!((first.pred + 3) >> 3, 0);
        wp.record(&first, 42);

        for _ in 0..16 {
            let prediction = wp.predict(&nb(42));
            wp.record(&prediction, 42);
        }
        let prediction = wp.predict(&nb(42));
        assert_eq!((prediction.pred + 3) >> 3, 42);
        assert_eq!(prediction.max_error, 0);
    }
}
