//! Radix-2 DCT-II/DCT-III over power-of-two lengths, built on the
//! half-secant recursion.
//!
//! The normalization follows the codestream convention: the forward
//! transform divides by the length and scales non-DC terms by sqrt(2); the
//! inverse is its exact inverse.

use std::sync::OnceLock;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DctDirection {
    Forward,
    Inverse,
}

/// `1 / (2 cos((k + 0.5) pi / n))` for `k < n / 2`, keyed by `n/2 + k`.
///
/// Covers transform sizes up to 256.
fn half_secant(n: usize, k: usize) -> f32 {
    static TABLE: OnceLock<Vec<f32>> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        let mut table = vec![0.0f32; 256];
        let mut n = 2usize;
        while n <= 256 {
            for k in 0..n / 2 {
                let theta = (k as f64 + 0.5) * std::f64::consts::PI / n as f64;
                table[n / 2 + k] = (0.5 / theta.cos()) as f32;
            }
            n <<= 1;
        }
        table
    });
    table[n / 2 + k]
}

/// One-dimensional DCT over `io`, using `scratch` of the same length.
pub fn dct_1d(io: &mut [f32], scratch: &mut [f32], direction: DctDirection) {
    let n = io.len();
    debug_assert!(n.is_power_of_two() && n <= 256);
    debug_assert_eq!(scratch.len(), n);

    if n <= 1 {
        return;
    }
    if n == 2 {
        let sum = io[0] + io[1];
        let diff = io[0] - io[1];
        if direction == DctDirection::Forward {
            io[0] = sum / 2.0;
            io[1] = diff / 2.0;
        } else {
            io[0] = sum;
            io[1] = diff;
        }
        return;
    }

    let half = n / 2;
    if direction == DctDirection::Forward {
        // Butterfly into a sum half and a secant-scaled difference half,
        // recurse, then interleave with the overlapped-add reassembly.
        let (even, odd) = scratch.split_at_mut(half);
        for idx in 0..half {
            even[idx] = (io[idx] + io[n - idx - 1]) / 2.0;
            odd[idx] = (io[idx] - io[n - idx - 1]) * half_secant(n, idx) / 2.0;
        }
        let (even_scratch, odd_scratch) = io.split_at_mut(half);
        dct_1d(even, even_scratch, DctDirection::Forward);
        dct_1d(odd, odd_scratch, DctDirection::Forward);

        odd[0] *= std::f32::consts::SQRT_2;
        for idx in 0..half - 1 {
            odd[idx] += odd[idx + 1];
        }
        for idx in 0..half {
            io[idx * 2] = even[idx];
            io[idx * 2 + 1] = odd[idx];
        }
    } else {
        let (even, odd) = scratch.split_at_mut(half);
        for idx in 0..half {
            even[idx] = io[idx * 2];
            odd[idx] = io[idx * 2 + 1];
        }
        for idx in (1..half).rev() {
            odd[idx] += odd[idx - 1];
        }
        odd[0] *= std::f32::consts::SQRT_2;
        let (even_out, odd_out) = io.split_at_mut(half);
        dct_1d(even, even_out, DctDirection::Inverse);
        dct_1d(odd, odd_out, DctDirection::Inverse);
        for idx in 0..half {
            odd[idx] *= half_secant(n, idx);
        }
        for idx in 0..half {
            io[idx] = scratch[idx] + scratch[idx + half];
            io[n - idx - 1] = scratch[idx] - scratch[idx + half];
        }
    }
}

/// Two-dimensional DCT over a row-major `width x height` buffer.
pub fn dct_2d(buf: &mut [f32], width: usize, height: usize, direction: DctDirection) {
    debug_assert_eq!(buf.len(), width * height);
    let mut scratch = vec![0.0f32; width.max(height)];
    let mut column = vec![0.0f32; height];

    for row in buf.chunks_exact_mut(width) {
        dct_1d(row, &mut scratch[..width], direction);
    }
    for x in 0..width {
        for (y, value) in column.iter_mut().enumerate() {
            *value = buf[y * width + x];
        }
        dct_1d(&mut column, &mut scratch[..height], direction);
        for (y, value) in column.iter().enumerate() {
            buf[y * width + x] = *value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_forward(input: &[f32]) -> Vec<f32> {
        let n = input.len();
        (0..n)
            .map(|k| {
                let mut acc = 0.0f64;
                for (t, &v) in input.iter().enumerate() {
                    let angle = (k * (2 * t + 1)) as f64 / (2 * n) as f64 * std::f64::consts::PI;
                    acc += v as f64 * angle.cos();
                }
                acc /= n as f64;
                if k != 0 {
                    acc *= std::f64::consts::SQRT_2;
                }
                acc as f32
            })
            .collect()
    }

    fn naive_inverse(input: &[f32]) -> Vec<f32> {
        let n = input.len();
        (0..n)
            .map(|t| {
                let mut acc = input[0] as f64;
                for (k, &v) in input.iter().enumerate().skip(1) {
                    let angle = (k * (2 * t + 1)) as f64 / (2 * n) as f64 * std::f64::consts::PI;
                    acc += v as f64 * angle.cos() * std::f64::consts::SQRT_2;
                }
                acc as f32
            })
            .collect()
    }

    #[test]
    fn forward_matches_definition() {
        for log_n in 1..=8 {
            let n = 1usize << log_n;
            let input: Vec<f32> = (0..n).map(|i| ((i * 7 + 3) % 11) as f32 - 5.0).collect();
            let mut io = input.clone();
            let mut scratch = vec![0.0f32; n];
            dct_1d(&mut io, &mut scratch, DctDirection::Forward);

            let expected = naive_forward(&input);
            for (a, b) in io.iter().zip(&expected) {
                assert!((a - b).abs() < 1e-3, "n = {n}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn inverse_matches_definition() {
        for log_n in 1..=8 {
            let n = 1usize << log_n;
            let input: Vec<f32> = (0..n).map(|i| ((i * 5 + 1) % 13) as f32 / 4.0 - 1.0).collect();
            let mut io = input.clone();
            let mut scratch = vec![0.0f32; n];
            dct_1d(&mut io, &mut scratch, DctDirection::Inverse);

            let expected = naive_inverse(&input);
            for (a, b) in io.iter().zip(&expected) {
                assert!((a - b).abs() < 1e-3, "n = {n}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn round_trip_is_identity() {
        for n in [2usize, 4, 8, 32, 256] {
            let input: Vec<f32> = (0..n).map(|i| (i as f32 * 0.7).sin()).collect();
            let mut io = input.clone();
            let mut scratch = vec![0.0f32; n];
            dct_1d(&mut io, &mut scratch, DctDirection::Forward);
            dct_1d(&mut io, &mut scratch, DctDirection::Inverse);
            for (a, b) in io.iter().zip(&input) {
                assert!((a - b).abs() < 1e-4 * n as f32, "n = {n}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn round_trip_2d_rectangular() {
        let (width, height) = (16, 8);
        let input: Vec<f32> = (0..width * height).map(|i| ((i % 23) as f32) / 7.0).collect();
        let mut buf = input.clone();
        dct_2d(&mut buf, width, height, DctDirection::Forward);
        dct_2d(&mut buf, width, height, DctDirection::Inverse);
        for (a, b) in buf.iter().zip(&input) {
            assert!((a - b).abs() < 1e-3);
        }
    }
}
