//! Transfer function application.

/// Converts linear samples to the sRGB transfer curve in place.
pub fn linear_to_srgb(samples: &mut [f32]) {
    for v in samples {
        let a = *v;
        *v = if a <= 0.0031308 {
            12.92 * a
        } else {
            1.055 * a.powf(1.0 / 2.4) - 0.055
        };
    }
}

/// Applies `v^gamma` to linear samples, clamping tiny inputs to zero.
pub fn apply_gamma(samples: &mut [f32], gamma: f32) {
    for v in samples {
        let a = *v;
        *v = if a <= 1e-5 { 0.0 } else { a.powf(gamma) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_endpoints() {
        let mut samples = [0.0f32, 1.0];
        linear_to_srgb(&mut samples);
        assert!(samples[0].abs() < 1e-6);
        assert!((samples[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn srgb_linear_segment() {
        let mut samples = [0.001f32];
        linear_to_srgb(&mut samples);
        assert!((samples[0] - 0.01292).abs() < 1e-6);
    }
}
