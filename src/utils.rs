pub mod decoder;
pub mod resampler;

// -------------------------------------------------------------------------------------------------

/// Equal power stereo panning factors for a pan value in -1..=1.
pub fn panning_factors(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let theta = (pan + 1.0) * 0.5 * std::f32::consts::FRAC_PI_2;
    (theta.cos(), theta.sin())
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panning_is_equal_power() {
        let (l, r) = panning_factors(0.0);
        assert!((l - r).abs() < 1e-6);
        assert!((l * l + r * r - 1.0).abs() < 1e-6);

        let (l, r) = panning_factors(-1.0);
        assert!((l - 1.0).abs() < 1e-6 && r.abs() < 1e-6);

        let (l, r) = panning_factors(1.0);
        assert!(l.abs() < 1e-6 && (r - 1.0).abs() < 1e-6);
    }
}
