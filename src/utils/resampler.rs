//! Offline resampling of single channel sample buffers.
//!
//! Slot samples are converted once to the engine's rate at load time with a 4-point Hermite
//! interpolation, and exported audio is converted to the target file rate with plain linear
//! interpolation. Both run on the non-realtime thread over complete buffers; there is no
//! streaming state to carry.

// -------------------------------------------------------------------------------------------------

/// Resample one channel from `input_rate` to `output_rate` with 4-point, 3rd-order Hermite
/// interpolation. Returns the input unchanged when the rates already match.
pub fn resample_hermite(input: &[f32], input_rate: u32, output_rate: u32) -> Vec<f32> {
    if input_rate == output_rate || input.is_empty() || input_rate == 0 || output_rate == 0 {
        return input.to_vec();
    }

    let ratio = input_rate as f64 / output_rate as f64;
    let output_len = ((input.len() as f64 / ratio).ceil() as usize).max(1);
    let max_index = input.len() - 1;

    let mut output = Vec::with_capacity(output_len);
    for frame in 0..output_len {
        let src_pos = frame as f64 * ratio;
        let index = (src_pos as usize).min(max_index);
        let fraction = (src_pos - index as f64) as f32;

        let ym1 = input[index.saturating_sub(1)];
        let y0 = input[index];
        let y1 = input[(index + 1).min(max_index)];
        let y2 = input[(index + 2).min(max_index)];
        output.push(interpolate_hermite(ym1, y0, y1, y2, fraction));
    }
    output
}

/// Resample one channel from `input_rate` to `output_rate` with linear interpolation.
pub fn resample_linear(input: &[f32], input_rate: u32, output_rate: u32) -> Vec<f32> {
    if input_rate == output_rate || input.is_empty() || input_rate == 0 || output_rate == 0 {
        return input.to_vec();
    }

    let ratio = output_rate as f64 / input_rate as f64;
    let output_len = (((input.len() as f64) * ratio).round() as usize).max(1);
    let inverse_ratio = input_rate as f64 / output_rate as f64;
    let max_index = input.len() - 1;

    let mut output = Vec::with_capacity(output_len);
    for frame in 0..output_len {
        let src_pos = frame as f64 * inverse_ratio;
        let index = (src_pos as usize).min(max_index);
        let next_index = (index + 1).min(max_index);
        let fraction = (src_pos - index as f64) as f32;

        let s0 = input[index];
        let s1 = input[next_index];
        output.push(s0 + (s1 - s0) * fraction);
    }
    output
}

// -------------------------------------------------------------------------------------------------

// 4-point, 3rd-order Hermite x-form from "Polynomial Interpolators for High-Quality
// Resampling of Oversampled Audio" by Olli Niemitalo, p. 43:
// http://yehar.com/blog/wp-content/uploads/2009/08/deip.pdf
#[inline]
fn interpolate_hermite(ym1: f32, y0: f32, y1: f32, y2: f32, fraction: f32) -> f32 {
    debug_assert!((0.0..=1.0).contains(&fraction));

    let c0 = y0;
    let c1 = (y1 - ym1) * 0.5;
    let c2 = ym1 - y0 * 2.5 + y1 * 2.0 - y2 * 0.5;
    let c3 = (y2 - ym1) * 0.5 + (y0 - y1) * 1.5;
    ((c3 * fraction + c2) * fraction + c1) * fraction + c0
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_rates_pass_through() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_hermite(&input, 44100, 44100), input);
        assert_eq!(resample_linear(&input, 44100, 44100), input);
    }

    #[test]
    fn linear_preserves_constant_signals() {
        let input = vec![0.5; 441];
        let output = resample_linear(&input, 44100, 48000);
        assert_eq!(output.len(), 480);
        assert!(output.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn hermite_preserves_constant_signals() {
        let input = vec![0.25; 480];
        let output = resample_hermite(&input, 48000, 44100);
        assert_eq!(output.len(), 441);
        assert!(output.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn linear_interpolates_ramps() {
        // a linear ramp must survive linear resampling exactly (up to edge samples)
        let input: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let output = resample_linear(&input, 100, 200);
        assert_eq!(output.len(), 200);
        for (frame, sample) in output.iter().enumerate().take(198) {
            let expected = frame as f32 / 200.0;
            assert!(
                (sample - expected).abs() < 1e-4,
                "frame {frame}: {sample} != {expected}"
            );
        }
    }
}
