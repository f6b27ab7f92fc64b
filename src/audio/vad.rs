//! Energy measures used for voice activity detection.

/// Root-mean-square amplitude of a frame, normalized to 0.0..=1.0.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Whether a frame's energy is strictly above the speech threshold.
pub fn is_speech(samples: &[i16], threshold: f32) -> bool {
    calculate_rms(samples) > threshold
}

/// Converts an RMS level to decibels relative to full scale.
///
/// Silence maps to `f32::NEG_INFINITY`.
pub fn rms_to_dbfs(rms: f32) -> f32 {
    if rms <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * rms.log10()
    }
}
