//! Attack onset detection
//!
//! Finds the first moment a stem's energy rises above the silence floor.
//! The estimate is coarse (100ms resolution) and is shown as a per-stem
//! annotation only - it is never fed back into playback alignment.

/// RMS analysis window length in milliseconds
const WINDOW_MS: u32 = 100;

/// RMS threshold above which a window counts as the start of audio,
/// for signal normalized to [-1, 1]
const RMS_THRESHOLD: f32 = 0.01;

/// Detect the first attack onset in a PCM channel
///
/// Scans fixed non-overlapping 100ms windows from the start and returns the
/// start time (in ms, rounded) of the first window whose RMS exceeds 0.01.
/// Returns 0 when nothing exceeds the threshold (all-silent stems) or when
/// the input is empty.
pub fn detect_onset(samples: &[f32], sample_rate: u32) -> u32 {
    let window = (u64::from(WINDOW_MS) * u64::from(sample_rate) / 1000) as usize;
    if window == 0 || samples.is_empty() {
        return 0;
    }

    let mut start = 0;
    while start < samples.len() {
        let end = (start + window).min(samples.len());
        let window_samples = &samples[start..end];

        let sum_squares: f64 = window_samples
            .iter()
            .map(|&s| f64::from(s) * f64::from(s))
            .sum();
        let rms = (sum_squares / window_samples.len() as f64).sqrt() as f32;

        if rms > RMS_THRESHOLD {
            let seconds = start as f64 / f64::from(sample_rate);
            return (seconds * 1000.0).round() as u32;
        }

        start = end;
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 44_100;

    #[test]
    fn test_silent_buffer_returns_zero() {
        assert_eq!(detect_onset(&vec![0.0; RATE as usize], RATE), 0);
        assert_eq!(detect_onset(&[], RATE), 0);
    }

    #[test]
    fn test_immediate_attack() {
        let samples: Vec<f32> = (0..RATE as usize)
            .map(|i| 0.8 * (i as f32 * 0.05).sin())
            .collect();
        assert_eq!(detect_onset(&samples, RATE), 0);
    }

    #[test]
    fn test_attack_after_silence() {
        // 500ms of silence, then a tone: onset should land on the 500ms window
        let mut samples = vec![0.0f32; (RATE / 2) as usize];
        samples.extend((0..RATE as usize).map(|i| 0.8 * (i as f32 * 0.05).sin()));
        let onset = detect_onset(&samples, RATE);
        assert!((400..=600).contains(&onset), "onset {} out of range", onset);
    }

    #[test]
    fn test_noise_floor_ignored() {
        // Low-level noise below the threshold never triggers
        let samples: Vec<f32> = (0..RATE as usize)
            .map(|i| if i % 2 == 0 { 0.005 } else { -0.005 })
            .collect();
        assert_eq!(detect_onset(&samples, RATE), 0);
    }
}
