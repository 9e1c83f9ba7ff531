//! Waveform envelope synthesis
//!
//! Downsamples a PCM channel into one amplitude value per display column.
//! Each column blends RMS (perceived loudness) with peak-to-peak swing so
//! that both sustained material and transients stay visible at 800 pixels.

use crate::types::{WaveformEnvelope, ENVELOPE_LEN};

/// RMS weighting in the per-column amplitude blend
const RMS_WEIGHT: f32 = 1.8;
/// Peak-to-peak weighting in the per-column amplitude blend
const PEAK_WEIGHT: f32 = 0.6;
/// Exponent for soft compression after normalization; < 1 lifts quiet detail
const COMPRESSION_EXP: f32 = 0.7;

/// Generate a display envelope from a PCM channel
///
/// Partitions `samples` into [`ENVELOPE_LEN`] contiguous blocks. Per block the
/// amplitude is `max(rms * 1.8, (max - min) * 0.6)`; empty blocks (short
/// sources) emit 0. The result is normalized by the global maximum and
/// soft-compressed with `value^0.7`, so every point lands in `[0, 1]`.
///
/// Deterministic: the same samples always produce the same envelope.
pub fn envelope(samples: &[f32]) -> WaveformEnvelope {
    WaveformEnvelope::from_analysis(envelope_points(samples, ENVELOPE_LEN))
}

fn envelope_points(samples: &[f32], target_len: usize) -> Vec<f32> {
    let source_len = samples.len();
    let samples_per_column = source_len as f64 / target_len as f64;
    let mut points = Vec::with_capacity(target_len);

    for col in 0..target_len {
        let start = (col as f64 * samples_per_column) as usize;
        let end = (((col + 1) as f64) * samples_per_column) as usize;
        let block = &samples[start.min(source_len)..end.min(source_len)];

        if block.is_empty() {
            points.push(0.0);
            continue;
        }

        let mut max = f32::NEG_INFINITY;
        let mut min = f32::INFINITY;
        let mut sum_squares = 0.0f64;
        for &sample in block {
            max = max.max(sample);
            min = min.min(sample);
            sum_squares += f64::from(sample) * f64::from(sample);
        }

        let rms = (sum_squares / block.len() as f64).sqrt() as f32;
        let peak_to_peak = (max - min).abs();
        points.push((rms * RMS_WEIGHT).max(peak_to_peak * PEAK_WEIGHT));
    }

    // Normalize by the loudest column; an all-silent source stays all-zero
    let global_max = points.iter().cloned().fold(0.0f32, f32::max);
    if global_max > 0.0 {
        for value in &mut points {
            *value = (*value / global_max).powf(COMPRESSION_EXP);
        }
    }

    points
}
