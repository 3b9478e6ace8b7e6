//! Waveform helpers: mono down-mixing, sample conversion and synthetic test
//! signals.

use std::f64::consts::PI;

use crate::{Result, VisionWavError};

/// Averages interleaved multi-channel samples into one channel. A trailing
/// partial frame is dropped.
pub fn downmix(interleaved: &[f32], channels: usize) -> Result<Vec<f32>> {
    match channels {
        0 => Err(VisionWavError::invalid("channel count must be positive")),
        1 => Ok(interleaved.to_vec()),
        _ => {
            let scale = 1.0 / channels as f32;
            Ok(interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() * scale)
                .collect())
        }
    }
}

/// Narrows 64-bit samples to the pipeline's 32-bit representation.
pub fn to_f32(samples: &[f64]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32).collect()
}

/// Unit-amplitude sine of `frequency` Hz lasting `seconds`.
pub fn tone(frequency: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
    let len = (sample_rate as f64 * seconds as f64).round() as usize;
    let step = 2.0 * PI * frequency as f64 / sample_rate as f64;
    (0..len).map(|n| (step * n as f64).sin() as f32).collect()
}

/// Unit impulses every `period` samples starting at 0.
pub fn impulse_train(len: usize, period: usize) -> Vec<f32> {
    let period = period.max(1);
    (0..len)
        .map(|n| if n % period == 0 { 1.0 } else { 0.0 })
        .collect()
}

/// Short linearly decaying pulses at `bpm` beats per minute.
///
/// Silent when `bpm` is not a positive finite tempo or when beats would be
/// less than one sample apart.
pub fn click_track(bpm: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
    let len = (sample_rate as f64 * seconds as f64).round() as usize;
    let mut out = vec![0.0f32; len];
    if !(bpm.is_finite() && bpm > 0.0) || sample_rate == 0 {
        return out;
    }

    let interval = sample_rate as f64 * 60.0 / bpm as f64;
    if interval < 1.0 {
        return out;
    }
    let click_len = (sample_rate as usize / 100).max(1);
    let mut beat = 0.0f64;
    while (beat as usize) < len {
        let start = beat as usize;
        for (i, sample) in out[start..].iter_mut().take(click_len).enumerate() {
            *sample = (1.0 - i as f64 / click_len as f64) as f32;
        }
        beat += interval;
    }
    out
}
