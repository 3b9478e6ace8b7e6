//! Autocorrelation tempogram.
//!
//! Column `t` is the autocorrelation of the onset envelope inside a
//! `win_length`-frame Hann window centred on frame `t` (zero outside the
//! envelope), normalised by its lag-0 value and restricted to the lags whose
//! tempo falls inside the configured BPM range.

use rayon::prelude::*;

use crate::{
    fft::Autocorrelator, CancellationToken, Matrix, Result, TempogramConfig, VisionWavError,
    WindowFunction,
};

#[derive(Debug, Clone)]
pub struct TempogramEstimator {
    frame_rate: f64,
    win_length: usize,
    lags: Vec<usize>,
    window: Vec<f32>,
    autocorrelator: Autocorrelator,
}

impl TempogramEstimator {
    /// Creates an estimator for envelopes at `sample_rate / hop_length`
    /// frames per second, resolving the BPM range to lag rows.
    pub fn new(sample_rate: u32, hop_length: usize, config: &TempogramConfig) -> Result<Self> {
        config.validate()?;
        if sample_rate == 0 || hop_length == 0 {
            return Err(VisionWavError::invalid(
                "sample_rate and hop_length must be positive for a tempogram",
            ));
        }

        let frame_rate = sample_rate as f64 / hop_length as f64;
        let lag_of = |bpm: f32| frame_rate * 60.0 / bpm as f64;
        let shortest = (lag_of(config.max_bpm).ceil() as usize).max(1);
        let longest = (lag_of(config.min_bpm).floor() as usize).min(config.win_length - 1);
        if shortest > longest {
            return Err(VisionWavError::invalid(format!(
                "tempo range {}..{} BPM maps to no lag within a {}-frame window",
                config.min_bpm, config.max_bpm, config.win_length
            )));
        }

        Ok(Self {
            frame_rate,
            win_length: config.win_length,
            lags: (shortest..=longest).collect(),
            window: WindowFunction::Hann.coefficients(config.win_length),
            autocorrelator: Autocorrelator::new(config.win_length)?,
        })
    }

    /// Lag in frames of every output row, ascending.
    pub fn lags(&self) -> &[usize] {
        &self.lags
    }

    /// Tempo in BPM of every output row (descending, as lags ascend).
    pub fn bpms(&self) -> Vec<f32> {
        self.lags
            .iter()
            .map(|&lag| (60.0 * self.frame_rate / lag as f64) as f32)
            .collect()
    }

    /// `[lags().len(), envelope.len()]` normalised autocorrelation.
    pub fn estimate(&self, envelope: &[f32], cancel: &CancellationToken) -> Result<Matrix> {
        let n_lags = self.lags.len();
        let n_frames = envelope.len();
        let mut columns = Matrix::zeros(n_frames, n_lags)?.into_vec();
        if columns.is_empty() {
            return Matrix::zeros(n_lags, n_frames);
        }

        let max_lag = self.lags[n_lags - 1];
        let half = self.win_length / 2;

        columns
            .par_chunks_mut(n_lags)
            .enumerate()
            .try_for_each_init(
                || {
                    (
                        self.autocorrelator.clone(),
                        vec![0.0f32; self.win_length],
                        vec![0.0f32; max_lag + 1],
                    )
                },
                |(autocorrelator, segment, acf), (t, column)| -> Result<()> {
                    cancel.check()?;
                    for (i, (value, &w)) in segment.iter_mut().zip(&self.window).enumerate() {
                        let position = (t + i).checked_sub(half);
                        let sample = position.and_then(|p| envelope.get(p)).copied();
                        *value = sample.unwrap_or(0.0) * w;
                    }
                    autocorrelator.autocorrelate(segment, acf)?;

                    let energy = acf[0];
                    if energy > f32::MIN_POSITIVE {
                        for (out, &lag) in column.iter_mut().zip(&self.lags) {
                            *out = acf[lag] / energy;
                        }
                    }
                    Ok(())
                },
            )?;

        tracing::debug!(frames = n_frames, lags = n_lags, "tempogram computed");
        Matrix::from_column_major(n_lags, n_frames, &columns)
    }
}

/// Tempogram over the default 30-480 BPM range.
pub fn tempogram(
    onset_envelope: &[f32],
    sample_rate: u32,
    hop_length: usize,
    win_length: usize,
) -> Result<Matrix> {
    let config = TempogramConfig {
        win_length,
        ..TempogramConfig::default()
    };
    TempogramEstimator::new(sample_rate, hop_length, &config)?
        .estimate(onset_envelope, &CancellationToken::new())
}
