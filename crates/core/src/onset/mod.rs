use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    spectral::{self, DbReference},
    Matrix, MelFilterbank, OnsetConfig, Result, VisionWavError,
};

/// Dynamic range of the log-power mel features.
const ONSET_TOP_DB: f32 = 80.0;

/// Spectral representation the flux is measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnsetSource {
    /// Mel power in dB relative to 1.0.
    #[default]
    MelLogPower,
    /// Raw STFT magnitudes.
    LinearMagnitude,
}

/// How rectified differences are combined across rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnsetAggregate {
    #[default]
    Sum,
    Mean,
}

/// Spectral-flux novelty detector.
#[derive(Debug, Clone)]
pub struct OnsetDetector {
    mel: Option<Arc<MelFilterbank>>,
    lag: usize,
    aggregate: OnsetAggregate,
}

impl OnsetDetector {
    /// Builds a detector for `config.source`. A mel filterbank is required
    /// for [`OnsetSource::MelLogPower`].
    pub fn new(config: &OnsetConfig, mel: Option<Arc<MelFilterbank>>) -> Result<Self> {
        config.validate()?;
        let mel = match config.source {
            OnsetSource::MelLogPower => Some(mel.ok_or_else(|| {
                VisionWavError::invalid("mel onset features need a mel filterbank")
            })?),
            OnsetSource::LinearMagnitude => None,
        };
        Ok(Self {
            mel,
            lag: config.lag,
            aggregate: config.aggregate,
        })
    }

    /// Flux over raw magnitudes with lag 1 and summed differences.
    pub fn linear() -> Self {
        Self {
            mel: None,
            lag: 1,
            aggregate: OnsetAggregate::Sum,
        }
    }

    /// One non-negative value per STFT frame.
    pub fn onset_strength(&self, magnitude: &Matrix) -> Result<Vec<f32>> {
        let envelope = match &self.mel {
            Some(mel) => {
                let mel_power = mel.apply(&spectral::power(magnitude))?;
                let features =
                    spectral::power_to_db(&mel_power, DbReference::Fixed(1.0), Some(ONSET_TOP_DB));
                spectral_flux(&features, self.lag, self.aggregate)
            }
            None => spectral_flux(magnitude, self.lag, self.aggregate),
        };
        tracing::debug!(frames = envelope.len(), "onset envelope computed");
        Ok(envelope)
    }
}

/// Half-wave rectified difference between each frame and the frame `lag`
/// columns earlier, combined over rows. The first `lag` frames are 0.
pub fn spectral_flux(features: &Matrix, lag: usize, aggregate: OnsetAggregate) -> Vec<f32> {
    let (rows, frames) = features.shape();
    let mut envelope = vec![0.0f32; frames];
    if frames <= lag || rows == 0 {
        return envelope;
    }

    for row in 0..rows {
        let values = features.row(row);
        for t in lag..frames {
            envelope[t] += (values[t] - values[t - lag]).max(0.0);
        }
    }

    if aggregate == OnsetAggregate::Mean {
        let scale = 1.0 / rows as f32;
        envelope.iter_mut().for_each(|value| *value *= scale);
    }
    envelope
}
