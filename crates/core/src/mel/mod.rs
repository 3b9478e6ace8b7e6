//! Triangular mel filterbank.
//!
//! Band edges are `n_mels + 2` points equally spaced on the mel scale between
//! `fmin` and `fmax`; filter `i` rises from edge `i` to edge `i + 1` and falls
//! to edge `i + 2`, evaluated at every STFT bin frequency.

use serde::{Deserialize, Serialize};

use crate::{spectral, Matrix, MelConfig, Result, VisionWavError};

/// Frequency warping used to place the band edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MelScale {
    /// Linear below 1 kHz, logarithmic above (Auditory Toolbox).
    #[default]
    Slaney,
    /// `2595 * log10(1 + f / 700)`.
    Htk,
}

/// Filter weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MelNorm {
    /// Scale each triangle by `2 / (f[i + 2] - f[i])` so bands carry
    /// roughly constant energy per Hz.
    #[default]
    Slaney,
    /// Plain triangles with unit peak height.
    None,
}

const SLANEY_HZ_PER_MEL: f64 = 200.0 / 3.0;
const SLANEY_BREAK_HZ: f64 = 1000.0;
const SLANEY_BREAK_MEL: f64 = SLANEY_BREAK_HZ / SLANEY_HZ_PER_MEL;

fn slaney_log_step() -> f64 {
    6.4f64.ln() / 27.0
}

impl MelScale {
    pub fn hz_to_mel(&self, hz: f64) -> f64 {
        match self {
            MelScale::Htk => 2595.0 * (1.0 + hz / 700.0).log10(),
            MelScale::Slaney => {
                if hz >= SLANEY_BREAK_HZ {
                    SLANEY_BREAK_MEL + (hz / SLANEY_BREAK_HZ).ln() / slaney_log_step()
                } else {
                    hz / SLANEY_HZ_PER_MEL
                }
            }
        }
    }

    pub fn mel_to_hz(&self, mel: f64) -> f64 {
        match self {
            MelScale::Htk => 700.0 * (10f64.powf(mel / 2595.0) - 1.0),
            MelScale::Slaney => {
                if mel >= SLANEY_BREAK_MEL {
                    SLANEY_BREAK_HZ * (slaney_log_step() * (mel - SLANEY_BREAK_MEL)).exp()
                } else {
                    mel * SLANEY_HZ_PER_MEL
                }
            }
        }
    }
}

/// Precomputed `[n_mels, n_fft / 2 + 1]` projection.
#[derive(Debug, Clone, PartialEq)]
pub struct MelFilterbank {
    weights: Matrix,
    center_hz: Vec<f32>,
}

impl MelFilterbank {
    /// Builds the filterbank for STFT frames of `n_fft` samples at
    /// `sample_rate`, checking `fmax` against the Nyquist frequency.
    pub fn build(sample_rate: u32, n_fft: usize, config: &MelConfig) -> Result<Self> {
        config.validate()?;
        if sample_rate == 0 || n_fft == 0 {
            return Err(VisionWavError::invalid(
                "sample_rate and n_fft must be positive to build a mel filterbank",
            ));
        }
        let nyquist = sample_rate as f32 / 2.0;
        let fmax = config.fmax.unwrap_or(nyquist);
        if fmax > nyquist {
            return Err(VisionWavError::invalid(format!(
                "fmax ({fmax}) exceeds the Nyquist frequency ({nyquist})"
            )));
        }
        if config.fmin >= fmax {
            return Err(VisionWavError::invalid(format!(
                "fmin ({}) must be below fmax ({fmax})",
                config.fmin
            )));
        }

        let n_mels = config.n_mels;
        let scale = config.scale;
        let mel_lo = scale.hz_to_mel(config.fmin as f64);
        let mel_hi = scale.hz_to_mel(fmax as f64);
        let edges: Vec<f64> = (0..n_mels + 2)
            .map(|i| {
                let mel = mel_lo + (mel_hi - mel_lo) * i as f64 / (n_mels + 1) as f64;
                scale.mel_to_hz(mel)
            })
            .collect();

        let bin_hz = sample_rate as f64 / n_fft as f64;
        let n_bins = n_fft / 2 + 1;
        let mut weights = Matrix::zeros(n_mels, n_bins)?;

        for band in 0..n_mels {
            let (lower, center, upper) = (edges[band], edges[band + 1], edges[band + 2]);
            let gain = match config.norm {
                MelNorm::Slaney => 2.0 / (upper - lower),
                MelNorm::None => 1.0,
            };
            for (bin, weight) in weights.row_mut(band).iter_mut().enumerate() {
                let freq = bin as f64 * bin_hz;
                let rising = (freq - lower) / (center - lower);
                let falling = (upper - freq) / (upper - center);
                let value = rising.min(falling).max(0.0);
                *weight = (value * gain) as f32;
            }
        }

        tracing::debug!(
            sample_rate,
            n_fft,
            n_mels,
            fmin = config.fmin,
            fmax,
            "built mel filterbank"
        );

        Ok(Self {
            weights,
            center_hz: edges[1..=n_mels].iter().map(|&hz| hz as f32).collect(),
        })
    }

    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    pub fn n_mels(&self) -> usize {
        self.weights.rows()
    }

    /// Centre frequency of every band in Hz.
    pub fn center_frequencies(&self) -> &[f32] {
        &self.center_hz
    }

    /// `weights · spectrum` for a `[n_fft / 2 + 1, n_frames]` input.
    pub fn apply(&self, spectrum: &Matrix) -> Result<Matrix> {
        self.weights.matmul(spectrum)
    }

    /// Mel power spectrogram in dB from an STFT magnitude matrix.
    pub fn mel_spectrogram_db(
        &self,
        magnitude: &Matrix,
        reference: spectral::DbReference,
        top_db: Option<f32>,
    ) -> Result<Matrix> {
        let mel_power = self.apply(&spectral::power(magnitude))?;
        Ok(spectral::power_to_db(&mel_power, reference, top_db))
    }
}
