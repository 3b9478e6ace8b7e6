use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    fft::MAX_FFT_SIZE, DbReference, MelNorm, MelScale, OnsetAggregate, OnsetSource, PadMode,
    Result, VisionWavError, WindowFunction,
};

/// Top-level configuration shared by every analysis.
///
/// Every section falls back to its defaults, so a JSON document only has to
/// name the values it changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub stft: StftConfig,
    pub mel: MelConfig,
    pub chroma: ChromaConfig,
    pub onset: OnsetConfig,
    pub tempogram: TempogramConfig,
    pub decibels: DecibelConfig,
}

impl AnalysisConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Checks everything that does not depend on the sample rate.
    pub fn validate(&self) -> Result<()> {
        self.stft.validate()?;
        self.mel.validate()?;
        self.chroma.validate()?;
        self.onset.validate()?;
        self.tempogram.validate()?;
        self.decibels.validate()
    }
}

/// Framing and transform parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StftConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    pub window: WindowFunction,
    pub center: bool,
    pub pad_mode: PadMode,
}

impl Default for StftConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            window: WindowFunction::Hann,
            center: true,
            pad_mode: PadMode::Reflect,
        }
    }
}

impl StftConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_fft == 0 {
            return Err(VisionWavError::invalid("n_fft must be positive"));
        }
        if self.hop_length == 0 {
            return Err(VisionWavError::invalid("hop_length must be positive"));
        }
        if self.n_fft > MAX_FFT_SIZE {
            return Err(VisionWavError::overflow(format!(
                "n_fft {} exceeds the supported maximum of {MAX_FFT_SIZE}",
                self.n_fft
            )));
        }
        Ok(())
    }

    /// Number of non-negative frequency bins.
    pub fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }
}

/// Mel filterbank parameters. `fmax` of `None` means the Nyquist frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MelConfig {
    pub n_mels: usize,
    pub fmin: f32,
    pub fmax: Option<f32>,
    pub scale: MelScale,
    pub norm: MelNorm,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            n_mels: 128,
            fmin: 0.0,
            fmax: None,
            scale: MelScale::Slaney,
            norm: MelNorm::Slaney,
        }
    }
}

impl MelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_mels < 1 {
            return Err(VisionWavError::invalid("n_mels must be at least 1"));
        }
        if !self.fmin.is_finite() || self.fmin < 0.0 {
            return Err(VisionWavError::invalid(format!(
                "fmin must be a non-negative frequency, got {}",
                self.fmin
            )));
        }
        if let Some(fmax) = self.fmax {
            if !fmax.is_finite() || self.fmin >= fmax {
                return Err(VisionWavError::invalid(format!(
                    "fmin ({}) must be below fmax ({fmax})",
                    self.fmin
                )));
            }
        }
        Ok(())
    }
}

/// Chroma projection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromaConfig {
    pub n_chroma: usize,
    /// Tuning deviation from A4 = 440 Hz, in fractions of a chroma bin.
    pub tuning: f32,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            n_chroma: 12,
            tuning: 0.0,
        }
    }
}

impl ChromaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_chroma < 1 {
            return Err(VisionWavError::invalid("n_chroma must be at least 1"));
        }
        if !self.tuning.is_finite() {
            return Err(VisionWavError::invalid("tuning must be finite"));
        }
        Ok(())
    }
}

/// Onset strength parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetConfig {
    pub source: OnsetSource,
    /// Frame distance of the difference.
    pub lag: usize,
    pub aggregate: OnsetAggregate,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            source: OnsetSource::MelLogPower,
            lag: 1,
            aggregate: OnsetAggregate::Sum,
        }
    }
}

impl OnsetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lag < 1 {
            return Err(VisionWavError::invalid("onset lag must be at least 1 frame"));
        }
        Ok(())
    }
}

/// Tempogram parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempogramConfig {
    /// Autocorrelation window, in onset frames.
    pub win_length: usize,
    pub min_bpm: f32,
    pub max_bpm: f32,
}

impl Default for TempogramConfig {
    fn default() -> Self {
        Self {
            win_length: 384,
            min_bpm: 30.0,
            max_bpm: 480.0,
        }
    }
}

impl TempogramConfig {
    pub fn validate(&self) -> Result<()> {
        if self.win_length == 0 {
            return Err(VisionWavError::invalid("tempogram win_length must be positive"));
        }
        if !(self.min_bpm.is_finite() && self.max_bpm.is_finite()) || self.min_bpm <= 0.0 {
            return Err(VisionWavError::invalid(format!(
                "tempo range {}..{} BPM must be positive and finite",
                self.min_bpm, self.max_bpm
            )));
        }
        if self.min_bpm >= self.max_bpm {
            return Err(VisionWavError::invalid(format!(
                "min_bpm ({}) must be below max_bpm ({})",
                self.min_bpm, self.max_bpm
            )));
        }
        Ok(())
    }
}

/// Decibel conversion policy for the spectrogram outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecibelConfig {
    pub reference: DbReference,
    /// Dynamic range kept below the peak; `None` disables the floor.
    pub top_db: Option<f32>,
}

impl Default for DecibelConfig {
    fn default() -> Self {
        Self {
            reference: DbReference::Peak,
            top_db: Some(80.0),
        }
    }
}

impl DecibelConfig {
    pub fn validate(&self) -> Result<()> {
        if let DbReference::Fixed(value) = self.reference {
            if !(value.is_finite() && value > 0.0) {
                return Err(VisionWavError::invalid(format!(
                    "fixed dB reference must be positive, got {value}"
                )));
            }
        }
        if let Some(top_db) = self.top_db {
            if !(top_db.is_finite() && top_db >= 0.0) {
                return Err(VisionWavError::invalid(format!(
                    "top_db must be non-negative, got {top_db}"
                )));
            }
        }
        Ok(())
    }
}
