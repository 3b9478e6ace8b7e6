//! Audio feature extraction for the VisionWav visualiser.
//!
//! Each module owns one stage of the analysis chain: framing, the STFT,
//! filterbank projections (mel, chroma), onset detection and the tempogram.
//! [`pipeline`] ties them together behind a single entry point that returns
//! render-ready data with axis metadata.

pub mod cache;
pub mod cancel;
pub mod chroma;
pub mod config;
pub mod error;
pub mod fft;
pub mod frames;
pub mod matrix;
pub mod mel;
pub mod onset;
pub mod pipeline;
pub mod signal;
pub mod spectral;
pub mod tempogram;
pub mod window;

pub use cache::FilterbankCache;
pub use cancel::CancellationToken;
pub use chroma::ChromaProjector;
pub use config::{
    AnalysisConfig, ChromaConfig, DecibelConfig, MelConfig, OnsetConfig, StftConfig,
    TempogramConfig,
};
pub use error::{Result, VisionWavError};
pub use frames::{FrameSegmenter, PadMode};
pub use matrix::Matrix;
pub use mel::{MelFilterbank, MelNorm, MelScale};
pub use onset::{OnsetAggregate, OnsetDetector, OnsetSource};
pub use pipeline::{
    analyze, Analysis, AnalysisData, AnalysisKind, AxisMetadata, Pipeline, ValueScale, Waveform,
    YAxis,
};
pub use spectral::{DbReference, SpectralEngine};
pub use tempogram::TempogramEstimator;
pub use window::WindowFunction;
