use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    fft::RealFft, frames::FrameSegmenter, CancellationToken, Matrix, Result, StftConfig,
    WindowFunction,
};

/// Smallest amplitude considered by [`amplitude_to_db`] (-100 dB).
pub const AMPLITUDE_FLOOR: f32 = 1e-5;
/// Smallest power considered by [`power_to_db`] (-100 dB).
pub const POWER_FLOOR: f32 = 1e-10;

/// Reference level that maps to 0 dB.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbReference {
    /// The largest value of the matrix being converted.
    #[default]
    Peak,
    Fixed(f32),
}

/// Short-time Fourier transform with a fixed frame layout and window.
#[derive(Debug, Clone)]
pub struct SpectralEngine {
    segmenter: FrameSegmenter,
    window: Vec<f32>,
    fft: RealFft,
}

impl SpectralEngine {
    /// Creates an engine with a planned FFT and precomputed window for
    /// `config`.
    pub fn new(config: &StftConfig) -> Result<Self> {
        config.validate()?;
        let segmenter =
            FrameSegmenter::new(config.n_fft, config.hop_length, config.center, config.pad_mode)?;
        Ok(Self {
            segmenter,
            window: config.window.coefficients(config.n_fft),
            fft: RealFft::new(config.n_fft)?,
        })
    }

    pub fn n_fft(&self) -> usize {
        self.segmenter.frame_length()
    }

    pub fn hop_length(&self) -> usize {
        self.segmenter.hop_length()
    }

    pub fn bins(&self) -> usize {
        self.fft.bins()
    }

    /// Number of STFT columns produced for `len` samples, including the
    /// single zero-padded frame of a short uncentred input.
    pub fn frame_count(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else if !self.segmenter.center() && len < self.n_fft() {
            1
        } else {
            self.segmenter.frame_count(len)
        }
    }

    /// Magnitude spectrogram `[n_fft / 2 + 1, n_frames]`.
    ///
    /// An empty waveform yields zero columns; an uncentred waveform shorter
    /// than one frame is zero-padded into a single frame. Frames are
    /// transformed in parallel and `cancel` is checked before each one.
    pub fn stft(&self, waveform: &[f32], cancel: &CancellationToken) -> Result<Matrix> {
        let bins = self.bins();
        if waveform.is_empty() {
            tracing::debug!("empty waveform, producing an empty spectrogram");
            return Matrix::zeros(bins, 0);
        }

        let padded;
        let signal = if !self.segmenter.center() && waveform.len() < self.n_fft() {
            padded = zero_extend(waveform, self.n_fft());
            &padded[..]
        } else {
            waveform
        };

        let n_frames = self.frame_count(waveform.len());
        // Allocating the output up front surfaces oversized shapes before any
        // transform work is done.
        let mut columns = Matrix::zeros(n_frames, bins)?.into_vec();
        let frames = self.segmenter.segment(signal)?;

        columns
            .par_chunks_mut(bins)
            .enumerate()
            .try_for_each_init(
                || (self.fft.clone(), vec![0.0f32; self.n_fft()]),
                |(fft, buffer), (index, column)| -> Result<()> {
                    cancel.check()?;
                    if let Some(frame) = frames.get(index) {
                        frame.write_windowed(&self.window, buffer);
                        fft.magnitudes(buffer, column)?;
                    }
                    Ok(())
                },
            )?;

        tracing::debug!(frames = n_frames, bins, "stft complete");
        Matrix::from_column_major(bins, n_frames, &columns)
    }
}

/// Magnitude STFT with centred, reflection-padded frames.
pub fn stft(
    waveform: &[f32],
    n_fft: usize,
    hop_length: usize,
    window: WindowFunction,
) -> Result<Matrix> {
    let config = StftConfig {
        n_fft,
        hop_length,
        window,
        ..StftConfig::default()
    };
    SpectralEngine::new(&config)?.stft(waveform, &CancellationToken::new())
}

/// Centre frequency in Hz of every non-negative STFT bin.
pub fn bin_frequencies(sample_rate: u32, n_fft: usize) -> Vec<f32> {
    let step = sample_rate as f64 / n_fft as f64;
    (0..=n_fft / 2).map(|k| (k as f64 * step) as f32).collect()
}

/// Squares every magnitude.
pub fn power(magnitude: &Matrix) -> Matrix {
    magnitude.map(|m| m * m)
}

/// `20 * log10(max(x, 1e-5) / ref)`, floored `top_db` below the peak.
pub fn amplitude_to_db(matrix: &Matrix, reference: DbReference, top_db: Option<f32>) -> Matrix {
    to_db(matrix, 20.0, AMPLITUDE_FLOOR, reference, top_db)
}

/// `10 * log10(max(x, 1e-10) / ref)`, floored `top_db` below the peak.
pub fn power_to_db(matrix: &Matrix, reference: DbReference, top_db: Option<f32>) -> Matrix {
    to_db(matrix, 10.0, POWER_FLOOR, reference, top_db)
}

fn to_db(
    matrix: &Matrix,
    factor: f32,
    floor: f32,
    reference: DbReference,
    top_db: Option<f32>,
) -> Matrix {
    let reference = match reference {
        DbReference::Peak => matrix.max().unwrap_or(1.0),
        DbReference::Fixed(value) => value,
    };
    let offset = factor * reference.abs().max(floor).log10();
    let db = matrix.map(|x| factor * x.max(floor).log10() - offset);

    match (top_db, db.max()) {
        (Some(range), Some(peak)) => {
            let lowest = peak - range;
            db.map(|value| value.max(lowest))
        }
        _ => db,
    }
}

fn zero_extend(samples: &[f32], len: usize) -> Vec<f32> {
    let mut out = samples.to_vec();
    out.resize(len, 0.0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{signal, PadMode};

    fn engine(n_fft: usize, hop_length: usize, center: bool) -> SpectralEngine {
        SpectralEngine::new(&StftConfig {
            n_fft,
            hop_length,
            center,
            pad_mode: PadMode::Reflect,
            window: WindowFunction::Hann,
        })
        .unwrap()
    }

    #[test]
    fn sine_peaks_at_nearest_bin_in_every_frame() {
        let sample_rate = 22_050;
        let tone = signal::tone(440.0, sample_rate, 1.0);
        let magnitude = engine(2048, 512, false)
            .stft(&tone, &CancellationToken::new())
            .unwrap();

        assert_eq!(magnitude.shape(), (1025, 40));
        let expected = (440.0 * 2048.0 / sample_rate as f32).round() as usize;
        for frame in 0..magnitude.cols() {
            let peak = magnitude.argmax_column(frame).unwrap();
            assert!(peak.abs_diff(expected) <= 1, "frame {frame} peaked at bin {peak}");
        }
    }

    #[test]
    fn frame_counts_follow_layout() {
        let cancel = CancellationToken::new();
        for len in [4096, 4097, 5000, 5120] {
            let samples = vec![0.1; len];
            let centred = engine(1024, 512, true).stft(&samples, &cancel).unwrap();
            assert_eq!(centred.cols(), 1 + len / 512);
            let plain = engine(1024, 512, false).stft(&samples, &cancel).unwrap();
            assert_eq!(plain.cols(), 1 + (len - 1024) / 512);
        }
    }

    #[test]
    fn predicted_frame_count_matches_output() {
        let cancel = CancellationToken::new();
        for center in [true, false] {
            let engine = engine(256, 64, center);
            for len in [0, 1, 10, 255, 256, 257, 320, 1000, 1001] {
                let stft = engine.stft(&vec![0.25; len], &cancel).unwrap();
                assert_eq!(stft.cols(), engine.frame_count(len), "len {len}, center {center}");
            }
        }
        assert_eq!(engine(256, 64, false).frame_count(10), 1);
        assert_eq!(engine(256, 64, true).frame_count(0), 0);
    }

    #[test]
    fn tolerates_empty_and_short_input() {
        let cancel = CancellationToken::new();
        let empty = engine(256, 64, true).stft(&[], &cancel).unwrap();
        assert_eq!(empty.shape(), (129, 0));

        let short = engine(256, 64, false).stft(&[1.0; 10], &cancel).unwrap();
        assert_eq!(short.shape(), (129, 1));
        assert!(short.max().unwrap() > 0.0);
    }

    #[test]
    fn cancellation_aborts_without_output() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = engine(256, 64, true).stft(&[0.5; 4096], &cancel);
        assert!(matches!(result, Err(crate::VisionWavError::Cancelled)));
    }

    #[test]
    fn peak_reference_maps_peak_to_zero_db() {
        let matrix = Matrix::new(2, 2, vec![0.5, 2.0, 1.0, 0.0]).unwrap();
        let db = amplitude_to_db(&matrix, DbReference::Peak, Some(80.0));
        assert_eq!(db.get(0, 1), Some(0.0));
        assert!((db.get(1, 0).unwrap() - 20.0 * 0.5f32.log10()).abs() < 1e-4);
        // Zero is clamped to the floor, then to 80 dB below the peak.
        assert!((db.get(1, 1).unwrap() + 80.0).abs() < 1e-4);
    }

    #[test]
    fn power_db_uses_ten_log_ten() {
        let matrix = Matrix::new(1, 3, vec![100.0, 1.0, 0.0]).unwrap();
        let db = power_to_db(&matrix, DbReference::Fixed(1.0), None);
        assert!((db.get(0, 0).unwrap() - 20.0).abs() < 1e-4);
        assert_eq!(db.get(0, 1), Some(0.0));
        assert!((db.get(0, 2).unwrap() + 100.0).abs() < 1e-3);
    }

    #[test]
    fn bin_frequencies_span_to_nyquist() {
        let freqs = bin_frequencies(8000, 8);
        assert_eq!(freqs, vec![0.0, 1000.0, 2000.0, 3000.0, 4000.0]);
    }

    #[test]
    fn free_function_uses_centred_frames() {
        let magnitude = stft(&[0.0; 1000], 256, 100, WindowFunction::Hann).unwrap();
        assert_eq!(magnitude.shape(), (129, 11));
    }
}
