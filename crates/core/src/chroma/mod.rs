use crate::{spectral, ChromaConfig, Matrix, Result, VisionWavError};

/// Pitch-class names for 12-bin chroma, index 0 = C.
pub const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

const A4_HZ: f64 = 440.0;
/// Semitones from C up to A.
const A_ABOVE_C: f64 = 9.0;

/// Hard-assignment projection of STFT bins onto pitch classes.
///
/// Each bin above DC contributes fully to `round(n * log2(f / f_ref))`
/// modulo `n`, rotated so that class 0 is C.
#[derive(Debug, Clone, PartialEq)]
pub struct ChromaProjector {
    weights: Matrix,
}

impl ChromaProjector {
    /// Builds the bin-to-pitch-class assignment for `n_fft`-point frames at
    /// `sample_rate`.
    pub fn build(sample_rate: u32, n_fft: usize, config: &ChromaConfig) -> Result<Self> {
        config.validate()?;
        if sample_rate == 0 || n_fft == 0 {
            return Err(VisionWavError::invalid(
                "sample_rate and n_fft must be positive to build a chroma filterbank",
            ));
        }

        let n_chroma = config.n_chroma;
        let classes = n_chroma as f64;
        let f_ref = A4_HZ * 2f64.powf(config.tuning as f64 / classes);
        let rotation = (A_ABOVE_C * classes / 12.0).round() as i64;
        let bin_hz = sample_rate as f64 / n_fft as f64;
        let n_bins = n_fft / 2 + 1;

        let mut weights = Matrix::zeros(n_chroma, n_bins)?;
        let mut assignments = Vec::with_capacity(n_bins);
        for bin in 1..n_bins {
            let freq = bin as f64 * bin_hz;
            let steps = (classes * (freq / f_ref).log2()).round() as i64;
            assignments.push((bin, (steps + rotation).rem_euclid(n_chroma as i64) as usize));
        }
        for (bin, class) in assignments {
            weights.row_mut(class)[bin] = 1.0;
        }

        tracing::debug!(
            sample_rate,
            n_fft,
            n_chroma,
            tuning = config.tuning,
            "built chroma filterbank"
        );
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    pub fn n_chroma(&self) -> usize {
        self.weights.rows()
    }

    /// Row labels: note names for 12 bins, otherwise the class index.
    pub fn labels(&self) -> Vec<String> {
        if self.n_chroma() == PITCH_CLASSES.len() {
            PITCH_CLASSES.iter().map(|name| name.to_string()).collect()
        } else {
            (0..self.n_chroma()).map(|class| class.to_string()).collect()
        }
    }

    /// Sums the spectrum rows of each pitch class.
    pub fn apply(&self, spectrum: &Matrix) -> Result<Matrix> {
        self.weights.matmul(spectrum)
    }

    /// Chromagram from an STFT magnitude matrix: the power spectrum folded
    /// into pitch classes, each column scaled to a peak of 1. Silent columns
    /// stay zero.
    pub fn chromagram(&self, magnitude: &Matrix) -> Result<Matrix> {
        let mut chroma = self.apply(&spectral::power(magnitude))?;
        normalize_columns(&mut chroma);
        Ok(chroma)
    }
}

/// Divides every column by its largest value.
pub fn normalize_columns(matrix: &mut Matrix) {
    let peaks: Vec<f32> = (0..matrix.cols())
        .map(|col| matrix.column(col).fold(0.0f32, f32::max))
        .collect();
    for row in 0..matrix.rows() {
        for (value, &peak) in matrix.row_mut(row).iter_mut().zip(&peaks) {
            if peak > f32::MIN_POSITIVE {
                *value /= peak;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{signal, CancellationToken, SpectralEngine, StftConfig};

    fn projector(sample_rate: u32, n_fft: usize) -> ChromaProjector {
        ChromaProjector::build(sample_rate, n_fft, &ChromaConfig::default()).unwrap()
    }

    #[test]
    fn excludes_dc_and_assigns_every_other_bin_once() {
        let chroma = projector(22_050, 2048);
        let weights = chroma.weights();
        assert_eq!(weights.shape(), (12, 1025));
        assert_eq!(weights.column(0).sum::<f32>(), 0.0);
        for bin in 1..weights.cols() {
            assert_eq!(weights.column(bin).sum::<f32>(), 1.0, "bin {bin}");
        }
    }

    #[test]
    fn maps_reference_pitches() {
        // 8192-point FFT at 8192 Hz puts bins exactly on integer Hz.
        let chroma = projector(8192, 8192);
        let class_of = |hz: usize| chroma.weights().column(hz).position(|w| w == 1.0);
        assert_eq!(class_of(440), Some(9)); // A4
        assert_eq!(class_of(880), Some(9)); // A5
        assert_eq!(class_of(262), Some(0)); // C4
        assert_eq!(class_of(392), Some(7)); // G4
        assert_eq!(chroma.labels()[9], "A");
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(projector(44_100, 4096), projector(44_100, 4096));
    }

    #[test]
    fn a440_tone_peaks_at_a_with_unit_max() {
        let sample_rate = 22_050;
        let tone = signal::tone(440.0, sample_rate, 1.0);
        let magnitude = SpectralEngine::new(&StftConfig::default())
            .unwrap()
            .stft(&tone, &CancellationToken::new())
            .unwrap();
        let chroma = projector(sample_rate, 2048).chromagram(&magnitude).unwrap();

        assert_eq!(chroma.shape(), (12, magnitude.cols()));
        for frame in 0..chroma.cols() {
            assert_eq!(chroma.argmax_column(frame), Some(9));
            let peak = chroma.column(frame).fold(0.0f32, f32::max);
            assert!((peak - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn silent_columns_stay_zero() {
        let magnitude = Matrix::zeros(1025, 3).unwrap();
        let chroma = projector(22_050, 2048).chromagram(&magnitude).unwrap();
        assert!(chroma.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn supports_other_resolutions() {
        let config = ChromaConfig {
            n_chroma: 24,
            tuning: 0.0,
        };
        let chroma = ChromaProjector::build(8192, 8192, &config).unwrap();
        assert_eq!(chroma.n_chroma(), 24);
        assert_eq!(chroma.labels()[23], "23");
        assert_eq!(chroma.weights().column(440).position(|w| w == 1.0), Some(18));
        let empty = ChromaConfig {
            n_chroma: 0,
            tuning: 0.0,
        };
        assert!(ChromaProjector::build(8192, 8192, &empty).is_err());
    }
}
