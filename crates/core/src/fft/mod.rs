//! Real-input FFT helpers built on `realfft`.
//!
//! Both types own their plan and working buffers so a worker thread can keep
//! one instance alive across many frames without reallocating.

use std::{fmt, sync::Arc};

use realfft::{num_complex::Complex32, ComplexToReal, RealFftPlanner, RealToComplex};

use crate::{Result, VisionWavError};

/// Largest transform the pipeline will plan.
pub const MAX_FFT_SIZE: usize = 1 << 24;

fn check_size(size: usize) -> Result<()> {
    if size == 0 {
        return Err(VisionWavError::invalid("fft size must be positive"));
    }
    if size > MAX_FFT_SIZE {
        return Err(VisionWavError::overflow(format!(
            "fft size {size} exceeds the supported maximum of {MAX_FFT_SIZE}"
        )));
    }
    Ok(())
}

/// Forward real-to-complex transform of a fixed size.
pub struct RealFft {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl RealFft {
    /// Plans a forward transform of `size` points.
    pub fn new(size: usize) -> Result<Self> {
        check_size(size)?;
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        Ok(Self {
            size,
            input: plan.make_input_vec(),
            spectrum: plan.make_output_vec(),
            scratch: plan.make_scratch_vec(),
            plan,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of non-negative frequency bins, `size / 2 + 1`.
    pub fn bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Transforms `frame` (zero-padded or truncated to the FFT size) and
    /// writes `|X[k]|` for every non-negative bin into `magnitudes`.
    pub fn magnitudes(&mut self, frame: &[f32], magnitudes: &mut [f32]) -> Result<()> {
        let used = frame.len().min(self.size);
        self.input[..used].copy_from_slice(&frame[..used]);
        self.input[used..].fill(0.0);
        self.transform()?;

        for (out, bin) in magnitudes.iter_mut().zip(&self.spectrum) {
            *out = bin.norm();
        }
        Ok(())
    }

    /// Runs the transform over the internal input buffer, filled by `fill`.
    pub fn process_with(&mut self, fill: impl FnOnce(&mut [f32])) -> Result<&[Complex32]> {
        fill(&mut self.input);
        self.transform()?;
        Ok(&self.spectrum)
    }

    fn transform(&mut self) -> Result<()> {
        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;
        Ok(())
    }
}

/// Clones share the plan and get fresh buffers.
impl Clone for RealFft {
    fn clone(&self) -> Self {
        Self {
            size: self.size,
            plan: Arc::clone(&self.plan),
            input: self.plan.make_input_vec(),
            spectrum: self.plan.make_output_vec(),
            scratch: self.plan.make_scratch_vec(),
        }
    }
}

impl fmt::Debug for RealFft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealFft").field("size", &self.size).finish()
    }
}

/// Linear (non-circular) autocorrelation through the power spectrum.
pub struct Autocorrelator {
    window: usize,
    forward: RealFft,
    inverse: Arc<dyn ComplexToReal<f32>>,
    power: Vec<Complex32>,
    output: Vec<f32>,
    scratch: Vec<Complex32>,
}

impl Autocorrelator {
    /// Prepares for signals of up to `window` samples. The transform is
    /// padded to the next power of two at or above `2 * window` so the
    /// circular correlation never wraps.
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(VisionWavError::invalid("autocorrelation window must be positive"));
        }
        let size = window
            .checked_mul(2)
            .and_then(usize::checked_next_power_of_two)
            .ok_or_else(|| VisionWavError::overflow(format!("window {window} is too large")))?;
        let forward = RealFft::new(size)?;
        let inverse = RealFftPlanner::<f32>::new().plan_fft_inverse(size);

        Ok(Self {
            window,
            power: inverse.make_input_vec(),
            output: inverse.make_output_vec(),
            scratch: inverse.make_scratch_vec(),
            inverse,
            forward,
        })
    }

    /// Writes `r[lag] = sum_n x[n] * x[n + lag]` for `lag` in
    /// `0..lags.len()`.
    pub fn autocorrelate(&mut self, signal: &[f32], lags: &mut [f32]) -> Result<()> {
        let used = signal.len().min(self.window);
        let spectrum = self.forward.process_with(|input| {
            input[..used].copy_from_slice(&signal[..used]);
            input[used..].fill(0.0);
        })?;

        for (power, bin) in self.power.iter_mut().zip(spectrum) {
            *power = Complex32::new(bin.norm_sqr(), 0.0);
        }
        self.inverse
            .process_with_scratch(&mut self.power, &mut self.output, &mut self.scratch)?;

        let scale = 1.0 / self.forward.size() as f32;
        for (lag, out) in lags.iter_mut().enumerate() {
            *out = self.output.get(lag).map_or(0.0, |&value| value * scale);
        }
        Ok(())
    }
}

impl Clone for Autocorrelator {
    fn clone(&self) -> Self {
        Self {
            window: self.window,
            forward: self.forward.clone(),
            inverse: Arc::clone(&self.inverse),
            power: self.inverse.make_input_vec(),
            output: self.inverse.make_output_vec(),
            scratch: self.inverse.make_scratch_vec(),
        }
    }
}

impl fmt::Debug for Autocorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Autocorrelator")
            .field("window", &self.window)
            .field("size", &self.forward.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;

    #[test]
    fn locates_bin_centred_sinusoid() {
        let size = 64;
        let mut fft = RealFft::new(size).unwrap();
        let frame: Vec<f32> = (0..size)
            .map(|n| (2.0 * PI * 8.0 * n as f32 / size as f32).cos())
            .collect();
        let mut magnitudes = vec![0.0; fft.bins()];
        fft.magnitudes(&frame, &mut magnitudes).unwrap();

        assert_eq!(magnitudes.len(), 33);
        assert!((magnitudes[8] - 32.0).abs() < 1e-3);
        assert!(magnitudes
            .iter()
            .enumerate()
            .filter(|(k, _)| *k != 8)
            .all(|(_, &m)| m < 1e-3));
    }

    #[test]
    fn zero_pads_short_frames() {
        let mut fft = RealFft::new(16).unwrap();
        let mut magnitudes = vec![0.0; fft.bins()];
        // A lone impulse has a flat spectrum regardless of padding.
        fft.magnitudes(&[1.0, 0.0, 0.0], &mut magnitudes).unwrap();
        assert!(magnitudes.iter().all(|&m| (m - 1.0).abs() < 1e-6));
    }

    #[test]
    fn dc_signal_lands_in_bin_zero() {
        let mut fft = RealFft::new(8).unwrap();
        let mut magnitudes = vec![0.0; fft.bins()];
        fft.magnitudes(&[0.5; 8], &mut magnitudes).unwrap();
        assert!((magnitudes[0] - 4.0).abs() < 1e-6);
        assert!(magnitudes[1..].iter().all(|&m| m < 1e-6));
    }

    #[test]
    fn clones_transform_independently() {
        let mut first = RealFft::new(8).unwrap();
        let mut copy = first.clone();
        let mut a = vec![0.0; 5];
        let mut b = vec![0.0; 5];
        first.magnitudes(&[1.0; 8], &mut a).unwrap();
        copy.magnitudes(&[0.0; 8], &mut b).unwrap();
        assert!((a[0] - 8.0).abs() < 1e-6);
        assert!(b.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn rejects_unusable_sizes() {
        assert!(matches!(RealFft::new(0), Err(VisionWavError::InvalidConfig(_))));
        assert!(matches!(
            RealFft::new(MAX_FFT_SIZE + 1),
            Err(VisionWavError::NumericOverflow(_))
        ));
    }

    #[test]
    fn autocorrelation_matches_direct_sum() {
        let signal = [1.0, 2.0, 0.0, -1.0, 3.0];
        let mut ac = Autocorrelator::new(signal.len()).unwrap();
        let mut lags = vec![0.0; signal.len()];
        ac.autocorrelate(&signal, &mut lags).unwrap();

        for (lag, &value) in lags.iter().enumerate() {
            let direct: f32 = (0..signal.len() - lag)
                .map(|n| signal[n] * signal[n + lag])
                .sum();
            assert!((value - direct).abs() < 1e-4, "lag {lag}: {value} vs {direct}");
        }
    }
}
