use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Tapering functions applied to each frame before the transform.
///
/// Coefficients are periodic (the `N`-point window is the first `N` points of
/// an `N + 1` point symmetric window), which is what spectral analysis wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    #[default]
    Hann,
    Hamming,
    Blackman,
    Rectangular,
}

impl WindowFunction {
    /// Generates `size` window coefficients.
    pub fn coefficients(&self, size: usize) -> Vec<f32> {
        if size <= 1 {
            return vec![1.0; size];
        }

        let n = size as f64;
        (0..size)
            .map(|i| {
                let x = 2.0 * PI * i as f64 / n;
                let value = match self {
                    WindowFunction::Hann => 0.5 - 0.5 * x.cos(),
                    WindowFunction::Hamming => 0.54 - 0.46 * x.cos(),
                    WindowFunction::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
                    WindowFunction::Rectangular => 1.0,
                };
                value as f32
            })
            .collect()
    }
}
