/// Result alias that carries the custom [`VisionWavError`] type.
pub type Result<T> = std::result::Result<T, VisionWavError>;

/// Common error type for the analysis pipeline.
///
/// An empty waveform is deliberately not represented here: silence and
/// zero-length input produce empty or all-zero outputs so callers rendering
/// the result never have to special-case it.
#[derive(Debug, thiserror::Error)]
pub enum VisionWavError {
    /// A parameter or parameter combination is unusable (non-positive
    /// lengths, `fmin >= fmax`, an empty tempo range, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The requested shape cannot be represented or allocated.
    #[error("numeric overflow: {0}")]
    NumericOverflow(String),
    /// The caller's cancellation token fired or its deadline passed.
    #[error("analysis cancelled")]
    Cancelled,
    /// Failure reported by the FFT backend.
    #[error("fft failure: {0}")]
    Fft(#[from] realfft::FftError),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed JSON configuration.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Free-form message for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
}

impl VisionWavError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Shorthand for [`VisionWavError::InvalidConfig`].
    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Shorthand for [`VisionWavError::NumericOverflow`].
    pub fn overflow<T: Into<String>>(msg: T) -> Self {
        Self::NumericOverflow(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = VisionWavError::invalid("fmin (10) must be below fmax (5)");
        assert!(format!("{err}").contains("fmin (10)"));
        assert!(format!("{}", VisionWavError::Cancelled).contains("cancelled"));
    }
}
