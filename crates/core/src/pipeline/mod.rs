//! The six analyses exposed to renderers.
//!
//! Every analysis is a pure function of the waveform, its sample rate and an
//! [`AnalysisConfig`]; the only state is the caller-owned
//! [`FilterbankCache`]. Results carry enough axis metadata to be drawn
//! without recomputation.

use std::{borrow::Cow, fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    spectral, AnalysisConfig, CancellationToken, ChromaProjector, FilterbankCache, Matrix,
    MelFilterbank, OnsetDetector, OnsetSource, Result, SpectralEngine, TempogramEstimator,
    VisionWavError,
};

/// Mono PCM borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub struct Waveform<'a> {
    samples: &'a [f32],
    sample_rate: u32,
}

impl<'a> Waveform<'a> {
    pub fn new(samples: &'a [f32], sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(VisionWavError::invalid("sample_rate must be positive"));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &'a [f32] {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Waveform,
    Spectrogram,
    MelSpectrogram,
    Chromagram,
    OnsetStrength,
    Tempogram,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 6] = [
        AnalysisKind::Waveform,
        AnalysisKind::Spectrogram,
        AnalysisKind::MelSpectrogram,
        AnalysisKind::Chromagram,
        AnalysisKind::OnsetStrength,
        AnalysisKind::Tempogram,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnalysisKind::Waveform => "waveform",
            AnalysisKind::Spectrogram => "spectrogram",
            AnalysisKind::MelSpectrogram => "mel_spectrogram",
            AnalysisKind::Chromagram => "chromagram",
            AnalysisKind::OnsetStrength => "onset_strength",
            AnalysisKind::Tempogram => "tempogram",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AnalysisKind {
    type Err = VisionWavError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        AnalysisKind::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| VisionWavError::invalid(format!("unknown analysis `{s}`")))
    }
}

/// Numeric payload of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisData {
    Vector(Vec<f32>),
    Matrix(Matrix),
}

impl AnalysisData {
    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            AnalysisData::Vector(values) => Some(values),
            AnalysisData::Matrix(_) => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&Matrix> {
        match self {
            AnalysisData::Matrix(matrix) => Some(matrix),
            AnalysisData::Vector(_) => None,
        }
    }

    /// Length of the time axis.
    pub fn columns(&self) -> usize {
        match self {
            AnalysisData::Vector(values) => values.len(),
            AnalysisData::Matrix(matrix) => matrix.cols(),
        }
    }
}

/// Meaning of the rows (or of the values, for 1-D data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum YAxis {
    Amplitude,
    FrequencyHz { bins: Vec<f32> },
    Mel { center_hz: Vec<f32> },
    PitchClass { labels: Vec<String> },
    Tempo { lags: Vec<usize>, bpm: Vec<f32> },
    OnsetStrength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueScale {
    Linear,
    Decibels,
    /// Scaled into `[0, 1]` per column.
    Normalized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisMetadata {
    /// Time between consecutive columns (or samples).
    pub seconds_per_column: f32,
    pub duration_seconds: f32,
    pub sample_rate: u32,
    pub y_axis: YAxis,
    pub values: ValueScale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub kind: AnalysisKind,
    pub data: AnalysisData,
    pub axes: AxisMetadata,
}

/// Runs analyses for one configuration against a shared filterbank cache.
///
/// Holds no per-waveform state, so one instance can serve concurrent calls.
#[derive(Debug, Clone)]
pub struct Pipeline<'c> {
    config: AnalysisConfig,
    cache: &'c FilterbankCache,
}

impl<'c> Pipeline<'c> {
    /// Creates a pipeline after checking the sample-rate independent parts
    /// of `config`.
    pub fn new(config: AnalysisConfig, cache: &'c FilterbankCache) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, cache })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Dispatches to the analysis named by `kind`.
    pub fn run(
        &self,
        kind: AnalysisKind,
        waveform: Waveform<'_>,
        cancel: &CancellationToken,
    ) -> Result<Analysis> {
        tracing::info!(
            %kind,
            samples = waveform.len(),
            sample_rate = waveform.sample_rate(),
            "running analysis"
        );
        match kind {
            AnalysisKind::Waveform => Ok(self.waveform(waveform)),
            AnalysisKind::Spectrogram => self.spectrogram(waveform, cancel),
            AnalysisKind::MelSpectrogram => self.mel_spectrogram(waveform, cancel),
            AnalysisKind::Chromagram => self.chromagram(waveform, cancel),
            AnalysisKind::OnsetStrength => self.onset_strength(waveform, cancel),
            AnalysisKind::Tempogram => self.tempogram(waveform, cancel),
        }
    }

    /// Computes the requested analyses from one shared STFT and, when onset
    /// strength or the tempogram is requested, one shared onset envelope.
    /// The branches after that run in parallel; results keep the order of
    /// `kinds`.
    pub fn run_many(
        &self,
        kinds: &[AnalysisKind],
        waveform: Waveform<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Analysis>> {
        let needs_stft = kinds.iter().any(|kind| *kind != AnalysisKind::Waveform);
        let stft = if needs_stft {
            Some(self.engine()?.stft(waveform.samples(), cancel)?)
        } else {
            None
        };
        let needs_envelope = kinds.iter().any(|kind| {
            matches!(kind, AnalysisKind::OnsetStrength | AnalysisKind::Tempogram)
        });
        let envelope = match &stft {
            Some(stft) if needs_envelope => {
                Some(self.onset_detector(waveform)?.onset_strength(stft)?)
            }
            _ => None,
        };
        let shared = Shared {
            stft: stft.as_ref(),
            envelope: envelope.as_deref(),
        };

        let mut results = Vec::with_capacity(kinds.len());
        let (left, right) = kinds.split_at(kinds.len() / 2);
        let (a, b) = rayon::join(
            || self.derive_from_shared(left, waveform, shared, cancel),
            || self.derive_from_shared(right, waveform, shared, cancel),
        );
        results.extend(a?);
        results.extend(b?);
        tracing::info!(analyses = results.len(), "analysis batch complete");
        Ok(results)
    }

    /// All six analyses.
    pub fn run_all(
        &self,
        waveform: Waveform<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Analysis>> {
        self.run_many(&AnalysisKind::ALL, waveform, cancel)
    }

    /// The samples themselves, one column per sample.
    pub fn waveform(&self, waveform: Waveform<'_>) -> Analysis {
        Analysis {
            kind: AnalysisKind::Waveform,
            data: AnalysisData::Vector(waveform.samples().to_vec()),
            axes: AxisMetadata {
                seconds_per_column: 1.0 / waveform.sample_rate() as f32,
                duration_seconds: waveform.duration_seconds(),
                sample_rate: waveform.sample_rate(),
                y_axis: YAxis::Amplitude,
                values: ValueScale::Linear,
            },
        }
    }

    /// Linear-frequency magnitude spectrogram in dB.
    pub fn spectrogram(
        &self,
        waveform: Waveform<'_>,
        cancel: &CancellationToken,
    ) -> Result<Analysis> {
        let stft = self.engine()?.stft(waveform.samples(), cancel)?;
        Ok(self.spectrogram_from(waveform, &stft))
    }

    /// Mel power spectrogram in dB.
    pub fn mel_spectrogram(
        &self,
        waveform: Waveform<'_>,
        cancel: &CancellationToken,
    ) -> Result<Analysis> {
        let mel = self.mel_bank(waveform)?;
        let stft = self.engine()?.stft(waveform.samples(), cancel)?;
        self.mel_from(waveform, &stft, &mel)
    }

    /// Per-frame pitch-class energy, peak-normalised.
    pub fn chromagram(
        &self,
        waveform: Waveform<'_>,
        cancel: &CancellationToken,
    ) -> Result<Analysis> {
        let chroma = self.chroma_bank(waveform)?;
        let stft = self.engine()?.stft(waveform.samples(), cancel)?;
        self.chroma_from(waveform, &stft, &chroma)
    }

    /// Spectral-flux novelty, one value per frame.
    pub fn onset_strength(
        &self,
        waveform: Waveform<'_>,
        cancel: &CancellationToken,
    ) -> Result<Analysis> {
        let detector = self.onset_detector(waveform)?;
        let stft = self.engine()?.stft(waveform.samples(), cancel)?;
        let envelope = detector.onset_strength(&stft)?;
        Ok(self.onset_analysis(waveform, envelope))
    }

    /// Autocorrelation tempogram of the onset envelope.
    pub fn tempogram(
        &self,
        waveform: Waveform<'_>,
        cancel: &CancellationToken,
    ) -> Result<Analysis> {
        let estimator = self.tempogram_estimator(waveform)?;
        let detector = self.onset_detector(waveform)?;
        let stft = self.engine()?.stft(waveform.samples(), cancel)?;
        let envelope = detector.onset_strength(&stft)?;
        self.tempogram_from(waveform, &envelope, &estimator, cancel)
    }

    fn derive_from_shared(
        &self,
        kinds: &[AnalysisKind],
        waveform: Waveform<'_>,
        shared: Shared<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Analysis>> {
        kinds
            .iter()
            .map(|&kind| -> Result<Analysis> {
                cancel.check()?;
                let Some(stft) = shared.stft else {
                    return self.run(kind, waveform, cancel);
                };
                match kind {
                    AnalysisKind::Waveform => Ok(self.waveform(waveform)),
                    AnalysisKind::Spectrogram => Ok(self.spectrogram_from(waveform, stft)),
                    AnalysisKind::MelSpectrogram => {
                        let mel = self.mel_bank(waveform)?;
                        self.mel_from(waveform, stft, &mel)
                    }
                    AnalysisKind::Chromagram => {
                        let chroma = self.chroma_bank(waveform)?;
                        self.chroma_from(waveform, stft, &chroma)
                    }
                    AnalysisKind::OnsetStrength => {
                        let envelope = self.envelope_for(waveform, stft, shared.envelope)?;
                        Ok(self.onset_analysis(waveform, envelope.into_owned()))
                    }
                    AnalysisKind::Tempogram => {
                        let estimator = self.tempogram_estimator(waveform)?;
                        let envelope = self.envelope_for(waveform, stft, shared.envelope)?;
                        self.tempogram_from(waveform, &envelope, &estimator, cancel)
                    }
                }
            })
            .collect()
    }

    /// The batch envelope when one was computed, otherwise a fresh one.
    fn envelope_for<'e>(
        &self,
        waveform: Waveform<'_>,
        stft: &Matrix,
        shared: Option<&'e [f32]>,
    ) -> Result<Cow<'e, [f32]>> {
        match shared {
            Some(envelope) => Ok(Cow::Borrowed(envelope)),
            None => Ok(Cow::Owned(
                self.onset_detector(waveform)?.onset_strength(stft)?,
            )),
        }
    }

    fn engine(&self) -> Result<SpectralEngine> {
        SpectralEngine::new(&self.config.stft)
    }

    fn mel_bank(&self, waveform: Waveform<'_>) -> Result<Arc<MelFilterbank>> {
        self.cache
            .mel(waveform.sample_rate(), self.config.stft.n_fft, &self.config.mel)
    }

    fn chroma_bank(&self, waveform: Waveform<'_>) -> Result<Arc<ChromaProjector>> {
        self.cache
            .chroma(waveform.sample_rate(), self.config.stft.n_fft, &self.config.chroma)
    }

    fn onset_detector(&self, waveform: Waveform<'_>) -> Result<OnsetDetector> {
        let mel = match self.config.onset.source {
            OnsetSource::MelLogPower => Some(self.mel_bank(waveform)?),
            OnsetSource::LinearMagnitude => None,
        };
        OnsetDetector::new(&self.config.onset, mel)
    }

    fn tempogram_estimator(&self, waveform: Waveform<'_>) -> Result<TempogramEstimator> {
        TempogramEstimator::new(
            waveform.sample_rate(),
            self.config.stft.hop_length,
            &self.config.tempogram,
        )
    }

    fn frame_axes(
        &self,
        waveform: Waveform<'_>,
        y_axis: YAxis,
        values: ValueScale,
    ) -> AxisMetadata {
        AxisMetadata {
            seconds_per_column: self.config.stft.hop_length as f32 / waveform.sample_rate() as f32,
            duration_seconds: waveform.duration_seconds(),
            sample_rate: waveform.sample_rate(),
            y_axis,
            values,
        }
    }

    fn spectrogram_from(&self, waveform: Waveform<'_>, stft: &Matrix) -> Analysis {
        let decibels = &self.config.decibels;
        let db = spectral::amplitude_to_db(stft, decibels.reference, decibels.top_db);
        let bins = spectral::bin_frequencies(waveform.sample_rate(), self.config.stft.n_fft);
        Analysis {
            kind: AnalysisKind::Spectrogram,
            data: AnalysisData::Matrix(db),
            axes: self.frame_axes(waveform, YAxis::FrequencyHz { bins }, ValueScale::Decibels),
        }
    }

    fn mel_from(
        &self,
        waveform: Waveform<'_>,
        stft: &Matrix,
        mel: &MelFilterbank,
    ) -> Result<Analysis> {
        let decibels = &self.config.decibels;
        let db = mel.mel_spectrogram_db(stft, decibels.reference, decibels.top_db)?;
        let y_axis = YAxis::Mel {
            center_hz: mel.center_frequencies().to_vec(),
        };
        Ok(Analysis {
            kind: AnalysisKind::MelSpectrogram,
            data: AnalysisData::Matrix(db),
            axes: self.frame_axes(waveform, y_axis, ValueScale::Decibels),
        })
    }

    fn chroma_from(
        &self,
        waveform: Waveform<'_>,
        stft: &Matrix,
        chroma: &ChromaProjector,
    ) -> Result<Analysis> {
        let y_axis = YAxis::PitchClass {
            labels: chroma.labels(),
        };
        Ok(Analysis {
            kind: AnalysisKind::Chromagram,
            data: AnalysisData::Matrix(chroma.chromagram(stft)?),
            axes: self.frame_axes(waveform, y_axis, ValueScale::Normalized),
        })
    }

    fn onset_analysis(&self, waveform: Waveform<'_>, envelope: Vec<f32>) -> Analysis {
        Analysis {
            kind: AnalysisKind::OnsetStrength,
            data: AnalysisData::Vector(envelope),
            axes: self.frame_axes(waveform, YAxis::OnsetStrength, ValueScale::Linear),
        }
    }

    fn tempogram_from(
        &self,
        waveform: Waveform<'_>,
        envelope: &[f32],
        estimator: &TempogramEstimator,
        cancel: &CancellationToken,
    ) -> Result<Analysis> {
        let tempogram = estimator.estimate(envelope, cancel)?;
        let y_axis = YAxis::Tempo {
            lags: estimator.lags().to_vec(),
            bpm: estimator.bpms(),
        };
        Ok(Analysis {
            kind: AnalysisKind::Tempogram,
            data: AnalysisData::Matrix(tempogram),
            axes: self.frame_axes(waveform, y_axis, ValueScale::Normalized),
        })
    }
}

/// Intermediate results computed once per batch.
#[derive(Clone, Copy)]
struct Shared<'a> {
    stft: Option<&'a Matrix>,
    envelope: Option<&'a [f32]>,
}

/// One-shot analysis without keeping a [`Pipeline`] around.
pub fn analyze(
    kind: AnalysisKind,
    waveform: Waveform<'_>,
    config: &AnalysisConfig,
    cache: &FilterbankCache,
    cancel: &CancellationToken,
) -> Result<Analysis> {
    Pipeline::new(config.clone(), cache)?.run(kind, waveform, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal;

    fn tone_pipeline(cache: &FilterbankCache) -> Pipeline<'_> {
        Pipeline::new(AnalysisConfig::default(), cache).unwrap()
    }

    #[test]
    fn parses_kind_names() {
        assert_eq!(
            "mel-spectrogram".parse::<AnalysisKind>().unwrap(),
            AnalysisKind::MelSpectrogram
        );
        assert_eq!("Tempogram".parse::<AnalysisKind>().unwrap(), AnalysisKind::Tempogram);
        assert!("histogram".parse::<AnalysisKind>().is_err());
        for kind in AnalysisKind::ALL {
            assert_eq!(kind.to_string().parse::<AnalysisKind>().unwrap(), kind);
        }
    }

    #[test]
    fn rejects_zero_sample_rate() {
        assert!(Waveform::new(&[0.0; 4], 0).is_err());
    }

    #[test]
    fn waveform_passthrough_keeps_samples() {
        let cache = FilterbankCache::new();
        let samples = [0.25, -0.5, 1.0];
        let waveform = Waveform::new(&samples, 4).unwrap();
        let analysis = tone_pipeline(&cache).waveform(waveform);
        assert_eq!(analysis.data.as_vector(), Some(&samples[..]));
        assert_eq!(analysis.axes.seconds_per_column, 0.25);
        assert_eq!(analysis.axes.duration_seconds, 0.75);
    }

    #[test]
    fn shared_stft_matches_individual_runs() {
        let cache = FilterbankCache::new();
        let pipeline = tone_pipeline(&cache);
        let samples = signal::tone(440.0, 22_050, 0.5);
        let waveform = Waveform::new(&samples, 22_050).unwrap();
        let cancel = CancellationToken::new();

        let batch = pipeline.run_all(waveform, &cancel).unwrap();
        assert_eq!(
            batch.iter().map(|a| a.kind).collect::<Vec<_>>(),
            AnalysisKind::ALL.to_vec()
        );
        for analysis in &batch {
            let single = pipeline.run(analysis.kind, waveform, &cancel).unwrap();
            assert_eq!(&single, analysis, "{} differs", analysis.kind);
        }
    }

    #[test]
    fn batch_reuses_filterbanks_and_onset_envelope() {
        let cache = FilterbankCache::new();
        let pipeline = tone_pipeline(&cache);
        let samples = signal::tone(440.0, 22_050, 0.5);
        let waveform = Waveform::new(&samples, 22_050).unwrap();
        let cancel = CancellationToken::new();

        let batch = pipeline
            .run_many(
                &[
                    AnalysisKind::MelSpectrogram,
                    AnalysisKind::Chromagram,
                    AnalysisKind::OnsetStrength,
                    AnalysisKind::Tempogram,
                ],
                waveform,
                &cancel,
            )
            .unwrap();
        assert_eq!(batch.len(), 4);
        // One mel lookup for the mel branch, one for the shared onset
        // envelope and one chroma lookup.
        assert_eq!(cache.hits() + cache.misses(), 3);
        assert_eq!(cache.len(), 2);

        let onset = batch[2].data.as_vector().unwrap();
        let single = pipeline.onset_strength(waveform, &cancel).unwrap();
        assert_eq!(single.data.as_vector(), Some(onset));
    }

    #[test]
    fn axes_describe_rows() {
        let cache = FilterbankCache::new();
        let pipeline = tone_pipeline(&cache);
        let samples = signal::tone(220.0, 22_050, 0.25);
        let waveform = Waveform::new(&samples, 22_050).unwrap();
        let cancel = CancellationToken::new();

        let mel = pipeline.mel_spectrogram(waveform, &cancel).unwrap();
        match &mel.axes.y_axis {
            YAxis::Mel { center_hz } => assert_eq!(center_hz.len(), 128),
            other => panic!("unexpected axis {other:?}"),
        }
        assert_eq!(mel.axes.values, ValueScale::Decibels);
        assert!((mel.axes.seconds_per_column - 512.0 / 22_050.0).abs() < 1e-9);

        let chroma = pipeline.chromagram(waveform, &cancel).unwrap();
        match &chroma.axes.y_axis {
            YAxis::PitchClass { labels } => assert_eq!(labels[0], "C"),
            other => panic!("unexpected axis {other:?}"),
        }

        let tempo = pipeline.tempogram(waveform, &cancel).unwrap();
        match &tempo.axes.y_axis {
            YAxis::Tempo { lags, bpm } => {
                assert_eq!(lags.len(), tempo.data.as_matrix().unwrap().rows());
                assert_eq!(lags.len(), bpm.len());
            }
            other => panic!("unexpected axis {other:?}"),
        }
    }

    #[test]
    fn empty_waveform_is_a_degenerate_success() {
        let cache = FilterbankCache::new();
        let pipeline = tone_pipeline(&cache);
        let waveform = Waveform::new(&[], 22_050).unwrap();
        let results = pipeline.run_all(waveform, &CancellationToken::new()).unwrap();
        assert!(results.iter().all(|analysis| analysis.data.columns() == 0));
        let mel = results[2].data.as_matrix().unwrap();
        assert_eq!(mel.shape(), (128, 0));
    }

    #[test]
    fn cancelled_batches_return_no_results() {
        let cache = FilterbankCache::new();
        let pipeline = tone_pipeline(&cache);
        let samples = signal::tone(440.0, 22_050, 0.5);
        let waveform = Waveform::new(&samples, 22_050).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            pipeline.run_all(waveform, &cancel),
            Err(VisionWavError::Cancelled)
        ));
    }

    #[test]
    fn sample_rate_dependent_checks_surface_at_run_time() {
        let cache = FilterbankCache::new();
        let mut config = AnalysisConfig::default();
        config.mel.fmax = Some(11_000.0);
        let pipeline = Pipeline::new(config, &cache).unwrap();
        let samples = vec![0.0; 4096];
        let cancel = CancellationToken::new();

        let low_rate = Waveform::new(&samples, 8000).unwrap();
        assert!(matches!(
            pipeline.mel_spectrogram(low_rate, &cancel),
            Err(VisionWavError::InvalidConfig(_))
        ));
        let high_rate = Waveform::new(&samples, 22_050).unwrap();
        assert!(pipeline.mel_spectrogram(high_rate, &cancel).is_ok());
    }
}
