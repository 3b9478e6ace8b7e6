use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use crate::{
    ChromaConfig, ChromaProjector, MelConfig, MelFilterbank, MelNorm, MelScale, Result,
    VisionWavError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MelKey {
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    fmin_bits: u32,
    fmax_bits: Option<u32>,
    scale: MelScale,
    norm: MelNorm,
}

impl MelKey {
    fn new(sample_rate: u32, n_fft: usize, config: &MelConfig) -> Self {
        Self {
            sample_rate,
            n_fft,
            n_mels: config.n_mels,
            fmin_bits: config.fmin.to_bits(),
            fmax_bits: config.fmax.map(f32::to_bits),
            scale: config.scale,
            norm: config.norm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ChromaKey {
    sample_rate: u32,
    n_fft: usize,
    n_chroma: usize,
    tuning_bits: u32,
}

impl ChromaKey {
    fn new(sample_rate: u32, n_fft: usize, config: &ChromaConfig) -> Self {
        Self {
            sample_rate,
            n_fft,
            n_chroma: config.n_chroma,
            tuning_bits: config.tuning.to_bits(),
        }
    }
}

/// Memoised filterbanks shared by concurrent analyses.
///
/// Lookups take a read lock; a miss builds the filterbank without holding
/// any lock and takes the write lock only to insert. Entries are never
/// replaced, so two racing builders end up sharing whichever landed first.
#[derive(Default)]
pub struct FilterbankCache {
    mel: RwLock<HashMap<MelKey, Arc<MelFilterbank>>>,
    chroma: RwLock<HashMap<ChromaKey, Arc<ChromaProjector>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FilterbankCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mel(
        &self,
        sample_rate: u32,
        n_fft: usize,
        config: &MelConfig,
    ) -> Result<Arc<MelFilterbank>> {
        let key = MelKey::new(sample_rate, n_fft, config);
        self.get_or_build(&self.mel, key, || {
            MelFilterbank::build(sample_rate, n_fft, config)
        })
    }

    pub fn chroma(
        &self,
        sample_rate: u32,
        n_fft: usize,
        config: &ChromaConfig,
    ) -> Result<Arc<ChromaProjector>> {
        let key = ChromaKey::new(sample_rate, n_fft, config);
        self.get_or_build(&self.chroma, key, || {
            ChromaProjector::build(sample_rate, n_fft, config)
        })
    }

    /// Number of cached filterbanks of both kinds.
    pub fn len(&self) -> usize {
        let mel = self.mel.read().map(|map| map.len()).unwrap_or(0);
        let chroma = self.chroma.read().map(|map| map.len()).unwrap_or(0);
        mel + chroma
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn get_or_build<K, V>(
        &self,
        map: &RwLock<HashMap<K, Arc<V>>>,
        key: K,
        build: impl FnOnce() -> Result<V>,
    ) -> Result<Arc<V>>
    where
        K: Eq + Hash + fmt::Debug,
    {
        {
            let entries = map
                .read()
                .map_err(|_| VisionWavError::msg("filterbank cache has been poisoned"))?;
            if let Some(found) = entries.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(found));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(?key, "filterbank cache miss");
        let built = Arc::new(build()?);

        let mut entries = map
            .write()
            .map_err(|_| VisionWavError::msg("filterbank cache has been poisoned"))?;
        Ok(Arc::clone(entries.entry(key).or_insert(built)))
    }
}

impl fmt::Debug for FilterbankCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterbankCache")
            .field("entries", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}
