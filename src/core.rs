use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::budget::Budget;
use crate::config::{ConfigError, EngineConfig};
use crate::error::{EngineError, IndexError};
use crate::fingerprint::AudioFingerprinter;
use crate::index::{FingerprintIndex, IngestReport};
use crate::models::{AudioBuffer, Fingerprint, FingerprintSet, MatchResult, NewSong, SongId};
use crate::pool::FingerprintPool;
use crate::sqlite::SqliteStore;
use crate::storage::{FingerprintStore, MemoryStore};

const SQLITE_READERS: usize = 4;

/// Fingerprinter, worker pool and index wired together under the
/// configured time budgets.
pub struct Engine {
    config: EngineConfig,
    fingerprinter: Arc<AudioFingerprinter>,
    pool: FingerprintPool,
    index: FingerprintIndex,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn FingerprintStore>,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(ConfigError::from)?;
        let fingerprinter = Arc::new(AudioFingerprinter::new(&config).map_err(ConfigError::from)?);
        let pool = FingerprintPool::new(Arc::clone(&fingerprinter), &config.pool)?;
        let index = FingerprintIndex::new(store, config.matching.clone())
            .with_query_timeout(config.budgets.query_timeout());
        info!(
            sample_rate = config.audio.target_sample_rate,
            transform_size = config.spectrogram.transform_size,
            hop_size = config.spectrogram.hop_size,
            workers = pool.workers(),
            "Engine ready"
        );
        Ok(Self {
            config,
            fingerprinter,
            pool,
            index,
        })
    }

    pub fn in_memory(config: EngineConfig) -> Result<Self, EngineError> {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    pub fn open_sqlite(config: EngineConfig, path: &Path) -> Result<Self, EngineError> {
        let store = SqliteStore::open_with(path, SQLITE_READERS, config.matching.ingest_batch_size)
            .map_err(IndexError::from)?;
        Self::new(config, Arc::new(store))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fingerprinter(&self) -> &AudioFingerprinter {
        &self.fingerprinter
    }

    pub fn pool(&self) -> &FingerprintPool {
        &self.pool
    }

    pub fn index(&self) -> &FingerprintIndex {
        &self.index
    }

    /// Fingerprints `buffer` on the pool within the fingerprint budget.
    pub fn fingerprint(&self, buffer: AudioBuffer) -> Result<Vec<Fingerprint>, EngineError> {
        self.fingerprint_with_budget(buffer, &Budget::unbounded())
    }

    pub fn fingerprint_with_budget(
        &self,
        buffer: AudioBuffer,
        budget: &Budget,
    ) -> Result<Vec<Fingerprint>, EngineError> {
        let budget = budget.narrowed(self.config.budgets.fingerprint_timeout());
        Ok(self.pool.generate(buffer, budget)?)
    }

    /// Fingerprints on the calling thread and packages them for export.
    pub fn fingerprint_set(&self, buffer: &AudioBuffer) -> Result<FingerprintSet, EngineError> {
        Ok(self.fingerprinter.generate_set(buffer)?)
    }

    pub fn ingest_audio(
        &self,
        song: &NewSong,
        buffer: AudioBuffer,
        skip_duplicates: bool,
    ) -> Result<Option<IngestReport>, EngineError> {
        song.validate()?;
        let fingerprints = self.fingerprint(buffer)?;
        Ok(self.index.ingest(song, &fingerprints, skip_duplicates)?)
    }

    /// Ingests several songs, fingerprinting them in parallel. One result
    /// per input, in order.
    pub fn ingest_batch(
        &self,
        items: Vec<(NewSong, AudioBuffer)>,
        skip_duplicates: bool,
    ) -> Vec<Result<Option<IngestReport>, EngineError>> {
        let (songs, buffers): (Vec<NewSong>, Vec<AudioBuffer>) = items.into_iter().unzip();
        let budget =
            Budget::new(self.config.budgets.fingerprint_timeout() * songs.len().max(1) as u32);
        let fingerprinted = self.pool.generate_batch(buffers, &budget);
        songs
            .iter()
            .zip(fingerprinted)
            .map(|(song, fingerprints)| -> Result<Option<IngestReport>, EngineError> {
                let fingerprints = fingerprints?;
                Ok(self.index.ingest(song, &fingerprints, skip_duplicates)?)
            })
            .collect()
    }

    /// Identifies `buffer` within the end-to-end budget.
    pub fn identify(&self, buffer: AudioBuffer) -> Result<Option<MatchResult>, EngineError> {
        self.identify_with_budget(buffer, &Budget::new(self.config.budgets.identify_timeout()))
    }

    pub fn identify_with_budget(
        &self,
        buffer: AudioBuffer,
        budget: &Budget,
    ) -> Result<Option<MatchResult>, EngineError> {
        let fingerprints = self.fingerprint_with_budget(buffer, budget)?;
        self.identify_fingerprints(&fingerprints, budget)
    }

    /// Matches already computed fingerprints with the configured minimum.
    pub fn identify_fingerprints(
        &self,
        fingerprints: &[Fingerprint],
        budget: &Budget,
    ) -> Result<Option<MatchResult>, EngineError> {
        Ok(self
            .index
            .query_with_budget(fingerprints, self.config.matching.min_matches, budget)?)
    }

    pub fn remove(&self, id: SongId) -> Result<bool, EngineError> {
        Ok(self.index.remove(id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoolError;
    use std::time::Duration;

    fn tone(freq: f32, secs: f32) -> AudioBuffer {
        let n = (secs * 11_025.0) as usize;
        let samples = (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 11_025.0).sin())
            .collect();
        AudioBuffer::mono(samples, 11_025).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.spectrogram.transform_size = 1000;
        assert!(matches!(Engine::in_memory(config), Err(EngineError::Config(_))));
    }

    #[test]
    fn ingest_then_identify() {
        let engine = Engine::in_memory(EngineConfig::default()).unwrap();
        let report = engine
            .ingest_audio(&NewSong::new("A", "Artist A"), tone(440.0, 10.0), true)
            .unwrap()
            .unwrap();
        let result = engine.identify(tone(440.0, 10.0)).unwrap().unwrap();
        assert_eq!(result.song_id, report.song.id);
        assert!(engine.remove(report.song.id).unwrap());
        assert!(engine.identify(tone(440.0, 10.0)).unwrap().is_none());
    }

    #[test]
    fn batch_ingest_keeps_input_order() {
        let engine = Engine::in_memory(EngineConfig::default()).unwrap();
        let results = engine.ingest_batch(
            vec![
                (NewSong::new("Low", "X"), tone(220.0, 3.0)),
                (NewSong::new("", "X"), tone(330.0, 3.0)),
                (NewSong::new("High", "X"), tone(880.0, 3.0)),
            ],
            true,
        );
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().as_ref().unwrap().song.title, "Low");
        assert!(matches!(results[1], Err(EngineError::Index(IndexError::InvalidSong(_)))));
        assert_eq!(results[2].as_ref().unwrap().as_ref().unwrap().song.title, "High");
    }

    #[test]
    fn expired_budget_is_a_timeout() {
        let engine = Engine::in_memory(EngineConfig::default()).unwrap();
        let err = engine
            .identify_with_budget(tone(440.0, 2.0), &Budget::new(Duration::ZERO))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, EngineError::Pool(PoolError::TimedOut)));
    }
}
