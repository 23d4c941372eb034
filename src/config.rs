//! Engine configuration, loadable from TOML.
//!
//! Every section has working defaults, so an empty document is a valid
//! configuration:
//!
//! ```toml
//! [spectrogram]
//! transform_size = 2048
//! hop_size = 512
//!
//! [matching]
//! min_matches = 5
//! cluster_tolerance_ms = 2000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ValidationError;

/// Largest chunk accepted for IN-style lookups and batched inserts.
pub const MAX_STATEMENT_ROWS: usize = 5_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config TOML: {source}")]
    ParseToml { source: toml::de::Error },
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResamplerKind {
    /// Band-limited windowed-sinc interpolation.
    #[default]
    Sinc,
    /// Linear interpolation between neighbouring samples.
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformBackend {
    /// `rustfft` planner.
    RustFft,
    /// Direct DFT from a precomputed twiddle table.
    Direct,
}

impl Default for TransformBackend {
    fn default() -> Self {
        if cfg!(feature = "rustfft") {
            TransformBackend::RustFft
        } else {
            TransformBackend::Direct
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Canonical rate every buffer is resampled to before analysis.
    pub target_sample_rate: u32,
    pub resampler: ResamplerKind,
    /// Peak-normalize to +-1 after resampling.
    pub normalize: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 11_025,
            resampler: ResamplerKind::Sinc,
            normalize: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrogramConfig {
    pub transform_size: usize,
    pub hop_size: usize,
    pub backend: TransformBackend,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            transform_size: 2048,
            hop_size: 512,
            backend: TransformBackend::default(),
        }
    }
}

impl SpectrogramConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.transform_size == 0 || !self.transform_size.is_power_of_two() {
            return Err(ValidationError::TransformSize(self.transform_size));
        }
        if self.hop_size == 0 || self.hop_size > self.transform_size {
            return Err(ValidationError::HopSize {
                hop_size: self.hop_size,
                transform_size: self.transform_size,
            });
        }
        Ok(())
    }

    pub fn bins(&self) -> usize {
        self.transform_size / 2 + 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Half-height of the suppression window, in frames.
    pub neighborhood_frames: usize,
    /// Half-width of the suppression window, in bins.
    pub neighborhood_bins: usize,
    /// Half-size of the region averaged for the adaptive threshold.
    pub threshold_region: usize,
    /// A peak must exceed the regional mean by this factor (0.0..=1.0).
    pub adaptive_factor: f32,
    /// Absolute magnitude floor.
    pub min_magnitude: f32,
    /// Peaks further than this below the loudest nearby frame are dropped.
    pub dynamic_range_db: f32,
    /// Quantization step applied to levels before neighbourhood comparison.
    pub level_step_db: f32,
    pub max_peaks_per_frame: usize,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            neighborhood_frames: 3,
            neighborhood_bins: 10,
            threshold_region: 5,
            adaptive_factor: 0.7,
            min_magnitude: 0.01,
            dynamic_range_db: 30.0,
            level_step_db: 0.5,
            max_peaks_per_frame: 5,
        }
    }
}

impl PeakConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=1.0).contains(&self.adaptive_factor) {
            return Err(invalid("peaks.adaptive_factor must be within 0.0..=1.0"));
        }
        if !(self.min_magnitude >= 0.0) {
            return Err(invalid("peaks.min_magnitude must be non-negative"));
        }
        if !(self.dynamic_range_db > 0.0) {
            return Err(invalid("peaks.dynamic_range_db must be positive"));
        }
        if !(self.level_step_db > 0.0) {
            return Err(invalid("peaks.level_step_db must be positive"));
        }
        if self.max_peaks_per_frame == 0 {
            return Err(invalid("peaks.max_peaks_per_frame must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Targets paired with each anchor.
    pub fan_out: usize,
    pub min_time_delta_frames: usize,
    pub max_time_delta_ms: u32,
    pub max_freq_delta_hz: f32,
    /// Bins folded together before packing frequencies into the hash.
    pub freq_quantum_bins: usize,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            fan_out: 3,
            min_time_delta_frames: 1,
            max_time_delta_ms: 2_000,
            max_freq_delta_hz: 2_000.0,
            freq_quantum_bins: 1,
        }
    }
}

impl HashConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.fan_out == 0 {
            return Err(invalid("hashing.fan_out must be positive"));
        }
        if self.min_time_delta_frames == 0 {
            return Err(invalid("hashing.min_time_delta_frames must be at least 1"));
        }
        if self.freq_quantum_bins == 0 {
            return Err(invalid("hashing.freq_quantum_bins must be positive"));
        }
        if !(self.max_freq_delta_hz >= 0.0) {
            return Err(invalid("hashing.max_freq_delta_hz must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Default threshold used by the engine's `identify`.
    pub min_matches: usize,
    pub cluster_tolerance_ms: u32,
    pub min_confidence: f64,
    /// Query fingerprints beyond this count are ignored.
    pub max_query_fingerprints: usize,
    /// Hash values per IN-style lookup.
    pub lookup_chunk_size: usize,
    /// Postings per insert batch.
    pub ingest_batch_size: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_matches: 5,
            cluster_tolerance_ms: 2_000,
            min_confidence: 0.01,
            max_query_fingerprints: 2_000,
            lookup_chunk_size: 500,
            ingest_batch_size: 1_000,
        }
    }
}

impl MatchingConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min_matches == 0 {
            return Err(invalid("matching.min_matches must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(invalid("matching.min_confidence must be within 0.0..=1.0"));
        }
        if self.max_query_fingerprints == 0 {
            return Err(invalid("matching.max_query_fingerprints must be positive"));
        }
        if !(1..=MAX_STATEMENT_ROWS).contains(&self.lookup_chunk_size) {
            return Err(invalid("matching.lookup_chunk_size must be within 1..=5000"));
        }
        if !(1..=MAX_STATEMENT_ROWS).contains(&self.ingest_batch_size) {
            return Err(invalid("matching.ingest_batch_size must be within 1..=5000"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub fingerprint_timeout_ms: u64,
    pub query_timeout_ms: u64,
    pub identify_timeout_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            fingerprint_timeout_ms: 5_000,
            query_timeout_ms: 3_000,
            identify_timeout_ms: 10_000,
        }
    }
}

impl BudgetConfig {
    pub fn fingerprint_timeout(&self) -> Duration {
        Duration::from_millis(self.fingerprint_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn identify_timeout(&self) -> Duration {
        Duration::from_millis(self.identify_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker threads; 0 uses the available parallelism.
    pub workers: usize,
    /// Jobs allowed to wait for a worker before submissions are refused.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 32,
        }
    }
}

impl PoolConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub spectrogram: SpectrogramConfig,
    pub peaks: PeakConfig,
    pub hashing: HashConfig,
    pub matching: MatchingConfig,
    pub budgets: BudgetConfig,
    pub pool: PoolConfig,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|source| ConfigError::ParseToml { source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.audio.target_sample_rate == 0 {
            return Err(ValidationError::InvalidSampleRate(0));
        }
        self.spectrogram.validate()?;
        self.peaks.validate()?;
        self.hashing.validate()?;
        self.matching.validate()?;
        if self.budgets.fingerprint_timeout_ms == 0
            || self.budgets.query_timeout_ms == 0
            || self.budgets.identify_timeout_ms == 0
        {
            return Err(invalid("budgets must be positive"));
        }
        if self.pool.queue_capacity == 0 {
            return Err(invalid("pool.queue_capacity must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ValidationError {
    ValidationError::Config(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.audio.target_sample_rate, 11_025);
        assert_eq!(config.spectrogram.bins(), 1025);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [spectrogram]
            hop_size = 1024
            backend = "direct"

            [matching]
            min_matches = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.spectrogram.hop_size, 1024);
        assert_eq!(config.spectrogram.transform_size, 2048);
        assert_eq!(config.spectrogram.backend, TransformBackend::Direct);
        assert_eq!(config.matching.min_matches, 8);
        assert_eq!(config.matching.cluster_tolerance_ms, 2_000);
    }

    #[test]
    fn rejects_non_power_of_two_transform() {
        let err =
            EngineConfig::from_toml_str("[spectrogram]\ntransform_size = 1000\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid(ValidationError::TransformSize(1000))
        ));
    }

    #[test]
    fn rejects_hop_larger_than_transform() {
        let config = SpectrogramConfig {
            transform_size: 512,
            hop_size: 1024,
            ..SpectrogramConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::HopSize { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_matching_settings() {
        let mut config = EngineConfig::default();
        config.matching.lookup_chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.matching.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = EngineConfig::from_toml_str("[matching\nmin_matches = 1").unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml { .. }));
    }

    #[test]
    fn pool_worker_count_defaults_to_cores() {
        assert!(PoolConfig::default().worker_count() >= 1);
        let fixed = PoolConfig {
            workers: 3,
            ..PoolConfig::default()
        };
        assert_eq!(fixed.worker_count(), 3);
    }
}
