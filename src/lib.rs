pub mod audio;
pub mod budget;
pub mod config;
pub mod core;
pub mod error;
pub mod fingerprint;
pub mod hashing;
pub mod index;
pub mod logging;
pub mod matching;
pub mod models;
pub mod peaks;
pub mod pool;
pub mod resample;
pub mod spectrogram;
pub mod sqlite;
pub mod storage;

pub use audio::{AudioPreprocessor, DecodeError, PcmDecoder, WavDecoder};
pub use budget::{Budget, BudgetExceeded, CancelFlag};
pub use config::{ConfigError, EngineConfig, ResamplerKind, TransformBackend};
pub use crate::core::Engine;
pub use error::{EngineError, FingerprintError, IndexError, PoolError, StoreError, ValidationError};
pub use fingerprint::{AudioFingerprinter, FingerprintStats};
pub use hashing::{LandmarkHasher, LandmarkKey};
pub use index::{FingerprintIndex, IngestReport, RejectedFingerprint};
pub use models::{
    AudioBuffer, Fingerprint, FingerprintSet, IndexStats, MatchResult, NewSong, Peak, Song, SongId,
    SongMetadata,
};
pub use peaks::PeakDetector;
pub use pool::FingerprintPool;
pub use spectrogram::{Spectrogram, SpectrogramComputer};
pub use sqlite::SqliteStore;
pub use storage::{FingerprintStore, MemoryStore, Posting};
