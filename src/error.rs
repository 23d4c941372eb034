use thiserror::Error;

use crate::budget::BudgetExceeded;

/// Input rejected before any processing happened.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Audio buffer is empty")]
    EmptyBuffer,
    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(u32),
    #[error("Only mono and stereo audio are supported, got {0} channels")]
    UnsupportedChannels(u16),
    #[error("Buffer of {len} samples is not a whole number of {channels}-channel frames")]
    RaggedFrames { len: usize, channels: u16 },
    #[error("Transform size must be a positive power of two, got {0}")]
    TransformSize(usize),
    #[error("Hop size must be in 1..={transform_size}, got {hop_size}")]
    HopSize { hop_size: usize, transform_size: usize },
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Errors raised by the spectral pipeline.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The pipeline hit an internal failure; retrying the same input will not help.
    #[error("Audio processing failed: {0}")]
    Processing(String),
}

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Store lock poisoned")]
    Poisoned,
    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),
}

/// Infrastructure failures of the fingerprint index.
///
/// A query that legitimately finds nothing is `Ok(None)`, never one of these.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index store failure: {0}")]
    Store(StoreError),
    #[error("Index operation exceeded its time budget")]
    TimedOut,
    #[error("Index operation was cancelled")]
    Cancelled,
    #[error("Song '{title}' by '{artist}' already exists as id {existing}")]
    DuplicateSong {
        title: String,
        artist: String,
        existing: i64,
    },
    #[error("Invalid song metadata: {0}")]
    InvalidSong(String),
}

impl From<StoreError> for IndexError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Budget(BudgetExceeded::TimedOut) => IndexError::TimedOut,
            StoreError::Budget(BudgetExceeded::Cancelled) => IndexError::Cancelled,
            other => IndexError::Store(other),
        }
    }
}

impl From<BudgetExceeded> for IndexError {
    fn from(err: BudgetExceeded) -> Self {
        StoreError::Budget(err).into()
    }
}

impl IndexError {
    /// True for failures a caller may reasonably retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IndexError::Store(StoreError::Sqlite(_)) | IndexError::TimedOut
        )
    }
}

/// Errors of the bounded fingerprint worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Fingerprint queue is full ({capacity} pending jobs)")]
    Saturated { capacity: usize },
    #[error("Fingerprint job exceeded its time budget")]
    TimedOut,
    #[error("Fingerprint job was cancelled")]
    Cancelled,
    #[error("Fingerprint workers have shut down")]
    Disconnected,
    #[error("Failed to start fingerprint worker: {0}")]
    Spawn(std::io::Error),
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
}

/// Errors of the end-to-end engine calls.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl EngineError {
    /// True when the failure was a budget expiry rather than bad input or broken storage.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            EngineError::Pool(PoolError::TimedOut) | EngineError::Index(IndexError::TimedOut)
        )
    }
}
