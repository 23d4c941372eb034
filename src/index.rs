use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::budget::Budget;
use crate::config::{BudgetConfig, MatchingConfig};
use crate::error::IndexError;
use crate::matching::{score_candidates, select_best, QueryHashes};
use crate::models::{Fingerprint, IndexStats, MatchResult, NewSong, Song, SongId, SongMetadata};
use crate::storage::{FingerprintStore, InsertOutcome};

/// A fingerprint dropped at ingest, by position in the submitted slice.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RejectedFingerprint {
    pub index: usize,
    pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub song: Song,
    pub stored: usize,
    pub rejected: Vec<RejectedFingerprint>,
}

/// Why a fingerprint cannot be stored, if it cannot.
fn invalid_reason(fp: &Fingerprint) -> Option<&'static str> {
    if fp.hash_value == 0 {
        return Some("hash value is zero");
    }
    let bad_hz = |hz: Option<f32>| hz.is_some_and(|hz| !hz.is_finite() || hz < 0.0);
    if bad_hz(fp.anchor_frequency_hz) {
        return Some("anchor frequency is negative or not finite");
    }
    if bad_hz(fp.target_frequency_hz) {
        return Some("target frequency is negative or not finite");
    }
    None
}

/// Hash-keyed reference index with offset-clustering identification.
#[derive(Clone)]
pub struct FingerprintIndex {
    store: Arc<dyn FingerprintStore>,
    config: MatchingConfig,
    query_timeout: Duration,
}

impl FingerprintIndex {
    pub fn new(store: Arc<dyn FingerprintStore>, config: MatchingConfig) -> Self {
        Self {
            store,
            config,
            query_timeout: BudgetConfig::default().query_timeout(),
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn FingerprintStore> {
        &self.store
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Stores `song` with its valid fingerprints.
    ///
    /// Returns `Ok(None)` when the song already exists and
    /// `skip_duplicates` is set; without it a duplicate is an error.
    pub fn ingest(
        &self,
        song: &NewSong,
        fingerprints: &[Fingerprint],
        skip_duplicates: bool,
    ) -> Result<Option<IngestReport>, IndexError> {
        song.validate()?;

        let mut valid = Vec::with_capacity(fingerprints.len());
        let mut rejected = Vec::new();
        for (index, fp) in fingerprints.iter().enumerate() {
            match invalid_reason(fp) {
                None => valid.push(*fp),
                Some(reason) => {
                    warn!(index, hash = fp.hash_value, reason, "Rejected fingerprint");
                    rejected.push(RejectedFingerprint {
                        index,
                        reason: reason.to_string(),
                    });
                }
            }
        }

        match self.store.insert_song(song, &valid)? {
            InsertOutcome::Inserted(stored) => {
                info!(
                    song_id = stored.id,
                    title = %stored.title,
                    artist = %stored.artist,
                    fingerprints = valid.len(),
                    rejected = rejected.len(),
                    "Ingested song"
                );
                Ok(Some(IngestReport {
                    song: stored,
                    stored: valid.len(),
                    rejected,
                }))
            }
            InsertOutcome::Duplicate(existing) if skip_duplicates => {
                info!(
                    existing,
                    title = %song.title,
                    artist = %song.artist,
                    "Skipped duplicate song"
                );
                Ok(None)
            }
            InsertOutcome::Duplicate(existing) => Err(IndexError::DuplicateSong {
                title: song.title.clone(),
                artist: song.artist.clone(),
                existing,
            }),
        }
    }

    /// Best match for `fingerprints` within the default query budget.
    pub fn query(
        &self,
        fingerprints: &[Fingerprint],
        min_matches: usize,
    ) -> Result<Option<MatchResult>, IndexError> {
        self.query_with_budget(fingerprints, min_matches, &Budget::unbounded())
    }

    /// Like [`query`](Self::query), additionally bounded by `budget`.
    pub fn query_with_budget(
        &self,
        fingerprints: &[Fingerprint],
        min_matches: usize,
        budget: &Budget,
    ) -> Result<Option<MatchResult>, IndexError> {
        let budget = budget.narrowed(self.query_timeout);
        let min_matches = min_matches.max(1);
        let query = QueryHashes::new(fingerprints, self.config.max_query_fingerprints);
        if query.is_empty() {
            return Ok(None);
        }

        let mut postings = Vec::new();
        for chunk in query.distinct().chunks(self.config.lookup_chunk_size) {
            budget.check()?;
            postings.extend(self.store.lookup(chunk, &budget)?);
        }
        budget.check()?;
        if postings.len() < min_matches {
            debug!(postings = postings.len(), min_matches, "Too few postings to match");
            return Ok(None);
        }

        let scores = score_candidates(
            &postings,
            &query,
            min_matches,
            self.config.cluster_tolerance_ms,
        );
        let Some(best) = select_best(&scores) else {
            debug!(postings = postings.len(), "No song reached the match threshold");
            return Ok(None);
        };
        if best.match_count < min_matches || best.confidence < self.config.min_confidence {
            debug!(
                song_id = best.song_id,
                match_count = best.match_count,
                confidence = best.confidence,
                "Best candidate rejected"
            );
            return Ok(None);
        }

        let result = MatchResult {
            song_id: best.song_id,
            confidence: best.confidence,
            match_count: best.match_count,
            time_offset_ms: best.offset_ms.clamp(0, u32::MAX as i64) as u32,
        };
        info!(
            song_id = result.song_id,
            match_count = result.match_count,
            confidence = result.confidence,
            offset_ms = result.time_offset_ms,
            candidates = scores.len(),
            "Matched query"
        );
        Ok(Some(result))
    }

    pub fn remove(&self, id: SongId) -> Result<bool, IndexError> {
        let removed = self.store.remove_song(id)?;
        info!(song_id = id, removed, "Removed song");
        Ok(removed)
    }

    pub fn song(&self, id: SongId) -> Result<Option<Song>, IndexError> {
        Ok(self.store.song(id)?)
    }

    pub fn find_song(&self, title: &str, artist: &str) -> Result<Option<Song>, IndexError> {
        Ok(self.store.find_song(title, artist)?)
    }

    pub fn list_songs(&self, limit: usize, offset: usize) -> Result<Vec<Song>, IndexError> {
        Ok(self.store.list_songs(limit, offset)?)
    }

    pub fn song_metadata(&self, id: SongId) -> Result<Option<SongMetadata>, IndexError> {
        let Some(song) = self.store.song(id)? else {
            return Ok(None);
        };
        let fingerprint_count = self.store.fingerprint_count(id)?;
        Ok(Some(SongMetadata {
            song,
            fingerprint_count,
        }))
    }

    pub fn stats(&self) -> Result<IndexStats, IndexError> {
        Ok(self.store.stats()?)
    }
}
