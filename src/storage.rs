use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::budget::Budget;
use crate::error::StoreError;
use crate::models::{normalize_key, Fingerprint, IndexStats, NewSong, Song, SongId};

/// Rows scanned between budget checks.
pub(crate) const BUDGET_CHECK_INTERVAL: usize = 1024;

/// One stored occurrence of a hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Posting {
    pub song_id: SongId,
    pub hash_value: u32,
    pub time_offset_ms: u32,
}

/// Result of an atomic check-then-insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(Song),
    /// A song with the same normalized identity already exists.
    Duplicate(SongId),
}

/// Where songs and their fingerprints live.
///
/// Implementations keep every fingerprint field verbatim and delete a song's
/// fingerprints together with the song.
pub trait FingerprintStore: Send + Sync {
    /// Inserts the song and all its fingerprints, or nothing at all when a
    /// song with the same identity exists.
    fn insert_song(
        &self,
        song: &NewSong,
        fingerprints: &[Fingerprint],
    ) -> Result<InsertOutcome, StoreError>;

    /// Postings for any of `hashes`, in no particular order.
    fn lookup(&self, hashes: &[u32], budget: &Budget) -> Result<Vec<Posting>, StoreError>;

    fn remove_song(&self, id: SongId) -> Result<bool, StoreError>;

    fn song(&self, id: SongId) -> Result<Option<Song>, StoreError>;

    /// Lookup by normalized title and artist.
    fn find_song(&self, title: &str, artist: &str) -> Result<Option<Song>, StoreError>;

    /// Newest first.
    fn list_songs(&self, limit: usize, offset: usize) -> Result<Vec<Song>, StoreError>;

    fn song_fingerprints(&self, id: SongId) -> Result<Vec<Fingerprint>, StoreError>;

    fn fingerprint_count(&self, id: SongId) -> Result<usize, StoreError>;

    fn stats(&self) -> Result<IndexStats, StoreError>;
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

struct StoredSong {
    song: Song,
    fingerprints: Vec<Fingerprint>,
}

#[derive(Default)]
struct Inner {
    songs: BTreeMap<SongId, StoredSong>,
    by_identity: HashMap<(String, String), SongId>,
    postings: HashMap<u32, Vec<(SongId, u32)>>,
    total_fingerprints: usize,
    last_id: SongId,
}

/// In-process store behind one `RwLock`: lookups share the lock, ingest and
/// removal take it exclusively.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

impl FingerprintStore for MemoryStore {
    fn insert_song(
        &self,
        song: &NewSong,
        fingerprints: &[Fingerprint],
    ) -> Result<InsertOutcome, StoreError> {
        let identity = song.identity_key();
        let mut inner = self.write()?;
        if let Some(&existing) = inner.by_identity.get(&identity) {
            return Ok(InsertOutcome::Duplicate(existing));
        }

        inner.last_id += 1;
        let id = inner.last_id;
        let stored = Song {
            id,
            title: song.title.clone(),
            artist: song.artist.clone(),
            album: song.album.clone(),
            duration_seconds: song.duration_seconds,
            created_at: unix_now(),
        };
        for fp in fingerprints {
            inner
                .postings
                .entry(fp.hash_value)
                .or_default()
                .push((id, fp.time_offset_ms));
        }
        inner.total_fingerprints += fingerprints.len();
        inner.by_identity.insert(identity, id);
        inner.songs.insert(
            id,
            StoredSong {
                song: stored.clone(),
                fingerprints: fingerprints.to_vec(),
            },
        );
        Ok(InsertOutcome::Inserted(stored))
    }

    fn lookup(&self, hashes: &[u32], budget: &Budget) -> Result<Vec<Posting>, StoreError> {
        budget.check()?;
        let inner = self.read()?;
        let mut out = Vec::new();
        let mut scanned = 0usize;
        for &hash_value in hashes {
            let Some(list) = inner.postings.get(&hash_value) else {
                continue;
            };
            for &(song_id, time_offset_ms) in list {
                scanned += 1;
                if scanned % BUDGET_CHECK_INTERVAL == 0 {
                    budget.check()?;
                }
                out.push(Posting {
                    song_id,
                    hash_value,
                    time_offset_ms,
                });
            }
        }
        Ok(out)
    }

    fn remove_song(&self, id: SongId) -> Result<bool, StoreError> {
        let mut inner = self.write()?;
        let Some(stored) = inner.songs.remove(&id) else {
            return Ok(false);
        };
        let identity = (
            normalize_key(&stored.song.title),
            normalize_key(&stored.song.artist),
        );
        inner.by_identity.remove(&identity);
        for fp in &stored.fingerprints {
            if let Some(list) = inner.postings.get_mut(&fp.hash_value) {
                list.retain(|&(song_id, _)| song_id != id);
                if list.is_empty() {
                    inner.postings.remove(&fp.hash_value);
                }
            }
        }
        inner.total_fingerprints -= stored.fingerprints.len();
        Ok(true)
    }

    fn song(&self, id: SongId) -> Result<Option<Song>, StoreError> {
        Ok(self.read()?.songs.get(&id).map(|s| s.song.clone()))
    }

    fn find_song(&self, title: &str, artist: &str) -> Result<Option<Song>, StoreError> {
        let inner = self.read()?;
        let identity = (normalize_key(title), normalize_key(artist));
        Ok(inner
            .by_identity
            .get(&identity)
            .and_then(|id| inner.songs.get(id))
            .map(|s| s.song.clone()))
    }

    fn list_songs(&self, limit: usize, offset: usize) -> Result<Vec<Song>, StoreError> {
        let inner = self.read()?;
        let mut songs: Vec<Song> = inner.songs.values().map(|s| s.song.clone()).collect();
        songs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(songs.into_iter().skip(offset).take(limit).collect())
    }

    fn song_fingerprints(&self, id: SongId) -> Result<Vec<Fingerprint>, StoreError> {
        Ok(self
            .read()?
            .songs
            .get(&id)
            .map(|s| s.fingerprints.clone())
            .unwrap_or_default())
    }

    fn fingerprint_count(&self, id: SongId) -> Result<usize, StoreError> {
        Ok(self
            .read()?
            .songs
            .get(&id)
            .map_or(0, |s| s.fingerprints.len()))
    }

    fn stats(&self) -> Result<IndexStats, StoreError> {
        let inner = self.read()?;
        Ok(IndexStats::new(inner.songs.len(), inner.total_fingerprints))
    }
}
