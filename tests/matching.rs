mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use songprint::config::MatchingConfig;
use songprint::storage::InsertOutcome;
use songprint::{
    AudioFingerprinter, Budget, CancelFlag, EngineConfig, Fingerprint, FingerprintIndex,
    FingerprintStore, IndexError, IndexStats, MemoryStore, NewSong, Posting, Song, SongId,
    SqliteStore, StoreError,
};
use support::*;

fn fingerprints(samples: Vec<f32>) -> Vec<Fingerprint> {
    AudioFingerprinter::new(&EngineConfig::default())
        .unwrap()
        .generate(&buffer(samples))
        .unwrap()
}

fn memory_index() -> FingerprintIndex {
    FingerprintIndex::new(Arc::new(MemoryStore::new()), MatchingConfig::default())
}

fn ingest(index: &FingerprintIndex, title: &str, fps: &[Fingerprint]) -> SongId {
    index
        .ingest(&NewSong::new(title, "Test Artist"), fps, false)
        .unwrap()
        .expect("new song")
        .song
        .id
}

#[test]
fn full_tone_identifies_itself() {
    let index = memory_index();
    let fps = fingerprints(tone(440.0, 30.0, 0.8));
    let id = ingest(&index, "A440", &fps);

    let result = index.query(&fps, 5).unwrap().expect("match");
    assert_eq!(result.song_id, id);
    assert!(result.match_count >= 5);
    assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    assert!(result.time_offset_ms <= 100, "offset {}", result.time_offset_ms);
}

#[test]
fn quiet_copy_still_matches() {
    let index = memory_index();
    let samples = tone(440.0, 30.0, 0.8);
    let id = ingest(&index, "A440", &fingerprints(samples.clone()));

    let quiet = fingerprints(scaled(&samples, 0.1));
    let result = index.query(&quiet, 5).unwrap().expect("match");
    assert_eq!(result.song_id, id);
}

#[test]
fn noise_does_not_match_tones() {
    let index = memory_index();
    ingest(&index, "A440", &fingerprints(tone(440.0, 20.0, 0.8)));
    ingest(&index, "C523", &fingerprints(tone(523.0, 20.0, 0.8)));

    let query = fingerprints(noise(10.0, 42, 0.8));
    assert!(!query.is_empty());
    assert_eq!(index.query(&query, 5).unwrap(), None);
}

#[test]
fn noise_does_not_match_melodic_index() {
    let index = memory_index();
    ingest(&index, "Melody", &fingerprints(melody(30.0, 0.8)));
    ingest(&index, "A440", &fingerprints(tone(440.0, 30.0, 0.8)));

    for seed in 0..20 {
        let query = fingerprints(noise(10.0, seed, 0.8));
        assert!(!query.is_empty());
        let result = index.query(&query, 5).unwrap();
        assert_eq!(result, None, "noise seed {seed} matched");
    }
}

#[test]
fn capped_self_query_reports_partial_confidence() {
    let index = memory_index();
    let fps = fingerprints(melody(60.0, 0.8));
    let cap = MatchingConfig::default().max_query_fingerprints;
    assert!(fps.len() > cap);
    let id = ingest(&index, "Melody", &fps);

    let result = index.query(&fps, 5).unwrap().expect("match");
    assert_eq!(result.song_id, id);
    assert!(result.match_count <= cap);
    assert!(result.confidence < 1.0, "confidence {}", result.confidence);
}

#[test]
fn excerpt_reports_its_position() {
    let index = memory_index();
    let reference = melody(30.0, 0.8);
    ingest(&index, "A440", &fingerprints(tone(440.0, 20.0, 0.8)));
    let id = ingest(&index, "Melody", &fingerprints(reference.clone()));

    let clip = scaled(&excerpt(&reference, 8.0, 13.0), 0.5);
    let result = index.query(&fingerprints(clip), 5).unwrap().expect("match");
    assert_eq!(result.song_id, id);
    assert!(
        result.time_offset_ms.abs_diff(8_000) <= 300,
        "offset {}",
        result.time_offset_ms
    );
}

#[test]
fn empty_query_matches_nothing() {
    let index = memory_index();
    ingest(&index, "A440", &fingerprints(tone(440.0, 5.0, 0.8)));
    assert_eq!(index.query(&[], 5).unwrap(), None);
}

#[test]
fn duplicates_are_skipped_or_refused() {
    let index = memory_index();
    let fps = fingerprints(tone(440.0, 5.0, 0.8));
    let id = ingest(&index, "Same Song", &fps);

    let skipped = index
        .ingest(&NewSong::new("  same SONG ", "test artist"), &fps, true)
        .unwrap();
    assert!(skipped.is_none());

    match index.ingest(&NewSong::new("Same Song", "Test Artist"), &fps, false) {
        Err(IndexError::DuplicateSong { existing, .. }) => assert_eq!(existing, id),
        other => panic!("expected duplicate error, got {other:?}"),
    }
    assert_eq!(index.stats().unwrap().total_songs, 1);
    assert_eq!(index.stats().unwrap().total_fingerprints, fps.len());
}

#[test]
fn removal_takes_fingerprints_along() {
    let index = memory_index();
    let tone_fps = fingerprints(tone(440.0, 10.0, 0.8));
    let melody_fps = fingerprints(melody(10.0, 0.8));
    let tone_id = ingest(&index, "A440", &tone_fps);
    let melody_id = ingest(&index, "Melody", &melody_fps);

    assert!(index.remove(tone_id).unwrap());
    assert!(!index.remove(tone_id).unwrap());
    assert_eq!(index.song(tone_id).unwrap(), None);
    assert_eq!(index.store().fingerprint_count(tone_id).unwrap(), 0);
    assert_eq!(index.query(&tone_fps, 5).unwrap(), None);

    let stats = index.stats().unwrap();
    assert_eq!(stats.total_songs, 1);
    assert_eq!(stats.total_fingerprints, melody_fps.len());
    assert_eq!(
        index.query(&melody_fps, 5).unwrap().map(|m| m.song_id),
        Some(melody_id)
    );
}

/// Returns lookup results in a different order on every call.
struct ShuffledStore {
    inner: MemoryStore,
    rng: Mutex<StdRng>,
}

impl ShuffledStore {
    fn new(seed: u64) -> Self {
        Self {
            inner: MemoryStore::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl FingerprintStore for ShuffledStore {
    fn insert_song(
        &self,
        song: &NewSong,
        fingerprints: &[Fingerprint],
    ) -> Result<InsertOutcome, StoreError> {
        self.inner.insert_song(song, fingerprints)
    }

    fn lookup(&self, hashes: &[u32], budget: &Budget) -> Result<Vec<Posting>, StoreError> {
        let mut postings = self.inner.lookup(hashes, budget)?;
        postings.shuffle(&mut *self.rng.lock().unwrap());
        Ok(postings)
    }

    fn remove_song(&self, id: SongId) -> Result<bool, StoreError> {
        self.inner.remove_song(id)
    }

    fn song(&self, id: SongId) -> Result<Option<Song>, StoreError> {
        self.inner.song(id)
    }

    fn find_song(&self, title: &str, artist: &str) -> Result<Option<Song>, StoreError> {
        self.inner.find_song(title, artist)
    }

    fn list_songs(&self, limit: usize, offset: usize) -> Result<Vec<Song>, StoreError> {
        self.inner.list_songs(limit, offset)
    }

    fn song_fingerprints(&self, id: SongId) -> Result<Vec<Fingerprint>, StoreError> {
        self.inner.song_fingerprints(id)
    }

    fn fingerprint_count(&self, id: SongId) -> Result<usize, StoreError> {
        self.inner.fingerprint_count(id)
    }

    fn stats(&self) -> Result<IndexStats, StoreError> {
        self.inner.stats()
    }
}

#[test]
fn result_does_not_depend_on_lookup_order() {
    let ordered = memory_index();
    let shuffled =
        FingerprintIndex::new(Arc::new(ShuffledStore::new(9)), MatchingConfig::default());
    let reference = melody(20.0, 0.8);
    for index in [&ordered, &shuffled] {
        ingest(index, "Melody", &fingerprints(reference.clone()));
        ingest(index, "A440", &fingerprints(tone(440.0, 20.0, 0.8)));
    }

    let query = fingerprints(scaled(&excerpt(&reference, 4.0, 9.0), 0.7));
    let expected = ordered.query(&query, 5).unwrap();
    assert!(expected.is_some());
    for _ in 0..5 {
        assert_eq!(shuffled.query(&query, 5).unwrap(), expected);
    }
}

#[test]
fn query_respects_budget() {
    let index = memory_index();
    let fps = fingerprints(tone(440.0, 10.0, 0.8));
    ingest(&index, "A440", &fps);

    let expired = Budget::new(Duration::ZERO);
    assert!(matches!(
        index.query_with_budget(&fps, 5, &expired),
        Err(IndexError::TimedOut)
    ));

    let flag = CancelFlag::new();
    flag.cancel();
    let cancelled = Budget::unbounded().with_cancel(flag);
    assert!(matches!(
        index.query_with_budget(&fps, 5, &cancelled),
        Err(IndexError::Cancelled)
    ));

    let short = index.clone().with_query_timeout(Duration::ZERO);
    assert!(matches!(short.query(&fps, 5), Err(IndexError::TimedOut)));
}

#[test]
fn sqlite_index_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.db");
    let reference = melody(20.0, 0.8);
    let reference_fps = fingerprints(reference.clone());

    let id = {
        let store = SqliteStore::open(&path).unwrap();
        let index = FingerprintIndex::new(Arc::new(store), MatchingConfig::default());
        ingest(&index, "A440", &fingerprints(tone(440.0, 10.0, 0.8)));
        ingest(&index, "Melody", &reference_fps)
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let index = FingerprintIndex::new(store.clone(), MatchingConfig::default());
    let song = index.song(id).unwrap().expect("persisted song");
    assert_eq!(song.title, "Melody");
    assert_eq!(
        index.find_song("MELODY", " test artist").unwrap().map(|s| s.id),
        Some(id)
    );

    // Stored fingerprints come back verbatim, landmark details included.
    let mut stored = store.song_fingerprints(id).unwrap();
    let mut expected = reference_fps.clone();
    let key = |f: &Fingerprint| (f.time_offset_ms, f.hash_value);
    stored.sort_by_key(key);
    expected.sort_by_key(key);
    assert_eq!(stored, expected);

    let clip = fingerprints(excerpt(&reference, 6.0, 11.0));
    let result = index.query(&clip, 5).unwrap().expect("match");
    assert_eq!(result.song_id, id);
    assert!(result.time_offset_ms.abs_diff(6_000) <= 300);

    let listed: Vec<String> = index
        .list_songs(10, 0)
        .unwrap()
        .into_iter()
        .map(|s| s.title)
        .collect();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&"Melody".to_string()));

    assert!(index.remove(id).unwrap());
    assert_eq!(store.fingerprint_count(id).unwrap(), 0);
    assert_eq!(index.stats().unwrap().total_songs, 1);
}
