//! SQLite-backed fingerprint store.
//!
//! One writer connection serializes ingest and removal; lookups are spread
//! over a few reader connections, which WAL mode lets run alongside the
//! writer.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::budget::Budget;
use crate::config::MAX_STATEMENT_ROWS;
use crate::error::StoreError;
use crate::models::{normalize_key, Fingerprint, IndexStats, NewSong, Song, SongId};
use crate::storage::{unix_now, FingerprintStore, InsertOutcome, Posting, BUDGET_CHECK_INTERVAL};

const DEFAULT_READERS: usize = 4;
const DEFAULT_BATCH_ROWS: usize = 1_000;
const COLUMNS_PER_FINGERPRINT: usize = 6;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS songs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    artist TEXT NOT NULL,
    album TEXT,
    duration_seconds INTEGER,
    title_key TEXT NOT NULL,
    artist_key TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (title_key, artist_key)
);
CREATE TABLE IF NOT EXISTS fingerprints (
    song_id INTEGER NOT NULL REFERENCES songs(id) ON DELETE CASCADE,
    hash_value INTEGER NOT NULL,
    time_offset_ms INTEGER NOT NULL,
    anchor_frequency_hz REAL,
    target_frequency_hz REAL,
    time_delta_ms INTEGER
);
CREATE INDEX IF NOT EXISTS idx_fingerprints_hash ON fingerprints (hash_value);
CREATE INDEX IF NOT EXISTS idx_fingerprints_song ON fingerprints (song_id);
CREATE INDEX IF NOT EXISTS idx_songs_created ON songs (created_at);
";

const SONG_COLUMNS: &str = "id, title, artist, album, duration_seconds, created_at";

pub struct SqliteStore {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    batch_rows: usize,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with(path, DEFAULT_READERS, DEFAULT_BATCH_ROWS)
    }

    /// Opens (creating if needed) the database at `path` with `readers`
    /// lookup connections and at most `batch_rows` fingerprints per insert
    /// statement.
    pub fn open_with(path: &Path, readers: usize, batch_rows: usize) -> Result<Self, StoreError> {
        let writer = open_connection(path)?;
        writer.execute_batch(SCHEMA)?;
        let readers = (0..readers.max(1))
            .map(|_| {
                let conn = open_connection(path)?;
                conn.execute_batch("PRAGMA query_only = ON;")?;
                Ok(Mutex::new(conn))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        debug!(path = %path.display(), readers = readers.len(), "Opened SQLite store");
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
            batch_rows: batch_rows.clamp(1, MAX_STATEMENT_ROWS),
        })
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.writer.lock().map_err(|_| StoreError::Poisoned)
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[idx].lock().map_err(|_| StoreError::Poisoned)
    }
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys=ON;",
    )?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

fn song_from_row(row: &Row<'_>) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get(0)?,
        title: row.get(1)?,
        artist: row.get(2)?,
        album: row.get(3)?,
        duration_seconds: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn fingerprint_from_row(row: &Row<'_>) -> rusqlite::Result<Fingerprint> {
    Ok(Fingerprint {
        hash_value: row.get(0)?,
        time_offset_ms: row.get(1)?,
        anchor_frequency_hz: row.get::<_, Option<f64>>(2)?.map(|hz| hz as f32),
        target_frequency_hz: row.get::<_, Option<f64>>(3)?.map(|hz| hz as f32),
        time_delta_ms: row.get(4)?,
    })
}

fn insert_fingerprints(
    conn: &Connection,
    song_id: SongId,
    fingerprints: &[Fingerprint],
    batch_rows: usize,
) -> Result<(), StoreError> {
    for chunk in fingerprints.chunks(batch_rows) {
        let mut sql = String::from(
            "INSERT INTO fingerprints (song_id, hash_value, time_offset_ms, \
             anchor_frequency_hz, target_frequency_hz, time_delta_ms) VALUES ",
        );
        let mut values: Vec<Value> = Vec::with_capacity(chunk.len() * COLUMNS_PER_FINGERPRINT);
        for (idx, fp) in chunk.iter().enumerate() {
            if idx > 0 {
                sql.push_str(", ");
            }
            sql.push_str("(?, ?, ?, ?, ?, ?)");
            values.push(Value::from(song_id));
            values.push(Value::from(fp.hash_value));
            values.push(Value::from(fp.time_offset_ms));
            values.push(fp.anchor_frequency_hz.map_or(Value::Null, |hz| Value::from(hz as f64)));
            values.push(fp.target_frequency_hz.map_or(Value::Null, |hz| Value::from(hz as f64)));
            values.push(fp.time_delta_ms.map_or(Value::Null, Value::from));
        }
        conn.execute(&sql, params_from_iter(values))?;
    }
    Ok(())
}

impl FingerprintStore for SqliteStore {
    fn insert_song(
        &self,
        song: &NewSong,
        fingerprints: &[Fingerprint],
    ) -> Result<InsertOutcome, StoreError> {
        let (title_key, artist_key) = song.identity_key();
        let created_at = unix_now();
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;

        let inserted: Option<SongId> = tx
            .query_row(
                "INSERT INTO songs
                     (title, artist, album, duration_seconds, title_key, artist_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (title_key, artist_key) DO NOTHING
                 RETURNING id",
                params![
                    song.title,
                    song.artist,
                    song.album,
                    song.duration_seconds,
                    title_key,
                    artist_key,
                    created_at
                ],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = inserted else {
            let existing: SongId = tx.query_row(
                "SELECT id FROM songs WHERE title_key = ?1 AND artist_key = ?2",
                params![title_key, artist_key],
                |row| row.get(0),
            )?;
            return Ok(InsertOutcome::Duplicate(existing));
        };

        insert_fingerprints(&tx, id, fingerprints, self.batch_rows)?;
        tx.commit()?;
        debug!(song_id = id, fingerprints = fingerprints.len(), "Stored song");

        Ok(InsertOutcome::Inserted(Song {
            id,
            title: song.title.clone(),
            artist: song.artist.clone(),
            album: song.album.clone(),
            duration_seconds: song.duration_seconds,
            created_at,
        }))
    }

    fn lookup(&self, hashes: &[u32], budget: &Budget) -> Result<Vec<Posting>, StoreError> {
        budget.check()?;
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; hashes.len()].join(", ");
        let sql = format!(
            "SELECT song_id, hash_value, time_offset_ms FROM fingerprints \
             WHERE hash_value IN ({placeholders})"
        );

        let conn = self.reader()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(hashes.iter()))?;
        let mut postings = Vec::new();
        while let Some(row) = rows.next()? {
            postings.push(Posting {
                song_id: row.get(0)?,
                hash_value: row.get(1)?,
                time_offset_ms: row.get(2)?,
            });
            if postings.len() % BUDGET_CHECK_INTERVAL == 0 {
                budget.check()?;
            }
        }
        Ok(postings)
    }

    fn remove_song(&self, id: SongId) -> Result<bool, StoreError> {
        let conn = self.writer()?;
        let removed = conn.execute("DELETE FROM songs WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn song(&self, id: SongId) -> Result<Option<Song>, StoreError> {
        let conn = self.reader()?;
        let song = conn
            .query_row(
                &format!("SELECT {SONG_COLUMNS} FROM songs WHERE id = ?1"),
                params![id],
                song_from_row,
            )
            .optional()?;
        Ok(song)
    }

    fn find_song(&self, title: &str, artist: &str) -> Result<Option<Song>, StoreError> {
        let conn = self.reader()?;
        let song = conn
            .query_row(
                &format!(
                    "SELECT {SONG_COLUMNS} FROM songs WHERE title_key = ?1 AND artist_key = ?2"
                ),
                params![normalize_key(title), normalize_key(artist)],
                song_from_row,
            )
            .optional()?;
        Ok(song)
    }

    fn list_songs(&self, limit: usize, offset: usize) -> Result<Vec<Song>, StoreError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SONG_COLUMNS} FROM songs ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let songs = stmt
            .query_map(params![limit as i64, offset as i64], song_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(songs)
    }

    fn song_fingerprints(&self, id: SongId) -> Result<Vec<Fingerprint>, StoreError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT hash_value, time_offset_ms, anchor_frequency_hz, target_frequency_hz,
                    time_delta_ms
             FROM fingerprints WHERE song_id = ?1 ORDER BY rowid",
        )?;
        let fingerprints = stmt
            .query_map(params![id], fingerprint_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(fingerprints)
    }

    fn fingerprint_count(&self, id: SongId) -> Result<usize, StoreError> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM fingerprints WHERE song_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative count {count}")))
    }

    fn stats(&self) -> Result<IndexStats, StoreError> {
        let conn = self.reader()?;
        let (songs, fingerprints): (i64, i64) = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM songs), (SELECT COUNT(*) FROM fingerprints)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(IndexStats::new(songs.max(0) as usize, fingerprints.max(0) as usize))
    }
}
