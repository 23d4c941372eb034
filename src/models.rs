use serde::{Deserialize, Serialize};

use crate::error::{IndexError, ValidationError};

/// Database identifier of a reference song.
pub type SongId = i64;

/// Decoded PCM audio, interleaved when stereo, samples in [-1.0, 1.0].
///
/// Construction validates the buffer, so every `AudioBuffer` in the system is
/// non-empty, has a positive sample rate, one or two channels and a whole
/// number of frames.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    pub fn new(
        samples: Vec<f32>,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, ValidationError> {
        if samples.is_empty() {
            return Err(ValidationError::EmptyBuffer);
        }
        if sample_rate == 0 {
            return Err(ValidationError::InvalidSampleRate(sample_rate));
        }
        if !(1..=2).contains(&channels) {
            return Err(ValidationError::UnsupportedChannels(channels));
        }
        if samples.len() % channels as usize != 0 {
            return Err(ValidationError::RaggedFrames {
                len: samples.len(),
                channels,
            });
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self, ValidationError> {
        Self::new(samples, sample_rate, 1)
    }

    /// Narrows double-precision samples; equal sample values give equal buffers.
    pub fn from_f64(
        samples: &[f64],
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, ValidationError> {
        Self::new(
            samples.iter().map(|&s| s as f32).collect(),
            sample_rate,
            channels,
        )
    }

    pub fn from_i16(
        samples: &[i16],
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, ValidationError> {
        Self::new(
            samples.iter().map(|&s| s as f32 / 32768.0).collect(),
            sample_rate,
            channels,
        )
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// A locally dominant spectrogram cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub frame: usize,
    pub bin: usize,
    pub magnitude: f32,
}

/// One landmark hash with its position in the source audio.
///
/// The frequency and delta fields are diagnostic; matching only uses
/// `hash_value` and `time_offset_ms`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Fingerprint {
    pub hash_value: u32,
    pub time_offset_ms: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_frequency_hz: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_frequency_hz: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_delta_ms: Option<u32>,
}

impl Fingerprint {
    pub fn new(hash_value: u32, time_offset_ms: u32) -> Self {
        Self {
            hash_value,
            time_offset_ms,
            anchor_frequency_hz: None,
            target_frequency_hz: None,
            time_delta_ms: None,
        }
    }

    pub fn with_landmark(mut self, anchor_hz: f32, target_hz: f32, time_delta_ms: u32) -> Self {
        self.anchor_frequency_hz = Some(anchor_hz);
        self.target_frequency_hz = Some(target_hz);
        self.time_delta_ms = Some(time_delta_ms);
        self
    }
}

/// Identity of a song about to be ingested.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NewSong {
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
}

impl NewSong {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            album: None,
            duration_seconds: None,
        }
    }

    pub fn album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn duration_seconds(mut self, seconds: u32) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.title.trim().is_empty() {
            return Err(IndexError::InvalidSong("song title cannot be empty".into()));
        }
        if self.artist.trim().is_empty() {
            return Err(IndexError::InvalidSong("artist name cannot be empty".into()));
        }
        if self.duration_seconds == Some(0) {
            return Err(IndexError::InvalidSong("duration must be positive".into()));
        }
        Ok(())
    }

    /// The (title, artist) pair uniqueness is enforced on.
    pub fn identity_key(&self) -> (String, String) {
        (normalize_key(&self.title), normalize_key(&self.artist))
    }
}

/// Case-folds and collapses whitespace so "The  Song " and "the song" collide.
pub fn normalize_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A stored reference song.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_seconds: Option<u32>,
    /// Unix seconds.
    pub created_at: i64,
}

/// A song plus how many postings it owns.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SongMetadata {
    pub song: Song,
    pub fingerprint_count: usize,
}

/// Aggregate index counters.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IndexStats {
    pub total_songs: usize,
    pub total_fingerprints: usize,
    pub avg_fingerprints_per_song: f64,
}

impl IndexStats {
    pub fn new(total_songs: usize, total_fingerprints: usize) -> Self {
        let avg_fingerprints_per_song = if total_songs > 0 {
            total_fingerprints as f64 / total_songs as f64
        } else {
            0.0
        };
        Self {
            total_songs,
            total_fingerprints,
            avg_fingerprints_per_song,
        }
    }
}

/// Best-guess identification of a query.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MatchResult {
    pub song_id: SongId,
    /// In [0, 1].
    pub confidence: f64,
    pub match_count: usize,
    /// Where in the reference song the query starts.
    pub time_offset_ms: u32,
}

/// Fingerprints of one buffer plus what they were computed from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FingerprintSet {
    pub fingerprints: Vec<Fingerprint>,
    pub metadata: FingerprintSetMetadata,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FingerprintSetMetadata {
    pub duration: f64,
    pub sample_rate: u32,
    pub fingerprint_count: usize,
}

impl FingerprintSet {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
