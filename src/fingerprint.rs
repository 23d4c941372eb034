use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audio::AudioPreprocessor;
use crate::config::EngineConfig;
use crate::error::{FingerprintError, ValidationError};
use crate::hashing::LandmarkHasher;
use crate::models::{AudioBuffer, Fingerprint, FingerprintSet, FingerprintSetMetadata, Peak};
use crate::peaks::PeakDetector;
use crate::spectrogram::SpectrogramComputer;

/// Fingerprints per second outside this band usually mean a broken input
/// or a mistuned detector.
const DENSITY_BAND: (f64, f64) = (1.0, 1_000.0);

/// The full spectral pipeline: preprocess, spectrogram, peaks, hashes.
///
/// Stateless after construction and safe to share between threads; the same
/// buffer always yields the same ordered fingerprints.
#[derive(Debug)]
pub struct AudioFingerprinter {
    preprocessor: AudioPreprocessor,
    spectrogram: SpectrogramComputer,
    detector: PeakDetector,
    hasher: LandmarkHasher,
}

impl AudioFingerprinter {
    pub fn new(config: &EngineConfig) -> Result<Self, ValidationError> {
        let preprocessor = AudioPreprocessor::new(config.audio.clone())?;
        let spectrogram = SpectrogramComputer::new(config.spectrogram.clone())?;
        let detector = PeakDetector::new(config.peaks.clone())?;
        let hasher = LandmarkHasher::new(
            config.hashing.clone(),
            config.audio.target_sample_rate,
            config.spectrogram.transform_size,
            config.spectrogram.hop_size,
        )?;
        Ok(Self {
            preprocessor,
            spectrogram,
            detector,
            hasher,
        })
    }

    /// Peaks of the canonical form of `buffer`.
    pub fn constellation(&self, buffer: &AudioBuffer) -> Result<Vec<Peak>, FingerprintError> {
        let canonical = self.preprocessor.process(buffer)?;
        let spec = self
            .spectrogram
            .compute(canonical.samples(), canonical.sample_rate())?;
        Ok(self.detector.detect(&spec))
    }

    pub fn generate(&self, buffer: &AudioBuffer) -> Result<Vec<Fingerprint>, FingerprintError> {
        let peaks = self.constellation(buffer)?;
        let fingerprints = self.hasher.hash(&peaks);
        check_density(fingerprints.len(), buffer.duration_secs());
        debug!(
            duration = buffer.duration_secs(),
            peaks = peaks.len(),
            fingerprints = fingerprints.len(),
            "Generated fingerprints"
        );
        Ok(fingerprints)
    }

    /// Fingerprints plus the source description, ready for JSON export.
    pub fn generate_set(&self, buffer: &AudioBuffer) -> Result<FingerprintSet, FingerprintError> {
        let fingerprints = self.generate(buffer)?;
        Ok(FingerprintSet {
            metadata: FingerprintSetMetadata {
                duration: buffer.duration_secs(),
                sample_rate: buffer.sample_rate(),
                fingerprint_count: fingerprints.len(),
            },
            fingerprints,
        })
    }
}

fn check_density(count: usize, duration_secs: f64) {
    // Too short to say anything about density.
    if duration_secs < 1.0 {
        return;
    }
    let density = count as f64 / duration_secs;
    if density <= DENSITY_BAND.0 || density >= DENSITY_BAND.1 {
        warn!(
            density,
            count, duration_secs, "Fingerprint density outside the expected band"
        );
    }
}

/// Summary of a fingerprint stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FingerprintStats {
    pub count: usize,
    pub unique_hashes: usize,
    /// Distance between the first and last anchor.
    pub time_span_ms: u32,
    pub min_frequency_hz: Option<f32>,
    pub max_frequency_hz: Option<f32>,
    /// Fingerprints per second of span; 0 when the span is empty.
    pub density_per_sec: f64,
}

impl FingerprintStats {
    pub fn from_fingerprints(fingerprints: &[Fingerprint]) -> Self {
        let mut hashes: Vec<u32> = fingerprints.iter().map(|f| f.hash_value).collect();
        hashes.sort_unstable();
        hashes.dedup();

        let first = fingerprints.iter().map(|f| f.time_offset_ms).min().unwrap_or(0);
        let last = fingerprints.iter().map(|f| f.time_offset_ms).max().unwrap_or(0);
        let time_span_ms = last - first;

        let frequencies = fingerprints
            .iter()
            .flat_map(|f| [f.anchor_frequency_hz, f.target_frequency_hz])
            .flatten();
        let (min_frequency_hz, max_frequency_hz) =
            frequencies.fold((None, None), |(lo, hi): (Option<f32>, Option<f32>), hz| {
                (
                    Some(lo.map_or(hz, |v| v.min(hz))),
                    Some(hi.map_or(hz, |v| v.max(hz))),
                )
            });

        let density_per_sec = if time_span_ms > 0 {
            fingerprints.len() as f64 * 1_000.0 / time_span_ms as f64
        } else {
            0.0
        };

        Self {
            count: fingerprints.len(),
            unique_hashes: hashes.len(),
            time_span_ms,
            min_frequency_hz,
            max_frequency_hz,
            density_per_sec,
        }
    }
}
