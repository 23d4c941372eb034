//! Pairs constellation peaks into 32-bit landmark hashes.
//!
//! Layout, most significant bit first:
//!
//! ```text
//! | anchor bin (11) | target bin (11) | frame delta (10) |
//! ```

use std::borrow::Cow;

use tracing::debug;

use crate::config::HashConfig;
use crate::error::ValidationError;
use crate::models::{Fingerprint, Peak};
use crate::spectrogram::{bin_to_hz, frame_to_ms};

const FREQ_BITS: u32 = 11;
const DELTA_BITS: u32 = 10;
const FREQ_MASK: u32 = (1 << FREQ_BITS) - 1;
const DELTA_MASK: u32 = (1 << DELTA_BITS) - 1;

/// The quantized fields a landmark hash is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LandmarkKey {
    pub anchor: u32,
    pub target: u32,
    pub delta_frames: u32,
}

impl LandmarkKey {
    pub fn pack(self) -> u32 {
        (self.anchor & FREQ_MASK) << (FREQ_BITS + DELTA_BITS)
            | (self.target & FREQ_MASK) << DELTA_BITS
            | (self.delta_frames & DELTA_MASK)
    }

    pub fn unpack(hash: u32) -> Self {
        Self {
            anchor: (hash >> (FREQ_BITS + DELTA_BITS)) & FREQ_MASK,
            target: (hash >> DELTA_BITS) & FREQ_MASK,
            delta_frames: hash & DELTA_MASK,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LandmarkHasher {
    config: HashConfig,
    sample_rate: u32,
    transform_size: usize,
    hop_size: usize,
    max_delta_frames: usize,
    max_delta_bins: usize,
}

impl LandmarkHasher {
    /// Builds a hasher for spectrograms of the given geometry, rejecting
    /// settings whose fields would not fit the hash layout.
    pub fn new(
        config: HashConfig,
        sample_rate: u32,
        transform_size: usize,
        hop_size: usize,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        if sample_rate == 0 {
            return Err(ValidationError::InvalidSampleRate(0));
        }
        if hop_size == 0 || transform_size == 0 {
            return Err(ValidationError::HopSize {
                hop_size,
                transform_size,
            });
        }

        let max_delta_frames = (config.max_time_delta_ms as u64 * sample_rate as u64
            / (hop_size as u64 * 1_000)) as usize;
        let max_delta_bins =
            (config.max_freq_delta_hz as f64 * transform_size as f64 / sample_rate as f64) as usize;

        if max_delta_frames < config.min_time_delta_frames {
            return Err(ValidationError::Config(format!(
                "hashing.max_time_delta_ms spans {max_delta_frames} frames, \
                 below the minimum of {}",
                config.min_time_delta_frames
            )));
        }
        if max_delta_frames > DELTA_MASK as usize {
            return Err(ValidationError::Config(format!(
                "hashing.max_time_delta_ms spans {max_delta_frames} frames; \
                 at most {DELTA_MASK} fit"
            )));
        }
        let top_bin = (transform_size / 2) / config.freq_quantum_bins;
        if top_bin > FREQ_MASK as usize {
            return Err(ValidationError::Config(format!(
                "{} bins per frame need a freq_quantum_bins of at least {}",
                transform_size / 2 + 1,
                transform_size / 2 / (FREQ_MASK as usize + 1) + 1
            )));
        }

        Ok(Self {
            config,
            sample_rate,
            transform_size,
            hop_size,
            max_delta_frames,
            max_delta_bins,
        })
    }

    pub fn max_delta_frames(&self) -> usize {
        self.max_delta_frames
    }

    pub fn max_delta_bins(&self) -> usize {
        self.max_delta_bins
    }

    pub fn key(&self, anchor: &Peak, target: &Peak) -> LandmarkKey {
        let q = self.config.freq_quantum_bins;
        LandmarkKey {
            anchor: (anchor.bin / q) as u32,
            target: (target.bin / q) as u32,
            delta_frames: target.frame.saturating_sub(anchor.frame) as u32,
        }
    }

    /// Fingerprints for `peaks`, paired forward in time.
    ///
    /// Peaks out of frame order are stably sorted by frame first.
    pub fn hash(&self, peaks: &[Peak]) -> Vec<Fingerprint> {
        let peaks: Cow<'_, [Peak]> = if peaks.windows(2).all(|w| w[0].frame <= w[1].frame) {
            Cow::Borrowed(peaks)
        } else {
            let mut sorted = peaks.to_vec();
            sorted.sort_by_key(|p| p.frame);
            Cow::Owned(sorted)
        };
        let mut fingerprints = Vec::with_capacity(peaks.len() * self.config.fan_out);
        for (i, anchor) in peaks.iter().enumerate() {
            let mut paired = 0;
            for target in &peaks[i + 1..] {
                let delta = target.frame - anchor.frame;
                if delta > self.max_delta_frames {
                    break;
                }
                if delta < self.config.min_time_delta_frames
                    || anchor.bin.abs_diff(target.bin) > self.max_delta_bins
                {
                    continue;
                }
                fingerprints.push(self.fingerprint(anchor, target));
                paired += 1;
                if paired == self.config.fan_out {
                    break;
                }
            }
        }
        debug!(
            peaks = peaks.len(),
            fingerprints = fingerprints.len(),
            "Hashed landmarks"
        );
        fingerprints
    }

    fn fingerprint(&self, anchor: &Peak, target: &Peak) -> Fingerprint {
        let hash = self.key(anchor, target).pack();
        let delta = target.frame.saturating_sub(anchor.frame);
        Fingerprint::new(hash, frame_to_ms(anchor.frame, self.hop_size, self.sample_rate))
            .with_landmark(
                bin_to_hz(anchor.bin, self.sample_rate, self.transform_size),
                bin_to_hz(target.bin, self.sample_rate, self.transform_size),
                frame_to_ms(delta, self.hop_size, self.sample_rate),
            )
    }
}
