//! Constellation extraction: locally dominant spectrogram cells.

use std::cmp::Ordering;

use tracing::debug;

use crate::config::PeakConfig;
use crate::error::ValidationError;
use crate::models::Peak;
use crate::spectrogram::Spectrogram;

/// Level assigned to zero-magnitude cells; below every real level.
const SILENT_LEVEL: i32 = i32::MIN;

#[derive(Debug, Clone)]
pub struct PeakDetector {
    config: PeakConfig,
}

impl PeakDetector {
    pub fn new(config: PeakConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PeakConfig {
        &self.config
    }

    /// Peaks ordered by frame, then magnitude descending, then bin.
    pub fn detect(&self, spec: &Spectrogram) -> Vec<Peak> {
        let frames = spec.frames();
        let bins = spec.bins();
        if frames == 0 || bins < 3 {
            return Vec::new();
        }
        let cfg = &self.config;

        let levels: Vec<i32> = (0..frames)
            .flat_map(|t| spec.frame(t).iter().map(|&m| self.level(m)))
            .collect();
        let dominant = neighbourhood_max(
            &levels,
            frames,
            bins,
            cfg.neighborhood_frames,
            cfg.neighborhood_bins,
        );
        let sums = SummedArea::new(spec);
        let floors = dynamic_range_floors(spec, cfg.threshold_region, cfg.dynamic_range_db);
        let boost = 1.0 + cfg.adaptive_factor as f64;

        let mut peaks = Vec::new();
        let mut frame_peaks = Vec::new();
        for t in 0..frames {
            frame_peaks.clear();
            let row = spec.frame(t);
            // Bin 0 (DC) and the Nyquist bin never carry landmarks.
            for f in 1..bins - 1 {
                let magnitude = row[f];
                if magnitude < cfg.min_magnitude || magnitude < floors[t] {
                    continue;
                }
                if levels[t * bins + f] < dominant[t * bins + f] {
                    continue;
                }
                let mean = sums.mean(t, f, cfg.threshold_region);
                if (magnitude as f64) < mean * boost {
                    continue;
                }
                frame_peaks.push(Peak { frame: t, bin: f, magnitude });
            }
            frame_peaks.sort_by(|a, b| {
                b.magnitude
                    .partial_cmp(&a.magnitude)
                    .unwrap_or(Ordering::Equal)
                    .then(a.bin.cmp(&b.bin))
            });
            frame_peaks.truncate(cfg.max_peaks_per_frame);
            peaks.extend_from_slice(&frame_peaks);
        }
        debug!(frames, peaks = peaks.len(), "Detected peaks");
        peaks
    }

    fn level(&self, magnitude: f32) -> i32 {
        if magnitude > 0.0 {
            (20.0 * (magnitude as f64).log10() / self.config.level_step_db as f64).floor() as i32
        } else {
            SILENT_LEVEL
        }
    }
}

/// Max over a clipped `(2*rt+1) x (2*rb+1)` window, done as two 1-D passes.
fn neighbourhood_max(levels: &[i32], frames: usize, bins: usize, rt: usize, rb: usize) -> Vec<i32> {
    let mut across_bins = vec![SILENT_LEVEL; levels.len()];
    for t in 0..frames {
        let row = &levels[t * bins..(t + 1) * bins];
        for f in 0..bins {
            let lo = f.saturating_sub(rb);
            let hi = (f + rb + 1).min(bins);
            across_bins[t * bins + f] = row[lo..hi].iter().copied().max().unwrap_or(SILENT_LEVEL);
        }
    }
    let mut out = vec![SILENT_LEVEL; levels.len()];
    for t in 0..frames {
        let lo = t.saturating_sub(rt);
        let hi = (t + rt + 1).min(frames);
        for f in 0..bins {
            out[t * bins + f] = (lo..hi)
                .map(|u| across_bins[u * bins + f])
                .max()
                .unwrap_or(SILENT_LEVEL);
        }
    }
    out
}

/// Per-frame magnitude floor `dynamic_range_db` below the loudest cell of
/// the frames within `region`.
fn dynamic_range_floors(spec: &Spectrogram, region: usize, range_db: f32) -> Vec<f32> {
    let frame_max: Vec<f32> = (0..spec.frames())
        .map(|t| spec.frame(t).iter().copied().fold(0.0_f32, f32::max))
        .collect();
    let ratio = 10f32.powf(-range_db / 20.0);
    (0..frame_max.len())
        .map(|t| {
            let lo = t.saturating_sub(region);
            let hi = (t + region + 1).min(frame_max.len());
            frame_max[lo..hi].iter().copied().fold(0.0_f32, f32::max) * ratio
        })
        .collect()
}

/// Summed-area table over magnitudes for O(1) regional means.
struct SummedArea {
    table: Vec<f64>,
    frames: usize,
    bins: usize,
}

impl SummedArea {
    fn new(spec: &Spectrogram) -> Self {
        let (frames, bins) = (spec.frames(), spec.bins());
        let stride = bins + 1;
        let mut table = vec![0.0_f64; (frames + 1) * stride];
        for t in 0..frames {
            let row = spec.frame(t);
            let mut running = 0.0_f64;
            for f in 0..bins {
                running += row[f] as f64;
                table[(t + 1) * stride + f + 1] = table[t * stride + f + 1] + running;
            }
        }
        Self { table, frames, bins }
    }

    fn mean(&self, t: usize, f: usize, region: usize) -> f64 {
        let stride = self.bins + 1;
        let t0 = t.saturating_sub(region);
        let t1 = (t + region + 1).min(self.frames);
        let f0 = f.saturating_sub(region);
        let f1 = (f + region + 1).min(self.bins);
        let sum = self.table[t1 * stride + f1]
            - self.table[t0 * stride + f1]
            - self.table[t1 * stride + f0]
            + self.table[t0 * stride + f0];
        sum / ((t1 - t0) * (f1 - f0)) as f64
    }
}
