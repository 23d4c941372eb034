//! Short-time magnitude spectra.

use std::f64::consts::PI;
use std::fmt;
#[cfg(feature = "rustfft")]
use std::sync::Arc;

#[cfg(feature = "rustfft")]
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use tracing::debug;

use crate::config::{SpectrogramConfig, TransformBackend};
use crate::error::{FingerprintError, ValidationError};

/// A real-input transform returning magnitudes for bins `0..=n/2`.
pub trait Transform: Send + Sync {
    fn size(&self) -> usize;

    fn magnitudes(&self, windowed: &[f32]) -> Vec<f32>;
}

#[cfg(feature = "rustfft")]
pub struct FftTransform {
    fft: Arc<dyn Fft<f32>>,
}

#[cfg(feature = "rustfft")]
impl FftTransform {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(size),
        }
    }
}

#[cfg(feature = "rustfft")]
impl Transform for FftTransform {
    fn size(&self) -> usize {
        self.fft.len()
    }

    fn magnitudes(&self, windowed: &[f32]) -> Vec<f32> {
        let mut buffer: Vec<Complex<f32>> =
            windowed.iter().map(|&x| Complex::new(x, 0.0)).collect();
        self.fft.process(&mut buffer);
        buffer
            .iter()
            .take(self.size() / 2 + 1)
            .map(|c| c.norm())
            .collect()
    }
}

/// Plain DFT from a precomputed twiddle table. Quadratic; intended for
/// builds without `rustfft` and for cross-checking it.
pub struct DirectTransform {
    size: usize,
    cos: Vec<f64>,
    sin: Vec<f64>,
}

impl DirectTransform {
    pub fn new(size: usize) -> Self {
        let (cos, sin) = (0..size)
            .map(|k| {
                let angle = 2.0 * PI * k as f64 / size as f64;
                (angle.cos(), angle.sin())
            })
            .unzip();
        Self { size, cos, sin }
    }
}

impl Transform for DirectTransform {
    fn size(&self) -> usize {
        self.size
    }

    fn magnitudes(&self, windowed: &[f32]) -> Vec<f32> {
        let n = self.size;
        (0..=n / 2)
            .map(|k| {
                let (mut re, mut im) = (0.0_f64, 0.0_f64);
                for (i, &x) in windowed.iter().enumerate() {
                    let idx = (k * i) % n;
                    re += x as f64 * self.cos[idx];
                    im -= x as f64 * self.sin[idx];
                }
                (re * re + im * im).sqrt() as f32
            })
            .collect()
    }
}

fn build_transform(backend: TransformBackend, size: usize) -> Box<dyn Transform> {
    match backend {
        #[cfg(feature = "rustfft")]
        TransformBackend::RustFft => Box::new(FftTransform::new(size)),
        #[cfg(not(feature = "rustfft"))]
        TransformBackend::RustFft => {
            tracing::warn!("rustfft backend not compiled in; using direct transform");
            Box::new(DirectTransform::new(size))
        }
        TransformBackend::Direct => Box::new(DirectTransform::new(size)),
    }
}

/// Symmetric Hann window.
fn hann(size: usize) -> Vec<f32> {
    if size == 1 {
        return vec![1.0];
    }
    (0..size)
        .map(|n| (0.5 - 0.5 * (2.0 * PI * n as f64 / (size - 1) as f64).cos()) as f32)
        .collect()
}

/// Magnitude matrix `[frame][bin]`, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    magnitudes: Vec<f32>,
    frames: usize,
    bins: usize,
    sample_rate: u32,
    transform_size: usize,
    hop_size: usize,
}

impl Spectrogram {
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Bins per frame, `transform_size / 2 + 1`.
    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn frame(&self, index: usize) -> &[f32] {
        &self.magnitudes[index * self.bins..(index + 1) * self.bins]
    }

    pub fn magnitude(&self, frame: usize, bin: usize) -> f32 {
        self.magnitudes[frame * self.bins + bin]
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn transform_size(&self) -> usize {
        self.transform_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn bin_to_hz(&self, bin: usize) -> f32 {
        bin_to_hz(bin, self.sample_rate, self.transform_size)
    }

    /// Start of `frame` in milliseconds, rounded down.
    pub fn frame_to_ms(&self, frame: usize) -> u32 {
        frame_to_ms(frame, self.hop_size, self.sample_rate)
    }
}

pub fn bin_to_hz(bin: usize, sample_rate: u32, transform_size: usize) -> f32 {
    (bin as f64 * sample_rate as f64 / transform_size as f64) as f32
}

pub fn frame_to_ms(frame: usize, hop_size: usize, sample_rate: u32) -> u32 {
    (frame as u64 * hop_size as u64 * 1_000 / sample_rate as u64) as u32
}

pub struct SpectrogramComputer {
    config: SpectrogramConfig,
    window: Vec<f32>,
    transform: Box<dyn Transform>,
}

impl fmt::Debug for SpectrogramComputer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrogramComputer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SpectrogramComputer {
    pub fn new(config: SpectrogramConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            window: hann(config.transform_size),
            transform: build_transform(config.backend, config.transform_size),
            config,
        })
    }

    pub fn config(&self) -> &SpectrogramConfig {
        &self.config
    }

    /// Frames a buffer of `len` samples produces.
    pub fn frame_count(&self, len: usize) -> usize {
        let n = self.config.transform_size;
        if len < n {
            0
        } else {
            (len - n) / self.config.hop_size + 1
        }
    }

    pub fn compute(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Spectrogram, FingerprintError> {
        if sample_rate == 0 {
            return Err(ValidationError::InvalidSampleRate(0).into());
        }
        let n = self.config.transform_size;
        let bins = self.config.bins();
        let frames = self.frame_count(samples.len());

        let mut magnitudes = Vec::with_capacity(frames * bins);
        let mut windowed = vec![0.0_f32; n];
        for frame in 0..frames {
            let start = frame * self.config.hop_size;
            for ((dst, &x), &w) in windowed
                .iter_mut()
                .zip(&samples[start..start + n])
                .zip(&self.window)
            {
                *dst = x * w;
            }
            let row = self.transform.magnitudes(&windowed);
            if row.len() != bins {
                return Err(FingerprintError::Processing(format!(
                    "transform returned {} bins, expected {bins}",
                    row.len()
                )));
            }
            magnitudes.extend(row);
        }
        debug!(frames, bins, "Computed spectrogram");

        Ok(Spectrogram {
            magnitudes,
            frames,
            bins,
            sample_rate,
            transform_size: n,
            hop_size: self.config.hop_size,
        })
    }
}
