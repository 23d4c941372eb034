use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::config::AudioConfig;
use crate::error::{FingerprintError, ValidationError};
use crate::models::AudioBuffer;
use crate::resample::resample;

/// Buffers quieter than this are left unscaled.
const SILENCE_PEAK: f32 = 1e-10;

/// Errors raised while turning a container into PCM.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("WAV decoding failed: {0}")]
    Wav(#[from] hound::Error),
    #[error("Unsupported bit depth: {0}")]
    UnsupportedBitDepth(u16),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Something that produces decoded PCM.
pub trait PcmDecoder {
    fn decode(&self, input: &mut dyn Read) -> Result<AudioBuffer, DecodeError>;

    fn decode_file(&self, path: &Path) -> Result<AudioBuffer, DecodeError> {
        let file = File::open(path).map_err(|source| DecodeError::Open {
            path: path.display().to_string(),
            source,
        })?;
        self.decode(&mut BufReader::new(file))
    }
}

/// Uncompressed WAV via `hound`. Integer samples are scaled to [-1.0, 1.0].
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl PcmDecoder for WavDecoder {
    fn decode(&self, input: &mut dyn Read) -> Result<AudioBuffer, DecodeError> {
        let mut reader = hound::WavReader::new(input)?;
        let spec = reader.spec();
        debug!(
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            "Decoding WAV"
        );

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = match spec.bits_per_sample {
                    8 | 16 | 24 | 32 => (1_i64 << (spec.bits_per_sample - 1)) as f32,
                    other => return Err(DecodeError::UnsupportedBitDepth(other)),
                };
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        Ok(AudioBuffer::new(samples, spec.sample_rate, spec.channels)?)
    }
}

/// Brings arbitrary PCM to the canonical analysis form: mono, at the target
/// rate, peak-normalized.
#[derive(Debug, Clone, Default)]
pub struct AudioPreprocessor {
    config: AudioConfig,
}

impl AudioPreprocessor {
    pub fn new(config: AudioConfig) -> Result<Self, ValidationError> {
        if config.target_sample_rate == 0 {
            return Err(ValidationError::InvalidSampleRate(0));
        }
        Ok(Self { config })
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.config.target_sample_rate
    }

    pub fn process(&self, buffer: &AudioBuffer) -> Result<AudioBuffer, FingerprintError> {
        let mono = downmix(buffer);
        let mut samples = resample(
            &mono,
            buffer.sample_rate(),
            self.config.target_sample_rate,
            self.config.resampler,
        )?;
        if self.config.normalize {
            normalize_peak(&mut samples);
        }
        debug!(
            input_frames = buffer.frames(),
            output_samples = samples.len(),
            "Preprocessed audio"
        );
        Ok(AudioBuffer::mono(samples, self.config.target_sample_rate)?)
    }

    /// Validates and processes a raw interleaved slice in one step.
    pub fn process_raw(
        &self,
        samples: &[f32],
        sample_rate: u32,
        channels: u16,
    ) -> Result<AudioBuffer, FingerprintError> {
        let buffer = AudioBuffer::new(samples.to_vec(), sample_rate, channels)?;
        self.process(&buffer)
    }
}

fn downmix(buffer: &AudioBuffer) -> Vec<f32> {
    match buffer.channels() {
        1 => buffer.samples().to_vec(),
        n => buffer
            .samples()
            .chunks_exact(n as usize)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect(),
    }
}

fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0_f32, |max, s| max.max(s.abs()));
    if peak < SILENCE_PEAK {
        return;
    }
    let gain = 1.0 / peak;
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}
