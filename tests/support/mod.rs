#![allow(dead_code)]

use std::collections::HashSet;
use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use songprint::{AudioBuffer, Fingerprint};

pub const SAMPLE_RATE: u32 = 11_025;

/// Distinct pitches per melody cycle; prime so the stride below permutes them.
const NOTE_COUNT: usize = 47;
const NOTE_STRIDE: usize = 17;
const LOWEST_NOTE_HZ: f64 = 300.0;
/// Wider than one 11025/2048 Hz bin, so every note has its own bin.
const NOTE_SPACING_HZ: f64 = 6.0;
const NOTE_SECS: f32 = 0.5;

fn len(secs: f32) -> usize {
    (secs * SAMPLE_RATE as f32) as usize
}

pub fn tone(freq: f32, secs: f32, amplitude: f32) -> Vec<f32> {
    (0..len(secs))
        .map(|i| amplitude * (2.0 * PI * freq as f64 * i as f64 / SAMPLE_RATE as f64).sin() as f32)
        .collect()
}

fn note_hz(index: usize) -> f64 {
    LOWEST_NOTE_HZ + NOTE_SPACING_HZ * ((index * NOTE_STRIDE) % NOTE_COUNT) as f64
}

/// Half-second notes with one overtone. The pitch order only repeats after
/// 23.5 s, and overtones never land on another note's fundamental.
pub fn melody(secs: f32, amplitude: f32) -> Vec<f32> {
    let note_len = len(NOTE_SECS);
    (0..len(secs))
        .map(|i| {
            let f = note_hz(i / note_len);
            let t = i as f64 / SAMPLE_RATE as f64;
            let v = 0.6 * (2.0 * PI * f * t).sin() + 0.3 * (2.0 * PI * 2.0 * f * t).sin();
            amplitude * v as f32
        })
        .collect()
}

/// Uniform white noise, reproducible per seed.
pub fn noise(secs: f32, seed: u64, amplitude: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len(secs))
        .map(|_| amplitude * rng.random_range(-1.0_f32..1.0))
        .collect()
}

pub fn with_leading_silence(samples: &[f32], millis: u32) -> Vec<f32> {
    let mut out = vec![0.0; (SAMPLE_RATE as usize * millis as usize) / 1_000];
    out.extend_from_slice(samples);
    out
}

pub fn scaled(samples: &[f32], gain: f32) -> Vec<f32> {
    samples.iter().map(|s| s * gain).collect()
}

pub fn excerpt(samples: &[f32], from_secs: f32, to_secs: f32) -> Vec<f32> {
    samples[len(from_secs)..len(to_secs)].to_vec()
}

pub fn buffer(samples: Vec<f32>) -> AudioBuffer {
    AudioBuffer::mono(samples, SAMPLE_RATE).expect("valid test buffer")
}

pub fn hash_set(fingerprints: &[Fingerprint]) -> HashSet<u32> {
    fingerprints.iter().map(|f| f.hash_value).collect()
}
