mod support;

use std::collections::HashMap;

use songprint::config::SpectrogramConfig;
use songprint::{
    AudioBuffer, AudioFingerprinter, EngineConfig, FingerprintError, FingerprintStats,
    SpectrogramComputer, TransformBackend, ValidationError,
};
use support::*;

fn fingerprinter() -> AudioFingerprinter {
    AudioFingerprinter::new(&EngineConfig::default()).unwrap()
}

fn pairs(fps: &[songprint::Fingerprint]) -> Vec<(u32, u32)> {
    fps.iter().map(|f| (f.hash_value, f.time_offset_ms)).collect()
}

#[test]
fn fingerprinting_is_deterministic() {
    let fp = fingerprinter();
    let samples = melody(5.0, 0.8);
    let first = fp.generate(&buffer(samples.clone())).unwrap();
    let second = fp.generate(&buffer(samples.clone())).unwrap();
    assert!(!first.is_empty());
    assert_eq!(pairs(&first), pairs(&second));

    // A fresh instance built from the same config agrees as well.
    let third = fingerprinter().generate(&buffer(samples)).unwrap();
    assert_eq!(first, third);
}

#[test]
fn f64_input_matches_f32_input() {
    let fp = fingerprinter();
    let samples = melody(4.0, 0.7);
    let wide: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    let narrow = fp.generate(&buffer(samples)).unwrap();
    let from_wide = fp
        .generate(&AudioBuffer::from_f64(&wide, SAMPLE_RATE, 1).unwrap())
        .unwrap();
    assert_eq!(pairs(&narrow), pairs(&from_wide));
}

#[test]
fn amplitude_scaling_barely_changes_output() {
    let fp = fingerprinter();
    for samples in [tone(440.0, 10.0, 1.0), melody(10.0, 1.0)] {
        let reference = fp.generate(&buffer(samples.clone())).unwrap().len() as f64;
        assert!(reference > 0.0);
        for gain in [0.1_f32, 0.25, 0.5, 1.0] {
            let count = fp.generate(&buffer(scaled(&samples, gain))).unwrap().len() as f64;
            let change = (count - reference).abs() / reference;
            assert!(change <= 0.3, "gain {gain}: {count} vs {reference}");
        }
    }
}

/// Offset shift between two renditions, taken as the most common per-hash
/// difference in whole frames and reported in milliseconds.
fn dominant_shift_ms(
    original: &[songprint::Fingerprint],
    shifted: &[songprint::Fingerprint],
) -> f64 {
    let frame_ms = 512.0 * 1_000.0 / SAMPLE_RATE as f64;
    let mut by_hash: HashMap<u32, Vec<u32>> = HashMap::new();
    for fp in original {
        by_hash.entry(fp.hash_value).or_default().push(fp.time_offset_ms);
    }
    let mut votes: HashMap<i64, usize> = HashMap::new();
    for fp in shifted {
        for &t in by_hash.get(&fp.hash_value).into_iter().flatten() {
            let frames = ((fp.time_offset_ms as f64 - t as f64) / frame_ms).round() as i64;
            *votes.entry(frames).or_default() += 1;
        }
    }
    let (frames, _) = votes
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .expect("renditions share hashes");
    frames as f64 * frame_ms
}

#[test]
fn leading_silence_shifts_offsets_and_keeps_hashes() {
    let fp = fingerprinter();
    let samples = melody(6.0, 0.8);
    let original = fp.generate(&buffer(samples.clone())).unwrap();
    let original_hashes = hash_set(&original);

    for millis in [250_u32, 500, 1_000] {
        let shifted = fp
            .generate(&buffer(with_leading_silence(&samples, millis)))
            .unwrap();
        let overlap = hash_set(&shifted).intersection(&original_hashes).count() as f64
            / original_hashes.len() as f64;
        assert!(overlap >= 0.3, "{millis} ms: overlap {overlap}");

        let shift = dominant_shift_ms(&original, &shifted);
        assert!(
            (shift - millis as f64).abs() <= 50.0,
            "{millis} ms silence shifted offsets by {shift} ms"
        );
    }
}

#[test]
fn density_stays_in_band() {
    let fp = fingerprinter();
    let secs = 10.0;
    for (name, samples) in [
        ("tone", tone(440.0, secs, 0.9)),
        ("melody", melody(secs, 0.9)),
        ("noise", noise(secs, 7, 0.9)),
    ] {
        let count = fp.generate(&buffer(samples)).unwrap().len() as f64;
        let density = count / secs as f64;
        assert!(density > 1.0 && density < 1_000.0, "{name}: {density} fingerprints/s");
    }
}

#[test]
fn offsets_and_hashes_are_well_formed() {
    let fps = fingerprinter().generate(&buffer(melody(8.0, 0.8))).unwrap();
    assert!(fps.iter().all(|f| f.hash_value != 0));
    assert!(fps.windows(2).all(|w| w[0].time_offset_ms <= w[1].time_offset_ms));
    assert!(fps.iter().all(|f| f.time_offset_ms < 8_000));
    assert!(fps
        .iter()
        .all(|f| f.time_delta_ms.is_some_and(|dt| dt > 0 && dt <= 2_000)));

    let stats = FingerprintStats::from_fingerprints(&fps);
    assert_eq!(stats.count, fps.len());
    assert!(stats.min_frequency_hz.unwrap() > 0.0);
    assert!(stats.max_frequency_hz.unwrap() < SAMPLE_RATE as f32 / 2.0);
}

#[test]
fn buffer_shorter_than_one_window_has_no_fingerprints() {
    let fp = fingerprinter();
    let short = tone(440.0, 0.15, 1.0);
    assert!(short.len() < 2048);
    assert!(fp.generate(&buffer(short)).unwrap().is_empty());
}

#[test]
fn stereo_at_other_rates_is_canonicalized() {
    let rate = 44_100;
    let secs = 3.0;
    let mut interleaved = Vec::new();
    for i in 0..(rate as f32 * secs) as usize {
        let t = i as f64 / rate as f64;
        let left = (2.0 * std::f64::consts::PI * 440.0 * t).sin() as f32 * 0.5;
        let right = (2.0 * std::f64::consts::PI * 660.0 * t).sin() as f32 * 0.5;
        interleaved.push(left);
        interleaved.push(right);
    }
    let stereo = AudioBuffer::new(interleaved, rate, 2).unwrap();
    let fps = fingerprinter().generate(&stereo).unwrap();
    let density = fps.len() as f64 / secs as f64;
    assert!(density > 1.0 && density < 1_000.0, "{density}");
}

#[test]
fn invalid_buffers_are_rejected_up_front() {
    assert!(matches!(
        AudioBuffer::new(vec![0.0; 9], SAMPLE_RATE, 3),
        Err(ValidationError::UnsupportedChannels(3))
    ));
    let mut config = EngineConfig::default();
    config.spectrogram.hop_size = 4096;
    assert!(matches!(
        AudioFingerprinter::new(&config),
        Err(ValidationError::HopSize { .. })
    ));
    // Errors surface through the pipeline type too.
    let err: FingerprintError = ValidationError::EmptyBuffer.into();
    assert!(matches!(err, FingerprintError::Validation(ValidationError::EmptyBuffer)));
}

#[test]
fn transform_backends_agree() {
    let samples = melody(1.0, 0.8);
    let compute = |backend| {
        SpectrogramComputer::new(SpectrogramConfig {
            backend,
            ..SpectrogramConfig::default()
        })
        .unwrap()
        .compute(&samples, SAMPLE_RATE)
        .unwrap()
    };
    let fast = compute(TransformBackend::default());
    let direct = compute(TransformBackend::Direct);
    assert_eq!(fast.frames(), direct.frames());
    assert!(fast.frames() > 0);
    for t in 0..fast.frames() {
        for (a, b) in fast.frame(t).iter().zip(direct.frame(t)) {
            assert!((a - b).abs() <= 1e-3 * b.abs().max(1.0), "frame {t}: {a} vs {b}");
        }
    }
}
