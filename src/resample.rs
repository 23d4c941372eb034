//! Sample-rate conversion to the analysis rate.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::config::ResamplerKind;
use crate::error::FingerprintError;

/// Converts mono `samples` from `from_rate` to `to_rate`.
///
/// Output length is `ceil(len * to_rate / from_rate)` and sample 0 of the
/// output lines up with sample 0 of the input. Equal rates return the input
/// untouched.
pub fn resample(
    samples: &[f32],
    from_rate: u32,
    to_rate: u32,
    kind: ResamplerKind,
) -> Result<Vec<f32>, FingerprintError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let expected = expected_len(samples.len(), from_rate, to_rate);
    match kind {
        ResamplerKind::Sinc => sinc(samples, from_rate, to_rate, expected),
        ResamplerKind::Linear => Ok(linear(samples, from_rate, to_rate, expected)),
    }
}

fn expected_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    ((len as u64 * to_rate as u64).div_ceil(from_rate as u64)) as usize
}

/// Whole-buffer windowed-sinc pass. The input is one chunk, so the only
/// state carried between calls is the filter tail, drained with a final
/// partial call.
fn sinc(
    samples: &[f32],
    from_rate: u32,
    to_rate: u32,
    expected: usize,
) -> Result<Vec<f32>, FingerprintError> {
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to_rate as f64 / from_rate as f64;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, samples.len(), 1)
        .map_err(|e| FingerprintError::Processing(format!("resampler setup: {e}")))?;
    let delay = resampler.output_delay();

    let waves_in = vec![samples.to_vec()];
    let mut out = resampler
        .process(&waves_in, None)
        .map_err(|e| FingerprintError::Processing(format!("resampling: {e}")))?
        .swap_remove(0);

    // Drain until the delayed tail is out.
    while out.len() < expected + delay {
        let tail = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(|e| FingerprintError::Processing(format!("resampling tail: {e}")))?
            .swap_remove(0);
        if tail.is_empty() {
            break;
        }
        out.extend(tail);
    }

    let mut aligned: Vec<f32> = out.into_iter().skip(delay).take(expected).collect();
    aligned.resize(expected, 0.0);
    Ok(aligned)
}

fn linear(samples: &[f32], from_rate: u32, to_rate: u32, expected: usize) -> Vec<f32> {
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;
    (0..expected)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            if idx >= last {
                return samples[last];
            }
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        })
        .collect()
}
