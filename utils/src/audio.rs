use anyhow::Context;
use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree};

pub const REALTIME_API_PCM16_SAMPLE_RATE: f64 = 24000.0;

/// Converts float samples to PCM16.
///
/// Each sample is clamped to at most 1.0 and scaled by `i16::MAX`. There is no
/// lower clamp: the cast truncates toward zero and saturates at `i16::MIN`.
pub fn encode_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            // not `f32::min`, which would turn NaN into 1.0
            let clamped = if sample > 1.0 { 1.0 } else { sample };
            (clamped * i16::MAX as f32) as i16
        })
        .collect()
}

/// Little-endian bytes of a PCM16 block, base64 encoded for the wire.
pub fn pcm16_to_base64(pcm16: &[i16]) -> String {
    let bytes: Vec<u8> = pcm16.iter().flat_map(|sample| sample.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes a base64 PCM16 fragment, as carried by `response.audio.delta`.
pub fn decode_pcm16(fragment: &str) -> anyhow::Result<Vec<i16>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(fragment)
        .context("audio fragment is not valid base64")?;
    if bytes.len() % 2 != 0 {
        tracing::warn!("audio fragment has an odd byte length: {}", bytes.len());
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect())
}

/// Creates a mono resampler from the device rate to `out_sampling_rate`.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}
