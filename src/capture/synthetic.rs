use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rand::Rng;
use rubato::Resampler;

use super::{AudioSource, BlockTx};
use crate::error::{Error, Result};
use crate::utils::audio::{self, REALTIME_API_PCM16_SAMPLE_RATE};

/// Generated or prerecorded blocks, delivered back-to-back without a device.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    blocks: Vec<Vec<f32>>,
    held_open: bool,
    open: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
}

impl SyntheticSource {
    pub fn new(blocks: Vec<Vec<f32>>) -> Self {
        Self {
            blocks,
            held_open: false,
            open: Arc::new(AtomicBool::new(false)),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// `count` blocks of uniform noise in [-1, 1).
    pub fn noise(count: usize, block_size: usize) -> Self {
        let mut rng = rand::rng();
        let blocks: Vec<Vec<f32>> = (0..count)
            .map(|_| (0..block_size).map(|_| rng.random_range(-1.0..1.0)).collect())
            .collect();
        Self::new(blocks)
    }

    /// Reads the first channel of a WAV file, resampled to 24 kHz and cut
    /// into `block_size` blocks. The last block may be shorter.
    pub fn from_wav(path: impl AsRef<Path>, block_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let unavailable = |e: &dyn std::fmt::Display| Error::DeviceUnavailable(format!("{}: {}", path.display(), e));

        if block_size == 0 {
            return Err(unavailable(&"block size must be positive"));
        }

        let mut reader = hound::WavReader::open(path).map_err(|e| unavailable(&e))?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| unavailable(&e))?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|sample| sample as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| unavailable(&e))?
            }
        };
        let mono: Vec<f32> = interleaved.into_iter().step_by(channels).collect();

        let samples = if f64::from(spec.sample_rate) == REALTIME_API_PCM16_SAMPLE_RATE {
            mono
        } else {
            resample(&mono, f64::from(spec.sample_rate), block_size).map_err(|e| unavailable(&e))?
        };
        tracing::debug!(
            "loaded {} samples from {} ({} Hz, {} channels)",
            samples.len(),
            path.display(),
            spec.sample_rate,
            spec.channels
        );

        Ok(Self::new(samples.chunks(block_size).map(<[f32]>::to_vec).collect()))
    }

    /// Keeps the source open after the last block, like a device that has
    /// gone quiet, so capture ends only on its stop signal.
    pub fn held_open(mut self) -> Self {
        self.held_open = true;
        self
    }

    pub fn blocks(&self) -> &[Vec<f32>] {
        &self.blocks
    }

    /// Whether a stream opened from this source is still alive.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl AudioSource for SyntheticSource {
    type Stream = SyntheticStream;

    fn open(&mut self, blocks: BlockTx) -> Result<SyntheticStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);

        for block in &self.blocks {
            if blocks.send(block.clone()).is_err() {
                break;
            }
        }

        Ok(SyntheticStream {
            _blocks: self.held_open.then_some(blocks),
            open: self.open.clone(),
        })
    }
}

/// Marks the source closed when dropped.
#[derive(Debug)]
pub struct SyntheticStream {
    _blocks: Option<BlockTx>,
    open: Arc<AtomicBool>,
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

fn resample(samples: &[f32], from_rate: f64, chunk_size: usize) -> anyhow::Result<Vec<f32>> {
    let mut resampler = audio::create_resampler(from_rate, REALTIME_API_PCM16_SAMPLE_RATE, chunk_size)?;
    let mut out = Vec::with_capacity((samples.len() as f64 * REALTIME_API_PCM16_SAMPLE_RATE / from_rate) as usize);
    for chunk in samples.chunks(chunk_size) {
        let mut chunk = chunk.to_vec();
        chunk.resize(chunk_size, 0.0);
        let resampled = resampler.process(&[chunk.as_slice()], None)?;
        if let Some(channel) = resampled.first() {
            out.extend_from_slice(channel);
        }
    }
    Ok(out)
}
