use std::collections::VecDeque;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use rubato::Resampler;

use super::{AudioSource, BlockTx};
use crate::error::{Error, Result};
use crate::utils::audio::{self, REALTIME_API_PCM16_SAMPLE_RATE};
use crate::utils::device;

pub const DEFAULT_BLOCK_SIZE: usize = 2048;

/// Live input from a cpal device, delivered in fixed-size blocks of the
/// first channel at 24 kHz.
#[derive(Debug, Clone, Default)]
pub struct MicrophoneSource {
    device_name: Option<String>,
    block_size: Option<usize>,
}

impl MicrophoneSource {
    /// The host's default input device.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device_name: &str) -> Self {
        self.device_name = Some(device_name.to_string());
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    pub fn block_size(&self) -> usize {
        self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE)
    }
}

impl AudioSource for MicrophoneSource {
    type Stream = MicrophoneStream;

    fn open(&mut self, blocks: BlockTx) -> Result<MicrophoneStream> {
        let unavailable = |e: &dyn std::fmt::Display| Error::DeviceUnavailable(e.to_string());
        let block_size = self.block_size();
        if block_size == 0 {
            return Err(unavailable(&"block size must be positive"));
        }

        let input = device::get_or_default_input(self.device_name.as_deref()).map_err(|e| unavailable(&e))?;
        let default_config = input.default_input_config().map_err(|e| unavailable(&e))?;
        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Fixed(block_size as FrameCount),
        };
        let channels = usize::from(config.channels.max(1));
        let input_rate = f64::from(config.sample_rate.0);
        tracing::info!(
            "input: device={:?}, config={:?}",
            input.name().unwrap_or_default(),
            &config
        );

        let mut resampler = if input_rate == REALTIME_API_PCM16_SAMPLE_RATE {
            None
        } else {
            Some(
                audio::create_resampler(input_rate, REALTIME_API_PCM16_SAMPLE_RATE, block_size)
                    .map_err(|e| unavailable(&e))?,
            )
        };

        let mut buffer: VecDeque<f32> = VecDeque::with_capacity(block_size * 2);
        let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
            buffer.extend(data.iter().step_by(channels));
            while buffer.len() >= block_size {
                let block: Vec<f32> = buffer.drain(..block_size).collect();
                let block = match resampler.as_mut() {
                    None => block,
                    Some(resampler) => match resampler.process(&[block.as_slice()], None) {
                        Ok(mut resampled) if !resampled.is_empty() => resampled.swap_remove(0),
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::error!("failed to resample input block: {}", e);
                            continue;
                        }
                    },
                };
                // the capturer has stopped listening
                if blocks.send(block).is_err() {
                    return;
                }
            }
        };

        let stream = input
            .build_input_stream(
                &config,
                input_data_fn,
                move |err| tracing::error!("an error occurred on input stream: {}", err),
                None,
            )
            .map_err(|e| unavailable(&e))?;
        stream.play().map_err(|e| unavailable(&e))?;

        Ok(MicrophoneStream { stream })
    }
}

/// A playing input stream. Dropping it stops capture and releases the device.
pub struct MicrophoneStream {
    stream: cpal::Stream,
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            tracing::warn!("failed to pause input stream: {}", e);
        }
        tracing::debug!("input stream released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_defaults_to_2048() {
        assert_eq!(MicrophoneSource::new().block_size(), DEFAULT_BLOCK_SIZE);
        assert_eq!(MicrophoneSource::new().with_block_size(512).block_size(), 512);
    }

    #[test]
    fn zero_block_size_fails_before_touching_the_device() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut source = MicrophoneSource::new().with_block_size(0).with_device("no such device");
        assert!(matches!(source.open(tx), Err(Error::DeviceUnavailable(_))));
    }
}
