//! Audio capture: sources of float sample blocks and the loop that encodes
//! them and forwards them to a connected session.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::client::RealtimeTransport;
use crate::error::{Error, Result};
use crate::session::StreamSession;
use crate::utils::audio;

mod microphone;
mod synthetic;

pub use microphone::{MicrophoneSource, MicrophoneStream};
pub use synthetic::{SyntheticSource, SyntheticStream};

/// Sender half handed to a source; one message per captured block.
pub type BlockTx = mpsc::UnboundedSender<Vec<f32>>;

/// Something that can be opened to produce blocks of float samples.
///
/// `open` acquires the input and starts pushing blocks into `blocks`. The
/// returned stream keeps the input alive; dropping it releases the input.
/// Dropping every clone of the sender signals that the source is exhausted.
pub trait AudioSource {
    type Stream;

    fn open(&mut self, blocks: BlockTx) -> Result<Self::Stream>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub blocks: usize,
    pub samples: usize,
}

pub struct AudioCapturer<S> {
    source: S,
}

impl<S: AudioSource> AudioCapturer<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Captures for a fixed window, then commits and asks for a response.
    pub async fn capture_for<T: RealtimeTransport>(
        &mut self,
        session: &mut StreamSession<T>,
        window: Duration,
    ) -> Result<CaptureReport> {
        self.capture_until(session, tokio::time::sleep(window)).await
    }

    /// Forwards blocks in capture order until `stop` resolves or the source
    /// runs dry. The input is released before the final commit, which is sent
    /// exactly once after every queued block has gone out.
    pub async fn capture_until<T, F>(&mut self, session: &mut StreamSession<T>, stop: F) -> Result<CaptureReport>
    where
        T: RealtimeTransport,
        F: Future<Output = ()>,
    {
        if !session.is_connected() {
            return Err(Error::NotConnected);
        }

        let (blocks_tx, mut blocks_rx) = mpsc::unbounded_channel();
        let stream = self.source.open(blocks_tx)?;
        tracing::info!("capture started");

        let mut report = CaptureReport::default();
        tokio::pin!(stop);
        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut stop => break Ok(()),
                block = blocks_rx.recv() => match block {
                    Some(block) => {
                        if let Err(e) = forward(session, &block, &mut report).await {
                            break Err(e);
                        }
                    }
                    None => {
                        tracing::debug!("audio source exhausted");
                        break Ok(());
                    }
                },
            }
        };

        drop(stream);
        outcome?;

        while let Ok(block) = blocks_rx.try_recv() {
            forward(session, &block, &mut report).await?;
        }
        tracing::info!("capture stopped after {} blocks ({} samples)", report.blocks, report.samples);

        session.commit_and_respond().await?;
        Ok(report)
    }
}

async fn forward<T: RealtimeTransport>(
    session: &mut StreamSession<T>,
    block: &[f32],
    report: &mut CaptureReport,
) -> Result<()> {
    let pcm16 = audio::encode_pcm16(block);
    session.append_audio(&pcm16).await?;
    report.blocks += 1;
    report.samples += pcm16.len();
    Ok(())
}
