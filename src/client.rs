use anyhow::Context;
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::types;

mod config;
mod consts;
mod utils;

pub use config::{Config, ConfigBuilder};

/// Server events in the order the service emitted them.
pub type ServerRx = tokio::sync::mpsc::Receiver<types::ServerEvent>;

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// The connection to the realtime service as seen by a session.
///
/// Implementations must deliver server events on the returned receiver in
/// the order they were produced, and must write sent events in call order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RealtimeTransport: Send {
    /// Performs the handshake and hands back the inbound event stream.
    async fn connect(&mut self) -> anyhow::Result<ServerRx>;

    async fn send(&mut self, event: types::ClientEvent) -> anyhow::Result<()>;

    /// Closes the connection. Safe to call when not connected.
    async fn close(&mut self);
}

/// `RealtimeTransport` over the service's websocket endpoint.
pub struct WebSocketTransport {
    capacity: usize,
    config: Config,
    write: Option<WsWrite>,
    recv_handle: Option<tokio::task::JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new(config: Config) -> Self {
        Self::with_capacity(consts::DEFAULT_CHANNEL_CAPACITY, config)
    }

    pub fn with_capacity(capacity: usize, config: Config) -> Self {
        Self {
            capacity,
            config,
            write: None,
            recv_handle: None,
        }
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn connect(&mut self) -> anyhow::Result<ServerRx> {
        if self.write.is_some() {
            anyhow::bail!("already connected");
        }

        let request = utils::build_request(&self.config).context("failed to build handshake request")?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .context("websocket handshake failed")?;

        let (write, mut read) = ws_stream.split();
        let (s_tx, s_rx) = tokio::sync::mpsc::channel(self.capacity);

        let recv_handle = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        break;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => {
                        let json = match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!("received malformed json: {}, text=> {:?}", e, text);
                                continue;
                            }
                        };
                        let event_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("unknown");
                        let event_id = json.get("event_id").and_then(|v| v.as_str()).unwrap_or("unknown");
                        tracing::debug!("received message: {}, id={}", event_type, event_id);

                        match serde_json::from_value::<types::ServerEvent>(json.clone()) {
                            Ok(types::ServerEvent::Unknown) => {}
                            Ok(event) => {
                                if s_tx.send(event).await.is_err() {
                                    tracing::debug!("server event receiver dropped, stopping reader");
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::error!("failed to deserialize event: {}, type=> {:?}", e, json);
                            }
                        }
                    }
                    Message::Binary(bin) => {
                        tracing::warn!("unexpected binary message: {} bytes", bin.len());
                    }
                    Message::Close(reason) => {
                        tracing::info!("connection closed: {:?}", reason);
                        break;
                    }
                    _ => {}
                }
            }
        });

        self.write = Some(write);
        self.recv_handle = Some(recv_handle);
        tracing::info!("connected to {} (model {})", self.config.base_url(), self.config.model());
        Ok(s_rx)
    }

    async fn send(&mut self, event: types::ClientEvent) -> anyhow::Result<()> {
        let write = self.write.as_mut().context("not connected yet")?;
        let text = serde_json::to_string(&event)
            .with_context(|| format!("failed to serialize {}", event.event_type()))?;
        write
            .send(Message::Text(text))
            .await
            .with_context(|| format!("failed to send {}", event.event_type()))?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut write) = self.write.take() {
            if let Err(e) = write.close().await {
                tracing::warn!("failed to close websocket cleanly: {}", e);
            }
        }
        if let Some(handle) = self.recv_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.recv_handle.take() {
            handle.abort();
        }
    }
}
