/// Failures surfaced by session, send and capture operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to the realtime service: {0}")]
    ConnectionFailure(String),
    #[error("not connected")]
    NotConnected,
    #[error("already connected")]
    AlreadyConnected,
    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("failed to send to the realtime service: {0}")]
    TransportSendFailure(String),
}

pub type Result<T> = std::result::Result<T, Error>;
