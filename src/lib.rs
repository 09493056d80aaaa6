pub mod capture;
pub mod client;
pub mod conversation;
mod error;
pub mod session;

pub use realtime_console_types as types;
pub use realtime_console_utils as utils;

pub use capture::{AudioCapturer, AudioSource, CaptureReport};
pub use client::{Config, RealtimeTransport, ServerRx, WebSocketTransport};
pub use conversation::{ConversationItem, ConversationLedger, ConversationUpdated, Delta};
pub use error::{Error, Result};
pub use session::{SessionState, Stats, StreamSession};
