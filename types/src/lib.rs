//! Wire types for the realtime voice protocol: session configuration,
//! conversation items and the client/server event envelopes.

pub mod audio;
pub mod events;
pub mod session;

mod content;

pub use content::items::{FunctionCallItem, FunctionCallOutputItem, Item, ItemStatus};
pub use content::message::*;
pub use events::{ClientEvent, ServerEvent};
