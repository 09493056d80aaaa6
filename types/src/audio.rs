//! Audio settings carried in the session: formats, voices, transcription and
//! turn detection. Audio itself travels as base64 PCM16 at [`PCM16_SAMPLE_RATE`].

mod consts;
mod transcription;
mod turn_detection;

pub use consts::*;
pub use transcription::InputAudioTranscription;
pub use turn_detection::{ServerVadTurnDetection, TurnDetection};

/// Little-endian PCM16 bytes, base64 encoded.
pub type Base64EncodedAudioBytes = String;
