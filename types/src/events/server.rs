mod error;
mod resources;

pub use error::ErrorDetails;
pub use resources::{ResponseResource, SessionResource, Usage};

use crate::Item;

/// `error` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorEvent {
    event_id: String,

    /// Details about the error
    error: ErrorDetails,
}

impl ErrorEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn error(&self) -> &ErrorDetails {
        &self.error
    }
}

/// `session.created` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionCreatedEvent {
    event_id: String,
    /// The session resource
    session: SessionResource,
}

impl SessionCreatedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn session(&self) -> &SessionResource {
        &self.session
    }
}

/// `session.updated` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionUpdatedEvent {
    event_id: String,

    /// The updated session resource
    session: SessionResource,
}

impl SessionUpdatedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn session(&self) -> &SessionResource {
        &self.session
    }
}

/// `input_audio_buffer.committed` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferCommittedEvent {
    event_id: String,

    /// The ID of the preceding item after which the new item will be inserted
    #[serde(default)]
    previous_item_id: Option<String>,
    /// The ID of the user message item that will be created
    item_id: String,
}

impl InputAudioBufferCommittedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn previous_item_id(&self) -> Option<&str> {
        self.previous_item_id.as_deref()
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

/// `input_audio_buffer.speech_started` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferSpeechStartedEvent {
    event_id: String,

    /// Milliseconds since the session started when speech was detected
    audio_start_ms: i32,
    /// The ID of the user message item that will be created when speech stops
    item_id: String,
}

impl InputAudioBufferSpeechStartedEvent {
    pub fn audio_start_ms(&self) -> i32 {
        self.audio_start_ms
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

/// `input_audio_buffer.speech_stopped` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferSpeechStoppedEvent {
    event_id: String,

    /// Milliseconds since the session started when speech stopped
    audio_end_ms: i32,
    /// The ID of the user message item that will be created
    item_id: String,
}

impl InputAudioBufferSpeechStoppedEvent {
    pub fn audio_end_ms(&self) -> i32 {
        self.audio_end_ms
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

/// `conversation.item.created` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemCreatedEvent {
    event_id: String,

    /// The ID of the preceding item
    #[serde(default)]
    previous_item_id: Option<String>,
    /// The item that was created
    item: Item,
}

impl ConversationItemCreatedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn previous_item_id(&self) -> Option<&str> {
        self.previous_item_id.as_deref()
    }

    pub fn item(&self) -> &Item {
        &self.item
    }
}

/// `conversation.item.input_audio_transcription.completed` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemInputAudioTranscriptionCompletedEvent {
    event_id: String,

    /// The ID of the user message item
    item_id: String,

    /// The index of the content part containing the audio
    content_index: usize,

    /// The transcribed text
    transcript: String,
}

impl ConversationItemInputAudioTranscriptionCompletedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn content_index(&self) -> usize {
        self.content_index
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

/// `conversation.item.truncated` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemTruncatedEvent {
    event_id: String,

    /// The ID of the assistant message item that was truncated
    item_id: String,
    /// The index of the content part that was truncated
    content_index: usize,
    /// The duration up to which the audio was truncated, in milliseconds
    audio_end_ms: u32,
}

impl ConversationItemTruncatedEvent {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn content_index(&self) -> usize {
        self.content_index
    }

    pub fn audio_end_ms(&self) -> u32 {
        self.audio_end_ms
    }
}

/// `conversation.item.deleted` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemDeletedEvent {
    event_id: String,

    /// The ID of the item that was deleted
    item_id: String,
}

impl ConversationItemDeletedEvent {
    pub fn item_id(&self) -> &str {
        &self.item_id
    }
}

/// `response.created` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseCreatedEvent {
    event_id: String,

    /// The response resource
    response: ResponseResource,
}

impl ResponseCreatedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn response(&self) -> &ResponseResource {
        &self.response
    }
}

/// `response.done` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseDoneEvent {
    event_id: String,

    /// The response resource
    response: ResponseResource,
}

impl ResponseDoneEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn response(&self) -> &ResponseResource {
        &self.response
    }
}

/// `response.output_item.added` and `response.output_item.done` events
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseOutputItemEvent {
    event_id: String,

    /// The ID of the response to which the item belongs
    response_id: String,
    /// The index of the output item in the response
    output_index: usize,
    /// The item as of this event
    item: Item,
}

impl ResponseOutputItemEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    pub fn output_index(&self) -> usize {
        self.output_index
    }

    pub fn item(&self) -> &Item {
        &self.item
    }
}

/// Streaming fragment of a response output item.
///
/// Shared by `response.text.delta`, `response.audio_transcript.delta`,
/// `response.audio.delta` (base64 PCM16 in `delta`) and
/// `response.function_call_arguments.delta` (which carries `call_id` instead of `content_index`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResponseDeltaEvent {
    event_id: String,

    /// The ID of the response
    response_id: String,
    /// The ID of the item
    item_id: String,
    /// The index of the output item in the response
    output_index: usize,
    /// The index of the content part in the item's content array
    #[serde(default)]
    content_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    call_id: Option<String>,
    delta: String,
}

impl ResponseDeltaEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn response_id(&self) -> &str {
        &self.response_id
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn output_index(&self) -> usize {
        self.output_index
    }

    pub fn content_index(&self) -> usize {
        self.content_index
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn delta(&self) -> &str {
        &self.delta
    }
}
