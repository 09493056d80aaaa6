use crate::Item;
use crate::audio::Base64EncodedAudioBytes;
use crate::session::Session;

/// `session.update` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionUpdateEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// The session configuration to update
    session: Session,
}

impl SessionUpdateEvent {
    pub fn new(session: Session) -> Self {
        Self {
            event_id: None,
            session,
        }
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

/// `input_audio_buffer.append` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferAppendEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// Base64 encoded PCM16 audio to append to the buffer
    audio: Base64EncodedAudioBytes,
}

impl InputAudioBufferAppendEvent {
    pub fn new(audio: Base64EncodedAudioBytes) -> Self {
        Self {
            event_id: None,
            audio,
        }
    }

    pub fn audio(&self) -> &Base64EncodedAudioBytes {
        &self.audio
    }
}

/// `input_audio_buffer.commit` event, closes the pending user audio turn
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct InputAudioBufferCommitEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,
}

impl InputAudioBufferCommitEvent {
    pub fn new() -> Self {
        Self::default()
    }
}

/// `conversation.item.create` event
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationItemCreateEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// The ID of the preceding item after which the new item will be inserted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous_item_id: Option<String>,
    /// The item to add to the conversation
    item: Item,
}

impl ConversationItemCreateEvent {
    pub fn new(item: Item) -> Self {
        Self {
            event_id: None,
            previous_item_id: None,
            item,
        }
    }

    pub fn with_previous_item_id(mut self, previous_item_id: &str) -> Self {
        self.previous_item_id = Some(previous_item_id.to_string());
        self
    }

    pub fn item(&self) -> &Item {
        &self.item
    }
}

/// `response.create` event
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResponseCreateEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<String>,

    /// Per-response overrides of the session configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response: Option<Session>,
}

impl ResponseCreateEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_update_session(mut self, response: Session) -> Self {
        self.response = Some(response);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientEvent;

    #[test]
    fn events_carry_their_type_tag() {
        let event = ClientEvent::InputAudioBufferAppend(InputAudioBufferAppendEvent::new("AAA=".to_string()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "input_audio_buffer.append", "audio": "AAA=" }));
        assert_eq!(event.event_type(), "input_audio_buffer.append");

        let event = ClientEvent::ResponseCreate(ResponseCreateEvent::new());
        assert_eq!(serde_json::to_string(&event).unwrap(), r#"{"type":"response.create"}"#);
    }
}
