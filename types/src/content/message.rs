use crate::audio::Base64EncodedAudioBytes;
use crate::content::items::{ItemStatus, _Item};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MessageItem {
    #[serde(flatten)]
    pub(crate) item: _Item,

    /// The role of the message sender: "user", "assistant", "system"
    role: MessageRole,

    /// The content of the message
    #[serde(default)]
    content: Vec<Content>,
}

impl MessageItem {
    pub fn builder() -> MessageItemBuilder {
        MessageItemBuilder::new()
    }

    pub fn id(&self) -> Option<&str> {
        self.item.id.as_deref()
    }

    pub fn status(&self) -> Option<ItemStatus> {
        self.item.status
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> &[Content] {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut Vec<Content> {
        &mut self.content
    }
}

pub struct MessageItemBuilder {
    item: MessageItem,
}

impl Default for MessageItemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageItemBuilder {
    pub fn new() -> Self {
        Self {
            item: MessageItem {
                item: _Item::default(),
                role: MessageRole::User,
                content: Vec::new(),
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.item.item.id = Some(id.to_string());
        self
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.item.item.status = Some(status);
        self
    }

    pub fn with_role(mut self, role: MessageRole) -> Self {
        self.item.role = role;
        self
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.item.content.push(content);
        self
    }

    pub fn with_input_text(self, text: &str) -> Self {
        self.with_content(Content::input_text(text))
    }

    pub fn with_input_audio(self, audio: Base64EncodedAudioBytes) -> Self {
        self.with_content(Content::input_audio(audio))
    }

    pub fn build(self) -> MessageItem {
        self.item
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum MessageRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "system")]
    System,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Content {
    #[serde(rename = "input_text")]
    InputText(InputTextContent),
    #[serde(rename = "input_audio")]
    InputAudio(AudioContent),
    #[serde(rename = "text")]
    Text(TextContent),
    #[serde(rename = "audio")]
    Audio(AudioContent),
}

impl Content {
    pub fn input_text(text: &str) -> Self {
        Content::InputText(InputTextContent::new(text))
    }

    pub fn input_audio(audio: Base64EncodedAudioBytes) -> Self {
        Content::InputAudio(AudioContent::with_audio(audio))
    }

    /// The text carried by this part, if it is a text part.
    pub fn text(&self) -> Option<&str> {
        match self {
            Content::InputText(c) => Some(c.text()),
            Content::Text(c) => Some(c.text()),
            Content::InputAudio(_) | Content::Audio(_) => None,
        }
    }

    /// The transcript of an audio part, once the service has produced one.
    pub fn transcript(&self) -> Option<&str> {
        match self {
            Content::InputAudio(c) | Content::Audio(c) => c.transcript(),
            Content::InputText(_) | Content::Text(_) => None,
        }
    }

    /// Replaces the transcript of an audio part. Text parts are left alone.
    pub fn set_transcript(&mut self, transcript: &str) {
        if let Content::InputAudio(c) | Content::Audio(c) = self {
            c.transcript = Some(transcript.to_string());
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct InputTextContent {
    text: String,
}

impl InputTextContent {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct TextContent {
    text: String,
}

impl TextContent {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Audio content part, used both for `input_audio` and `audio`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct AudioContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    audio: Option<Base64EncodedAudioBytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transcript: Option<String>,
}

impl AudioContent {
    pub fn with_audio(audio: Base64EncodedAudioBytes) -> Self {
        Self {
            audio: Some(audio),
            transcript: None,
        }
    }

    pub fn audio(&self) -> Option<&str> {
        self.audio.as_deref()
    }

    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }
}
