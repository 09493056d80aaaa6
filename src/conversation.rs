//! Conversation items and the ordered ledger that folds update events.

use std::collections::HashMap;

use crate::types::{Content, Item, ItemStatus, MessageRole};

mod tracker;

pub use tracker::EventTracker;

/// What an item is, independent of how far it has progressed.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Message { role: MessageRole },
    FunctionCall { call_id: Option<String>, name: Option<String> },
    FunctionCallOutput { call_id: Option<String>, output: Option<String> },
}

/// Display-ready content accumulated from streamed deltas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Formatted {
    pub text: String,
    pub transcript: String,
    /// PCM16 at 24 kHz.
    pub audio: Vec<i16>,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationItem {
    id: String,
    kind: ItemKind,
    status: ItemStatus,
    content: Vec<Content>,
    formatted: Formatted,
}

impl ConversationItem {
    pub fn new(id: &str, kind: ItemKind, status: ItemStatus) -> Self {
        Self {
            id: id.to_string(),
            kind,
            status,
            content: Vec::new(),
            formatted: Formatted::default(),
        }
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content.push(content);
        self
    }

    /// Builds an item from a server snapshot. Items without an id are rejected.
    pub fn from_wire(item: &Item) -> Option<Self> {
        let id = item.id()?;
        let status = item.status().unwrap_or(ItemStatus::InProgress);
        let mut converted = Self::new(id, kind_of(item), status);
        match item {
            Item::Message(message) => {
                converted.content = message.content().to_vec();
                converted.formatted.text = message.content().iter().filter_map(Content::text).collect();
                converted.formatted.transcript = message.content().iter().filter_map(Content::transcript).collect();
            }
            Item::FunctionCall(call) => {
                converted.formatted.arguments = call.arguments().unwrap_or_default().to_string();
            }
            Item::FunctionCallOutput(_) => {}
        }
        Some(converted)
    }

    /// Takes kind, status and content from a newer server snapshot of the same
    /// item. Text and transcript carried by the snapshot replace what deltas
    /// accumulated in `formatted`; audio is only ever streamed, so it stays.
    pub(crate) fn refresh(&mut self, item: &Item) {
        self.kind = kind_of(item);
        if let Some(status) = item.status() {
            self.status = status;
        }
        if let Item::Message(message) = item {
            self.content = message.content().to_vec();
            let text: String = self.content.iter().filter_map(Content::text).collect();
            if !text.is_empty() {
                self.formatted.text = text;
            }
            let transcript: String = self.content.iter().filter_map(Content::transcript).collect();
            if !transcript.is_empty() {
                self.formatted.transcript = transcript;
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    pub fn role(&self) -> Option<MessageRole> {
        match self.kind {
            ItemKind::Message { role } => Some(role),
            _ => None,
        }
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn content(&self) -> &[Content] {
        &self.content
    }

    pub(crate) fn content_mut(&mut self) -> &mut Vec<Content> {
        &mut self.content
    }

    pub fn formatted(&self) -> &Formatted {
        &self.formatted
    }

    pub(crate) fn formatted_mut(&mut self) -> &mut Formatted {
        &mut self.formatted
    }
}

fn kind_of(item: &Item) -> ItemKind {
    match item {
        Item::Message(message) => ItemKind::Message { role: message.role() },
        Item::FunctionCall(call) => ItemKind::FunctionCall {
            call_id: call.call_id().map(str::to_string),
            name: call.name().map(str::to_string),
        },
        Item::FunctionCallOutput(output) => ItemKind::FunctionCallOutput {
            call_id: output.call_id().map(str::to_string),
            output: output.output().map(str::to_string),
        },
    }
}

/// Incremental fragment that accompanied an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Text(String),
    Transcript(String),
    Audio(Vec<i16>),
    Arguments(String),
}

/// `conversation.updated`: the item's full current state plus what changed.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationUpdated {
    pub item: ConversationItem,
    pub delta: Option<Delta>,
}

/// Items in order of first appearance.
#[derive(Debug, Default)]
pub struct ConversationLedger {
    items: Vec<ConversationItem>,
    positions: HashMap<String, usize>,
}

impl ConversationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an unseen item, or replaces the stored one in place with the
    /// event's snapshot. The delta is not consulted.
    pub fn apply(&mut self, update: &ConversationUpdated) {
        let id = update.item.id();
        match self.positions.get(id) {
            Some(&position) => self.items[position] = update.item.clone(),
            None => {
                self.positions.insert(id.to_string(), self.items.len());
                self.items.push(update.item.clone());
            }
        }
    }

    pub fn items(&self) -> Vec<ConversationItem> {
        self.items.clone()
    }

    pub fn get(&self, id: &str) -> Option<&ConversationItem> {
        self.positions.get(id).map(|&position| &self.items[position])
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.positions.clear();
    }
}
