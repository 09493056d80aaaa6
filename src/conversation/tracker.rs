use std::collections::HashMap;

use crate::conversation::{ConversationItem, ConversationUpdated, Delta};
use crate::types::ServerEvent;
use crate::types::events::server::ResponseDeltaEvent;
use crate::utils::audio;

const SAMPLES_PER_MS: usize = 24;

/// Turns raw server events into `ConversationUpdated` snapshots.
#[derive(Debug, Default)]
pub struct EventTracker {
    items: HashMap<String, ConversationItem>,
    // transcripts that arrived before their item
    pending_transcripts: HashMap<String, (usize, String)>,
}

impl EventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event, returning the update it produced, if any.
    pub fn process(&mut self, event: &ServerEvent) -> Option<ConversationUpdated> {
        match event {
            ServerEvent::ConversationItemCreated(created) => self.upsert(created.item(), true),
            ServerEvent::ResponseOutputItemAdded(added) => self.upsert(added.item(), false),
            ServerEvent::ResponseOutputItemDone(done) => self.upsert(done.item(), true),
            ServerEvent::ConversationItemInputAudioTranscriptionCompleted(completed) => {
                let id = completed.item_id();
                let Some(item) = self.items.get_mut(id) else {
                    self.pending_transcripts.insert(
                        id.to_string(),
                        (completed.content_index(), completed.transcript().to_string()),
                    );
                    return None;
                };
                set_transcript(item, completed.content_index(), completed.transcript());
                Some(ConversationUpdated {
                    item: item.clone(),
                    delta: Some(Delta::Transcript(completed.transcript().to_string())),
                })
            }
            ServerEvent::ResponseTextDelta(delta) => self.append(delta, |item, fragment| {
                item.formatted_mut().text.push_str(fragment);
                Some(Delta::Text(fragment.to_string()))
            }),
            ServerEvent::ResponseAudioTranscriptDelta(delta) => self.append(delta, |item, fragment| {
                item.formatted_mut().transcript.push_str(fragment);
                Some(Delta::Transcript(fragment.to_string()))
            }),
            ServerEvent::ResponseAudioDelta(delta) => self.append(delta, |item, fragment| {
                match audio::decode_pcm16(fragment) {
                    Ok(samples) => {
                        item.formatted_mut().audio.extend_from_slice(&samples);
                        Some(Delta::Audio(samples))
                    }
                    Err(e) => {
                        tracing::warn!("dropping audio delta for {}: {:#}", item.id(), e);
                        None
                    }
                }
            }),
            ServerEvent::ResponseFunctionCallArgumentsDelta(delta) => self.append(delta, |item, fragment| {
                item.formatted_mut().arguments.push_str(fragment);
                Some(Delta::Arguments(fragment.to_string()))
            }),
            ServerEvent::ConversationItemTruncated(truncated) => {
                let Some(item) = self.items.get_mut(truncated.item_id()) else {
                    tracing::warn!("truncation for unknown item {}", truncated.item_id());
                    return None;
                };
                let end = usize::try_from(truncated.audio_end_ms())
                    .unwrap_or(usize::MAX)
                    .saturating_mul(SAMPLES_PER_MS);
                item.formatted_mut().audio.truncate(end);
                item.formatted_mut().transcript.clear();
                set_transcript(item, truncated.content_index(), "");
                Some(ConversationUpdated {
                    item: item.clone(),
                    delta: None,
                })
            }
            ServerEvent::ConversationItemDeleted(deleted) => {
                self.items.remove(deleted.item_id());
                self.pending_transcripts.remove(deleted.item_id());
                None
            }
            _ => None,
        }
    }

    fn upsert(&mut self, snapshot: &crate::types::Item, refresh_known: bool) -> Option<ConversationUpdated> {
        let Some(id) = snapshot.id() else {
            tracing::warn!("ignoring server item without an id");
            return None;
        };

        if let Some(item) = self.items.get_mut(id) {
            if !refresh_known {
                return None;
            }
            item.refresh(snapshot);
            return Some(ConversationUpdated {
                item: item.clone(),
                delta: None,
            });
        }

        let mut item = ConversationItem::from_wire(snapshot)?;
        if let Some((content_index, transcript)) = self.pending_transcripts.remove(id) {
            set_transcript(&mut item, content_index, &transcript);
        }
        self.items.insert(id.to_string(), item.clone());
        Some(ConversationUpdated { item, delta: None })
    }

    fn append<F>(&mut self, delta: &ResponseDeltaEvent, apply: F) -> Option<ConversationUpdated>
    where
        F: FnOnce(&mut ConversationItem, &str) -> Option<Delta>,
    {
        let Some(item) = self.items.get_mut(delta.item_id()) else {
            tracing::warn!("delta for unknown item {}", delta.item_id());
            return None;
        };
        let delta = apply(item, delta.delta())?;
        Some(ConversationUpdated {
            item: item.clone(),
            delta: Some(delta),
        })
    }
}

fn set_transcript(item: &mut ConversationItem, content_index: usize, transcript: &str) {
    if let Some(part) = item.content_mut().get_mut(content_index) {
        part.set_transcript(transcript);
    }
    item.formatted_mut().transcript = transcript.to_string();
}
