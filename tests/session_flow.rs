use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use realtime_console::capture::{AudioCapturer, SyntheticSource};
use realtime_console::types::audio::{TurnDetection, Voice};
use realtime_console::types::session::Session;
use realtime_console::types::{ClientEvent, Content, ItemStatus, MessageRole, ServerEvent};
use realtime_console::utils::audio;
use realtime_console::{ConversationUpdated, Error, RealtimeTransport, ServerRx, SessionState, StreamSession};
use serde_json::json;
use tokio::sync::mpsc;

/// In-memory transport: records what the session sends and lets the test
/// play the service's side of the conversation.
#[derive(Clone, Default)]
struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

#[derive(Default)]
struct FakeState {
    sent: Vec<ClientEvent>,
    server_tx: Option<mpsc::Sender<ServerEvent>>,
    refuse_connect: bool,
}

impl FakeTransport {
    fn refusing() -> Self {
        let transport = Self::default();
        transport.state.lock().unwrap().refuse_connect = true;
        transport
    }

    fn sent(&self) -> Vec<ClientEvent> {
        self.state.lock().unwrap().sent.clone()
    }

    fn sent_types(&self) -> Vec<&'static str> {
        self.sent().iter().map(ClientEvent::event_type).collect()
    }

    async fn emit(&self, event: serde_json::Value) {
        let server_tx = self.state.lock().unwrap().server_tx.clone().expect("not connected");
        server_tx.send(serde_json::from_value(event).unwrap()).await.unwrap();
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn connect(&mut self) -> anyhow::Result<ServerRx> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_connect {
            anyhow::bail!("connection refused");
        }
        let (server_tx, server_rx) = mpsc::channel(64);
        state.server_tx = Some(server_tx);
        Ok(server_rx)
    }

    async fn send(&mut self, event: ClientEvent) -> anyhow::Result<()> {
        self.state.lock().unwrap().sent.push(event);
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().server_tx = None;
    }
}

fn collect_updates(
    session: &mut StreamSession<FakeTransport>,
) -> mpsc::UnboundedReceiver<ConversationUpdated> {
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    session.on_conversation_updated(move |update| {
        let _ = updates_tx.send(update.clone());
    });
    updates_rx
}

async fn next_update(updates: &mut mpsc::UnboundedReceiver<ConversationUpdated>) -> ConversationUpdated {
    tokio::time::timeout(Duration::from_secs(1), updates.recv())
        .await
        .expect("timed out waiting for conversation.updated")
        .expect("update channel closed")
}

fn appended_audio(transport: &FakeTransport) -> Vec<Vec<i16>> {
    transport
        .sent()
        .iter()
        .filter_map(|event| match event {
            ClientEvent::InputAudioBufferAppend(append) => Some(audio::decode_pcm16(append.audio()).unwrap()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn text_then_audio_conversation_ends_with_two_items() {
    let transport = FakeTransport::default();
    let mut session = StreamSession::new(transport.clone());
    let mut updates = collect_updates(&mut session);

    session.configure(Session::new().with_voice(Voice::Alloy).build()).await.unwrap();
    session
        .configure(Session::new().with_turn_detection(TurnDetection::server_vad()).build())
        .await
        .unwrap();
    session.connect().await.unwrap();

    let update = serde_json::to_value(&transport.sent()[0]).unwrap();
    assert_eq!(update["type"], "session.update");
    assert_eq!(update["session"]["voice"], "alloy");
    assert_eq!(update["session"]["turn_detection"]["type"], "server_vad");

    session.send_text("How are you?").await.unwrap();
    transport
        .emit(json!({
            "type": "conversation.item.created",
            "event_id": "event_1",
            "previous_item_id": null,
            "item": {
                "id": "item_1", "object": "realtime.item", "type": "message", "status": "completed",
                "role": "user", "content": [{ "type": "input_text", "text": "How are you?" }]
            }
        }))
        .await;
    let first = next_update(&mut updates).await;
    assert_eq!(first.item.id(), "item_1");

    let blocks = [vec![0.25_f32; 4], vec![-0.5; 4], vec![1.0; 4]];
    for block in &blocks {
        session.append_audio(&audio::encode_pcm16(block)).await.unwrap();
    }
    session.commit_and_respond().await.unwrap();

    transport
        .emit(json!({
            "type": "conversation.item.created",
            "event_id": "event_2",
            "previous_item_id": "item_1",
            "item": {
                "id": "item_2", "object": "realtime.item", "type": "message", "status": "in_progress",
                "role": "assistant", "content": []
            }
        }))
        .await;
    for (i, fragment) in ["I'm doing ", "great!"].into_iter().enumerate() {
        transport
            .emit(json!({
                "type": "response.audio_transcript.delta",
                "event_id": format!("event_delta_{i}"), "response_id": "resp_1", "item_id": "item_2",
                "output_index": 0, "content_index": 0, "delta": fragment
            }))
            .await;
    }
    transport
        .emit(json!({
            "type": "response.output_item.done",
            "event_id": "event_5", "response_id": "resp_1", "output_index": 0,
            "item": {
                "id": "item_2", "object": "realtime.item", "type": "message", "status": "completed",
                "role": "assistant", "content": [{ "type": "audio", "transcript": "I'm doing great, thanks!" }]
            }
        }))
        .await;
    for _ in 0..4 {
        next_update(&mut updates).await;
    }

    assert_eq!(
        transport.sent_types(),
        [
            "session.update",
            "conversation.item.create",
            "response.create",
            "input_audio_buffer.append",
            "input_audio_buffer.append",
            "input_audio_buffer.append",
            "response.create"
        ]
    );
    let expected: Vec<Vec<i16>> = blocks.iter().map(|block| audio::encode_pcm16(block)).collect();
    assert_eq!(appended_audio(&transport), expected);

    let items = session.items();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].role(), Some(MessageRole::User));
    assert_eq!(items[0].formatted().text, "How are you?");
    assert_eq!(items[1].role(), Some(MessageRole::Assistant));
    assert_eq!(items[1].status(), ItemStatus::Completed);
    assert!(matches!(items[1].content()[0], Content::Audio(_)));
    assert_eq!(items[1].content()[0].transcript(), Some("I'm doing great, thanks!"));
    assert_eq!(items[1].formatted().transcript, "I'm doing great, thanks!");
}

#[tokio::test]
async fn captured_blocks_are_sent_in_capture_order() {
    let transport = FakeTransport::default();
    let mut session = StreamSession::new(transport.clone());
    session
        .configure(Session::new().with_turn_detection(TurnDetection::Manual).build())
        .await
        .unwrap();
    session.connect().await.unwrap();

    let blocks: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32 / 10.0; 8]).collect();
    let mut capturer = AudioCapturer::new(SyntheticSource::new(blocks.clone()));
    let report = capturer
        .capture_until(&mut session, std::future::pending())
        .await
        .unwrap();

    assert_eq!(report.blocks, 10);
    assert_eq!(report.samples, 80);
    let expected: Vec<Vec<i16>> = blocks.iter().map(|block| audio::encode_pcm16(block)).collect();
    assert_eq!(appended_audio(&transport), expected);
    let types = transport.sent_types();
    assert_eq!(types[0], "session.update");
    assert_eq!(types[11..], ["input_audio_buffer.commit", "response.create"]);
}

#[tokio::test(start_paused = true)]
async fn timed_capture_releases_the_source_and_commits_once() {
    let transport = FakeTransport::default();
    let mut session = StreamSession::new(transport.clone());
    session
        .configure(Session::new().with_turn_detection(TurnDetection::Manual).build())
        .await
        .unwrap();
    session.connect().await.unwrap();

    let source = SyntheticSource::noise(3, 2400).held_open();
    let mut capturer = AudioCapturer::new(source);
    let report = capturer
        .capture_for(&mut session, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(report.blocks, 3);
    assert!(!capturer.source().is_open());
    assert_eq!(capturer.source().opens(), 1);
    let types = transport.sent_types();
    assert_eq!(types.iter().filter(|t| **t == "response.create").count(), 1);
    assert_eq!(types.iter().filter(|t| **t == "input_audio_buffer.commit").count(), 1);
    assert_eq!(types.last(), Some(&"response.create"));
}

#[tokio::test]
async fn refused_connection_leaves_the_session_disconnected() {
    let transport = FakeTransport::refusing();
    let mut session = StreamSession::new(transport.clone());

    let err = session.connect().await.unwrap_err();

    assert!(matches!(err, Error::ConnectionFailure(_)));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(matches!(session.send_text("hello?").await, Err(Error::NotConnected)));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn reconnect_starts_with_an_empty_conversation() {
    let transport = FakeTransport::default();
    let mut session = StreamSession::new(transport.clone());
    let mut updates = collect_updates(&mut session);
    session.connect().await.unwrap();

    transport
        .emit(json!({
            "type": "conversation.item.created",
            "event_id": "event_1",
            "item": { "id": "item_1", "type": "message", "status": "completed", "role": "user", "content": [] }
        }))
        .await;
    next_update(&mut updates).await;
    assert_eq!(session.items().len(), 1);

    session.disconnect().await;
    session.connect().await.unwrap();

    assert!(session.is_connected());
    assert!(session.items().is_empty());
}
