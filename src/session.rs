use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::client::{RealtimeTransport, ServerRx};
use crate::conversation::{ConversationItem, ConversationLedger, ConversationUpdated, EventTracker};
use crate::error::{Error, Result};
use crate::types::events::client::{
    ConversationItemCreateEvent, InputAudioBufferAppendEvent, InputAudioBufferCommitEvent, ResponseCreateEvent,
    SessionUpdateEvent,
};
use crate::types::audio::TurnDetection;
use crate::types::session::Session;
use crate::types::{ClientEvent, Content, Item, MessageItem, MessageRole, ServerEvent};
use crate::utils::audio;

mod stats;

pub use stats::Stats;

pub type UpdateHandler = Box<dyn FnMut(&ConversationUpdated) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// One connection lifecycle to the realtime service.
///
/// Holds the merged session configuration, sends client events through the
/// transport and folds inbound events into a [`ConversationLedger`] on a
/// single pump task, so the registered handler is never called concurrently.
pub struct StreamSession<T> {
    transport: T,
    state: SessionState,
    config: Session,
    ledger: Arc<Mutex<ConversationLedger>>,
    handler: Arc<Mutex<Option<UpdateHandler>>>,
    stats: Arc<Mutex<Stats>>,
    pump: Option<JoinHandle<()>>,
    // samples appended since the last explicit commit
    pending_audio_samples: usize,
}

impl<T: RealtimeTransport> StreamSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: SessionState::Disconnected,
            config: Session::default(),
            ledger: Arc::new(Mutex::new(ConversationLedger::new())),
            handler: Arc::new(Mutex::new(None)),
            stats: Arc::new(Mutex::new(Stats::new())),
            pump: None,
            pending_audio_samples: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// The configuration merged from every `configure` call so far.
    pub fn config(&self) -> &Session {
        &self.config
    }

    /// Merges a partial configuration. Once connected the merged result is
    /// pushed to the service right away; before that it goes out on connect.
    pub async fn configure(&mut self, update: Session) -> Result<()> {
        self.config.merge(update);
        if self.is_connected() {
            let event = ClientEvent::SessionUpdate(SessionUpdateEvent::new(self.config.clone()));
            self.send(event).await?;
        }
        Ok(())
    }

    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Connected => return Err(Error::AlreadyConnected),
            // a previous attempt was dropped mid-handshake
            SessionState::Connecting => self.transport.close().await,
            SessionState::Disconnected => {}
        }

        self.state = SessionState::Connecting;
        let server_rx = match self.transport.connect().await {
            Ok(server_rx) => server_rx,
            Err(e) => {
                self.state = SessionState::Disconnected;
                tracing::error!("connect failed: {:#}", e);
                return Err(Error::ConnectionFailure(format!("{e:#}")));
            }
        };

        if let Ok(mut stats) = self.stats.lock() {
            *stats = Stats::new();
        }
        self.pump = Some(self.spawn_pump(server_rx));
        self.state = SessionState::Connected;

        if !self.config.is_empty() {
            let event = ClientEvent::SessionUpdate(SessionUpdateEvent::new(self.config.clone()));
            if let Err(e) = self.transport.send(event).await {
                tracing::error!("failed to apply session configuration: {:#}", e);
                self.teardown().await;
                return Err(Error::ConnectionFailure(format!(
                    "failed to apply session configuration: {e:#}"
                )));
            }
        }

        tracing::info!("session connected");
        Ok(())
    }

    /// Closes the connection and clears the ledger. No-op when disconnected.
    pub async fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.teardown().await;
        tracing::info!("session disconnected");
    }

    /// Registers the handler for `conversation.updated`, replacing any previous one.
    pub fn on_conversation_updated<F>(&mut self, handler: F)
    where
        F: FnMut(&ConversationUpdated) + Send + 'static,
    {
        match self.handler.lock() {
            Ok(mut slot) => *slot = Some(Box::new(handler)),
            Err(_) => tracing::error!("failed to register conversation handler"),
        }
    }

    /// Sends a user text message and asks for a response.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send_user_content(vec![Content::input_text(text)]).await
    }

    /// Sends a user message with arbitrary content parts and asks for a response.
    pub async fn send_user_content(&mut self, content: Vec<Content>) -> Result<()> {
        self.ensure_connected()?;

        let message = content
            .into_iter()
            .fold(MessageItem::builder().with_role(MessageRole::User), |builder, part| {
                builder.with_content(part)
            })
            .build();
        let event = ClientEvent::ConversationItemCreate(ConversationItemCreateEvent::new(Item::Message(message)));
        self.send(event).await?;
        self.commit_and_respond().await
    }

    /// Appends one PCM16 block to the service's input buffer. Empty blocks send nothing.
    pub async fn append_audio(&mut self, pcm16: &[i16]) -> Result<()> {
        self.ensure_connected()?;
        if pcm16.is_empty() {
            return Ok(());
        }

        let event = ClientEvent::InputAudioBufferAppend(InputAudioBufferAppendEvent::new(audio::pcm16_to_base64(pcm16)));
        self.send(event).await?;

        self.pending_audio_samples += pcm16.len();
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_audio(pcm16.len());
        }
        Ok(())
    }

    /// Asks the service to respond. With manual turn detection any buffered
    /// audio is committed first; with server VAD (also the service's default
    /// when turn detection was never configured) the service commits on its own.
    pub async fn commit_and_respond(&mut self) -> Result<()> {
        self.ensure_connected()?;

        if self.manual_turns() && self.pending_audio_samples > 0 {
            self.send(ClientEvent::InputAudioBufferCommit(InputAudioBufferCommitEvent::new()))
                .await?;
            self.pending_audio_samples = 0;
        }
        self.send(ClientEvent::ResponseCreate(ResponseCreateEvent::new())).await
    }

    /// Snapshot of the ledger in conversation order.
    pub fn items(&self) -> Vec<ConversationItem> {
        match self.ledger.lock() {
            Ok(ledger) => ledger.items(),
            Err(_) => {
                tracing::error!("failed to read conversation ledger");
                Vec::new()
            }
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats.lock().map(|stats| stats.clone()).unwrap_or_default()
    }

    fn manual_turns(&self) -> bool {
        matches!(self.config.turn_detection(), Some(TurnDetection::Manual))
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn send(&mut self, event: ClientEvent) -> Result<()> {
        let event_type = event.event_type();
        self.transport.send(event).await.map_err(|e| {
            tracing::error!("failed to send {}: {:#}", event_type, e);
            Error::TransportSendFailure(format!("{e:#}"))
        })
    }

    async fn teardown(&mut self) {
        self.transport.close().await;
        if let Some(pump) = self.pump.take() {
            pump.abort();
            // wait for the abort so no late update lands after the clear
            let _ = pump.await;
        }
        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.clear();
        }
        self.pending_audio_samples = 0;
        self.state = SessionState::Disconnected;
    }

    fn spawn_pump(&self, mut server_rx: ServerRx) -> JoinHandle<()> {
        let ledger = self.ledger.clone();
        let handler = self.handler.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let mut tracker = EventTracker::new();
            while let Some(event) = server_rx.recv().await {
                match &event {
                    ServerEvent::Error(error) => {
                        tracing::error!("service error: {}", error.error());
                    }
                    ServerEvent::SessionCreated(created) => {
                        tracing::info!("session created: {}", created.session().id());
                    }
                    ServerEvent::SessionUpdated(updated) => {
                        tracing::debug!("session updated: {:?}", updated.session().session());
                    }
                    ServerEvent::ResponseDone(done) => {
                        let usage = done.response().usage().copied().unwrap_or_default();
                        tracing::debug!(
                            "response {} done, total_tokens: {}, input_tokens: {}, output_tokens: {}",
                            done.response().id(),
                            usage.total_tokens(),
                            usage.input_tokens(),
                            usage.output_tokens()
                        );
                        if let Ok(mut stats) = stats.lock() {
                            stats.record_response(usage.total_tokens(), usage.input_tokens(), usage.output_tokens());
                        }
                    }
                    _ => {}
                }

                let Some(update) = tracker.process(&event) else {
                    continue;
                };

                match ledger.lock() {
                    Ok(mut ledger) => ledger.apply(&update),
                    Err(_) => {
                        tracing::error!("conversation ledger poisoned, stopping event pump");
                        break;
                    }
                }
                if let Ok(mut handler) = handler.lock() {
                    if let Some(handler) = handler.as_mut() {
                        handler(&update);
                    }
                }
            }
            tracing::debug!("server event stream ended");
        })
    }
}

impl<T> Drop for StreamSession<T> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockRealtimeTransport;
    use crate::types::audio::Voice;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn recorded(mock: &mut MockRealtimeTransport) -> Arc<Mutex<Vec<ClientEvent>>> {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        mock.expect_send().returning(move |event| {
            log.lock().unwrap().push(event);
            Ok(())
        });
        sent
    }

    fn types_of(sent: &Arc<Mutex<Vec<ClientEvent>>>) -> Vec<&'static str> {
        sent.lock().unwrap().iter().map(ClientEvent::event_type).collect()
    }

    fn connected_mock() -> (MockRealtimeTransport, mpsc::Sender<ServerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let mut mock = MockRealtimeTransport::new();
        mock.expect_connect().times(1).return_once(move || Ok(rx));
        mock.expect_close().returning(|| ());
        (mock, tx)
    }

    #[tokio::test]
    async fn connect_success_reports_connected() {
        let (mut mock, _tx) = connected_mock();
        mock.expect_send().never();
        let mut session = StreamSession::new(mock);
        assert!(!session.is_connected());

        session.connect().await.unwrap();

        assert!(session.is_connected());
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn connect_failure_returns_to_disconnected() {
        let mut mock = MockRealtimeTransport::new();
        mock.expect_connect()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("handshake refused")));
        mock.expect_send().never();
        let mut session = StreamSession::new(mock);

        let err = session.connect().await.unwrap_err();

        assert!(matches!(err, Error::ConnectionFailure(ref msg) if msg.contains("handshake refused")));
        assert!(!session.is_connected());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn sends_before_connect_fail_without_io() {
        let mut mock = MockRealtimeTransport::new();
        mock.expect_send().never();
        mock.expect_connect().never();
        let mut session = StreamSession::new(mock);

        assert!(matches!(session.send_text("hi").await, Err(Error::NotConnected)));
        assert!(matches!(session.append_audio(&[1, 2, 3]).await, Err(Error::NotConnected)));
        assert!(matches!(session.append_audio(&[]).await, Err(Error::NotConnected)));
        assert!(matches!(session.commit_and_respond().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn configure_before_connect_is_pushed_on_connect() {
        let (mut mock, _tx) = connected_mock();
        let sent = recorded(&mut mock);
        let mut session = StreamSession::new(mock);

        session.configure(Session::new().with_voice(Voice::Alloy).build()).await.unwrap();
        session
            .configure(Session::new().with_turn_detection(TurnDetection::server_vad()).build())
            .await
            .unwrap();
        assert!(sent.lock().unwrap().is_empty());

        session.connect().await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            ClientEvent::SessionUpdate(update) => {
                assert_eq!(update.session().voice(), Some(&Voice::Alloy));
                assert_eq!(update.session().turn_detection(), Some(&TurnDetection::server_vad()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_configuration_push_fails_the_connect() {
        let (mut mock, _tx) = connected_mock();
        mock.expect_send()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("socket closed")));
        let mut session = StreamSession::new(mock);
        session.configure(Session::new().with_voice(Voice::Alloy).build()).await.unwrap();

        let err = session.connect().await.unwrap_err();

        assert!(matches!(err, Error::ConnectionFailure(_)));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let (mut mock, _tx) = connected_mock();
        mock.expect_send().never();
        let mut session = StreamSession::new(mock);
        session.connect().await.unwrap();

        assert!(matches!(session.connect().await, Err(Error::AlreadyConnected)));
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn send_failure_keeps_the_connection() {
        let (mut mock, _tx) = connected_mock();
        mock.expect_send().returning(|_| Err(anyhow::anyhow!("write timed out")));
        let mut session = StreamSession::new(mock);
        session.connect().await.unwrap();

        let err = session.append_audio(&[1, 2, 3]).await.unwrap_err();

        assert!(matches!(err, Error::TransportSendFailure(_)));
        assert!(session.is_connected());
        assert_eq!(session.stats().audio_blocks(), 0);
    }

    #[tokio::test]
    async fn manual_turns_commit_pending_audio() {
        let (mut mock, _tx) = connected_mock();
        let sent = recorded(&mut mock);
        let mut session = StreamSession::new(mock);
        session
            .configure(Session::new().with_turn_detection(TurnDetection::Manual).build())
            .await
            .unwrap();
        session.connect().await.unwrap();

        session.append_audio(&[1, 2]).await.unwrap();
        session.append_audio(&[]).await.unwrap();
        session.commit_and_respond().await.unwrap();
        session.commit_and_respond().await.unwrap();

        assert_eq!(
            types_of(&sent),
            [
                "session.update",
                "input_audio_buffer.append",
                "input_audio_buffer.commit",
                "response.create",
                "response.create"
            ]
        );
        assert_eq!(session.stats().audio_blocks(), 1);
        assert_eq!(session.stats().audio_samples(), 2);
    }

    #[tokio::test]
    async fn server_vad_leaves_commit_to_the_service() {
        let (mut mock, _tx) = connected_mock();
        let sent = recorded(&mut mock);
        let mut session = StreamSession::new(mock);
        session
            .configure(Session::new().with_turn_detection(TurnDetection::server_vad()).build())
            .await
            .unwrap();
        session.connect().await.unwrap();

        session.append_audio(&[1, 2]).await.unwrap();
        session.commit_and_respond().await.unwrap();

        assert_eq!(
            types_of(&sent),
            ["session.update", "input_audio_buffer.append", "response.create"]
        );
    }

    #[tokio::test]
    async fn unconfigured_turns_follow_the_service_default() {
        let (mut mock, _tx) = connected_mock();
        let sent = recorded(&mut mock);
        let mut session = StreamSession::new(mock);
        session.connect().await.unwrap();

        session.append_audio(&[1, 2, 3]).await.unwrap();
        session.commit_and_respond().await.unwrap();

        assert_eq!(types_of(&sent), ["input_audio_buffer.append", "response.create"]);
    }

    #[tokio::test]
    async fn empty_audio_message_creates_an_item_then_a_response() {
        let (mut mock, _tx) = connected_mock();
        let sent = recorded(&mut mock);
        let mut session = StreamSession::new(mock);
        session.connect().await.unwrap();

        session
            .send_user_content(vec![Content::input_audio(String::new())])
            .await
            .unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let ClientEvent::ConversationItemCreate(create) = &sent[0] else {
            panic!("expected conversation.item.create, got {:?}", sent[0]);
        };
        let Item::Message(message) = create.item() else {
            panic!("expected a message item");
        };
        assert_eq!(message.role(), MessageRole::User);
        match &message.content()[..] {
            [Content::InputAudio(part)] => assert_eq!(part.audio(), Some("")),
            other => panic!("unexpected content: {other:?}"),
        }
        assert!(matches!(sent[1], ClientEvent::ResponseCreate(_)));
    }

    #[tokio::test]
    async fn send_text_creates_a_user_item_then_a_response() {
        let (mut mock, _tx) = connected_mock();
        let sent = recorded(&mut mock);
        let mut session = StreamSession::new(mock);
        session.connect().await.unwrap();

        session.send_text("How are you?").await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let ClientEvent::ConversationItemCreate(create) = &sent[0] else {
            panic!("expected conversation.item.create, got {:?}", sent[0]);
        };
        let Item::Message(message) = create.item() else {
            panic!("expected a message item");
        };
        assert_eq!(message.role(), MessageRole::User);
        assert_eq!(message.content()[0].text(), Some("How are you?"));
        assert!(matches!(sent[1], ClientEvent::ResponseCreate(_)));
    }

    #[tokio::test]
    async fn inbound_events_reach_ledger_and_handler_in_order() {
        let (mut mock, tx) = connected_mock();
        mock.expect_send().never();
        let mut session = StreamSession::new(mock);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        session.on_conversation_updated(move |update| {
            let _ = seen_tx.send(update.item.id().to_string());
        });
        session.connect().await.unwrap();

        for id in ["a", "b", "c"] {
            let event = serde_json::from_value(serde_json::json!({
                "type": "conversation.item.created",
                "event_id": format!("event_{id}"),
                "item": { "id": id, "type": "message", "status": "completed", "role": "user", "content": [] }
            }))
            .unwrap();
            tx.send(event).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            let id = tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(id);
        }
        assert_eq!(seen, ["a", "b", "c"]);
        let ids: Vec<_> = session.items().iter().map(|item| item.id().to_string()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn disconnect_clears_the_ledger() {
        let (mut mock, tx) = connected_mock();
        mock.expect_send().never();
        let mut session = StreamSession::new(mock);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        session.on_conversation_updated(move |_| {
            let _ = seen_tx.send(());
        });
        session.connect().await.unwrap();

        let event = serde_json::from_value(serde_json::json!({
            "type": "conversation.item.created",
            "event_id": "event_1",
            "item": { "id": "a", "type": "message", "status": "completed", "role": "user", "content": [] }
        }))
        .unwrap();
        tx.send(event).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
            .await
            .unwrap();
        assert_eq!(session.items().len(), 1);

        session.disconnect().await;

        assert!(!session.is_connected());
        assert!(session.items().is_empty());
        assert!(matches!(session.send_text("late").await, Err(Error::NotConnected)));
    }
}
