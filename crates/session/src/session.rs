use std::sync::Arc;

use chrono::Utc;
use plume_api::{ChatBackend, MessageDto, PushFrameStream, SseFrame};
use tokio::sync::{mpsc, watch};

use crate::action::{Action, SendOutcome};
use crate::dispatch::{Dispatched, EventDispatcher, sender_from_wire};
use crate::engine::Engine;
use crate::message::{ConversationId, Message, MessageId};
use crate::view::{SessionSnapshot, project_messages};

/// Requests a frontend sends to the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Makes a conversation active: the previous engine state is discarded,
    /// history is hydrated from the backend, and the event filter re-arms.
    Activate { conversation_id: ConversationId },
    /// Submits user-typed content against the active conversation.
    Submit { content: String },
    /// Removes a failed message and recovers its content as the draft.
    Retry { message_id: MessageId },
    Shutdown,
}

/// Why a submission was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    Disconnected,
    NoActiveConversation,
    EmptyContent,
    GenerationInFlight,
}

impl std::fmt::Display for SubmitRejection {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Disconnected => "push channel is not connected",
            Self::NoActiveConversation => "no conversation is active",
            Self::EmptyContent => "content is empty",
            Self::GenerationInFlight => "a generation is already in flight",
        };
        formatter.write_str(text)
    }
}

/// Send outcome routed back into the loop, tagged with the conversation the
/// send belonged to so results outlive conversation switches safely.
#[derive(Debug)]
struct SendResultEnvelope {
    conversation_id: ConversationId,
    outcome: SendOutcome,
}

/// Cloneable handle for talking to a running session loop.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Enqueues a command; returns false once the loop has shut down.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// A fresh receiver over the reconciled snapshots.
    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

/// The session runtime: one cooperative loop interleaving user commands,
/// send results, and push frames. All store mutation happens here, so
/// ordering is by arrival and nothing observes a half-applied step.
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    user_id: i64,
    dispatcher: EventDispatcher,
    engine: Option<Engine>,
    connected: bool,
    channel_open: bool,
    draft: Option<String>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    frames: PushFrameStream,
    send_results_tx: mpsc::UnboundedSender<SendResultEnvelope>,
    send_results_rx: mpsc::UnboundedReceiver<SendResultEnvelope>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl ChatSession {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        user_id: i64,
        frames: PushFrameStream,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (send_results_tx, send_results_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let session = Self {
            backend,
            user_id,
            dispatcher: EventDispatcher::new(),
            engine: None,
            connected: false,
            channel_open: true,
            draft: None,
            commands: command_rx,
            frames,
            send_results_tx,
            send_results_rx,
            snapshot_tx,
        };

        let handle = SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        };

        (session, handle)
    }

    /// Runs until `Shutdown` or every command sender is dropped.
    pub async fn run(mut self) {
        self.publish_snapshot();

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        None | Some(SessionCommand::Shutdown) => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                Some(envelope) = self.send_results_rx.recv() => {
                    self.handle_send_result(envelope);
                }
                frame = self.frames.recv(), if self.channel_open => {
                    match frame {
                        Some(frame) => self.handle_frame(&frame),
                        None => {
                            // No automatic reconnection: the channel stays
                            // down until the embedder re-establishes it.
                            self.channel_open = false;
                            self.connected = false;
                            tracing::warn!("push channel closed; session is now disconnected");
                        }
                    }
                }
            }

            self.publish_snapshot();
        }

        tracing::debug!("session loop stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Activate { conversation_id } => {
                self.activate(conversation_id).await;
            }
            SessionCommand::Submit { content } => {
                if let Err(rejection) = self.try_submit(&content) {
                    tracing::warn!(rejection = %rejection, "submission rejected");
                }
            }
            SessionCommand::Retry { message_id } => self.retry(&message_id),
            SessionCommand::Shutdown => {}
        }
    }

    async fn activate(&mut self, conversation_id: ConversationId) {
        if self.dispatcher.active_conversation() == Some(conversation_id) {
            return;
        }

        // Switching discards the previous engine outright; events for the
        // old conversation are inert from here on.
        self.dispatcher.set_active(Some(conversation_id));
        self.draft = None;

        let engine = match self
            .backend
            .list_messages(conversation_id.0, self.user_id)
            .await
        {
            Ok(history) => Engine::hydrate(
                conversation_id,
                history
                    .into_iter()
                    .map(|dto| history_message(conversation_id, dto))
                    .collect(),
            ),
            Err(error) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "failed to load conversation history"
                );
                let mut engine = Engine::new(conversation_id);
                engine.note_error("failed to load messages; showing an empty conversation");
                engine
            }
        };

        self.engine = Some(engine);
    }

    /// Submission preconditions, checked in order; the optimistic insert and
    /// the asynchronous send only happen when every one holds.
    pub fn try_submit(&mut self, content: &str) -> Result<(), SubmitRejection> {
        if !self.connected {
            return Err(SubmitRejection::Disconnected);
        }
        let Some(engine) = self.engine.as_mut() else {
            return Err(SubmitRejection::NoActiveConversation);
        };
        let content = content.trim();
        if content.is_empty() {
            return Err(SubmitRejection::EmptyContent);
        }
        if engine.generation_in_flight() {
            return Err(SubmitRejection::GenerationInFlight);
        }

        self.draft = None;
        engine.apply(Action::Submit {
            content: content.to_string(),
            submitted_at: Utc::now(),
        });

        let conversation_id = engine.conversation_id();
        self.spawn_send(conversation_id, content.to_string());
        Ok(())
    }

    fn spawn_send(&self, conversation_id: ConversationId, content: String) {
        let backend = Arc::clone(&self.backend);
        let results = self.send_results_tx.clone();
        let user_id = self.user_id;

        tokio::spawn(async move {
            let outcome = match backend.send_chat(conversation_id.0, user_id, content).await {
                Ok(()) => SendOutcome::Delivered,
                Err(error) => SendOutcome::Failed {
                    reason: error.to_string(),
                },
            };
            let _ = results.send(SendResultEnvelope {
                conversation_id,
                outcome,
            });
        });
    }

    fn handle_send_result(&mut self, envelope: SendResultEnvelope) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        if engine.conversation_id() != envelope.conversation_id {
            tracing::debug!(
                result_conversation = %envelope.conversation_id,
                active_conversation = %engine.conversation_id(),
                "dropped stale send result after conversation switch"
            );
            return;
        }

        engine.apply(Action::SendResult {
            outcome: envelope.outcome,
        });
    }

    fn handle_frame(&mut self, frame: &SseFrame) {
        match self.dispatcher.dispatch(frame) {
            Some(Dispatched::Connected { connection_id }) => {
                self.connected = true;
                tracing::info!(connection_id = %connection_id, "push channel connected");
            }
            Some(Dispatched::Action(action)) => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.apply(action);
                }
            }
            None => {}
        }
    }

    fn retry(&mut self, message_id: &MessageId) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        // Retry is purely local: the row disappears and its content comes
        // back as the draft. Nothing is resent automatically.
        match engine.take_failed(message_id) {
            Some(content) => self.draft = Some(content),
            None => {
                tracing::warn!(message_id = %message_id, "retry target is not a failed message");
            }
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = SessionSnapshot {
            conversation_id: self.dispatcher.active_conversation(),
            messages: self
                .engine
                .as_ref()
                .map(|engine| project_messages(engine.messages()))
                .unwrap_or_default(),
            ai_responding: self
                .engine
                .as_ref()
                .is_some_and(|engine| engine.ai_responding()),
            connected: self.connected,
            error: self
                .engine
                .as_ref()
                .and_then(|engine| engine.error_text().map(str::to_string)),
            draft: self.draft.clone(),
        };

        self.snapshot_tx.send_replace(snapshot);
    }
}

fn history_message(conversation_id: ConversationId, dto: MessageDto) -> Message {
    Message::durable(
        MessageId::durable(dto.id),
        conversation_id,
        sender_from_wire(dto.sender_type),
        dto.content,
        dto.created_at,
    )
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use plume_api::{ApiError, ApiResult, BoxFuture, ConversationDto, WireSender};

    use super::*;
    use crate::message::SenderType;

    struct ScriptedBackend {
        send_results: Mutex<VecDeque<ApiResult<()>>>,
        history: Mutex<HashMap<i64, Vec<MessageDto>>>,
        sent: Mutex<Vec<(i64, i64, String)>>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                send_results: Mutex::new(VecDeque::new()),
                history: Mutex::new(HashMap::new()),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn with_send_result(self, result: ApiResult<()>) -> Self {
            self.send_results.lock().unwrap().push_back(result);
            self
        }

        fn with_history(self, conversation_id: i64, messages: Vec<MessageDto>) -> Self {
            self.history
                .lock()
                .unwrap()
                .insert(conversation_id, messages);
            self
        }
    }

    impl ChatBackend for ScriptedBackend {
        fn send_chat(
            &self,
            conversation_id: i64,
            user_id: i64,
            content: String,
        ) -> BoxFuture<'_, ApiResult<()>> {
            Box::pin(async move {
                self.sent
                    .lock()
                    .unwrap()
                    .push((conversation_id, user_id, content));
                self.send_results
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or(Ok(()))
            })
        }

        fn list_conversations(
            &self,
            _user_id: i64,
        ) -> BoxFuture<'_, ApiResult<Vec<ConversationDto>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn create_conversation(
            &self,
            user_id: i64,
            title: String,
        ) -> BoxFuture<'_, ApiResult<ConversationDto>> {
            Box::pin(async move {
                Ok(ConversationDto {
                    id: 1,
                    user_id,
                    title,
                    created_at: None,
                    updated_at: None,
                    message_count: None,
                    last_message: None,
                })
            })
        }

        fn delete_conversation(
            &self,
            _conversation_id: i64,
            _user_id: i64,
        ) -> BoxFuture<'_, ApiResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn list_messages(
            &self,
            conversation_id: i64,
            _user_id: i64,
        ) -> BoxFuture<'_, ApiResult<Vec<MessageDto>>> {
            Box::pin(async move {
                Ok(self
                    .history
                    .lock()
                    .unwrap()
                    .get(&conversation_id)
                    .cloned()
                    .unwrap_or_default())
            })
        }
    }

    fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: event.to_string(),
            data: data.to_string(),
        }
    }

    async fn wait_for<F>(
        snapshots: &mut watch::Receiver<SessionSnapshot>,
        predicate: F,
    ) -> SessionSnapshot
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                {
                    let snapshot = snapshots.borrow();
                    if predicate(&snapshot) {
                        return snapshot.clone();
                    }
                }
                snapshots
                    .changed()
                    .await
                    .expect("session loop ended before the expected snapshot");
            }
        })
        .await
        .expect("timed out waiting for snapshot")
    }

    fn start(backend: &Arc<ScriptedBackend>) -> (mpsc::UnboundedSender<SseFrame>, SessionHandle) {
        let (frame_tx, frames) = plume_api::channel();
        let (session, handle) =
            ChatSession::new(backend.clone() as Arc<dyn ChatBackend>, 1, frames);
        tokio::spawn(session.run());
        (frame_tx, handle)
    }

    async fn connect_and_activate(
        frame_tx: &mpsc::UnboundedSender<SseFrame>,
        handle: &SessionHandle,
        conversation_id: i64,
    ) -> watch::Receiver<SessionSnapshot> {
        let mut snapshots = handle.snapshots();
        frame_tx.send(frame("connect", "42")).unwrap();
        handle.send(SessionCommand::Activate {
            conversation_id: ConversationId::new(conversation_id),
        });
        wait_for(&mut snapshots, |snapshot| {
            snapshot.connected && snapshot.conversation_id == Some(ConversationId::new(conversation_id))
        })
        .await;
        snapshots
    }

    #[tokio::test]
    async fn submit_streams_and_settles_through_the_loop() {
        let backend = Arc::new(ScriptedBackend::new());
        let (frame_tx, handle) = start(&backend);
        let mut snapshots = connect_and_activate(&frame_tx, &handle, 7).await;

        handle.send(SessionCommand::Submit {
            content: "hi".to_string(),
        });
        wait_for(&mut snapshots, |snapshot| snapshot.ai_responding).await;

        frame_tx
            .send(frame("ai-chunk", r#"{"conversationId":7,"content":"He"}"#))
            .unwrap();
        frame_tx
            .send(frame("ai-chunk", r#"{"conversationId":7,"content":"llo"}"#))
            .unwrap();
        wait_for(&mut snapshots, |snapshot| {
            snapshot
                .messages
                .last()
                .is_some_and(|row| row.content == "Hello")
        })
        .await;

        frame_tx
            .send(frame(
                "ai-final",
                r#"{"id":41,"conversationId":7,"senderType":2,"content":"Hello","createdAt":"2026-08-08T12:00:00Z"}"#,
            ))
            .unwrap();

        let settled = wait_for(&mut snapshots, |snapshot| !snapshot.ai_responding).await;
        assert_eq!(settled.messages.len(), 2);
        assert_eq!(settled.messages[0].sender_type, SenderType::User);
        assert!(!settled.messages[0].pending);
        assert_eq!(settled.messages[1].content, "Hello");
        assert!(!settled.messages[1].streaming);
        assert!(settled.error.is_none());
        assert_eq!(
            backend.sent.lock().unwrap().as_slice(),
            &[(7, 1, "hi".to_string())]
        );

        handle.send(SessionCommand::Shutdown);
    }

    #[tokio::test]
    async fn send_failure_surfaces_error_and_supports_retry() {
        let backend = Arc::new(ScriptedBackend::new().with_send_result(Err(ApiError::Status {
            stage: "send-chat-status",
            status: 503,
            body: "unavailable".to_string(),
        })));
        let (frame_tx, handle) = start(&backend);
        let mut snapshots = connect_and_activate(&frame_tx, &handle, 7).await;

        handle.send(SessionCommand::Submit {
            content: "hi".to_string(),
        });

        let failed = wait_for(&mut snapshots, |snapshot| snapshot.error.is_some()).await;
        assert_eq!(failed.messages.len(), 1);
        assert!(failed.messages[0].failed);
        assert!(!failed.ai_responding);

        // A retry aimed at a non-failed id is a logged no-op.
        handle.send(SessionCommand::Retry {
            message_id: MessageId::durable(0),
        });
        handle.send(SessionCommand::Retry {
            message_id: failed.messages[0].id.clone(),
        });

        let drafted = wait_for(&mut snapshots, |snapshot| snapshot.draft.is_some()).await;
        assert_eq!(drafted.draft.as_deref(), Some("hi"));
        assert!(drafted.messages.is_empty());

        handle.send(SessionCommand::Shutdown);
    }

    #[tokio::test]
    async fn events_for_inactive_conversations_never_touch_the_store() {
        let (frame_tx, handle) = start(&Arc::new(ScriptedBackend::new()));
        let mut snapshots = connect_and_activate(&frame_tx, &handle, 7).await;

        frame_tx
            .send(frame(
                "new-message",
                r#"{"id":9,"conversationId":8,"senderType":2,"content":"other","createdAt":"2026-08-08T12:00:00Z"}"#,
            ))
            .unwrap();
        frame_tx
            .send(frame(
                "new-message",
                r#"{"id":10,"conversationId":7,"senderType":2,"content":"mine","createdAt":"2026-08-08T12:00:00Z"}"#,
            ))
            .unwrap();

        let snapshot = wait_for(&mut snapshots, |snapshot| !snapshot.messages.is_empty()).await;
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].content, "mine");

        handle.send(SessionCommand::Shutdown);
    }

    #[tokio::test]
    async fn activation_hydrates_history_in_order() {
        let created_at = Utc.with_ymd_and_hms(2026, 8, 8, 11, 0, 0).unwrap();
        let backend = ScriptedBackend::new().with_history(
            7,
            vec![
                MessageDto {
                    id: 1,
                    conversation_id: 7,
                    sender_type: WireSender::User,
                    content: "earlier".to_string(),
                    created_at,
                },
                MessageDto {
                    id: 2,
                    conversation_id: 7,
                    sender_type: WireSender::Assistant,
                    content: "reply".to_string(),
                    created_at,
                },
            ],
        );
        let (frame_tx, handle) = start(&Arc::new(backend));
        let mut snapshots = connect_and_activate(&frame_tx, &handle, 7).await;

        let snapshot = wait_for(&mut snapshots, |snapshot| snapshot.messages.len() == 2).await;
        assert_eq!(snapshot.messages[0].content, "earlier");
        assert_eq!(snapshot.messages[1].content, "reply");
        assert!(!snapshot.ai_responding);

        handle.send(SessionCommand::Shutdown);
    }

    #[tokio::test]
    async fn submissions_are_rejected_until_connected() {
        let backend = ScriptedBackend::new();
        let (frame_tx, frames) = plume_api::channel();
        let (mut session, _handle) = ChatSession::new(Arc::new(backend), 1, frames);

        assert_eq!(
            session.try_submit("hi"),
            Err(SubmitRejection::Disconnected)
        );

        session.connected = true;
        assert_eq!(
            session.try_submit("hi"),
            Err(SubmitRejection::NoActiveConversation)
        );

        session.engine = Some(Engine::new(ConversationId::new(7)));
        assert_eq!(session.try_submit("   "), Err(SubmitRejection::EmptyContent));

        drop(frame_tx);
    }

    #[tokio::test]
    async fn channel_close_flips_connected_off() {
        let (frame_tx, handle) = start(&Arc::new(ScriptedBackend::new()));
        let mut snapshots = handle.snapshots();

        frame_tx.send(frame("connect", "42")).unwrap();
        wait_for(&mut snapshots, |snapshot| snapshot.connected).await;

        drop(frame_tx);
        let snapshot = wait_for(&mut snapshots, |snapshot| !snapshot.connected).await;
        assert!(!snapshot.connected);

        handle.send(SessionCommand::Shutdown);
    }
}
