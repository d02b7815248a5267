use crate::action::{Action, IncomingMessage, SendOutcome};
use crate::message::{ConversationId, Message, MessageId, SenderType};
use crate::store::MessageStore;

use chrono::{DateTime, Utc};

/// Width of the optimistic-echo matching window, in milliseconds.
///
/// Events can describe the same item through more than one path (a direct
/// completion event and the general broadcast); a content match this close
/// in time to a temporary row is treated as its authoritative echo.
pub const DEDUP_WINDOW_MS: i64 = 1000;

/// Generation phase for one conversation.
///
/// `Settled` covers both normal completion and failure; whether an error
/// was recorded distinguishes the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    AwaitingSend,
    Streaming,
    Settled,
}

/// The last known placeholder reference: enough to materialize the
/// streaming row again if a chunk arrives after it went missing.
#[derive(Debug, Clone, PartialEq)]
struct StreamingRef {
    id: MessageId,
    created_at: DateTime<Utc>,
}

/// The optimistic pair whose send outcome is still pending.
#[derive(Debug, Clone, PartialEq)]
struct PendingSubmission {
    user_id: MessageId,
    placeholder_id: MessageId,
}

/// Per-conversation reconciliation engine.
///
/// A single reducer maps (state, action) to new state; every mutation of
/// the message store goes through `apply`. The engine is discarded wholesale
/// when the viewer switches conversations.
#[derive(Debug)]
pub struct Engine {
    conversation_id: ConversationId,
    store: MessageStore,
    phase: Phase,
    current_streaming: Option<StreamingRef>,
    pending: Option<PendingSubmission>,
    last_error: Option<String>,
}

impl Engine {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            store: MessageStore::new(),
            phase: Phase::Idle,
            current_streaming: None,
            pending: None,
            last_error: None,
        }
    }

    /// Creates an engine seeded with settled history rows.
    pub fn hydrate(conversation_id: ConversationId, history: Vec<Message>) -> Self {
        Self {
            store: MessageStore::from_history(history),
            ..Self::new(conversation_id)
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    /// True between send success and the generation's terminal event.
    pub fn ai_responding(&self) -> bool {
        matches!(self.phase, Phase::Streaming)
    }

    /// True while a submission or its generation is outstanding; further
    /// submissions are rejected until this clears.
    pub fn generation_in_flight(&self) -> bool {
        matches!(self.phase, Phase::AwaitingSend | Phase::Streaming)
    }

    pub fn error_text(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Records an error that did not come through the reducer (for example
    /// a failed history load).
    pub fn note_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// Local retry support: removes a failed message and hands back its
    /// content for the input box. Nothing is resent.
    pub fn take_failed(&mut self, id: &MessageId) -> Option<String> {
        if !self.store.get(id).is_some_and(|message| message.failed) {
            return None;
        }
        self.store.remove(id).map(|message| message.content)
    }

    /// Applies one action. Every arm leaves the store in a valid state
    /// regardless of arrival order.
    pub fn apply(&mut self, action: Action) {
        match action {
            Action::Submit {
                content,
                submitted_at,
            } => self.apply_submit(content, submitted_at),
            Action::SendResult { outcome } => self.apply_send_result(outcome),
            Action::Chunk { content } => self.apply_chunk(content),
            Action::Final { message } => self.apply_final(message),
            Action::EndMarker => self.apply_end_marker(),
            Action::NewMessage { message } => {
                self.reconcile_incoming(message);
            }
            Action::Error { error } => self.apply_error(error),
        }
    }

    fn apply_submit(&mut self, content: String, submitted_at: DateTime<Utc>) {
        if self.generation_in_flight() {
            // The submission controller enforces the single-generation rule;
            // this guard keeps the reducer safe against direct misuse.
            tracing::warn!(
                conversation_id = %self.conversation_id,
                "submit ignored while a generation is in flight"
            );
            return;
        }

        self.last_error = None;

        let cleared = self.store.clear_streaming_flags();
        if cleared > 0 {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                cleared,
                "cleared stale streaming rows before submit"
            );
        }

        let user = Message::optimistic_user(self.conversation_id, content, submitted_at);
        let placeholder = Message::streaming_placeholder(self.conversation_id, submitted_at);

        self.current_streaming = Some(StreamingRef {
            id: placeholder.id.clone(),
            created_at: placeholder.created_at,
        });
        self.pending = Some(PendingSubmission {
            user_id: user.id.clone(),
            placeholder_id: placeholder.id.clone(),
        });

        self.store.append(user);
        self.store.append(placeholder);
        self.phase = Phase::AwaitingSend;
    }

    fn apply_send_result(&mut self, outcome: SendOutcome) {
        let Some(pending) = self.pending.take() else {
            tracing::debug!(
                conversation_id = %self.conversation_id,
                "send result with no pending submission; ignored"
            );
            return;
        };

        match outcome {
            SendOutcome::Delivered => {
                // The request confirmation carries no durable message id;
                // that arrives later through the broadcast path.
                self.store
                    .update(&pending.user_id, |message| message.temporary = false);
                if self.phase == Phase::AwaitingSend {
                    self.phase = Phase::Streaming;
                }
            }
            SendOutcome::Failed { reason } => {
                self.store.remove(&pending.placeholder_id);
                if self.streaming_ref_is(&pending.placeholder_id) {
                    self.current_streaming = None;
                }
                self.store.update(&pending.user_id, |message| {
                    message.failed = true;
                    message.streaming = false;
                });
                tracing::warn!(
                    conversation_id = %self.conversation_id,
                    reason = %reason,
                    "send failed; user message flagged for manual retry"
                );
                self.last_error = Some(reason);
                self.phase = Phase::Settled;
            }
        }
    }

    fn apply_chunk(&mut self, content: String) {
        if let Some(id) = self
            .store
            .streaming_message()
            .map(|message| message.id.clone())
        {
            self.store
                .update(&id, |message| message.content.push_str(&content));
            return;
        }

        let Some(reference) = self.current_streaming.clone() else {
            // No streaming row and no placeholder reference: this chunk
            // belongs to a generation that already reached a terminal event.
            tracing::debug!(
                conversation_id = %self.conversation_id,
                "chunk with no streaming target; ignored"
            );
            return;
        };

        // Restore the single-streaming invariant before materializing.
        let displaced = self.store.remove_streaming();
        if displaced > 0 {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                displaced,
                "removed stray streaming rows while materializing placeholder"
            );
        }

        self.store.append(Message {
            id: reference.id,
            conversation_id: self.conversation_id,
            sender_type: SenderType::Assistant,
            content,
            created_at: reference.created_at,
            temporary: true,
            streaming: true,
            failed: false,
        });
    }

    fn apply_final(&mut self, message: IncomingMessage) {
        let in_flight = self.generation_in_flight();

        if let Some(id) = self
            .store
            .streaming_message()
            .map(|streaming| streaming.id.clone())
        {
            // Keep the local id: the same item may arrive again through the
            // broadcast path and must dedup against this row, not join it.
            self.store.update(&id, |row| {
                row.sender_type = message.sender_type;
                row.content = message.content.clone();
                row.created_at = message.created_at;
                row.temporary = false;
                row.streaming = false;
                row.failed = false;
            });
        } else {
            self.reconcile_incoming(message);
        }

        self.current_streaming = None;
        if in_flight {
            self.phase = Phase::Settled;
        }
    }

    fn apply_end_marker(&mut self) {
        // Idempotent finalize: accumulated content stays as-is, but the row
        // is a confirmed reply now, so it stops being temporary. A final for
        // the same generation arriving later dedups by settled content.
        self.store.settle_streaming();
        self.current_streaming = None;
        if self.generation_in_flight() {
            self.phase = Phase::Settled;
        }
    }

    fn apply_error(&mut self, error: String) {
        let removed = self.store.remove_streaming();
        if removed > 0 {
            tracing::debug!(
                conversation_id = %self.conversation_id,
                removed,
                "discarded streaming rows after generation error"
            );
        }

        self.current_streaming = None;
        self.last_error = Some(error);
        if self.generation_in_flight() {
            self.phase = Phase::Settled;
        }
    }

    /// Dedup rule for broadcast arrivals and final-event fallback.
    /// Checks run in order; the first match wins.
    fn reconcile_incoming(&mut self, incoming: IncomingMessage) {
        // 1. Exact id match: already present, normalize flags only.
        if self.store.contains(&incoming.id) {
            self.store.update(&incoming.id, |row| {
                row.streaming = false;
                row.temporary = false;
            });
            if self.streaming_ref_is(&incoming.id) {
                self.current_streaming = None;
            }
            return;
        }

        // 2. A settled row with the same sender and content is the same item
        //    seen through another path.
        let settled_duplicate = self.store.messages().iter().any(|row| {
            !row.temporary
                && row.sender_type == incoming.sender_type
                && row.content == incoming.content
        });
        if settled_duplicate {
            tracing::debug!(
                conversation_id = %self.conversation_id,
                id = %incoming.id,
                "dropped broadcast duplicate of a settled row"
            );
            return;
        }

        // 3. A temporary row with matching sender/content created within the
        //    window is the optimistic insert this event confirms: replace it
        //    in place, adopting the durable id.
        let optimistic_echo = self
            .store
            .messages()
            .iter()
            .find(|row| {
                row.temporary
                    && row.sender_type == incoming.sender_type
                    && row.content == incoming.content
                    && (row.created_at - incoming.created_at)
                        .num_milliseconds()
                        .abs()
                        < DEDUP_WINDOW_MS
            })
            .map(|row| row.id.clone());

        if let Some(displaced) = optimistic_echo {
            let replacement = Message::durable(
                incoming.id,
                incoming.conversation_id,
                incoming.sender_type,
                incoming.content,
                incoming.created_at,
            );
            self.store.replace(&displaced, replacement);
            if self.streaming_ref_is(&displaced) {
                self.current_streaming = None;
            }
            return;
        }

        // 4. Genuinely new: append.
        self.store.append(Message::durable(
            incoming.id,
            incoming.conversation_id,
            incoming.sender_type,
            incoming.content,
            incoming.created_at,
        ));
    }

    fn streaming_ref_is(&self, id: &MessageId) -> bool {
        self.current_streaming
            .as_ref()
            .is_some_and(|reference| &reference.id == id)
    }
}
