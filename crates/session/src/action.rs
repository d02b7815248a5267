use chrono::{DateTime, Utc};

use crate::message::{ConversationId, MessageId, SenderType};

/// A server-confirmed message as seen by the engine, already mapped out of
/// wire types by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_type: SenderType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Terminal outcome of one outbound send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Failed { reason: String },
}

/// Reducer input: every mutation of the message list is one of these.
///
/// Local user actions and push-channel events share the union so a single
/// consumption loop can apply them in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Submit {
        content: String,
        submitted_at: DateTime<Utc>,
    },
    SendResult {
        outcome: SendOutcome,
    },
    Chunk {
        content: String,
    },
    Final {
        message: IncomingMessage,
    },
    EndMarker,
    NewMessage {
        message: IncomingMessage,
    },
    Error {
        error: String,
    },
}
