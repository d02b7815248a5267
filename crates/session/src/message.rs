use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Stable identifier for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub i64);

impl ConversationId {
    /// Creates a typed conversation identifier.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Identifier for one message.
///
/// Temporary ids are minted locally at optimistic-insert time; durable ids
/// come from the server. A message swaps temporary for durable at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    const TEMP_USER_PREFIX: &'static str = "temp-";
    const TEMP_ASSISTANT_PREFIX: &'static str = "ai-temp-";

    /// Mints a fresh temporary id for an optimistic user message.
    pub fn temp_user() -> Self {
        Self(format!("{}{}", Self::TEMP_USER_PREFIX, Uuid::new_v4()))
    }

    /// Mints a fresh temporary id for a streaming assistant placeholder.
    pub fn temp_assistant() -> Self {
        Self(format!("{}{}", Self::TEMP_ASSISTANT_PREFIX, Uuid::new_v4()))
    }

    /// Wraps a server-assigned durable id.
    pub fn durable(raw: i64) -> Self {
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Chat speaker kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SenderType {
    User,
    Assistant,
}

/// One row in the reconciled message list.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_type: SenderType,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// True until the remote side confirms the corresponding durable record.
    pub temporary: bool,
    /// True only while this row is receiving incremental content.
    pub streaming: bool,
    /// True only for a user message whose send never reached the remote.
    pub failed: bool,
}

impl Message {
    /// Creates the optimistic user message appended at submit time.
    pub fn optimistic_user(
        conversation_id: ConversationId,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::temp_user(),
            conversation_id,
            sender_type: SenderType::User,
            content: content.into(),
            created_at,
            temporary: true,
            streaming: false,
            failed: false,
        }
    }

    /// Creates the empty streaming assistant placeholder paired with a submit.
    pub fn streaming_placeholder(
        conversation_id: ConversationId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::temp_assistant(),
            conversation_id,
            sender_type: SenderType::Assistant,
            content: String::new(),
            created_at,
            temporary: true,
            streaming: true,
            failed: false,
        }
    }

    /// Creates a settled row from a server-confirmed record.
    pub fn durable(
        id: MessageId,
        conversation_id: ConversationId,
        sender_type: SenderType,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_type,
            content: content.into(),
            created_at,
            temporary: false,
            streaming: false,
            failed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_ids_are_unique_and_prefixed() {
        let first = MessageId::temp_user();
        let second = MessageId::temp_user();

        assert_ne!(first, second);
        assert!(first.as_str().starts_with("temp-"));
        assert!(MessageId::temp_assistant().as_str().starts_with("ai-temp-"));
    }

    #[test]
    fn optimistic_pair_starts_with_expected_flags() {
        let now = Utc::now();
        let user = Message::optimistic_user(ConversationId::new(1), "hi", now);
        let placeholder = Message::streaming_placeholder(ConversationId::new(1), now);

        assert!(user.temporary && !user.streaming && !user.failed);
        assert!(placeholder.temporary && placeholder.streaming && !placeholder.failed);
        assert!(placeholder.content.is_empty());
        assert_eq!(placeholder.sender_type, SenderType::Assistant);
    }
}
