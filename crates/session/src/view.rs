use chrono::{DateTime, Utc};

use crate::message::{ConversationId, Message, MessageId, SenderType};

/// One display row, a pure function of the stored message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub id: MessageId,
    pub sender_type: SenderType,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Awaiting remote confirmation (shown dimmed by frontends).
    pub pending: bool,
    /// Still receiving incremental content.
    pub streaming: bool,
    /// Send never reached the remote; eligible for manual retry.
    pub failed: bool,
}

impl MessageView {
    fn from_message(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            sender_type: message.sender_type,
            content: message.content.clone(),
            created_at: message.created_at,
            pending: message.temporary && !message.failed,
            streaming: message.streaming,
            failed: message.failed,
        }
    }
}

/// Everything a frontend needs to render the active conversation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub conversation_id: Option<ConversationId>,
    pub messages: Vec<MessageView>,
    /// True between send success and the generation's terminal event.
    pub ai_responding: bool,
    /// Push channel liveness; false once the subscription drops.
    pub connected: bool,
    pub error: Option<String>,
    /// Content recovered from a retried failed message, for the input box.
    pub draft: Option<String>,
}

/// Projects the ordered message sequence into display rows.
pub fn project_messages(messages: &[Message]) -> Vec<MessageView> {
    messages.iter().map(MessageView::from_message).collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::message::MessageId;

    #[test]
    fn projection_keeps_order_and_derives_flags() {
        let now = Utc::now();
        let conversation = ConversationId::new(1);
        let mut failed = Message::optimistic_user(conversation, "lost", now);
        failed.failed = true;

        let rows = project_messages(&[
            Message::durable(
                MessageId::durable(1),
                conversation,
                SenderType::User,
                "hi",
                now,
            ),
            Message::streaming_placeholder(conversation, now),
            failed,
        ]);

        assert_eq!(rows.len(), 3);
        assert!(!rows[0].pending && !rows[0].streaming && !rows[0].failed);
        assert!(rows[1].pending && rows[1].streaming);
        // A failed row is not "pending"; it terminated.
        assert!(rows[2].failed && !rows[2].pending);
    }
}
