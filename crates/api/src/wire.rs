use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{ApiResult, DecodeEventSnafu};

/// Event name sent once per subscription as a connection handshake.
pub const EVENT_CONNECT: &str = "connect";
/// Event name for one incremental fragment of an in-progress reply.
pub const EVENT_CHUNK: &str = "ai-chunk";
/// Event name for an authoritative completed assistant message.
pub const EVENT_FINAL: &str = "ai-final";
/// Event name signalling generation completion without a content payload.
pub const EVENT_END: &str = "ai-end";
/// Event name for a message observed through the general broadcast.
pub const EVENT_NEW_MESSAGE: &str = "new-message";
/// Event name for a server-side generation failure.
pub const EVENT_ERROR: &str = "error";

/// Wire-level speaker tag. The backend encodes senders as numeric codes
/// (1 = user, 2 = assistant); the mapping to domain enums happens at the
/// crate boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum WireSender {
    User,
    Assistant,
}

impl TryFrom<i64> for WireSender {
    type Error = String;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(Self::User),
            2 => Ok(Self::Assistant),
            other => Err(format!("unknown sender type code {other}")),
        }
    }
}

impl From<WireSender> for i64 {
    fn from(sender: WireSender) -> Self {
        match sender {
            WireSender::User => 1,
            WireSender::Assistant => 2,
        }
    }
}

/// A durable message as the backend serializes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_type: WireSender,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation summary row returned by the conversation listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDto {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: Option<i64>,
    #[serde(default)]
    pub last_message: Option<String>,
}

/// Request body for the outbound chat send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChatRequest {
    pub conversation_id: i64,
    pub user_id: i64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    pub conversation_id: i64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndPayload {
    pub conversation_id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub conversation_id: i64,
    pub error: String,
}

/// One decoded push-channel event.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Connected { connection_id: String },
    Chunk(ChunkPayload),
    Final(MessageDto),
    EndMarker(EndPayload),
    NewMessage(MessageDto),
    Error(ErrorPayload),
}

impl PushEvent {
    /// Decodes a named SSE frame into a typed event.
    ///
    /// Returns `Ok(None)` for event names this client does not consume
    /// (keep-alives, server-side extensions); a JSON decode failure on a
    /// known name is an error the dispatcher is expected to drop and log.
    pub fn decode(event: &str, data: &str) -> ApiResult<Option<Self>> {
        let decoded = match event {
            EVENT_CONNECT => Self::Connected {
                connection_id: data.trim().to_string(),
            },
            EVENT_CHUNK => Self::Chunk(decode_payload(event, data)?),
            EVENT_FINAL => Self::Final(decode_payload(event, data)?),
            EVENT_END => Self::EndMarker(decode_payload(event, data)?),
            EVENT_NEW_MESSAGE => Self::NewMessage(decode_payload(event, data)?),
            EVENT_ERROR => Self::Error(decode_payload(event, data)?),
            _ => return Ok(None),
        };

        Ok(Some(decoded))
    }

    /// Returns the conversation the event belongs to, when it carries one.
    pub fn conversation_id(&self) -> Option<i64> {
        match self {
            Self::Connected { .. } => None,
            Self::Chunk(payload) => Some(payload.conversation_id),
            Self::Final(message) | Self::NewMessage(message) => Some(message.conversation_id),
            Self::EndMarker(payload) => Some(payload.conversation_id),
            Self::Error(payload) => Some(payload.conversation_id),
        }
    }
}

fn decode_payload<'de, T: Deserialize<'de>>(event: &str, data: &'de str) -> ApiResult<T> {
    serde_json::from_str(data).context(DecodeEventSnafu {
        stage: "decode-push-event",
        event: event.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_event_decodes_conversation_and_content() {
        let event = PushEvent::decode(EVENT_CHUNK, r#"{"conversationId":7,"content":"He"}"#)
            .expect("chunk payload should decode")
            .expect("chunk is a consumed event kind");

        assert_eq!(event.conversation_id(), Some(7));
        assert_eq!(
            event,
            PushEvent::Chunk(ChunkPayload {
                conversation_id: 7,
                content: "He".to_string(),
            })
        );
    }

    #[test]
    fn final_event_decodes_full_message() {
        let data = r#"{
            "id": 42,
            "conversationId": 7,
            "senderType": 2,
            "content": "Hello",
            "createdAt": "2026-08-08T12:00:00Z"
        }"#;

        let event = PushEvent::decode(EVENT_FINAL, data)
            .expect("final payload should decode")
            .expect("final is a consumed event kind");

        let PushEvent::Final(message) = event else {
            panic!("expected a final event");
        };
        assert_eq!(message.id, 42);
        assert_eq!(message.sender_type, WireSender::Assistant);
        assert_eq!(message.content, "Hello");
    }

    #[test]
    fn unknown_sender_code_is_a_decode_error() {
        let data = r#"{
            "id": 1,
            "conversationId": 7,
            "senderType": 9,
            "content": "x",
            "createdAt": "2026-08-08T12:00:00Z"
        }"#;

        assert!(PushEvent::decode(EVENT_NEW_MESSAGE, data).is_err());
    }

    #[test]
    fn unknown_event_names_are_ignored_not_errors() {
        let decoded = PushEvent::decode("heartbeat", "{}").expect("unknown names never error");
        assert!(decoded.is_none());
    }

    #[test]
    fn connect_event_carries_the_raw_connection_id() {
        let event = PushEvent::decode(EVENT_CONNECT, " 1234 \n")
            .expect("connect never fails to decode")
            .expect("connect is a consumed event kind");

        assert_eq!(
            event,
            PushEvent::Connected {
                connection_id: "1234".to_string()
            }
        );
        assert_eq!(event.conversation_id(), None);
    }
}
