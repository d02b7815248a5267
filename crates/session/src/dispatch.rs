use plume_api::{MessageDto, PushEvent, SseFrame, WireSender};

use crate::action::{Action, IncomingMessage};
use crate::message::{ConversationId, MessageId, SenderType};

/// What one push frame turned into after the dispatch boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// A reducer action for the active conversation.
    Action(Action),
    /// The channel handshake; carries the server-side connection id.
    Connected { connection_id: String },
}

/// The single guard between the push channel and the reducer.
///
/// Decoding failures are logged and dropped, never propagated. Events tagged
/// with any conversation other than the active one are dropped unconditionally
/// and permanently; this filter is the system's only cancellation mechanism.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    active: Option<ConversationId>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.active
    }

    /// Switches the filter to a new active conversation. Events for the
    /// previous one become inert from this point on; nothing is replayed.
    pub fn set_active(&mut self, conversation_id: Option<ConversationId>) {
        self.active = conversation_id;
    }

    /// Applies the decode guard and the conversation filter to one frame.
    pub fn dispatch(&self, frame: &SseFrame) -> Option<Dispatched> {
        let event = match PushEvent::decode(&frame.event, &frame.data) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::debug!(event = %frame.event, "ignored unknown push event kind");
                return None;
            }
            Err(error) => {
                tracing::warn!(
                    event = %frame.event,
                    error = %error,
                    "dropped malformed push event payload"
                );
                return None;
            }
        };

        // The handshake carries no conversation id and bypasses the filter.
        if let PushEvent::Connected { connection_id } = &event {
            return Some(Dispatched::Connected {
                connection_id: connection_id.clone(),
            });
        }

        let conversation_id = event.conversation_id().map(ConversationId::new);
        if conversation_id != self.active {
            tracing::debug!(
                event_conversation = ?conversation_id,
                active_conversation = ?self.active,
                "dropped push event for inactive conversation"
            );
            return None;
        }

        let action = match event {
            PushEvent::Chunk(payload) => Action::Chunk {
                content: payload.content,
            },
            PushEvent::Final(message) => Action::Final {
                message: incoming_from_wire(message),
            },
            PushEvent::EndMarker(_) => Action::EndMarker,
            PushEvent::NewMessage(message) => Action::NewMessage {
                message: incoming_from_wire(message),
            },
            PushEvent::Error(payload) => Action::Error {
                error: payload.error,
            },
            PushEvent::Connected { connection_id } => {
                return Some(Dispatched::Connected { connection_id });
            }
        };

        Some(Dispatched::Action(action))
    }
}

// Wire-to-domain mapping stays explicit at the crate boundary so the api
// types never leak into the reducer.
pub(crate) fn incoming_from_wire(dto: MessageDto) -> IncomingMessage {
    IncomingMessage {
        id: MessageId::durable(dto.id),
        conversation_id: ConversationId::new(dto.conversation_id),
        sender_type: sender_from_wire(dto.sender_type),
        content: dto.content,
        created_at: dto.created_at,
    }
}

pub(crate) fn sender_from_wire(sender: WireSender) -> SenderType {
    match sender {
        WireSender::User => SenderType::User,
        WireSender::Assistant => SenderType::Assistant,
    }
}
