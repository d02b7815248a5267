#![deny(unsafe_code)]

//! Headless chat session core: the reconciliation engine that merges
//! optimistic local inserts with the push-channel event stream into one
//! consistent, duplicate-free, ordered message list.

/// Reducer input union shared by local actions and push events.
pub mod action;
/// Decode guard and active-conversation filter for push frames.
pub mod dispatch;
/// The per-conversation reconciliation reducer.
pub mod engine;
/// Message model and typed identifiers.
pub mod message;
/// Session runtime: the single consumption loop.
pub mod session;
/// Ordered message container.
pub mod store;
/// Snapshot projection for frontends.
pub mod view;

pub use action::{Action, IncomingMessage, SendOutcome};
pub use dispatch::{Dispatched, EventDispatcher};
pub use engine::{DEDUP_WINDOW_MS, Engine, Phase};
pub use message::{ConversationId, Message, MessageId, SenderType};
pub use session::{ChatSession, SessionCommand, SessionHandle, SubmitRejection};
pub use store::MessageStore;
pub use view::{MessageView, SessionSnapshot, project_messages};
