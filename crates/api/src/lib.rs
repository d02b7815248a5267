//! Transport collaborators for the chat client: the HTTP request channel
//! and the SSE push channel, specified at their seams so the session core
//! never sees a socket.

pub mod config;
pub mod error;
pub mod http;
pub mod sse;
pub mod wire;

pub use config::BackendConfig;
pub use error::{ApiError, ApiResult};
pub use http::{BoxFuture, ChatBackend, HttpChatBackend};
pub use sse::{
    ChannelWorker, FrameParser, PushChannelHandle, PushFrameStream, SseFrame, channel, subscribe,
};
pub use wire::{
    ChunkPayload, ConversationDto, EndPayload, ErrorPayload, MessageDto, PushEvent, WireSender,
};
