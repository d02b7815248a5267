use std::future::Future;
use std::pin::Pin;

use snafu::ResultExt;

use crate::config::BackendConfig;
use crate::error::{ApiResult, DecodeResponseSnafu, HttpSnafu, StatusSnafu};
use crate::wire::{ConversationDto, MessageDto, SendChatRequest};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The request channel to the remote chat service.
///
/// The session runtime talks to this seam only; the HTTP implementation
/// below is one provider of it and tests substitute their own.
pub trait ChatBackend: Send + Sync {
    /// Fire-and-forget chat send; the reply arrives over the push channel.
    fn send_chat(
        &self,
        conversation_id: i64,
        user_id: i64,
        content: String,
    ) -> BoxFuture<'_, ApiResult<()>>;

    fn list_conversations(&self, user_id: i64) -> BoxFuture<'_, ApiResult<Vec<ConversationDto>>>;

    fn create_conversation(
        &self,
        user_id: i64,
        title: String,
    ) -> BoxFuture<'_, ApiResult<ConversationDto>>;

    fn delete_conversation(&self, conversation_id: i64, user_id: i64)
    -> BoxFuture<'_, ApiResult<()>>;

    fn list_messages(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, ApiResult<Vec<MessageDto>>>;
}

/// `ChatBackend` over the service's REST endpoints.
pub struct HttpChatBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl HttpChatBackend {
    pub fn new(client: reqwest::Client, config: BackendConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn check_status(
        response: reqwest::Response,
        stage: &'static str,
    ) -> ApiResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        StatusSnafu {
            stage,
            status: status.as_u16(),
            body,
        }
        .fail()
    }
}

impl ChatBackend for HttpChatBackend {
    fn send_chat(
        &self,
        conversation_id: i64,
        user_id: i64,
        content: String,
    ) -> BoxFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.config.endpoint("/api/sse/chat"))
                .json(&SendChatRequest {
                    conversation_id,
                    user_id,
                    content,
                })
                .send()
                .await
                .context(HttpSnafu { stage: "send-chat" })?;

            // The response body echoes the stored user message, but the
            // engine reconciles through push events instead of this echo.
            Self::check_status(response, "send-chat-status").await?;
            Ok(())
        })
    }

    fn list_conversations(&self, user_id: i64) -> BoxFuture<'_, ApiResult<Vec<ConversationDto>>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.config.endpoint("/api/conversations"))
                .query(&[("userId", user_id)])
                .send()
                .await
                .context(HttpSnafu {
                    stage: "list-conversations",
                })?;

            Self::check_status(response, "list-conversations-status")
                .await?
                .json()
                .await
                .context(DecodeResponseSnafu {
                    stage: "list-conversations-body",
                })
        })
    }

    fn create_conversation(
        &self,
        user_id: i64,
        title: String,
    ) -> BoxFuture<'_, ApiResult<ConversationDto>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.config.endpoint("/api/conversations"))
                .json(&serde_json::json!({ "userId": user_id, "title": title }))
                .send()
                .await
                .context(HttpSnafu {
                    stage: "create-conversation",
                })?;

            Self::check_status(response, "create-conversation-status")
                .await?
                .json()
                .await
                .context(DecodeResponseSnafu {
                    stage: "create-conversation-body",
                })
        })
    }

    fn delete_conversation(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            let response = self
                .client
                .delete(
                    self.config
                        .endpoint(&format!("/api/conversations/{conversation_id}")),
                )
                .query(&[("userId", user_id)])
                .send()
                .await
                .context(HttpSnafu {
                    stage: "delete-conversation",
                })?;

            Self::check_status(response, "delete-conversation-status").await?;
            Ok(())
        })
    }

    fn list_messages(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, ApiResult<Vec<MessageDto>>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.config.endpoint("/api/messages"))
                .query(&[("conversationId", conversation_id), ("userId", user_id)])
                .send()
                .await
                .context(HttpSnafu {
                    stage: "list-messages",
                })?;

            Self::check_status(response, "list-messages-status")
                .await?
                .json()
                .await
                .context(DecodeResponseSnafu {
                    stage: "list-messages-body",
                })
        })
    }
}
