//! [`MessageBackend`] and [`AssistantBackend`] over the hosted REST surface.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use super::payload::RawMessage;
use super::{AssistantBackend, AssistantReply, BackendError, MessageBackend, SendReceipt};
use crate::chat::message::{Message, MessageTimestamp, SendFlags};
use crate::config::BackendConfig;
use crate::types::{SenderRole, Session};

const MESSAGES_PATH: &str = "/rest/v1/messages";
const MARK_READ_PATH: &str = "/rest/v1/rpc/mark_messages_read";
const ASSISTANT_PATH: &str = "/functions/v1/ai-chat-response";

#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: String,
}

impl std::fmt::Debug for RestBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .field("access_token", &"<REDACTED>")
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct NewMessageRow<'a> {
    conversation_id: &'a str,
    sender_id: &'a str,
    content: &'a str,
    is_system_message: bool,
    is_ai_message: bool,
}

#[derive(Debug, Serialize)]
struct AssistantRequest<'a> {
    conversation_id: &'a str,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct AssistantResponse {
    #[serde(default, alias = "response")]
    reply: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct MarkReadRequest<'a> {
    message_ids: &'a [String],
    reader_id: &'a str,
}

impl RestBackend {
    pub fn new(config: &BackendConfig, session: &Session) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            access_token: session.access_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.access_token)
    }

    async fn check(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MessageBackend for RestBackend {
    async fn fetch_message_page(
        &self,
        conversation_id: &str,
        limit: usize,
        offset: usize,
        caller_role: SenderRole,
    ) -> Result<Vec<Message>, BackendError> {
        let request = self
            .authorized(self.client.get(self.url(MESSAGES_PATH)))
            .header("x-caller-role", caller_role.as_str())
            .query(&[
                ("select", "*".to_string()),
                ("conversation_id", format!("eq.{}", conversation_id)),
                ("order", "created_at.desc".to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ]);

        let rows: Vec<RawMessage> = Self::check(request.send().await?).await?.json().await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            match row.decode(conversation_id) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    tracing::warn!(
                        target: "carechat::backend::rest",
                        "Skipping undecodable message row in {}: {}",
                        conversation_id,
                        e
                    );
                }
            }
        }
        Ok(messages)
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
        flags: SendFlags,
    ) -> Result<SendReceipt, BackendError> {
        let row = NewMessageRow {
            conversation_id,
            sender_id,
            content: body,
            is_system_message: flags.is_system_message,
            is_ai_message: flags.is_assistant_message,
        };
        let request = self
            .authorized(self.client.post(self.url(MESSAGES_PATH)))
            .header("Prefer", "return=representation")
            .json(&row);

        let rows: Vec<RawMessage> = Self::check(request.send().await?).await?.json().await?;
        let stored = rows
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Other("Send returned no stored row".to_string()))?
            .decode(conversation_id)?;

        Ok(SendReceipt {
            id: stored.id,
            created_at: stored.created_at,
        })
    }

    async fn mark_messages_read(
        &self,
        message_ids: &[String],
        reader_id: &str,
    ) -> Result<(), BackendError> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let request = self
            .authorized(self.client.post(self.url(MARK_READ_PATH)))
            .json(&MarkReadRequest {
                message_ids,
                reader_id,
            });
        Self::check(request.send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl AssistantBackend for RestBackend {
    async fn request_assistant_reply(
        &self,
        conversation_id: &str,
        body: &str,
    ) -> Result<AssistantReply, BackendError> {
        let request = self
            .authorized(self.client.post(self.url(ASSISTANT_PATH)))
            .json(&AssistantRequest {
                conversation_id,
                message: body,
            });

        let response: AssistantResponse =
            Self::check(request.send().await?).await?.json().await?;
        let reply_body = response
            .reply
            .filter(|reply| !reply.trim().is_empty())
            .ok_or_else(|| BackendError::Other("Assistant returned an empty reply".to_string()))?;

        Ok(AssistantReply {
            reply_body,
            message_id: response.message_id,
            created_at: response
                .created_at
                .map(|raw| MessageTimestamp::parse(&raw)),
        })
    }
}
