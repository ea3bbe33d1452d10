//! Collaborator interfaces the chat core consumes.
//!
//! Everything behind these traits (storage, delivery, the assistant) lives in
//! the hosted backend. The chat core only sees typed [`Message`]s; loosely
//! typed rows are decoded at this boundary by [`payload`].

use async_trait::async_trait;

use crate::chat::message::{Message, MessageTimestamp, SendFlags};
use crate::types::SenderRole;

pub mod payload;
pub mod rest;

#[cfg(test)]
pub(crate) mod mock;

pub use payload::{DecodeError, RawMessage};
pub use rest::RestBackend;

/// Errors raised by collaborator implementations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid payload: {0}")]
    Decode(#[from] DecodeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Server acknowledgement of a sent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub id: String,
    pub created_at: MessageTimestamp,
}

/// Reply produced by the assistant endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    pub reply_body: String,
    /// Id of the stored reply, when the endpoint persisted it
    pub message_id: Option<String>,
    pub created_at: Option<MessageTimestamp>,
}

/// Message persistence as exposed by the hosted backend
#[async_trait]
pub trait MessageBackend: Send + Sync {
    /// Returns up to `limit` messages of the conversation, newest first.
    async fn fetch_message_page(
        &self,
        conversation_id: &str,
        limit: usize,
        offset: usize,
        caller_role: SenderRole,
    ) -> Result<Vec<Message>, BackendError>;

    async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
        flags: SendFlags,
    ) -> Result<SendReceipt, BackendError>;

    /// Best-effort read receipts
    async fn mark_messages_read(
        &self,
        message_ids: &[String],
        reader_id: &str,
    ) -> Result<(), BackendError>;
}

/// The automated assistant
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn request_assistant_reply(
        &self,
        conversation_id: &str,
        body: &str,
    ) -> Result<AssistantReply, BackendError>;
}
