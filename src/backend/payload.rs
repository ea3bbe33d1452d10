//! Decoding of backend message rows into [`Message`].
//!
//! Rows come from several tables and functions that grew independently, so
//! field names and types are not uniform. Every field is optional here and
//! validation happens once, in [`RawMessage::decode`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::message::{is_optimistic_id, Message, MessageOrigin, MessageTimestamp};
use crate::types::SenderRole;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Server id {0} uses the reserved optimistic id space")]
    ReservedId(String),
}

/// A message row as the backend returns it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<Value>,

    #[serde(default, alias = "room_id")]
    pub conversation_id: Option<String>,

    #[serde(default)]
    pub sender_id: Option<String>,

    #[serde(default)]
    pub sender_role: Option<String>,

    #[serde(default, alias = "message")]
    pub content: Option<String>,

    #[serde(default)]
    pub is_system_message: Option<bool>,

    #[serde(default, alias = "is_assistant_message")]
    pub is_ai_message: Option<bool>,

    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default)]
    pub read_by: Option<Value>,
}

impl RawMessage {
    /// Produces the canonical message shape.
    ///
    /// `fallback_conversation_id` is used for rows that do not repeat the
    /// conversation they were fetched for.
    pub fn decode(self, fallback_conversation_id: &str) -> Result<Message, DecodeError> {
        let id = match self.id {
            Some(Value::String(id)) if !id.trim().is_empty() => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(DecodeError::MissingField("id")),
        };
        if is_optimistic_id(&id) {
            return Err(DecodeError::ReservedId(id));
        }

        let sender_id = self
            .sender_id
            .filter(|sender| !sender.trim().is_empty())
            .ok_or(DecodeError::MissingField("sender_id"))?;

        let created_at = self
            .created_at
            .map(|raw| MessageTimestamp::parse(&raw))
            .ok_or(DecodeError::MissingField("created_at"))?;

        let read_by = match self.read_by {
            Some(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(reader) => Some(reader),
                        _ => None,
                    })
                    .collect::<BTreeSet<String>>(),
            ),
            _ => None,
        };

        Ok(Message {
            id,
            conversation_id: self
                .conversation_id
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| fallback_conversation_id.to_string()),
            sender_id,
            sender_role: self
                .sender_role
                .as_deref()
                .map(SenderRole::from_label)
                .unwrap_or_default(),
            body: self.content.unwrap_or_default(),
            is_system_message: self.is_system_message.unwrap_or(false),
            is_assistant_message: self.is_ai_message.unwrap_or(false),
            created_at,
            read_by,
            origin: MessageOrigin::Server,
        })
    }
}
