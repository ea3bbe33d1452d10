use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::SenderRole;

/// Prefix reserved for client-generated ids. Server ids never carry it.
pub const OPTIMISTIC_ID_PREFIX: &str = "optimistic-";

/// Prefix of a message body that carries a file attachment reference.
pub const ATTACHMENT_MARKER: &str = "[FILE]";

/// Creation time of a message.
///
/// Timestamps that fail to parse are kept verbatim so the message can still be
/// shown. Parsed timestamps order before unparsed ones; unparsed ones order by
/// their raw text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageTimestamp {
    Parsed(DateTime<Utc>),
    Unparsed(String),
}

impl MessageTimestamp {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return MessageTimestamp::Parsed(dt.with_timezone(&Utc));
        }
        // Postgres text form: "2024-03-01 10:15:30.123+00"
        for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%.f%:z"] {
            if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
                return MessageTimestamp::Parsed(dt.with_timezone(&Utc));
            }
        }
        // timestamp without time zone columns are stored as UTC
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
                return MessageTimestamp::Parsed(naive.and_utc());
            }
        }
        MessageTimestamp::Unparsed(raw.to_string())
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            MessageTimestamp::Parsed(dt) => Some(*dt),
            MessageTimestamp::Unparsed(_) => None,
        }
    }
}

impl From<DateTime<Utc>> for MessageTimestamp {
    fn from(value: DateTime<Utc>) -> Self {
        MessageTimestamp::Parsed(value)
    }
}

impl std::fmt::Display for MessageTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageTimestamp::Parsed(dt) => write!(f, "{}", dt.to_rfc3339()),
            MessageTimestamp::Unparsed(raw) => f.write_str(raw),
        }
    }
}

/// Where a message entry came from. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageOrigin {
    #[default]
    Server,
    /// Typed locally and not yet confirmed
    Optimistic,
    /// Built locally from a response that may also be stored server side,
    /// e.g. an assistant reply returned without its row id. Replaced when a
    /// matching server message arrives.
    Provisional,
}

/// One chat message in a direct thread or a room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Server id, or a client id starting with [`OPTIMISTIC_ID_PREFIX`]
    pub id: String,

    /// Direct thread or room the message belongs to
    pub conversation_id: String,

    /// Principal that sent the message
    pub sender_id: String,

    pub sender_role: SenderRole,

    /// Text content, possibly starting with [`ATTACHMENT_MARKER`]
    pub body: String,

    pub is_system_message: bool,

    /// Tracked separately from `sender_role`; the two may disagree
    pub is_assistant_message: bool,

    pub created_at: MessageTimestamp,

    /// Principals that acknowledged the message, if the backend tracks it
    pub read_by: Option<BTreeSet<String>>,

    #[serde(skip)]
    pub origin: MessageOrigin,
}

impl Message {
    pub fn is_optimistic(&self) -> bool {
        self.origin == MessageOrigin::Optimistic
    }

    /// Whether this entry only exists on this client so far.
    pub fn is_local(&self) -> bool {
        self.origin != MessageOrigin::Server
    }

    /// The opaque attachment reference, when the body carries the file marker.
    pub fn attachment(&self) -> Option<&str> {
        self.body
            .strip_prefix(ATTACHMENT_MARKER)
            .map(|rest| rest.trim_start())
    }

    pub fn is_read_by(&self, principal_id: &str) -> bool {
        self.read_by
            .as_ref()
            .is_some_and(|readers| readers.contains(principal_id))
    }

    /// Adds `principal_id` to the readers. Returns whether anything changed.
    pub fn mark_read_by(&mut self, principal_id: &str) -> bool {
        self.read_by
            .get_or_insert_with(BTreeSet::new)
            .insert(principal_id.to_string())
    }

    /// Display ordering: creation time only, callers rely on a stable sort for ties.
    pub fn cmp_created_at(&self, other: &Message) -> Ordering {
        self.created_at.cmp(&other.created_at)
    }
}

pub fn new_optimistic_id() -> String {
    format!("{}{}", OPTIMISTIC_ID_PREFIX, Uuid::new_v4())
}

pub fn is_optimistic_id(id: &str) -> bool {
    id.starts_with(OPTIMISTIC_ID_PREFIX)
}

/// Flags forwarded with an outgoing message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendFlags {
    pub is_system_message: bool,
    pub is_assistant_message: bool,
}

/// A message the local user is about to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftMessage {
    pub sender_id: String,
    pub sender_role: SenderRole,
    pub body: String,
    pub flags: SendFlags,
}

impl DraftMessage {
    pub fn new(sender_id: impl Into<String>, sender_role: SenderRole, body: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_role,
            body: body.into(),
            flags: SendFlags::default(),
        }
    }

    pub(crate) fn into_optimistic(
        self,
        conversation_id: &str,
        temp_id: String,
        sent_at: DateTime<Utc>,
    ) -> Message {
        self.into_message(
            conversation_id,
            temp_id,
            MessageTimestamp::Parsed(sent_at),
            MessageOrigin::Optimistic,
        )
    }

    /// The message as the server stored it, built from a send receipt.
    pub(crate) fn into_server_copy(
        self,
        conversation_id: &str,
        id: String,
        created_at: MessageTimestamp,
    ) -> Message {
        self.into_message(conversation_id, id, created_at, MessageOrigin::Server)
    }

    fn into_message(
        self,
        conversation_id: &str,
        id: String,
        created_at: MessageTimestamp,
        origin: MessageOrigin,
    ) -> Message {
        Message {
            id,
            conversation_id: conversation_id.to_string(),
            sender_id: self.sender_id,
            sender_role: self.sender_role,
            body: self.body,
            is_system_message: self.flags.is_system_message,
            is_assistant_message: self.flags.is_assistant_message,
            created_at,
            read_by: None,
            origin,
        }
    }
}
