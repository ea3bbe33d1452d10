use serde::{Deserialize, Serialize};

/// Role of the principal that authored a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Doctor,
    Nutritionist,
    Patient,
    Administrator,
    Reception,
    Assistant,
    #[default]
    Unknown,
}

impl SenderRole {
    /// Maps a backend role label onto the closed role set.
    ///
    /// Labels are matched case-insensitively; anything unrecognised becomes
    /// [`SenderRole::Unknown`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "doctor" => SenderRole::Doctor,
            "nutritionist" => SenderRole::Nutritionist,
            "patient" => SenderRole::Patient,
            "admin" | "administrator" => SenderRole::Administrator,
            "reception" | "receptionist" => SenderRole::Reception,
            "assistant" | "ai" => SenderRole::Assistant,
            _ => SenderRole::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::Doctor => "doctor",
            SenderRole::Nutritionist => "nutritionist",
            SenderRole::Patient => "patient",
            SenderRole::Administrator => "administrator",
            SenderRole::Reception => "reception",
            SenderRole::Assistant => "assistant",
            SenderRole::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SenderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The shape of a conversation. One chat core serves all of them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// One-to-one thread between two principals
    Direct,
    /// Multi-party room without a fixed care team
    Room,
    /// Patient, their assigned providers and the assistant
    CareTeam,
}

/// What the chat core knows about the conversation it is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    pub conversation_id: String,
    pub kind: ConversationKind,
}

impl ConversationContext {
    pub fn new(conversation_id: impl Into<String>, kind: ConversationKind) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            kind,
        }
    }
}

/// The signed-in principal, injected into the chat core instead of being
/// read from ambient application state.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub role: SenderRole,
    pub access_token: String,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        role: SenderRole,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            access_token: access_token.into(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("access_token", &"<REDACTED>")
            .finish()
    }
}
