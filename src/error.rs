use crate::backend::BackendError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Failed to fetch page {page} of conversation {conversation_id}: {source}")]
    FetchFailed {
        conversation_id: String,
        page: u32,
        #[source]
        source: BackendError,
    },

    #[error("Failed to send message {temp_id}: {source}")]
    SendFailed {
        temp_id: String,
        /// The text the user typed, handed back so it can be edited and resent
        draft: String,
        #[source]
        source: BackendError,
    },

    #[error("Assistant unavailable for conversation {conversation_id}: {source}")]
    AssistantUnavailable {
        conversation_id: String,
        #[source]
        source: BackendError,
    },

    #[error("Response for conversation {0} arrived after it was closed")]
    StaleConversation(String),

    #[error("No conversation is open")]
    NoOpenConversation,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Logging setup error: {0}")]
    LoggingSetup(String),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ChatError {
    /// Whether the hosting UI should show this error to the user.
    ///
    /// Only failed page loads and failed sends are user facing; assistant
    /// failures are a transient notice and stale responses are dropped.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            ChatError::FetchFailed { .. } | ChatError::SendFailed { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::FetchFailed { .. } | ChatError::SendFailed { .. } | ChatError::Backend(_)
        )
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, ChatError::StaleConversation(_))
    }
}
