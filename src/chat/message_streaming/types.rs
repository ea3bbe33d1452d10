//! Types for change notification.
//!
//! Every change to the merged message list is pushed to subscribers together
//! with the full snapshot, so a listener never has to diff.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::chat::message::Message;
use crate::chat::scroll_controller::{ScrollDecision, ScrollState};

/// What caused an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateTrigger {
    /// The conversation was opened and its first page merged (or failed).
    ConversationOpened,

    /// Older history was prepended.
    OlderPageLoaded,

    /// Server messages the user had not seen arrived at the newest end.
    NewMessages { count: usize },

    /// Optimistic entries were replaced by their server copies and nothing
    /// else changed.
    Reconciled,

    /// A message typed locally is shown before the server confirms it.
    OptimisticInserted { temp_id: String },

    /// A send failed and its optimistic entry was removed. `draft` is the text
    /// the user typed.
    SendRolledBack {
        temp_id: String,
        draft: String,
        reason: String,
    },

    /// Local read state changed.
    ReadStateChanged { message_ids: Vec<String> },

    /// The assistant's reply was merged.
    AssistantReplied { message_id: String },

    /// The assistant could not answer. Transient notice only.
    AssistantUnavailable { reason: String },

    /// Loading a page failed; whatever was loaded before is still shown.
    FetchFailed { page: u32, reason: String },
}

/// A single update sent to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub conversation_id: String,

    /// What triggered this update.
    pub trigger: UpdateTrigger,

    /// The merged message list after the change.
    pub messages: Vec<Message>,

    /// What the view should do with its viewport.
    pub scroll: ScrollDecision,

    pub scroll_state: ScrollState,
}

/// Result of subscribing to a conversation.
pub struct ConversationSubscription {
    /// Messages visible at subscription time.
    pub initial_messages: Vec<Message>,

    /// Receiver for updates after the initial snapshot.
    pub updates: broadcast::Receiver<MessageUpdate>,
}
