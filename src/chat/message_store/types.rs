use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::message::{DraftMessage, MessageTimestamp};
use crate::config::{ChatConfig, DEFAULT_RECONCILE_TOLERANCE};

/// Loading state of the open conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// No conversation open
    Idle,
    /// First page requested
    Loading,
    /// First page merged
    Ready { has_more: bool },
    /// An older page is being fetched; loaded messages stay visible
    LoadingOlder { has_more: bool },
}

impl LoadState {
    pub fn has_more(&self) -> bool {
        match self {
            LoadState::Ready { has_more } | LoadState::LoadingOlder { has_more } => *has_more,
            LoadState::Idle | LoadState::Loading => false,
        }
    }
}

/// Proof of which conversation an async operation was started for.
///
/// Every completion hands its ticket back to the store, which refuses it once
/// another conversation has been opened (or the same one reopened).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationTicket {
    pub(crate) conversation_id: String,
    pub(crate) epoch: u64,
}

impl ConversationTicket {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Waiting for the backend to accept the message
    InFlight,
    /// Accepted; the optimistic entry stays until its server copy is merged
    Confirmed,
}

/// Bookkeeping for one outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub temp_id: String,
    pub draft: DraftMessage,
    pub sent_at: DateTime<Utc>,
    pub status: SendStatus,
    /// Id the backend assigned, once the send is confirmed
    pub server_id: Option<String>,
}

/// An optimistic entry that was replaced by its server copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledSend {
    pub temp_id: String,
    pub server_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppendKind {
    /// History prepended above what is loaded
    Older,
    /// Latest page refetched (poll, send confirmation, assistant reply)
    Latest,
}

/// What a merge changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub kind: AppendKind,
    /// Ids of server messages that were not in the set before
    pub inserted: Vec<String>,
    /// Items that were already present
    pub duplicates: usize,
    pub reconciled: Vec<ReconciledSend>,
}

impl MergeOutcome {
    pub(crate) fn new(kind: AppendKind) -> Self {
        Self {
            kind,
            inserted: Vec::new(),
            duplicates: 0,
            reconciled: Vec::new(),
        }
    }

    /// Messages the user has not seen in any form yet.
    ///
    /// Older pages never count. Server copies that replaced an optimistic
    /// entry do not count either; the bubble was already on screen.
    pub fn new_message_count(&self) -> usize {
        if self.kind == AppendKind::Older {
            return 0;
        }
        let replaced: HashSet<&str> = self
            .reconciled
            .iter()
            .map(|r| r.server_id.as_str())
            .collect();
        self.inserted
            .iter()
            .filter(|id| !replaced.contains(id.as_str()))
            .count()
    }

    pub fn changed(&self) -> bool {
        !self.inserted.is_empty() || !self.reconciled.is_empty()
    }
}

/// Statistics about the open conversation, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStatistics {
    pub message_count: usize,
    pub optimistic_count: usize,
    pub pending_send_count: usize,
    pub unread_count: usize,
    pub last_message_at: Option<MessageTimestamp>,
}

/// Configuration for the message store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// See [`ChatConfig::reconcile_tolerance`]
    pub reconcile_tolerance: Duration,

    /// Whether to enable detailed logging of merge steps
    pub enable_debug_logging: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reconcile_tolerance: DEFAULT_RECONCILE_TOLERANCE,
            enable_debug_logging: false,
        }
    }
}

impl From<&ChatConfig> for StoreConfig {
    fn from(config: &ChatConfig) -> Self {
        Self {
            reconcile_tolerance: config.reconcile_tolerance,
            enable_debug_logging: config.enable_debug_logging,
        }
    }
}
