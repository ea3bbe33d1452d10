//! Message Store Module
//!
//! Single source of truth for the messages visible in the open conversation.
//! Server pages and optimistic sends are merged into one deduplicated list
//! ordered by `created_at`. The store is synchronous; async callers hold a
//! [`ConversationTicket`] and hand it back with every completion so late
//! responses for a conversation that is no longer open are refused.

mod reconcile;
mod types;


pub use types::{
    AppendKind, ConversationStatistics, ConversationTicket, LoadState, MergeOutcome, PendingSend,
    ReconciledSend, SendStatus, StoreConfig,
};

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::message::{new_optimistic_id, DraftMessage, Message};
use super::paginator::ConversationPage;
use crate::backend::SendReceipt;
use crate::error::{ChatError, Result};

#[derive(Debug)]
pub struct MessageStore {
    config: StoreConfig,
    ticket: Option<ConversationTicket>,
    epoch: u64,
    state: LoadState,
    messages: Vec<Message>,
    pending: HashMap<String, PendingSend>,
}

impl MessageStore {
    /// Create a new message store with default configuration
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create a new message store with custom configuration
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            ticket: None,
            epoch: 0,
            state: LoadState::Idle,
            messages: Vec::new(),
            pending: HashMap::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn ticket(&self) -> Option<&ConversationTicket> {
        self.ticket.as_ref()
    }

    /// The merged view, ascending by `created_at`
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn pending_send(&self, temp_id: &str) -> Option<&PendingSend> {
        self.pending.get(temp_id)
    }

    pub fn pending_sends(&self) -> impl Iterator<Item = &PendingSend> {
        self.pending.values()
    }

    /// Starts a session for `conversation_id`, dropping everything loaded for
    /// the previous one. Tickets issued before this call become stale.
    pub fn open(&mut self, conversation_id: &str) -> Result<ConversationTicket> {
        if conversation_id.trim().is_empty() {
            return Err(ChatError::InvalidInput(
                "conversation id must not be empty".to_string(),
            ));
        }

        self.epoch += 1;
        let ticket = ConversationTicket {
            conversation_id: conversation_id.to_string(),
            epoch: self.epoch,
        };
        self.ticket = Some(ticket.clone());
        self.messages.clear();
        self.pending.clear();
        self.state = LoadState::Loading;

        tracing::debug!(
            target: "carechat::message_store",
            "Opened conversation {} (epoch {})",
            conversation_id,
            self.epoch
        );
        Ok(ticket)
    }

    pub fn close(&mut self) {
        self.epoch += 1;
        self.ticket = None;
        self.messages.clear();
        self.pending.clear();
        self.state = LoadState::Idle;
    }

    pub fn is_current(&self, ticket: &ConversationTicket) -> bool {
        self.ticket.as_ref() == Some(ticket)
    }

    fn ensure_current(&self, ticket: &ConversationTicket) -> Result<()> {
        if self.is_current(ticket) {
            Ok(())
        } else {
            Err(ChatError::StaleConversation(ticket.conversation_id.clone()))
        }
    }

    fn ensure_page_matches(&self, ticket: &ConversationTicket, page: &ConversationPage) -> Result<()> {
        self.ensure_current(ticket)?;
        if page.conversation_id != ticket.conversation_id {
            return Err(ChatError::StaleConversation(page.conversation_id.clone()));
        }
        Ok(())
    }

    /// Moves into the "loading older" sub-state. Returns `false` when there is
    /// nothing more to load or a load is already running.
    pub fn begin_load_older(&mut self, ticket: &ConversationTicket) -> Result<bool> {
        self.ensure_current(ticket)?;
        match self.state {
            LoadState::Ready { has_more: true } => {
                self.state = LoadState::LoadingOlder { has_more: true };
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Leaves a loading state after a failed fetch; loaded messages stay.
    ///
    /// A failed first page leaves the store ready with more to load, so
    /// "load older" retries it.
    pub fn fail_load(&mut self, ticket: &ConversationTicket) -> Result<()> {
        self.ensure_current(ticket)?;
        self.state = match self.state {
            LoadState::Loading => LoadState::Ready { has_more: true },
            LoadState::LoadingOlder { has_more } => LoadState::Ready { has_more },
            other => other,
        };
        Ok(())
    }

    /// Merges a page of history: dedupe on id, concatenate, stable re-sort.
    ///
    /// Pages may arrive in any order; the merged list is sorted either way.
    pub fn append_older_page(
        &mut self,
        ticket: &ConversationTicket,
        page: &ConversationPage,
    ) -> Result<MergeOutcome> {
        self.ensure_page_matches(ticket, page)?;

        let mut outcome = MergeOutcome::new(AppendKind::Older);
        outcome.reconciled = self.reconcile_items(&page.items);
        self.merge_items(&page.items, &mut outcome);

        self.state = match self.state {
            LoadState::Loading | LoadState::LoadingOlder { .. } | LoadState::Ready { .. } => {
                LoadState::Ready {
                    has_more: page.has_more,
                }
            }
            LoadState::Idle => LoadState::Idle,
        };

        self.log_outcome(&outcome);
        Ok(outcome)
    }

    /// Merges a refetch of the newest messages. Optimistic entries whose
    /// server copies are on the page are replaced first.
    pub fn merge_latest_page(
        &mut self,
        ticket: &ConversationTicket,
        page: &ConversationPage,
    ) -> Result<MergeOutcome> {
        self.ensure_page_matches(ticket, page)?;

        let outcome = self.merge_newest(&page.items);
        if self.state == LoadState::Loading {
            self.state = LoadState::Ready {
                has_more: page.has_more,
            };
        }
        Ok(outcome)
    }

    /// Merges individual server messages at the newest end, such as an
    /// assistant reply. The loading state is left alone.
    pub fn merge_server_messages(
        &mut self,
        ticket: &ConversationTicket,
        items: &[Message],
    ) -> Result<MergeOutcome> {
        self.ensure_current(ticket)?;
        if let Some(foreign) = items
            .iter()
            .find(|item| item.conversation_id != ticket.conversation_id)
        {
            return Err(ChatError::StaleConversation(foreign.conversation_id.clone()));
        }
        Ok(self.merge_newest(items))
    }

    fn merge_newest(&mut self, items: &[Message]) -> MergeOutcome {
        let mut outcome = MergeOutcome::new(AppendKind::Latest);
        outcome.reconciled = self.reconcile_items(items);
        self.merge_items(items, &mut outcome);
        self.log_outcome(&outcome);
        outcome
    }

    /// Removes optimistic entries superseded by server messages in `items`.
    pub fn reconcile(
        &mut self,
        ticket: &ConversationTicket,
        items: &[Message],
    ) -> Result<Vec<ReconciledSend>> {
        self.ensure_current(ticket)?;
        Ok(self.reconcile_items(items))
    }

    fn reconcile_items(&mut self, items: &[Message]) -> Vec<ReconciledSend> {
        if self.pending.is_empty() && !self.messages.iter().any(Message::is_local) {
            return Vec::new();
        }

        // Only server messages new to the set can supersede a local entry; a
        // message already shown was available to earlier reconciliations.
        let mut candidates: Vec<&Message> = items
            .iter()
            .filter(|item| !item.is_local())
            .filter(|item| !self.messages.iter().any(|m| m.id == item.id))
            .collect();
        candidates.sort_by(|a, b| a.cmp_created_at(b));

        let mut reconciled = Vec::new();
        for server in candidates {
            if let Some(index) = reconcile::find_counterpart(
                &self.messages,
                &self.pending,
                server,
                self.config.reconcile_tolerance,
            ) {
                let optimistic = self.messages.remove(index);
                self.pending.remove(&optimistic.id);
                if self.config.enable_debug_logging {
                    tracing::debug!(
                        target: "carechat::message_store",
                        "Reconciled {} with server message {}",
                        optimistic.id,
                        server.id
                    );
                }
                reconciled.push(ReconciledSend {
                    temp_id: optimistic.id,
                    server_id: server.id.clone(),
                });
            }
        }
        reconciled
    }

    fn merge_items(&mut self, items: &[Message], outcome: &mut MergeOutcome) {
        let mut index_by_id: HashMap<String, usize> = self
            .messages
            .iter()
            .enumerate()
            .map(|(index, m)| (m.id.clone(), index))
            .collect();

        for item in items {
            if item.is_optimistic() {
                continue;
            }
            if let Some(&index) = index_by_id.get(&item.id) {
                // read state only grows; local marks survive a stale server copy
                if let Some(readers) = &item.read_by {
                    for reader in readers {
                        self.messages[index].mark_read_by(reader);
                    }
                }
                outcome.duplicates += 1;
                continue;
            }
            index_by_id.insert(item.id.clone(), self.messages.len());
            self.messages.push(item.clone());
            outcome.inserted.push(item.id.clone());
        }

        if !outcome.inserted.is_empty() {
            // stable: ties keep arrival order
            self.messages.sort_by(|a, b| a.cmp_created_at(b));
        }
    }

    /// Shows `draft` immediately under a fresh client id, positioned by
    /// `sent_at`, and tracks it until the send settles.
    pub fn send_optimistic(
        &mut self,
        ticket: &ConversationTicket,
        draft: DraftMessage,
        sent_at: DateTime<Utc>,
    ) -> Result<String> {
        self.ensure_current(ticket)?;
        if draft.body.trim().is_empty() {
            return Err(ChatError::InvalidInput(
                "message body must not be empty".to_string(),
            ));
        }

        let temp_id = new_optimistic_id();
        let message = draft
            .clone()
            .into_optimistic(&ticket.conversation_id, temp_id.clone(), sent_at);

        let position = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(position, message);
        self.pending.insert(
            temp_id.clone(),
            PendingSend {
                temp_id: temp_id.clone(),
                draft,
                sent_at,
                status: SendStatus::InFlight,
                server_id: None,
            },
        );

        if self.config.enable_debug_logging {
            tracing::debug!(
                target: "carechat::message_store",
                "Inserted optimistic message {} at position {}",
                temp_id,
                position
            );
        }
        Ok(temp_id)
    }

    /// Records the backend's acceptance of a send.
    ///
    /// The optimistic entry stays until reconciliation, unless the server copy
    /// is already in the set. Returns whether the send was still tracked.
    pub fn confirm_send(
        &mut self,
        ticket: &ConversationTicket,
        temp_id: &str,
        receipt: &SendReceipt,
    ) -> Result<bool> {
        self.ensure_current(ticket)?;
        let Some(pending) = self.pending.get_mut(temp_id) else {
            return Ok(false);
        };
        pending.status = SendStatus::Confirmed;
        pending.server_id = Some(receipt.id.clone());

        if self.messages.iter().any(|m| m.id == receipt.id) {
            self.messages.retain(|m| m.id != temp_id);
            self.pending.remove(temp_id);
        }
        Ok(true)
    }

    /// Rolls back a failed send. The pending record, with the user's draft,
    /// is returned so the text can be offered for editing.
    pub fn fail_send(
        &mut self,
        ticket: &ConversationTicket,
        temp_id: &str,
    ) -> Result<Option<PendingSend>> {
        self.ensure_current(ticket)?;
        self.messages.retain(|m| m.id != temp_id);
        Ok(self.pending.remove(temp_id))
    }

    /// Adds `reader_id` to the readers of the given server messages.
    /// Returns the ids whose read state changed.
    pub fn mark_read(
        &mut self,
        ticket: &ConversationTicket,
        message_ids: &[String],
        reader_id: &str,
    ) -> Result<Vec<String>> {
        self.ensure_current(ticket)?;
        let mut changed = Vec::new();
        for message in self.messages.iter_mut() {
            if message.is_local() || !message_ids.contains(&message.id) {
                continue;
            }
            if message.mark_read_by(reader_id) {
                changed.push(message.id.clone());
            }
        }
        Ok(changed)
    }

    pub fn statistics(&self, viewer_id: &str) -> ConversationStatistics {
        ConversationStatistics {
            message_count: self.messages.len(),
            optimistic_count: self.messages.iter().filter(|m| m.is_optimistic()).count(),
            pending_send_count: self.pending.len(),
            unread_count: self
                .messages
                .iter()
                .filter(|m| !m.is_local() && m.sender_id != viewer_id && !m.is_read_by(viewer_id))
                .count(),
            last_message_at: self.messages.last().map(|m| m.created_at.clone()),
        }
    }

    fn log_outcome(&self, outcome: &MergeOutcome) {
        if self.config.enable_debug_logging {
            tracing::debug!(
                target: "carechat::message_store",
                "{:?} merge: {} inserted, {} duplicates, {} reconciled, {} total",
                outcome.kind,
                outcome.inserted.len(),
                outcome.duplicates,
                outcome.reconciled.len(),
                self.messages.len()
            );
        }
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
