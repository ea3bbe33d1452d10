use chrono::Utc;

use super::message::{DraftMessage, Message};
use super::message_store::ConversationTicket;
use super::message_streaming::UpdateTrigger;
use super::scroll_controller::ScrollDecision;
use super::utils::lock;
use super::ChatSession;
use crate::error::{ChatError, Result};

impl ChatSession {
    /// Shows `body` in the open conversation immediately and delivers it in
    /// the background. Returns the optimistic id.
    ///
    /// A failed delivery removes the message again and publishes
    /// [`UpdateTrigger::SendRolledBack`] with the draft text.
    pub async fn send(&self, body: &str) -> Result<String> {
        let (ticket, temp_id) = self.insert_optimistic(body)?;

        let session = self.clone();
        let pending_id = temp_id.clone();
        tokio::spawn(async move {
            if let Err(e) = session.deliver(&ticket, &pending_id).await {
                tracing::warn!(
                    target: "carechat::chat::send",
                    "Delivery of {} failed: {}",
                    pending_id,
                    e
                );
            }
        });

        Ok(temp_id)
    }

    /// Like [`Self::send`] but waits for delivery, reconciliation and the
    /// assistant's reply if one is due. Returns the server id.
    pub async fn send_and_wait(&self, body: &str) -> Result<String> {
        let (ticket, temp_id) = self.insert_optimistic(body)?;
        self.deliver(&ticket, &temp_id).await
    }

    fn insert_optimistic(&self, body: &str) -> Result<(ConversationTicket, String)> {
        let draft = DraftMessage::new(
            self.inner.session.user_id.clone(),
            self.inner.session.role,
            body,
        );

        let mut store = lock(&self.inner.store);
        let ticket = store
            .ticket()
            .cloned()
            .ok_or(ChatError::NoOpenConversation)?;
        let temp_id = store.send_optimistic(&ticket, draft, Utc::now())?;

        // the user's own message always brings the view to the bottom
        let decision = lock(&self.inner.scroll).scroll_to_bottom();
        self.publish(
            &store,
            UpdateTrigger::OptimisticInserted {
                temp_id: temp_id.clone(),
            },
            decision,
        );
        Ok((ticket, temp_id))
    }

    async fn deliver(&self, ticket: &ConversationTicket, temp_id: &str) -> Result<String> {
        let pending = lock(&self.inner.store)
            .pending_send(temp_id)
            .cloned()
            .ok_or_else(|| ChatError::StaleConversation(ticket.conversation_id().to_string()))?;
        let draft = pending.draft;

        let receipt = match self
            .inner
            .backend
            .send_message(
                ticket.conversation_id(),
                &draft.sender_id,
                &draft.body,
                draft.flags,
            )
            .await
        {
            Ok(receipt) => receipt,
            Err(source) => {
                self.roll_back(ticket, temp_id, &source.to_string());
                return Err(ChatError::SendFailed {
                    temp_id: temp_id.to_string(),
                    draft: draft.body,
                    source,
                });
            }
        };

        lock(&self.inner.store).confirm_send(ticket, temp_id, &receipt)?;
        tracing::debug!(
            target: "carechat::chat::send",
            "Message {} accepted as {}",
            temp_id,
            receipt.id
        );

        match self.refresh_latest(ticket).await {
            Ok(_) => {}
            Err(e) if e.is_stale() => return Err(e),
            // the poll picks the server copy up later
            Err(e) => tracing::warn!(
                target: "carechat::chat::send",
                "Refetch after sending {} failed: {}",
                receipt.id,
                e
            ),
        }

        let sent = draft.into_server_copy(
            ticket.conversation_id(),
            receipt.id.clone(),
            receipt.created_at,
        );
        self.answer(ticket, &sent).await;

        Ok(receipt.id)
    }

    fn roll_back(&self, ticket: &ConversationTicket, temp_id: &str, reason: &str) {
        let mut store = lock(&self.inner.store);
        let Ok(Some(pending)) = store.fail_send(ticket, temp_id) else {
            return;
        };
        self.publish(
            &store,
            UpdateTrigger::SendRolledBack {
                temp_id: temp_id.to_string(),
                draft: pending.draft.body,
                reason: reason.to_string(),
            },
            ScrollDecision::PreserveViewport,
        );
    }

    /// Asks the assistant to answer `message` if it qualifies and merges the
    /// reply. Failures only produce a transient notice.
    async fn answer(&self, ticket: &ConversationTicket, message: &Message) {
        let Some(context) = self
            .context()
            .filter(|context| context.conversation_id == ticket.conversation_id())
        else {
            return;
        };

        match self.inner.assistant.maybe_trigger(message, &context).await {
            Ok(None) => {}
            Ok(Some(reply)) => {
                let mut store = lock(&self.inner.store);
                let outcome = match store.merge_server_messages(ticket, std::slice::from_ref(&reply)) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::debug!(
                            target: "carechat::chat::assistant",
                            "Dropping assistant reply {}: {}",
                            reply.id,
                            e
                        );
                        return;
                    }
                };
                let decision = lock(&self.inner.scroll).on_new_messages(outcome.new_message_count());
                self.publish(
                    &store,
                    UpdateTrigger::AssistantReplied { message_id: reply.id },
                    decision,
                );
            }
            Err(e) => {
                tracing::warn!(
                    target: "carechat::chat::assistant",
                    "{}",
                    e
                );
                let store = lock(&self.inner.store);
                if store.is_current(ticket) {
                    self.publish(
                        &store,
                        UpdateTrigger::AssistantUnavailable {
                            reason: e.to_string(),
                        },
                        ScrollDecision::PreserveViewport,
                    );
                }
            }
        }
    }

    /// Marks `message_ids` as read by the signed-in user.
    ///
    /// The local change is immediate and never rolled back; the backend is
    /// told in the background, best effort. Returns the ids whose read state
    /// changed.
    pub async fn mark_read(&self, message_ids: &[String]) -> Result<Vec<String>> {
        let reader_id = self.inner.session.user_id.clone();
        let changed = {
            let mut store = lock(&self.inner.store);
            let ticket = store
                .ticket()
                .cloned()
                .ok_or(ChatError::NoOpenConversation)?;
            let changed = store.mark_read(&ticket, message_ids, &reader_id)?;
            if !changed.is_empty() {
                self.publish(
                    &store,
                    UpdateTrigger::ReadStateChanged {
                        message_ids: changed.clone(),
                    },
                    ScrollDecision::PreserveViewport,
                );
            }
            changed
        };
        if changed.is_empty() {
            return Ok(changed);
        }

        let backend = self.inner.backend.clone();
        let ids = changed.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.mark_messages_read(&ids, &reader_id).await {
                tracing::warn!(
                    target: "carechat::chat::read_receipts",
                    "Failed to record read receipts for {} messages: {}",
                    ids.len(),
                    e
                );
            }
        });

        Ok(changed)
    }
}
