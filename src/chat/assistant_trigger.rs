//! Deciding when the assistant answers, and turning its reply into a message.
//!
//! At most one assistant request runs per conversation; further qualifying
//! messages that arrive meanwhile are dropped rather than queued. A per
//! conversation marker remembers the last message handled so the same message
//! seen again never produces a second reply.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::message::{Message, MessageOrigin, MessageTimestamp};
use crate::backend::AssistantBackend;
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::types::{ConversationContext, ConversationKind, SenderRole};

pub struct AssistantTrigger {
    backend: Arc<dyn AssistantBackend>,
    mention_tokens: Vec<String>,
    sentinel_id: String,
    /// Per-conversation guards so only one request is in flight at a time
    in_flight: DashMap<String, Arc<Semaphore>>,
    last_processed: DashMap<String, String>,
}

impl std::fmt::Debug for AssistantTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantTrigger")
            .field("mention_tokens", &self.mention_tokens)
            .field("sentinel_id", &self.sentinel_id)
            .finish()
    }
}

impl AssistantTrigger {
    pub fn new(backend: Arc<dyn AssistantBackend>, config: &ChatConfig) -> Self {
        Self {
            backend,
            mention_tokens: config
                .mention_tokens
                .iter()
                .map(|token| token.to_lowercase())
                .filter(|token| !token.is_empty())
                .collect(),
            sentinel_id: config.assistant_sentinel_id.clone(),
            in_flight: DashMap::new(),
            last_processed: DashMap::new(),
        }
    }

    pub fn sentinel_id(&self) -> &str {
        &self.sentinel_id
    }

    /// Whether `body` mentions the assistant. A token only counts when it is
    /// not the start of a longer word, so `@aiden` does not summon anyone.
    pub fn mentions_assistant(&self, body: &str) -> bool {
        let lowered = body.to_lowercase();
        self.mention_tokens.iter().any(|token| {
            lowered.match_indices(token.as_str()).any(|(start, _)| {
                lowered[start + token.len()..]
                    .chars()
                    .next()
                    .is_none_or(|next| !(next.is_alphanumeric() || next == '_'))
            })
        })
    }

    fn is_from_assistant(&self, message: &Message) -> bool {
        message.is_assistant_message
            || message.sender_role == SenderRole::Assistant
            || message.sender_id == self.sentinel_id
    }

    /// Whether `message` should get an assistant reply.
    pub fn should_trigger(&self, message: &Message, context: &ConversationContext) -> bool {
        if message.is_system_message || self.is_from_assistant(message) {
            return false;
        }
        let already_processed = self
            .last_processed
            .get(&context.conversation_id)
            .is_some_and(|last| *last == message.id);
        if already_processed {
            return false;
        }

        self.mentions_assistant(&message.body)
            || (context.kind == ConversationKind::CareTeam
                && message.sender_role == SenderRole::Patient)
    }

    pub fn is_in_flight(&self, conversation_id: &str) -> bool {
        self.in_flight
            .get(conversation_id)
            .is_some_and(|guard| guard.available_permits() == 0)
    }

    /// Drops what is remembered about `conversation_id` once it is no longer
    /// open. A request still running keeps its own guard and its reply is
    /// discarded by the caller as stale.
    pub fn forget(&self, conversation_id: &str) {
        self.in_flight.remove(conversation_id);
        self.last_processed.remove(conversation_id);
    }

    #[cfg(test)]
    pub(crate) fn remembers(&self, conversation_id: &str) -> bool {
        self.in_flight.contains_key(conversation_id)
            || self.last_processed.contains_key(conversation_id)
    }

    /// Requests a reply to `message` if it qualifies.
    ///
    /// Returns `Ok(None)` when the message does not qualify or a request for
    /// the conversation is already running. A failed request yields
    /// [`ChatError::AssistantUnavailable`], which never affects the user's
    /// own message.
    pub async fn maybe_trigger(
        &self,
        message: &Message,
        context: &ConversationContext,
    ) -> Result<Option<Message>> {
        if !self.should_trigger(message, context) {
            return Ok(None);
        }

        let guard = self
            .in_flight
            .entry(context.conversation_id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();
        let Ok(_permit) = guard.try_acquire_owned() else {
            tracing::debug!(
                target: "carechat::assistant_trigger",
                "Assistant request already in flight for {}, dropping {}",
                context.conversation_id,
                message.id
            );
            return Ok(None);
        };

        // marked before the request so a repeat delivery during the await is refused
        self.last_processed
            .insert(context.conversation_id.clone(), message.id.clone());

        self.trigger(message, context).await.map(Some)
    }

    /// Calls the assistant for `message` and builds the reply message.
    /// Callers are expected to have checked [`Self::should_trigger`].
    pub async fn trigger(&self, message: &Message, context: &ConversationContext) -> Result<Message> {
        tracing::debug!(
            target: "carechat::assistant_trigger",
            "Requesting assistant reply to {} in {}",
            message.id,
            context.conversation_id
        );

        let reply = self
            .backend
            .request_assistant_reply(&context.conversation_id, &message.body)
            .await
            .map_err(|source| ChatError::AssistantUnavailable {
                conversation_id: context.conversation_id.clone(),
                source,
            })?;

        // never place the reply before the message it answers
        let created_at = reply.created_at.unwrap_or_else(|| {
            let now = MessageTimestamp::Parsed(Utc::now());
            std::cmp::max(now, message.created_at.clone())
        });

        // without the stored row id the reply stays provisional until the
        // stored copy is merged in its place
        let (id, origin) = match reply.message_id {
            Some(id) => (id, MessageOrigin::Server),
            None => (
                format!("assistant-{}", Uuid::new_v4()),
                MessageOrigin::Provisional,
            ),
        };

        Ok(Message {
            id,
            conversation_id: context.conversation_id.clone(),
            sender_id: self.sentinel_id.clone(),
            sender_role: SenderRole::Assistant,
            body: reply.reply_body,
            is_system_message: false,
            is_assistant_message: true,
            created_at,
            read_by: None,
            origin,
        })
    }
}
