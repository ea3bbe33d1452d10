//! The chat core behind a conversation screen.
//!
//! [`ChatSession`] ties the message store, paginator, scroll controller and
//! assistant trigger together and is the only thing a UI talks to. Async work
//! never holds a lock across an await; every completion is checked against the
//! conversation ticket it was started with.

pub mod assistant_trigger;
pub mod date_grouper;
pub mod message;
pub mod message_store;
pub mod message_streaming;
pub mod paginator;
pub mod scheduled_tasks;
pub mod scroll_controller;
mod sending;
pub(crate) mod utils;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex};

use chrono::{Local, Utc};
use tokio::sync::mpsc::Sender;

use crate::backend::{AssistantBackend, MessageBackend};
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::types::{ConversationContext, Session};
use assistant_trigger::AssistantTrigger;
use date_grouper::DateGroup;
use message::Message;
use message_store::{
    ConversationStatistics, ConversationTicket, LoadState, MergeOutcome, MessageStore, StoreConfig,
};
use message_streaming::{ConversationSubscription, MessageStreamManager, MessageUpdate, UpdateTrigger};
use paginator::Paginator;
use scheduled_tasks::tasks::LatestPagePoll;
use scroll_controller::{ScrollController, ScrollDecision, ScrollState};
use utils::lock;

pub(crate) struct ChatSessionInner {
    session: Session,
    config: ChatConfig,
    backend: Arc<dyn MessageBackend>,
    paginator: Paginator,
    assistant: AssistantTrigger,
    streams: MessageStreamManager,
    // lock order: store, then scroll
    store: Mutex<MessageStore>,
    scroll: Mutex<ScrollController>,
    context: Mutex<Option<ConversationContext>>,
    poll_shutdown: Mutex<Option<Sender<()>>>,
}

/// Handle to the chat core for one signed-in user. Cheap to clone.
#[derive(Clone)]
pub struct ChatSession {
    pub(crate) inner: Arc<ChatSessionInner>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("session", &self.inner.session)
            .field("context", &*lock(&self.inner.context))
            .finish()
    }
}

impl ChatSession {
    pub fn new(
        session: Session,
        config: ChatConfig,
        backend: Arc<dyn MessageBackend>,
        assistant: Arc<dyn AssistantBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let paginator = Paginator::new(backend.clone(), config.page_size, session.role);
        let inner = ChatSessionInner {
            paginator,
            assistant: AssistantTrigger::new(assistant, &config),
            streams: MessageStreamManager::new(),
            store: Mutex::new(MessageStore::with_config(StoreConfig::from(&config))),
            scroll: Mutex::new(ScrollController::new(config.scroll_threshold_px)),
            context: Mutex::new(None),
            poll_shutdown: Mutex::new(None),
            session,
            config,
            backend,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    pub fn context(&self) -> Option<ConversationContext> {
        lock(&self.inner.context).clone()
    }

    pub fn load_state(&self) -> LoadState {
        lock(&self.inner.store).state()
    }

    /// Opens `context`, replacing whatever conversation was open, and loads
    /// its newest page.
    ///
    /// Responses still in flight for the previous conversation are discarded
    /// when they land. If this conversation is itself replaced before its
    /// first page arrives, the call returns `Ok(())` without touching
    /// anything.
    pub async fn open(&self, context: ConversationContext) -> Result<()> {
        // an invalid id leaves the open conversation and its poll untouched
        let ticket = lock(&self.inner.store).open(&context.conversation_id)?;
        self.stop_polling();
        self.inner.paginator.reset(&context.conversation_id);
        lock(&self.inner.scroll).reset();
        let previous = lock(&self.inner.context).replace(context);
        if let Some(previous) = previous {
            self.inner.assistant.forget(&previous.conversation_id);
        }
        self.start_polling(&ticket);

        tracing::info!(
            target: "carechat::chat",
            "Opening conversation {}",
            ticket.conversation_id()
        );

        match self.inner.paginator.load_page(ticket.conversation_id(), 1).await {
            Ok(page) => {
                let mut store = lock(&self.inner.store);
                match store.append_older_page(&ticket, &page) {
                    Ok(_) => {}
                    Err(e) if e.is_stale() => return Ok(()),
                    Err(e) => return Err(e),
                }
                self.inner.paginator.record(&page);
                let decision = lock(&self.inner.scroll).scroll_to_bottom();
                self.publish(&store, UpdateTrigger::ConversationOpened, decision);
                Ok(())
            }
            Err(e) => self.page_failed(&ticket, 1, e),
        }
    }

    /// Loads the next page of older history. Returns `Ok(false)` when there
    /// is nothing more to load or a load is already running.
    pub async fn load_older(&self) -> Result<bool> {
        let ticket = self.current_ticket()?;
        if !lock(&self.inner.store).begin_load_older(&ticket)? {
            return Ok(false);
        }

        let Some(page_number) = self.inner.paginator.next_page(ticket.conversation_id()) else {
            lock(&self.inner.store).fail_load(&ticket)?;
            return Ok(false);
        };

        match self
            .inner
            .paginator
            .load_page(ticket.conversation_id(), page_number)
            .await
        {
            Ok(page) => {
                let mut store = lock(&self.inner.store);
                match store.append_older_page(&ticket, &page) {
                    Ok(_) => {}
                    Err(e) if e.is_stale() => return Ok(false),
                    Err(e) => return Err(e),
                }
                self.inner.paginator.record(&page);
                let decision = lock(&self.inner.scroll).on_older_page();
                self.publish(&store, UpdateTrigger::OlderPageLoaded, decision);
                Ok(true)
            }
            Err(e) => self.page_failed(&ticket, page_number, e).map(|()| false),
        }
    }

    fn page_failed(&self, ticket: &ConversationTicket, page: u32, error: ChatError) -> Result<()> {
        let mut store = lock(&self.inner.store);
        match store.fail_load(ticket) {
            Ok(()) => {}
            Err(e) if e.is_stale() => return Ok(()),
            Err(e) => return Err(e),
        }

        tracing::warn!(
            target: "carechat::chat",
            "Failed to load page {} of {}: {}",
            page,
            ticket.conversation_id(),
            error
        );
        self.publish(
            &store,
            UpdateTrigger::FetchFailed {
                page,
                reason: error.to_string(),
            },
            ScrollDecision::PreserveViewport,
        );
        Err(error)
    }

    /// Refetches the newest page and merges it through the same
    /// dedupe and reconcile path as every other page.
    pub(crate) async fn refresh_latest(&self, ticket: &ConversationTicket) -> Result<MergeOutcome> {
        let page = self.inner.paginator.load_page(ticket.conversation_id(), 1).await?;

        let mut store = lock(&self.inner.store);
        let outcome = store.merge_latest_page(ticket, &page)?;
        self.inner.paginator.record(&page);
        self.publish_merge(&store, &outcome);
        Ok(outcome)
    }

    /// Publishes the result of a merge at the newest end, if anything changed.
    fn publish_merge(&self, store: &MessageStore, outcome: &MergeOutcome) {
        let new_messages = outcome.new_message_count();
        if new_messages > 0 {
            let decision = lock(&self.inner.scroll).on_new_messages(new_messages);
            self.publish(
                store,
                UpdateTrigger::NewMessages {
                    count: new_messages,
                },
                decision,
            );
        } else if outcome.changed() {
            self.publish(
                store,
                UpdateTrigger::Reconciled,
                ScrollDecision::PreserveViewport,
            );
        }
    }

    /// Sends the current snapshot to subscribers of the open conversation.
    fn publish(&self, store: &MessageStore, trigger: UpdateTrigger, scroll: ScrollDecision) {
        let Some(ticket) = store.ticket() else {
            return;
        };
        self.inner.streams.emit(MessageUpdate {
            conversation_id: ticket.conversation_id().to_string(),
            trigger,
            messages: store.messages().to_vec(),
            scroll,
            scroll_state: lock(&self.inner.scroll).state(),
        });
    }

    pub(crate) fn current_ticket(&self) -> Result<ConversationTicket> {
        lock(&self.inner.store)
            .ticket()
            .cloned()
            .ok_or(ChatError::NoOpenConversation)
    }

    fn start_polling(&self, ticket: &ConversationTicket) {
        let task = LatestPagePoll::new(ticket.clone(), self.inner.config.poll_interval);
        let shutdown = scheduled_tasks::spawn(Arc::new(task), Arc::downgrade(&self.inner));
        *lock(&self.inner.poll_shutdown) = Some(shutdown);
    }

    fn stop_polling(&self) {
        if let Some(shutdown) = lock(&self.inner.poll_shutdown).take() {
            // a full or closed channel means the loop is already stopping
            let _ = shutdown.try_send(());
        }
    }

    /// Subscribes to updates for `conversation_id`.
    pub fn subscribe(&self, conversation_id: &str) -> ConversationSubscription {
        let updates = self.inner.streams.subscribe(conversation_id);
        let store = lock(&self.inner.store);
        let initial_messages = match store.ticket() {
            Some(ticket) if ticket.conversation_id() == conversation_id => store.messages().to_vec(),
            _ => Vec::new(),
        };
        ConversationSubscription {
            initial_messages,
            updates,
        }
    }

    /// Snapshot of the merged message list, ascending by `created_at`.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.inner.store).messages().to_vec()
    }

    pub fn scroll_state(&self) -> ScrollState {
        lock(&self.inner.scroll).state()
    }

    pub fn scroll_to_bottom(&self) -> ScrollDecision {
        lock(&self.inner.scroll).scroll_to_bottom()
    }

    /// Reports the viewport's distance from the bottom, in pixels.
    pub fn on_scroll(&self, distance_from_bottom_px: f64) -> ScrollState {
        let mut scroll = lock(&self.inner.scroll);
        scroll.on_scroll(distance_from_bottom_px);
        scroll.state()
    }

    /// The merged list bucketed by display-local day.
    pub fn date_groups(&self) -> Vec<DateGroup> {
        let store = lock(&self.inner.store);
        match self.inner.config.display_offset {
            Some(offset) => date_grouper::build_groups(
                store.messages(),
                &Utc::now().with_timezone(&offset),
            ),
            None => date_grouper::build_groups(store.messages(), &Local::now()),
        }
    }

    pub fn statistics(&self) -> ConversationStatistics {
        lock(&self.inner.store).statistics(&self.inner.session.user_id)
    }

    /// Closes the open conversation and stops polling. Late responses are
    /// discarded.
    pub fn close(&self) {
        self.stop_polling();
        lock(&self.inner.store).close();
        lock(&self.inner.scroll).reset();
        if let Some(context) = lock(&self.inner.context).take() {
            self.inner.assistant.forget(&context.conversation_id);
            tracing::info!(
                target: "carechat::chat",
                "Closed conversation {}",
                context.conversation_id
            );
        }
    }
}
