//! Fixed-size paging over a conversation's history.
//!
//! The paginator only fetches. Merging is the store's job, so a page is handed
//! back untouched and the cursor only moves when the caller records a page it
//! actually merged.

use std::sync::{Arc, Mutex};

use super::message::Message;
use super::utils::lock;
use crate::backend::MessageBackend;
use crate::error::{ChatError, Result};
use crate::types::SenderRole;

/// One fetched batch. Items are newest first, as served.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationPage {
    pub conversation_id: String,
    /// 1-based page number
    pub page_index: u32,
    pub items: Vec<Message>,
    /// A full page suggests more history exists. A conversation whose size is
    /// an exact multiple of the page size reports one extra, empty page.
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PageCursor {
    conversation_id: Option<String>,
    next_page: u32,
    has_more: bool,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self {
            conversation_id: None,
            next_page: 1,
            has_more: true,
        }
    }
}

pub struct Paginator {
    backend: Arc<dyn MessageBackend>,
    page_size: usize,
    caller_role: SenderRole,
    cursor: Mutex<PageCursor>,
}

impl std::fmt::Debug for Paginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paginator")
            .field("page_size", &self.page_size)
            .field("caller_role", &self.caller_role)
            .field("cursor", &*lock(&self.cursor))
            .finish()
    }
}

impl Paginator {
    pub fn new(backend: Arc<dyn MessageBackend>, page_size: usize, caller_role: SenderRole) -> Self {
        Self {
            backend,
            page_size,
            caller_role,
            cursor: Mutex::new(PageCursor::default()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetches page `page_number` (1-based) of `conversation_id`.
    ///
    /// A failed fetch yields [`ChatError::FetchFailed`]; the cursor does not
    /// move, so calling again retries the same page. There is no automatic
    /// retry.
    pub async fn load_page(&self, conversation_id: &str, page_number: u32) -> Result<ConversationPage> {
        if conversation_id.trim().is_empty() {
            return Err(ChatError::InvalidInput(
                "conversation id must not be empty".to_string(),
            ));
        }
        if page_number == 0 {
            return Err(ChatError::InvalidInput(
                "page numbers start at 1".to_string(),
            ));
        }

        let offset = (page_number as usize - 1) * self.page_size;
        let items = self
            .backend
            .fetch_message_page(conversation_id, self.page_size, offset, self.caller_role)
            .await
            .map_err(|source| ChatError::FetchFailed {
                conversation_id: conversation_id.to_string(),
                page: page_number,
                source,
            })?;

        tracing::debug!(
            target: "carechat::paginator",
            "Fetched page {} of {} ({} items)",
            page_number,
            conversation_id,
            items.len()
        );

        Ok(ConversationPage {
            conversation_id: conversation_id.to_string(),
            page_index: page_number,
            has_more: items.len() == self.page_size,
            items,
        })
    }

    /// Points the cursor at page 1 of `conversation_id`.
    pub fn reset(&self, conversation_id: &str) {
        *lock(&self.cursor) = PageCursor {
            conversation_id: Some(conversation_id.to_string()),
            ..PageCursor::default()
        };
    }

    /// The next page to request for `conversation_id`, or `None` once the
    /// history is exhausted or the cursor belongs to another conversation.
    pub fn next_page(&self, conversation_id: &str) -> Option<u32> {
        let cursor = lock(&self.cursor);
        (cursor.conversation_id.as_deref() == Some(conversation_id) && cursor.has_more)
            .then_some(cursor.next_page)
    }

    pub fn has_more(&self, conversation_id: &str) -> bool {
        self.next_page(conversation_id).is_some()
    }

    /// Advances the cursor past `page` if it is the page the cursor expects.
    /// Refetches of earlier pages (polling) leave the cursor alone.
    pub fn record(&self, page: &ConversationPage) {
        let mut cursor = lock(&self.cursor);
        if cursor.conversation_id.as_deref() == Some(page.conversation_id.as_str())
            && page.page_index == cursor.next_page
        {
            cursor.next_page += 1;
            cursor.has_more = page.has_more;
        }
    }
}
