//! Auto-scroll decisions for the message list.
//!
//! The controller never touches the message set; it only turns store changes
//! and scroll events into a [`ScrollDecision`] for the view.

use serde::{Deserialize, Serialize};

/// Read-only view of the scroll state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScrollState {
    pub is_user_scrolled_away: bool,
    pub pending_new_message_count: usize,
}

/// What the view should do after a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScrollDecision {
    /// Jump to the newest message
    ScrollToBottom,
    /// Leave the viewport where it is and show a "new messages" badge
    ShowNewMessagesIndicator { pending: usize },
    /// Leave the viewport where it is
    PreserveViewport,
}

#[derive(Debug, Clone)]
pub struct ScrollController {
    threshold_px: f64,
    state: ScrollState,
}

impl ScrollController {
    pub fn new(threshold_px: f64) -> Self {
        Self {
            threshold_px,
            state: ScrollState::default(),
        }
    }

    pub fn state(&self) -> ScrollState {
        self.state
    }

    pub fn threshold_px(&self) -> f64 {
        self.threshold_px
    }

    /// Raw scroll event. Moving further than the threshold from the bottom
    /// marks the user as reading history; coming back within it counts as
    /// having caught up.
    pub fn on_scroll(&mut self, distance_from_bottom_px: f64) {
        if distance_from_bottom_px > self.threshold_px {
            self.state.is_user_scrolled_away = true;
        } else if self.state.is_user_scrolled_away {
            self.state = ScrollState::default();
        }
    }

    /// Explicit "jump to latest" from the user.
    pub fn scroll_to_bottom(&mut self) -> ScrollDecision {
        self.state = ScrollState::default();
        ScrollDecision::ScrollToBottom
    }

    /// `count` messages were appended at the newest end.
    pub fn on_new_messages(&mut self, count: usize) -> ScrollDecision {
        if count == 0 {
            return ScrollDecision::PreserveViewport;
        }
        if self.state.is_user_scrolled_away {
            self.state.pending_new_message_count += count;
            ScrollDecision::ShowNewMessagesIndicator {
                pending: self.state.pending_new_message_count,
            }
        } else {
            ScrollDecision::ScrollToBottom
        }
    }

    /// Older history was prepended. Never scrolls.
    pub fn on_older_page(&mut self) -> ScrollDecision {
        ScrollDecision::PreserveViewport
    }

    /// A different conversation was opened.
    pub fn reset(&mut self) {
        self.state = ScrollState::default();
    }
}
