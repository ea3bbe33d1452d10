//! Message Streaming Module
//!
//! Change notification for the open conversation. Subscribers receive an
//! update, carrying the full merged list, whenever the store changes.

mod manager;
mod types;

pub use manager::MessageStreamManager;
pub use types::{ConversationSubscription, MessageUpdate, UpdateTrigger};
