//! Per-conversation broadcast channels.
//!
//! Streams are created lazily on subscribe and removed once every receiver is
//! gone.

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::types::MessageUpdate;

const BUFFER_SIZE: usize = 100;

pub struct MessageStreamManager {
    streams: DashMap<String, broadcast::Sender<MessageUpdate>>,
}

impl MessageStreamManager {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    pub fn subscribe(&self, conversation_id: &str) -> broadcast::Receiver<MessageUpdate> {
        self.streams
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(BUFFER_SIZE).0)
            .subscribe()
    }

    pub fn emit(&self, update: MessageUpdate) {
        let conversation_id = update.conversation_id.clone();
        if let Some(sender) = self.streams.get(&conversation_id) {
            if sender.send(update).is_err() && sender.receiver_count() == 0 {
                drop(sender);
                self.streams.remove(&conversation_id);
            }
        }
    }

    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        self.streams
            .get(conversation_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MessageStreamManager {
    fn default() -> Self {
        Self::new()
    }
}
