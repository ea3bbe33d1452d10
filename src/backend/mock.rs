//! In-memory collaborators for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Semaphore;

use super::{AssistantBackend, AssistantReply, BackendError, MessageBackend, SendReceipt};
use crate::chat::message::{Message, MessageOrigin, MessageTimestamp, SendFlags};
use crate::types::SenderRole;

/// Stores messages per conversation and serves them newest first.
#[derive(Default)]
pub(crate) struct MockMessageBackend {
    messages: Mutex<HashMap<String, Vec<Message>>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    next_id: AtomicUsize,
    pub(crate) fail_fetch: AtomicBool,
    pub(crate) fail_send: AtomicBool,
    pub(crate) fail_mark_read: AtomicBool,
    pub(crate) fetch_calls: AtomicUsize,
    pub(crate) send_calls: AtomicUsize,
    pub(crate) mark_read_calls: AtomicUsize,
    pub(crate) last_fetch: Mutex<Option<(String, usize, usize, SenderRole)>>,
}

impl MockMessageBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seed(&self, message: Message) {
        let mut messages = self.messages.lock().unwrap();
        messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    /// Seeds `count` messages one minute apart, ids `{prefix}-{n}` oldest first.
    pub(crate) fn seed_history(&self, conversation_id: &str, prefix: &str, count: usize) {
        let start = Utc::now() - Duration::days(3);
        for n in 0..count {
            self.seed(server_message(
                &format!("{}-{}", prefix, n),
                conversation_id,
                "doc-1",
                &format!("history {}", n),
                MessageTimestamp::Parsed(start + Duration::minutes(n as i64)),
            ));
        }
    }

    /// Blocks fetches for `conversation_id` until [`Self::release`] is called.
    pub(crate) fn hold(&self, conversation_id: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub(crate) fn release(&self, conversation_id: &str) {
        if let Some(gate) = self.gates.lock().unwrap().remove(conversation_id) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub(crate) fn stored(&self, conversation_id: &str) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

pub(crate) fn server_message(
    id: &str,
    conversation_id: &str,
    sender_id: &str,
    body: &str,
    created_at: MessageTimestamp,
) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        sender_role: SenderRole::Doctor,
        body: body.to_string(),
        is_system_message: false,
        is_assistant_message: false,
        created_at,
        read_by: None,
        origin: MessageOrigin::Server,
    }
}

#[async_trait]
impl MessageBackend for MockMessageBackend {
    async fn fetch_message_page(
        &self,
        conversation_id: &str,
        limit: usize,
        offset: usize,
        caller_role: SenderRole,
    ) -> Result<Vec<Message>, BackendError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_fetch.lock().unwrap() =
            Some((conversation_id.to_string(), limit, offset, caller_role));

        let gate = self.gates.lock().unwrap().get(conversation_id).cloned();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| BackendError::Other(e.to_string()))?;
        }

        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(BackendError::Other("fetch unavailable".to_string()));
        }

        let mut stored = self.stored(conversation_id);
        stored.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stored.into_iter().skip(offset).take(limit).collect())
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
        flags: SendFlags,
    ) -> Result<SendReceipt, BackendError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 500,
                body: "send rejected".to_string(),
            });
        }

        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let created_at = MessageTimestamp::Parsed(Utc::now());
        let mut message = server_message(&id, conversation_id, sender_id, body, created_at.clone());
        message.sender_role = SenderRole::Patient;
        message.is_system_message = flags.is_system_message;
        message.is_assistant_message = flags.is_assistant_message;
        self.seed(message);

        Ok(SendReceipt { id, created_at })
    }

    async fn mark_messages_read(
        &self,
        message_ids: &[String],
        reader_id: &str,
    ) -> Result<(), BackendError> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_mark_read.load(Ordering::SeqCst) {
            return Err(BackendError::Other("receipts unavailable".to_string()));
        }
        let mut messages = self.messages.lock().unwrap();
        for message in messages.values_mut().flatten() {
            if message_ids.contains(&message.id) {
                message.mark_read_by(reader_id);
            }
        }
        Ok(())
    }
}

/// Assistant that answers every request with the same text.
pub(crate) struct MockAssistant {
    pub(crate) reply_body: String,
    pub(crate) fail: AtomicBool,
    pub(crate) calls: AtomicUsize,
    pub(crate) requests: Mutex<Vec<(String, String)>>,
    /// Row id reported with the reply, if any
    pub(crate) stored_id: Mutex<Option<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockAssistant {
    pub(crate) fn new(reply_body: &str) -> Self {
        Self {
            reply_body: reply_body.to_string(),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            stored_id: Mutex::new(None),
            gate: Mutex::new(None),
        }
    }

    pub(crate) fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }
}

#[async_trait]
impl AssistantBackend for MockAssistant {
    async fn request_assistant_reply(
        &self,
        conversation_id: &str,
        body: &str,
    ) -> Result<AssistantReply, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), body.to_string()));

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| BackendError::Other(e.to_string()))?;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Other("assistant offline".to_string()));
        }
        Ok(AssistantReply {
            reply_body: self.reply_body.clone(),
            message_id: self.stored_id.lock().unwrap().clone(),
            created_at: None,
        })
    }
}
