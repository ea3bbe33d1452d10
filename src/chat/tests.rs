//! Session-level tests: the components wired together over in-memory
//! backends.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::FixedOffset;
use tokio::sync::broadcast;

use super::*;
use crate::backend::mock::{MockAssistant, MockMessageBackend, server_message};
use crate::chat::message::{MessageOrigin, MessageTimestamp};
use crate::types::{ConversationKind, SenderRole};

struct Harness {
    chat: ChatSession,
    backend: Arc<MockMessageBackend>,
    assistant: Arc<MockAssistant>,
}

fn harness_with(role: SenderRole, config: ChatConfig) -> Harness {
    let backend = Arc::new(MockMessageBackend::new());
    let assistant = Arc::new(MockAssistant::new("Drink water and rest."));
    let chat = ChatSession::new(
        Session::new("patient-1", role, "token"),
        config,
        backend.clone(),
        assistant.clone(),
    )
    .unwrap();
    Harness {
        chat,
        backend,
        assistant,
    }
}

fn harness() -> Harness {
    harness_with(
        SenderRole::Patient,
        ChatConfig {
            display_offset: FixedOffset::east_opt(0),
            ..ChatConfig::default()
        },
    )
}

fn care_team(id: &str) -> ConversationContext {
    ConversationContext::new(id, ConversationKind::CareTeam)
}

fn direct(id: &str) -> ConversationContext {
    ConversationContext::new(id, ConversationKind::Direct)
}

async fn next_update(rx: &mut broadcast::Receiver<MessageUpdate>) -> MessageUpdate {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for update")
        .expect("stream closed")
}

async fn wait_for(
    rx: &mut broadcast::Receiver<MessageUpdate>,
    matches: impl Fn(&UpdateTrigger) -> bool,
) -> MessageUpdate {
    loop {
        let update = next_update(rx).await;
        if matches(&update.trigger) {
            return update;
        }
    }
}

fn assert_sorted(messages: &[Message]) {
    for pair in messages.windows(2) {
        assert!(pair[0].created_at <= pair[1].created_at);
    }
}

#[tokio::test]
async fn test_open_loads_newest_page_and_scrolls_to_bottom() {
    let h = harness();
    h.backend.seed_history("room-1", "m", 60);
    let mut sub = h.chat.subscribe("room-1");
    assert!(sub.initial_messages.is_empty());

    h.chat.open(direct("room-1")).await.unwrap();

    let messages = h.chat.messages();
    assert_eq!(messages.len(), 50);
    assert_eq!(messages.last().unwrap().id, "m-59");
    assert_eq!(messages.first().unwrap().id, "m-10");
    assert_sorted(&messages);
    assert_eq!(h.chat.load_state(), LoadState::Ready { has_more: true });

    let update = next_update(&mut sub.updates).await;
    assert_eq!(update.trigger, UpdateTrigger::ConversationOpened);
    assert_eq!(update.scroll, ScrollDecision::ScrollToBottom);
    assert_eq!(update.messages.len(), 50);

    let late = h.chat.subscribe("room-1");
    assert_eq!(late.initial_messages.len(), 50);
}

#[tokio::test]
async fn test_load_older_while_scrolled_away_preserves_viewport() {
    let h = harness();
    h.backend.seed_history("room-1", "m", 70);
    h.chat.open(direct("room-1")).await.unwrap();
    let mut sub = h.chat.subscribe("room-1");

    h.chat.on_scroll(640.0);
    let before = h.chat.scroll_state();
    assert!(before.is_user_scrolled_away);

    assert!(h.chat.load_older().await.unwrap());

    let update = next_update(&mut sub.updates).await;
    assert_eq!(update.trigger, UpdateTrigger::OlderPageLoaded);
    assert_eq!(update.scroll, ScrollDecision::PreserveViewport);
    assert_eq!(h.chat.scroll_state(), before);
    assert_eq!(h.chat.messages().len(), 70);
    assert_sorted(&h.chat.messages());
    assert_eq!(h.chat.load_state(), LoadState::Ready { has_more: false });

    // history exhausted
    assert!(!h.chat.load_older().await.unwrap());
    assert_eq!(h.backend.fetch_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_new_message_while_scrolled_away_counts_once() {
    let h = harness();
    h.backend.seed_history("room-1", "m", 5);
    h.chat.open(direct("room-1")).await.unwrap();
    let mut sub = h.chat.subscribe("room-1");
    h.chat.on_scroll(640.0);

    h.backend.seed(server_message(
        "new-1",
        "room-1",
        "doc-1",
        "Results are in",
        MessageTimestamp::Parsed(chrono::Utc::now()),
    ));
    let ticket = h.chat.current_ticket().unwrap();
    let outcome = h.chat.refresh_latest(&ticket).await.unwrap();
    assert_eq!(outcome.new_message_count(), 1);

    let update = next_update(&mut sub.updates).await;
    assert_eq!(update.trigger, UpdateTrigger::NewMessages { count: 1 });
    assert_eq!(
        update.scroll,
        ScrollDecision::ShowNewMessagesIndicator { pending: 1 }
    );
    assert_eq!(h.chat.scroll_state().pending_new_message_count, 1);

    // the same page again changes nothing
    h.chat.refresh_latest(&ticket).await.unwrap();
    assert_eq!(h.chat.scroll_state().pending_new_message_count, 1);

    assert_eq!(h.chat.scroll_to_bottom(), ScrollDecision::ScrollToBottom);
    assert_eq!(h.chat.scroll_state(), ScrollState::default());
}

#[tokio::test]
async fn test_late_page_for_previous_conversation_is_discarded() {
    let h = harness();
    h.backend.seed_history("room-a", "a", 10);
    h.backend.seed_history("room-b", "b", 3);
    h.backend.hold("room-a");

    let opening_a = tokio::spawn({
        let chat = h.chat.clone();
        async move { chat.open(direct("room-a")).await }
    });
    while h.backend.fetch_calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    h.chat.open(direct("room-b")).await.unwrap();
    h.backend.release("room-a");
    opening_a.await.unwrap().unwrap();

    let messages = h.chat.messages();
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|m| m.conversation_id == "room-b"));
    assert_eq!(h.chat.context().unwrap().conversation_id, "room-b");
    assert_eq!(h.chat.load_state(), LoadState::Ready { has_more: false });
}

#[tokio::test]
async fn test_failed_first_page_is_retried_by_load_older() {
    let h = harness();
    h.backend.seed_history("room-1", "m", 4);
    h.backend.fail_fetch.store(true, Ordering::SeqCst);
    let mut sub = h.chat.subscribe("room-1");

    let err = h.chat.open(direct("room-1")).await.unwrap_err();
    assert!(matches!(err, ChatError::FetchFailed { page: 1, .. }));
    assert!(err.is_user_visible());
    assert!(
        matches!(next_update(&mut sub.updates).await.trigger, UpdateTrigger::FetchFailed { page: 1, .. })
    );
    assert_eq!(h.chat.load_state(), LoadState::Ready { has_more: true });

    h.backend.fail_fetch.store(false, Ordering::SeqCst);
    assert!(h.chat.load_older().await.unwrap());
    assert_eq!(h.chat.messages().len(), 4);
    assert_eq!(h.chat.load_state(), LoadState::Ready { has_more: false });
}

#[tokio::test]
async fn test_patient_mention_in_care_team_room_gets_assistant_reply() {
    let h = harness();
    h.backend.seed_history("room-1", "m", 3);
    h.chat.open(care_team("room-1")).await.unwrap();
    let mut sub = h.chat.subscribe("room-1");
    h.chat.on_scroll(640.0);

    let temp_id = h.chat.send("Hello @AI, how are you?").await.unwrap();

    let inserted = next_update(&mut sub.updates).await;
    assert_eq!(
        inserted.trigger,
        UpdateTrigger::OptimisticInserted {
            temp_id: temp_id.clone()
        }
    );
    assert_eq!(inserted.scroll, ScrollDecision::ScrollToBottom);
    let shown = inserted.messages.last().unwrap();
    assert_eq!(shown.id, temp_id);
    assert_eq!(shown.origin, MessageOrigin::Optimistic);
    assert_eq!(shown.body, "Hello @AI, how are you?");

    let replied = wait_for(&mut sub.updates, |t| {
        matches!(t, UpdateTrigger::AssistantReplied { .. })
    })
    .await;
    assert_eq!(replied.scroll, ScrollDecision::ScrollToBottom);

    let messages = h.chat.messages();
    assert_sorted(&messages);
    assert_eq!(messages.len(), 5);
    assert!(messages.iter().all(|m| !m.is_optimistic()));

    let patient = &messages[3];
    assert_eq!(patient.id, "srv-0");
    assert_eq!(patient.sender_id, "patient-1");
    assert_eq!(patient.body, "Hello @AI, how are you?");

    let reply = &messages[4];
    assert!(reply.is_assistant_message);
    assert_eq!(reply.sender_id, "ai-assistant");
    assert_eq!(reply.body, "Drink water and rest.");

    assert_eq!(
        *h.assistant.requests.lock().unwrap(),
        vec![("room-1".to_string(), "Hello @AI, how are you?".to_string())]
    );
}

#[tokio::test]
async fn test_stored_assistant_reply_replaces_local_copy() {
    let h = harness();
    h.chat.open(care_team("room-1")).await.unwrap();
    h.chat.send_and_wait("Hello @AI, how are you?").await.unwrap();

    let local = h.chat.messages();
    assert_eq!(local.len(), 2);
    assert_eq!(local[1].origin, MessageOrigin::Provisional);
    let pending_before = h.chat.scroll_state().pending_new_message_count;

    // the assistant's row shows up with the next fetch of the newest page
    let mut stored = server_message(
        "ai-row-1",
        "room-1",
        "ai-assistant",
        "Drink water and rest.",
        MessageTimestamp::Parsed(chrono::Utc::now()),
    );
    stored.sender_role = SenderRole::Assistant;
    stored.is_assistant_message = true;
    h.backend.seed(stored);
    let mut sub = h.chat.subscribe("room-1");

    let ticket = h.chat.current_ticket().unwrap();
    let outcome = h.chat.refresh_latest(&ticket).await.unwrap();
    assert_eq!(outcome.new_message_count(), 0);

    let update = next_update(&mut sub.updates).await;
    assert_eq!(update.trigger, UpdateTrigger::Reconciled);

    let replies: Vec<Message> = h
        .chat
        .messages()
        .into_iter()
        .filter(|m| m.is_assistant_message)
        .collect();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].id, "ai-row-1");
    assert_eq!(replies[0].origin, MessageOrigin::Server);
    assert_eq!(h.chat.messages().len(), 2);
    assert_eq!(
        h.chat.scroll_state().pending_new_message_count,
        pending_before
    );
}

#[tokio::test]
async fn test_plain_message_in_direct_thread_does_not_call_assistant() {
    let h = harness();
    h.chat.open(direct("room-1")).await.unwrap();

    let server_id = h.chat.send_and_wait("See you Monday").await.unwrap();

    let messages = h.chat.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, server_id);
    assert_eq!(h.assistant.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_assistant_failure_keeps_users_message() {
    let h = harness();
    h.assistant.fail.store(true, Ordering::SeqCst);
    h.chat.open(care_team("room-1")).await.unwrap();
    let mut sub = h.chat.subscribe("room-1");

    let server_id = h.chat.send_and_wait("@assistant are you there?").await.unwrap();

    wait_for(&mut sub.updates, |t| {
        matches!(t, UpdateTrigger::AssistantUnavailable { .. })
    })
    .await;
    let messages = h.chat.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, server_id);
}

#[tokio::test]
async fn test_failed_send_rolls_back_and_returns_draft() {
    let h = harness();
    h.backend.seed_history("room-1", "m", 3);
    h.chat.open(direct("room-1")).await.unwrap();
    let before = h.chat.messages();
    let mut sub = h.chat.subscribe("room-1");
    h.backend.fail_send.store(true, Ordering::SeqCst);

    let err = h.chat.send_and_wait("Can I reschedule?").await.unwrap_err();
    match &err {
        ChatError::SendFailed { draft, .. } => assert_eq!(draft, "Can I reschedule?"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_user_visible());
    assert_eq!(h.chat.messages(), before);

    wait_for(&mut sub.updates, |t| {
        matches!(t, UpdateTrigger::SendRolledBack { draft, .. } if draft == "Can I reschedule?")
    })
    .await;
    assert_eq!(h.chat.statistics().pending_send_count, 0);
}

#[tokio::test]
async fn test_send_requires_open_conversation_and_body() {
    let h = harness();
    assert!(matches!(
        h.chat.send("hello").await,
        Err(ChatError::NoOpenConversation)
    ));

    h.chat.open(direct("room-1")).await.unwrap();
    assert!(matches!(
        h.chat.send("   ").await,
        Err(ChatError::InvalidInput(_))
    ));
    assert_eq!(h.backend.send_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_mark_read_is_local_first_and_never_rolled_back() {
    let h = harness();
    h.backend.seed_history("room-1", "m", 3);
    h.backend.fail_mark_read.store(true, Ordering::SeqCst);
    h.chat.open(direct("room-1")).await.unwrap();
    assert_eq!(h.chat.statistics().unread_count, 3);

    let ids = vec!["m-0".to_string(), "m-1".to_string(), "missing".to_string()];
    let changed = h.chat.mark_read(&ids).await.unwrap();
    assert_eq!(changed, vec!["m-0".to_string(), "m-1".to_string()]);

    while h.backend.mark_read_calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.chat.statistics().unread_count, 1);

    // repeating is a no-op and does not reach the backend
    assert!(h.chat.mark_read(&ids).await.unwrap().is_empty());
    assert_eq!(h.backend.mark_read_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_polling_merges_new_messages() {
    let h = harness();
    h.backend.seed_history("room-1", "m", 2);
    h.chat.open(direct("room-1")).await.unwrap();
    let mut sub = h.chat.subscribe("room-1");
    assert_eq!(h.backend.fetch_calls.load(Ordering::SeqCst), 1);

    h.backend.seed(server_message(
        "new-1",
        "room-1",
        "doc-1",
        "How are you feeling?",
        MessageTimestamp::Parsed(chrono::Utc::now()),
    ));
    tokio::time::sleep(Duration::from_secs(6)).await;

    let update = next_update(&mut sub.updates).await;
    assert_eq!(update.trigger, UpdateTrigger::NewMessages { count: 1 });
    assert_eq!(update.scroll, ScrollDecision::ScrollToBottom);
    assert_eq!(h.chat.messages().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_open_keeps_current_conversation_polling() {
    let h = harness();
    h.chat.open(direct("room-1")).await.unwrap();
    let mut sub = h.chat.subscribe("room-1");

    let err = h.chat.open(direct("  ")).await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)));
    assert_eq!(h.chat.context().unwrap().conversation_id, "room-1");

    h.backend.seed(server_message(
        "new-1",
        "room-1",
        "doc-1",
        "Still here?",
        MessageTimestamp::Parsed(chrono::Utc::now()),
    ));
    tokio::time::sleep(Duration::from_secs(16)).await;

    assert!(h.backend.fetch_calls.load(Ordering::SeqCst) > 1);
    let update = next_update(&mut sub.updates).await;
    assert_eq!(update.trigger, UpdateTrigger::NewMessages { count: 1 });
    assert!(h.chat.messages().iter().any(|m| m.id == "new-1"));
}

#[tokio::test]
async fn test_switching_and_closing_drop_assistant_state() {
    let h = harness();
    h.chat.open(care_team("room-1")).await.unwrap();
    h.chat.send_and_wait("@ai first question").await.unwrap();
    assert!(h.chat.inner.assistant.remembers("room-1"));

    h.chat.open(care_team("room-2")).await.unwrap();
    assert!(!h.chat.inner.assistant.remembers("room-1"));

    h.chat.send_and_wait("@ai second question").await.unwrap();
    assert!(h.chat.inner.assistant.remembers("room-2"));
    h.chat.close();
    assert!(!h.chat.inner.assistant.remembers("room-2"));
    assert_eq!(h.assistant.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_close_and_switch_stop_polling() {
    let h = harness();
    h.chat.open(direct("room-1")).await.unwrap();
    h.chat.open(direct("room-2")).await.unwrap();
    assert_eq!(h.backend.fetch_calls.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let polls = h.backend.fetch_calls.load(Ordering::SeqCst);
    assert_eq!(polls, 3);
    assert_eq!(h.backend.last_fetch.lock().unwrap().as_ref().unwrap().0, "room-2");

    h.chat.close();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.backend.fetch_calls.load(Ordering::SeqCst), polls);
    assert_eq!(h.chat.load_state(), LoadState::Idle);
    assert!(h.chat.context().is_none());
}

#[tokio::test]
async fn test_date_groups_cover_every_message() {
    let h = harness();
    h.backend.seed_history("room-1", "m", 4);
    h.chat.open(direct("room-1")).await.unwrap();
    h.chat.send_and_wait("today").await.unwrap();

    let groups = h.chat.date_groups();
    let total: usize = groups.iter().map(|g| g.messages.len()).sum();
    assert_eq!(total, 5);
    for pair in groups.windows(2) {
        assert!(pair[0].key < pair[1].key);
    }

    let today = groups.last().unwrap();
    assert!(today.default_expanded);
    assert_eq!(today.messages.last().unwrap().body, "today");
    assert!(!groups.first().unwrap().default_expanded);
}

#[test]
fn test_new_rejects_invalid_config() {
    let backend = Arc::new(MockMessageBackend::new());
    let assistant = Arc::new(MockAssistant::new("unused"));
    let result = ChatSession::new(
        Session::new("patient-1", SenderRole::Patient, "token"),
        ChatConfig {
            page_size: 0,
            ..ChatConfig::default()
        },
        backend,
        assistant,
    );
    assert!(matches!(result, Err(ChatError::Configuration(_))));
}
