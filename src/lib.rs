//! Client-side chat core for care-team messaging.
//!
//! Paging through history, optimistic sends with reconciliation, day
//! grouping, auto-scroll decisions and assistant replies, for one open
//! conversation at a time. Storage and delivery sit behind the traits in
//! [`backend`].

use std::path::Path;
use std::sync::{Mutex, OnceLock};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt::Layer, prelude::*, registry::Registry};

pub mod backend;
pub mod chat;
pub mod config;
mod error;
pub mod types;

pub use crate::backend::{
    AssistantBackend, AssistantReply, BackendError, MessageBackend, RestBackend, SendReceipt,
};
pub use crate::chat::ChatSession;
pub use crate::chat::date_grouper::{DateGroup, DayKey};
pub use crate::chat::message::{DraftMessage, Message, MessageOrigin, MessageTimestamp, SendFlags};
pub use crate::chat::message_store::{ConversationStatistics, LoadState, MessageStore};
pub use crate::chat::message_streaming::{ConversationSubscription, MessageUpdate, UpdateTrigger};
pub use crate::chat::scroll_controller::{ScrollDecision, ScrollState};
pub use crate::config::{BackendConfig, CarechatConfig, ChatConfig};
pub use crate::error::{ChatError, Result};
pub use crate::types::{ConversationContext, ConversationKind, SenderRole, Session};

static TRACING_GUARDS: OnceLock<Mutex<Option<(WorkerGuard, WorkerGuard)>>> = OnceLock::new();
static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Sets up logging to stdout and to a daily rolling file in `logs_dir`.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Only the first
/// call does anything.
pub fn init_tracing(logs_dir: &Path) -> Result<()> {
    if TRACING_INIT.get().is_some() {
        return Ok(());
    }

    std::fs::create_dir_all(logs_dir)?;
    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("carechat")
        .filename_suffix("log")
        .build(logs_dir)
        .map_err(|e| ChatError::LoggingSetup(e.to_string()))?;

    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let stdout_layer = Layer::new()
        .with_writer(non_blocking_stdout)
        .with_ansi(true)
        .with_target(true);

    let file_layer = Layer::new()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true);

    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ChatError::LoggingSetup(e.to_string()))?;

    TRACING_GUARDS
        .set(Mutex::new(Some((file_guard, stdout_guard))))
        .ok();
    TRACING_INIT.set(()).ok();
    Ok(())
}
