use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, Sender};
use tokio::time::{Instant, MissedTickBehavior};

use super::{ChatSession, ChatSessionInner};
use crate::error::Result;

pub(crate) mod tasks;

/// Trait for implementing scheduled background tasks.
///
/// Tasks run periodically while a conversation is open, first after one full
/// interval. Implementations should be idempotent and handle transient
/// failures gracefully.
#[async_trait]
pub trait Task: Send + Sync {
    /// Returns the unique name of this task for logging and identification.
    fn name(&self) -> &'static str;

    /// Returns the interval between task executions.
    fn interval(&self) -> Duration;

    /// Executes the task.
    ///
    /// Returning [`crate::ChatError::StaleConversation`] stops the task for
    /// good; any other error is logged and the task runs again next interval.
    async fn execute(&self, session: &ChatSession) -> Result<()>;
}

/// Spawns the loop running `task` and returns the sender that shuts it down.
///
/// The loop also ends when the sender is dropped or the session is gone.
pub(crate) fn spawn(task: Arc<dyn Task>, session: Weak<ChatSessionInner>) -> Sender<()> {
    let (shutdown_sender, mut shutdown) = mpsc::channel(1);

    tokio::spawn(async move {
        let period = task.interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(
            target: "carechat::scheduler",
            "Starting task {} every {:?}",
            task.name(),
            period
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    let Some(inner) = session.upgrade() else {
                        break;
                    };
                    let session = ChatSession { inner };
                    match task.execute(&session).await {
                        Ok(()) => {}
                        Err(e) if e.is_stale() => break,
                        Err(e) => {
                            tracing::warn!(
                                target: "carechat::scheduler",
                                "Task {} failed: {}",
                                task.name(),
                                e
                            );
                        }
                    }
                }
            }
        }

        tracing::debug!(
            target: "carechat::scheduler",
            "Stopped task {}",
            task.name()
        );
    });

    shutdown_sender
}
