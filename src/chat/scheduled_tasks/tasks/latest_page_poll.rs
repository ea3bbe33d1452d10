use std::time::Duration;

use async_trait::async_trait;

use crate::chat::ChatSession;
use crate::chat::message_store::ConversationTicket;
use crate::chat::scheduled_tasks::Task;
use crate::error::Result;

/// Refetches the newest page of the open conversation and merges it.
pub(crate) struct LatestPagePoll {
    ticket: ConversationTicket,
    interval: Duration,
}

impl LatestPagePoll {
    pub(crate) fn new(ticket: ConversationTicket, interval: Duration) -> Self {
        Self { ticket, interval }
    }
}

#[async_trait]
impl Task for LatestPagePoll {
    fn name(&self) -> &'static str {
        "latest_page_poll"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, session: &ChatSession) -> Result<()> {
        let outcome = session.refresh_latest(&self.ticket).await?;

        tracing::trace!(
            target: "carechat::scheduler::latest_page_poll",
            "Polled {}: {} new, {} reconciled",
            self.ticket.conversation_id(),
            outcome.new_message_count(),
            outcome.reconciled.len()
        );
        Ok(())
    }
}
