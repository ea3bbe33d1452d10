//! Matching local entries to their server copies.
//!
//! Sends carry no client correlation id, so a server message is matched to an
//! optimistic or provisional entry by sender, trimmed body and time proximity.
//! Once a send is confirmed the receipt's server id is known and takes
//! precedence.

use std::collections::HashMap;
use std::time::Duration;

use super::types::PendingSend;
use crate::chat::message::{Message, MessageTimestamp};

/// Whether two timestamps are at most `tolerance` apart. Unparsed timestamps
/// never match.
pub(crate) fn within_tolerance(
    a: &MessageTimestamp,
    b: &MessageTimestamp,
    tolerance: Duration,
) -> bool {
    match (a.as_datetime(), b.as_datetime()) {
        (Some(a), Some(b)) => (a - b)
            .abs()
            .to_std()
            .is_ok_and(|distance| distance <= tolerance),
        _ => false,
    }
}

fn content_matches(optimistic: &Message, server: &Message, tolerance: Duration) -> bool {
    optimistic.sender_id == server.sender_id
        && optimistic.body.trim() == server.body.trim()
        && within_tolerance(&optimistic.created_at, &server.created_at, tolerance)
}

/// Index of the local entry in `messages` that `server` supersedes.
///
/// A confirmed send whose receipt id equals `server.id` wins. Otherwise the
/// earliest content match is taken, skipping sends already confirmed under a
/// different id.
pub(crate) fn find_counterpart(
    messages: &[Message],
    pending: &HashMap<String, PendingSend>,
    server: &Message,
    tolerance: Duration,
) -> Option<usize> {
    let by_receipt = messages.iter().position(|m| {
        m.is_optimistic()
            && pending
                .get(&m.id)
                .and_then(|p| p.server_id.as_deref())
                .is_some_and(|id| id == server.id)
    });
    if by_receipt.is_some() {
        return by_receipt;
    }

    messages.iter().position(|m| {
        if !m.is_local() {
            return false;
        }
        let confirmed_elsewhere = pending
            .get(&m.id)
            .and_then(|p| p.server_id.as_deref())
            .is_some_and(|id| id != server.id);
        !confirmed_elsewhere && content_matches(m, server, tolerance)
    })
}
