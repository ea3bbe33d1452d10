//! Day bucketing for the message list.
//!
//! Pure functions over an already ordered slice of messages. Groups are
//! derived data: they are recomputed whenever the merged list changes and are
//! never mutated on their own.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeZone};
use serde::Serialize;

use super::message::{Message, MessageTimestamp};

/// Key of a day bucket.
///
/// Dates sort before raw keys, so messages with broken timestamps end up in
/// trailing groups instead of being interleaved with real days.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DayKey {
    Date(NaiveDate),
    /// Raw `created_at` text of a message whose timestamp did not parse
    Raw(String),
}

impl std::fmt::Display for DayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DayKey::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            DayKey::Raw(raw) => f.write_str(raw),
        }
    }
}

/// One day of messages, ready for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateGroup {
    pub key: DayKey,
    pub messages: Vec<Message>,
    /// Initial expansion state; not persisted
    pub default_expanded: bool,
}

pub fn day_key<Tz: TimeZone>(created_at: &MessageTimestamp, tz: &Tz) -> DayKey {
    match created_at {
        MessageTimestamp::Parsed(dt) => DayKey::Date(dt.with_timezone(tz).date_naive()),
        MessageTimestamp::Unparsed(raw) => DayKey::Raw(raw.clone()),
    }
}

/// Buckets messages by display-local day. Input order is kept inside each
/// bucket and buckets iterate in ascending key order.
pub fn group_by_day<'a, Tz: TimeZone>(
    messages: &'a [Message],
    tz: &Tz,
) -> BTreeMap<DayKey, Vec<&'a Message>> {
    let mut groups: BTreeMap<DayKey, Vec<&'a Message>> = BTreeMap::new();
    for message in messages {
        groups
            .entry(day_key(&message.created_at, tz))
            .or_default()
            .push(message);
    }
    groups
}

/// Today and yesterday start expanded. Raw keys always do, so messages with
/// broken timestamps are never hidden.
pub fn is_default_expanded<Tz: TimeZone>(key: &DayKey, now: &DateTime<Tz>) -> bool {
    match key {
        DayKey::Date(date) => {
            let today = now.date_naive();
            *date == today || today.pred_opt() == Some(*date)
        }
        DayKey::Raw(_) => true,
    }
}

/// Groups `messages` in the zone of `now` and attaches the expansion policy.
pub fn build_groups<Tz: TimeZone>(messages: &[Message], now: &DateTime<Tz>) -> Vec<DateGroup> {
    group_by_day(messages, &now.timezone())
        .into_iter()
        .map(|(key, bucket)| DateGroup {
            default_expanded: is_default_expanded(&key, now),
            messages: bucket.into_iter().cloned().collect(),
            key,
        })
        .collect()
}
