//! Notification feed of newly persisted log entries and messages.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::storage::AgentId;

/// Where a feed item was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    LogEntry,
    Message,
}

/// Announcement that a row was written for `agent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedItem {
    pub agent: AgentId,
    pub source: FeedSource,
    /// Row id in the table named by `source`.
    pub id: i64,
    /// Log entry label or message kind.
    pub event_type: String,
}

pub type FeedSender = broadcast::Sender<FeedItem>;

/// Broadcast `item`. Having no subscribers is normal.
pub fn publish(feed: &FeedSender, item: FeedItem) {
    if feed.send(item).is_err() {
        trace!("No feed subscribers");
    }
}
