//! Database view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};

use crate::model::BatchStatus;

/// Cancellation flags re-read at every city checkpoint.
#[derive(Debug, Clone)]
pub struct CancellationState {
    pub status: BatchStatus,
    pub cancel_requested_at: Option<DateTime<Utc>>,
}

impl CancellationState {
    pub fn is_requested(&self) -> bool {
        self.cancel_requested_at.is_some()
            || matches!(
                self.status,
                BatchStatus::CancelRequested | BatchStatus::Cancelled
            )
    }
}

/// Graph object ids collected for an item that went all the way through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemObjects {
    pub meta_city_key: String,
    pub ad_set_id: String,
    pub ad_creative_id: String,
    pub ad_id: String,
    pub image_hash: Option<String>,
    pub video_id: Option<String>,
}

/// Counters of a batch as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCounters {
    pub total_items: i64,
    pub processed_items: i64,
    pub success_count: i64,
    pub error_count: i64,
}
