use anyhow::Result;

use crate::db::{self, Pool};

/// Cooperative cancellation check backed by the persisted batch flags.
#[derive(Clone)]
pub struct CancellationToken {
    pool: Pool,
    batch_id: i64,
}

impl CancellationToken {
    pub fn new(pool: Pool, batch_id: i64) -> Self {
        Self { pool, batch_id }
    }

    /// Re-reads the row on every call; cancellation can arrive from another
    /// process at any time.
    pub async fn is_cancelled(&self) -> Result<bool> {
        Ok(db::fetch_cancellation(&self.pool, self.batch_id)
            .await?
            .is_requested())
    }
}
