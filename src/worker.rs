use crate::db::{self, Pool};
use crate::orchestrator::BatchProcessor;
use anyhow::Result;
use tracing::{error, info, instrument};

/// Claim one due job and run its batch. Returns whether a job was taken.
///
/// The job row is deleted on claim, so a batch that fails is not retried;
/// its final status is on the batch row.
#[instrument(skip_all)]
pub async fn process_next_job(pool: &Pool, processor: &BatchProcessor) -> Result<bool> {
    let Some(batch_id) = db::claim_next_job(pool).await? else {
        return Ok(false);
    };
    info!(batch_id, "batch job claimed");
    match processor.run(batch_id).await {
        Ok(status) => info!(batch_id, status = status.as_str(), "batch job done"),
        Err(err) => {
            let message = format!("{:#}", err);
            error!(batch_id, error = %message, "batch job aborted");
        }
    }
    Ok(true)
}
