//! Batch submission and cancellation requests.
//!
//! A submitted batch is validated here, stored as `queued` and handed to the
//! worker through the job table. Nothing in this module talks to the Graph API.
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument};

use crate::db::{self, Pool};
use crate::model::{BatchStatus, City, DestinationType, Objective};
use crate::orchestrator::cities::sort_alphabetically;
use crate::settings::{rotation_index, BatchSettings, SettingsError};
use crate::text::digits_only;

/// Default daily budget in cents when the operator does not pick one.
pub const DEFAULT_DAILY_BUDGET_CENTS: i64 = 660;

#[derive(Debug, Clone)]
pub struct NewBatch {
    pub user_id: i64,
    pub name: Option<String>,
    pub objective: Objective,
    pub destination_type: DestinationType,
    pub ad_account_id: String,
    pub page_id: Option<String>,
    pub instagram_actor_id: Option<String>,
    pub pixel_id: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub url_template: String,
    pub title_template: String,
    pub body_template: String,
    pub auto_activate: bool,
    pub daily_budget_cents: i64,
    pub settings: BatchSettings,
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("ad account is required")]
    MissingAdAccount,
    #[error("pixel is required")]
    MissingPixel,
    #[error("a page is required for messaging destinations")]
    MissingPage,
    #[error("{0} template is required")]
    MissingTemplate(&'static str),
    #[error("daily budget must be positive")]
    InvalidBudget,
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("batch {0} not found")]
    NotFound(i64),
    #[error("batch belongs to another user")]
    NotOwner,
    #[error("batch cannot be cancelled in status {0:?}")]
    NotCancellable(BatchStatus),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Trim optional ids so blank form fields become `None`.
fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate and normalize a submission. The returned batch is what gets
/// persisted.
pub fn prepare(mut new: NewBatch) -> Result<NewBatch, SubmissionError> {
    new.ad_account_id = new.ad_account_id.trim().to_string();
    new.page_id = clean(new.page_id);
    new.instagram_actor_id = clean(new.instagram_actor_id);
    new.pixel_id = clean(new.pixel_id);
    new.name = clean(new.name);
    new.settings.whatsapp_number = new
        .settings
        .whatsapp_number
        .as_deref()
        .map(digits_only)
        .filter(|d| !d.is_empty());

    if new.ad_account_id.is_empty() {
        return Err(SubmissionError::MissingAdAccount);
    }
    if new.pixel_id.is_none() {
        return Err(SubmissionError::MissingPixel);
    }
    if new.daily_budget_cents <= 0 {
        return Err(SubmissionError::InvalidBudget);
    }

    if new.destination_type.is_messaging() {
        let page_id = new.page_id.as_deref().ok_or(SubmissionError::MissingPage)?;
        if new.url_template.trim().is_empty() {
            new.url_template = format!("https://www.facebook.com/{}", page_id);
        }
    }
    if new.url_template.trim().is_empty() {
        return Err(SubmissionError::MissingTemplate("url"));
    }
    if new.title_template.trim().is_empty() {
        return Err(SubmissionError::MissingTemplate("title"));
    }
    if new.body_template.trim().is_empty() {
        return Err(SubmissionError::MissingTemplate("body"));
    }

    new.settings.validate()?;
    Ok(new)
}

/// Persist a new batch as `queued` and enqueue it. Returns the batch id.
#[instrument(skip_all, fields(user_id = new.user_id))]
pub async fn submit_batch(pool: &Pool, new: NewBatch) -> Result<i64, SubmissionError> {
    let new = prepare(new)?;
    let batch_id = db::insert_batch(pool, &new).await?;
    info!(batch_id, objective = new.objective.as_str(), "batch queued");
    Ok(batch_id)
}

/// Owner-initiated cancellation. Queued batches are cancelled immediately;
/// running ones are flagged and stop before their next city.
#[instrument(skip_all, fields(batch_id = batch_id, user_id = user_id))]
pub async fn request_cancel(
    pool: &Pool,
    user_id: i64,
    batch_id: i64,
) -> Result<BatchStatus, CancelError> {
    let batch = db::fetch_batch(pool, batch_id)
        .await?
        .ok_or(CancelError::NotFound(batch_id))?;
    if batch.user_id != user_id {
        return Err(CancelError::NotOwner);
    }

    match db::flag_cancellation(pool, batch_id).await? {
        Some(status) => {
            info!(status = status.as_str(), "cancellation recorded");
            Ok(status)
        }
        None => {
            let current = db::fetch_cancellation(pool, batch_id).await?;
            Err(CancelError::NotCancellable(current.status))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationAssignment {
    pub city_name: String,
    pub image: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPreview {
    pub assignments: Vec<RotationAssignment>,
    pub total_cities: usize,
}

/// First `limit` city to image assignments, in the order the worker will
/// process the cities.
pub fn rotation_preview(cities: &[City], images: &[String], limit: usize) -> RotationPreview {
    let mut ordered = cities.to_vec();
    sort_alphabetically(&mut ordered);

    let assignments = ordered
        .iter()
        .enumerate()
        .take(limit)
        .filter_map(|(i, city)| {
            let index = rotation_index(i, images.len())?;
            Some(RotationAssignment {
                city_name: city.name.clone(),
                image: images[index].clone(),
                index,
            })
        })
        .collect();

    RotationPreview {
        assignments,
        total_cities: ordered.len(),
    }
}
