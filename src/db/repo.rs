use super::model::{BatchCounters, CancellationState, ItemObjects};
use crate::model::{
    Batch, BatchItem, BatchStatus, City, Connection, DestinationType, ItemStatus, Objective,
};
use crate::settings::{BatchSettings, CreativeChoice};
use crate::submission::NewBatch;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Expand `~/` in a file-backed SQLite URL and create its parent directory.
/// Non-sqlite and in-memory URLs are returned untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };

    if let Some(parent) = Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{}?{}", path, q),
        None => format!("sqlite://{}", path),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Users and connections
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn insert_user(pool: &Pool, name: &str, email: Option<&str>) -> Result<i64> {
    let rec = sqlx::query("INSERT INTO users (name, email) VALUES (?, ?) RETURNING id")
        .bind(name)
        .bind(email)
        .fetch_one(pool)
        .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn fetch_connection(pool: &Pool, user_id: i64) -> Result<Option<Connection>> {
    let row = sqlx::query(
        "SELECT id, user_id, access_token, token_expires_at, app_id, app_secret, \
                ad_account_id, page_id, instagram_actor_id, pixel_id \
         FROM connections WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| -> Result<Connection> {
        Ok(Connection {
            id: row.get("id"),
            user_id: row.get("user_id"),
            access_token: row.try_get("access_token")?,
            token_expires_at: row.try_get("token_expires_at")?,
            app_id: row.try_get("app_id")?,
            app_secret: row.try_get("app_secret")?,
            ad_account_id: row.try_get("ad_account_id")?,
            page_id: row.try_get("page_id")?,
            instagram_actor_id: row.try_get("instagram_actor_id")?,
            pixel_id: row.try_get("pixel_id")?,
        })
    })
    .transpose()
}

/// Store (or clear, with `None`) the user's access token.
#[instrument(skip_all)]
pub async fn upsert_connection_token(
    pool: &Pool,
    user_id: i64,
    access_token: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO connections (user_id, access_token, token_expires_at) VALUES (?, ?, ?) \
         ON CONFLICT(user_id) DO UPDATE SET access_token = excluded.access_token, \
             token_expires_at = excluded.token_expires_at, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(user_id)
    .bind(access_token)
    .bind(expires_at)
    .execute(pool)
    .await
    .context("failed to persist connection token")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn upsert_connection_app_credentials(
    pool: &Pool,
    user_id: i64,
    app_id: Option<&str>,
    app_secret: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO connections (user_id, app_id, app_secret) VALUES (?, ?, ?) \
         ON CONFLICT(user_id) DO UPDATE SET app_id = excluded.app_id, \
             app_secret = excluded.app_secret, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(user_id)
    .bind(app_id)
    .bind(app_secret)
    .execute(pool)
    .await
    .context("failed to persist app credentials")?;
    Ok(())
}

/// Remember the accounts picked on the last submission as form defaults.
async fn remember_account_defaults_tx(
    tx: &mut Transaction<'_, Sqlite>,
    new: &NewBatch,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO connections (user_id, ad_account_id, page_id, instagram_actor_id, pixel_id) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(user_id) DO UPDATE SET ad_account_id = excluded.ad_account_id, \
             page_id = excluded.page_id, instagram_actor_id = excluded.instagram_actor_id, \
             pixel_id = excluded.pixel_id, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(new.user_id)
    .bind(&new.ad_account_id)
    .bind(&new.page_id)
    .bind(&new.instagram_actor_id)
    .bind(&new.pixel_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Cities
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn insert_city(
    pool: &Pool,
    name: &str,
    state: &str,
    state_code: Option<&str>,
) -> Result<i64> {
    let rec = sqlx::query("INSERT INTO cities (name, state, state_code) VALUES (?, ?, ?) RETURNING id")
        .bind(name)
        .bind(state)
        .bind(state_code)
        .fetch_one(pool)
        .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn distinct_states(pool: &Pool) -> Result<Vec<String>> {
    let states = sqlx::query_scalar("SELECT DISTINCT state FROM cities ORDER BY state")
        .fetch_all(pool)
        .await?;
    Ok(states)
}

#[instrument(skip_all)]
pub async fn cities_in_state(pool: &Pool, state: &str) -> Result<Vec<City>> {
    let rows = sqlx::query(
        "SELECT id, name, state, state_code FROM cities WHERE state = ? ORDER BY name",
    )
    .bind(state)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(city_from_row).collect())
}

#[instrument(skip_all)]
pub async fn cities_by_ids(pool: &Pool, ids: &[i64]) -> Result<Vec<City>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT id, name, state, state_code FROM cities WHERE id IN (");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY name");
    let rows = qb.build().fetch_all(pool).await?;
    Ok(rows.iter().map(city_from_row).collect())
}

fn city_from_row(row: &SqliteRow) -> City {
    City {
        id: row.get("id"),
        name: row.get("name"),
        state: row.get("state"),
        state_code: row.try_get::<Option<String>, _>("state_code").ok().flatten(),
    }
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

/// Insert a validated batch as `queued`, remember the account defaults and
/// enqueue it for the worker, all in one transaction.
#[instrument(skip_all)]
pub async fn insert_batch(pool: &Pool, new: &NewBatch) -> Result<i64> {
    let settings = new
        .settings
        .to_json()
        .context("failed to encode batch settings")?;

    let mut tx = pool.begin().await?;
    let batch_id: i64 = sqlx::query(
        "INSERT INTO ad_batches (user_id, name, objective, destination_type, ad_account_id, \
             page_id, instagram_actor_id, pixel_id, start_at, url_template, title_template, \
             body_template, auto_activate, daily_budget_cents, status, settings) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(new.user_id)
    .bind(&new.name)
    .bind(new.objective.as_str())
    .bind(new.destination_type.as_str())
    .bind(&new.ad_account_id)
    .bind(&new.page_id)
    .bind(&new.instagram_actor_id)
    .bind(&new.pixel_id)
    .bind(new.start_at)
    .bind(&new.url_template)
    .bind(&new.title_template)
    .bind(&new.body_template)
    .bind(new.auto_activate)
    .bind(new.daily_budget_cents)
    .bind(BatchStatus::Queued.as_str())
    .bind(settings)
    .fetch_one(&mut *tx)
    .await?
    .get("id");

    remember_account_defaults_tx(&mut tx, new).await?;
    enqueue_batch_tx(&mut tx, batch_id).await?;
    tx.commit().await?;
    Ok(batch_id)
}

const BATCH_COLUMNS: &str = "id, user_id, name, objective, destination_type, ad_account_id, \
    page_id, instagram_actor_id, pixel_id, start_at, url_template, title_template, \
    body_template, auto_activate, daily_budget_cents, status, total_items, processed_items, \
    success_count, error_count, meta_campaign_id, error_message, settings, \
    cancel_requested_at, cancelled_at, created_at";

#[instrument(skip_all)]
pub async fn fetch_batch(pool: &Pool, batch_id: i64) -> Result<Option<Batch>> {
    let row = sqlx::query(&format!("SELECT {} FROM ad_batches WHERE id = ?", BATCH_COLUMNS))
        .bind(batch_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(batch_from_row).transpose()
}

fn batch_from_row(row: &SqliteRow) -> Result<Batch> {
    let id: i64 = row.get("id");

    let objective: String = row.get("objective");
    let objective = Objective::parse_objective(&objective)
        .ok_or_else(|| anyhow!("batch {} has unknown objective {}", id, objective))?;
    let destination: String = row.get("destination_type");
    let destination_type = DestinationType::parse_destination(&destination)
        .ok_or_else(|| anyhow!("batch {} has unknown destination {}", id, destination))?;
    let status: String = row.get("status");
    let status = BatchStatus::parse_status(&status)
        .ok_or_else(|| anyhow!("batch {} has unknown status {}", id, status))?;
    let settings: String = row.get("settings");
    let settings = BatchSettings::from_json(&settings)
        .with_context(|| format!("batch {} has unreadable settings", id))?;

    Ok(Batch {
        id,
        user_id: row.get("user_id"),
        name: row.try_get("name")?,
        objective,
        destination_type,
        ad_account_id: row.get("ad_account_id"),
        page_id: non_blank(row.try_get("page_id")?),
        instagram_actor_id: non_blank(row.try_get("instagram_actor_id")?),
        pixel_id: non_blank(row.try_get("pixel_id")?),
        start_at: row.try_get("start_at")?,
        url_template: row.get("url_template"),
        title_template: row.get("title_template"),
        body_template: row.get("body_template"),
        auto_activate: row.get("auto_activate"),
        daily_budget_cents: row.get("daily_budget_cents"),
        status,
        total_items: row.get("total_items"),
        processed_items: row.get("processed_items"),
        success_count: row.get("success_count"),
        error_count: row.get("error_count"),
        meta_campaign_id: non_blank(row.try_get("meta_campaign_id")?),
        error_message: row.try_get("error_message")?,
        settings,
        cancel_requested_at: row.try_get("cancel_requested_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        created_at: row.get("created_at"),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Reset counters and move the batch to `processing`.
#[instrument(skip_all)]
pub async fn begin_processing(pool: &Pool, batch_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE ad_batches SET status = ?, processed_items = 0, success_count = 0, \
             error_count = 0, error_message = NULL, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(BatchStatus::Processing.as_str())
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_total_items(pool: &Pool, batch_id: i64, total: i64) -> Result<()> {
    sqlx::query("UPDATE ad_batches SET total_items = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(total)
        .bind(batch_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_campaign_id(pool: &Pool, batch_id: i64, campaign_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE ad_batches SET meta_campaign_id = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(campaign_id)
    .bind(batch_id)
    .execute(pool)
    .await
    .context("failed to persist campaign id")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn fetch_cancellation(pool: &Pool, batch_id: i64) -> Result<CancellationState> {
    let row = sqlx::query("SELECT status, cancel_requested_at FROM ad_batches WHERE id = ?")
        .bind(batch_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Err(anyhow!("batch {} not found", batch_id));
    };
    let status: String = row.get("status");
    Ok(CancellationState {
        status: BatchStatus::parse_status(&status)
            .ok_or_else(|| anyhow!("batch {} has unknown status {}", batch_id, status))?,
        cancel_requested_at: row.try_get("cancel_requested_at")?,
    })
}

/// Flag a cancellation. A queued batch is cancelled outright; a processing
/// batch only gets `cancel_requested` and stops at its next checkpoint.
/// Returns the new status, or `None` when the batch was not in a cancellable
/// state at the time of the update.
#[instrument(skip_all)]
pub async fn flag_cancellation(pool: &Pool, batch_id: i64) -> Result<Option<BatchStatus>> {
    let now = Utc::now();
    let row = sqlx::query(
        "UPDATE ad_batches SET \
             status = CASE status WHEN 'queued' THEN 'cancelled' ELSE 'cancel_requested' END, \
             cancelled_at = CASE status WHEN 'queued' THEN ? ELSE cancelled_at END, \
             cancel_requested_at = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND status IN ('queued', 'processing') \
         RETURNING status",
    )
    .bind(now)
    .bind(now)
    .bind(batch_id)
    .fetch_optional(pool)
    .await?;

    Ok(row
        .map(|r| r.get::<String, _>("status"))
        .and_then(|s| BatchStatus::parse_status(&s)))
}

#[instrument(skip_all)]
pub async fn mark_batch_cancelled(pool: &Pool, batch_id: i64) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        "UPDATE ad_batches SET status = ?, cancelled_at = COALESCE(cancelled_at, ?), \
             cancel_requested_at = COALESCE(cancel_requested_at, ?), \
             updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(BatchStatus::Cancelled.as_str())
    .bind(now)
    .bind(now)
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Close a run that went through every city; the status follows the error count.
/// A cancel request that landed during the last city still wins.
#[instrument(skip_all)]
pub async fn finish_batch(pool: &Pool, batch_id: i64) -> Result<BatchStatus> {
    let status: String = sqlx::query_scalar(
        "UPDATE ad_batches SET \
             status = CASE \
                 WHEN status = 'cancel_requested' THEN 'cancelled' \
                 WHEN error_count > 0 THEN 'completed_with_errors' \
                 ELSE 'completed' END, \
             cancelled_at = CASE WHEN status = 'cancel_requested' \
                 THEN COALESCE(cancelled_at, ?) ELSE cancelled_at END, \
             updated_at = CURRENT_TIMESTAMP \
         WHERE id = ? RETURNING status",
    )
    .bind(Utc::now())
    .bind(batch_id)
    .fetch_one(pool)
    .await?;
    BatchStatus::parse_status(&status)
        .ok_or_else(|| anyhow!("batch {} finished with unknown status {}", batch_id, status))
}

/// Mark the batch failed unless it already carries a failure message.
/// Returns whether the row changed.
#[instrument(skip_all)]
pub async fn mark_batch_failed(pool: &Pool, batch_id: i64, message: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE ad_batches SET status = 'failed', error_message = ?, \
             updated_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND NOT (status = 'failed' AND COALESCE(error_message, '') <> '')",
    )
    .bind(message)
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn fetch_counters(pool: &Pool, batch_id: i64) -> Result<BatchCounters> {
    let row = sqlx::query(
        "SELECT total_items, processed_items, success_count, error_count \
         FROM ad_batches WHERE id = ?",
    )
    .bind(batch_id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Err(anyhow!("batch {} not found", batch_id));
    };
    Ok(BatchCounters {
        total_items: row.get("total_items"),
        processed_items: row.get("processed_items"),
        success_count: row.get("success_count"),
        error_count: row.get("error_count"),
    })
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn insert_item(
    pool: &Pool,
    batch_id: i64,
    city: &City,
    creative: Option<&CreativeChoice>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO ad_batch_items (batch_id, city_id, city_name, state_name, \
             creative_source_path, creative_source_index, status) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(batch_id)
    .bind(city.id)
    .bind(&city.name)
    .bind(&city.state)
    .bind(creative.map(|c| c.path.as_str()))
    .bind(creative.and_then(|c| c.rotation_index).map(|i| i as i64))
    .bind(ItemStatus::Processing.as_str())
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

/// Append a line to the item's error trail without touching its status.
#[instrument(skip_all)]
pub async fn append_item_note(pool: &Pool, item_id: i64, note: &str) -> Result<()> {
    sqlx::query(
        "UPDATE ad_batch_items SET error_message = CASE \
             WHEN COALESCE(error_message, '') = '' THEN ? \
             ELSE error_message || ' | ' || ? END, \
             updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(note)
    .bind(note)
    .bind(item_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn mark_item_failed(
    pool: &Pool,
    batch_id: i64,
    item_id: i64,
    message: &str,
    partial: &PartialObjects,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE ad_batch_items SET status = ?, \
             error_message = CASE \
                 WHEN COALESCE(error_message, '') = '' THEN ? \
                 ELSE error_message || ' | ' || ? END, \
             meta_city_key = COALESCE(?, meta_city_key), \
             image_hash = COALESCE(?, image_hash), \
             video_id = COALESCE(?, video_id), \
             ad_set_id = COALESCE(?, ad_set_id), \
             ad_creative_id = COALESCE(?, ad_creative_id), \
             updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(ItemStatus::Error.as_str())
    .bind(message)
    .bind(message)
    .bind(&partial.meta_city_key)
    .bind(&partial.image_hash)
    .bind(&partial.video_id)
    .bind(&partial.ad_set_id)
    .bind(&partial.ad_creative_id)
    .bind(item_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "UPDATE ad_batches SET error_count = error_count + 1, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(batch_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn mark_item_succeeded(
    pool: &Pool,
    batch_id: i64,
    item_id: i64,
    objects: &ItemObjects,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE ad_batch_items SET status = ?, meta_city_key = ?, ad_set_id = ?, \
             ad_creative_id = ?, ad_id = ?, image_hash = ?, video_id = ?, \
             updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(ItemStatus::Success.as_str())
    .bind(&objects.meta_city_key)
    .bind(&objects.ad_set_id)
    .bind(&objects.ad_creative_id)
    .bind(&objects.ad_id)
    .bind(&objects.image_hash)
    .bind(&objects.video_id)
    .bind(item_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "UPDATE ad_batches SET success_count = success_count + 1, \
             updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(batch_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn increment_processed(pool: &Pool, batch_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE ad_batches SET processed_items = processed_items + 1, \
             updated_at = CURRENT_TIMESTAMP \
         WHERE id = ?",
    )
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn list_items(pool: &Pool, batch_id: i64) -> Result<Vec<BatchItem>> {
    let rows = sqlx::query(
        "SELECT id, batch_id, city_id, city_name, state_name, creative_source_path, \
                creative_source_index, meta_city_key, ad_set_id, ad_creative_id, ad_id, \
                image_hash, video_id, status, error_message \
         FROM ad_batch_items WHERE batch_id = ? ORDER BY id",
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let id: i64 = row.get("id");
            let status: String = row.get("status");
            Ok(BatchItem {
                id,
                batch_id: row.get("batch_id"),
                city_id: row.try_get("city_id")?,
                city_name: row.get("city_name"),
                state_name: row.try_get("state_name")?,
                creative_source_path: row.try_get("creative_source_path")?,
                creative_source_index: row.try_get("creative_source_index")?,
                meta_city_key: row.try_get("meta_city_key")?,
                ad_set_id: row.try_get("ad_set_id")?,
                ad_creative_id: row.try_get("ad_creative_id")?,
                ad_id: row.try_get("ad_id")?,
                image_hash: row.try_get("image_hash")?,
                video_id: row.try_get("video_id")?,
                status: ItemStatus::parse_status(&status)
                    .ok_or_else(|| anyhow!("item {} has unknown status {}", id, status))?,
                error_message: row.try_get("error_message")?,
            })
        })
        .collect()
}

/// Object ids gathered before an item failed, kept for the audit trail.
#[derive(Debug, Clone, Default)]
pub struct PartialObjects {
    pub meta_city_key: Option<String>,
    pub image_hash: Option<String>,
    pub video_id: Option<String>,
    pub ad_set_id: Option<String>,
    pub ad_creative_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Job queue
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn enqueue_batch(pool: &Pool, batch_id: i64) -> Result<()> {
    let mut tx = pool.begin().await?;
    enqueue_batch_tx(&mut tx, batch_id).await?;
    tx.commit().await?;
    Ok(())
}

async fn enqueue_batch_tx(tx: &mut Transaction<'_, Sqlite>, batch_id: i64) -> Result<()> {
    sqlx::query("INSERT INTO batch_jobs (batch_id) VALUES (?) ON CONFLICT(batch_id) DO NOTHING")
        .bind(batch_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Take the oldest due job off the queue. The row is deleted before the run
/// starts, so a batch is dispatched at most once per enqueue.
#[instrument(skip_all)]
pub async fn claim_next_job(pool: &Pool) -> Result<Option<i64>> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(
        "SELECT id, batch_id FROM batch_jobs \
         WHERE datetime(due_at) <= CURRENT_TIMESTAMP ORDER BY id ASC LIMIT 1",
    )
    .fetch_optional(&mut *tx)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let job_id: i64 = row.get("id");
    let batch_id: i64 = row.get("batch_id");
    sqlx::query("DELETE FROM batch_jobs WHERE id = ?")
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(Some(batch_id))
}

#[instrument(skip_all)]
pub async fn count_pending_jobs(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batch_jobs")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
