//! Runs one batch: preconditions, the campaign, then one ad set, creative and
//! ad per city in alphabetical order.
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, info_span, instrument, warn, Instrument};

use crate::ads::model::{campaign_name, delivery_goal, format_start_time};
use crate::ads::{
    AdRequest, AdSetRequest, AdsPlatform, CampaignRequest, CreativeMedia, CreativeRequest,
    EnrollStatus,
};
use crate::compositor::CityImageGenerator;
use crate::db::{self, ItemObjects, PartialObjects, Pool};
use crate::model::{AdStatus, Batch, BatchStatus, City, Connection};
use crate::settings::{requires_page, CreativeChoice, MediaKind, SettingsError};
use crate::text::substitute_city;

pub mod cancel;
pub mod cities;

pub use cancel::CancellationToken;

/// Reasons a batch fails before any city is attempted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("Meta account is not connected for this user")]
    NotConnected,
    #[error("Meta access token expired; reconnect the account")]
    TokenExpired,
    #[error("a pixel id is required")]
    MissingPixel,
    #[error("a page id is required for messaging destinations")]
    MissingPage,
    #[error("invalid creative settings: {0}")]
    Settings(#[from] SettingsError),
    #[error("no cities found for the selected scope")]
    NoCities,
}

/// Checks that need no external call. Returns the access token to use.
pub fn check_batch(
    batch: &Batch,
    connection: Option<&Connection>,
    now: DateTime<Utc>,
) -> Result<String, PreconditionError> {
    let connection = connection.ok_or(PreconditionError::NotConnected)?;
    let token = match connection.usable_token(now) {
        Some(token) => token.to_string(),
        None if connection
            .access_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty()) =>
        {
            return Err(PreconditionError::TokenExpired)
        }
        None => return Err(PreconditionError::NotConnected),
    };
    if batch.pixel_id.is_none() {
        return Err(PreconditionError::MissingPixel);
    }
    if requires_page(batch.destination_type) && batch.page_id.is_none() {
        return Err(PreconditionError::MissingPage);
    }
    batch.settings.validate()?;
    Ok(token)
}

/// Values shared by every city of one run.
struct RunContext<'a> {
    batch: &'a Batch,
    token: String,
    campaign_id: String,
    start_time: String,
    status: AdStatus,
}

#[derive(Clone)]
pub struct BatchProcessor {
    pool: Pool,
    ads: Arc<dyn AdsPlatform>,
    compositor: CityImageGenerator,
    media_root: PathBuf,
    inter_city_delay: Duration,
}

impl BatchProcessor {
    pub fn new(
        pool: Pool,
        ads: Arc<dyn AdsPlatform>,
        compositor: CityImageGenerator,
        media_root: PathBuf,
        inter_city_delay: Duration,
    ) -> Self {
        Self {
            pool,
            ads,
            compositor,
            media_root,
            inter_city_delay,
        }
    }

    /// Run the batch to a final status. Errors escaping the run mark the
    /// batch `failed`; only persistence failures while doing so are returned.
    pub async fn run(&self, batch_id: i64) -> Result<BatchStatus> {
        let batch = db::fetch_batch(&self.pool, batch_id)
            .await?
            .ok_or_else(|| anyhow!("batch {} not found", batch_id))?;

        let span = info_span!(
            "batch",
            batch_id = batch.id,
            user_id = batch.user_id,
            ad_account_id = %batch.ad_account_id
        );
        match self.process(&batch).instrument(span).await {
            Ok(status) => Ok(status),
            Err(err) => {
                let message = format!("{:#}", err);
                error!(batch_id, error = %message, "batch run failed");
                db::mark_batch_failed(&self.pool, batch_id, &message).await?;
                Ok(BatchStatus::Failed)
            }
        }
    }

    async fn process(&self, batch: &Batch) -> Result<BatchStatus> {
        let cancel = CancellationToken::new(self.pool.clone(), batch.id);
        if cancel.is_cancelled().await? {
            info!("cancelled before start");
            db::mark_batch_cancelled(&self.pool, batch.id).await?;
            return Ok(BatchStatus::Cancelled);
        }

        db::begin_processing(&self.pool, batch.id).await?;
        info!(objective = batch.objective.as_str(), "batch started");

        let connection = db::fetch_connection(&self.pool, batch.user_id).await?;
        let token = match check_batch(batch, connection.as_ref(), Utc::now()) {
            Ok(token) => token,
            Err(err) => return self.fail_precondition(batch.id, err).await,
        };
        let cities = cities::resolve_cities(&self.pool, &batch.settings.scope).await?;
        if cities.is_empty() {
            return self
                .fail_precondition(batch.id, PreconditionError::NoCities)
                .await;
        }
        db::set_total_items(&self.pool, batch.id, cities.len() as i64).await?;
        info!(total = cities.len(), "cities resolved");

        if let Some(actor_id) = batch.instagram_actor_id.as_deref() {
            self.log_actor_details(&token, actor_id).await;
        }

        let now = Utc::now();
        let status = AdStatus::from_auto_activate(batch.auto_activate);
        let campaign_id = match batch.meta_campaign_id.clone() {
            Some(id) => {
                info!(campaign_id = %id, "reusing stored campaign");
                id
            }
            None => {
                let request = CampaignRequest {
                    name: campaign_name(batch.objective, now),
                    objective: batch.objective,
                    status,
                };
                let id = self
                    .ads
                    .create_campaign(&token, &batch.ad_account_id, &request)
                    .await
                    .context("campaign creation failed")?;
                db::set_campaign_id(&self.pool, batch.id, &id).await?;
                id
            }
        };

        let ctx = RunContext {
            batch,
            token,
            campaign_id,
            start_time: format_start_time(batch.start_at, now),
            status,
        };

        for (index, city) in cities.iter().enumerate() {
            if cancel.is_cancelled().await? {
                info!(done = index, total = cities.len(), "cancellation requested; stopping");
                db::mark_batch_cancelled(&self.pool, batch.id).await?;
                return Ok(BatchStatus::Cancelled);
            }

            let span = info_span!("city", city = %city.name, index);
            self.process_city(&ctx, index, city).instrument(span).await?;

            if index + 1 < cities.len() && !self.inter_city_delay.is_zero() {
                tokio::time::sleep(self.inter_city_delay).await;
            }
        }

        let final_status = db::finish_batch(&self.pool, batch.id).await?;
        info!(status = final_status.as_str(), "batch finished");
        Ok(final_status)
    }

    async fn fail_precondition(&self, batch_id: i64, err: PreconditionError) -> Result<BatchStatus> {
        warn!(error = %err, "batch preconditions failed");
        db::mark_batch_failed(&self.pool, batch_id, &err.to_string()).await?;
        Ok(BatchStatus::Failed)
    }

    async fn log_actor_details(&self, token: &str, actor_id: &str) {
        match self.ads.fetch_instagram_actor_details(token, actor_id).await {
            Ok(details) => info!(
                actor_id,
                username = details.get("username").and_then(|v| v.as_str()).unwrap_or(""),
                "instagram actor details"
            ),
            Err(err) => warn!(actor_id, error = %err, "failed to read instagram actor details"),
        }
    }

    /// One city end to end. Failures inside are recorded on the item; only
    /// errors while recording the outcome escape.
    async fn process_city(&self, ctx: &RunContext<'_>, index: usize, city: &City) -> Result<()> {
        let batch = ctx.batch;
        let creative = batch.settings.creative_for(index);
        let item_id = db::insert_item(&self.pool, batch.id, city, creative.as_ref()).await?;

        let mut partial = PartialObjects::default();
        match self
            .build_city_ad(ctx, city, creative.as_ref(), item_id, &mut partial)
            .await
        {
            Ok(objects) => {
                info!(ad_id = %objects.ad_id, "city done");
                db::mark_item_succeeded(&self.pool, batch.id, item_id, &objects).await?;
            }
            Err(err) => {
                let message = format!("{:#}", err);
                warn!(error = %message, "city failed");
                db::mark_item_failed(&self.pool, batch.id, item_id, &message, &partial).await?;
            }
        }
        db::increment_processed(&self.pool, batch.id).await
    }

    async fn build_city_ad(
        &self,
        ctx: &RunContext<'_>,
        city: &City,
        creative: Option<&CreativeChoice>,
        item_id: i64,
        partial: &mut PartialObjects,
    ) -> Result<ItemObjects> {
        let batch = ctx.batch;
        let token = ctx.token.as_str();
        let account = batch.ad_account_id.as_str();

        let geo = self
            .ads
            .find_city_key(token, &city.name, Some(&city.state))
            .await
            .context("city lookup failed")?
            .ok_or_else(|| anyhow!("city not found on Meta: {}", city.name))?;
        partial.meta_city_key = Some(geo.key.clone());
        if geo.fallback {
            db::append_item_note(
                &self.pool,
                item_id,
                &format!("city key {} belongs to another region", geo.key),
            )
            .await?;
        }

        let creative = creative.ok_or_else(|| anyhow!("no creative media configured"))?;
        let source = self.media_root.join(&creative.path);
        let media = match batch.settings.media_kind() {
            MediaKind::Image => {
                let overlay = &batch.settings.overlay;
                let text = overlay
                    .text
                    .as_deref()
                    .map(|t| substitute_city(t, &city.name))
                    .unwrap_or_default();
                let generated = self
                    .compositor
                    .generate(&source, &text, overlay)
                    .await
                    .context("image render failed")?;
                let hash = self
                    .ads
                    .upload_image(token, account, generated.path())
                    .await
                    .context("image upload failed")?;
                partial.image_hash = Some(hash.clone());
                CreativeMedia::Image { hash }
            }
            MediaKind::Video => {
                let id = self
                    .ads
                    .upload_video(token, account, &source)
                    .await
                    .context("video upload failed")?;
                partial.video_id = Some(id.clone());
                CreativeMedia::Video { id }
            }
        };

        let name = format!("{} - {}", city.state, city.name);
        let goal = delivery_goal(
            batch.destination_type,
            batch.objective,
            batch.pixel_id.as_deref(),
            batch.page_id.as_deref(),
        )
        .map_err(|missing| anyhow!("cannot build ad set without a {}", missing))?;
        let ad_set = AdSetRequest {
            campaign_id: ctx.campaign_id.clone(),
            name: name.clone(),
            city_key: geo.key.clone(),
            daily_budget_cents: batch.daily_budget_cents,
            start_time: ctx.start_time.clone(),
            status: ctx.status,
            goal,
        };
        let ad_set_id = self
            .ads
            .create_ad_set(token, account, &ad_set)
            .await
            .context("ad set creation failed")?;
        partial.ad_set_id = Some(ad_set_id.clone());

        let request = CreativeRequest {
            name: name.clone(),
            page_id: batch.page_id.clone().unwrap_or_default(),
            title: substitute_city(&batch.title_template, &city.name),
            body: substitute_city(&batch.body_template, &city.name),
            link: substitute_city(&batch.url_template, &city.name),
            media: media.clone(),
            instagram_actor_id: batch.instagram_actor_id.clone(),
            enroll_status: EnrollStatus::OptIn,
            destination: batch.destination_type,
            whatsapp_number: batch.settings.whatsapp_number.clone(),
        };
        let creative_id = self.create_creative_with_fallback(ctx, item_id, request).await?;
        partial.ad_creative_id = Some(creative_id.clone());

        let ad = AdRequest {
            name,
            ad_set_id: ad_set_id.clone(),
            creative_id: creative_id.clone(),
            status: ctx.status,
        };
        let ad_id = self
            .ads
            .create_ad(token, account, &ad)
            .await
            .context("ad creation failed")?;

        let (image_hash, video_id) = match media {
            CreativeMedia::Image { hash } => (Some(hash), None),
            CreativeMedia::Video { id } => (None, Some(id)),
        };
        Ok(ItemObjects {
            meta_city_key: geo.key,
            ad_set_id,
            ad_creative_id: creative_id,
            ad_id,
            image_hash,
            video_id,
        })
    }

    /// `OPT_IN`, then `OPT_OUT`, then without the Instagram actor. Only
    /// actor-rejected errors move to the next attempt.
    #[instrument(skip_all)]
    async fn create_creative_with_fallback(
        &self,
        ctx: &RunContext<'_>,
        item_id: i64,
        mut request: CreativeRequest,
    ) -> Result<String> {
        let token = ctx.token.as_str();
        let account = ctx.batch.ad_account_id.as_str();

        match self.ads.create_creative(token, account, &request).await {
            Ok(id) => return Ok(id),
            Err(err) if err.is_actor_rejected() => {
                warn!(error = %err, "creative rejected with OPT_IN; retrying with OPT_OUT");
                db::append_item_note(
                    &self.pool,
                    item_id,
                    &format!("creative retried with OPT_OUT after: {}", err),
                )
                .await?;
            }
            Err(err) => return Err(anyhow::Error::new(err).context("creative creation failed")),
        }

        request.enroll_status = EnrollStatus::OptOut;
        match self.ads.create_creative(token, account, &request).await {
            Ok(id) => return Ok(id),
            Err(err) if err.is_actor_rejected() && request.instagram_actor_id.is_some() => {
                warn!(error = %err, "creative rejected with OPT_OUT; retrying without instagram actor");
                db::append_item_note(
                    &self.pool,
                    item_id,
                    &format!("creative retried without Instagram actor after: {}", err),
                )
                .await?;
            }
            Err(err) => return Err(anyhow::Error::new(err).context("creative creation failed")),
        }

        request.instagram_actor_id = None;
        self.ads
            .create_creative(token, account, &request)
            .await
            .context("creative creation failed")
    }
}
