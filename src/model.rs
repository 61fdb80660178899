use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::BatchSettings;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
    CancelRequested,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::CompletedWithErrors => "completed_with_errors",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::CancelRequested => "cancel_requested",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(BatchStatus::Queued),
            "processing" => Some(BatchStatus::Processing),
            "completed" => Some(BatchStatus::Completed),
            "completed_with_errors" => Some(BatchStatus::CompletedWithErrors),
            "failed" => Some(BatchStatus::Failed),
            "cancelled" => Some(BatchStatus::Cancelled),
            "cancel_requested" => Some(BatchStatus::CancelRequested),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::CompletedWithErrors
                | BatchStatus::Failed
                | BatchStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Processing,
    Success,
    Error,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Processing => "processing",
            ItemStatus::Success => "success",
            ItemStatus::Error => "error",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(ItemStatus::Processing),
            "success" => Some(ItemStatus::Success),
            "error" => Some(ItemStatus::Error),
            _ => None,
        }
    }
}

/// Where a click on the ad lands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationType {
    Website,
    Whatsapp,
}

impl DestinationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationType::Website => "WEBSITE",
            DestinationType::Whatsapp => "WHATSAPP",
        }
    }

    pub fn parse_destination(s: &str) -> Option<Self> {
        match s {
            "WEBSITE" => Some(DestinationType::Website),
            "WHATSAPP" => Some(DestinationType::Whatsapp),
            _ => None,
        }
    }

    pub fn is_messaging(&self) -> bool {
        matches!(self, DestinationType::Whatsapp)
    }
}

/// Objective as chosen by the operator. `LeadsContentView` is a local
/// sub-objective that the platform only knows as `OUTCOME_LEADS`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Objective {
    #[serde(rename = "OUTCOME_AWARENESS")]
    Awareness,
    #[serde(rename = "OUTCOME_TRAFFIC")]
    Traffic,
    #[serde(rename = "OUTCOME_ENGAGEMENT")]
    Engagement,
    #[serde(rename = "OUTCOME_LEADS")]
    Leads,
    #[serde(rename = "OUTCOME_LEADS_CONTENT_VIEW")]
    LeadsContentView,
    #[serde(rename = "OUTCOME_SALES")]
    Sales,
}

impl Objective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::Awareness => "OUTCOME_AWARENESS",
            Objective::Traffic => "OUTCOME_TRAFFIC",
            Objective::Engagement => "OUTCOME_ENGAGEMENT",
            Objective::Leads => "OUTCOME_LEADS",
            Objective::LeadsContentView => "OUTCOME_LEADS_CONTENT_VIEW",
            Objective::Sales => "OUTCOME_SALES",
        }
    }

    pub fn parse_objective(s: &str) -> Option<Self> {
        match s {
            "OUTCOME_AWARENESS" => Some(Objective::Awareness),
            "OUTCOME_TRAFFIC" => Some(Objective::Traffic),
            "OUTCOME_ENGAGEMENT" => Some(Objective::Engagement),
            "OUTCOME_LEADS" => Some(Objective::Leads),
            "OUTCOME_LEADS_CONTENT_VIEW" => Some(Objective::LeadsContentView),
            "OUTCOME_SALES" => Some(Objective::Sales),
            _ => None,
        }
    }

    /// Objective value sent to the campaigns endpoint.
    pub fn platform_objective(&self) -> &'static str {
        match self {
            Objective::LeadsContentView => Objective::Leads.as_str(),
            other => other.as_str(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Objective::Awareness => "Reconhecimento",
            Objective::Traffic => "Trafego",
            Objective::Engagement => "Engajamento",
            Objective::Leads => "Cadastro",
            Objective::LeadsContentView => "ContentView",
            Objective::Sales => "Compra",
        }
    }
}

/// Initial status of created campaign, ad sets and ads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdStatus {
    Active,
    Paused,
}

impl AdStatus {
    pub fn from_auto_activate(auto_activate: bool) -> Self {
        if auto_activate {
            AdStatus::Active
        } else {
            AdStatus::Paused
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdStatus::Active => "ACTIVE",
            AdStatus::Paused => "PAUSED",
        }
    }
}

/// A persisted batch: the submitted definition plus its run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
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
    pub status: BatchStatus,
    pub total_items: i64,
    pub processed_items: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub meta_campaign_id: Option<String>,
    pub error_message: Option<String>,
    pub settings: BatchSettings,
    pub cancel_requested_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One city's attempt within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: i64,
    pub batch_id: i64,
    pub city_id: Option<i64>,
    pub city_name: String,
    pub state_name: Option<String>,
    pub creative_source_path: Option<String>,
    pub creative_source_index: Option<i64>,
    pub meta_city_key: Option<String>,
    pub ad_set_id: Option<String>,
    pub ad_creative_id: Option<String>,
    pub ad_id: Option<String>,
    pub image_hash: Option<String>,
    pub video_id: Option<String>,
    pub status: ItemStatus,
    pub error_message: Option<String>,
}

/// Per-user platform credentials and last-used account defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: i64,
    pub user_id: i64,
    pub access_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub app_id: Option<String>,
    pub app_secret: Option<String>,
    pub ad_account_id: Option<String>,
    pub page_id: Option<String>,
    pub instagram_actor_id: Option<String>,
    pub pixel_id: Option<String>,
}

impl Connection {
    /// Token present and not past its expiry.
    pub fn usable_token(&self, now: DateTime<Utc>) -> Option<&str> {
        let token = self
            .access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())?;
        match self.token_expires_at {
            Some(expires_at) if expires_at <= now => None,
            _ => Some(token),
        }
    }
}

/// Municipality reference row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct City {
    pub id: i64,
    pub name: String,
    pub state: String,
    pub state_code: Option<String>,
}
