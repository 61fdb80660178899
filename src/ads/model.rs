//! Request shapes for the ads endpoints and the pure rules that fill them.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::model::{AdStatus, DestinationType, Objective};
use crate::text::match_key;

pub const TARGET_COUNTRY: &str = "BR";
pub const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// An id with its display label, as listed in account pickers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataOption {
    pub id: String,
    pub label: String,
}

/// One entry of an `adgeolocation` search.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoCandidate {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoMatch {
    pub key: String,
    /// The key belongs to a same-named city in another region.
    pub fallback: bool,
}

/// Pick the targeting key for a city. Only Brazilian `city` entries count;
/// one whose region matches `state` (or carries no region) wins, otherwise
/// the first other candidate is returned as a fallback.
pub fn pick_city_key(candidates: &[GeoCandidate], state: Option<&str>) -> Option<GeoMatch> {
    let wanted = state.map(match_key).filter(|s| !s.is_empty());
    let mut fallback = None;

    for candidate in candidates {
        if candidate.kind.as_deref() != Some("city")
            || candidate.country_code.as_deref() != Some(TARGET_COUNTRY)
        {
            continue;
        }
        let Some(key) = candidate.key.as_deref().filter(|k| !k.is_empty()) else {
            continue;
        };
        let region_matches = match (&wanted, candidate.region.as_deref()) {
            (Some(wanted), Some(region)) => match_key(region) == *wanted,
            _ => true,
        };
        if region_matches {
            return Some(GeoMatch {
                key: key.to_string(),
                fallback: false,
            });
        }
        if fallback.is_none() {
            fallback = Some(key.to_string());
        }
    }

    fallback.map(|key| GeoMatch {
        key,
        fallback: true,
    })
}

pub fn format_ad_account_id(id: &str) -> String {
    let id = id.trim();
    if id.starts_with("act_") {
        id.to_string()
    } else {
        format!("act_{}", id)
    }
}

pub fn strip_act_prefix(id: &str) -> &str {
    let id = id.trim();
    id.strip_prefix("act_").unwrap_or(id)
}

pub fn campaign_name(objective: Objective, now: DateTime<Utc>) -> String {
    format!(
        "Afiliados {} - {}",
        objective.label(),
        now.format(START_TIME_FORMAT)
    )
}

/// Start time sent to the ad set endpoint; ten minutes from now when unset.
pub fn format_start_time(start_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    start_at
        .unwrap_or_else(|| now + Duration::minutes(10))
        .format(START_TIME_FORMAT)
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignRequest {
    pub name: String,
    pub objective: Objective,
    pub status: AdStatus,
}

impl CampaignRequest {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("objective", self.objective.platform_objective().to_string()),
            ("status", self.status.as_str().to_string()),
            ("special_ad_categories", "[]".to_string()),
            ("is_adset_budget_sharing_enabled", "false".to_string()),
        ]
    }
}

/// How an ad set is optimized and what it promotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryGoal {
    /// Website traffic measured by a pixel event.
    Conversions {
        pixel_id: String,
        event: &'static str,
    },
    /// Click-to-message ads promoting a page.
    Messaging {
        page_id: String,
        optimization: &'static str,
    },
}

impl DeliveryGoal {
    pub fn optimization_goal(&self) -> &'static str {
        match self {
            DeliveryGoal::Conversions { .. } => "OFFSITE_CONVERSIONS",
            DeliveryGoal::Messaging { optimization, .. } => optimization,
        }
    }
}

pub fn conversion_event(objective: Objective) -> &'static str {
    match objective {
        Objective::Sales => "PURCHASE",
        Objective::LeadsContentView => "CONTENT_VIEW",
        _ => "LEAD",
    }
}

pub fn messaging_optimization(objective: Objective) -> &'static str {
    match objective {
        Objective::Awareness => "REACH",
        Objective::Traffic => "LINK_CLICKS",
        _ => "CONVERSATIONS",
    }
}

/// Map destination and objective to a delivery goal. The error names the
/// missing id.
pub fn delivery_goal(
    destination: DestinationType,
    objective: Objective,
    pixel_id: Option<&str>,
    page_id: Option<&str>,
) -> Result<DeliveryGoal, &'static str> {
    match destination {
        DestinationType::Website => Ok(DeliveryGoal::Conversions {
            pixel_id: pixel_id.ok_or("pixel id")?.to_string(),
            event: conversion_event(objective),
        }),
        DestinationType::Whatsapp => Ok(DeliveryGoal::Messaging {
            page_id: page_id.ok_or("page id")?.to_string(),
            optimization: messaging_optimization(objective),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdSetRequest {
    pub campaign_id: String,
    pub name: String,
    pub city_key: String,
    pub daily_budget_cents: i64,
    /// Already formatted with [`format_start_time`].
    pub start_time: String,
    pub status: AdStatus,
    pub goal: DeliveryGoal,
}

impl AdSetRequest {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let targeting = json!({
            "geo_locations": { "cities": [ { "key": self.city_key } ] },
            "device_platforms": ["mobile"],
        });
        let mut params = vec![
            ("name", self.name.clone()),
            ("campaign_id", self.campaign_id.clone()),
            ("daily_budget", self.daily_budget_cents.to_string()),
            ("billing_event", "IMPRESSIONS".to_string()),
            ("optimization_goal", self.goal.optimization_goal().to_string()),
            ("bid_strategy", "LOWEST_COST_WITHOUT_CAP".to_string()),
            ("targeting", targeting.to_string()),
            ("status", self.status.as_str().to_string()),
            ("start_time", self.start_time.clone()),
            ("is_optimized_for_quality", "false".to_string()),
        ];
        match &self.goal {
            DeliveryGoal::Conversions { pixel_id, event } => {
                params.push((
                    "promoted_object",
                    json!({ "pixel_id": pixel_id, "custom_event_type": event }).to_string(),
                ));
            }
            DeliveryGoal::Messaging { page_id, .. } => {
                params.push(("destination_type", "WHATSAPP".to_string()));
                params.push(("promoted_object", json!({ "page_id": page_id }).to_string()));
            }
        }
        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollStatus {
    OptIn,
    OptOut,
}

impl EnrollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollStatus::OptIn => "OPT_IN",
            EnrollStatus::OptOut => "OPT_OUT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreativeMedia {
    Image { hash: String },
    Video { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreativeRequest {
    pub name: String,
    pub page_id: String,
    pub title: String,
    pub body: String,
    pub link: String,
    pub media: CreativeMedia,
    pub instagram_actor_id: Option<String>,
    pub enroll_status: EnrollStatus,
    pub destination: DestinationType,
    /// Digits only; turns the call to action into a WhatsApp deep link.
    pub whatsapp_number: Option<String>,
}

impl CreativeRequest {
    fn call_to_action(&self) -> Value {
        match (self.destination, self.whatsapp_number.as_deref()) {
            (DestinationType::Whatsapp, Some(number)) => json!({
                "type": "WHATSAPP_MESSAGE",
                "value": { "link": format!("https://api.whatsapp.com/send?phone={}", number) },
            }),
            (DestinationType::Whatsapp, None) => json!({
                "type": "WHATSAPP_MESSAGE",
                "value": { "app_destination": "WHATSAPP" },
            }),
            (DestinationType::Website, _) => json!({
                "type": "LEARN_MORE",
                "value": { "link": self.link },
            }),
        }
    }

    pub fn object_story_spec(&self) -> Value {
        let cta = self.call_to_action();
        let mut spec = match &self.media {
            CreativeMedia::Image { hash } => json!({
                "page_id": self.page_id,
                "link_data": {
                    "image_hash": hash,
                    "link": self.link,
                    "message": self.body,
                    "name": self.title,
                    "description": self.body,
                    "call_to_action": cta,
                },
            }),
            CreativeMedia::Video { id } => json!({
                "page_id": self.page_id,
                "video_data": {
                    "video_id": id,
                    "title": self.title,
                    "message": self.body,
                    "link_description": self.body,
                    "call_to_action": cta,
                },
            }),
        };
        if let (Some(actor), Some(obj)) = (self.instagram_actor_id.as_deref(), spec.as_object_mut()) {
            obj.insert("instagram_actor_id".into(), Value::String(actor.to_string()));
        }
        spec
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        let enhancements = json!({
            "creative_features_spec": {
                "standard_enhancements": { "enroll_status": self.enroll_status.as_str() }
            }
        });
        vec![
            ("name", self.name.clone()),
            ("object_story_spec", self.object_story_spec().to_string()),
            ("degrees_of_freedom_spec", enhancements.to_string()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdRequest {
    pub name: String,
    pub ad_set_id: String,
    pub creative_id: String,
    pub status: AdStatus,
}

impl AdRequest {
    pub fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("adset_id", self.ad_set_id.clone()),
            ("creative", json!({ "creative_id": self.creative_id }).to_string()),
            ("status", self.status.as_str().to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate(key: &str, kind: &str, country: &str, region: Option<&str>) -> GeoCandidate {
        GeoCandidate {
            key: Some(key.into()),
            name: Some("Santa Cruz".into()),
            kind: Some(kind.into()),
            country_code: Some(country.into()),
            region: region.map(str::to_string),
        }
    }

    fn param<'a>(params: &'a [(&'static str, String)], name: &str) -> &'a str {
        params
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
            .unwrap()
    }

    #[test]
    fn region_match_beats_earlier_fallback() {
        let candidates = vec![
            candidate("111", "city", "PT", Some("Bahia")),
            candidate("222", "region", "BR", Some("Bahia")),
            candidate("333", "city", "BR", Some("Rio Grande do Norte")),
            candidate("444", "city", "BR", Some("bahia")),
        ];
        assert_eq!(
            pick_city_key(&candidates, Some("Bahia")),
            Some(GeoMatch {
                key: "444".into(),
                fallback: false
            })
        );
    }

    #[test]
    fn other_state_is_a_fallback() {
        let candidates = vec![
            candidate("333", "city", "BR", Some("Rio Grande do Norte")),
            candidate("555", "city", "BR", Some("Paraíba")),
        ];
        assert_eq!(
            pick_city_key(&candidates, Some("Bahia")),
            Some(GeoMatch {
                key: "333".into(),
                fallback: true
            })
        );
        assert_eq!(pick_city_key(&[], Some("Bahia")), None);
    }

    #[test]
    fn state_comparison_ignores_accents() {
        let candidates = vec![candidate("9", "city", "BR", Some("Sao Paulo"))];
        assert!(!pick_city_key(&candidates, Some("São Paulo")).unwrap().fallback);
    }

    #[test]
    fn act_prefix_helpers() {
        assert_eq!(format_ad_account_id("123"), "act_123");
        assert_eq!(format_ad_account_id("act_123"), "act_123");
        assert_eq!(strip_act_prefix("act_123"), "123");
        assert_eq!(strip_act_prefix("123"), "123");
    }

    #[test]
    fn start_time_defaults_to_ten_minutes_ahead() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(format_start_time(None, now), "2026-03-01 12:10:00");
        let fixed = Utc.with_ymd_and_hms(2026, 3, 2, 8, 30, 0).unwrap();
        assert_eq!(format_start_time(Some(fixed), now), "2026-03-02 08:30:00");
    }

    #[test]
    fn campaign_params_collapse_content_view() {
        let params = CampaignRequest {
            name: "c".into(),
            objective: Objective::LeadsContentView,
            status: AdStatus::Paused,
        }
        .params();
        assert_eq!(param(&params, "objective"), "OUTCOME_LEADS");
        assert_eq!(param(&params, "special_ad_categories"), "[]");
        assert_eq!(param(&params, "status"), "PAUSED");
    }

    #[test]
    fn website_ad_set_promotes_pixel_event() {
        let goal =
            delivery_goal(DestinationType::Website, Objective::Sales, Some("px"), None).unwrap();
        let params = AdSetRequest {
            campaign_id: "cmp".into(),
            name: "Bahia - Salvador".into(),
            city_key: "key-1".into(),
            daily_budget_cents: 660,
            start_time: "2026-03-01 12:10:00".into(),
            status: AdStatus::Active,
            goal,
        }
        .params();
        assert_eq!(param(&params, "optimization_goal"), "OFFSITE_CONVERSIONS");
        assert_eq!(param(&params, "daily_budget"), "660");
        assert_eq!(param(&params, "is_optimized_for_quality"), "false");
        let promoted: Value = serde_json::from_str(param(&params, "promoted_object")).unwrap();
        assert_eq!(promoted["custom_event_type"], "PURCHASE");
        let targeting: Value = serde_json::from_str(param(&params, "targeting")).unwrap();
        assert_eq!(targeting["geo_locations"]["cities"][0]["key"], "key-1");
        assert_eq!(targeting["device_platforms"][0], "mobile");
    }

    #[test]
    fn messaging_goals_skip_the_pixel() {
        assert_eq!(
            delivery_goal(DestinationType::Whatsapp, Objective::Awareness, Some("px"), Some("pg")),
            Ok(DeliveryGoal::Messaging {
                page_id: "pg".into(),
                optimization: "REACH"
            })
        );
        assert_eq!(messaging_optimization(Objective::Traffic), "LINK_CLICKS");
        assert_eq!(messaging_optimization(Objective::Sales), "CONVERSATIONS");
        assert_eq!(conversion_event(Objective::LeadsContentView), "CONTENT_VIEW");
        assert_eq!(conversion_event(Objective::Engagement), "LEAD");
        assert_eq!(
            delivery_goal(DestinationType::Whatsapp, Objective::Leads, None, None),
            Err("page id")
        );
    }

    #[test]
    fn creative_includes_actor_only_when_set() {
        let mut request = CreativeRequest {
            name: "Bahia - Salvador".into(),
            page_id: "pg".into(),
            title: "Oferta Salvador".into(),
            body: "Corre".into(),
            link: "https://example.com/salvador".into(),
            media: CreativeMedia::Image { hash: "abc".into() },
            instagram_actor_id: Some("ig-1".into()),
            enroll_status: EnrollStatus::OptIn,
            destination: DestinationType::Website,
            whatsapp_number: None,
        };
        let spec = request.object_story_spec();
        assert_eq!(spec["instagram_actor_id"], "ig-1");
        assert_eq!(spec["link_data"]["call_to_action"]["type"], "LEARN_MORE");

        request.instagram_actor_id = None;
        request.enroll_status = EnrollStatus::OptOut;
        let params = request.params();
        let spec: Value = serde_json::from_str(param(&params, "object_story_spec")).unwrap();
        assert!(spec.get("instagram_actor_id").is_none());
        assert!(param(&params, "degrees_of_freedom_spec").contains("OPT_OUT"));
    }

    #[test]
    fn whatsapp_creative_links_to_number() {
        let request = CreativeRequest {
            name: "n".into(),
            page_id: "pg".into(),
            title: "t".into(),
            body: "b".into(),
            link: "https://www.facebook.com/pg".into(),
            media: CreativeMedia::Video { id: "vid".into() },
            instagram_actor_id: None,
            enroll_status: EnrollStatus::OptIn,
            destination: DestinationType::Whatsapp,
            whatsapp_number: Some("5571999990000".into()),
        };
        let spec = request.object_story_spec();
        assert_eq!(spec["video_data"]["video_id"], "vid");
        assert_eq!(
            spec["video_data"]["call_to_action"]["value"]["link"],
            "https://api.whatsapp.com/send?phone=5571999990000"
        );
    }
}
