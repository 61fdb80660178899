//! Typed ads operations on top of the Graph request primitive.
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::graph::{GraphApi, GraphError};

pub mod cache;
pub mod model;

use cache::MetadataCache;
pub use model::{
    AdRequest, AdSetRequest, CampaignRequest, CreativeMedia, CreativeRequest, DeliveryGoal,
    EnrollStatus, GeoCandidate, GeoMatch, MetadataOption,
};
use model::{format_ad_account_id, pick_city_key, strip_act_prefix};

/// Operations the batch orchestrator needs from the ads platform.
#[async_trait]
pub trait AdsPlatform: Send + Sync {
    async fn find_city_key(
        &self,
        token: &str,
        city: &str,
        state: Option<&str>,
    ) -> Result<Option<GeoMatch>, GraphError>;

    async fn create_campaign(
        &self,
        token: &str,
        ad_account_id: &str,
        request: &CampaignRequest,
    ) -> Result<String, GraphError>;

    /// Returns the image hash.
    async fn upload_image(
        &self,
        token: &str,
        ad_account_id: &str,
        file: &Path,
    ) -> Result<String, GraphError>;

    /// Returns the video id.
    async fn upload_video(
        &self,
        token: &str,
        ad_account_id: &str,
        file: &Path,
    ) -> Result<String, GraphError>;

    async fn create_ad_set(
        &self,
        token: &str,
        ad_account_id: &str,
        request: &AdSetRequest,
    ) -> Result<String, GraphError>;

    async fn create_creative(
        &self,
        token: &str,
        ad_account_id: &str,
        request: &CreativeRequest,
    ) -> Result<String, GraphError>;

    async fn create_ad(
        &self,
        token: &str,
        ad_account_id: &str,
        request: &AdRequest,
    ) -> Result<String, GraphError>;

    async fn fetch_instagram_actor_details(
        &self,
        token: &str,
        actor_id: &str,
    ) -> Result<Value, GraphError>;
}

#[derive(Clone)]
pub struct MetaAdsService {
    graph: Arc<dyn GraphApi>,
    cache: MetadataCache,
}

fn created_id(response: &Value) -> Result<String, GraphError> {
    response
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(GraphError::MissingField("id"))
}

fn data_entries(response: &Value) -> &[Value] {
    response
        .get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn str_field<'a>(entry: &'a Value, name: &str) -> Option<&'a str> {
    entry
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn instagram_label(base: &str, id: &str, ig_id: Option<&str>, source: &str) -> String {
    match ig_id {
        Some(ig_id) => format!("{} (id: {} | ig_id: {}) [{}]", base, id, ig_id, source),
        None => format!("{} (id: {}) [{}]", base, id, source),
    }
}

impl MetaAdsService {
    pub fn new(graph: Arc<dyn GraphApi>, cache_ttl: Duration) -> Self {
        Self {
            graph,
            cache: MetadataCache::new(cache_ttl),
        }
    }

    async fn cached<F, Fut>(&self, key: String, load: F) -> Result<Vec<MetadataOption>, GraphError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<MetadataOption>, GraphError>>,
    {
        if let Some(hit) = self.cache.get(&key).await {
            debug!(%key, "metadata cache hit");
            return Ok(hit);
        }
        let loaded = load().await?;
        self.cache.insert(key, loaded.clone()).await;
        Ok(loaded)
    }

    #[instrument(skip_all, fields(step = "fetch_ad_accounts", user_id = user_id))]
    pub async fn fetch_ad_accounts(
        &self,
        token: &str,
        user_id: i64,
    ) -> Result<Vec<MetadataOption>, GraphError> {
        self.cached(cache::ad_accounts_key(user_id), || async move {
            let response = self
                .graph
                .get(token, "me/adaccounts", &[("fields", "id,name,account_id".into())])
                .await?;
            Ok(data_entries(&response)
                .iter()
                .filter_map(|account| {
                    let raw = str_field(account, "account_id").or(str_field(account, "id"))?;
                    let id = strip_act_prefix(raw).to_string();
                    let name = str_field(account, "name").unwrap_or(&id);
                    Some(MetadataOption {
                        label: format!("{} ({})", name, id),
                        id,
                    })
                })
                .collect())
        })
        .await
    }

    #[instrument(skip_all, fields(step = "fetch_pages", user_id = user_id))]
    pub async fn fetch_pages(
        &self,
        token: &str,
        user_id: i64,
    ) -> Result<Vec<MetadataOption>, GraphError> {
        self.cached(cache::pages_key(user_id), || async move {
            let response = self
                .graph
                .get(token, "me/accounts", &[("fields", "id,name".into())])
                .await?;
            Ok(data_entries(&response)
                .iter()
                .filter_map(|page| {
                    let id = str_field(page, "id")?;
                    Some(MetadataOption {
                        id: id.to_string(),
                        label: str_field(page, "name").unwrap_or(id).to_string(),
                    })
                })
                .collect())
        })
        .await
    }

    /// Instagram accounts usable by an ad account. When the account lists
    /// none, the business accounts linked to the user's pages are used.
    #[instrument(skip_all, fields(step = "fetch_instagram_accounts", user_id = user_id))]
    pub async fn fetch_instagram_accounts(
        &self,
        token: &str,
        user_id: i64,
        ad_account_id: Option<&str>,
    ) -> Result<Vec<MetadataOption>, GraphError> {
        let account = ad_account_id.map(strip_act_prefix).filter(|a| !a.is_empty());
        let key = cache::instagram_accounts_key(user_id, account);
        self.cached(key, || async move {
            let mut options = Vec::new();
            if let Some(account) = account {
                let path = format!("{}/instagram_accounts", format_ad_account_id(account));
                let response = self
                    .graph
                    .get(token, &path, &[("fields", "id,ig_id,username,name".into())])
                    .await?;
                for ig in data_entries(&response) {
                    let Some(id) = str_field(ig, "id") else {
                        continue;
                    };
                    let base = str_field(ig, "username")
                        .or(str_field(ig, "name"))
                        .unwrap_or(id);
                    options.push(MetadataOption {
                        id: id.to_string(),
                        label: instagram_label(base, id, str_field(ig, "ig_id"), "ad_account_id"),
                    });
                }
            }

            if options.is_empty() {
                let response = self
                    .graph
                    .get(
                        token,
                        "me/accounts",
                        &[(
                            "fields",
                            "instagram_business_account{id,ig_id,username},name".into(),
                        )],
                    )
                    .await?;
                for page in data_entries(&response) {
                    let Some(ig) = page.get("instagram_business_account") else {
                        continue;
                    };
                    let Some(id) = str_field(ig, "id") else {
                        continue;
                    };
                    let base = str_field(ig, "username")
                        .or(str_field(ig, "name"))
                        .unwrap_or(id);
                    options.push(MetadataOption {
                        id: id.to_string(),
                        label: instagram_label(base, id, str_field(ig, "ig_id"), "page_id"),
                    });
                }
            }
            Ok(options)
        })
        .await
    }

    #[instrument(skip_all, fields(step = "fetch_pixels", user_id = user_id))]
    pub async fn fetch_pixels(
        &self,
        token: &str,
        user_id: i64,
        ad_account_id: &str,
    ) -> Result<Vec<MetadataOption>, GraphError> {
        let account = strip_act_prefix(ad_account_id);
        if account.is_empty() {
            return Ok(Vec::new());
        }
        self.cached(cache::pixels_key(user_id, account), || async move {
            let path = format!("{}/adspixels", format_ad_account_id(account));
            let response = self
                .graph
                .get(token, &path, &[("fields", "id,name".into())])
                .await?;
            Ok(data_entries(&response)
                .iter()
                .filter_map(|pixel| {
                    let id = str_field(pixel, "id")?;
                    Some(MetadataOption {
                        id: id.to_string(),
                        label: str_field(pixel, "name").unwrap_or(id).to_string(),
                    })
                })
                .collect())
        })
        .await
    }

    /// Drop the user-wide listings (accounts, pages, page-derived Instagram).
    pub async fn forget_cache_for_user(&self, user_id: i64) {
        self.cache.forget(&cache::ad_accounts_key(user_id)).await;
        self.cache.forget(&cache::pages_key(user_id)).await;
        self.cache
            .forget(&cache::instagram_accounts_key(user_id, None))
            .await;
    }

    pub async fn forget_instagram_accounts_cache(&self, user_id: i64, ad_account_id: &str) {
        let account = strip_act_prefix(ad_account_id);
        if account.is_empty() {
            return;
        }
        self.cache
            .forget(&cache::instagram_accounts_key(user_id, Some(account)))
            .await;
    }

    pub async fn forget_pixels_cache(&self, user_id: i64, ad_account_id: &str) {
        let account = strip_act_prefix(ad_account_id);
        if account.is_empty() {
            return;
        }
        self.cache
            .forget(&cache::pixels_key(user_id, account))
            .await;
    }
}

#[async_trait]
impl AdsPlatform for MetaAdsService {
    #[instrument(skip_all, fields(step = "find_city_key", city = city, state = ?state))]
    async fn find_city_key(
        &self,
        token: &str,
        city: &str,
        state: Option<&str>,
    ) -> Result<Option<GeoMatch>, GraphError> {
        let response = self
            .graph
            .get(
                token,
                "search",
                &[
                    ("type", "adgeolocation".into()),
                    ("location_types", "city".into()),
                    ("q", city.to_string()),
                ],
            )
            .await?;
        let candidates: Vec<GeoCandidate> = data_entries(&response)
            .iter()
            .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
            .collect();

        let found = pick_city_key(&candidates, state);
        match &found {
            Some(m) if m.fallback => {
                warn!(city_key = %m.key, "city key from another region used as fallback")
            }
            Some(m) => info!(city_key = %m.key, "city key resolved"),
            None => warn!(candidates = candidates.len(), "city key not found"),
        }
        Ok(found)
    }

    #[instrument(skip_all, fields(step = "create_campaign"))]
    async fn create_campaign(
        &self,
        token: &str,
        ad_account_id: &str,
        request: &CampaignRequest,
    ) -> Result<String, GraphError> {
        let path = format!("{}/campaigns", format_ad_account_id(ad_account_id));
        let response = self.graph.post(token, &path, &request.params()).await?;
        let id = created_id(&response)?;
        info!(campaign_id = %id, objective = request.objective.platform_objective(), "campaign created");
        Ok(id)
    }

    #[instrument(skip_all, fields(step = "upload_image"))]
    async fn upload_image(
        &self,
        token: &str,
        ad_account_id: &str,
        file: &Path,
    ) -> Result<String, GraphError> {
        let path = format!("{}/adimages", format_ad_account_id(ad_account_id));
        let response = self
            .graph
            .post_file(token, &path, &[], "filename", file)
            .await?;
        let hash = response
            .get("images")
            .and_then(Value::as_object)
            .and_then(|images| images.values().next())
            .and_then(|first| str_field(first, "hash"))
            .map(str::to_string)
            .ok_or(GraphError::MissingField("images.hash"))?;
        info!(image_hash = %hash, "image uploaded");
        Ok(hash)
    }

    #[instrument(skip_all, fields(step = "upload_video"))]
    async fn upload_video(
        &self,
        token: &str,
        ad_account_id: &str,
        file: &Path,
    ) -> Result<String, GraphError> {
        let path = format!("{}/advideos", format_ad_account_id(ad_account_id));
        let response = self
            .graph
            .post_file(token, &path, &[], "source", file)
            .await?;
        let id = created_id(&response)?;
        info!(video_id = %id, "video uploaded");
        Ok(id)
    }

    #[instrument(skip_all, fields(step = "create_ad_set"))]
    async fn create_ad_set(
        &self,
        token: &str,
        ad_account_id: &str,
        request: &AdSetRequest,
    ) -> Result<String, GraphError> {
        let path = format!("{}/adsets", format_ad_account_id(ad_account_id));
        let response = self.graph.post(token, &path, &request.params()).await?;
        let id = created_id(&response)?;
        info!(ad_set_id = %id, name = %request.name, "ad set created");
        Ok(id)
    }

    #[instrument(skip_all, fields(step = "create_creative"))]
    async fn create_creative(
        &self,
        token: &str,
        ad_account_id: &str,
        request: &CreativeRequest,
    ) -> Result<String, GraphError> {
        let path = format!("{}/adcreatives", format_ad_account_id(ad_account_id));
        let response = self.graph.post(token, &path, &request.params()).await?;
        let id = created_id(&response)?;
        info!(
            creative_id = %id,
            enroll_status = request.enroll_status.as_str(),
            with_actor = request.instagram_actor_id.is_some(),
            "creative created"
        );
        Ok(id)
    }

    #[instrument(skip_all, fields(step = "create_ad"))]
    async fn create_ad(
        &self,
        token: &str,
        ad_account_id: &str,
        request: &AdRequest,
    ) -> Result<String, GraphError> {
        let path = format!("{}/ads", format_ad_account_id(ad_account_id));
        let response = self.graph.post(token, &path, &request.params()).await?;
        let id = created_id(&response)?;
        info!(ad_id = %id, "ad created");
        Ok(id)
    }

    #[instrument(skip_all, fields(step = "fetch_instagram_actor"))]
    async fn fetch_instagram_actor_details(
        &self,
        token: &str,
        actor_id: &str,
    ) -> Result<Value, GraphError> {
        let response = self
            .graph
            .get(
                token,
                actor_id,
                &[(
                    "fields",
                    "id,ig_id,username,name,profile_picture_url,followers_count,media_count,website"
                        .into(),
                )],
            )
            .await?;
        info!(instagram_actor_id = actor_id, username = ?str_field(&response, "username"), "instagram actor details");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Call {
        method: &'static str,
        path: String,
        params: Vec<(String, String)>,
    }

    #[derive(Default)]
    struct RecordingGraph {
        responses: Mutex<VecDeque<Result<Value, GraphError>>>,
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingGraph {
        fn with(responses: Vec<Result<Value, GraphError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn record(&self, method: &'static str, path: &str, params: &[(&str, String)]) -> Result<Value, GraphError> {
            self.calls.lock().unwrap().push(Call {
                method,
                path: path.to_string(),
                params: params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            });
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({})))
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GraphApi for RecordingGraph {
        async fn get(&self, _token: &str, path: &str, params: &[(&str, String)]) -> Result<Value, GraphError> {
            self.record("GET", path, params)
        }

        async fn post(&self, _token: &str, path: &str, params: &[(&str, String)]) -> Result<Value, GraphError> {
            self.record("POST", path, params)
        }

        async fn post_file(
            &self,
            _token: &str,
            path: &str,
            params: &[(&str, String)],
            _field: &str,
            _file: &Path,
        ) -> Result<Value, GraphError> {
            self.record("UPLOAD", path, params)
        }
    }

    fn service(graph: Arc<RecordingGraph>) -> MetaAdsService {
        MetaAdsService::new(graph, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn ad_accounts_are_cached_per_user() {
        let graph = RecordingGraph::with(vec![
            Ok(json!({"data": [{"id": "act_1", "account_id": "1", "name": "Loja"}]})),
            Ok(json!({"data": []})),
        ]);
        let ads = service(graph.clone());

        let first = ads.fetch_ad_accounts("tok", 5).await.unwrap();
        assert_eq!(first, vec![MetadataOption { id: "1".into(), label: "Loja (1)".into() }]);
        let second = ads.fetch_ad_accounts("tok", 5).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(graph.calls().len(), 1);

        ads.forget_cache_for_user(5).await;
        assert!(ads.fetch_ad_accounts("tok", 5).await.unwrap().is_empty());
        assert_eq!(graph.calls().len(), 2);
    }

    #[tokio::test]
    async fn instagram_accounts_fall_back_to_pages() {
        let graph = RecordingGraph::with(vec![
            Ok(json!({"data": []})),
            Ok(json!({"data": [
                {"name": "Page", "instagram_business_account": {"id": "ig-9", "username": "loja"}},
                {"name": "No IG"}
            ]})),
        ]);
        let ads = service(graph.clone());
        let options = ads
            .fetch_instagram_accounts("tok", 1, Some("act_77"))
            .await
            .unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].id, "ig-9");
        assert_eq!(options[0].label, "loja (id: ig-9) [page_id]");

        let calls = graph.calls();
        assert_eq!(calls[0].path, "act_77/instagram_accounts");
        assert_eq!(calls[1].path, "me/accounts");
    }

    #[tokio::test]
    async fn pixels_need_an_account() {
        let graph = RecordingGraph::with(vec![Ok(json!({"data": [{"id": "px1", "name": "Main"}]}))]);
        let ads = service(graph.clone());
        assert!(ads.fetch_pixels("tok", 1, "  ").await.unwrap().is_empty());
        let pixels = ads.fetch_pixels("tok", 1, "123").await.unwrap();
        assert_eq!(pixels[0].label, "Main");
        assert_eq!(graph.calls()[0].path, "act_123/adspixels");
    }

    #[tokio::test]
    async fn city_search_uses_adgeolocation() {
        let graph = RecordingGraph::with(vec![Ok(json!({"data": [
            {"key": "1", "type": "city", "country_code": "BR", "region": "Minas Gerais"},
            {"key": "2", "type": "city", "country_code": "BR", "region": "Bahia"}
        ]}))]);
        let ads = service(graph.clone());
        let found = ads
            .find_city_key("tok", "Santa Cruz", Some("Bahia"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, GeoMatch { key: "2".into(), fallback: false });

        let call = &graph.calls()[0];
        assert_eq!(call.path, "search");
        assert!(call.params.contains(&("type".into(), "adgeolocation".into())));
        assert!(call.params.contains(&("q".into(), "Santa Cruz".into())));
    }

    #[tokio::test]
    async fn upload_image_returns_first_hash() {
        let graph = RecordingGraph::with(vec![Ok(
            json!({"images": {"city.png": {"hash": "h-1", "url": "https://cdn/x"}}}),
        )]);
        let ads = service(graph.clone());
        let hash = ads
            .upload_image("tok", "55", Path::new("/tmp/city.png"))
            .await
            .unwrap();
        assert_eq!(hash, "h-1");
        assert_eq!(graph.calls()[0].path, "act_55/adimages");
    }

    #[tokio::test]
    async fn missing_id_is_an_error() {
        let graph = RecordingGraph::with(vec![Ok(json!({"success": true}))]);
        let ads = service(graph);
        let err = ads
            .create_ad(
                "tok",
                "1",
                &AdRequest {
                    name: "n".into(),
                    ad_set_id: "as".into(),
                    creative_id: "cr".into(),
                    status: crate::model::AdStatus::Paused,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::MissingField("id")));
    }
}
