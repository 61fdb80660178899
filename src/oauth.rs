//! Linking a user to the ads platform: app credentials, the OAuth dialog and
//! the code-for-token exchange.
use chrono::{DateTime, Duration, Utc};
use reqwest::Url;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::ads::MetaAdsService;
use crate::config;
use crate::db::{self, Pool};
use crate::graph::{exchange_code_for_token, extend_access_token, AppCredentials, GraphApi, GraphError};
use crate::model::Connection;

const DIALOG_BASE: &str = "https://www.facebook.com/";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("configure the app id and app secret before connecting")]
    MissingAppCredentials,
    #[error("app id must not be empty")]
    EmptyAppId,
    #[error("invalid dialog url: {0}")]
    Url(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// App id and secret for a user: the connection row wins, the config fills gaps.
pub fn app_credentials(
    connection: Option<&Connection>,
    cfg: &config::Graph,
) -> Option<AppCredentials> {
    let pick = |own: Option<&String>, fallback: &Option<String>| {
        own.filter(|v| !v.trim().is_empty())
            .or(fallback.as_ref().filter(|v| !v.trim().is_empty()))
            .cloned()
    };
    let app_id = pick(connection.and_then(|c| c.app_id.as_ref()), &cfg.app_id)?;
    let app_secret = pick(connection.and_then(|c| c.app_secret.as_ref()), &cfg.app_secret)?;
    Some(AppCredentials { app_id, app_secret })
}

/// URL of the login dialog the user is sent to.
pub fn authorize_url(
    cfg: &config::Graph,
    app_id: &str,
    redirect_uri: &str,
    state: &str,
) -> Result<Url, OAuthError> {
    let raw = format!("{}{}/dialog/oauth", DIALOG_BASE, cfg.version.trim_matches('/'));
    let mut url = Url::parse(&raw).map_err(|e| OAuthError::Url(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("client_id", app_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", state)
        .append_pair("scope", &cfg.oauth_scopes)
        .append_pair("response_type", "code");
    Ok(url)
}

/// Store the user's app credentials. A `None` secret keeps the stored one.
/// Switching to a different app id drops the current token.
#[instrument(skip_all, fields(user_id = user_id))]
pub async fn save_app_credentials(
    pool: &Pool,
    user_id: i64,
    app_id: &str,
    app_secret: Option<&str>,
) -> Result<(), OAuthError> {
    let app_id = app_id.trim();
    if app_id.is_empty() {
        return Err(OAuthError::EmptyAppId);
    }
    let existing = db::fetch_connection(pool, user_id).await?;
    let previous_app = existing.as_ref().and_then(|c| c.app_id.clone());
    let secret = app_secret
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| existing.as_ref().and_then(|c| c.app_secret.clone()));

    db::upsert_connection_app_credentials(pool, user_id, Some(app_id), secret.as_deref()).await?;
    if previous_app.is_some_and(|old| old != app_id) {
        info!("app id changed; clearing stored token");
        db::upsert_connection_token(pool, user_id, None, None).await?;
    }
    Ok(())
}

/// Exchange an authorization code, extend it to a long-lived token and store
/// it. Returns the expiry, if the platform gave one.
#[instrument(skip_all, fields(user_id = user_id))]
pub async fn connect(
    pool: &Pool,
    graph: &dyn GraphApi,
    ads: &MetaAdsService,
    cfg: &config::Graph,
    user_id: i64,
    code: &str,
    redirect_uri: &str,
) -> Result<Option<DateTime<Utc>>, OAuthError> {
    let connection = db::fetch_connection(pool, user_id).await?;
    let app = app_credentials(connection.as_ref(), cfg).ok_or(OAuthError::MissingAppCredentials)?;

    let short = exchange_code_for_token(graph, &app, redirect_uri, code).await?;
    let (token, expires_in) = match extend_access_token(graph, &app, &short.access_token).await {
        Ok(long) => (long.access_token, long.expires_in.or(short.expires_in)),
        Err(err) => {
            warn!(error = %err, "token extension failed; keeping short-lived token");
            (short.access_token, short.expires_in)
        }
    };

    let expires_at = expires_in.map(|secs| Utc::now() + Duration::seconds(secs));
    db::upsert_connection_token(pool, user_id, Some(&token), expires_at).await?;
    ads.forget_cache_for_user(user_id).await;
    info!(expires_at = ?expires_at, "account connected");
    Ok(expires_at)
}

#[instrument(skip_all, fields(user_id = user_id))]
pub async fn disconnect(pool: &Pool, ads: &MetaAdsService, user_id: i64) -> Result<(), OAuthError> {
    db::upsert_connection_token(pool, user_id, None, None).await?;
    ads.forget_cache_for_user(user_id).await;
    info!("account disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct ScriptedGraph {
        responses: Mutex<VecDeque<Result<Value, GraphError>>>,
        seen: Mutex<Vec<Vec<(String, String)>>>,
    }

    impl ScriptedGraph {
        fn with(responses: Vec<Result<Value, GraphError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn next(&self, params: &[(&str, String)]) -> Result<Value, GraphError> {
            self.seen
                .lock()
                .unwrap()
                .push(params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({})))
        }
    }

    #[async_trait]
    impl GraphApi for ScriptedGraph {
        async fn get(&self, _token: &str, _path: &str, params: &[(&str, String)]) -> Result<Value, GraphError> {
            self.next(params)
        }

        async fn post(&self, _token: &str, _path: &str, params: &[(&str, String)]) -> Result<Value, GraphError> {
            self.next(params)
        }

        async fn post_file(
            &self,
            _token: &str,
            _path: &str,
            params: &[(&str, String)],
            _field: &str,
            _file: &Path,
        ) -> Result<Value, GraphError> {
            self.next(params)
        }
    }

    async fn setup_pool() -> Pool {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn graph_cfg() -> config::Graph {
        config::Graph {
            app_id: Some("cfg-app".into()),
            app_secret: Some("cfg-secret".into()),
            ..config::Graph::default()
        }
    }

    #[test]
    fn dialog_url_carries_scopes_and_state() {
        let url = authorize_url(&config::Graph::default(), "123", "https://app.test/cb", "xyz").unwrap();
        assert_eq!(url.path(), "/v20.0/dialog/oauth");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".into(), "123".into())));
        assert!(pairs.contains(&("redirect_uri".into(), "https://app.test/cb".into())));
        assert!(pairs.contains(&("state".into(), "xyz".into())));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
        assert!(pairs.iter().any(|(k, v)| k == "scope" && v.contains("ads_management")));
    }

    #[test]
    fn connection_credentials_override_config() {
        let cfg = graph_cfg();
        let fallback = app_credentials(None, &cfg).unwrap();
        assert_eq!(fallback.app_id, "cfg-app");

        let conn = Connection {
            id: 1,
            user_id: 1,
            access_token: None,
            token_expires_at: None,
            app_id: Some("own-app".into()),
            app_secret: Some(" ".into()),
            ad_account_id: None,
            page_id: None,
            instagram_actor_id: None,
            pixel_id: None,
        };
        let merged = app_credentials(Some(&conn), &cfg).unwrap();
        assert_eq!(merged.app_id, "own-app");
        assert_eq!(merged.app_secret, "cfg-secret");

        assert!(app_credentials(None, &config::Graph::default()).is_none());
    }

    #[tokio::test]
    async fn connect_stores_long_lived_token() {
        let pool = setup_pool().await;
        let user = db::insert_user(&pool, "Ana", None).await.unwrap();
        let graph = ScriptedGraph::with(vec![
            Ok(json!({"access_token": "short", "expires_in": 3600})),
            Ok(json!({"access_token": "long", "token_type": "bearer", "expires_in": 5_184_000})),
        ]);
        let ads = MetaAdsService::new(graph.clone(), std::time::Duration::from_secs(60));

        let expires = connect(&pool, graph.as_ref(), &ads, &graph_cfg(), user, "CODE", "https://app.test/cb")
            .await
            .unwrap()
            .unwrap();
        assert!(expires > Utc::now() + Duration::days(59));

        let conn = db::fetch_connection(&pool, user).await.unwrap().unwrap();
        assert_eq!(conn.access_token.as_deref(), Some("long"));

        let seen = graph.seen.lock().unwrap().clone();
        assert!(seen[0].contains(&("code".into(), "CODE".into())));
        assert!(seen[1].contains(&("fb_exchange_token".into(), "short".into())));
        assert!(seen[1].contains(&("client_secret".into(), "cfg-secret".into())));
    }

    #[tokio::test]
    async fn connect_without_credentials_is_rejected() {
        let pool = setup_pool().await;
        let user = db::insert_user(&pool, "Ana", None).await.unwrap();
        let graph = ScriptedGraph::with(vec![]);
        let ads = MetaAdsService::new(graph.clone(), std::time::Duration::from_secs(60));

        let err = connect(&pool, graph.as_ref(), &ads, &config::Graph::default(), user, "CODE", "cb")
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::MissingAppCredentials));
        assert!(graph.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn changing_app_id_drops_token_and_disconnect_clears_it() {
        let pool = setup_pool().await;
        let user = db::insert_user(&pool, "Ana", None).await.unwrap();
        let graph = ScriptedGraph::with(vec![]);
        let ads = MetaAdsService::new(graph, std::time::Duration::from_secs(60));

        save_app_credentials(&pool, user, "app-1", Some("s1")).await.unwrap();
        db::upsert_connection_token(&pool, user, Some("tok"), None).await.unwrap();

        save_app_credentials(&pool, user, "app-1", None).await.unwrap();
        let conn = db::fetch_connection(&pool, user).await.unwrap().unwrap();
        assert_eq!(conn.access_token.as_deref(), Some("tok"));
        assert_eq!(conn.app_secret.as_deref(), Some("s1"));

        save_app_credentials(&pool, user, "app-2", None).await.unwrap();
        let conn = db::fetch_connection(&pool, user).await.unwrap().unwrap();
        assert!(conn.access_token.is_none());
        assert_eq!(conn.app_secret.as_deref(), Some("s1"));

        db::upsert_connection_token(&pool, user, Some("tok2"), None).await.unwrap();
        disconnect(&pool, &ads, user).await.unwrap();
        let conn = db::fetch_connection(&pool, user).await.unwrap().unwrap();
        assert!(conn.access_token.is_none());
    }
}
