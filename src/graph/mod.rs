use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Request, Url};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::config;

pub mod error;
pub mod redact;

pub use error::{ApiError, ApiErrorKind, GraphError};

/// Request primitive over the Graph API. `path` is relative to the versioned
/// root (`act_1/campaigns`, `search`, ...). An empty `token` sends the call
/// without an `Authorization` header, which only the OAuth endpoints accept.
#[async_trait]
pub trait GraphApi: Send + Sync {
    async fn get(&self, token: &str, path: &str, params: &[(&str, String)])
        -> Result<Value, GraphError>;

    async fn post(
        &self,
        token: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, GraphError>;

    /// Multipart POST carrying `file` under the form field `field`.
    async fn post_file(
        &self,
        token: &str,
        path: &str,
        params: &[(&str, String)],
        field: &str,
        file: &Path,
    ) -> Result<Value, GraphError>;
}

#[derive(Clone)]
pub struct GraphClient {
    http: Client,
    base_url: Url,
    version: String,
}

impl fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl GraphClient {
    pub fn from_config(cfg: &config::Graph) -> Result<Self, GraphError> {
        let base_url = Url::parse(&cfg.base_url).map_err(|e| GraphError::Url(e.to_string()))?;
        let http = Client::builder()
            .user_agent("meta-bulk-ads/0.1")
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .danger_accept_invalid_certs(!cfg.verify_tls)
            .build()?;
        Ok(Self {
            http,
            base_url,
            version: cfg.version.clone(),
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, GraphError> {
        let relative = format!(
            "{}/{}",
            self.version.trim_matches('/'),
            path.trim_start_matches('/')
        );
        self.base_url
            .join(&relative)
            .map_err(|e| GraphError::Url(e.to_string()))
    }

    /// Build a GET (query string) or POST (form body) request.
    pub fn build_request(
        &self,
        method: Method,
        token: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Request, GraphError> {
        let url = self.endpoint(path)?;
        let builder = if method == Method::GET {
            self.http.get(url).query(params)
        } else {
            self.http.request(method, url).form(params)
        };
        Ok(authorize(builder, token).build()?)
    }

    pub fn build_upload(
        &self,
        token: &str,
        path: &str,
        params: &[(&str, String)],
        field: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Request, GraphError> {
        let url = self.endpoint(path)?;
        let mut form = Form::new();
        for (key, value) in params {
            form = form.text(key.to_string(), value.clone());
        }
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(content_type(file_name))?;
        form = form.part(field.to_string(), part);
        Ok(authorize(self.http.post(url), token).multipart(form).build()?)
    }

    async fn execute(
        &self,
        request: Request,
        params: &[(&str, String)],
    ) -> Result<Value, GraphError> {
        let method = request.method().clone();
        let mut logged_url = request.url().clone();
        logged_url.set_query(None);
        debug!(%method, url = %logged_url, params = ?redact::params(params), "graph request");

        let started = Instant::now();
        let res = match self.http.execute(request).await {
            Ok(res) => res,
            Err(err) => {
                let err = GraphError::from(err);
                error!(%method, url = %logged_url, error = %err, "graph transport error");
                return Err(err);
            }
        };
        let status = res.status();
        let body = res.text().await?;
        debug!(
            %method,
            url = %logged_url,
            status = status.as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            body = %redact::body(&body),
            "graph response"
        );

        decode(status.as_u16(), status.is_success(), &body)
    }
}

fn authorize(builder: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
    if token.is_empty() {
        builder
    } else {
        builder.bearer_auth(token)
    }
}

/// Turn a response body into JSON, or into the platform error it carries.
pub fn decode(status: u16, success: bool, body: &str) -> Result<Value, GraphError> {
    let parsed = serde_json::from_str::<Value>(body);
    if !success {
        if let Some(err) = parsed
            .as_ref()
            .ok()
            .and_then(|v| ApiError::from_body(status, v))
        {
            warn!(status, code = ?err.code, subcode = ?err.subcode, kind = ?err.kind, "graph error");
            return Err(GraphError::Api(err));
        }
        return Err(GraphError::Status {
            status,
            body: redact::body(body),
        });
    }
    let value = parsed?;
    if let Some(err) = ApiError::from_body(status, &value) {
        return Err(GraphError::Api(err));
    }
    Ok(value)
}

fn content_type(file_name: &str) -> &'static str {
    match Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl GraphApi for GraphClient {
    async fn get(
        &self,
        token: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, GraphError> {
        let request = self.build_request(Method::GET, token, path, params)?;
        self.execute(request, params).await
    }

    async fn post(
        &self,
        token: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, GraphError> {
        let request = self.build_request(Method::POST, token, path, params)?;
        self.execute(request, params).await
    }

    async fn post_file(
        &self,
        token: &str,
        path: &str,
        params: &[(&str, String)],
        field: &str,
        file: &Path,
    ) -> Result<Value, GraphError> {
        let bytes = tokio::fs::read(file).await.map_err(|source| GraphError::Io {
            path: file.display().to_string(),
            source,
        })?;
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        debug!(field, file = %file_name, size = bytes.len(), "graph upload");
        let request = self.build_upload(token, path, params, field, &file_name, bytes)?;
        self.execute(request, params).await
    }
}

/// App id and secret used for the OAuth endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppCredentials {
    pub app_id: String,
    pub app_secret: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Seconds until expiry. Absent for tokens that do not expire.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

fn parse_grant(value: Value) -> Result<TokenGrant, GraphError> {
    if value.get("access_token").and_then(Value::as_str).is_none() {
        return Err(GraphError::MissingField("access_token"));
    }
    Ok(serde_json::from_value(value)?)
}

/// Trade an OAuth authorization code for a short-lived user token.
pub async fn exchange_code_for_token(
    api: &dyn GraphApi,
    app: &AppCredentials,
    redirect_uri: &str,
    code: &str,
) -> Result<TokenGrant, GraphError> {
    let params = [
        ("client_id", app.app_id.clone()),
        ("client_secret", app.app_secret.clone()),
        ("redirect_uri", redirect_uri.to_string()),
        ("code", code.to_string()),
    ];
    parse_grant(api.get("", "oauth/access_token", &params).await?)
}

/// Extend a short-lived user token into a long-lived one.
pub async fn extend_access_token(
    api: &dyn GraphApi,
    app: &AppCredentials,
    short_lived_token: &str,
) -> Result<TokenGrant, GraphError> {
    let params = [
        ("grant_type", "fb_exchange_token".to_string()),
        ("client_id", app.app_id.clone()),
        ("client_secret", app.app_secret.clone()),
        ("fb_exchange_token", short_lived_token.to_string()),
    ];
    parse_grant(api.get("", "oauth/access_token", &params).await?)
}
