use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Broad class of a platform error, derived from its code and text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// The Instagram actor was refused for the creative. Detection is a
    /// best-effort match on the error text, since the platform has no stable
    /// code for it.
    ActorRejected,
    /// OAuth error 190: token expired, revoked or malformed.
    InvalidToken,
    Other,
}

/// Decoded `error` envelope of a failed Graph call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub code: Option<i64>,
    pub subcode: Option<i64>,
    pub message: String,
    pub user_message: Option<String>,
    pub kind: ApiErrorKind,
}

impl ApiError {
    /// Parse `{"error": {...}}`. Returns `None` when the body has no error object.
    pub fn from_body(status: u16, body: &Value) -> Option<Self> {
        let error = body.get("error")?.as_object()?;
        let code = error.get("code").and_then(Value::as_i64);
        let subcode = error.get("error_subcode").and_then(Value::as_i64);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        let user_message = error
            .get("error_user_msg")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        let kind = classify(code, &message, user_message.as_deref());
        Some(Self {
            status,
            code,
            subcode,
            message,
            user_message,
            kind,
        })
    }
}

pub fn classify(code: Option<i64>, message: &str, user_message: Option<&str>) -> ApiErrorKind {
    let mentions_actor = |text: &str| text.to_ascii_lowercase().contains("actor_id");
    if mentions_actor(message) || user_message.is_some_and(mentions_actor) {
        ApiErrorKind::ActorRejected
    } else if code == Some(190) {
        ApiErrorKind::InvalidToken
    } else {
        ApiErrorKind::Other
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code.unwrap_or(self.status as i64);
        write!(f, "Meta API error ({}", code)?;
        if let Some(subcode) = self.subcode {
            write!(f, " subcode {}", subcode)?;
        }
        write!(f, "): {}", self.message)?;
        if let Some(user_message) = &self.user_message {
            write!(f, " ({})", user_message)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("{0}")]
    Api(ApiError),
    #[error("Meta API request failed with status {status}")]
    Status { status: u16, body: String },
    #[error("failed to reach Meta: {0}")]
    Transport(reqwest::Error),
    #[error("invalid Meta response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("failed to read upload {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Meta response missing {0}")]
    MissingField(&'static str),
    #[error("invalid Graph URL: {0}")]
    Url(String),
}

/// Query strings can carry app secrets and OAuth codes, so the URL never
/// travels with a transport error.
impl From<reqwest::Error> for GraphError {
    fn from(err: reqwest::Error) -> Self {
        GraphError::Transport(err.without_url())
    }
}

impl GraphError {
    pub fn kind(&self) -> Option<ApiErrorKind> {
        match self {
            GraphError::Api(err) => Some(err.kind),
            _ => None,
        }
    }

    pub fn is_actor_rejected(&self) -> bool {
        self.kind() == Some(ApiErrorKind::ActorRejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn formats_code_subcode_and_user_message() {
        let body = json!({
            "error": {
                "message": "Invalid parameter",
                "code": 100,
                "error_subcode": 1487390,
                "error_user_msg": "Escolha outro público"
            }
        });
        let err = ApiError::from_body(400, &body).unwrap();
        assert_eq!(
            err.to_string(),
            "Meta API error (100 subcode 1487390): Invalid parameter (Escolha outro público)"
        );
        assert_eq!(err.kind, ApiErrorKind::Other);
    }

    #[test]
    fn falls_back_to_http_status_without_code() {
        let err = ApiError::from_body(500, &json!({"error": {"message": "boom"}})).unwrap();
        assert_eq!(err.to_string(), "Meta API error (500): boom");
        assert!(ApiError::from_body(500, &json!({"data": []})).is_none());
    }

    #[test]
    fn detects_actor_rejection_in_either_text() {
        assert_eq!(
            classify(Some(100), "Param instagram_actor_id must be a valid Instagram account", None),
            ApiErrorKind::ActorRejected
        );
        assert_eq!(
            classify(Some(100), "Invalid parameter", Some("The Instagram ACTOR_ID is not allowed")),
            ApiErrorKind::ActorRejected
        );
        assert_eq!(classify(Some(190), "Session has expired", None), ApiErrorKind::InvalidToken);
    }
}
