//! Masking of credentials before anything reaches the logs.
use serde_json::{Map, Value};

pub const MAX_LOGGED_BODY: usize = 10_000;

const SENSITIVE_KEYS: &[&str] = &[
    "access_token",
    "client_secret",
    "fb_exchange_token",
    "appsecret_proof",
    "app_secret",
    "authorization",
];

pub fn is_sensitive(key: &str) -> bool {
    SENSITIVE_KEYS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(key))
}

/// Short values are fully starred; longer ones keep 6 leading and 4 trailing chars.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

pub fn params(params: &[(&str, String)]) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(k, v)| {
            let value = if is_sensitive(k) { mask(v) } else { v.clone() };
            (k.to_string(), value)
        })
        .collect()
}

pub fn json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                let masked = match v {
                    Value::String(s) if is_sensitive(k) => Value::String(mask(s)),
                    _ if is_sensitive(k) => Value::String("***".into()),
                    other => json(other),
                };
                out.insert(k.clone(), masked);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(json).collect()),
        other => other.clone(),
    }
}

pub fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_LOGGED_BODY) {
        Some((cut, _)) => format!("{}...(truncated)", &body[..cut]),
        None => body.to_string(),
    }
}

/// Response body as it may be logged: masked when it is JSON, then truncated.
pub fn body(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => truncate(&json(&value).to_string()),
        Err(_) => truncate(raw),
    }
}
