//! Configuration loader and validator for the bulk ads worker.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub graph: Graph,
    #[serde(default)]
    pub compositor: Compositor,
    #[serde(default)]
    pub cache: Cache,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Root directory that stored media paths (uploads, rotation images) are relative to.
    pub media_dir: String,
    /// Where generated creatives are written before upload.
    pub scratch_dir: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_inter_city_delay_ms")]
    pub inter_city_delay_ms: u64,
}

/// Graph API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Graph {
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,
    #[serde(default = "default_graph_version")]
    pub version: String,
    /// Only turn off against a local stub.
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_secret: Option<String>,
    #[serde(default = "default_oauth_scopes")]
    pub oauth_scopes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Compositor {
    #[serde(default)]
    pub font_path: Option<String>,
    /// Probed in order after `font_path`.
    #[serde(default = "default_font_candidates")]
    pub font_candidates: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cache {
    #[serde(default = "default_metadata_ttl_seconds")]
    pub metadata_ttl_seconds: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            version: default_graph_version(),
            verify_tls: true,
            timeout_seconds: default_timeout_seconds(),
            app_id: None,
            app_secret: None,
            oauth_scopes: default_oauth_scopes(),
        }
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self {
            font_path: None,
            font_candidates: default_font_candidates(),
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            metadata_ttl_seconds: default_metadata_ttl_seconds(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_inter_city_delay_ms() -> u64 {
    500
}

fn default_graph_base_url() -> String {
    "https://graph.facebook.com/".to_string()
}

fn default_graph_version() -> String {
    "v20.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_oauth_scopes() -> String {
    "public_profile,email,ads_management,ads_read,business_management,pages_show_list,instagram_basic"
        .to_string()
}

fn default_font_candidates() -> Vec<String> {
    vec![
        "resources/fonts/meta-ads-bold.ttf".to_string(),
        "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf".to_string(),
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".to_string(),
    ]
}

fn default_metadata_ttl_seconds() -> u64 {
    3600
}

impl Config {
    /// Ensure required directories exist.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [&self.app.data_dir, &self.app.scratch_dir] {
            if !dir.trim().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/meta_ads.db", self.app.data_dir))
    }

    pub fn media_root(&self) -> PathBuf {
        PathBuf::from(&self.app.media_dir)
    }

    pub fn scratch_root(&self) -> PathBuf {
        PathBuf::from(&self.app.scratch_dir)
    }

    /// Configured font path first, then the candidates.
    pub fn font_search_paths(&self) -> Vec<PathBuf> {
        self.compositor
            .font_path
            .iter()
            .chain(self.compositor.font_candidates.iter())
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .collect()
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.media_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.media_dir must be non-empty"));
    }
    if cfg.app.scratch_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.scratch_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }

    if reqwest::Url::parse(&cfg.graph.base_url).is_err() {
        return Err(ConfigError::Invalid("graph.base_url must be a valid URL"));
    }
    if cfg.graph.version.trim().is_empty() {
        return Err(ConfigError::Invalid("graph.version must be non-empty"));
    }
    if cfg.graph.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("graph.timeout_seconds must be > 0"));
    }
    if cfg.graph.app_id.is_some() != cfg.graph.app_secret.is_some() {
        return Err(ConfigError::Invalid(
            "graph.app_id and graph.app_secret must be set together",
        ));
    }

    if cfg.cache.metadata_ttl_seconds == 0 {
        return Err(ConfigError::Invalid("cache.metadata_ttl_seconds must be > 0"));
    }

    Ok(())
}

/// Sample configuration with every section spelled out.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  media_dir: "./storage/public"
  scratch_dir: "./storage/generated"
  poll_interval_ms: 1000
  inter_city_delay_ms: 500

graph:
  base_url: "https://graph.facebook.com/"
  version: "v20.0"
  verify_tls: true
  timeout_seconds: 120
  app_id: "YOUR_META_APP_ID"
  app_secret: "YOUR_META_APP_SECRET"

compositor:
  font_path: "./resources/fonts/meta-ads-bold.ttf"

cache:
  metadata_ttl_seconds: 3600
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.graph.version, "v20.0");
        assert_eq!(cfg.app.inter_city_delay_ms, 500);
    }

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let yaml = r#"app:
  data_dir: "./data"
  media_dir: "./media"
  scratch_dir: "./scratch"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.graph.base_url, "https://graph.facebook.com/");
        assert!(cfg.graph.verify_tls);
        assert_eq!(cfg.cache.metadata_ttl_seconds, 3600);
        assert_eq!(cfg.app.poll_interval_ms, 1000);
        assert!(cfg.compositor.font_path.is_none());
        assert!(!cfg.font_search_paths().is_empty());
    }

    #[test]
    fn invalid_dirs() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.media_dir = " ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("media_dir")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.scratch_dir = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_graph_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.graph.base_url = "not a url".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("base_url")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.graph.app_secret = None;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("app_secret")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn font_path_is_probed_first() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        let paths = cfg.font_search_paths();
        assert_eq!(paths[0], PathBuf::from("./resources/fonts/meta-ads-bold.ttf"));
    }

    #[test]
    fn ensure_dirs_creates_data_and_scratch() {
        let td = tempdir().unwrap();
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = td.path().join("data").to_string_lossy().to_string();
        cfg.app.scratch_dir = td.path().join("scratch").to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(td.path().join("data").exists());
        assert!(td.path().join("scratch").exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.graph.app_id.as_deref(), Some("YOUR_META_APP_ID"));
    }
}
