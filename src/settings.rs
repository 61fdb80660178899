//! Typed batch settings stored as versioned JSON on the batch row.
//!
//! Everything the worker needs beyond the fixed batch columns (geographic
//! scope, creative source, overlay) lives here. Each field has a documented
//! default so rows written by older submitters still decode, and the whole
//! struct is validated once on submission and re-checked when a run starts.
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::model::DestinationType;

pub const SETTINGS_VERSION: u32 = 1;
pub const MAX_ROTATION_IMAGES: usize = 30;
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "m4v", "webm"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("unsupported settings version {0}")]
    UnsupportedVersion(u32),
    #[error("select a state or at least one city")]
    EmptyScope,
    #[error("no media configured for the creative")]
    MissingMedia,
    #[error("rotation needs between 1 and {max} images, got {0}", max = MAX_ROTATION_IMAGES)]
    RotationCount(usize),
    #[error("rotation accepts only JPG, PNG or WEBP images: {0}")]
    UnsupportedRotationImage(String),
    #[error("unsupported image type: {0}")]
    UnsupportedImage(String),
    #[error("unsupported video type: {0}")]
    UnsupportedVideo(String),
    #[error("video creatives cannot use image rotation")]
    VideoRotation,
    #[error("video creatives cannot carry a text overlay")]
    VideoOverlay,
}

/// Which cities a batch targets. Exactly one form is ever stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GeoScope {
    /// Every known city of the state, matched ignoring case and accents.
    State(String),
    CityIds(Vec<i64>),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CreativeSourceMode {
    #[default]
    SingleMedia,
    ImageRotation,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreativeSource {
    /// Default: `single_media`.
    #[serde(default)]
    pub mode: CreativeSourceMode,
    /// Default: `image`. Rotation is always image.
    #[serde(default)]
    pub media_kind: MediaKind,
    /// Path relative to the media root. Required in single mode.
    #[serde(default)]
    pub media_path: Option<String>,
    /// Ordered list consumed round-robin by alphabetical city index.
    #[serde(default)]
    pub rotation_images: Vec<String>,
}

/// Text block drawn over each city's image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverlaySpec {
    /// Default: none (no block drawn). May contain `{city}`.
    #[serde(default)]
    pub text: Option<String>,
    /// Default: `#ffffff`.
    #[serde(default = "default_text_color")]
    pub text_color: String,
    /// Default: `#000000`. The literal `transparent` disables the block fill.
    #[serde(default = "default_background_color")]
    pub background_color: String,
    /// Horizontal anchor of the block center, percent of width. Default: 50.
    #[serde(default = "default_position_x")]
    pub position_x: f32,
    /// Vertical anchor of the block center, percent of height. Default: 12.
    #[serde(default = "default_position_y")]
    pub position_y: f32,
}

impl Default for OverlaySpec {
    fn default() -> Self {
        Self {
            text: None,
            text_color: default_text_color(),
            background_color: default_background_color(),
            position_x: default_position_x(),
            position_y: default_position_y(),
        }
    }
}

impl OverlaySpec {
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    pub fn is_transparent(&self) -> bool {
        self.background_color.trim().eq_ignore_ascii_case("transparent")
    }
}

fn default_text_color() -> String {
    "#ffffff".to_string()
}

fn default_background_color() -> String {
    "#000000".to_string()
}

fn default_position_x() -> f32 {
    50.0
}

fn default_position_y() -> f32 {
    12.0
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSettings {
    #[serde(default = "default_version")]
    pub version: u32,
    pub scope: GeoScope,
    /// Digits only. Used for messaging destinations.
    #[serde(default)]
    pub whatsapp_number: Option<String>,
    #[serde(default)]
    pub creative: CreativeSource,
    #[serde(default)]
    pub overlay: OverlaySpec,
}

/// The creative input picked for one city.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreativeChoice {
    pub path: String,
    /// Position in the rotation list; `None` in single mode.
    pub rotation_index: Option<usize>,
}

impl BatchSettings {
    pub fn new(scope: GeoScope) -> Self {
        Self {
            version: SETTINGS_VERSION,
            scope,
            whatsapp_number: None,
            creative: CreativeSource::default(),
            overlay: OverlaySpec::default(),
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.version != SETTINGS_VERSION {
            return Err(SettingsError::UnsupportedVersion(self.version));
        }

        match &self.scope {
            GeoScope::State(state) if state.trim().is_empty() => {
                return Err(SettingsError::EmptyScope)
            }
            GeoScope::CityIds(ids) if ids.is_empty() => return Err(SettingsError::EmptyScope),
            _ => {}
        }

        let creative = &self.creative;
        if creative.media_kind == MediaKind::Video && self.overlay.has_text() {
            return Err(SettingsError::VideoOverlay);
        }

        match creative.mode {
            CreativeSourceMode::ImageRotation => {
                if creative.media_kind == MediaKind::Video {
                    return Err(SettingsError::VideoRotation);
                }
                let count = creative.rotation_images.len();
                if count == 0 || count > MAX_ROTATION_IMAGES {
                    return Err(SettingsError::RotationCount(count));
                }
                if let Some(bad) = creative
                    .rotation_images
                    .iter()
                    .find(|p| !has_extension(p, IMAGE_EXTENSIONS))
                {
                    return Err(SettingsError::UnsupportedRotationImage(bad.clone()));
                }
            }
            CreativeSourceMode::SingleMedia => {
                let path = creative
                    .media_path
                    .as_deref()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or(SettingsError::MissingMedia)?;
                match creative.media_kind {
                    MediaKind::Image if !has_extension(path, IMAGE_EXTENSIONS) => {
                        return Err(SettingsError::UnsupportedImage(path.to_string()))
                    }
                    MediaKind::Video if !has_extension(path, VIDEO_EXTENSIONS) => {
                        return Err(SettingsError::UnsupportedVideo(path.to_string()))
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Creative source for the city at `city_index` in alphabetical order.
    pub fn creative_for(&self, city_index: usize) -> Option<CreativeChoice> {
        match self.creative.mode {
            CreativeSourceMode::SingleMedia => {
                self.creative
                    .media_path
                    .as_ref()
                    .map(|path| CreativeChoice {
                        path: path.clone(),
                        rotation_index: None,
                    })
            }
            CreativeSourceMode::ImageRotation => {
                let index = rotation_index(city_index, self.creative.rotation_images.len())?;
                Some(CreativeChoice {
                    path: self.creative.rotation_images[index].clone(),
                    rotation_index: Some(index),
                })
            }
        }
    }

    pub fn media_kind(&self) -> MediaKind {
        match self.creative.mode {
            CreativeSourceMode::ImageRotation => MediaKind::Image,
            CreativeSourceMode::SingleMedia => self.creative.media_kind,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Round-robin slot for a city: `city_index mod rotation_len`.
pub fn rotation_index(city_index: usize, rotation_len: usize) -> Option<usize> {
    if rotation_len == 0 {
        None
    } else {
        Some(city_index % rotation_len)
    }
}

/// Media kind inferred from a file name, defaulting to image.
pub fn media_kind_for_path(path: &str) -> MediaKind {
    if has_extension(path, VIDEO_EXTENSIONS) {
        MediaKind::Video
    } else {
        MediaKind::Image
    }
}

pub fn has_extension(path: &str, allowed: &[&str]) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| allowed.contains(&e.as_str()))
}

/// Whether the destination needs a page id on the batch.
pub fn requires_page(destination: DestinationType) -> bool {
    destination.is_messaging()
}
