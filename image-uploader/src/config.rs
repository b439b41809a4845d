use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use toml_edit::DocumentMut;

use crate::scale::ScaleTarget;

/// Default on-disk config filename
pub const DEFAULT_CONFIG_PATH: &str = "uploader.toml";

/// Strongly typed representation of the configuration file.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    pub logging: Option<Logging>,
    #[serde(default)]
    pub uploader: UploaderConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Logging {
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    /// `data:` URL text (default).
    #[default]
    Base64,
    /// Raw bytes tagged with their MIME type.
    #[serde(alias = "blob")]
    Binary,
}

/// Per-pipeline options. Every field has a default so partial tables are fine.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct UploaderConfig {
    /// Multipart form field carrying the file.
    pub name: String,
    /// Suppress all activity.
    pub disabled: bool,
    pub max_width: u32,
    pub max_height: u32,
    pub auto_scale: bool,
    pub scale_ratio: Option<f64>,
    /// Lossy encode quality in [0,1]; only used for JPEG input.
    pub quality: f64,
    /// Correct orientation from EXIF data.
    pub auto_rotate: bool,
    pub result_type: ResultType,
    /// Upload endpoint. Without one (and without a custom handler) runs stop after the preview.
    pub action: Option<String>,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            name: "file".to_string(),
            disabled: false,
            max_width: 1024,
            max_height: 1024,
            auto_scale: true,
            scale_ratio: None,
            quality: 1.0,
            auto_rotate: true,
            result_type: ResultType::Base64,
            action: None,
        }
    }
}

impl UploaderConfig {
    pub fn scale_target(&self) -> ScaleTarget {
        ScaleTarget {
            max_width: self.max_width,
            max_height: self.max_height,
            auto_scale: self.auto_scale,
            explicit_ratio: self.scale_ratio,
            quality: if self.quality.is_nan() {
                1.0
            } else {
                self.quality.clamp(0.0, 1.0)
            },
        }
    }

    /// Endpoint with surrounding whitespace removed; empty strings count as unset.
    pub fn endpoint(&self) -> Option<&str> {
        self.action
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

impl Config {
    /// Load the config file. A missing file yields defaults.
    pub async fn load(path: Option<PathBuf>) -> Result<Config> {
        let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        if !fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "config file not found; using defaults");
            return Ok(Config::default());
        }
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&text, &path)
    }

    fn parse(text: &str, path: &Path) -> Result<Config> {
        let doc = text
            .parse::<DocumentMut>()
            .with_context(|| format!("parsing config file {}", path.display()))?;
        let typed: Config = toml_edit::de::from_document(doc)
            .with_context(|| format!("invalid config in {}", path.display()))?;
        Ok(typed)
    }

    /// Parse config from an in-memory TOML string.
    pub fn from_toml_str(text: &str) -> Result<Config> {
        Self::parse(text, Path::new("<inline>"))
    }
}
