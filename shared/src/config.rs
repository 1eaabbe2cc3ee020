use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::model::Coordinates;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Budget for client-side photo compression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Longest edge after resizing, in pixels.
    pub max_dimension: u32,
    pub max_output_bytes: usize,
    pub initial_quality: u8,
    pub min_quality: u8,
    pub quality_step: u8,
    /// Decoder guard against decompression bombs.
    pub max_input_pixels: u64,
    pub max_concurrent_ops: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1920,
            max_output_bytes: 1024 * 1024,
            initial_quality: 85,
            min_quality: 40,
            quality_step: 10,
            max_input_pixels: 100_000_000,
            max_concurrent_ops: 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub upload_timeout_ms: u64,
    pub save_timeout_ms: u64,
    pub max_upload_bytes: u64,
    pub allowed_mime_types: Vec<String>,
    pub compression: CompressionConfig,
    pub storage_folder_prefix: String,
    pub default_trip_title: String,
    pub default_center: Coordinates,
    pub default_zoom: f64,
    /// Minimum zoom applied when the viewport follows a selected place.
    pub focus_zoom: f64,
    pub lookup_cache_size: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            upload_timeout_ms: 20_000,
            save_timeout_ms: 10_000,
            max_upload_bytes: 10 * 1024 * 1024,
            allowed_mime_types: vec![
                "image/jpeg".into(),
                "image/png".into(),
                "image/webp".into(),
            ],
            compression: CompressionConfig::default(),
            storage_folder_prefix: "traveldot".into(),
            default_trip_title: "My First Trip".into(),
            default_center: default_center(),
            default_zoom: 12.0,
            focus_zoom: 15.0,
            lookup_cache_size: 64,
        }
    }
}

// Bangkok
const fn default_center() -> Coordinates {
    Coordinates::from_trusted(13.7563, 100.5018)
}

impl JournalConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload_timeout_ms == 0 {
            return Err(ConfigError::Invalid("upload_timeout_ms must be > 0".into()));
        }
        if self.save_timeout_ms == 0 {
            return Err(ConfigError::Invalid("save_timeout_ms must be > 0".into()));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("max_upload_bytes must be > 0".into()));
        }
        if self.allowed_mime_types.is_empty() {
            return Err(ConfigError::Invalid(
                "allowed_mime_types must not be empty".into(),
            ));
        }
        let c = &self.compression;
        if c.max_dimension == 0 || c.max_output_bytes == 0 {
            return Err(ConfigError::Invalid(
                "compression budget must be non-zero".into(),
            ));
        }
        if c.min_quality == 0 || c.min_quality > c.initial_quality || c.initial_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "compression quality range {}..={} is invalid",
                c.min_quality, c.initial_quality
            )));
        }
        if c.quality_step == 0 {
            return Err(ConfigError::Invalid("quality_step must be > 0".into()));
        }
        if c.max_concurrent_ops == 0 {
            return Err(ConfigError::Invalid("max_concurrent_ops must be > 0".into()));
        }
        if !(0.0..=22.0).contains(&self.default_zoom) || !(0.0..=22.0).contains(&self.focus_zoom) {
            return Err(ConfigError::Invalid("zoom levels must be within 0..=22".into()));
        }
        if self.default_trip_title.trim().is_empty() {
            return Err(ConfigError::Invalid("default_trip_title must not be blank".into()));
        }
        if self.lookup_cache_size == 0 {
            return Err(ConfigError::Invalid("lookup_cache_size must be > 0".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    #[must_use]
    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.save_timeout_ms)
    }

    #[must_use]
    pub fn is_allowed_mime(&self, mime: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mime.trim()))
    }
}
