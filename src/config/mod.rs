pub mod runtime;
pub use runtime::{new_runtime_config, RuntimeConfig, SharedRuntimeConfig};

use crate::catalog::CatalogEntry;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Complete Chronolens configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChronolensConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub lazy: LazyConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pregeneration: PregenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Backoff for remote capability calls
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound of the random delay added to every wait
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1500
}

fn default_jitter_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Generation pipeline settings
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Number of eras requested from the planner; timelines are never resized
    #[serde(default = "default_event_count")]
    pub event_count: usize,
    /// When true a narration failure fails the whole run
    #[serde(default = "default_narration_required")]
    pub narration_required: bool,
    /// Render eras as 360° equirectangular panoramas
    #[serde(default = "default_panoramic")]
    pub panoramic: bool,
}

fn default_event_count() -> usize {
    4
}

fn default_narration_required() -> bool {
    true
}

fn default_panoramic() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            event_count: default_event_count(),
            narration_required: default_narration_required(),
            panoramic: default_panoramic(),
        }
    }
}

/// Scrub-driven generation thresholds (distance in timeline indices)
#[derive(Debug, Clone, Deserialize)]
pub struct LazyConfig {
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f64,
    #[serde(default = "default_panoramic_visibility_threshold")]
    pub panoramic_visibility_threshold: f64,
}

fn default_visibility_threshold() -> f64 {
    crate::lazy::VISIBILITY_THRESHOLD
}

fn default_panoramic_visibility_threshold() -> f64 {
    crate::lazy::PANORAMIC_VISIBILITY_THRESHOLD
}

impl Default for LazyConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: default_visibility_threshold(),
            panoramic_visibility_threshold: default_panoramic_visibility_threshold(),
        }
    }
}

/// Artifact cache location
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// SQLite database file; ":memory:" keeps artifacts for the process lifetime only
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("chronolens.db")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

/// Background pregeneration of the preset catalog
#[derive(Debug, Clone, Deserialize)]
pub struct PregenerationConfig {
    #[serde(default = "default_pregeneration_enabled")]
    pub enabled: bool,
    /// Replaces the built-in catalog when present
    #[serde(default)]
    pub catalog: Option<Vec<CatalogEntry>>,
}

fn default_pregeneration_enabled() -> bool {
    true
}

impl Default for PregenerationConfig {
    fn default() -> Self {
        Self {
            enabled: default_pregeneration_enabled(),
            catalog: None,
        }
    }
}

impl PregenerationConfig {
    /// Configured catalog, or the built-in presets.
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.catalog
            .clone()
            .unwrap_or_else(crate::catalog::default_catalog)
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &Path) -> Result<ChronolensConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ChronolensConfig =
        toml::from_str(&contents).context("Failed to parse config TOML")?;
    Ok(config)
}
