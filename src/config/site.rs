//! Site configuration (_config.yml)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main site configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    // Directories, relative to the site root
    pub pages_dir: String,
    pub layouts_dir: String,
    pub properties_dir: String,
    pub static_dir: String,
    pub public_dir: String,

    // Development server
    pub port: u16,
    /// Port of the live reload channel, `port + 1` when unset
    pub reload_port: Option<u16>,

    #[serde(default)]
    pub highlight: HighlightConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            pages_dir: "pages".to_string(),
            layouts_dir: "layouts".to_string(),
            properties_dir: "properties".to_string(),
            static_dir: "static".to_string(),
            public_dir: "public".to_string(),
            port: 3000,
            reload_port: None,
            highlight: HighlightConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

/// Code highlighting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    pub enable: bool,
    pub theme: String,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            enable: true,
            theme: "InspiredGitHub".to_string(),
        }
    }
}

/// File watcher configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Glob patterns (relative to the site root) that never trigger a reload
    pub ignore: Vec<String>,
}

impl SiteConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config: SiteConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        Ok(config)
    }

    /// Apply `PORT` / `RELOAD_PORT` from the environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("PORT").ok().as_deref(),
            std::env::var("RELOAD_PORT").ok().as_deref(),
        );
    }

    fn apply_overrides(&mut self, port: Option<&str>, reload_port: Option<&str>) {
        if let Some(value) = port {
            match value.trim().parse() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value {:?}", value),
            }
        }
        if let Some(value) = reload_port {
            match value.trim().parse() {
                Ok(port) => self.reload_port = Some(port),
                Err(_) => tracing::warn!("Ignoring invalid RELOAD_PORT value {:?}", value),
            }
        }
    }

    /// Port of the live reload channel
    pub fn reload_port(&self) -> u16 {
        self.reload_port
            .unwrap_or_else(|| self.port.wrapping_add(1))
    }
}
