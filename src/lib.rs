//! sitewright: a small static site generator
//!
//! Pages carry YAML front-matter, are rendered as mustache templates
//! (markdown pages additionally through a markdown pass) and wrapped in a
//! chain of layouts. Sites are either served live with browser reload or
//! built into a directory of static files.

pub mod commands;
pub mod config;
pub mod content;
pub mod generator;
pub mod server;
pub mod theme;

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use content::MarkdownRenderer;

/// A site rooted at a directory
#[derive(Clone)]
pub struct Sitewright {
    /// Site configuration
    pub config: config::SiteConfig,
    /// Base directory
    pub base_dir: PathBuf,
    /// Content pages
    pub pages_dir: PathBuf,
    /// Layouts and `_` partials
    pub layouts_dir: PathBuf,
    /// Site-wide properties
    pub properties_dir: PathBuf,
    /// Files copied verbatim
    pub static_dir: PathBuf,
    /// Default build output
    pub public_dir: PathBuf,
    /// Shared markdown renderer
    pub markdown: Arc<MarkdownRenderer>,
}

impl Sitewright {
    /// Create a new instance from a directory, reading `_config.yml` if present
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        let config_path = base_dir.join("_config.yml");

        let config = if config_path.exists() {
            config::SiteConfig::load(&config_path)?
        } else {
            config::SiteConfig::default()
        };

        Ok(Self::with_config(base_dir, config))
    }

    /// Create an instance with an explicit configuration
    pub fn with_config<P: AsRef<Path>>(base_dir: P, config: config::SiteConfig) -> Self {
        let base_dir = base_dir.as_ref().to_path_buf();
        let markdown = Arc::new(MarkdownRenderer::with_options(&config.highlight));

        Self {
            pages_dir: base_dir.join(&config.pages_dir),
            layouts_dir: base_dir.join(&config.layouts_dir),
            properties_dir: base_dir.join(&config.properties_dir),
            static_dir: base_dir.join(&config.static_dir),
            public_dir: base_dir.join(&config.public_dir),
            base_dir,
            config,
            markdown,
        }
    }

    /// Build the static site into `output` (the public directory by default)
    pub fn build(&self, output: Option<&Path>) -> Result<generator::BuildReport> {
        commands::build::run(self, output)
    }

    /// Remove the public directory
    pub fn clean(&self) -> Result<()> {
        commands::clean::run(self)
    }
}
