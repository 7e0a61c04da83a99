//! Content loader - walks the site tree, loads properties and pages

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use super::{is_markup_extension, MarkdownRenderer, Page, Site};
use crate::Sitewright;

/// Recursively visit everything below `root`.
///
/// `on_dir` and `on_file` receive paths relative to `root`. Entries are
/// visited parent-first and sorted by file name within a directory; callers
/// should not rely on any particular order beyond that.
pub fn walk_tree<D, F>(root: &Path, mut on_dir: D, mut on_file: F) -> Result<()>
where
    D: FnMut(&Path) -> Result<()>,
    F: FnMut(&Path) -> Result<()>,
{
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Failed to walk {:?}", root))?;
        let relative = entry.path().strip_prefix(root)?;

        if entry.file_type().is_dir() {
            on_dir(relative)?;
        } else if entry.file_type().is_file() {
            on_file(relative)?;
        }
    }

    Ok(())
}

/// Load every file directly inside `dir` into one mapping keyed by file stem.
///
/// JSON and YAML files are parsed, markdown is rendered to HTML and anything
/// else is kept as text. A file that fails to load is logged and left out.
/// A missing directory yields an empty mapping.
pub fn load_properties(dir: &Path, renderer: &MarkdownRenderer) -> Result<Map<String, Value>> {
    let mut properties = Map::new();

    if !dir.is_dir() {
        tracing::debug!("No properties directory at {:?}", dir);
        return Ok(properties);
    }

    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read properties directory {:?}", dir))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    for path in entries {
        let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        match load_property(&path, renderer) {
            Ok(value) => {
                properties.insert(key.to_string(), value);
            }
            Err(e) => {
                tracing::warn!("Skipping property file {:?}: {:#}", path, e);
            }
        }
    }

    Ok(properties)
}

fn load_property(path: &Path, renderer: &MarkdownRenderer) -> Result<Value> {
    let content = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let value = match ext.as_str() {
        "json" => serde_json::from_str(&content)?,
        "yml" | "yaml" => serde_yaml::from_str(&content)?,
        ext if is_markup_extension(ext) => Value::String(renderer.render(&content)?),
        _ => Value::String(content),
    };

    Ok(value)
}

/// Loads pages and site data from the site directories
pub struct ContentLoader<'a> {
    app: &'a Sitewright,
}

impl<'a> ContentLoader<'a> {
    /// Create a new content loader
    pub fn new(app: &'a Sitewright) -> Self {
        Self { app }
    }

    /// Load all pages below the pages directory, in walk order
    pub fn load_pages(&self) -> Result<Vec<Page>> {
        let pages_dir = &self.app.pages_dir;
        let mut pages = Vec::new();

        if !pages_dir.is_dir() {
            tracing::warn!("Pages directory not found: {:?}", pages_dir);
            return Ok(pages);
        }

        walk_tree(
            pages_dir,
            |_| Ok(()),
            |relative| {
                pages.push(self.load_page(relative)?);
                Ok(())
            },
        )?;

        tracing::debug!("Loaded {} pages from {:?}", pages.len(), pages_dir);
        Ok(pages)
    }

    /// Load a single page given its path below the pages directory
    pub fn load_page(&self, relative: &Path) -> Result<Page> {
        let source = self.app.pages_dir.join(relative);
        let bytes = fs::read(&source).with_context(|| format!("Failed to read page {:?}", source))?;
        let raw = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Page {:?} is not valid UTF-8, decoding lossily", source);
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        Page::from_source(relative, &raw, source.clone())
            .with_context(|| format!("Failed to load page {:?}", source))
    }

    /// Load the whole site: properties, pages and navigation
    pub fn load_site(&self) -> Result<Site> {
        let properties = load_properties(&self.app.properties_dir, &self.app.markdown)?;
        let pages = self.load_pages()?;
        Ok(Site::new(properties, pages))
    }
}
