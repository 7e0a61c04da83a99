//! Layout loader - partials and layout lookup in the layouts directory
//!
//! Nothing here caches file contents: partials are read again on every
//! lookup and layouts are resolved per request, so edits show up on the
//! next render without a restart.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::content::MARKUP_EXTENSIONS;

type PartialReader = Box<dyn Fn() -> io::Result<String> + Send + Sync>;

/// Named partials whose content is read on every access
#[derive(Default)]
pub struct Partials {
    readers: BTreeMap<String, PartialReader>,
}

impl Partials {
    /// Scan `layouts_dir` for `_name.ext` files.
    ///
    /// Each one is exposed as `name`; its content is read from disk when the
    /// partial is looked up, not now. A missing directory has no partials.
    pub fn scan(layouts_dir: &Path) -> Result<Self> {
        let mut partials = Partials::default();

        if !layouts_dir.is_dir() {
            return Ok(partials);
        }

        let entries = fs::read_dir(layouts_dir)
            .with_context(|| format!("Failed to read layouts directory {:?}", layouts_dir))?;

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stripped) = file_name.strip_prefix('_') else {
                continue;
            };
            if !path.is_file() {
                continue;
            }

            let name = Path::new(stripped)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(stripped)
                .to_string();

            tracing::debug!("Found partial '{}' at {:?}", name, path);
            partials.insert(name, move || fs::read_to_string(&path));
        }

        Ok(partials)
    }

    /// Register a partial reader
    pub fn insert<F>(&mut self, name: impl Into<String>, reader: F)
    where
        F: Fn() -> io::Result<String> + Send + Sync + 'static,
    {
        self.readers.insert(name.into(), Box::new(reader));
    }

    /// Builder-style [`Partials::insert`]
    pub fn with<F>(mut self, name: impl Into<String>, reader: F) -> Self
    where
        F: Fn() -> io::Result<String> + Send + Sync + 'static,
    {
        self.insert(name, reader);
        self
    }

    /// Read the current content of a partial; `None` if no such partial
    pub fn get(&self, name: &str) -> Option<io::Result<String>> {
        self.readers.get(name).map(|read| read())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.readers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.readers.keys().map(String::as_str)
    }
}

impl fmt::Debug for Partials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.readers.keys()).finish()
    }
}

/// Find a page or layout file for `name` inside `dir`.
///
/// Tries `dir/name` as given, then the same path with each markup extension
/// (`.md`, `.mdown`, `.markdown`) in place of its own.
pub fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    let name = name.trim_start_matches('/');
    if name.is_empty() {
        return None;
    }

    let literal = dir.join(name);
    if literal.is_file() {
        return Some(literal);
    }

    MARKUP_EXTENSIONS
        .iter()
        .map(|ext| literal.with_extension(ext))
        .find(|candidate| candidate.is_file())
}

/// Find the file of a layout referenced by name from front-matter
pub fn find_layout(layouts_dir: &Path, layout: &str) -> Option<PathBuf> {
    find_file(layouts_dir, &format!("{}.html", layout))
}
