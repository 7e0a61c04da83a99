//! Generator module - layout composition and static site generation

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::content::loader::{walk_tree, ContentLoader};
use crate::content::{is_markup_extension, FrontMatter, Page, Site};
use crate::theme::{find_file, find_layout, Partials, TemplateRenderer};
use crate::Sitewright;

/// Longest layout chain a page may go through
pub const MAX_LAYOUT_DEPTH: usize = 32;

/// Layout chain failures
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Layout '{layout}' not found in {dir:?}")]
    LayoutNotFound { layout: String, dir: PathBuf },

    #[error("Layout chain deeper than {limit} levels (last requested '{layout}')")]
    ChainTooDeep { layout: String, limit: usize },
}

/// Applies a page's layout chain.
///
/// Every file in the chain contributes its front-matter as a layer over the
/// page, is rendered with the page as context, and its output becomes
/// `content` for the next layout.
pub struct LayoutComposer<'a> {
    layouts_dir: &'a Path,
    renderer: TemplateRenderer<'a>,
    site_frame: Value,
}

impl<'a> LayoutComposer<'a> {
    pub fn new(layouts_dir: &'a Path, renderer: TemplateRenderer<'a>, site: &Site) -> Self {
        Self {
            layouts_dir,
            renderer,
            site_frame: json!({ "site": site.to_value() }),
        }
    }

    /// Render the file at `start` for `page`, then every layout it leads to
    pub fn compose(&self, start: &Path, mut page: Page) -> Result<String> {
        let mut file = start.to_path_buf();
        let mut depth = 0;

        loop {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let (fm, body) =
                FrontMatter::parse(&raw).with_context(|| format!("Invalid front-matter in {:?}", file))?;

            // A layer without `layout` ends the chain
            page.layout = None;
            page.apply(fm.into_map());

            let markup = if depth == 0 {
                page.is_markup
            } else {
                is_markup_path(&file)
            };

            let page_value = page.to_value();
            let rendered = self
                .renderer
                .render(body, &[&self.site_frame, &page_value], markup)
                .with_context(|| format!("Failed to render {:?}", file))?;
            page.content = rendered;

            let Some(layout) = page.layout.take() else {
                return Ok(page.content);
            };

            depth += 1;
            if depth > MAX_LAYOUT_DEPTH {
                return Err(ComposeError::ChainTooDeep {
                    layout,
                    limit: MAX_LAYOUT_DEPTH,
                }
                .into());
            }

            file = find_layout(self.layouts_dir, &layout).ok_or_else(|| {
                ComposeError::LayoutNotFound {
                    layout: layout.clone(),
                    dir: self.layouts_dir.to_path_buf(),
                }
            })?;
            tracing::debug!("Applying layout '{}' from {:?}", layout, file);
        }
    }
}

fn is_markup_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(is_markup_extension)
        .unwrap_or(false)
}

/// Summary of a build pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub pages: usize,
    pub static_files: usize,
}

/// Static site generator
pub struct Generator {
    app: Sitewright,
}

impl Generator {
    /// Create a new generator
    pub fn new(app: &Sitewright) -> Self {
        Self { app: app.clone() }
    }

    /// Render the page served at `request_path`.
    ///
    /// Site data and partials are loaded fresh. Returns `None` when no page
    /// file matches the path.
    pub fn render_path(&self, request_path: &str) -> Result<Option<String>> {
        let Some(file) = find_file(&self.app.pages_dir, request_path) else {
            return Ok(None);
        };

        let loader = ContentLoader::new(&self.app);
        let site = loader.load_site()?;
        let relative = file.strip_prefix(&self.app.pages_dir)?;
        let page = loader.load_page(relative)?;

        self.render_page(&site, &page).map(Some)
    }

    /// Render one page of `site` through its layout chain
    pub fn render_page(&self, site: &Site, page: &Page) -> Result<String> {
        let partials = Partials::scan(&self.app.layouts_dir)?;
        let renderer = TemplateRenderer::new(&partials, &self.app.markdown);
        let composer = LayoutComposer::new(&self.app.layouts_dir, renderer, site);

        composer
            .compose(&page.source, page.clone())
            .with_context(|| format!("Failed to render page {}", page.path))
    }

    /// Generate the entire site into `output`
    pub fn generate(&self, output: &Path) -> Result<BuildReport> {
        fs::create_dir_all(output)
            .with_context(|| format!("Failed to create output directory {:?}", output))?;

        let static_files = self.copy_static(output)?;

        let site = ContentLoader::new(&self.app).load_site()?;

        // Mirror the page tree so empty directories exist too
        if self.app.pages_dir.is_dir() {
            walk_tree(
                &self.app.pages_dir,
                |dir| {
                    fs::create_dir_all(output.join(dir))?;
                    Ok(())
                },
                |_| Ok(()),
            )?;
        }

        for page in &site.pages {
            let html = self.render_page(&site, page)?;
            let output_path = output.join(page.path.trim_start_matches('/'));

            if let Some(parent) = output_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&output_path, html)
                .with_context(|| format!("Failed to write {:?}", output_path))?;
            tracing::debug!("Generated: {:?}", output_path);
        }

        Ok(BuildReport {
            pages: site.pages.len(),
            static_files,
        })
    }

    /// Copy the static directory verbatim
    fn copy_static(&self, output: &Path) -> Result<usize> {
        let static_dir = &self.app.static_dir;
        if !static_dir.is_dir() {
            return Ok(0);
        }

        let mut copied = 0;
        walk_tree(
            static_dir,
            |dir| {
                fs::create_dir_all(output.join(dir))?;
                Ok(())
            },
            |file| {
                let dest = output.join(file);
                fs::copy(static_dir.join(file), &dest)
                    .with_context(|| format!("Failed to copy {:?}", file))?;
                tracing::debug!("Copied: {:?} -> {:?}", file, dest);
                copied += 1;
                Ok(())
            },
        )?;

        Ok(copied)
    }
}
