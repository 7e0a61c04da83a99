//! Page and Site models

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use super::value::{is_truthy, to_output_string};
use super::{is_markup_extension, FrontMatter};

/// One content unit: a file under the pages directory, or the page being
/// composed through its layout chain
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Page {
    /// Output URL path, e.g. `/docs/intro.html`
    pub path: String,

    /// Human readable name derived from the file stem
    pub name: String,

    /// Whether the source body is markdown
    #[serde(rename = "isMarkup")]
    pub is_markup: bool,

    /// Body text, replaced by rendered output while layouts are applied
    pub content: String,

    /// Next layout to apply
    pub layout: Option<String>,

    /// Raw navigation request from front-matter, normalized to
    /// `{name, weight}` once the page is part of a `Site` and listed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigation: Option<Value>,

    /// Any other front-matter fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,

    /// Source file the page was read from
    #[serde(skip)]
    pub source: PathBuf,
}

impl Page {
    /// Build a page from a file found under the pages directory.
    ///
    /// `relative` is the path below the pages directory; front-matter keys
    /// override the derived fields and the body becomes `content`.
    pub fn from_source(relative: &Path, raw: &str, source: PathBuf) -> Result<Self> {
        let ext = relative.extension().and_then(|e| e.to_str()).unwrap_or("");
        let stem = relative
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");

        let mut page = Page {
            path: output_path(relative),
            name: display_name(stem),
            is_markup: is_markup_extension(ext),
            content: raw.to_string(),
            layout: None,
            navigation: None,
            extra: Map::new(),
            source,
        };

        let (fm, body) = FrontMatter::parse(raw)?;
        page.apply(fm.into_map());
        page.content = body.to_string();

        Ok(page)
    }

    /// Merge a front-matter layer over this page. Later layers win.
    pub fn apply(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            match key.as_str() {
                "path" => self.path = to_output_string(&value),
                "name" => self.name = to_output_string(&value),
                "content" => self.content = to_output_string(&value),
                "isMarkup" => self.is_markup = value.as_bool().unwrap_or(self.is_markup),
                "layout" => {
                    self.layout = if is_truthy(&value) {
                        Some(to_output_string(&value))
                    } else {
                        None
                    }
                }
                "navigation" => {
                    self.navigation = match value {
                        Value::Null => None,
                        other => Some(other),
                    }
                }
                _ => {
                    self.extra.insert(key, value);
                }
            }
        }
    }

    /// Template data for this page
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// Site-wide data for one render or build pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct Site {
    /// Data loaded from the properties directory
    #[serde(flatten)]
    pub properties: Map<String, Value>,

    /// Every page in discovery order
    pub pages: Vec<Page>,

    /// Pages that asked to be listed, ordered by weight then name
    pub navigation: Vec<Page>,
}

impl Site {
    /// Assemble a site, deriving navigation from the pages
    pub fn new(properties: Map<String, Value>, mut pages: Vec<Page>) -> Self {
        let navigation = super::navigation::build_navigation(&mut pages);
        Self {
            properties,
            pages,
            navigation,
        }
    }

    /// Template data for the site
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

/// `dir/file.md` -> `/dir/file.html`
fn output_path(relative: &Path) -> String {
    let with_ext = relative.with_extension("html");
    let segments: Vec<String> = with_ext
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    format!("/{}", segments.join("/"))
}

/// `getting_started-guide` -> `getting started guide`
fn display_name(stem: &str) -> String {
    stem.replace(['-', '_'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_from_markdown_source() {
        let raw = "---\ntitle: Intro\n---\n# Hello\n";
        let page = Page::from_source(
            Path::new("docs/getting-started_now.md"),
            raw,
            PathBuf::from("pages/docs/getting-started_now.md"),
        )
        .unwrap();

        assert_eq!(page.path, "/docs/getting-started_now.html");
        assert_eq!(page.name, "getting started now");
        assert!(page.is_markup);
        assert_eq!(page.content, "# Hello\n");
        assert_eq!(page.extra.get("title"), Some(&json!("Intro")));
        assert_eq!(page.layout, None);
    }

    #[test]
    fn test_page_without_frontmatter() {
        let raw = "<h1>Plain</h1>\n";
        let page = Page::from_source(Path::new("index.html"), raw, PathBuf::new()).unwrap();
        assert_eq!(page.path, "/index.html");
        assert_eq!(page.name, "index");
        assert!(!page.is_markup);
        assert_eq!(page.content, raw);
        assert!(page.extra.is_empty());
    }

    #[test]
    fn test_frontmatter_wins_on_collision() {
        let raw = "---\nname: Home Page\npath: /home.html\nlayout: base\nnavigation: 2\n---\nbody";
        let page = Page::from_source(Path::new("index.md"), raw, PathBuf::new()).unwrap();
        assert_eq!(page.name, "Home Page");
        assert_eq!(page.path, "/home.html");
        assert_eq!(page.layout.as_deref(), Some("base"));
        assert_eq!(page.navigation, Some(json!(2)));
        assert_eq!(page.content, "body");
    }

    #[test]
    fn test_malformed_frontmatter_fails() {
        let raw = "---\nlayout: [base\n---\nbody";
        assert!(Page::from_source(Path::new("bad.md"), raw, PathBuf::new()).is_err());
    }

    #[test]
    fn test_apply_null_layout_clears() {
        let mut page = Page {
            layout: Some("outer".to_string()),
            ..Default::default()
        };
        let mut patch = Map::new();
        patch.insert("layout".to_string(), Value::Null);
        patch.insert("author".to_string(), json!("Ada"));
        page.apply(patch);
        assert_eq!(page.layout, None);
        assert_eq!(page.extra.get("author"), Some(&json!("Ada")));
    }

    #[test]
    fn test_apply_falsy_layout_clears() {
        for value in [json!(false), json!(0), json!("")] {
            let mut page = Page {
                layout: Some("outer".to_string()),
                ..Default::default()
            };
            let mut patch = Map::new();
            patch.insert("layout".to_string(), value.clone());
            page.apply(patch);
            assert_eq!(page.layout, None, "layout: {}", value);
        }
    }

    #[test]
    fn test_site_pages_share_normalized_navigation() {
        let listed = Page {
            name: "about".to_string(),
            navigation: Some(json!(2)),
            ..Default::default()
        };
        let hidden = Page {
            name: "draft".to_string(),
            navigation: Some(json!(false)),
            ..Default::default()
        };
        let site = Site::new(Map::new(), vec![listed, hidden]);

        let expected = Some(json!({"name": "about", "weight": 2}));
        assert_eq!(site.pages[0].navigation, expected);
        assert_eq!(site.navigation[0].navigation, expected);
        assert_eq!(site.pages[1].navigation, Some(json!(false)));
    }

    #[test]
    fn test_page_value_shape() {
        let mut page = Page {
            path: "/a.html".to_string(),
            name: "a".to_string(),
            ..Default::default()
        };
        page.extra.insert("title".to_string(), json!("A"));
        let value = page.to_value();
        assert_eq!(value["path"], json!("/a.html"));
        assert_eq!(value["isMarkup"], json!(false));
        assert_eq!(value["layout"], Value::Null);
        assert_eq!(value["title"], json!("A"));
        assert!(value.get("navigation").is_none());
        assert!(value.get("source").is_none());
    }

    #[test]
    fn test_site_value_flattens_properties() {
        let mut properties = Map::new();
        properties.insert("config".to_string(), json!({"title": "My Site"}));
        let site = Site::new(properties, Vec::new());
        let value = site.to_value();
        assert_eq!(value["config"]["title"], json!("My Site"));
        assert_eq!(value["pages"], json!([]));
        assert_eq!(value["navigation"], json!([]));
    }
}
