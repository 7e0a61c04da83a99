//! Markdown rendering with syntax highlighting and admonition fences

use anyhow::Result;
use lazy_static::lazy_static;
use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};
use regex::{Captures, Regex};
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

use crate::config::HighlightConfig;

lazy_static! {
    /// `+---label` at the start of a paragraph, optionally a paragraph of its own.
    /// The label runs to the end of the line, minus trailing dashes.
    static ref FENCE_OPEN_RE: Regex =
        Regex::new(r"(?m)^<p>\+-{3,}[ \t]*([^-<\s][^<\n]*?)-*[ \t]*(</p>)?$").unwrap();
    /// `+---` closing a paragraph, optionally a paragraph of its own
    static ref FENCE_CLOSE_RE: Regex = Regex::new(r"(?m)^(<p>)?\+-{3,}</p>$").unwrap();
}

/// Extensions treated as markup (rendered through markdown)
pub const MARKUP_EXTENSIONS: [&str; 3] = ["md", "mdown", "markdown"];

/// Check if a file extension belongs to the markup family
pub fn is_markup_extension(ext: &str) -> bool {
    MARKUP_EXTENSIONS
        .iter()
        .any(|candidate| ext.eq_ignore_ascii_case(candidate))
}

/// Markdown renderer with syntax highlighting
pub struct MarkdownRenderer {
    highlighter: Option<Highlighter>,
}

struct Highlighter {
    syntax_set: SyntaxSet,
    theme_set: ThemeSet,
    theme_name: String,
}

impl MarkdownRenderer {
    /// Create a renderer without code highlighting
    pub fn new() -> Self {
        Self { highlighter: None }
    }

    /// Create with custom settings
    pub fn with_options(config: &HighlightConfig) -> Self {
        let highlighter = config.enable.then(|| Highlighter {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            theme_set: ThemeSet::load_defaults(),
            theme_name: config.theme.clone(),
        });
        Self { highlighter }
    }

    /// Render markdown to HTML, then expand admonition fences
    pub fn render(&self, markdown: &str) -> Result<String> {
        // No smart punctuation: it would turn fence dashes into em-dashes
        let options = Options::ENABLE_TABLES
            | Options::ENABLE_FOOTNOTES
            | Options::ENABLE_STRIKETHROUGH
            | Options::ENABLE_TASKLISTS;
        let parser = Parser::new_ext(markdown, options);

        let mut events: Vec<Event> = Vec::new();
        let mut code_block: Option<Option<String>> = None;
        let mut code_block_content = String::new();

        for event in parser {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(lang) => {
                            let lang = lang.split_whitespace().next().unwrap_or("").to_string();
                            (!lang.is_empty()).then_some(lang)
                        }
                        CodeBlockKind::Indented => None,
                    };
                    code_block = Some(lang);
                    code_block_content.clear();
                }
                Event::End(TagEnd::CodeBlock) => {
                    let lang = code_block.take().flatten();
                    let html = self.highlight_code(&code_block_content, lang.as_deref());
                    events.push(Event::Html(CowStr::from(html)));
                }
                Event::Text(text) if code_block.is_some() => {
                    code_block_content.push_str(&text);
                }
                _ => events.push(event),
            }
        }

        let mut html_output = String::new();
        html::push_html(&mut html_output, events.into_iter());

        Ok(expand_fences(&html_output))
    }

    /// Highlight a code block
    fn highlight_code(&self, code: &str, lang: Option<&str>) -> String {
        let plain = || {
            format!(
                r#"<pre><code class="language-{}">{}</code></pre>"#,
                html_escape(lang.unwrap_or("text")),
                html_escape(code)
            )
        };

        let Some(highlighter) = &self.highlighter else {
            return plain();
        };

        let token = lang.unwrap_or("text");
        let syntax = highlighter
            .syntax_set
            .find_syntax_by_token(token)
            .or_else(|| highlighter.syntax_set.find_syntax_by_extension(token))
            .unwrap_or_else(|| highlighter.syntax_set.find_syntax_plain_text());

        let theme = highlighter
            .theme_set
            .themes
            .get(&highlighter.theme_name)
            .or_else(|| highlighter.theme_set.themes.values().next());

        let Some(theme) = theme else {
            return plain();
        };

        match highlighted_html_for_string(code, &highlighter.syntax_set, syntax, theme) {
            Ok(highlighted) => format!(
                r#"<figure class="highlight {}">{}</figure>"#,
                html_escape(token),
                highlighted
            ),
            Err(e) => {
                tracing::debug!("Highlighting failed for {}: {}", token, e);
                plain()
            }
        }
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn paragraph-wrapped `+---label` / `+---` fences into `<div class='label'>` blocks.
/// Runs line-by-line over already rendered HTML.
pub fn expand_fences(html: &str) -> String {
    let opened = FENCE_OPEN_RE.replace_all(html, |caps: &Captures| {
        if caps.get(2).is_some() {
            format!("<div class='{}'>", class_attr(&caps[1]))
        } else {
            format!("<div class='{}'><p>", class_attr(&caps[1]))
        }
    });
    FENCE_CLOSE_RE
        .replace_all(&opened, |caps: &Captures| {
            if caps.get(1).is_some() {
                "</div>".to_string()
            } else {
                "</p></div>".to_string()
            }
        })
        .into_owned()
}

/// The label is already escaped text apart from single quotes
fn class_attr(label: &str) -> String {
    label.replace('\'', "&#39;")
}

/// Simple HTML escaping
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
