//! Template rendering: mustache substitution followed by the markup pass

use anyhow::Result;
use serde_json::Value;

use super::mustache::Template;
use super::Partials;
use crate::content::MarkdownRenderer;

/// Renders template bodies against page data and partials
pub struct TemplateRenderer<'a> {
    partials: &'a Partials,
    markdown: &'a MarkdownRenderer,
}

impl<'a> TemplateRenderer<'a> {
    pub fn new(partials: &'a Partials, markdown: &'a MarkdownRenderer) -> Self {
        Self { partials, markdown }
    }

    /// Render `body` against the context frames (outermost first).
    /// Markup bodies go through markdown after substitution.
    pub fn render(&self, body: &str, frames: &[&Value], markup: bool) -> Result<String> {
        let template = Template::compile(body)?;
        let rendered = template.render_frames(frames, self.partials)?;

        if markup {
            self.markdown.render(&rendered)
        } else {
            Ok(rendered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_html_body() {
        let partials = Partials::default();
        let markdown = MarkdownRenderer::new();
        let renderer = TemplateRenderer::new(&partials, &markdown);

        let out = renderer
            .render("<h1>{{title}}</h1>", &[&json!({"title": "Hi *there*"})], false)
            .unwrap();
        assert_eq!(out, "<h1>Hi *there*</h1>");
    }

    #[test]
    fn test_render_markup_after_substitution() {
        let partials = Partials::default().with("note", || Ok("+---note\n{{who}} was here\n+---".to_string()));
        let markdown = MarkdownRenderer::new();
        let renderer = TemplateRenderer::new(&partials, &markdown);

        let out = renderer
            .render("# {{title}}\n\n{{> note}}\n", &[&json!({"title": "Log", "who": "Ada"})], true)
            .unwrap();
        assert!(out.contains("<h1>Log</h1>"));
        assert_eq!(
            out.replace('\n', "").split("</h1>").nth(1).unwrap(),
            "<div class='note'><p>Ada was here</p></div>"
        );
    }
}
