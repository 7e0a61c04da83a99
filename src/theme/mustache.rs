//! Mustache Template Engine Implementation
//!
//! Logic-less templates: variables, sections, inverted sections, comments
//! and partials, built as Lexer + Parser + Evaluator like a tiny compiler.
//! Partials are looked up through [`Partials`] on every inclusion, so an
//! edited partial is picked up by the next render.

use serde_json::Value;
use thiserror::Error;

use super::Partials;
use crate::content::html_escape;
use crate::content::value::{is_truthy, to_output_string};

/// Maximum nesting of partial inclusions before rendering gives up
const MAX_PARTIAL_DEPTH: usize = 64;

// ============================================================================
// Error Types
// ============================================================================

/// Mustache template parsing and rendering errors
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Unbalanced section: {0}")]
    UnbalancedSection(String),

    #[error("Failed to read partial '{name}': {source}")]
    PartialRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Partial '{0}' nested too deeply")]
    PartialTooDeep(String),
}

// ============================================================================
// Lexer - Token Types
// ============================================================================

/// Token types produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Raw text content
    Text(String),
    /// Escaped output: {{name}}
    Variable(String),
    /// Unescaped output: {{{name}}} or {{& name}}
    RawVariable(String),
    /// Section start: {{#name}}
    SectionOpen(String),
    /// Inverted section start: {{^name}}
    InvertedOpen(String),
    /// Section end: {{/name}}
    SectionClose(String),
    /// Partial inclusion: {{> name}}
    Partial(String),
    /// Comment: {{! ... }}
    Comment,
}

impl Token {
    /// Tags that vanish from the output together with their line when
    /// they stand alone on it
    fn can_stand_alone(&self) -> bool {
        matches!(
            self,
            Token::SectionOpen(_)
                | Token::InvertedOpen(_)
                | Token::SectionClose(_)
                | Token::Partial(_)
                | Token::Comment
        )
    }
}

/// Lexer for mustache templates
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> Result<Vec<Token>, TemplateError> {
        let mut tokens = Vec::new();

        while self.pos < self.input.len() {
            let rest = &self.input[self.pos..];
            match rest.find("{{") {
                Some(0) => tokens.push(self.read_tag()?),
                Some(offset) => {
                    tokens.push(Token::Text(self.advance(offset).to_string()));
                }
                None => {
                    let len = rest.len();
                    tokens.push(Token::Text(self.advance(len).to_string()));
                }
            }
        }

        trim_standalone(&mut tokens);
        Ok(tokens)
    }

    fn advance(&mut self, len: usize) -> &'a str {
        let consumed = &self.input[self.pos..self.pos + len];
        self.line += consumed.matches('\n').count();
        self.pos += len;
        consumed
    }

    fn read_tag(&mut self) -> Result<Token, TemplateError> {
        let start_line = self.line;
        let triple = self.input[self.pos..].starts_with("{{{");
        let (open_len, close) = if triple { (3, "}}}") } else { (2, "}}") };

        let inner_start = self.pos + open_len;
        let Some(inner_len) = self.input[inner_start..].find(close) else {
            return Err(TemplateError::ParseError {
                line: start_line,
                message: "Unclosed tag".to_string(),
            });
        };

        let inner = &self.input[inner_start..inner_start + inner_len];
        self.advance(open_len + inner_len + close.len());

        if triple {
            return Ok(Token::RawVariable(self.tag_name(inner.trim(), start_line)?));
        }

        let inner = inner.trim();
        let (sigil, name) = match inner.chars().next() {
            Some(c @ ('#' | '^' | '/' | '>' | '&' | '!' | '=' | '{')) => (Some(c), inner[1..].trim()),
            _ => (None, inner),
        };

        let token = match sigil {
            Some('!') => Token::Comment,
            Some('=') => {
                return Err(TemplateError::ParseError {
                    line: start_line,
                    message: "Set delimiter tags are not supported".to_string(),
                })
            }
            Some('#') => Token::SectionOpen(self.tag_name(name, start_line)?),
            Some('^') => Token::InvertedOpen(self.tag_name(name, start_line)?),
            Some('/') => Token::SectionClose(self.tag_name(name, start_line)?),
            Some('>') => Token::Partial(self.tag_name(name, start_line)?),
            Some('&') => Token::RawVariable(self.tag_name(name, start_line)?),
            // `{{{name}` closed by two braces only
            Some('{') => Token::RawVariable(self.tag_name(name.trim_end_matches('}'), start_line)?),
            _ => Token::Variable(self.tag_name(name, start_line)?),
        };

        Ok(token)
    }

    fn tag_name(&self, name: &str, line: usize) -> Result<String, TemplateError> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(TemplateError::ParseError {
                line,
                message: format!("Invalid tag name '{}'", name),
            });
        }
        Ok(name.to_string())
    }
}

/// Remove the surrounding whitespace and line break of tags that are the
/// only thing on their line.
fn trim_standalone(tokens: &mut [Token]) {
    let count = tokens.len();
    let mut standalone = vec![false; count];

    for i in 0..count {
        if !tokens[i].can_stand_alone() {
            continue;
        }

        let starts_line = match i.checked_sub(1).map(|p| &tokens[p]) {
            None => true,
            Some(Token::Text(text)) => match text.rfind('\n') {
                Some(nl) => is_blank(&text[nl + 1..]),
                None => i == 1 && is_blank(text),
            },
            Some(_) => false,
        };

        let ends_line = match tokens.get(i + 1) {
            None => true,
            Some(Token::Text(text)) => match text.find('\n') {
                Some(nl) => is_blank(&text[..nl]),
                None => i + 2 == count && is_blank(text),
            },
            Some(_) => false,
        };

        standalone[i] = starts_line && ends_line;
    }

    for i in 0..count {
        let Token::Text(text) = &tokens[i] else {
            continue;
        };

        let after_tag = i > 0 && standalone[i - 1];
        let before_tag = i + 1 < count && standalone[i + 1];
        if !after_tag && !before_tag {
            continue;
        }

        let start = if after_tag {
            text.find('\n').map(|nl| nl + 1).unwrap_or(text.len())
        } else {
            0
        };
        let end = if before_tag {
            text.rfind('\n').map(|nl| nl + 1).unwrap_or(0)
        } else {
            text.len()
        };

        let trimmed = if start < end { text[start..end].to_string() } else { String::new() };
        tokens[i] = Token::Text(trimmed);
    }
}

fn is_blank(s: &str) -> bool {
    s.chars().all(|c| c == ' ' || c == '\t' || c == '\r')
}

// ============================================================================
// AST - Abstract Syntax Tree
// ============================================================================

/// AST node types
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Raw text to output
    Text(String),
    /// Variable lookup, HTML-escaped unless `escape` is false
    Variable { name: String, escape: bool },
    /// Section rendered for truthy values (or falsy ones when inverted)
    Section {
        name: String,
        inverted: bool,
        children: Vec<Node>,
    },
    /// Partial rendered against the current context
    Partial(String),
}

/// Parser that converts tokens to AST
pub struct Parser {
    tokens: std::vec::IntoIter<Token>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into_iter(),
        }
    }

    /// Parse tokens into AST nodes
    pub fn parse(&mut self) -> Result<Vec<Node>, TemplateError> {
        let nodes = self.parse_until(None)?;
        Ok(nodes)
    }

    fn parse_until(&mut self, section: Option<&str>) -> Result<Vec<Node>, TemplateError> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.next() {
            match token {
                Token::Text(text) => {
                    if !text.is_empty() {
                        nodes.push(Node::Text(text));
                    }
                }
                Token::Variable(name) => nodes.push(Node::Variable { name, escape: true }),
                Token::RawVariable(name) => nodes.push(Node::Variable {
                    name,
                    escape: false,
                }),
                Token::SectionOpen(name) => {
                    let children = self.parse_until(Some(&name))?;
                    nodes.push(Node::Section {
                        name,
                        inverted: false,
                        children,
                    });
                }
                Token::InvertedOpen(name) => {
                    let children = self.parse_until(Some(&name))?;
                    nodes.push(Node::Section {
                        name,
                        inverted: true,
                        children,
                    });
                }
                Token::SectionClose(name) => {
                    return match section {
                        Some(open) if open == name => Ok(nodes),
                        Some(open) => Err(TemplateError::UnbalancedSection(format!(
                            "'{}' closed by '{}'",
                            open, name
                        ))),
                        None => Err(TemplateError::UnbalancedSection(format!(
                            "'{}' closed but never opened",
                            name
                        ))),
                    };
                }
                Token::Partial(name) => nodes.push(Node::Partial(name)),
                Token::Comment => {}
            }
        }

        match section {
            Some(open) => Err(TemplateError::UnbalancedSection(format!(
                "'{}' never closed",
                open
            ))),
            None => Ok(nodes),
        }
    }
}

// ============================================================================
// Evaluator - AST to output
// ============================================================================

/// Evaluator that renders AST nodes against a context stack
pub struct Evaluator<'p> {
    partials: &'p Partials,
    depth: usize,
}

impl<'p> Evaluator<'p> {
    pub fn new(partials: &'p Partials) -> Self {
        Self { partials, depth: 0 }
    }

    /// Render nodes; the last frame of `stack` is the innermost context
    pub fn render<'v>(
        &mut self,
        nodes: &[Node],
        stack: &mut Vec<&'v Value>,
        output: &mut String,
    ) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => output.push_str(text),
                Node::Variable { name, escape } => {
                    if let Some(value) = lookup(stack, name) {
                        let text = to_output_string(value);
                        if *escape {
                            output.push_str(&html_escape(&text));
                        } else {
                            output.push_str(&text);
                        }
                    }
                }
                Node::Section {
                    name,
                    inverted,
                    children,
                } => {
                    let value = lookup(stack, name).filter(|v| is_truthy(v));
                    match (value, *inverted) {
                        (None, true) => self.render(children, stack, output)?,
                        (None, false) | (Some(_), true) => {}
                        (Some(Value::Array(items)), false) => {
                            for item in items {
                                stack.push(item);
                                let result = self.render(children, stack, output);
                                stack.pop();
                                result?;
                            }
                        }
                        (Some(value), false) => {
                            stack.push(value);
                            let result = self.render(children, stack, output);
                            stack.pop();
                            result?;
                        }
                    }
                }
                Node::Partial(name) => self.render_partial(name, stack, output)?,
            }
        }
        Ok(())
    }

    fn render_partial<'v>(
        &mut self,
        name: &str,
        stack: &mut Vec<&'v Value>,
        output: &mut String,
    ) -> Result<(), TemplateError> {
        let source = match self.partials.get(name) {
            None => {
                tracing::debug!("Partial '{}' not found, rendering nothing", name);
                return Ok(());
            }
            Some(Err(source)) => {
                return Err(TemplateError::PartialRead {
                    name: name.to_string(),
                    source,
                })
            }
            Some(Ok(source)) => source,
        };

        if self.depth >= MAX_PARTIAL_DEPTH {
            return Err(TemplateError::PartialTooDeep(name.to_string()));
        }

        let template = Template::compile(&source)?;
        self.depth += 1;
        let result = self.render(&template.nodes, stack, output);
        self.depth -= 1;
        result
    }
}

/// Resolve a (possibly dotted) name against the context stack.
///
/// The first segment is searched from the innermost frame outwards; the
/// remaining segments descend into whatever it resolved to.
fn lookup<'v>(stack: &[&'v Value], name: &str) -> Option<&'v Value> {
    if name == "." {
        return stack.last().copied();
    }

    let mut segments = name.split('.');
    let first = segments.next()?;

    let mut current = stack
        .iter()
        .rev()
        .copied()
        .find_map(|frame: &'v Value| frame.as_object().and_then(|obj| obj.get(first)))?;

    for segment in segments {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

// ============================================================================
// Template - compiled template
// ============================================================================

/// A compiled mustache template
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Compile template source
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let tokens = Lexer::new(source).tokenize()?;
        let nodes = Parser::new(tokens).parse()?;
        Ok(Self { nodes })
    }

    /// Parsed nodes
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Render against a single context value
    pub fn render(&self, context: &Value, partials: &Partials) -> Result<String, TemplateError> {
        self.render_frames(&[context], partials)
    }

    /// Render against several context frames, outermost first
    pub fn render_frames(
        &self,
        frames: &[&Value],
        partials: &Partials,
    ) -> Result<String, TemplateError> {
        let mut stack: Vec<&Value> = frames.to_vec();
        let mut output = String::new();
        Evaluator::new(partials).render(&self.nodes, &mut stack, &mut output)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(source: &str, context: Value) -> String {
        Template::compile(source)
            .unwrap()
            .render(&context, &Partials::default())
            .unwrap()
    }

    #[test]
    fn test_lexer_simple() {
        let tokens = Lexer::new("Hello {{name}}!").tokenize().unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Text("Hello ".to_string()),
                Token::Variable("name".to_string()),
                Token::Text("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_lexer_tag_kinds() {
        let tokens = Lexer::new("{{{a}}}{{& b}}{{#c}}{{^d}}{{/d}}{{/c}}{{> e}}{{! note }}")
            .tokenize()
            .unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::RawVariable("a".to_string()),
                Token::RawVariable("b".to_string()),
                Token::SectionOpen("c".to_string()),
                Token::InvertedOpen("d".to_string()),
                Token::SectionClose("d".to_string()),
                Token::SectionClose("c".to_string()),
                Token::Partial("e".to_string()),
                Token::Comment,
            ]
        );
    }

    #[test]
    fn test_render_variables() {
        let context = json!({"name": "World", "html": "<b>&</b>", "n": 3});
        assert_eq!(render("Hello {{name}}!", context.clone()), "Hello World!");
        assert_eq!(render("{{html}}", context.clone()), "&lt;b&gt;&amp;&lt;/b&gt;");
        assert_eq!(render("{{{html}}}", context.clone()), "<b>&</b>");
        assert_eq!(render("{{& html}}", context.clone()), "<b>&</b>");
        assert_eq!(render("{{n}}", context.clone()), "3");
        assert_eq!(render("[{{missing}}]", context), "[]");
    }

    #[test]
    fn test_dotted_names() {
        let context = json!({"site": {"config": {"title": "Demo"}}, "list": ["a", "b"]});
        assert_eq!(render("{{site.config.title}}", context.clone()), "Demo");
        assert_eq!(render("{{list.1}}", context.clone()), "b");
        assert_eq!(render("[{{site.nope.title}}]", context), "[]");
    }

    #[test]
    fn test_sections() {
        let context = json!({
            "yes": true,
            "no": false,
            "zero": 0,
            "empty": [],
            "items": [{"name": "a"}, {"name": "b"}],
            "person": {"name": "Ada"},
        });
        assert_eq!(render("{{#yes}}shown{{/yes}}", context.clone()), "shown");
        assert_eq!(render("{{#no}}hidden{{/no}}", context.clone()), "");
        assert_eq!(render("{{#zero}}hidden{{/zero}}", context.clone()), "");
        assert_eq!(render("{{#empty}}hidden{{/empty}}", context.clone()), "");
        assert_eq!(render("{{#missing}}hidden{{/missing}}", context.clone()), "");
        assert_eq!(
            render("{{#items}}<{{name}}>{{/items}}", context.clone()),
            "<a><b>"
        );
        assert_eq!(render("{{#person}}{{name}}{{/person}}", context.clone()), "Ada");
        assert_eq!(render("{{^empty}}none{{/empty}}", context.clone()), "none");
        assert_eq!(render("{{^yes}}none{{/yes}}", context), "");
    }

    #[test]
    fn test_section_falls_back_to_outer_frames() {
        let context = json!({"title": "Site", "items": [{"name": "a"}]});
        assert_eq!(
            render("{{#items}}{{name}}@{{title}}{{/items}}", context),
            "a@Site"
        );
    }

    #[test]
    fn test_implicit_iterator() {
        let context = json!({"tags": ["rust", "web"]});
        assert_eq!(render("{{#tags}}[{{.}}]{{/tags}}", context), "[rust][web]");
    }

    #[test]
    fn test_standalone_lines_removed() {
        let template = "<ul>\n  {{#items}}\n  <li>{{.}}</li>\n  {{/items}}\n</ul>\n";
        let context = json!({"items": ["a", "b"]});
        assert_eq!(render(template, context), "<ul>\n  <li>a</li>\n  <li>b</li>\n</ul>\n");
    }

    #[test]
    fn test_standalone_comment_removed() {
        assert_eq!(render("a\n{{! note }}\nb", json!({})), "a\nb");
        assert_eq!(render("a {{! inline }} b", json!({})), "a  b");
    }

    #[test]
    fn test_render_frames_innermost_wins() {
        let outer = json!({"title": "outer", "site": {"name": "S"}});
        let inner = json!({"title": "inner"});
        let template = Template::compile("{{title}}/{{site.name}}").unwrap();
        let out = template
            .render_frames(&[&outer, &inner], &Partials::default())
            .unwrap();
        assert_eq!(out, "inner/S");
    }

    #[test]
    fn test_partials() {
        let partials = Partials::default()
            .with("header", || Ok("<h1>{{title}}</h1>".to_string()))
            .with("broken", || {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
            });
        let context = json!({"title": "Hi"});

        let out = Template::compile("{{> header}}body{{> unknown}}")
            .unwrap()
            .render(&context, &partials)
            .unwrap();
        assert_eq!(out, "<h1>Hi</h1>body");

        let err = Template::compile("{{> broken}}")
            .unwrap()
            .render(&context, &partials)
            .unwrap_err();
        assert!(matches!(err, TemplateError::PartialRead { ref name, .. } if name == "broken"));
    }

    #[test]
    fn test_recursive_partial_is_capped() {
        let partials = Partials::default().with("loop", || Ok("x{{> loop}}".to_string()));
        let err = Template::compile("{{> loop}}")
            .unwrap()
            .render(&json!({}), &partials)
            .unwrap_err();
        assert!(matches!(err, TemplateError::PartialTooDeep(_)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Template::compile("{{#a}}open"),
            Err(TemplateError::UnbalancedSection(_))
        ));
        assert!(matches!(
            Template::compile("{{#a}}{{/b}}"),
            Err(TemplateError::UnbalancedSection(_))
        ));
        assert!(matches!(
            Template::compile("line\n{{name"),
            Err(TemplateError::ParseError { line: 2, .. })
        ));
        assert!(matches!(
            Template::compile("{{=<% %>=}}"),
            Err(TemplateError::ParseError { .. })
        ));
    }
}
