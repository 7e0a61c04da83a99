//! Front-matter parsing

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    /// A leading block fenced by two lines reading exactly `---`.
    /// Non-greedy, so only the first closing fence ends the block.
    static ref FRONT_MATTER_RE: Regex =
        Regex::new(r"(?m)\A---\r?\n([\s\S]*?)^---\r?(?:\n|\z)").unwrap();
}

/// Front-matter data of a page or layout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontMatter {
    data: Map<String, Value>,
}

impl FrontMatter {
    /// Parse front-matter from content string
    /// Returns (front_matter, remaining_content)
    ///
    /// Content without a leading `---` line has no front-matter and is
    /// returned untouched. A block that is not a YAML mapping is an error.
    pub fn parse(content: &str) -> Result<(Self, &str)> {
        let Some(caps) = FRONT_MATTER_RE.captures(content) else {
            return Ok((FrontMatter::default(), content));
        };

        let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let yaml = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let body = &content[whole..];

        if yaml.trim().is_empty() {
            return Ok((FrontMatter::default(), body));
        }

        let value: Value = serde_yaml::from_str(yaml)
            .map_err(|e| anyhow!("Failed to parse YAML front-matter: {}", e))?;

        let data = match value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(anyhow!(
                    "Front-matter must be a mapping, found {}",
                    kind_of(&other)
                ))
            }
        };

        Ok((FrontMatter { data }, body))
    }

    /// Get a single field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Requested layout, if any
    pub fn layout(&self) -> Option<&str> {
        self.data.get("layout").and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume into the underlying key/value map
    pub fn into_map(self) -> Map<String, Value> {
        self.data
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
