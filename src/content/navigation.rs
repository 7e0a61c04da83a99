//! Site navigation derived from page front-matter

use serde_json::{json, Value};
use slug::slugify;
use std::cmp::Ordering;

use super::value::{is_truthy, number_value};
use super::Page;

/// Normalized navigation entry of a page
#[derive(Debug, Clone, PartialEq)]
pub struct NavEntry {
    pub name: String,
    pub weight: f64,
}

impl NavEntry {
    /// Normalize a page's `navigation` field.
    ///
    /// `true` and bare numbers use the page name; a mapping may carry its own
    /// `name` and `weight` (default 1, and 0 is kept). Falsy values, the
    /// number 0 included, leave the page out of the navigation.
    pub fn from_page(page: &Page) -> Option<Self> {
        let raw = page.navigation.as_ref().filter(|v| is_truthy(v))?;

        let entry = match raw {
            Value::Number(n) => NavEntry {
                name: page.name.clone(),
                weight: weight_of(raw).unwrap_or(1.0),
            },
            Value::Object(obj) => NavEntry {
                name: obj
                    .get("name")
                    .filter(|v| is_truthy(v))
                    .map(super::value::to_output_string)
                    .unwrap_or_else(|| page.name.clone()),
                weight: obj.get("weight").and_then(weight_of).unwrap_or(1.0),
            },
            Value::String(_) => NavEntry {
                name: page.name.clone(),
                weight: weight_of(raw).unwrap_or(1.0),
            },
            _ => NavEntry {
                name: page.name.clone(),
                weight: 1.0,
            },
        };

        Some(entry)
    }

    fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "weight": number_value(self.weight),
        })
    }
}

/// Finite weight of a number or numeric string
fn weight_of(value: &Value) -> Option<f64> {
    let weight = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    weight.filter(|w| w.is_finite())
}

/// Normalize the `navigation` field of every listed page in place and
/// return the listed pages sorted by ascending weight.
/// Equal weights are ordered by name, ignoring case and accents.
pub fn build_navigation(pages: &mut [Page]) -> Vec<Page> {
    let mut entries: Vec<(NavEntry, Page)> = Vec::new();
    for page in pages.iter_mut() {
        let Some(entry) = NavEntry::from_page(page) else {
            continue;
        };
        page.navigation = Some(entry.to_value());
        entries.push((entry, page.clone()));
    }

    entries.sort_by(|(a, _), (b, _)| {
        a.weight
            .total_cmp(&b.weight)
            .then_with(|| compare_names(&a.name, &b.name))
    });

    entries.into_iter().map(|(_, page)| page).collect()
}

/// Compare transliterated names first (`É` sorts with `e`), then
/// case-insensitively; lowercase sorts first among otherwise equal names.
/// Names that transliterate to nothing fall back to the later keys.
fn compare_names(a: &str, b: &str) -> Ordering {
    slugify(a)
        .cmp(&slugify(b))
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| b.cmp(a))
}
