//! Theme module - mustache templates, partials and layout lookup

pub mod engine;
mod loader;
pub mod mustache;

pub use engine::TemplateRenderer;
pub use loader::{find_file, find_layout, Partials};
pub use mustache::{Template, TemplateError};
