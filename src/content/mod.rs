//! Content module - front-matter, markdown, pages, site data and navigation

mod frontmatter;
pub mod loader;
mod markdown;
pub mod navigation;
mod page;
pub mod value;

pub use frontmatter::FrontMatter;
pub use markdown::{expand_fences, html_escape, is_markup_extension, MarkdownRenderer, MARKUP_EXTENSIONS};
pub use navigation::NavEntry;
pub use page::{Page, Site};
