//! Find and replace over document snapshots.
//!
//! Literal patterns go through a substring finder; regex and whole-word searches
//! compile a size-bounded regex. Either way the document is scanned in overlapping
//! windows (see [`window`]), so memory use does not grow with document size.

pub mod engine;
pub mod matcher;
pub mod options;
mod window;

pub use engine::SearchEngine;
pub use options::{LineTextCache, SearchDirection, SearchOptions, SearchResult, SearchScope};
