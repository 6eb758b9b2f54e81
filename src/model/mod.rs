//! Document storage and positional queries
//!
//! Editable documents live in a piece tree ([`buffer::DocumentBuffer`]); large read-only
//! files are served from a memory map through a sparse line index and a chunk cache
//! ([`mapped::MappedDocument`]).

pub mod backing;
pub mod buffer;
pub mod chunk_cache;
pub mod encoding;
pub mod event;
pub mod line_index;
pub mod mapped;
pub mod piece_tree;
