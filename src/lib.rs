//! Editing core for a text editor: document storage, positional queries, windowed
//! find/replace and incremental lexing.
//!
//! - [`model`]: the piece-tree [`DocumentBuffer`], change notification, and the
//!   memory-mapped [`MappedDocument`] for very large files
//! - [`primitives`]: tokenizers and the per-line [`TokenCache`]
//! - [`search`]: the stateless [`SearchEngine`]

pub mod cancel;
pub mod config;
pub mod error;
pub mod model;
pub mod primitives;
pub mod search;

pub use cancel::CancellationFlag;
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use model::buffer::{DocumentBuffer, DocumentSnapshot, LineEnding, TextEdit};
pub use model::event::{BufferChange, ChangeListener, ListenerId};
pub use model::mapped::MappedDocument;
pub use primitives::lexer::{LexState, LexerRegistry, LineTokens, Token, TokenKind, Tokenizer};
pub use primitives::token_cache::{RelexStats, SharedTokenCache, TokenCache};
pub use search::{SearchEngine, SearchOptions, SearchResult, SearchScope};
