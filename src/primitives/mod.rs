//! Lexing primitives
//!
//! This module contains the line tokenizers and the per-line token cache that keeps
//! their output in sync with buffer edits.

pub mod lexer;
pub mod token_cache;
