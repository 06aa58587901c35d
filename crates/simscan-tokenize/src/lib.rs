//! Language classification and canonical tokenization.
//!
//! Each supported language is one tree-sitter grammar plus one node-kind
//! table row in [`lexer`]; everything else (binaries, unknown languages,
//! lex failures) goes through the [`fallback`] tokenizer. Both emit the
//! same canonical token alphabet, so downstream fingerprinting never
//! cares which path produced a stream.

pub mod classify;
pub mod fallback;
pub mod languages;
pub mod lexer;

pub use classify::{Classification, classify_file};
pub use fallback::FallbackLexer;
pub use languages::Language;
pub use lexer::{LexError, Lexer, TreeSitterLexer};
