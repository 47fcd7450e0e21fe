//! # Reshaper Parsers
//!
//! Python syntax tree extraction for the Reshaper refactoring engine.
//! Wraps tree-sitter and the Python grammar and exposes the pieces the
//! analyzers and transformers work with.
//!
//! ## Features
//!
//! - **Module structure**: docstring, imports, top-level definitions and
//!   statements with their line spans
//! - **Syntax checking**: first error position for invalid source
//! - **Name flow**: per-statement reads and writes of a function body
//! - **Line counting**: code lines excluding blanks, comments and docstrings

pub mod error;
pub mod lines;
pub mod parser;
pub mod scope;
pub mod types;

pub use error::{ParserError, ParserResult};
pub use lines::{count_code_lines, slice_lines};
pub use parser::SourceParser;
pub use scope::{BodyStatement, FunctionBody, ScopeFlags};
pub use types::{
    Definition, DefinitionKind, ImportKind, ImportStatement, ImportedName, ItemKind, ModuleItem,
    ParsedModule, Span,
};

/// Re-export commonly used types
pub type Result<T> = std::result::Result<T, ParserError>;
