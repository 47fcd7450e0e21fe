//! Parser error types and results

use std::path::PathBuf;
use thiserror::Error;

/// Parser operation errors
#[derive(Debug, Error)]
pub enum ParserError {
    /// Source text is not valid Python
    #[error("Syntax error{}: line {line}, column {column}: {message}", path_suffix(.path))]
    Syntax {
        path: Option<PathBuf>,
        line: usize,
        column: usize,
        message: String,
    },

    /// The tree-sitter grammar could not be loaded
    #[error("Language error: {message}")]
    Language { message: String },

    /// Expected construct was not found in the source
    #[error("Missing construct: {message}")]
    Missing { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("UTF-8 conversion error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}

impl ParserError {
    /// Attach a file path to a syntax error
    pub fn with_path(self, file: impl Into<PathBuf>) -> Self {
        match self {
            ParserError::Syntax {
                line,
                column,
                message,
                ..
            } => ParserError::Syntax {
                path: Some(file.into()),
                line,
                column,
                message,
            },
            other => other,
        }
    }

    /// Whether this error means the source itself is invalid
    pub fn is_syntax(&self) -> bool {
        matches!(self, ParserError::Syntax { .. })
    }
}

/// Result type for parser operations
pub type ParserResult<T> = std::result::Result<T, ParserError>;
