//! Error types for the refactoring engine

use std::path::PathBuf;

use reshaper_parsers::ParserError;
use reshaper_safety::SafetyError;
use thiserror::Error;

/// Result type for refactoring operations
pub type Result<T> = std::result::Result<T, RefactoringError>;

/// Errors that can occur during refactoring operations
#[derive(Debug, Error)]
pub enum RefactoringError {
    /// Invalid configuration, request or state transition
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A source file could not be parsed
    #[error("Parse error in {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A backup does not match its recorded hash
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// A plan step failed
    #[error("Step {step_id} failed: {message}")]
    StepFailure { step_id: usize, message: String },

    /// The run cannot continue
    #[error("Run failed: {0}")]
    RunFailure(String),

    /// The named unit does not exist in the file
    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    /// The unit cannot be split safely
    #[error("Unit {unit} cannot be split: {reason}")]
    Unsplittable { unit: String, reason: String },

    /// A split or extraction would clobber existing code
    #[error("Split conflict: {0}")]
    SplitConflict(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Safety subsystem error
    #[error("Safety error: {0}")]
    Safety(SafetyError),

    /// Parser facility error
    #[error("Parser error: {0}")]
    Parser(#[from] ParserError),
}

impl From<SafetyError> for RefactoringError {
    fn from(err: SafetyError) -> Self {
        if err.is_integrity_failure() {
            RefactoringError::Integrity(err.to_string())
        } else {
            RefactoringError::Safety(err)
        }
    }
}

impl RefactoringError {
    /// Build a parse error for a file from a parser error
    pub fn parse(path: impl Into<PathBuf>, err: &ParserError) -> Self {
        RefactoringError::Parse {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Whether retrying the same input could ever succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RefactoringError::IoError(_) | RefactoringError::Safety(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_mismatch_maps_to_integrity() {
        let err: RefactoringError = SafetyError::IntegrityMismatch {
            backup_id: "b1".to_string(),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        }
        .into();
        assert!(matches!(err, RefactoringError::Integrity(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_other_safety_errors_are_wrapped() {
        let err: RefactoringError = SafetyError::BackupNotFound("b2".to_string()).into();
        assert!(matches!(err, RefactoringError::Safety(_)));
        assert!(err.to_string().contains("b2"));
    }

    #[test]
    fn test_step_failure_display() {
        let err = RefactoringError::StepFailure {
            step_id: 3,
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Step 3 failed: boom");
    }
}
