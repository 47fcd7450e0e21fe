//! Configuration types for the refactoring engine

use serde::{Deserialize, Serialize};

use crate::error::{RefactoringError, Result};
use crate::layers::LayerRules;

/// Engine thresholds and behavior switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum code lines per file
    pub file_limit: usize,
    /// Maximum code lines per callable unit
    pub unit_limit: usize,
    /// Minimum similarity for two blocks to count as duplicates
    pub similarity_threshold: f64,
    /// Minimum body code lines for a duplicate candidate
    pub min_block_lines: usize,
    /// Plan header steps for modules without a docstring
    pub standardize_headers: bool,
    /// Directory (relative to the project root) for backups and the audit store
    pub state_dir: String,
    /// Directory names never analyzed or snapshotted
    pub excluded_dirs: Vec<String>,
    /// Actor recorded on audit entries
    pub actor: String,
    pub layer_rules: LayerRules,
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.file_limit == 0 {
            return Err(RefactoringError::Validation(
                "file_limit must be positive".to_string(),
            ));
        }
        if self.unit_limit < 3 {
            return Err(RefactoringError::Validation(format!(
                "unit_limit must be at least 3, got {}",
                self.unit_limit
            )));
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(RefactoringError::Validation(format!(
                "similarity_threshold must be in (0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.min_block_lines == 0 {
            return Err(RefactoringError::Validation(
                "min_block_lines must be positive".to_string(),
            ));
        }
        if self.state_dir.trim().is_empty() {
            return Err(RefactoringError::Validation(
                "state_dir cannot be empty".to_string(),
            ));
        }
        if self.actor.trim().is_empty() {
            return Err(RefactoringError::Validation(
                "actor cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            file_limit: 120,
            unit_limit: 25,
            similarity_threshold: 0.85,
            min_block_lines: 5,
            standardize_headers: true,
            state_dir: ".reshaper".to_string(),
            excluded_dirs: reshaper_safety::DEFAULT_EXCLUDED_DIRS
                .iter()
                .map(|d| d.to_string())
                .collect(),
            actor: "reshaper".to_string(),
            layer_rules: LayerRules::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.file_limit, 120);
        assert_eq!(config.unit_limit, 25);
        assert!(config.excluded_dirs.iter().any(|d| d == "__pycache__"));
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let config = EngineConfig {
            similarity_threshold: 0.0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(RefactoringError::Validation(_))));

        let config = EngineConfig {
            similarity_threshold: 1.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_small_unit_limit() {
        let config = EngineConfig {
            unit_limit: 2,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"file_limit": 80}"#).unwrap();
        assert_eq!(config.file_limit, 80);
        assert_eq!(config.unit_limit, 25);
        assert_eq!(config.layer_rules, LayerRules::default());
    }
}
