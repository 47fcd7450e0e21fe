//! Configuration loader for engine settings

use std::path::Path;

use tracing::debug;

use crate::config::types::EngineConfig;
use crate::error::{RefactoringError, Result};

/// Loads engine configuration from files
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a JSON file and validate it
    pub fn load(path: &Path) -> Result<EngineConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RefactoringError::Validation(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "Loaded engine configuration");
        Ok(config)
    }

    /// Parse and validate configuration from JSON text
    pub fn parse(content: &str) -> Result<EngineConfig> {
        let config: EngineConfig = serde_json::from_str(content)
            .map_err(|e| RefactoringError::Validation(format!("Failed to parse JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}
