//! Module docstring insertion

use std::fs;
use std::path::Path;

use reshaper_parsers::SourceParser;
use tracing::debug;

use crate::analysis::grouping::normalize_name;
use crate::error::{RefactoringError, Result};
use crate::project::AGGREGATOR_FILE;
use crate::transform::file_splitter::insert_lines;
use crate::transform::module_stem;

/// Gives every non-empty module a docstring
#[derive(Debug, Clone)]
pub struct HeaderStandardizer {
    parser: SourceParser,
}

impl HeaderStandardizer {
    pub fn new(parser: SourceParser) -> Self {
        Self { parser }
    }

    /// Whether `file` would receive a header
    pub fn needs_header(&self, file: &Path, source: &str) -> bool {
        if file.file_name().and_then(|n| n.to_str()) == Some(AGGREGATOR_FILE) {
            return false;
        }
        if source.trim().is_empty() {
            return false;
        }
        match self.parser.parse(source) {
            Ok(module) => module.docstring().is_none(),
            Err(_) => false,
        }
    }

    /// Docstring line for a module file
    pub fn header_for(file: &Path) -> String {
        let title: String = normalize_name(&module_stem(file))
            .split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!("\"\"\"{} module.\"\"\"", title)
    }

    /// Insert a header when missing; returns whether the file changed
    pub fn standardize(&self, file: &Path) -> Result<bool> {
        let source = fs::read_to_string(file)?;
        if !self.needs_header(file, &source) {
            return Ok(false);
        }

        // shebang and encoding lines must stay first
        let preamble = source
            .lines()
            .take(2)
            .take_while(|line| line.starts_with("#!") || is_coding_line(line))
            .count();
        let updated = insert_lines(&source, preamble, &[Self::header_for(file)]);
        self.parser
            .check_syntax(&updated)
            .map_err(|e| RefactoringError::parse(file, &e))?;
        fs::write(file, updated)?;
        debug!(file = %file.display(), "Added module header");
        Ok(true)
    }
}

impl Default for HeaderStandardizer {
    fn default() -> Self {
        Self::new(SourceParser::new())
    }
}

fn is_coding_line(line: &str) -> bool {
    line.starts_with('#') && line.contains("coding")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_header_for() {
        assert_eq!(
            HeaderStandardizer::header_for(Path::new("pkg/order_history.py")),
            "\"\"\"Order History module.\"\"\""
        );
    }

    #[test]
    fn test_standardize_inserts_after_shebang() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("tool.py");
        fs::write(&file, "#!/usr/bin/env python3\nimport sys\n").unwrap();

        let standardizer = HeaderStandardizer::default();
        assert!(standardizer.standardize(&file).unwrap());
        assert_eq!(
            fs::read_to_string(&file).unwrap(),
            "#!/usr/bin/env python3\n\"\"\"Tool module.\"\"\"\nimport sys\n"
        );
        assert!(!standardizer.standardize(&file).unwrap());
    }

    #[test]
    fn test_skips_aggregators_and_empty_files() {
        let temp_dir = TempDir::new().unwrap();
        let init = temp_dir.path().join("__init__.py");
        let empty = temp_dir.path().join("empty.py");
        fs::write(&init, "from .a import *\n").unwrap();
        fs::write(&empty, "\n").unwrap();

        let standardizer = HeaderStandardizer::default();
        assert!(!standardizer.standardize(&init).unwrap());
        assert!(!standardizer.standardize(&empty).unwrap());
    }
}
