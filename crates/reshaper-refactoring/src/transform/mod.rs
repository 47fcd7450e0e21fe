//! Source transformations applied by plan steps
//!
//! Each transformer validates its output with the parser before writing.

pub mod extractor;
pub mod file_splitter;
pub mod header;
pub mod import_organizer;
pub mod unit_splitter;

use std::path::Path;

pub use extractor::{CommonModuleExtractor, ExtractionResult, ReferenceUpdate};
pub use file_splitter::{FileSplitResult, FileSplitter, SplitOutput};
pub use header::HeaderStandardizer;
pub use import_organizer::{ImportFixResult, ImportOrganizer};
pub use unit_splitter::{HelperUnit, UnitSplit, UnitSplitResult, UnitSplitter};

/// File stem of a path
pub(crate) fn module_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Join source blocks with two blank lines, dropping empty blocks
pub(crate) fn join_blocks(blocks: &[String]) -> String {
    let parts: Vec<&str> = blocks
        .iter()
        .map(|b| b.trim_end_matches('\n'))
        .filter(|b| !b.trim().is_empty())
        .collect();
    if parts.is_empty() {
        return String::new();
    }
    let mut out = parts.join("\n\n\n");
    out.push('\n');
    out
}

/// Remove runs of more than two blank lines
pub(crate) fn collapse_blank_runs(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut blanks = 0;
    for line in source.lines() {
        if line.trim().is_empty() {
            blanks += 1;
            if blanks > 2 {
                continue;
            }
        } else {
            blanks = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_blocks() {
        let blocks = vec!["a\n".to_string(), "".to_string(), "b\n\n".to_string()];
        assert_eq!(join_blocks(&blocks), "a\n\n\nb\n");
        assert_eq!(join_blocks(&[]), "");
    }

    #[test]
    fn test_collapse_blank_runs() {
        assert_eq!(collapse_blank_runs("a\n\n\n\n\nb\n"), "a\n\n\nb\n");
        assert_eq!(collapse_blank_runs("a\n\nb\n"), "a\n\nb\n");
    }

    #[test]
    fn test_module_stem() {
        assert_eq!(module_stem(Path::new("pkg/orders.py")), "orders");
    }
}
