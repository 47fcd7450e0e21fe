//! Analyzers that detect maintainability violations
//!
//! All analyzers are pure over parsed file contents.

pub mod duplicates;
pub mod grouping;
pub mod imports;
pub mod size;

pub use duplicates::{
    similarity, suggest_common_modules, CommonModuleSuggestion, DuplicateBlock,
    DuplicateBlockPair, DuplicateDetector,
};
pub use grouping::{
    normalize_name, suggested_file_name, Category, FunctionalGrouper, FunctionalUnit, GroupedFile,
    UnitKind,
};
pub use imports::{ArchitectureViolation, ImportAnalyzer, ImportEdge, ImportTarget};
pub use size::{callable_units, FileSizeAnalyzer, SizeViolation, UnitSizeAnalyzer};
