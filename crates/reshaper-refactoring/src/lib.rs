//! Reshaper Refactoring Engine
//!
//! Restructures Python project trees for maintainability: oversized files and
//! units are split, imports that break the layer table are fixed, identical
//! duplicated units move to shared modules and headerless modules get a
//! docstring.
//!
//! # Architecture
//!
//! - **Analysis**: pure analyzers over parsed sources (sizes, duplicates,
//!   layers, functional grouping)
//! - **Planning**: findings ordered into typed steps
//! - **Transformation**: each step synthesizes and re-parses its output before
//!   writing
//! - **Safety**: every mutating run is preceded by a content-hashed snapshot,
//!   audited phase by phase and rolled back when verification fails
//!
//! # Example
//!
//! ```ignore
//! use reshaper_refactoring::{EngineConfig, Orchestrator, RefactoringPlan, RunRequest};
//!
//! let orchestrator = Orchestrator::new(EngineConfig::default());
//! let confirm = |plan: &RefactoringPlan| {
//!     println!("{}", plan);
//!     true
//! };
//! let report = orchestrator.run(&RunRequest::new("/path/to/project"), &confirm);
//! println!("{}", report);
//! std::process::exit(report.exit_code());
//! ```

pub mod analysis;
pub mod config;
pub mod engine;
pub mod error;
pub mod layers;
pub mod plan;
pub mod project;
pub mod transform;

pub use analysis::{
    ArchitectureViolation, Category, CommonModuleSuggestion, DuplicateBlock, DuplicateBlockPair,
    DuplicateDetector, FileSizeAnalyzer, FunctionalGrouper, FunctionalUnit, ImportAnalyzer,
    SizeViolation, UnitSizeAnalyzer,
};
pub use config::{ConfigLoader, EngineConfig};
pub use engine::{
    Orchestrator, Phase, PhaseRecord, PlanConfirmation, RefactoringReport, RunContext, RunRequest,
    RunStatus, StepApplier, StepHandler,
};
pub use error::{RefactoringError, Result};
pub use layers::{Layer, LayerClassifier, LayerRules, ViolationKind};
pub use plan::{
    Advisory, AdvisoryKind, Planner, ProjectAnalysis, RefactoringPlan, RefactoringStep, StepId,
    StepKind, StepStatus,
};
pub use project::ProjectTree;
pub use transform::{
    CommonModuleExtractor, FileSplitter, HeaderStandardizer, ImportOrganizer, UnitSplitter,
};
