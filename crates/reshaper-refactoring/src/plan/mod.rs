//! Refactoring plans: analysis findings ordered into typed steps

pub mod models;
pub mod planner;

pub use models::{
    Advisory, AdvisoryKind, RefactoringPlan, RefactoringStep, StepId, StepKind, StepStatus,
};
pub use planner::{AnalysisCounts, Planner, ProjectAnalysis};
