//! Run orchestration: context, step application, phases and reporting

pub mod applier;
pub mod context;
pub mod controller;
pub mod report;

pub use applier::{StepApplier, StepHandler};
pub use context::{RunContext, RunRequest};
pub use controller::{Orchestrator, PlanConfirmation};
pub use report::{Phase, PhaseRecord, RefactoringReport, RunStatus};
