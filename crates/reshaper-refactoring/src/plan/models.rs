//! Data models for refactoring plans and their steps

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use reshaper_safety::OperationKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::imports::ArchitectureViolation;
use crate::error::{RefactoringError, Result};

/// Index of a step within its plan
pub type StepId = usize;

/// Status of a refactoring step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step is waiting to be applied
    Pending,
    /// Step is being applied
    Running,
    /// Step changed the project successfully
    Done,
    /// Step failed; the error is on the step
    Failed,
}

impl StepStatus {
    /// Whether the status can move to `next`
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::Running)
                | (StepStatus::Running, StepStatus::Done)
                | (StepStatus::Running, StepStatus::Failed)
                | (StepStatus::Pending, StepStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// What a step does, with its typed payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Split an oversized file by functional category
    SplitFile {
        file: PathBuf,
        line_count: usize,
        limit: usize,
    },
    /// Split an oversized callable unit into helpers
    SplitUnit {
        file: PathBuf,
        /// `name` or `Class.method`
        unit: String,
        line_count: usize,
        limit: usize,
    },
    /// Drop or rewrite disallowed imports and regroup the import block
    FixImports {
        file: PathBuf,
        violations: Vec<ArchitectureViolation>,
    },
    /// Move an identical unit into a shared module
    ExtractCommon {
        unit_name: String,
        module_path: PathBuf,
        files: Vec<PathBuf>,
    },
    /// Insert a module docstring
    StandardizeHeader { file: PathBuf },
}

impl StepKind {
    /// Audit operation kind recorded for this step
    pub fn operation_kind(&self) -> OperationKind {
        match self {
            StepKind::SplitFile { .. } => OperationKind::SplitFile,
            StepKind::SplitUnit { .. } => OperationKind::SplitUnit,
            StepKind::FixImports { .. } => OperationKind::OrganizeImports,
            StepKind::ExtractCommon { .. } => OperationKind::ExtractCommon,
            StepKind::StandardizeHeader { .. } => OperationKind::StandardizeHeader,
        }
    }

    /// Files the step reads or writes
    pub fn target_files(&self) -> Vec<PathBuf> {
        match self {
            StepKind::SplitFile { file, .. }
            | StepKind::SplitUnit { file, .. }
            | StepKind::FixImports { file, .. }
            | StepKind::StandardizeHeader { file } => vec![file.clone()],
            StepKind::ExtractCommon {
                module_path, files, ..
            } => {
                let mut targets = files.clone();
                targets.push(module_path.clone());
                targets
            }
        }
    }

    /// One-line human description
    pub fn describe(&self) -> String {
        match self {
            StepKind::SplitFile {
                file,
                line_count,
                limit,
            } => format!(
                "Split {} ({} lines, limit {})",
                file.display(),
                line_count,
                limit
            ),
            StepKind::SplitUnit {
                file,
                unit,
                line_count,
                limit,
            } => format!(
                "Split unit {} in {} ({} lines, limit {})",
                unit,
                file.display(),
                line_count,
                limit
            ),
            StepKind::FixImports { file, violations } => format!(
                "Fix {} disallowed import(s) in {}",
                violations.len(),
                file.display()
            ),
            StepKind::ExtractCommon {
                unit_name,
                module_path,
                files,
            } => format!(
                "Extract {} from {} files into {}",
                unit_name,
                files.len(),
                module_path.display()
            ),
            StepKind::StandardizeHeader { file } => {
                format!("Add module header to {}", file.display())
            }
        }
    }
}

/// A single step in a refactoring plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefactoringStep {
    pub id: StepId,
    pub description: String,
    pub kind: StepKind,
    pub target_files: Vec<PathBuf>,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl RefactoringStep {
    /// Create a pending step
    pub fn new(id: StepId, kind: StepKind) -> Self {
        Self {
            id,
            description: kind.describe(),
            target_files: kind.target_files(),
            kind,
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            error_message: None,
        }
    }

    fn transition(&mut self, next: StepStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(RefactoringError::Validation(format!(
                "step {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(StepStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(StepStatus::Done)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(StepStatus::Failed)?;
        self.finished_at = Some(Utc::now());
        self.error_message = Some(message.into());
        Ok(())
    }
}

/// Category of a plan advisory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryKind {
    /// Duplicates that cannot be extracted automatically
    NearDuplicate,
    /// A file that could not be parsed
    SkippedFile,
}

/// Finding reported with the plan but not acted on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub kind: AdvisoryKind,
    pub message: String,
    pub files: Vec<PathBuf>,
}

/// Ordered refactoring plan for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefactoringPlan {
    pub id: String,
    pub project_path: PathBuf,
    pub target_dirs: Vec<PathBuf>,
    pub steps: Vec<RefactoringStep>,
    pub total_files_seen: usize,
    /// Files with at least one planned step
    pub flagged_file_count: usize,
    pub skipped_files: Vec<PathBuf>,
    pub advisories: Vec<Advisory>,
}

impl RefactoringPlan {
    pub fn new(project_path: PathBuf, target_dirs: Vec<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_path,
            target_dirs,
            steps: Vec::new(),
            total_files_seen: 0,
            flagged_file_count: 0,
            skipped_files: Vec::new(),
            advisories: Vec::new(),
        }
    }

    /// Append a step, assigning the next id
    pub fn push_step(&mut self, kind: StepKind) -> StepId {
        let id = self.steps.len();
        self.steps.push(RefactoringStep::new(id, kind));
        id
    }

    pub fn step(&self, id: StepId) -> Option<&RefactoringStep> {
        self.steps.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn count_with_status(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

impl fmt::Display for RefactoringPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Plan {}: {} step(s) over {} file(s), {} flagged",
            self.id,
            self.steps.len(),
            self.total_files_seen,
            self.flagged_file_count
        )?;
        for step in &self.steps {
            writeln!(f, "  [{}] {}", step.id, step.description)?;
        }
        for advisory in &self.advisories {
            writeln!(f, "  note: {}", advisory.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_lifecycle() {
        let mut step = RefactoringStep::new(
            0,
            StepKind::StandardizeHeader {
                file: PathBuf::from("a.py"),
            },
        );
        assert_eq!(step.target_files, vec![PathBuf::from("a.py")]);
        step.start().unwrap();
        assert!(step.started_at.is_some());
        step.complete().unwrap();
        assert_eq!(step.status, StepStatus::Done);
    }

    #[test]
    fn test_terminal_steps_cannot_move() {
        let mut step = RefactoringStep::new(
            3,
            StepKind::SplitFile {
                file: PathBuf::from("big.py"),
                line_count: 150,
                limit: 120,
            },
        );
        step.fail("boom").unwrap();
        assert_eq!(step.error_message.as_deref(), Some("boom"));
        assert!(matches!(step.start(), Err(RefactoringError::Validation(_))));
        assert!(matches!(step.complete(), Err(RefactoringError::Validation(_))));
        assert_eq!(step.status, StepStatus::Failed);
    }

    #[test]
    fn test_done_step_cannot_fail() {
        let mut step = RefactoringStep::new(
            1,
            StepKind::StandardizeHeader {
                file: PathBuf::from("a.py"),
            },
        );
        step.start().unwrap();
        step.complete().unwrap();
        assert!(step.fail("late").is_err());
        assert!(step.error_message.is_none());
    }

    #[test]
    fn test_extract_targets_include_module() {
        let kind = StepKind::ExtractCommon {
            unit_name: "normalize_row".to_string(),
            module_path: PathBuf::from("shared/normalize_row.py"),
            files: vec![PathBuf::from("a.py"), PathBuf::from("b.py")],
        };
        assert_eq!(kind.target_files().len(), 3);
        assert_eq!(kind.operation_kind(), OperationKind::ExtractCommon);
    }

    #[test]
    fn test_push_step_assigns_indices() {
        let mut plan = RefactoringPlan::new(PathBuf::from("/p"), Vec::new());
        assert!(plan.is_empty());
        let a = plan.push_step(StepKind::StandardizeHeader {
            file: PathBuf::from("a.py"),
        });
        let b = plan.push_step(StepKind::StandardizeHeader {
            file: PathBuf::from("b.py"),
        });
        assert_eq!((a, b), (0, 1));
        assert_eq!(plan.step(1).map(|s| s.id), Some(1));
        assert_eq!(plan.count_with_status(StepStatus::Pending), 2);
    }
}
