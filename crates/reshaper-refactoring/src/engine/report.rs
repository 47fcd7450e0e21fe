//! Run phases, final status and the report returned to the caller

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analysis,
    Planning,
    Backup,
    Apply,
    Verify,
    Completed,
    RolledBack,
    Error,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Analysis => "analysis",
            Phase::Planning => "planning",
            Phase::Backup => "backup",
            Phase::Apply => "apply",
            Phase::Verify => "verify",
            Phase::Completed => "completed",
            Phase::RolledBack => "rolled_back",
            Phase::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing and outcome of one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub succeeded: bool,
    pub detail: Option<String>,
}

impl PhaseRecord {
    pub fn begin(phase: Phase) -> Self {
        Self {
            phase,
            started_at: Utc::now(),
            finished_at: None,
            succeeded: false,
            detail: None,
        }
    }

    pub fn finish(mut self, succeeded: bool, detail: Option<String>) -> Self {
        self.finished_at = Some(Utc::now());
        self.succeeded = succeeded;
        self.detail = detail;
        self
    }
}

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Process exit code for the status
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::PartialSuccess => 1,
            RunStatus::Failed => 2,
            RunStatus::Cancelled => 3,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunStatus::Success => "success",
            RunStatus::PartialSuccess => "partial_success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefactoringReport {
    pub plan_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub steps_succeeded: usize,
    pub steps_failed: usize,
    pub error_messages: Vec<String>,
    /// Backup taken before any change
    pub backup_ref: Option<String>,
    /// Snapshot of the broken state taken before a rollback
    pub emergency_backup_ref: Option<String>,
    pub phases: Vec<PhaseRecord>,
}

impl RefactoringReport {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Success,
            steps_succeeded: 0,
            steps_failed: 0,
            error_messages: Vec::new(),
            backup_ref: None,
            emergency_backup_ref: None,
            phases: Vec::new(),
        }
    }

    /// Close the report with its final status
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn last_phase(&self) -> Option<Phase> {
        self.phases.last().map(|p| p.phase)
    }

    pub fn rolled_back(&self) -> bool {
        self.phases.iter().any(|p| p.phase == Phase::RolledBack)
    }
}

impl fmt::Display for RefactoringReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Refactoring run {}: {}", self.plan_id, self.status)?;
        writeln!(
            f,
            "  steps: {} succeeded, {} failed",
            self.steps_succeeded, self.steps_failed
        )?;
        if let Some(backup) = &self.backup_ref {
            writeln!(f, "  backup: {}", backup)?;
        }
        if let Some(emergency) = &self.emergency_backup_ref {
            writeln!(f, "  emergency backup: {}", emergency)?;
        }
        let phases: Vec<String> = self
            .phases
            .iter()
            .map(|p| {
                if p.succeeded {
                    p.phase.to_string()
                } else {
                    format!("{} (failed)", p.phase)
                }
            })
            .collect();
        if !phases.is_empty() {
            writeln!(f, "  phases: {}", phases.join(" -> "))?;
        }
        if !self.error_messages.is_empty() {
            writeln!(f, "  errors:")?;
            for message in &self.error_messages {
                writeln!(f, "    - {}", message)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::Success.exit_code(), 0);
        assert_eq!(RunStatus::PartialSuccess.exit_code(), 1);
        assert_eq!(RunStatus::Failed.exit_code(), 2);
        assert_eq!(RunStatus::Cancelled.exit_code(), 3);
    }

    #[test]
    fn test_report_rendering() {
        let mut report = RefactoringReport::new("plan-1");
        report.steps_succeeded = 2;
        report.steps_failed = 1;
        report.error_messages.push("Step 3 failed: boom".to_string());
        report.emergency_backup_ref = Some("/p/.reshaper/backups/e1".to_string());
        report
            .phases
            .push(PhaseRecord::begin(Phase::Analysis).finish(true, None));
        report
            .phases
            .push(PhaseRecord::begin(Phase::Verify).finish(false, None));
        report.finish(RunStatus::Failed);

        let text = report.to_string();
        assert!(text.starts_with("Refactoring run plan-1: failed\n"));
        assert!(text.contains("2 succeeded, 1 failed"));
        assert!(text.contains("emergency backup: /p/.reshaper/backups/e1"));
        assert!(text.contains("analysis -> verify (failed)"));
        assert!(text.contains("- Step 3 failed: boom"));
        assert_eq!(report.exit_code(), 2);
        assert_eq!(report.last_phase(), Some(Phase::Verify));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::PartialSuccess).unwrap();
        assert_eq!(json, "\"partial_success\"");
    }
}
