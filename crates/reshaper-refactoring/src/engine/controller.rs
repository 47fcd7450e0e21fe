//! Phase controller driving a run from analysis to commit or rollback
//!
//! `Analysis -> Planning -> [confirmation] -> Backup -> Apply -> Verify ->
//! Completed | RolledBack`. Every phase writes an audit record. Once a
//! backup exists, any error escaping a phase restores it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use reshaper_safety::{BackupRecord, OperationKind};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::engine::applier::{StepApplier, StepHandler};
use crate::engine::context::{RunContext, RunRequest};
use crate::engine::report::{Phase, PhaseRecord, RefactoringReport, RunStatus};
use crate::error::{RefactoringError, Result};
use crate::plan::{AnalysisCounts, Planner, RefactoringPlan};

/// Decides whether a plan may be applied
pub trait PlanConfirmation {
    fn confirm(&self, plan: &RefactoringPlan) -> bool;
}

impl<F> PlanConfirmation for F
where
    F: Fn(&RefactoringPlan) -> bool,
{
    fn confirm(&self, plan: &RefactoringPlan) -> bool {
        self(plan)
    }
}

/// Runs the refactoring state machine
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: EngineConfig,
}

impl Orchestrator {
    /// Creates a new Orchestrator instance
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run every phase for a request; failures are reported, never raised
    pub fn run(&self, request: &RunRequest, confirmation: &dyn PlanConfirmation) -> RefactoringReport {
        match RunContext::new(&request.project_path, self.config.clone()) {
            Ok(context) => self.run_with_context(&context, request, confirmation),
            Err(e) => {
                error!(error = %e, "Could not prepare run");
                let mut report = RefactoringReport::new(String::new());
                report.error_messages.push(e.to_string());
                report
                    .phases
                    .push(PhaseRecord::begin(Phase::Error).finish(false, Some(e.to_string())));
                report.finish(RunStatus::Failed);
                report
            }
        }
    }

    /// Run every phase with a prepared context
    pub fn run_with_context(
        &self,
        context: &RunContext,
        request: &RunRequest,
        confirmation: &dyn PlanConfirmation,
    ) -> RefactoringReport {
        self.run_with_handler(context, request, confirmation, &StepApplier::new(context))
    }

    /// Run every phase, applying steps through `handler`
    pub fn run_with_handler(
        &self,
        context: &RunContext,
        request: &RunRequest,
        confirmation: &dyn PlanConfirmation,
        handler: &dyn StepHandler,
    ) -> RefactoringReport {
        let mut report = RefactoringReport::new(String::new());
        let mut backup: Option<BackupRecord> = None;

        match self.drive(context, request, confirmation, handler, &mut report, &mut backup) {
            Ok(status) => report.finish(status),
            Err(e) => {
                error!(error = %e, plan_id = %report.plan_id, "Run failed");
                report.error_messages.push(e.to_string());
                report
                    .phases
                    .push(PhaseRecord::begin(Phase::Error).finish(false, Some(e.to_string())));
                if let Some(backup) = &backup {
                    self.roll_back(context, backup, &mut report);
                }
                report.finish(RunStatus::Failed);
            }
        }

        info!(
            plan_id = %report.plan_id,
            status = %report.status,
            succeeded = report.steps_succeeded,
            failed = report.steps_failed,
            "Run finished"
        );
        report
    }

    fn drive(
        &self,
        context: &RunContext,
        request: &RunRequest,
        confirmation: &dyn PlanConfirmation,
        handler: &dyn StepHandler,
        report: &mut RefactoringReport,
        backup: &mut Option<BackupRecord>,
    ) -> Result<RunStatus> {
        let planner = Planner::new(&context.config, &context.project, context.parser.clone())?;

        let analysis = self.phase(context, report, Phase::Analysis, OperationKind::Analyze, None, || {
            let analysis = planner.analyze(&request.target_dirs)?;
            let counts = AnalysisCounts::from(&analysis);
            Ok((analysis, changes_of("counts", serde_json::to_value(counts)?)))
        })?;
        let skipped: BTreeSet<PathBuf> = analysis.skipped.iter().map(|(f, _)| f.clone()).collect();

        let mut plan = self.phase(context, report, Phase::Planning, OperationKind::Plan, None, || {
            let plan = planner.plan(&analysis);
            let mut changes = changes_of("steps", json!(plan.steps.len()));
            changes.insert("plan_id".to_string(), json!(plan.id));
            changes.insert("advisories".to_string(), serde_json::to_value(&plan.advisories)?);
            Ok((plan, changes))
        })?;
        report.plan_id = plan.id.clone();

        if plan.is_empty() {
            info!(plan_id = %plan.id, "Nothing to refactor");
            return Ok(RunStatus::Success);
        }
        if !request.unattended && !confirmation.confirm(&plan) {
            info!(plan_id = %plan.id, "Plan declined");
            return Ok(RunStatus::Cancelled);
        }

        let record = self.phase(context, report, Phase::Backup, OperationKind::Backup, None, || {
            let record = context
                .backups
                .create_backup(context.project.root(), &format!("before plan {}", plan.id))?;
            context.audit.record_backup(&record)?;
            let changes = changes_of("backup_id", json!(record.id));
            Ok((record, changes))
        })?;
        report.backup_ref = Some(record.id.clone());
        let backup_id = record.id.clone();
        *backup = Some(record);

        self.apply(context, &mut plan, &backup_id, handler, report)?;

        self.phase(context, report, Phase::Verify, OperationKind::Verify, Some(backup_id), || {
            let files = context.project.python_files(&request.target_dirs)?;
            let mut failures = Vec::new();
            for file in files.iter().filter(|f| !skipped.contains(*f)) {
                if let Err(e) = context.parser.parse_file(file) {
                    failures.push(format!("{}: {}", file.display(), e));
                }
            }
            if !failures.is_empty() {
                return Err(RefactoringError::RunFailure(format!(
                    "verification failed for {}",
                    failures.join("; ")
                )));
            }
            Ok(((), changes_of("files_verified", json!(files.len()))))
        })?;

        report
            .phases
            .push(PhaseRecord::begin(Phase::Completed).finish(true, None));
        if report.steps_failed == 0 {
            Ok(RunStatus::Success)
        } else {
            Ok(RunStatus::PartialSuccess)
        }
    }

    /// Apply steps in plan order; a failed step does not stop the rest
    fn apply(
        &self,
        context: &RunContext,
        plan: &mut RefactoringPlan,
        backup_id: &str,
        handler: &dyn StepHandler,
        report: &mut RefactoringReport,
    ) -> Result<()> {
        let phase = PhaseRecord::begin(Phase::Apply);
        info!(phase = %Phase::Apply, "Entering phase");
        let mut record = context.audit.start_operation(
            OperationKind::Apply,
            &context.actor,
            Vec::new(),
            Some(backup_id.to_string()),
        )?;

        match self.apply_steps(context, plan, backup_id, handler, report) {
            Ok(()) => {
                let mut changes = changes_of("steps_succeeded", json!(report.steps_succeeded));
                changes.insert("steps_failed".to_string(), json!(report.steps_failed));
                context.audit.complete_operation(&mut record, changes)?;
                let detail = format!("{} done, {} failed", report.steps_succeeded, report.steps_failed);
                report.phases.push(phase.finish(true, Some(detail)));
                Ok(())
            }
            Err(e) => {
                context.audit.fail_operation(&mut record, &e.to_string())?;
                report.phases.push(phase.finish(false, Some(e.to_string())));
                Err(e)
            }
        }
    }

    fn apply_steps(
        &self,
        context: &RunContext,
        plan: &mut RefactoringPlan,
        backup_id: &str,
        handler: &dyn StepHandler,
        report: &mut RefactoringReport,
    ) -> Result<()> {
        for step in plan.steps.iter_mut() {
            step.start()?;
            let mut record = context.audit.start_operation(
                step.kind.operation_kind(),
                &context.actor,
                step.target_files.clone(),
                Some(backup_id.to_string()),
            )?;
            info!(step_id = step.id, description = %step.description, "Applying step");

            match handler.apply(&step.kind) {
                Ok(changes) => {
                    step.complete()?;
                    context.audit.complete_operation(&mut record, changes)?;
                    report.steps_succeeded += 1;
                }
                Err(e) => {
                    let failure = RefactoringError::StepFailure {
                        step_id: step.id,
                        message: e.to_string(),
                    };
                    warn!(step_id = step.id, error = %e, "Step failed");
                    step.fail(e.to_string())?;
                    context.audit.fail_operation(&mut record, &e.to_string())?;
                    report.error_messages.push(failure.to_string());
                    report.steps_failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Snapshot the current state, then restore the run's backup
    fn roll_back(&self, context: &RunContext, backup: &BackupRecord, report: &mut RefactoringReport) {
        let result = self.phase(
            context,
            report,
            Phase::RolledBack,
            OperationKind::Rollback,
            Some(backup.id.clone()),
            || {
                let emergency = context.backups.create_backup(
                    context.project.root(),
                    &format!("emergency before restoring {}", backup.id),
                )?;
                context.audit.record_backup(&emergency)?;
                let summary = context.backups.restore_backup(backup, context.project.root())?;
                let mut changes = changes_of("emergency_backup_id", json!(emergency.id));
                changes.insert("files_restored".to_string(), json!(summary.files_restored));
                changes.insert("files_removed".to_string(), json!(summary.files_removed));
                Ok((emergency, changes))
            },
        );
        match result {
            Ok(emergency) => {
                warn!(backup_id = %backup.id, "Rolled back to backup");
                report.emergency_backup_ref = Some(emergency.backup_path.display().to_string());
            }
            Err(e) => {
                error!(backup_id = %backup.id, error = %e, "Rollback failed");
                report.error_messages.push(format!("rollback failed: {}", e));
            }
        }
    }

    /// Run one phase inside an audit record and log it on the report
    fn phase<T>(
        &self,
        context: &RunContext,
        report: &mut RefactoringReport,
        phase: Phase,
        kind: OperationKind,
        backup_ref: Option<String>,
        body: impl FnOnce() -> Result<(T, BTreeMap<String, Value>)>,
    ) -> Result<T> {
        let started = PhaseRecord::begin(phase);
        info!(phase = %phase, "Entering phase");

        let result = context
            .audit
            .start_operation(kind, &context.actor, Vec::new(), backup_ref)
            .map_err(RefactoringError::from)
            .and_then(|mut record| match body() {
                Ok((value, changes)) => {
                    context.audit.complete_operation(&mut record, changes)?;
                    Ok(value)
                }
                Err(e) => {
                    context.audit.fail_operation(&mut record, &e.to_string())?;
                    Err(e)
                }
            });

        let detail = result.as_ref().err().map(|e| e.to_string());
        report.phases.push(started.finish(result.is_ok(), detail));
        result
    }
}

fn changes_of(key: &str, value: Value) -> BTreeMap<String, Value> {
    let mut changes = BTreeMap::new();
    changes.insert(key.to_string(), value);
    changes
}
