//! Durable audit trail of refactoring operations and backups
//!
//! Two append-only JSON-lines tables live in the audit directory:
//! `operations.jsonl` receives one line per operation status change and
//! `backups.jsonl` one line per snapshot. Appends are serialized through a
//! mutex so a shared store handle can be used from several threads.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{SafetyError, SafetyResult};
use crate::models::{
    AuditQuery, AuditSummary, BackupRecord, OperationKind, OperationRecord, OperationStatus,
};

const OPERATIONS_FILE: &str = "operations.jsonl";
const BACKUPS_FILE: &str = "backups.jsonl";

/// Append-only store for operation and backup records
#[derive(Debug)]
pub struct AuditStore {
    /// Base directory for the audit tables
    audit_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditStore {
    /// Creates a new AuditStore instance
    ///
    /// # Arguments
    ///
    /// * `audit_dir` - Directory where the audit tables are stored
    pub fn new(audit_dir: PathBuf) -> Self {
        AuditStore {
            audit_dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn audit_dir(&self) -> &Path {
        &self.audit_dir
    }

    fn append<T: Serialize>(&self, file: &str, value: &T) -> SafetyResult<()> {
        let line = serde_json::to_string(value)?;

        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.audit_dir).map_err(|e| {
            error!("Failed to create audit directory: {}", e);
            SafetyError::Audit(format!(
                "Failed to create audit directory {}: {}",
                self.audit_dir.display(),
                e
            ))
        })?;
        let path = self.audit_dir.join(file);
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SafetyError::Audit(format!("Failed to open {}: {}", path.display(), e)))?;
        writeln!(handle, "{}", line)
            .map_err(|e| SafetyError::Audit(format!("Failed to append to {}: {}", path.display(), e)))?;
        Ok(())
    }

    fn read_lines<T: DeserializeOwned>(&self, file: &str) -> SafetyResult<Vec<T>> {
        let path = self.audit_dir.join(file);
        if !path.exists() {
            debug!(path = %path.display(), "Audit table does not exist yet");
            return Ok(Vec::new());
        }

        let content = {
            let _guard = self.write_lock.lock();
            fs::read_to_string(&path)?
        };

        let mut values = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(value) => values.push(value),
                Err(e) => warn!(
                    path = %path.display(),
                    line = number + 1,
                    error = %e,
                    "Skipping malformed audit line"
                ),
            }
        }
        Ok(values)
    }

    /// Appends the current version of an operation record
    pub fn record_operation(&self, record: &OperationRecord) -> SafetyResult<()> {
        self.append(OPERATIONS_FILE, record)?;
        debug!(
            operation_id = %record.id,
            kind = %record.kind,
            status = %record.status,
            "Recorded operation"
        );
        Ok(())
    }

    /// Starts an operation and persists it in the `started` state
    pub fn start_operation(
        &self,
        kind: OperationKind,
        actor: &str,
        targets: Vec<PathBuf>,
        backup_ref: Option<String>,
    ) -> SafetyResult<OperationRecord> {
        let record = OperationRecord::new(kind, actor)
            .with_targets(targets)
            .with_backup_ref(backup_ref);
        self.record_operation(&record)?;
        Ok(record)
    }

    /// Marks an operation completed and persists the new version
    pub fn complete_operation(
        &self,
        record: &mut OperationRecord,
        changes: BTreeMap<String, serde_json::Value>,
    ) -> SafetyResult<()> {
        record.status = OperationStatus::Completed;
        record.finished_at = Some(Utc::now());
        record.changes.extend(changes);
        self.record_operation(record)
    }

    /// Marks an operation failed and persists the new version
    pub fn fail_operation(&self, record: &mut OperationRecord, error: &str) -> SafetyResult<()> {
        record.status = OperationStatus::Failed;
        record.finished_at = Some(Utc::now());
        record.error = Some(error.to_string());
        self.record_operation(record)
    }

    /// Persists a backup record in the catalog table
    pub fn record_backup(&self, record: &BackupRecord) -> SafetyResult<()> {
        self.append(BACKUPS_FILE, record)?;
        debug!(backup_id = %record.id, "Recorded backup");
        Ok(())
    }

    /// Latest version of every operation, oldest first
    pub fn operations(&self) -> SafetyResult<Vec<OperationRecord>> {
        let versions: Vec<OperationRecord> = self.read_lines(OPERATIONS_FILE)?;

        let mut order: Vec<String> = Vec::new();
        let mut latest: HashMap<String, OperationRecord> = HashMap::new();
        for record in versions {
            if !latest.contains_key(&record.id) {
                order.push(record.id.clone());
            }
            latest.insert(record.id.clone(), record);
        }

        let mut records: Vec<OperationRecord> = order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }

    /// Operations matching a query, oldest first
    ///
    /// With a limit, only the most recent matches are kept.
    pub fn query(&self, query: &AuditQuery) -> SafetyResult<Vec<OperationRecord>> {
        let mut matches: Vec<OperationRecord> = self
            .operations()?
            .into_iter()
            .filter(|record| query.matches(record))
            .collect();
        if let Some(limit) = query.limit {
            if matches.len() > limit {
                matches.drain(..matches.len() - limit);
            }
        }
        Ok(matches)
    }

    /// Every backup recorded in the catalog, oldest first
    pub fn backups(&self) -> SafetyResult<Vec<BackupRecord>> {
        let mut records: Vec<BackupRecord> = self.read_lines(BACKUPS_FILE)?;
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    /// Find a recorded backup by id
    pub fn find_backup(&self, id: &str) -> SafetyResult<BackupRecord> {
        self.backups()?
            .into_iter()
            .find(|record| record.id == id)
            .ok_or_else(|| SafetyError::BackupNotFound(id.to_string()))
    }

    /// Summarizes operations started within a window
    ///
    /// # Arguments
    ///
    /// * `since` / `until` - Inclusive window bounds, open when `None`
    /// * `recent` - How many of the newest operations to include
    pub fn summary(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        recent: usize,
    ) -> SafetyResult<AuditSummary> {
        let query = AuditQuery {
            since,
            until,
            ..AuditQuery::default()
        };
        let records = self.query(&query)?;

        let mut by_status = BTreeMap::new();
        let mut by_kind = BTreeMap::new();
        for record in &records {
            *by_status.entry(record.status).or_insert(0) += 1;
            *by_kind.entry(record.kind).or_insert(0) += 1;
        }

        let newest: Vec<OperationRecord> = records.iter().rev().take(recent).cloned().collect();
        Ok(AuditSummary {
            since,
            until,
            total: records.len(),
            by_status,
            by_kind,
            recent: newest,
        })
    }
}
