//! Data models for backups and the operation audit trail

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata of a project snapshot.
///
/// Persisted as `backup.json` next to the copied tree and in the audit store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Unique backup id (also the backup directory name)
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Project that was copied
    pub project_path: PathBuf,
    /// Directory holding the copied tree
    pub backup_path: PathBuf,
    pub file_count: usize,
    pub total_bytes: u64,
    /// SHA-256 over the relative paths and bytes of the copied tree
    pub content_hash: String,
    pub description: String,
}

/// What an audited operation did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Analyze,
    Plan,
    Backup,
    Apply,
    SplitFile,
    SplitUnit,
    OrganizeImports,
    ExtractCommon,
    StandardizeHeader,
    Verify,
    Rollback,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Analyze => "analyze",
            OperationKind::Plan => "plan",
            OperationKind::Backup => "backup",
            OperationKind::Apply => "apply",
            OperationKind::SplitFile => "split_file",
            OperationKind::SplitUnit => "split_unit",
            OperationKind::OrganizeImports => "organize_imports",
            OperationKind::ExtractCommon => "extract_common",
            OperationKind::StandardizeHeader => "standardize_header",
            OperationKind::Verify => "verify",
            OperationKind::Rollback => "rollback",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Started,
    Completed,
    Failed,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            OperationStatus::Started => "started",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// One audited operation.
///
/// Each status change appends a new version of the record; the latest
/// version for an id wins when reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub target_files: Vec<PathBuf>,
    /// Free-form details of what changed
    #[serde(default)]
    pub changes: BTreeMap<String, serde_json::Value>,
    pub error: Option<String>,
    pub backup_ref: Option<String>,
    pub actor: String,
}

impl OperationRecord {
    /// Create a new record in the `started` state
    pub fn new(kind: OperationKind, actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            status: OperationStatus::Started,
            started_at: Utc::now(),
            finished_at: None,
            target_files: Vec::new(),
            changes: BTreeMap::new(),
            error: None,
            backup_ref: None,
            actor: actor.into(),
        }
    }

    pub fn with_targets(mut self, targets: impl IntoIterator<Item = PathBuf>) -> Self {
        self.target_files.extend(targets);
        self
    }

    pub fn with_backup_ref(mut self, backup_ref: Option<String>) -> Self {
        self.backup_ref = backup_ref;
        self
    }

    pub fn with_change(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.changes.insert(key.into(), value);
        self
    }
}

/// Filter for reading operation records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub kind: Option<OperationKind>,
    pub status: Option<OperationStatus>,
    /// Keep only the most recent N matches
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn kind(mut self, kind: OperationKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn status(mut self, status: OperationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &OperationRecord) -> bool {
        self.since.map_or(true, |since| record.started_at >= since)
            && self.until.map_or(true, |until| record.started_at <= until)
            && self.kind.map_or(true, |kind| record.kind == kind)
            && self.status.map_or(true, |status| record.status == status)
    }
}

/// Aggregate view of the audit trail over a time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub total: usize,
    pub by_status: BTreeMap<OperationStatus, usize>,
    pub by_kind: BTreeMap<OperationKind, usize>,
    /// Most recent operations, newest first
    pub recent: Vec<OperationRecord>,
}

impl fmt::Display for AuditSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Operations: {}", self.total)?;
        for (status, count) in &self.by_status {
            writeln!(f, "  {}: {}", status, count)?;
        }
        for (kind, count) in &self.by_kind {
            writeln!(f, "  {}: {}", kind, count)?;
        }
        if !self.recent.is_empty() {
            writeln!(f, "Recent:")?;
            for record in &self.recent {
                writeln!(
                    f,
                    "  {} {} {} ({})",
                    record.started_at.format("%Y-%m-%d %H:%M:%S"),
                    record.kind,
                    record.status,
                    record.id
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kind_serializes_snake_case() {
        let json = serde_json::to_string(&OperationKind::StandardizeHeader).unwrap();
        assert_eq!(json, "\"standardize_header\"");
        assert_eq!(OperationKind::SplitUnit.to_string(), "split_unit");
    }

    #[test]
    fn test_query_matches() {
        let record = OperationRecord::new(OperationKind::Verify, "tester");
        assert!(AuditQuery::new().matches(&record));
        assert!(AuditQuery::new().kind(OperationKind::Verify).matches(&record));
        assert!(!AuditQuery::new()
            .status(OperationStatus::Completed)
            .matches(&record));
    }
}
