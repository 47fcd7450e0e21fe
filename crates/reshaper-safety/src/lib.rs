//! Safety subsystem for the Reshaper refactoring engine
//!
//! Provides content-hashed project snapshots, restore with integrity
//! checking, a persisted backup catalog and an append-only audit trail of
//! every operation the engine performs.

pub mod audit;
pub mod backup;
pub mod error;
pub mod models;
pub mod verifier;

pub use audit::AuditStore;
pub use backup::{BackupManager, RestoreSummary};
pub use error::{SafetyError, SafetyResult};
pub use models::{
    AuditQuery, AuditSummary, BackupRecord, OperationKind, OperationRecord, OperationStatus,
};
pub use verifier::{relative_key, ContentVerifier, SnapshotScope, TreeDigest, DEFAULT_EXCLUDED_DIRS};
