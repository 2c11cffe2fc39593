//! Audit seam: who signed what, and when, for compliance review.
//!
//! Emission is fire-and-forget from the workflow's perspective; the hosting
//! application decides where entries go (database, SIEM, flat file).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use passbook_core::{EmployeeId, RecordId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    WorkflowCompleted,
    WorkflowRejected,
}

/// One terminal signing act.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub record_id: RecordId,
    pub employee_id: EmployeeId,
    pub action: AuditAction,
    /// Name of the manager who acted.
    pub actor_name: String,
    /// Caller IP when the act carried one (approval; rejection does not).
    pub actor_ip: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

pub trait AuditEmitter: Send + Sync {
    fn emit(&self, entry: AuditEntry);
}

impl<A> AuditEmitter for Arc<A>
where
    A: AuditEmitter + ?Sized,
{
    fn emit(&self, entry: AuditEntry) {
        (**self).emit(entry)
    }
}

/// Dev/test emitter: structured log line per entry.
#[derive(Debug, Default)]
pub struct LoggingAuditEmitter;

impl AuditEmitter for LoggingAuditEmitter {
    fn emit(&self, entry: AuditEntry) {
        tracing::info!(
            target: "audit",
            record_id = %entry.record_id,
            employee_id = %entry.employee_id,
            action = ?entry.action,
            actor_name = %entry.actor_name,
            actor_ip = entry.actor_ip.as_deref().unwrap_or("-"),
            occurred_at = %entry.occurred_at,
            "signature workflow audit entry"
        );
    }
}
