//! Postgres-backed record store.
//!
//! One row per employee. Conditional writes run inside a transaction with a
//! row lock, so a transition commit and its version check are a single
//! atomic unit. Token lookups are served by unique B-tree indexes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use passbook_core::{EmployeeId, ExpectedVersion, RecordId, UserId};
use passbook_signing::{
    CapabilityToken, EmployeeSignature, ManagerContact, ManagerSignature, SignatureRecord,
    SignatureStatus, SignerRole,
};

use super::r#trait::{RecordStore, RecordStoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS signature_records (
    id UUID PRIMARY KEY,
    employee_id UUID NOT NULL UNIQUE,
    status TEXT NOT NULL,
    employee_token TEXT NOT NULL UNIQUE,
    manager_token TEXT NOT NULL UNIQUE,
    employee_token_expires_at TIMESTAMPTZ,
    manager_token_expires_at TIMESTAMPTZ,
    employee_signature JSONB,
    manager_signature JSONB,
    initiated_by UUID NOT NULL,
    initiated_at TIMESTAMPTZ NOT NULL,
    completed_at TIMESTAMPTZ,
    rejected_at TIMESTAMPTZ,
    rejection_reason TEXT,
    site_manager_email TEXT NOT NULL,
    site_manager_name TEXT NOT NULL,
    version BIGINT NOT NULL
)
"#;

#[derive(Debug, Clone)]
pub struct PostgresRecordStore {
    pool: Arc<PgPool>,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the table and its indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), RecordStoreError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    #[instrument(skip(self), fields(employee_id = %employee_id), err)]
    async fn find_by_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Option<SignatureRecord>, RecordStoreError> {
        let row = sqlx::query(&format!(
            "{SELECT_RECORD} WHERE employee_id = $1"
        ))
        .bind(employee_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_employee", e))?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    // The token is the lookup key and a secret; nothing about it is recorded
    // in the span.
    #[instrument(skip(self, token), err)]
    async fn find_by_token(
        &self,
        role: SignerRole,
        token: &CapabilityToken,
    ) -> Result<Option<SignatureRecord>, RecordStoreError> {
        let column = token_column(role);
        let row = sqlx::query(&format!("{SELECT_RECORD} WHERE {column} = $1"))
            .bind(token.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_token", e))?;

        row.map(|r| record_from_row(&r)).transpose()
    }

    #[instrument(skip(self, token), err)]
    async fn token_in_use(&self, token: &CapabilityToken) -> Result<bool, RecordStoreError> {
        let row = sqlx::query(
            "SELECT 1 FROM signature_records WHERE employee_token = $1 OR manager_token = $1 LIMIT 1",
        )
        .bind(token.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("token_in_use", e))?;

        Ok(row.is_some())
    }

    #[instrument(
        skip(self, record),
        fields(employee_id = %record.employee_id, status = %record.status, expected = ?expected),
        err
    )]
    async fn upsert(
        &self,
        record: SignatureRecord,
        expected: ExpectedVersion,
    ) -> Result<SignatureRecord, RecordStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Lock the employee's row (if any) so the version check and the
        // write happen against the same state.
        let current: i64 = sqlx::query(
            "SELECT version FROM signature_records WHERE employee_id = $1 FOR UPDATE",
        )
        .bind(record.employee_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_record", e))?
        .map(|row| row.try_get("version"))
        .transpose()
        .map_err(|e| map_sqlx_error("lock_record", e))?
        .unwrap_or(0);

        if !expected.matches(current as u64) {
            return Err(RecordStoreError::Conflict(format!(
                "expected {expected:?}, found {current}"
            )));
        }

        // Cross-column token uniqueness: unique indexes only cover a single
        // column each, so the other-record check runs here, inside the tx.
        let collision = sqlx::query(
            r#"
            SELECT 1 FROM signature_records
            WHERE employee_id <> $1
              AND (employee_token IN ($2, $3) OR manager_token IN ($2, $3))
            LIMIT 1
            "#,
        )
        .bind(record.employee_id.as_uuid())
        .bind(record.employee_token.as_str())
        .bind(record.manager_token.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("token_collision_check", e))?;

        if collision.is_some() {
            return Err(RecordStoreError::DuplicateToken(
                "token collides with another record".to_string(),
            ));
        }

        let mut stored = record;
        stored.version = current as u64 + 1;

        let result = if current == 0 {
            sqlx::query(
                r#"
                INSERT INTO signature_records (
                    id, employee_id, status,
                    employee_token, manager_token,
                    employee_token_expires_at, manager_token_expires_at,
                    employee_signature, manager_signature,
                    initiated_by, initiated_at,
                    completed_at, rejected_at, rejection_reason,
                    site_manager_email, site_manager_name,
                    version
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                "#,
            )
            .bind(stored.id.as_uuid())
            .bind(stored.employee_id.as_uuid())
            .bind(stored.status.to_string())
            .bind(stored.employee_token.as_str())
            .bind(stored.manager_token.as_str())
            .bind(stored.employee_token_expires_at)
            .bind(stored.manager_token_expires_at)
            .bind(signature_json(&stored.employee_signature)?)
            .bind(signature_json(&stored.manager_signature)?)
            .bind(stored.initiated_by.as_uuid())
            .bind(stored.initiated_at)
            .bind(stored.completed_at)
            .bind(stored.rejected_at)
            .bind(stored.rejection_reason.as_deref())
            .bind(stored.site_manager.email.as_str())
            .bind(stored.site_manager.name.as_str())
            .bind(stored.version as i64)
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE signature_records SET
                    status = $3,
                    employee_token = $4,
                    manager_token = $5,
                    employee_token_expires_at = $6,
                    manager_token_expires_at = $7,
                    employee_signature = $8,
                    manager_signature = $9,
                    initiated_by = $10,
                    initiated_at = $11,
                    completed_at = $12,
                    rejected_at = $13,
                    rejection_reason = $14,
                    site_manager_email = $15,
                    site_manager_name = $16,
                    version = $17
                WHERE employee_id = $2 AND version = $1
                "#,
            )
            .bind(current)
            .bind(stored.employee_id.as_uuid())
            .bind(stored.status.to_string())
            .bind(stored.employee_token.as_str())
            .bind(stored.manager_token.as_str())
            .bind(stored.employee_token_expires_at)
            .bind(stored.manager_token_expires_at)
            .bind(signature_json(&stored.employee_signature)?)
            .bind(signature_json(&stored.manager_signature)?)
            .bind(stored.initiated_by.as_uuid())
            .bind(stored.initiated_at)
            .bind(stored.completed_at)
            .bind(stored.rejected_at)
            .bind(stored.rejection_reason.as_deref())
            .bind(stored.site_manager.email.as_str())
            .bind(stored.site_manager.name.as_str())
            .bind(stored.version as i64)
            .execute(&mut *tx)
            .await
        };

        let outcome = result.map_err(|e| {
            if let Some(constraint) = unique_violation_constraint(&e) {
                match constraint.as_str() {
                    "signature_records_employee_id_key" => RecordStoreError::DuplicateEmployee(
                        "concurrent insert for the same employee".to_string(),
                    ),
                    _ => RecordStoreError::DuplicateToken(format!(
                        "unique constraint violated: {constraint}"
                    )),
                }
            } else {
                map_sqlx_error("write_record", e)
            }
        })?;

        if outcome.rows_affected() != 1 {
            // Another transaction won the race between our lock and write.
            return Err(RecordStoreError::Conflict(format!(
                "record moved past version {current} during write"
            )));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(stored)
    }
}

const SELECT_RECORD: &str = r#"
SELECT
    id, employee_id, status,
    employee_token, manager_token,
    employee_token_expires_at, manager_token_expires_at,
    employee_signature, manager_signature,
    initiated_by, initiated_at,
    completed_at, rejected_at, rejection_reason,
    site_manager_email, site_manager_name,
    version
FROM signature_records
"#;

fn token_column(role: SignerRole) -> &'static str {
    match role {
        SignerRole::Employee => "employee_token",
        SignerRole::Manager => "manager_token",
    }
}

fn signature_json<T: serde::Serialize>(
    value: &Option<T>,
) -> Result<Option<serde_json::Value>, RecordStoreError> {
    value
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| RecordStoreError::Backend(format!("signature serialization failed: {e}")))
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<SignatureRecord, RecordStoreError> {
    let decode = |e: sqlx::Error| RecordStoreError::Backend(format!("row decode failed: {e}"));

    let status_raw: String = row.try_get("status").map_err(decode)?;
    let status = status_from_str(&status_raw)?;

    let employee_signature: Option<serde_json::Value> =
        row.try_get("employee_signature").map_err(decode)?;
    let manager_signature: Option<serde_json::Value> =
        row.try_get("manager_signature").map_err(decode)?;

    Ok(SignatureRecord {
        id: RecordId::from_uuid(row.try_get("id").map_err(decode)?),
        employee_id: EmployeeId::from_uuid(row.try_get("employee_id").map_err(decode)?),
        status,
        employee_token: CapabilityToken::new(
            row.try_get::<String, _>("employee_token").map_err(decode)?,
        ),
        manager_token: CapabilityToken::new(
            row.try_get::<String, _>("manager_token").map_err(decode)?,
        ),
        employee_token_expires_at: row
            .try_get::<Option<DateTime<Utc>>, _>("employee_token_expires_at")
            .map_err(decode)?,
        manager_token_expires_at: row
            .try_get::<Option<DateTime<Utc>>, _>("manager_token_expires_at")
            .map_err(decode)?,
        employee_signature: employee_signature
            .map(serde_json::from_value::<EmployeeSignature>)
            .transpose()
            .map_err(|e| RecordStoreError::Backend(format!("employee signature decode: {e}")))?,
        manager_signature: manager_signature
            .map(serde_json::from_value::<ManagerSignature>)
            .transpose()
            .map_err(|e| RecordStoreError::Backend(format!("manager signature decode: {e}")))?,
        initiated_by: UserId::from_uuid(row.try_get("initiated_by").map_err(decode)?),
        initiated_at: row.try_get("initiated_at").map_err(decode)?,
        completed_at: row.try_get("completed_at").map_err(decode)?,
        rejected_at: row.try_get("rejected_at").map_err(decode)?,
        rejection_reason: row.try_get("rejection_reason").map_err(decode)?,
        site_manager: ManagerContact {
            email: row.try_get("site_manager_email").map_err(decode)?,
            name: row.try_get("site_manager_name").map_err(decode)?,
        },
        version: row.try_get::<i64, _>("version").map_err(decode)? as u64,
    })
}

fn status_from_str(s: &str) -> Result<SignatureStatus, RecordStoreError> {
    match s {
        "draft" => Ok(SignatureStatus::Draft),
        "pending_employee" => Ok(SignatureStatus::PendingEmployee),
        "pending_manager" => Ok(SignatureStatus::PendingManager),
        "completed" => Ok(SignatureStatus::Completed),
        "rejected" => Ok(SignatureStatus::Rejected),
        other => Err(RecordStoreError::Backend(format!(
            "unknown status in store: {other}"
        ))),
    }
}

fn unique_violation_constraint(err: &sqlx::Error) -> Option<String> {
    if let sqlx::Error::Database(db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return Some(db_err.constraint().unwrap_or("unknown").to_string());
        }
    }
    None
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RecordStoreError {
    match err {
        sqlx::Error::Database(db_err) => RecordStoreError::Backend(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            RecordStoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => RecordStoreError::Backend(format!("{operation}: {other}")),
    }
}
