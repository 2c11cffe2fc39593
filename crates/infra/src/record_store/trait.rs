use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use passbook_core::{EmployeeId, ExpectedVersion};
use passbook_signing::{CapabilityToken, SignatureRecord, SignerRole};

/// Record store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, uniqueness) as
/// opposed to the signing-domain taxonomy.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// Optimistic concurrency check failed (stale record version).
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    /// A second record for the same employee was attempted.
    #[error("employee already has a signature record: {0}")]
    DuplicateEmployee(String),

    /// A token value is already in use by another record (either column).
    #[error("token already in use: {0}")]
    DuplicateToken(String),

    /// Backend failure (pool, IO, decode).
    #[error("record store backend error: {0}")]
    Backend(String),
}

/// Persistence for signature workflow records.
///
/// One record per employee; the store is the single source of truth for
/// workflow state. Implementations must:
///
/// - enforce the one-record-per-employee rule,
/// - enforce token uniqueness **across both token columns of all records**
///   (a colliding link must never authorize two different transitions),
/// - apply `upsert` as a single atomic conditional write against
///   `expected` (this closes the race window between validating a token
///   and committing a transition),
/// - serve `find_by_token` from an index: it is the only authorization
///   check available to an unauthenticated caller, so it must be
///   O(1)-class, not a scan.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Option<SignatureRecord>, RecordStoreError>;

    /// Look up a record by the token column for `role` only.
    ///
    /// An employee token presented against the manager column (or vice
    /// versa) simply misses, which callers surface as not-found, the same
    /// answer as a token that never existed.
    async fn find_by_token(
        &self,
        role: SignerRole,
        token: &CapabilityToken,
    ) -> Result<Option<SignatureRecord>, RecordStoreError>;

    /// Whether a candidate token value is already held by any record, in
    /// either column. Used by the minting loop to re-draw on collision.
    async fn token_in_use(&self, token: &CapabilityToken) -> Result<bool, RecordStoreError>;

    /// Conditionally write a record.
    ///
    /// `ExpectedVersion::Exact(0)` means "must not exist yet" (insert).
    /// On success the stored record is returned with its version bumped.
    async fn upsert(
        &self,
        record: SignatureRecord,
        expected: ExpectedVersion,
    ) -> Result<SignatureRecord, RecordStoreError>;
}

#[async_trait]
impl<S> RecordStore for Arc<S>
where
    S: RecordStore + ?Sized,
{
    async fn find_by_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Option<SignatureRecord>, RecordStoreError> {
        (**self).find_by_employee(employee_id).await
    }

    async fn find_by_token(
        &self,
        role: SignerRole,
        token: &CapabilityToken,
    ) -> Result<Option<SignatureRecord>, RecordStoreError> {
        (**self).find_by_token(role, token).await
    }

    async fn token_in_use(&self, token: &CapabilityToken) -> Result<bool, RecordStoreError> {
        (**self).token_in_use(token).await
    }

    async fn upsert(
        &self,
        record: SignatureRecord,
        expected: ExpectedVersion,
    ) -> Result<SignatureRecord, RecordStoreError> {
        (**self).upsert(record, expected).await
    }
}
