//! Signature invalidation seam (the mutation watcher).
//!
//! Every operation in the hosting application that creates, updates or
//! archives a certificate must call this, synchronously, inside the same
//! transaction as the certificate mutation. A completed signature attests to
//! the exact certificate set that existed at signing time; once that set
//! changes, the attestation is void and a fresh signing round is required.
//!
//! Modeled as an explicit collaborator interface rather than ambient global
//! state so certificate-owning code takes it by injection and no mutation
//! path can skip it.

use std::sync::Arc;

use async_trait::async_trait;

use passbook_core::EmployeeId;

use crate::workflow::WorkflowError;

/// What the watcher did for an employee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationOutcome {
    /// No record, or already `Draft`: nothing to invalidate.
    Noop,
    /// The record was re-initialized to `Draft` with two fresh tokens.
    Reset,
}

#[async_trait]
pub trait SignatureInvalidator: Send + Sync {
    /// Invalidate any in-progress or completed signature for `employee_id`.
    async fn on_certificate_changed(
        &self,
        employee_id: EmployeeId,
    ) -> Result<InvalidationOutcome, WorkflowError>;
}

#[async_trait]
impl<T> SignatureInvalidator for Arc<T>
where
    T: SignatureInvalidator + ?Sized,
{
    async fn on_certificate_changed(
        &self,
        employee_id: EmployeeId,
    ) -> Result<InvalidationOutcome, WorkflowError> {
        (**self).on_certificate_changed(employee_id).await
    }
}
