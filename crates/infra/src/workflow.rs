//! Signature workflow orchestration (application-level).
//!
//! Every public operation here is one logical unit over the record store:
//!
//! ```text
//! Request
//!   ↓
//! 1. Find the record (by capability token, or by employee for staff calls)
//!   ↓
//! 2. Validate the caller's authority (token column, expiry, current state)
//!   ↓
//! 3. Apply the pure transition on the record (passbook-signing)
//!   ↓
//! 4. Persist with a conditional write (expected version)
//!   ↓
//! 5. Fire side effects (notification best-effort, audit fire-and-forget)
//! ```
//!
//! The conditional write closes the race window between validating a token
//! and committing its transition: of two concurrent submissions against the
//! same link, exactly one commits; the loser's conflict is translated into
//! the `WrongState` its request would have seen a moment later, never into a
//! generic conflict error.

use chrono::Utc;
use thiserror::Error;

use passbook_core::{EmployeeId, ExpectedVersion, UserId};
use passbook_signing::{
    CapabilityToken, ManagerContact, SignatureRecord, SignatureSnapshot, SignatureStatus,
    SignerRole, SigningError, TokenIssuer, WrongState,
};

use crate::audit::{AuditAction, AuditEmitter, AuditEntry};
use crate::invalidator::{InvalidationOutcome, SignatureInvalidator};
use crate::notify::{LinkBuilder, NotificationDispatcher, SignatureNotice};
use crate::record_store::{RecordStore, RecordStoreError};

/// Retry budget for minting a globally unique token. At 256 bits of
/// randomness a single collision is already implausible; exhausting the
/// budget indicates a broken RNG or store.
const MINT_ATTEMPTS: usize = 5;

/// Retry budget for operations that must win against concurrent writers
/// (initiation restarts, watcher resets).
const WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The presented token matches no record in the expected role column.
    #[error("signing link not recognized")]
    NotFound,

    /// The token matched but its validity window has passed.
    #[error("this signing link has expired; please contact HR to restart the signing process")]
    Expired,

    /// Token valid and unexpired, but the record is not in the state this
    /// operation expects.
    #[error("{0}")]
    WrongState(WrongState),

    /// Missing signature evidence on a sign/approve call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Persistence failed.
    #[error(transparent)]
    Store(RecordStoreError),
}

impl From<SigningError> for WorkflowError {
    fn from(value: SigningError) -> Self {
        match value {
            SigningError::NotFound => WorkflowError::NotFound,
            SigningError::Expired => WorkflowError::Expired,
            SigningError::WrongState(wrong) => WorkflowError::WrongState(wrong),
            SigningError::Validation(msg) => WorkflowError::Validation(msg),
        }
    }
}

impl From<RecordStoreError> for WorkflowError {
    fn from(value: RecordStoreError) -> Self {
        WorkflowError::Store(value)
    }
}

/// Result of an initiation: the snapshot plus the freshly minted employee
/// token, exposed for operational/testing visibility (production delivery is
/// the notification dispatcher's job).
#[derive(Debug, Clone)]
pub struct InitiatedWorkflow {
    pub snapshot: SignatureSnapshot,
    pub employee_token: CapabilityToken,
}

/// The dual-party signature workflow.
///
/// Generic over its four seams so tests can compose an in-memory store with
/// the production issuer, a recording notifier, etc., without touching the
/// orchestration logic.
#[derive(Debug)]
pub struct SignatureWorkflow<S, T, N, A> {
    store: S,
    issuer: T,
    notifier: N,
    audit: A,
    links: LinkBuilder,
}

impl<S, T, N, A> SignatureWorkflow<S, T, N, A> {
    pub fn new(store: S, issuer: T, notifier: N, audit: A, links: LinkBuilder) -> Self {
        Self {
            store,
            issuer,
            notifier,
            audit,
            links,
        }
    }
}

impl<S, T, N, A> SignatureWorkflow<S, T, N, A>
where
    S: RecordStore,
    T: TokenIssuer,
    N: NotificationDispatcher,
    A: AuditEmitter,
{
    /// Start (or restart) the workflow for one employee.
    ///
    /// Re-initiation is legal from every state and always wins over any
    /// in-flight signing round: fresh tokens are minted, prior evidence and
    /// terminal metadata are cleared, and the old links die with their
    /// tokens. Precondition that the employee exists and is reachable by
    /// email is the caller's job (employees are owned by a collaborator).
    pub async fn initiate(
        &self,
        employee_id: EmployeeId,
        site_manager: ManagerContact,
        initiated_by: UserId,
    ) -> Result<InitiatedWorkflow, WorkflowError> {
        for _ in 0..WRITE_ATTEMPTS {
            let now = Utc::now();
            let employee_token = self.mint_unique(SignerRole::Employee, now).await?;
            let manager_token = self.mint_unique(SignerRole::Manager, now).await?;

            let (record, expected) = match self.store.find_by_employee(employee_id).await? {
                Some(mut existing) => {
                    let expected = ExpectedVersion::Exact(existing.version);
                    existing.reinitiate(
                        site_manager.clone(),
                        initiated_by,
                        employee_token,
                        manager_token,
                        now,
                    );
                    (existing, expected)
                }
                None => (
                    SignatureRecord::initiate(
                        employee_id,
                        site_manager.clone(),
                        initiated_by,
                        employee_token,
                        manager_token,
                        now,
                    ),
                    ExpectedVersion::Exact(0),
                ),
            };

            let stored = match self.store.upsert(record, expected).await {
                Ok(stored) => stored,
                // Someone else moved the record between read and write;
                // restart wins, so go around and re-initiate on top of the
                // newer state. A token collision that slipped past the mint
                // check is handled the same way: fresh tokens next round.
                Err(RecordStoreError::Conflict(_))
                | Err(RecordStoreError::DuplicateEmployee(_))
                | Err(RecordStoreError::DuplicateToken(_)) => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            tracing::info!(
                %employee_id,
                record_id = %stored.id,
                status = %stored.status,
                "signature workflow initiated"
            );

            self.notify(SignatureNotice::EmployeeSignatureRequested {
                employee_id,
                link: self.links.employee_link(&stored.employee_token),
            });

            let employee_token = stored.employee_token.clone();
            return Ok(InitiatedWorkflow {
                snapshot: stored.snapshot(),
                employee_token,
            });
        }

        Err(WorkflowError::Store(RecordStoreError::Conflict(
            "initiation kept losing to concurrent writers".to_string(),
        )))
    }

    /// Employee inspects their record through the emailed link.
    pub async fn view_as_employee(
        &self,
        token: &CapabilityToken,
    ) -> Result<SignatureSnapshot, WorkflowError> {
        let record = self.load_for(SignerRole::Employee, token).await?;
        if let Some(wrong) = record.status.wrong_state_for(SignerRole::Employee) {
            return Err(WorkflowError::WrongState(wrong));
        }
        Ok(record.snapshot())
    }

    /// Employee signs their record.
    pub async fn sign_as_employee(
        &self,
        token: &CapabilityToken,
        signature_image: String,
        signature_name: String,
        caller_ip: String,
    ) -> Result<SignatureSnapshot, WorkflowError> {
        let mut record = self.load_for(SignerRole::Employee, token).await?;
        let now = Utc::now();
        let expected = ExpectedVersion::Exact(record.version);

        record.employee_sign(signature_image, signature_name, caller_ip, now)?;

        let stored = match self.store.upsert(record, expected).await {
            Ok(stored) => stored,
            Err(RecordStoreError::Conflict(_)) => {
                return Err(self.after_lost_race(SignerRole::Employee, token).await);
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            employee_id = %stored.employee_id,
            record_id = %stored.id,
            status = %stored.status,
            "employee signed; manager link is now live"
        );

        self.notify(SignatureNotice::ManagerApprovalRequested {
            employee_id: stored.employee_id,
            to: stored.site_manager.clone(),
            link: self.links.manager_link(&stored.manager_token),
        });

        Ok(stored.snapshot())
    }

    /// Manager reviews the record, the employee's signature included.
    pub async fn view_as_manager(
        &self,
        token: &CapabilityToken,
    ) -> Result<SignatureSnapshot, WorkflowError> {
        let record = self.load_for(SignerRole::Manager, token).await?;
        if let Some(wrong) = record.status.wrong_state_for(SignerRole::Manager) {
            return Err(WorkflowError::WrongState(wrong));
        }
        Ok(record.snapshot())
    }

    /// Manager approves: the workflow completes and becomes immutable until
    /// a certificate mutation forces a reset.
    pub async fn approve_as_manager(
        &self,
        token: &CapabilityToken,
        signature_image: String,
        signature_name: String,
        signature_title: String,
        caller_ip: String,
    ) -> Result<SignatureSnapshot, WorkflowError> {
        let mut record = self.load_for(SignerRole::Manager, token).await?;
        let now = Utc::now();
        let expected = ExpectedVersion::Exact(record.version);

        let actor_name = signature_name.clone();
        record.manager_approve(
            signature_image,
            signature_name,
            signature_title,
            caller_ip.clone(),
            now,
        )?;

        let stored = match self.store.upsert(record, expected).await {
            Ok(stored) => stored,
            Err(RecordStoreError::Conflict(_)) => {
                return Err(self.after_lost_race(SignerRole::Manager, token).await);
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            employee_id = %stored.employee_id,
            record_id = %stored.id,
            "signature workflow completed"
        );

        self.audit.emit(AuditEntry {
            record_id: stored.id,
            employee_id: stored.employee_id,
            action: AuditAction::WorkflowCompleted,
            actor_name,
            actor_ip: Some(caller_ip),
            occurred_at: now,
        });
        self.notify(SignatureNotice::WorkflowCompleted {
            employee_id: stored.employee_id,
        });

        Ok(stored.snapshot())
    }

    /// Manager declines. Terminal; the employee's signature stays on record.
    pub async fn reject_as_manager(
        &self,
        token: &CapabilityToken,
        reason: String,
    ) -> Result<SignatureSnapshot, WorkflowError> {
        let mut record = self.load_for(SignerRole::Manager, token).await?;
        let now = Utc::now();
        let expected = ExpectedVersion::Exact(record.version);

        record.manager_reject(reason.clone(), now)?;

        let stored = match self.store.upsert(record, expected).await {
            Ok(stored) => stored,
            Err(RecordStoreError::Conflict(_)) => {
                return Err(self.after_lost_race(SignerRole::Manager, token).await);
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            employee_id = %stored.employee_id,
            record_id = %stored.id,
            "signature workflow rejected"
        );

        self.audit.emit(AuditEntry {
            record_id: stored.id,
            employee_id: stored.employee_id,
            action: AuditAction::WorkflowRejected,
            actor_name: stored.site_manager.name.clone(),
            actor_ip: None,
            occurred_at: now,
        });
        self.notify(SignatureNotice::WorkflowRejected {
            employee_id: stored.employee_id,
            reason,
        });

        Ok(stored.snapshot())
    }

    /// Staff read of an employee's current workflow state.
    pub async fn status_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Option<SignatureSnapshot>, WorkflowError> {
        Ok(self
            .store
            .find_by_employee(employee_id)
            .await?
            .map(|record| record.snapshot()))
    }

    /// Find the record behind a token and evaluate its validity window.
    ///
    /// Check order matters: an expired-but-matching link reports `Expired`,
    /// never `WrongState`, so the signer learns their link is dead, not a
    /// confusing message about someone else's progress.
    async fn load_for(
        &self,
        role: SignerRole,
        token: &CapabilityToken,
    ) -> Result<SignatureRecord, WorkflowError> {
        let record = self
            .store
            .find_by_token(role, token)
            .await?
            .ok_or(WorkflowError::NotFound)?;

        if record.link_expired(role, Utc::now()) {
            return Err(WorkflowError::Expired);
        }

        Ok(record)
    }

    /// Translate a lost conditional write into what the loser would have
    /// seen had it arrived a moment later.
    async fn after_lost_race(&self, role: SignerRole, token: &CapabilityToken) -> WorkflowError {
        match self.store.find_by_token(role, token).await {
            Ok(Some(record)) => match record.status.wrong_state_for(role) {
                Some(wrong) => WorkflowError::WrongState(wrong),
                // The record is somehow back in this role's state (e.g. a
                // racing re-initiation that kept the token; not possible
                // today, but be conservative): tell the caller to retry.
                None => WorkflowError::WrongState(WrongState::NotYourTurn),
            },
            // Tokens were rotated out from under the caller; their link is
            // dead, same as never having existed.
            _ => WorkflowError::NotFound,
        }
    }

    async fn mint_unique(
        &self,
        role: SignerRole,
        now: chrono::DateTime<Utc>,
    ) -> Result<passbook_signing::IssuedToken, WorkflowError> {
        for _ in 0..MINT_ATTEMPTS {
            let issued = self.issuer.issue(role, now);
            if !self.store.token_in_use(&issued.token).await? {
                return Ok(issued);
            }
        }
        Err(WorkflowError::Store(RecordStoreError::DuplicateToken(
            "token minting exhausted its retry budget".to_string(),
        )))
    }

    fn notify(&self, notice: SignatureNotice) {
        if let Err(e) = self.notifier.dispatch(notice) {
            // Best-effort by design: the transition is already committed and
            // must not be rolled back over a delivery problem.
            tracing::warn!(error = %e, "notification dispatch failed");
        }
    }
}

#[async_trait::async_trait]
impl<S, T, N, A> SignatureInvalidator for SignatureWorkflow<S, T, N, A>
where
    S: RecordStore,
    T: TokenIssuer,
    N: NotificationDispatcher,
    A: AuditEmitter,
{
    /// Force an in-progress or completed signature back to `Draft` because
    /// the employee's certificate set changed.
    ///
    /// A lost version race is retried against the re-read record rather than
    /// surfaced: the reset must never be skipped, or a signature could keep
    /// attesting to a certificate set that no longer exists.
    async fn on_certificate_changed(
        &self,
        employee_id: EmployeeId,
    ) -> Result<InvalidationOutcome, WorkflowError> {
        for _ in 0..WRITE_ATTEMPTS {
            let Some(mut record) = self.store.find_by_employee(employee_id).await? else {
                return Ok(InvalidationOutcome::Noop);
            };
            if record.status == SignatureStatus::Draft {
                return Ok(InvalidationOutcome::Noop);
            }

            let now = Utc::now();
            let expected = ExpectedVersion::Exact(record.version);
            let employee_token = self.mint_unique(SignerRole::Employee, now).await?.token;
            let manager_token = self.mint_unique(SignerRole::Manager, now).await?.token;
            record.reset_to_draft(employee_token, manager_token);

            match self.store.upsert(record, expected).await {
                Ok(stored) => {
                    tracing::info!(
                        %employee_id,
                        record_id = %stored.id,
                        "certificate change invalidated the signature record"
                    );
                    return Ok(InvalidationOutcome::Reset);
                }
                Err(RecordStoreError::Conflict(_)) | Err(RecordStoreError::DuplicateToken(_)) => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(WorkflowError::Store(RecordStoreError::Conflict(
            "invalidation kept losing to concurrent writers".to_string(),
        )))
    }
}
