//! The signature workflow record: one per employee, the single source of
//! truth for the dual-party signing state machine.
//!
//! Transition guards live here as pure methods; token lookup, expiry
//! evaluation against the wall clock and persistence are layered on top by
//! the workflow in `passbook-infra`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use passbook_core::{DomainError, DomainResult, EmployeeId, Entity, RecordId, UserId};

use crate::error::{SigningError, WrongState};
use crate::token::{CapabilityToken, IssuedToken, LINK_TTL_DAYS, SignerRole};

/// Workflow status lifecycle.
///
/// `Draft` only ever arises from a watcher reset: records are created
/// directly in `PendingEmployee` by the first initiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Draft,
    PendingEmployee,
    PendingManager,
    Completed,
    Rejected,
}

impl SignatureStatus {
    /// Map "token valid, state wrong" to the message the signer should see.
    ///
    /// Returns `None` when the status is exactly the one `role` acts in.
    pub fn wrong_state_for(self, role: SignerRole) -> Option<WrongState> {
        match (role, self) {
            (SignerRole::Employee, SignatureStatus::PendingEmployee) => None,
            (SignerRole::Employee, SignatureStatus::PendingManager) => {
                Some(WrongState::AlreadySigned)
            }
            (SignerRole::Manager, SignatureStatus::PendingManager) => None,
            (SignerRole::Manager, SignatureStatus::PendingEmployee) => {
                Some(WrongState::AwaitingEmployee)
            }
            (_, SignatureStatus::Draft) => Some(WrongState::NotYourTurn),
            (_, SignatureStatus::Completed) => Some(WrongState::AlreadyCompleted),
            (_, SignatureStatus::Rejected) => Some(WrongState::AlreadyRejected),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SignatureStatus::Completed | SignatureStatus::Rejected)
    }
}

impl core::fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            SignatureStatus::Draft => "draft",
            SignatureStatus::PendingEmployee => "pending_employee",
            SignatureStatus::PendingManager => "pending_manager",
            SignatureStatus::Completed => "completed",
            SignatureStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Non-repudiation evidence of the employee's signing act.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeSignature {
    /// Rendered signature (data-URL or storage reference; opaque here).
    pub image: String,
    pub name: String,
    pub ip: String,
    pub signed_at: DateTime<Utc>,
}

/// Non-repudiation evidence of the manager's approval act.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSignature {
    pub image: String,
    pub name: String,
    pub title: String,
    pub ip: String,
    pub signed_at: DateTime<Utc>,
}

/// Destination for the manager link. The manager is nominated per workflow
/// and need not be a registered system user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerContact {
    pub email: String,
    pub name: String,
}

/// One signature workflow instance.
///
/// # Invariants
/// - `Completed` implies both evidentiary tuples are populated and
///   `completed_at` is set.
/// - `Draft` implies no evidentiary tuple and no token expiry.
/// - An employee expiry exists iff `PendingEmployee`; a manager expiry
///   exists iff `PendingManager`.
/// - Token uniqueness across records is enforced by the store, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub id: RecordId,
    pub employee_id: EmployeeId,
    pub status: SignatureStatus,

    pub employee_token: CapabilityToken,
    pub manager_token: CapabilityToken,
    pub employee_token_expires_at: Option<DateTime<Utc>>,
    pub manager_token_expires_at: Option<DateTime<Utc>>,

    pub employee_signature: Option<EmployeeSignature>,
    pub manager_signature: Option<ManagerSignature>,

    pub initiated_by: UserId,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,

    pub site_manager: ManagerContact,

    /// Store revision for conditional writes; bumped by the store on every
    /// successful upsert. 0 means "never persisted".
    pub version: u64,
}

impl Entity for SignatureRecord {
    type Id = RecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl SignatureRecord {
    /// Start a workflow for an employee with no prior record.
    pub fn initiate(
        employee_id: EmployeeId,
        site_manager: ManagerContact,
        initiated_by: UserId,
        employee_token: IssuedToken,
        manager_token: IssuedToken,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RecordId::new(),
            employee_id,
            status: SignatureStatus::PendingEmployee,
            employee_token: employee_token.token,
            manager_token: manager_token.token,
            employee_token_expires_at: employee_token.expires_at,
            manager_token_expires_at: manager_token.expires_at,
            employee_signature: None,
            manager_signature: None,
            initiated_by,
            initiated_at: now,
            completed_at: None,
            rejected_at: None,
            rejection_reason: None,
            site_manager,
            version: 0,
        }
    }

    /// Restart the workflow on an existing record.
    ///
    /// Legal from every state and always wins over in-flight signing: prior
    /// evidence, terminal metadata and both old tokens are discarded so
    /// stale links become provably dead.
    pub fn reinitiate(
        &mut self,
        site_manager: ManagerContact,
        initiated_by: UserId,
        employee_token: IssuedToken,
        manager_token: IssuedToken,
        now: DateTime<Utc>,
    ) {
        self.status = SignatureStatus::PendingEmployee;
        self.employee_token = employee_token.token;
        self.manager_token = manager_token.token;
        self.employee_token_expires_at = employee_token.expires_at;
        self.manager_token_expires_at = manager_token.expires_at;
        self.employee_signature = None;
        self.manager_signature = None;
        self.initiated_by = initiated_by;
        self.initiated_at = now;
        self.completed_at = None;
        self.rejected_at = None;
        self.rejection_reason = None;
        self.site_manager = site_manager;
    }

    /// Forced reset by the mutation watcher: the certificate set changed, so
    /// any in-progress or completed signature no longer attests to it.
    ///
    /// Both tokens are replaced (old links dead even if unexpired), both
    /// expiries nulled, all evidence and terminal metadata cleared. Not a
    /// field-level rollback but a full re-initialization to `Draft`.
    pub fn reset_to_draft(
        &mut self,
        employee_token: CapabilityToken,
        manager_token: CapabilityToken,
    ) {
        self.status = SignatureStatus::Draft;
        self.employee_token = employee_token;
        self.manager_token = manager_token;
        self.employee_token_expires_at = None;
        self.manager_token_expires_at = None;
        self.employee_signature = None;
        self.manager_signature = None;
        self.completed_at = None;
        self.rejected_at = None;
        self.rejection_reason = None;
    }

    /// Employee signs their own record.
    ///
    /// The employee link is retired (expiry cleared) and the manager link
    /// becomes live with a fresh 7-day window: this is the moment the
    /// previously expiry-less manager token starts counting down.
    pub fn employee_sign(
        &mut self,
        image: String,
        name: String,
        ip: String,
        now: DateTime<Utc>,
    ) -> Result<(), SigningError> {
        if let Some(wrong) = self.status.wrong_state_for(SignerRole::Employee) {
            return Err(wrong.into());
        }
        validate_signature_input(&image, &name)?;

        self.employee_signature = Some(EmployeeSignature {
            image,
            name,
            ip,
            signed_at: now,
        });
        self.status = SignatureStatus::PendingManager;
        self.employee_token_expires_at = None;
        self.manager_token_expires_at = Some(now + Duration::days(LINK_TTL_DAYS));
        Ok(())
    }

    /// Manager counter-signs; terminal until a certificate mutation forces
    /// a reset.
    pub fn manager_approve(
        &mut self,
        image: String,
        name: String,
        title: String,
        ip: String,
        now: DateTime<Utc>,
    ) -> Result<(), SigningError> {
        if let Some(wrong) = self.status.wrong_state_for(SignerRole::Manager) {
            return Err(wrong.into());
        }
        validate_signature_input(&image, &name)?;

        self.manager_signature = Some(ManagerSignature {
            image,
            name,
            title,
            ip,
            signed_at: now,
        });
        self.status = SignatureStatus::Completed;
        self.completed_at = Some(now);
        self.manager_token_expires_at = None;
        Ok(())
    }

    /// Manager declines. Terminal; the employee's signature stays on record
    /// as historical fact and no manager tuple is written.
    pub fn manager_reject(&mut self, reason: String, now: DateTime<Utc>) -> Result<(), SigningError> {
        if let Some(wrong) = self.status.wrong_state_for(SignerRole::Manager) {
            return Err(wrong.into());
        }

        self.status = SignatureStatus::Rejected;
        self.rejected_at = Some(now);
        self.rejection_reason = Some(reason);
        self.manager_token_expires_at = None;
        Ok(())
    }

    pub fn token_for(&self, role: SignerRole) -> &CapabilityToken {
        match role {
            SignerRole::Employee => &self.employee_token,
            SignerRole::Manager => &self.manager_token,
        }
    }

    pub fn expiry_for(&self, role: SignerRole) -> Option<DateTime<Utc>> {
        match role {
            SignerRole::Employee => self.employee_token_expires_at,
            SignerRole::Manager => self.manager_token_expires_at,
        }
    }

    /// Whether `role`'s link has an expiry that has already passed.
    ///
    /// A link with no expiry is never *expired*; it is simply not live, and
    /// the state guard reports that case instead.
    pub fn link_expired(&self, role: SignerRole, now: DateTime<Utc>) -> bool {
        matches!(self.expiry_for(role), Some(expiry) if now > expiry)
    }

    /// Tokenless view of the record for signers and staff.
    pub fn snapshot(&self) -> SignatureSnapshot {
        SignatureSnapshot {
            record_id: self.id,
            employee_id: self.employee_id,
            status: self.status,
            site_manager: self.site_manager.clone(),
            initiated_at: self.initiated_at,
            employee_signature: self.employee_signature.clone(),
            manager_signature: self.manager_signature.clone(),
            completed_at: self.completed_at,
            rejected_at: self.rejected_at,
            rejection_reason: self.rejection_reason.clone(),
        }
    }

    /// Check the per-record consistency rules (everything except cross-record
    /// token uniqueness, which only the store can see).
    pub fn verify_invariants(&self) -> DomainResult<()> {
        let no_terminal_metadata = self.completed_at.is_none()
            && self.rejected_at.is_none()
            && self.rejection_reason.is_none();

        match self.status {
            SignatureStatus::Draft => {
                if self.employee_signature.is_some() || self.manager_signature.is_some() {
                    return Err(DomainError::invariant("draft record carries signature evidence"));
                }
                if self.employee_token_expires_at.is_some()
                    || self.manager_token_expires_at.is_some()
                {
                    return Err(DomainError::invariant("draft record carries a live link"));
                }
                if !no_terminal_metadata {
                    return Err(DomainError::invariant("draft record carries terminal metadata"));
                }
            }
            SignatureStatus::PendingEmployee => {
                if self.employee_token_expires_at.is_none() {
                    return Err(DomainError::invariant(
                        "pending_employee record has no employee link window",
                    ));
                }
                if self.manager_token_expires_at.is_some() {
                    return Err(DomainError::invariant(
                        "manager link live before the employee signed",
                    ));
                }
                if self.employee_signature.is_some() || self.manager_signature.is_some() {
                    return Err(DomainError::invariant(
                        "pending_employee record carries signature evidence",
                    ));
                }
                if !no_terminal_metadata {
                    return Err(DomainError::invariant(
                        "pending_employee record carries terminal metadata",
                    ));
                }
            }
            SignatureStatus::PendingManager => {
                if self.manager_token_expires_at.is_none() {
                    return Err(DomainError::invariant(
                        "pending_manager record has no manager link window",
                    ));
                }
                if self.employee_token_expires_at.is_some() {
                    return Err(DomainError::invariant(
                        "employee link still live after signing",
                    ));
                }
                if self.employee_signature.is_none() {
                    return Err(DomainError::invariant(
                        "pending_manager record is missing the employee signature",
                    ));
                }
                if self.manager_signature.is_some() {
                    return Err(DomainError::invariant(
                        "manager signature present before approval",
                    ));
                }
                if !no_terminal_metadata {
                    return Err(DomainError::invariant(
                        "pending_manager record carries terminal metadata",
                    ));
                }
            }
            SignatureStatus::Completed => {
                if self.employee_signature.is_none() || self.manager_signature.is_none() {
                    return Err(DomainError::invariant(
                        "completed record is missing signature evidence",
                    ));
                }
                if self.completed_at.is_none() {
                    return Err(DomainError::invariant("completed record has no completed_at"));
                }
                if self.employee_token_expires_at.is_some()
                    || self.manager_token_expires_at.is_some()
                {
                    return Err(DomainError::invariant("completed record carries a live link"));
                }
                if self.rejected_at.is_some() || self.rejection_reason.is_some() {
                    return Err(DomainError::invariant(
                        "completed record carries rejection metadata",
                    ));
                }
            }
            SignatureStatus::Rejected => {
                if self.rejected_at.is_none() {
                    return Err(DomainError::invariant("rejected record has no rejected_at"));
                }
                if self.manager_signature.is_some() {
                    return Err(DomainError::invariant(
                        "rejected record carries a manager signature",
                    ));
                }
                if self.employee_token_expires_at.is_some()
                    || self.manager_token_expires_at.is_some()
                {
                    return Err(DomainError::invariant("rejected record carries a live link"));
                }
                if self.completed_at.is_some() {
                    return Err(DomainError::invariant(
                        "rejected record carries completion metadata",
                    ));
                }
            }
        }

        Ok(())
    }
}

fn validate_signature_input(image: &str, name: &str) -> Result<(), SigningError> {
    if image.trim().is_empty() {
        return Err(SigningError::validation("signature image is required"));
    }
    if name.trim().is_empty() {
        return Err(SigningError::validation("signer name is required"));
    }
    Ok(())
}

/// Read model of a record for signers and staff. Never contains tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureSnapshot {
    pub record_id: RecordId,
    pub employee_id: EmployeeId,
    pub status: SignatureStatus,
    pub site_manager: ManagerContact,
    pub initiated_at: DateTime<Utc>,
    pub employee_signature: Option<EmployeeSignature>,
    pub manager_signature: Option<ManagerSignature>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}
