//! `passbook-signing` — the dual-party training-passport signature workflow.
//!
//! Pure domain crate: the signature record state machine, capability tokens
//! and the signing error taxonomy. No IO; persistence and side effects live
//! in `passbook-infra`.

pub mod error;
pub mod record;
pub mod token;

pub use error::{SigningError, WrongState};
pub use record::{
    EmployeeSignature, ManagerContact, ManagerSignature, SignatureRecord, SignatureSnapshot,
    SignatureStatus,
};
pub use token::{CapabilityToken, IssuedToken, RandomTokenIssuer, SignerRole, TokenIssuer, LINK_TTL_DAYS};
