//! Signing error taxonomy.
//!
//! Every variant here is a terminal, user-facing, non-retryable condition:
//! the workflow performs no synchronous external calls, so there is no
//! transient-error/retry policy at this layer.

use thiserror::Error;

/// The record is in a legal state, just not the one this operation expects.
///
/// Subdivided so the HTTP layer can show the signer a message that matches
/// what actually happened, instead of a generic conflict.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum WrongState {
    /// The record has been reset to draft; the link the caller holds no
    /// longer corresponds to an open signing round.
    #[error("this record is not ready for signing yet")]
    NotYourTurn,

    /// The employee already signed; their link has served its purpose.
    #[error("you have already signed this record")]
    AlreadySigned,

    /// The manager followed their link before the employee acted.
    #[error("the employee has not signed this record yet")]
    AwaitingEmployee,

    #[error("this record has already been completed")]
    AlreadyCompleted,

    #[error("this record has already been rejected")]
    AlreadyRejected,
}

/// Failure of a signing operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// The presented token matches no record. Unknown tokens and tokens for
    /// the other signer role are deliberately indistinguishable, so callers
    /// cannot probe which tokens exist.
    #[error("signing link not recognized")]
    NotFound,

    /// The token matched, but its validity window has passed. Restarting
    /// requires a fresh initiation by staff.
    #[error("this signing link has expired; please contact HR to restart the signing process")]
    Expired,

    /// Token valid and unexpired, but the record is not in the state this
    /// operation expects.
    #[error("{0}")]
    WrongState(WrongState),

    /// Missing or malformed signature evidence on a sign/approve call.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl SigningError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<WrongState> for SigningError {
    fn from(value: WrongState) -> Self {
        Self::WrongState(value)
    }
}
