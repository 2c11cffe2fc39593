//! Capability tokens: single-purpose bearer credentials for one signing step.
//!
//! A token grants its bearer the right to perform exactly the next
//! transition for one employee's record, within a validity window. It is
//! the only authorization available to an unauthenticated signer, so token
//! values are treated as secrets throughout (redacted `Debug`, never logged).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which of the two signing parties a token belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerRole {
    Employee,
    Manager,
}

impl core::fmt::Display for SignerRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SignerRole::Employee => f.write_str("employee"),
            SignerRole::Manager => f.write_str("manager"),
        }
    }
}

/// Validity window of a signing link, in days.
pub const LINK_TTL_DAYS: i64 = 7;

/// Number of random bytes per token. 256 bits of CSPRNG output makes
/// brute-force guessing infeasible at any realistic traffic volume.
const TOKEN_BYTES: usize = 32;

/// Opaque, unguessable bearer token.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityToken(String);

impl CapabilityToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token value. Only for link composition and store lookups;
    /// must never end up in logs or snapshots.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for CapabilityToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Redacted: enough to correlate in a debugger, useless to an attacker.
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "CapabilityToken({prefix}…)")
    }
}

/// A freshly minted token together with its expiry, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: CapabilityToken,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Token minting seam.
///
/// Global uniqueness is not this trait's job: the workflow checks each
/// candidate against the store and re-draws on collision.
pub trait TokenIssuer: Send + Sync {
    /// Mint a token for `role`.
    ///
    /// Employee tokens are born with a 7-day expiry. Manager tokens are born
    /// with **no** expiry: a manager link is meaningless, and must not be
    /// guessable-valid, before the employee has acted. It receives its 7-day
    /// window at the moment of employee sign.
    fn issue(&self, role: SignerRole, now: DateTime<Utc>) -> IssuedToken;
}

impl<T> TokenIssuer for std::sync::Arc<T>
where
    T: TokenIssuer + ?Sized,
{
    fn issue(&self, role: SignerRole, now: DateTime<Utc>) -> IssuedToken {
        (**self).issue(role, now)
    }
}

/// Production issuer: OS CSPRNG, URL-safe base64 (the token travels in a
/// path segment of the emailed link).
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTokenIssuer;

impl TokenIssuer for RandomTokenIssuer {
    fn issue(&self, role: SignerRole, now: DateTime<Utc>) -> IssuedToken {
        use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
        use rand::RngCore;

        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = CapabilityToken::new(URL_SAFE_NO_PAD.encode(bytes));

        let expires_at = match role {
            SignerRole::Employee => Some(now + Duration::days(LINK_TTL_DAYS)),
            SignerRole::Manager => None,
        };

        IssuedToken { token, expires_at }
    }
}
