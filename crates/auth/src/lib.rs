//! `passbook-auth` — pure authentication/authorization boundary.
//!
//! Guards the staff-facing admin surface only. Signers authenticate with
//! capability tokens (see `passbook-signing`), which are deliberately a
//! different mechanism from the session model here.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::Permission;
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
