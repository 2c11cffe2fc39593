//! API-side authorization guard for admin operations.
//!
//! This enforces authorization at the request boundary (before the workflow
//! is touched), while keeping domain and infra auth-agnostic. Signer
//! endpoints are not guarded here at all: their capability token *is* the
//! authorization, and conflating it with the session model would be wrong.

use passbook_auth::{
    AuthzError, CommandAuthorization, Permission, Principal, TenantMembership, authorize,
};

use crate::context::{PrincipalContext, TenantContext};

/// Check authorization for an admin operation in the current request context.
pub fn authorize_command<C: CommandAuthorization>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let membership = TenantMembership {
        tenant_id: tenant.tenant_id(),
        roles: principal.roles().to_vec(),
        permissions: permissions_from_roles(principal.roles()),
    };

    let principal = Principal {
        principal_id: principal.principal_id(),
        active_tenant_id: tenant.tenant_id(),
        membership,
    };

    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }

    Ok(())
}

/// Minimal role→permission mapping.
///
/// Convention: "admin" grants all permissions; "hr" may start signing
/// rounds. Intentionally simple until a real policy source exists (e.g.
/// DB-backed).
fn permissions_from_roles(roles: &[passbook_auth::Role]) -> Vec<Permission> {
    let mut permissions = Vec::new();
    for role in roles {
        match role.as_str() {
            "admin" => return vec![Permission::new("*")],
            "hr" => permissions.push(Permission::new("signature.initiate")),
            _ => {}
        }
    }
    permissions
}
