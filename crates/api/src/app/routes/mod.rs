use axum::{Router, routing::get};

pub mod common;
pub mod signature;
pub mod system;

/// Router for the unauthenticated signer surface (capability-token gated).
pub fn signer_router() -> Router {
    signature::signer_router()
}

/// Router for the authenticated (staff) surface.
pub fn admin_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .merge(signature::admin_router())
}
