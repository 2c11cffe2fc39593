//! Signature workflow routes.
//!
//! Two surfaces share this module:
//! - the unauthenticated signer surface, where the capability token in the
//!   URL path is the entire authorization;
//! - the staff surface, JWT-gated, for initiating workflows and reading
//!   their status.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use uuid::Uuid;

use passbook_auth::Permission;
use passbook_core::{EmployeeId, UserId};
use passbook_signing::{CapabilityToken, ManagerContact};

use crate::app::routes::common::{CmdAuth, client_ip};
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn signer_router() -> Router {
    Router::new()
        .route(
            "/signature/employee/:token",
            get(view_as_employee).post(sign_as_employee),
        )
        .route(
            "/signature/manager/:token",
            get(view_as_manager).post(act_as_manager),
        )
}

pub fn admin_router() -> Router {
    Router::new().route("/signature", post(initiate_signature).get(signature_status))
}

async fn view_as_employee(
    Extension(services): Extension<Arc<AppServices>>,
    Path(token): Path<String>,
) -> axum::response::Response {
    let token = CapabilityToken::new(token);
    match services.view_as_employee(&token).await {
        Ok(snapshot) => {
            (StatusCode::OK, Json(dto::employee_view_to_json(&snapshot))).into_response()
        }
        Err(e) => errors::workflow_error_to_response(e),
    }
}

async fn sign_as_employee(
    Extension(services): Extension<Arc<AppServices>>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(body): Json<dto::EmployeeSignRequest>,
) -> axum::response::Response {
    let token = CapabilityToken::new(token);
    let caller_ip = client_ip(&headers);

    match services
        .sign_as_employee(&token, body.signature_image, body.signature_name, caller_ip)
        .await
    {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": "signature recorded; your manager has been asked to counter-sign",
                "status": snapshot.status,
            })),
        )
            .into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

async fn view_as_manager(
    Extension(services): Extension<Arc<AppServices>>,
    Path(token): Path<String>,
) -> axum::response::Response {
    let token = CapabilityToken::new(token);
    match services.view_as_manager(&token).await {
        Ok(snapshot) => {
            (StatusCode::OK, Json(dto::manager_view_to_json(&snapshot))).into_response()
        }
        Err(e) => errors::workflow_error_to_response(e),
    }
}

async fn act_as_manager(
    Extension(services): Extension<Arc<AppServices>>,
    Path(token): Path<String>,
    headers: HeaderMap,
    Json(body): Json<dto::ManagerActionRequest>,
) -> axum::response::Response {
    let token = CapabilityToken::new(token);

    let result = match body.action {
        dto::ManagerAction::Approve => {
            let caller_ip = client_ip(&headers);
            services
                .approve_as_manager(
                    &token,
                    body.signature_image.unwrap_or_default(),
                    body.signature_name.unwrap_or_default(),
                    body.signature_title.unwrap_or_default(),
                    caller_ip,
                )
                .await
        }
        dto::ManagerAction::Reject => {
            services
                .reject_as_manager(&token, body.rejection_reason.unwrap_or_default())
                .await
        }
    };

    match result {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": match body.action {
                    dto::ManagerAction::Approve => "signature approved; the passport is now validated",
                    dto::ManagerAction::Reject => "signature rejected; the employee has been notified",
                },
                "status": snapshot.status,
            })),
        )
            .into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

async fn initiate_signature(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<crate::context::TenantContext>,
    Extension(principal): Extension<crate::context::PrincipalContext>,
    Json(body): Json<dto::InitiateSignatureRequest>,
) -> axum::response::Response {
    let employee_id: EmployeeId = match body.employee_id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid employee id");
        }
    };

    if body.site_manager_email.trim().is_empty() || !body.site_manager_email.contains('@') {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "siteManagerEmail must be a valid email address",
        );
    }

    let cmd_auth = CmdAuth {
        inner: body,
        required: vec![Permission::new("signature.initiate")],
    };
    if let Err(e) = crate::authz::authorize_command(&tenant, &principal, &cmd_auth) {
        return errors::json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string());
    }

    let site_manager = ManagerContact {
        email: cmd_auth.inner.site_manager_email,
        name: cmd_auth.inner.site_manager_name,
    };
    let initiated_by = UserId::from_uuid(Uuid::from(principal.principal_id()));

    match services
        .initiate(employee_id, site_manager, initiated_by)
        .await
    {
        // The employee token is returned for operational/testing visibility
        // only; production delivery goes through the notification dispatcher.
        Ok(initiated) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "recordId": initiated.snapshot.record_id.to_string(),
                "employeeId": initiated.snapshot.employee_id.to_string(),
                "status": initiated.snapshot.status,
                "employeeToken": initiated.employee_token.as_str(),
            })),
        )
            .into_response(),
        Err(e) => errors::workflow_error_to_response(e),
    }
}

// Read-only profile status: any authenticated staff member may see where an
// employee's passport stands; only initiation is privileged.
async fn signature_status(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::StatusQuery>,
) -> axum::response::Response {
    let employee_id: EmployeeId = match query.employee_id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid employee id");
        }
    };

    match services.status_for_employee(employee_id).await {
        Ok(Some(snapshot)) => {
            (StatusCode::OK, Json(dto::status_to_json(&snapshot))).into_response()
        }
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "no signature record for this employee",
        ),
        Err(e) => errors::workflow_error_to_response(e),
    }
}
