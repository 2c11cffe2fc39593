use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use passbook_infra::workflow::WorkflowError;

/// Map workflow failures onto the public error family.
///
/// Unknown token and wrong-role token are the same 404, so the API never
/// acts as an oracle for which tokens exist.
pub fn workflow_error_to_response(err: WorkflowError) -> axum::response::Response {
    match err {
        WorkflowError::NotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        WorkflowError::Expired => json_error(StatusCode::GONE, "expired", err.to_string()),
        WorkflowError::WrongState(wrong) => {
            json_error(StatusCode::BAD_REQUEST, "wrong_state", wrong.to_string())
        }
        WorkflowError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        WorkflowError::Store(e) => {
            tracing::error!(error = %e, "record store failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                "internal storage error",
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
