use serde::Deserialize;
use serde_json::json;

use passbook_signing::SignatureSnapshot;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateSignatureRequest {
    pub employee_id: String,
    pub site_manager_email: String,
    pub site_manager_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeSignRequest {
    pub signature_image: String,
    pub signature_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ManagerAction {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerActionRequest {
    pub action: ManagerAction,
    #[serde(default)]
    pub signature_image: Option<String>,
    #[serde(default)]
    pub signature_name: Option<String>,
    #[serde(default)]
    pub signature_title: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub employee_id: String,
}

// -------------------------
// Response mapping
// -------------------------

/// What the employee sees behind their link: their identity reference,
/// current status and who will counter-sign. Certificate content is joined
/// in by the collaborator that owns it; tokens never appear.
pub fn employee_view_to_json(snapshot: &SignatureSnapshot) -> serde_json::Value {
    json!({
        "employeeId": snapshot.employee_id.to_string(),
        "status": snapshot.status,
        "siteManagerName": snapshot.site_manager.name,
        "initiatedAt": snapshot.initiated_at,
    })
}

/// What the manager sees: the employee view plus the employee's signature
/// evidence for review.
pub fn manager_view_to_json(snapshot: &SignatureSnapshot) -> serde_json::Value {
    json!({
        "employeeId": snapshot.employee_id.to_string(),
        "status": snapshot.status,
        "initiatedAt": snapshot.initiated_at,
        "employeeSignature": snapshot.employee_signature.as_ref().map(|sig| json!({
            "image": sig.image,
            "name": sig.name,
            "signedAt": sig.signed_at,
        })),
    })
}

/// Staff-facing status for the employee profile page.
pub fn status_to_json(snapshot: &SignatureSnapshot) -> serde_json::Value {
    json!({
        "recordId": snapshot.record_id.to_string(),
        "employeeId": snapshot.employee_id.to_string(),
        "status": snapshot.status,
        "siteManagerEmail": snapshot.site_manager.email,
        "siteManagerName": snapshot.site_manager.name,
        "initiatedAt": snapshot.initiated_at,
        "employeeSignedAt": snapshot.employee_signature.as_ref().map(|sig| sig.signed_at),
        "managerSignedAt": snapshot.manager_signature.as_ref().map(|sig| sig.signed_at),
        "completedAt": snapshot.completed_at,
        "rejectedAt": snapshot.rejected_at,
        "rejectionReason": snapshot.rejection_reason,
    })
}
