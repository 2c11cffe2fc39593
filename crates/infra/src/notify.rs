//! Notification seam.
//!
//! The workflow only decides *that* a notification is due and *what* link to
//! send; delivery (email templates, SMTP, queues) belongs to the hosting
//! application. Dispatch is best-effort by contract: a failure is logged and
//! never rolls back the state transition that triggered it: the signature
//! itself is the legally relevant fact, the link delivery is not.

use std::sync::Arc;

use thiserror::Error;

use passbook_core::EmployeeId;
use passbook_signing::{CapabilityToken, ManagerContact};

/// Composes the public signing links out of the externally supplied base URL.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    base_url: String,
}

impl LinkBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    pub fn employee_link(&self, token: &CapabilityToken) -> String {
        format!("{}/signature/employee/{}", self.base_url, token.as_str())
    }

    pub fn manager_link(&self, token: &CapabilityToken) -> String {
        format!("{}/signature/manager/{}", self.base_url, token.as_str())
    }
}

/// A notification the workflow has decided is due.
#[derive(Debug, Clone)]
pub enum SignatureNotice {
    /// The employee should receive their signing link. Their address is
    /// resolved by the dispatcher (employee contact data lives outside this
    /// subsystem).
    EmployeeSignatureRequested { employee_id: EmployeeId, link: String },

    /// The nominated manager should receive the approval link.
    ManagerApprovalRequested {
        employee_id: EmployeeId,
        to: ManagerContact,
        link: String,
    },

    /// The workflow reached `Completed`; tell the employee.
    WorkflowCompleted { employee_id: EmployeeId },

    /// The manager declined; tell the employee why.
    WorkflowRejected {
        employee_id: EmployeeId,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel failed: {0}")]
    Channel(String),
}

pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, notice: SignatureNotice) -> Result<(), NotifyError>;
}

impl<N> NotificationDispatcher for Arc<N>
where
    N: NotificationDispatcher + ?Sized,
{
    fn dispatch(&self, notice: SignatureNotice) -> Result<(), NotifyError> {
        (**self).dispatch(notice)
    }
}

/// Dev/test dispatcher: stands in for the email sender by logging what would
/// have been sent, links included, so an operator can drive the flow by hand.
#[derive(Debug, Default)]
pub struct LoggingDispatcher;

impl NotificationDispatcher for LoggingDispatcher {
    fn dispatch(&self, notice: SignatureNotice) -> Result<(), NotifyError> {
        match notice {
            SignatureNotice::EmployeeSignatureRequested { employee_id, link } => {
                tracing::info!(%employee_id, %link, "would email signing link to employee");
            }
            SignatureNotice::ManagerApprovalRequested {
                employee_id,
                to,
                link,
            } => {
                tracing::info!(
                    %employee_id,
                    manager_email = %to.email,
                    %link,
                    "would email approval link to manager"
                );
            }
            SignatureNotice::WorkflowCompleted { employee_id } => {
                tracing::info!(%employee_id, "would email completion notice to employee");
            }
            SignatureNotice::WorkflowRejected {
                employee_id,
                reason,
            } => {
                tracing::info!(%employee_id, %reason, "would email rejection notice to employee");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passbook_signing::{RandomTokenIssuer, SignerRole, TokenIssuer};

    #[test]
    fn links_embed_the_token_under_the_role_path() {
        let links = LinkBuilder::new("https://passbook.example.com/");
        let token = RandomTokenIssuer
            .issue(SignerRole::Employee, chrono::Utc::now())
            .token;

        let link = links.employee_link(&token);
        assert_eq!(
            link,
            format!(
                "https://passbook.example.com/signature/employee/{}",
                token.as_str()
            )
        );
        assert!(links.manager_link(&token).contains("/signature/manager/"));
    }
}
