use std::sync::Arc;

use sqlx::PgPool;

use passbook_core::{EmployeeId, UserId};
use passbook_infra::audit::LoggingAuditEmitter;
use passbook_infra::notify::{LinkBuilder, LoggingDispatcher};
use passbook_infra::record_store::{InMemoryRecordStore, PostgresRecordStore};
use passbook_infra::workflow::{InitiatedWorkflow, SignatureWorkflow, WorkflowError};
use passbook_signing::{CapabilityToken, ManagerContact, RandomTokenIssuer, SignatureSnapshot};

type InMemoryWorkflow = SignatureWorkflow<
    Arc<InMemoryRecordStore>,
    RandomTokenIssuer,
    Arc<LoggingDispatcher>,
    Arc<LoggingAuditEmitter>,
>;

type PersistentWorkflow = SignatureWorkflow<
    Arc<PostgresRecordStore>,
    RandomTokenIssuer,
    Arc<LoggingDispatcher>,
    Arc<LoggingAuditEmitter>,
>;

/// Service wiring for the API: one workflow instance over the selected
/// store implementation.
#[derive(Clone)]
pub enum AppServices {
    InMemory { workflow: Arc<InMemoryWorkflow> },
    Persistent { workflow: Arc<PersistentWorkflow> },
}

pub async fn build_services() -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    // Link base URL is supplied by the hosting environment; this subsystem
    // only composes paths under it.
    let links = LinkBuilder::new(
        std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
    );

    if use_persistent {
        return build_persistent_services(links).await;
    }
    build_in_memory_services(links)
}

fn build_in_memory_services(links: LinkBuilder) -> AppServices {
    let store = Arc::new(InMemoryRecordStore::new());
    let workflow = Arc::new(SignatureWorkflow::new(
        store,
        RandomTokenIssuer,
        Arc::new(LoggingDispatcher),
        Arc::new(LoggingAuditEmitter),
        links,
    ));
    AppServices::InMemory { workflow }
}

async fn build_persistent_services(links: LinkBuilder) -> AppServices {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");

    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to Postgres");

    let store = PostgresRecordStore::new(pool);
    store
        .ensure_schema()
        .await
        .expect("Failed to ensure signature_records schema");

    let workflow = Arc::new(SignatureWorkflow::new(
        Arc::new(store),
        RandomTokenIssuer,
        Arc::new(LoggingDispatcher),
        Arc::new(LoggingAuditEmitter),
        links,
    ));
    AppServices::Persistent { workflow }
}

impl AppServices {
    pub async fn initiate(
        &self,
        employee_id: EmployeeId,
        site_manager: ManagerContact,
        initiated_by: UserId,
    ) -> Result<InitiatedWorkflow, WorkflowError> {
        match self {
            AppServices::InMemory { workflow } => {
                workflow.initiate(employee_id, site_manager, initiated_by).await
            }
            AppServices::Persistent { workflow } => {
                workflow.initiate(employee_id, site_manager, initiated_by).await
            }
        }
    }

    pub async fn view_as_employee(
        &self,
        token: &CapabilityToken,
    ) -> Result<SignatureSnapshot, WorkflowError> {
        match self {
            AppServices::InMemory { workflow } => workflow.view_as_employee(token).await,
            AppServices::Persistent { workflow } => workflow.view_as_employee(token).await,
        }
    }

    pub async fn sign_as_employee(
        &self,
        token: &CapabilityToken,
        signature_image: String,
        signature_name: String,
        caller_ip: String,
    ) -> Result<SignatureSnapshot, WorkflowError> {
        match self {
            AppServices::InMemory { workflow } => {
                workflow
                    .sign_as_employee(token, signature_image, signature_name, caller_ip)
                    .await
            }
            AppServices::Persistent { workflow } => {
                workflow
                    .sign_as_employee(token, signature_image, signature_name, caller_ip)
                    .await
            }
        }
    }

    pub async fn view_as_manager(
        &self,
        token: &CapabilityToken,
    ) -> Result<SignatureSnapshot, WorkflowError> {
        match self {
            AppServices::InMemory { workflow } => workflow.view_as_manager(token).await,
            AppServices::Persistent { workflow } => workflow.view_as_manager(token).await,
        }
    }

    pub async fn approve_as_manager(
        &self,
        token: &CapabilityToken,
        signature_image: String,
        signature_name: String,
        signature_title: String,
        caller_ip: String,
    ) -> Result<SignatureSnapshot, WorkflowError> {
        match self {
            AppServices::InMemory { workflow } => {
                workflow
                    .approve_as_manager(
                        token,
                        signature_image,
                        signature_name,
                        signature_title,
                        caller_ip,
                    )
                    .await
            }
            AppServices::Persistent { workflow } => {
                workflow
                    .approve_as_manager(
                        token,
                        signature_image,
                        signature_name,
                        signature_title,
                        caller_ip,
                    )
                    .await
            }
        }
    }

    pub async fn reject_as_manager(
        &self,
        token: &CapabilityToken,
        reason: String,
    ) -> Result<SignatureSnapshot, WorkflowError> {
        match self {
            AppServices::InMemory { workflow } => workflow.reject_as_manager(token, reason).await,
            AppServices::Persistent { workflow } => workflow.reject_as_manager(token, reason).await,
        }
    }

    pub async fn status_for_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Option<SignatureSnapshot>, WorkflowError> {
        match self {
            AppServices::InMemory { workflow } => workflow.status_for_employee(employee_id).await,
            AppServices::Persistent { workflow } => workflow.status_for_employee(employee_id).await,
        }
    }
}
