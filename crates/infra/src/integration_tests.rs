//! Workflow integration tests over the in-memory store.
//!
//! These drive the public operations end to end and assert the §-level
//! guarantees: token rotation on restart, expiry precedence, terminal-state
//! immutability, watcher resets, and deterministic loser reporting when two
//! submissions race on the same link.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use passbook_core::{EmployeeId, ExpectedVersion, UserId};
use passbook_signing::{
    CapabilityToken, ManagerContact, RandomTokenIssuer, SignatureRecord, SignatureStatus,
    SignerRole, WrongState,
};

use crate::audit::{AuditAction, AuditEmitter, AuditEntry};
use crate::invalidator::{InvalidationOutcome, SignatureInvalidator};
use crate::notify::{LinkBuilder, NotificationDispatcher, NotifyError, SignatureNotice};
use crate::record_store::{InMemoryRecordStore, RecordStore, RecordStoreError};
use crate::workflow::{SignatureWorkflow, WorkflowError};

#[derive(Debug, Default)]
struct RecordingDispatcher {
    notices: Mutex<Vec<SignatureNotice>>,
}

impl RecordingDispatcher {
    fn notices(&self) -> Vec<SignatureNotice> {
        self.notices.lock().unwrap().clone()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, notice: SignatureNotice) -> Result<(), NotifyError> {
        self.notices.lock().unwrap().push(notice);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
    fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl AuditEmitter for RecordingAudit {
    fn emit(&self, entry: AuditEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

type TestWorkflow = SignatureWorkflow<
    Arc<InMemoryRecordStore>,
    RandomTokenIssuer,
    Arc<RecordingDispatcher>,
    Arc<RecordingAudit>,
>;

struct Harness {
    store: Arc<InMemoryRecordStore>,
    dispatcher: Arc<RecordingDispatcher>,
    audit: Arc<RecordingAudit>,
    workflow: TestWorkflow,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryRecordStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let audit = Arc::new(RecordingAudit::default());
    let workflow = SignatureWorkflow::new(
        store.clone(),
        RandomTokenIssuer,
        dispatcher.clone(),
        audit.clone(),
        LinkBuilder::new("http://localhost:8080"),
    );
    Harness {
        store,
        dispatcher,
        audit,
        workflow,
    }
}

fn manager_contact() -> ManagerContact {
    ManagerContact {
        email: "mgr@x.com".to_string(),
        name: "Mgr Name".to_string(),
    }
}

async fn stored_record(store: &InMemoryRecordStore, employee_id: EmployeeId) -> SignatureRecord {
    store
        .find_by_employee(employee_id)
        .await
        .unwrap()
        .expect("record should exist")
}

#[tokio::test]
async fn full_round_trip_then_watcher_reset() {
    let h = harness();
    let employee_id = EmployeeId::new();
    let mut tokens_ever_issued: HashSet<String> = HashSet::new();

    // initiate: PENDING_EMPLOYEE, employee link live, manager link dormant.
    let initiated = h
        .workflow
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();
    assert_eq!(initiated.snapshot.status, SignatureStatus::PendingEmployee);

    let record = stored_record(&h.store, employee_id).await;
    assert!(record.employee_token_expires_at.is_some());
    assert_eq!(record.manager_token_expires_at, None);
    record.verify_invariants().unwrap();
    tokens_ever_issued.insert(record.employee_token.as_str().to_string());
    tokens_ever_issued.insert(record.manager_token.as_str().to_string());

    let employee_token = initiated.employee_token.clone();

    // employee signs: PENDING_MANAGER, manager link now live.
    let snapshot = h
        .workflow
        .sign_as_employee(
            &employee_token,
            "img".to_string(),
            "E Name".to_string(),
            "1.2.3.4".to_string(),
        )
        .await
        .unwrap();
    assert_eq!(snapshot.status, SignatureStatus::PendingManager);

    let record = stored_record(&h.store, employee_id).await;
    assert!(record.manager_token_expires_at.is_some());
    record.verify_invariants().unwrap();
    let manager_token = record.manager_token.clone();

    // the employee link has served its purpose.
    let err = h.workflow.view_as_employee(&employee_token).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::WrongState(WrongState::AlreadySigned)
    ));

    // manager reviews, sees the employee's evidence, approves.
    let view = h.workflow.view_as_manager(&manager_token).await.unwrap();
    assert_eq!(
        view.employee_signature.as_ref().map(|s| s.name.as_str()),
        Some("E Name")
    );

    let snapshot = h
        .workflow
        .approve_as_manager(
            &manager_token,
            "img2".to_string(),
            "Mgr Name".to_string(),
            "Manager".to_string(),
            "5.6.7.8".to_string(),
        )
        .await
        .unwrap();
    assert_eq!(snapshot.status, SignatureStatus::Completed);
    assert!(snapshot.completed_at.is_some());
    assert!(snapshot.employee_signature.is_some());
    assert!(snapshot.manager_signature.is_some());

    let record = stored_record(&h.store, employee_id).await;
    record.verify_invariants().unwrap();

    // a certificate mutation voids everything: DRAFT, fresh tokens that
    // differ from every token ever issued for this employee.
    let outcome = h.workflow.on_certificate_changed(employee_id).await.unwrap();
    assert_eq!(outcome, InvalidationOutcome::Reset);

    let record = stored_record(&h.store, employee_id).await;
    assert_eq!(record.status, SignatureStatus::Draft);
    assert!(record.employee_signature.is_none());
    assert!(record.manager_signature.is_none());
    assert_eq!(record.completed_at, None);
    assert!(!tokens_ever_issued.contains(record.employee_token.as_str()));
    assert!(!tokens_ever_issued.contains(record.manager_token.as_str()));
    record.verify_invariants().unwrap();

    // dead links stay dead.
    assert!(matches!(
        h.workflow.view_as_employee(&employee_token).await.unwrap_err(),
        WorkflowError::NotFound
    ));
    assert!(matches!(
        h.workflow.view_as_manager(&manager_token).await.unwrap_err(),
        WorkflowError::NotFound
    ));

    // audit captured the completion.
    let entries = h.audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::WorkflowCompleted);
    assert_eq!(entries[0].actor_name, "Mgr Name");
    assert_eq!(entries[0].actor_ip.as_deref(), Some("5.6.7.8"));
}

#[tokio::test]
async fn initiating_twice_rotates_the_employee_token() {
    let h = harness();
    let employee_id = EmployeeId::new();

    let first = h
        .workflow
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();
    let second = h
        .workflow
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();

    assert_eq!(second.snapshot.status, SignatureStatus::PendingEmployee);
    assert_ne!(first.employee_token, second.employee_token);

    // the first link is dead, the second works.
    assert!(matches!(
        h.workflow.view_as_employee(&first.employee_token).await.unwrap_err(),
        WorkflowError::NotFound
    ));
    assert!(h.workflow.view_as_employee(&second.employee_token).await.is_ok());
}

#[tokio::test]
async fn reinitiating_a_completed_workflow_discards_all_evidence() {
    let h = harness();
    let employee_id = EmployeeId::new();

    let initiated = h
        .workflow
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();
    h.workflow
        .sign_as_employee(
            &initiated.employee_token,
            "img".to_string(),
            "E Name".to_string(),
            "1.2.3.4".to_string(),
        )
        .await
        .unwrap();
    let manager_token = stored_record(&h.store, employee_id).await.manager_token;
    h.workflow
        .approve_as_manager(
            &manager_token,
            "img2".to_string(),
            "Mgr Name".to_string(),
            "Manager".to_string(),
            "5.6.7.8".to_string(),
        )
        .await
        .unwrap();

    let restarted = h
        .workflow
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();
    assert_eq!(restarted.snapshot.status, SignatureStatus::PendingEmployee);
    assert!(restarted.snapshot.employee_signature.is_none());
    assert!(restarted.snapshot.manager_signature.is_none());
    assert_eq!(restarted.snapshot.completed_at, None);

    let record = stored_record(&h.store, employee_id).await;
    record.verify_invariants().unwrap();
}

#[tokio::test]
async fn expired_employee_link_reports_expired_never_wrong_state() {
    let h = harness();
    let employee_id = EmployeeId::new();

    let initiated = h
        .workflow
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();

    // Backdate the link window by a second.
    let mut record = stored_record(&h.store, employee_id).await;
    let version = record.version;
    record.employee_token_expires_at = Some(Utc::now() - Duration::seconds(1));
    h.store
        .upsert(record, ExpectedVersion::Exact(version))
        .await
        .unwrap();

    let err = h
        .workflow
        .view_as_employee(&initiated.employee_token)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Expired));

    let err = h
        .workflow
        .sign_as_employee(
            &initiated.employee_token,
            "img".to_string(),
            "E Name".to_string(),
            "1.2.3.4".to_string(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Expired));
}

#[tokio::test]
async fn expired_manager_link_is_a_dead_end_requiring_fresh_initiation() {
    let h = harness();
    let employee_id = EmployeeId::new();

    let initiated = h
        .workflow
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();
    h.workflow
        .sign_as_employee(
            &initiated.employee_token,
            "img".to_string(),
            "E Name".to_string(),
            "1.2.3.4".to_string(),
        )
        .await
        .unwrap();

    let mut record = stored_record(&h.store, employee_id).await;
    let version = record.version;
    let manager_token = record.manager_token.clone();
    record.manager_token_expires_at = Some(Utc::now() - Duration::seconds(1));
    h.store
        .upsert(record, ExpectedVersion::Exact(version))
        .await
        .unwrap();

    let err = h.workflow.view_as_manager(&manager_token).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Expired));
    assert!(err.to_string().contains("contact HR"));

    // A fresh initiation is the only way forward, and it works.
    let restarted = h
        .workflow
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();
    assert_eq!(restarted.snapshot.status, SignatureStatus::PendingEmployee);
}

#[tokio::test]
async fn manager_cannot_act_before_the_employee_signs() {
    let h = harness();
    let employee_id = EmployeeId::new();

    h.workflow
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();
    let manager_token = stored_record(&h.store, employee_id).await.manager_token;

    let err = h.workflow.view_as_manager(&manager_token).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::WrongState(WrongState::AwaitingEmployee)
    ));
}

#[tokio::test]
async fn tokens_do_not_cross_role_surfaces() {
    let h = harness();
    let employee_id = EmployeeId::new();

    let initiated = h
        .workflow
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();
    let manager_token = stored_record(&h.store, employee_id).await.manager_token;

    // Manager token on the employee surface (and vice versa) is a plain 404:
    // indistinguishable from a token that never existed.
    assert!(matches!(
        h.workflow.view_as_employee(&manager_token).await.unwrap_err(),
        WorkflowError::NotFound
    ));
    assert!(matches!(
        h.workflow.view_as_manager(&initiated.employee_token).await.unwrap_err(),
        WorkflowError::NotFound
    ));
}

#[tokio::test]
async fn rejection_is_terminal_and_preserves_the_employee_signature() {
    let h = harness();
    let employee_id = EmployeeId::new();

    let initiated = h
        .workflow
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();
    h.workflow
        .sign_as_employee(
            &initiated.employee_token,
            "img".to_string(),
            "E Name".to_string(),
            "1.2.3.4".to_string(),
        )
        .await
        .unwrap();

    let before = stored_record(&h.store, employee_id).await;
    let manager_token = before.manager_token.clone();
    let employee_signature = before.employee_signature.clone();

    let snapshot = h
        .workflow
        .reject_as_manager(&manager_token, "incomplete".to_string())
        .await
        .unwrap();
    assert_eq!(snapshot.status, SignatureStatus::Rejected);
    assert_eq!(snapshot.rejection_reason.as_deref(), Some("incomplete"));
    assert_eq!(snapshot.employee_signature, employee_signature);
    assert!(snapshot.manager_signature.is_none());

    let record = stored_record(&h.store, employee_id).await;
    record.verify_invariants().unwrap();

    // terminal: the same link cannot approve afterwards.
    let err = h
        .workflow
        .approve_as_manager(
            &manager_token,
            "img2".to_string(),
            "Mgr Name".to_string(),
            "Manager".to_string(),
            "5.6.7.8".to_string(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::WrongState(WrongState::AlreadyRejected)
    ));

    let entries = h.audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::WorkflowRejected);
}

#[tokio::test]
async fn watcher_is_a_noop_without_a_record_or_on_draft() {
    let h = harness();
    let employee_id = EmployeeId::new();

    assert_eq!(
        h.workflow.on_certificate_changed(employee_id).await.unwrap(),
        InvalidationOutcome::Noop
    );

    h.workflow
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();
    assert_eq!(
        h.workflow.on_certificate_changed(employee_id).await.unwrap(),
        InvalidationOutcome::Reset
    );

    // Already draft: a second certificate change has nothing to invalidate.
    assert_eq!(
        h.workflow.on_certificate_changed(employee_id).await.unwrap(),
        InvalidationOutcome::Noop
    );
}

#[tokio::test]
async fn tokens_are_unique_across_employees() {
    let h = harness();

    let a = h
        .workflow
        .initiate(EmployeeId::new(), manager_contact(), UserId::new())
        .await
        .unwrap();
    let b = h
        .workflow
        .initiate(EmployeeId::new(), manager_contact(), UserId::new())
        .await
        .unwrap();

    let record_a = stored_record(&h.store, a.snapshot.employee_id).await;
    let record_b = stored_record(&h.store, b.snapshot.employee_id).await;

    let all = [
        record_a.employee_token.as_str(),
        record_a.manager_token.as_str(),
        record_b.employee_token.as_str(),
        record_b.manager_token.as_str(),
    ];
    let distinct: HashSet<&str> = all.iter().copied().collect();
    assert_eq!(distinct.len(), all.len());
}

#[tokio::test]
async fn notifications_follow_the_transitions() {
    let h = harness();
    let employee_id = EmployeeId::new();

    let initiated = h
        .workflow
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();
    h.workflow
        .sign_as_employee(
            &initiated.employee_token,
            "img".to_string(),
            "E Name".to_string(),
            "1.2.3.4".to_string(),
        )
        .await
        .unwrap();
    let manager_token = stored_record(&h.store, employee_id).await.manager_token;
    h.workflow
        .approve_as_manager(
            &manager_token,
            "img2".to_string(),
            "Mgr Name".to_string(),
            "Manager".to_string(),
            "5.6.7.8".to_string(),
        )
        .await
        .unwrap();

    let notices = h.dispatcher.notices();
    assert_eq!(notices.len(), 3);

    match &notices[0] {
        SignatureNotice::EmployeeSignatureRequested { link, .. } => {
            assert!(link.ends_with(initiated.employee_token.as_str()));
            assert!(link.contains("/signature/employee/"));
        }
        other => panic!("expected employee notice, got {other:?}"),
    }
    match &notices[1] {
        SignatureNotice::ManagerApprovalRequested { to, link, .. } => {
            assert_eq!(to.email, "mgr@x.com");
            assert!(link.ends_with(manager_token.as_str()));
        }
        other => panic!("expected manager notice, got {other:?}"),
    }
    assert!(matches!(
        notices[2],
        SignatureNotice::WorkflowCompleted { .. }
    ));
}

/// Store wrapper that lets a competing approval win immediately before the
/// wrapped writer's conditional update, once.
struct RacingStore {
    inner: Arc<InMemoryRecordStore>,
    raced: AtomicBool,
}

#[async_trait]
impl RecordStore for RacingStore {
    async fn find_by_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Option<SignatureRecord>, RecordStoreError> {
        self.inner.find_by_employee(employee_id).await
    }

    async fn find_by_token(
        &self,
        role: SignerRole,
        token: &CapabilityToken,
    ) -> Result<Option<SignatureRecord>, RecordStoreError> {
        self.inner.find_by_token(role, token).await
    }

    async fn token_in_use(&self, token: &CapabilityToken) -> Result<bool, RecordStoreError> {
        self.inner.token_in_use(token).await
    }

    async fn upsert(
        &self,
        record: SignatureRecord,
        expected: ExpectedVersion,
    ) -> Result<SignatureRecord, RecordStoreError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            // The competing manager approval commits first.
            let mut winner = self
                .inner
                .find_by_employee(record.employee_id)
                .await?
                .expect("record exists");
            let version = winner.version;
            winner
                .manager_approve(
                    "img2".to_string(),
                    "Racer".to_string(),
                    "Manager".to_string(),
                    "9.9.9.9".to_string(),
                    Utc::now(),
                )
                .expect("winner approves from pending_manager");
            self.inner
                .upsert(winner, ExpectedVersion::Exact(version))
                .await?;
        }
        self.inner.upsert(record, expected).await
    }
}

#[tokio::test]
async fn racing_submissions_let_exactly_one_win_and_report_wrong_state() {
    let inner = Arc::new(InMemoryRecordStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let audit = Arc::new(RecordingAudit::default());

    // Set up a record in PENDING_MANAGER through a plain workflow first.
    let setup = SignatureWorkflow::new(
        inner.clone(),
        RandomTokenIssuer,
        dispatcher.clone(),
        audit.clone(),
        LinkBuilder::new("http://localhost:8080"),
    );
    let employee_id = EmployeeId::new();
    let initiated = setup
        .initiate(employee_id, manager_contact(), UserId::new())
        .await
        .unwrap();
    setup
        .sign_as_employee(
            &initiated.employee_token,
            "img".to_string(),
            "E Name".to_string(),
            "1.2.3.4".to_string(),
        )
        .await
        .unwrap();
    let manager_token = inner
        .find_by_employee(employee_id)
        .await
        .unwrap()
        .unwrap()
        .manager_token;

    // Now a reject races an approve: the approve wins the conditional write,
    // the reject loses and is told the record is already completed.
    let racing = SignatureWorkflow::new(
        RacingStore {
            inner: inner.clone(),
            raced: AtomicBool::new(false),
        },
        RandomTokenIssuer,
        dispatcher,
        audit,
        LinkBuilder::new("http://localhost:8080"),
    );

    let err = racing
        .reject_as_manager(&manager_token, "too late".to_string())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::WrongState(WrongState::AlreadyCompleted)
    ));

    let record = inner
        .find_by_employee(employee_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, SignatureStatus::Completed);
    assert_eq!(
        record.manager_signature.as_ref().map(|s| s.name.as_str()),
        Some("Racer")
    );
    record.verify_invariants().unwrap();
}
