use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use passbook_core::{EmployeeId, ExpectedVersion};
use passbook_signing::{CapabilityToken, SignatureRecord, SignerRole};

use super::r#trait::{RecordStore, RecordStoreError};

#[derive(Debug, Default)]
struct Inner {
    by_employee: HashMap<EmployeeId, SignatureRecord>,
    /// Token → owning employee, covering both columns of every record.
    /// Kept in lockstep with `by_employee` so token lookup stays O(1).
    tokens: HashMap<String, (EmployeeId, SignerRole)>,
}

/// In-memory record store.
///
/// Intended for tests/dev. The single `RwLock` gives `upsert` the same
/// all-or-nothing semantics the Postgres implementation gets from a
/// transaction.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    inner: RwLock<Inner>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find_by_employee(
        &self,
        employee_id: EmployeeId,
    ) -> Result<Option<SignatureRecord>, RecordStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| RecordStoreError::Backend("lock poisoned".to_string()))?;
        Ok(inner.by_employee.get(&employee_id).cloned())
    }

    async fn find_by_token(
        &self,
        role: SignerRole,
        token: &CapabilityToken,
    ) -> Result<Option<SignatureRecord>, RecordStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| RecordStoreError::Backend("lock poisoned".to_string()))?;

        let Some((employee_id, indexed_role)) = inner.tokens.get(token.as_str()) else {
            return Ok(None);
        };
        if *indexed_role != role {
            // Right value, wrong column: indistinguishable from unknown.
            return Ok(None);
        }
        Ok(inner.by_employee.get(employee_id).cloned())
    }

    async fn token_in_use(&self, token: &CapabilityToken) -> Result<bool, RecordStoreError> {
        let inner = self
            .inner
            .read()
            .map_err(|_| RecordStoreError::Backend("lock poisoned".to_string()))?;
        Ok(inner.tokens.contains_key(token.as_str()))
    }

    async fn upsert(
        &self,
        record: SignatureRecord,
        expected: ExpectedVersion,
    ) -> Result<SignatureRecord, RecordStoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| RecordStoreError::Backend("lock poisoned".to_string()))?;

        let employee_id = record.employee_id;
        let current = inner
            .by_employee
            .get(&employee_id)
            .map(|r| r.version)
            .unwrap_or(0);

        if !expected.matches(current) {
            return Err(RecordStoreError::Conflict(format!(
                "expected {expected:?}, found {current}"
            )));
        }

        // Token uniqueness across all records and both columns.
        for (token, role) in [
            (&record.employee_token, SignerRole::Employee),
            (&record.manager_token, SignerRole::Manager),
        ] {
            if let Some((owner, _)) = inner.tokens.get(token.as_str()) {
                if *owner != employee_id {
                    return Err(RecordStoreError::DuplicateToken(format!(
                        "{role} token collides with another record"
                    )));
                }
            }
        }

        // Drop the previous record's index entries before inserting the new
        // ones; a rotated token must stop resolving immediately.
        let stale = inner.by_employee.get(&employee_id).map(|old| {
            [
                old.employee_token.as_str().to_string(),
                old.manager_token.as_str().to_string(),
            ]
        });
        if let Some(stale) = stale {
            for token in stale {
                inner.tokens.remove(&token);
            }
        }

        let mut stored = record;
        stored.version = current + 1;

        inner.tokens.insert(
            stored.employee_token.as_str().to_string(),
            (employee_id, SignerRole::Employee),
        );
        inner.tokens.insert(
            stored.manager_token.as_str().to_string(),
            (employee_id, SignerRole::Manager),
        );
        inner.by_employee.insert(employee_id, stored.clone());

        Ok(stored)
    }
}
