use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::approval::{ApprovalId, ApprovalRecord, StageStatus};
use crate::domain::expense::{ExpenseRequest, ExpenseRequestId, PaymentStatus};
use crate::errors::WorkflowError;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Database(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        WorkflowError::Database(value.to_string())
    }
}

/// Terminal result of a whole workflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowOutcome {
    Approved,
    Rejected,
}

impl WorkflowOutcome {
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            Self::Approved => PaymentStatus::Approved,
            Self::Rejected => PaymentStatus::Rejected,
        }
    }
}

/// Persistence port for requests and their approval records.
///
/// Every record update goes through [`ApprovalStore::compare_and_swap`],
/// which only writes when the stored `(stage_status, version)` still matches
/// what the caller read, and stores the record with `version` incremented.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Writes the request and all of its stage records in one atomic unit.
    async fn insert_workflow(
        &self,
        request: &ExpenseRequest,
        records: &[ApprovalRecord],
    ) -> Result<(), StoreError>;

    async fn find_request(
        &self,
        id: &ExpenseRequestId,
    ) -> Result<Option<ExpenseRequest>, StoreError>;

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<ApprovalRecord>, StoreError>;

    /// Records of one request ordered by stage number.
    async fn list_for_request(
        &self,
        request_id: &ExpenseRequestId,
    ) -> Result<Vec<ApprovalRecord>, StoreError>;

    async fn compare_and_swap(
        &self,
        record: &ApprovalRecord,
        expected_status: StageStatus,
        expected_version: u32,
    ) -> Result<bool, StoreError>;

    /// Active pending stages whose deadline is strictly before `now`.
    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRecord>, StoreError>;

    /// Closes a workflow atomically. `Approved` marks every record approved;
    /// `Rejected` expires the stages that have not reached a terminal state.
    /// The request's payment status follows the outcome. Returns the records
    /// after the write.
    async fn finalize_request(
        &self,
        request_id: &ExpenseRequestId,
        outcome: WorkflowOutcome,
        at: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRecord>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    requests: HashMap<String, ExpenseRequest>,
    records: HashMap<String, ApprovalRecord>,
}

/// Store kept behind a single lock, so each call is atomic.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    state: RwLock<MemoryState>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook for planting records in states the engine would not
    /// produce on its own.
    pub async fn overwrite(&self, record: ApprovalRecord) {
        let mut state = self.state.write().await;
        state.records.insert(record.id.0.clone(), record);
    }
}

fn sorted_for_request(state: &MemoryState, request_id: &ExpenseRequestId) -> Vec<ApprovalRecord> {
    let mut records: Vec<ApprovalRecord> =
        state.records.values().filter(|record| &record.request_id == request_id).cloned().collect();
    records.sort_by_key(|record| record.stage_number);
    records
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn insert_workflow(
        &self,
        request: &ExpenseRequest,
        records: &[ApprovalRecord],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.requests.contains_key(&request.id.0) {
            return Err(StoreError::Database(format!(
                "expense request `{}` already exists",
                request.id
            )));
        }
        let duplicate = records.iter().find(|record| state.records.contains_key(&record.id.0));
        if let Some(existing) = duplicate {
            return Err(StoreError::Database(format!(
                "approval record `{}` already exists",
                existing.id
            )));
        }

        let mut stages: HashSet<(&str, u32)> = state
            .records
            .values()
            .map(|record| (record.request_id.0.as_str(), record.stage_number))
            .collect();
        for record in records {
            if !stages.insert((record.request_id.0.as_str(), record.stage_number)) {
                return Err(StoreError::Database(format!(
                    "stage {} of request `{}` already exists",
                    record.stage_number, record.request_id
                )));
            }
        }

        state.requests.insert(request.id.0.clone(), request.clone());
        for record in records {
            state.records.insert(record.id.0.clone(), record.clone());
        }
        Ok(())
    }

    async fn find_request(
        &self,
        id: &ExpenseRequestId,
    ) -> Result<Option<ExpenseRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id.0).cloned())
    }

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<ApprovalRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state.records.get(&id.0).cloned())
    }

    async fn list_for_request(
        &self,
        request_id: &ExpenseRequestId,
    ) -> Result<Vec<ApprovalRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(sorted_for_request(&state, request_id))
    }

    async fn compare_and_swap(
        &self,
        record: &ApprovalRecord,
        expected_status: StageStatus,
        expected_version: u32,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(current) = state.records.get_mut(&record.id.0) else {
            return Ok(false);
        };
        if current.stage_status != expected_status || current.version != expected_version {
            return Ok(false);
        }

        let mut next = record.clone();
        next.version = expected_version + 1;
        *current = next;
        Ok(true)
    }

    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<ApprovalRecord>, StoreError> {
        let state = self.state.read().await;
        let mut overdue: Vec<ApprovalRecord> = state
            .records
            .values()
            .filter(|record| {
                record.stage_status == StageStatus::Pending
                    && record.stage_started_at.is_some()
                    && record.stage_deadline.is_some_and(|deadline| deadline < now)
            })
            .cloned()
            .collect();
        overdue.sort_by_key(|record| record.stage_deadline);
        Ok(overdue)
    }

    async fn finalize_request(
        &self,
        request_id: &ExpenseRequestId,
        outcome: WorkflowOutcome,
        at: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRecord>, StoreError> {
        let mut state = self.state.write().await;
        let Some(request) = state.requests.get_mut(&request_id.0) else {
            return Err(StoreError::Database(format!("expense request `{request_id}` is missing")));
        };
        request.payment_status = outcome.payment_status();
        request.updated_at = at;

        for record in state.records.values_mut().filter(|record| &record.request_id == request_id) {
            let target = match outcome {
                WorkflowOutcome::Approved if record.stage_status != StageStatus::Approved => {
                    StageStatus::Approved
                }
                WorkflowOutcome::Rejected if !record.stage_status.is_terminal() => {
                    StageStatus::Expired
                }
                _ => continue,
            };
            record.stage_status = target;
            record.updated_at = at;
            record.version += 1;
        }

        Ok(sorted_for_request(&state, request_id))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{ApprovalStore, InMemoryApprovalStore, StoreError, WorkflowOutcome};
    use crate::domain::approval::{ApprovalId, StageStatus};
    use crate::domain::expense::PaymentStatus;
    use crate::workflow::test_support::{expense_request, pending_record, t0};

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_versions() {
        let store = InMemoryApprovalStore::new();
        let request = expense_request(Decimal::new(60, 0));
        let record = pending_record(&request, 1, 1);
        store.insert_workflow(&request, std::slice::from_ref(&record)).await.expect("insert");

        let mut approved = record.clone();
        approved.stage_status = StageStatus::Approved;
        assert!(store
            .compare_and_swap(&approved, StageStatus::Pending, 1)
            .await
            .expect("first swap"));
        assert!(!store
            .compare_and_swap(&approved, StageStatus::Pending, 1)
            .await
            .expect("stale swap"));

        let stored = store.find_by_id(&record.id).await.expect("find").expect("record exists");
        assert_eq!(stored.version, 2);
        assert_eq!(stored.stage_status, StageStatus::Approved);
    }

    #[tokio::test]
    async fn rejection_expires_only_open_stages() {
        let store = InMemoryApprovalStore::new();
        let request = expense_request(Decimal::new(1_500, 0));
        let mut first = pending_record(&request, 1, 2);
        first.stage_status = StageStatus::Rejected;
        let second = pending_record(&request, 2, 2);
        store.insert_workflow(&request, &[first, second]).await.expect("insert");

        let records = store
            .finalize_request(&request.id, WorkflowOutcome::Rejected, t0())
            .await
            .expect("finalize");

        assert_eq!(records[0].stage_status, StageStatus::Rejected);
        assert_eq!(records[0].version, 1);
        assert_eq!(records[1].stage_status, StageStatus::Expired);
        assert_eq!(records[1].version, 2);

        let stored = store.find_request(&request.id).await.expect("find").expect("request");
        assert_eq!(stored.payment_status, PaymentStatus::Rejected);
    }

    #[tokio::test]
    async fn overdue_scan_ignores_unstarted_and_future_deadlines() {
        let store = InMemoryApprovalStore::new();
        let request = expense_request(Decimal::new(1_500, 0));
        let mut active = pending_record(&request, 1, 2);
        active.stage_started_at = Some(t0());
        active.stage_deadline = Some(t0() + chrono::Duration::hours(48));
        let waiting = pending_record(&request, 2, 2);
        store.insert_workflow(&request, &[active.clone(), waiting]).await.expect("insert");

        assert!(store
            .list_overdue(t0() + chrono::Duration::hours(47))
            .await
            .expect("scan")
            .is_empty());

        let overdue = store.list_overdue(t0() + chrono::Duration::hours(49)).await.expect("scan");
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, active.id);
    }

    #[tokio::test]
    async fn second_workflow_for_a_request_is_refused() {
        let store = InMemoryApprovalStore::new();
        let request = expense_request(Decimal::new(60, 0));
        let first = pending_record(&request, 1, 1);
        store.insert_workflow(&request, std::slice::from_ref(&first)).await.expect("insert");

        let mut again = pending_record(&request, 1, 1);
        again.id = ApprovalId("APR-second-ladder".to_string());
        let error = store
            .insert_workflow(&request, std::slice::from_ref(&again))
            .await
            .expect_err("request already has a workflow");
        assert!(matches!(error, StoreError::Database(_)));

        let stages: Vec<u32> = store
            .list_for_request(&request.id)
            .await
            .expect("list")
            .iter()
            .map(|record| record.stage_number)
            .collect();
        assert_eq!(stages, vec![1]);
        assert!(store.find_by_id(&again.id).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn duplicate_stage_numbers_in_one_workflow_are_refused() {
        let store = InMemoryApprovalStore::new();
        let request = expense_request(Decimal::new(1_500, 0));
        let first = pending_record(&request, 1, 2);
        let mut twin = pending_record(&request, 1, 2);
        twin.id = ApprovalId("APR-twin".to_string());

        let error =
            store.insert_workflow(&request, &[first, twin]).await.expect_err("duplicate stage 1");

        assert!(matches!(error, StoreError::Database(_)));
        assert!(store.find_request(&request.id).await.expect("find").is_none());
    }
}
