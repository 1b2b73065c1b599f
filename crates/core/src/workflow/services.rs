use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::config::WorkflowSettings;
use crate::domain::approval::{ApprovalId, ApprovalRecord, StageStatus};
use crate::domain::expense::{ExpenseRequest, ExpenseRequestId};
use crate::errors::WorkflowError;
use crate::workflow::clock::Clock;
use crate::workflow::notify::{Notification, NotificationDispatcher};
use crate::workflow::resolver::ApproverResolver;
use crate::workflow::store::ApprovalStore;

/// Collaborators shared by every workflow component.
pub struct WorkflowServices {
    pub store: Arc<dyn ApprovalStore>,
    pub resolver: Arc<dyn ApproverResolver>,
    pub notifier: NotificationDispatcher,
    pub clock: Arc<dyn Clock>,
    pub audit: Arc<dyn AuditSink>,
    pub settings: WorkflowSettings,
}

impl WorkflowServices {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) async fn load_approval(
        &self,
        id: &ApprovalId,
    ) -> Result<ApprovalRecord, WorkflowError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| WorkflowError::ApprovalNotFound(id.clone()))
    }

    pub(crate) async fn load_request(
        &self,
        id: &ExpenseRequestId,
    ) -> Result<ExpenseRequest, WorkflowError> {
        self.store.find_request(id).await?.ok_or_else(|| WorkflowError::RequestNotFound(id.clone()))
    }

    /// Persists `record` if nobody else has moved it since it was read as
    /// `(expected_status, expected_version)`. On success `record.version`
    /// reflects the stored row.
    pub(crate) async fn commit(
        &self,
        record: &mut ApprovalRecord,
        expected_status: StageStatus,
        expected_version: u32,
    ) -> Result<(), WorkflowError> {
        if self.store.compare_and_swap(record, expected_status, expected_version).await? {
            record.version = expected_version + 1;
            return Ok(());
        }

        let status = self
            .store
            .find_by_id(&record.id)
            .await?
            .map(|current| current.stage_status)
            .unwrap_or(expected_status);
        Err(WorkflowError::AlreadyProcessed { approval_id: record.id.clone(), status })
    }

    /// Queues delivery without waiting on the gateway. A failed delivery is
    /// audited from the background task.
    pub(crate) async fn notify(&self, notification: Notification) {
        let kind = notification.kind;
        let request_id = notification.approval.request_id.clone();
        let approval_id = notification.approval.id.clone();
        let audit = self.audit.clone();
        let clock = self.clock.clone();

        self.notifier
            .send(notification, move |error| {
                let event = AuditEvent::new(
                    Some(request_id),
                    Some(approval_id),
                    "notification.failed",
                    AuditCategory::Notification,
                    "workflow-engine",
                    AuditOutcome::Failed,
                )
                .with_metadata("kind", kind.as_str())
                .with_metadata("error", error.to_string());
                audit.emit(event.occurred_at(clock.now()));
            })
            .await;
    }

    pub(crate) async fn flush_notifications(&self) {
        self.notifier.flush().await;
    }

    pub(crate) fn audit(&self, event: AuditEvent) {
        self.audit.emit(event.occurred_at(self.now()));
    }

    pub(crate) fn refused(
        &self,
        record: &ApprovalRecord,
        event_type: &str,
        category: AuditCategory,
        actor: &str,
        error: &WorkflowError,
    ) {
        self.audit(
            AuditEvent::new(
                Some(record.request_id.clone()),
                Some(record.id.clone()),
                event_type,
                category,
                actor,
                AuditOutcome::Rejected,
            )
            .with_metadata("error_class", error.kind().as_str())
            .with_metadata("stage_status", record.stage_status.as_str()),
        );
    }
}

pub(crate) fn deadline_after(
    start: DateTime<Utc>,
    hours: u32,
) -> Result<DateTime<Utc>, WorkflowError> {
    Duration::try_hours(i64::from(hours))
        .and_then(|window| start.checked_add_signed(window))
        .ok_or_else(|| {
            WorkflowError::InvalidWorkflow(format!(
                "a {hours}h deadline from {start} is outside the supported time range"
            ))
        })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::deadline_after;
    use crate::errors::ErrorKind;
    use crate::workflow::test_support::t0;

    #[test]
    fn deadline_is_offset_by_whole_hours() {
        assert_eq!(deadline_after(t0(), 48).expect("deadline"), t0() + Duration::hours(48));
    }

    #[test]
    fn overflowing_deadline_is_an_invalid_workflow() {
        let error = deadline_after(DateTime::<Utc>::MAX_UTC, 1).expect_err("overflow");
        assert_eq!(error.kind(), ErrorKind::InvalidWorkflow);

        let error = deadline_after(t0(), u32::MAX).expect_err("beyond chrono range");
        assert_eq!(error.kind(), ErrorKind::InvalidWorkflow);
    }
}
