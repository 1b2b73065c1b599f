use std::sync::Arc;

use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome};
use crate::domain::approval::{ApprovalRecord, StageStatus};
use crate::errors::WorkflowError;
use crate::workflow::conditions::StageConditionEvaluator;
use crate::workflow::notify::{Notification, NotificationKind};
use crate::workflow::services::{deadline_after, WorkflowServices};
use crate::workflow::store::WorkflowOutcome;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Progression {
    /// The next stage is now active.
    Advanced(ApprovalRecord),
    /// The final stage was approved and the workflow closed.
    Completed(Vec<ApprovalRecord>),
    /// The next stage is missing or already closed; the workflow is left
    /// as it is.
    Stalled,
}

/// Moves a workflow forward after a stage approval, or closes it.
pub struct ProgressionEngine {
    services: Arc<WorkflowServices>,
    conditions: StageConditionEvaluator,
}

impl ProgressionEngine {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services, conditions: StageConditionEvaluator }
    }

    pub async fn progress(&self, approved: &ApprovalRecord) -> Result<Progression, WorkflowError> {
        if approved.is_final_stage() {
            return self.complete(approved).await;
        }

        let next_number = approved.stage_number + 1;
        let records = self.services.store.list_for_request(&approved.request_id).await?;
        let Some(mut next) = records.into_iter().find(|record| record.stage_number == next_number)
        else {
            warn!(
                event_name = "workflow.progression.stage_missing",
                correlation_id = %approved.request_id,
                request_id = %approved.request_id,
                approval_id = %approved.id,
                next_stage = next_number,
                "next stage record is missing; workflow left in place"
            );
            self.services.audit(
                AuditEvent::new(
                    Some(approved.request_id.clone()),
                    Some(approved.id.clone()),
                    "workflow.stage_missing",
                    AuditCategory::Workflow,
                    "workflow-engine",
                    AuditOutcome::Failed,
                )
                .with_metadata("next_stage", next_number.to_string()),
            );
            return Ok(Progression::Stalled);
        };

        if next.stage_status != StageStatus::Pending {
            warn!(
                event_name = "workflow.progression.stage_closed",
                correlation_id = %approved.request_id,
                request_id = %approved.request_id,
                approval_id = %next.id,
                stage_status = next.stage_status.as_str(),
                "next stage is no longer pending; nothing to activate"
            );
            return Ok(Progression::Stalled);
        }
        if next.stage_started_at.is_some() {
            return Ok(Progression::Advanced(next));
        }

        let request = self.services.load_request(&approved.request_id).await?;
        let evaluation = self.conditions.evaluate(&next.approval_conditions, &request);
        let now = self.services.now();
        let expected_version = next.version;

        next.stage_started_at = Some(now);
        next.stage_deadline = Some(deadline_after(now, next.escalation_hours)?);
        next.conditions_met = Some(evaluation.satisfied);
        next.unmet_conditions = evaluation.unmet;
        next.updated_at = now;
        self.services.commit(&mut next, StageStatus::Pending, expected_version).await?;

        info!(
            event_name = "workflow.progression.stage_activated",
            correlation_id = %next.request_id,
            request_id = %next.request_id,
            approval_id = %next.id,
            stage_number = next.stage_number,
            conditions_met = evaluation.satisfied,
            "next approval stage activated"
        );
        self.services.audit(
            AuditEvent::new(
                Some(next.request_id.clone()),
                Some(next.id.clone()),
                "workflow.stage_activated",
                AuditCategory::Workflow,
                "workflow-engine",
                AuditOutcome::Success,
            )
            .with_metadata("stage_number", next.stage_number.to_string())
            .with_metadata("conditions_met", evaluation.satisfied.to_string()),
        );

        if self.services.settings.notifications.notify_on_activation {
            self.services
                .notify(Notification::to_approvers(
                    NotificationKind::StageActivated,
                    &next,
                    &next.required_approvers,
                ))
                .await;
        }

        Ok(Progression::Advanced(next))
    }

    async fn complete(&self, approved: &ApprovalRecord) -> Result<Progression, WorkflowError> {
        let records = self
            .services
            .store
            .finalize_request(&approved.request_id, WorkflowOutcome::Approved, self.services.now())
            .await?;

        info!(
            event_name = "workflow.progression.completed",
            correlation_id = %approved.request_id,
            request_id = %approved.request_id,
            approval_id = %approved.id,
            "approval workflow completed"
        );
        self.services.audit(
            AuditEvent::new(
                Some(approved.request_id.clone()),
                Some(approved.id.clone()),
                "workflow.approved",
                AuditCategory::Workflow,
                "workflow-engine",
                AuditOutcome::Success,
            )
            .with_metadata("total_stages", approved.total_stages.to_string()),
        );

        let snapshot = records
            .iter()
            .find(|record| record.id == approved.id)
            .cloned()
            .unwrap_or_else(|| approved.clone());
        self.services
            .notify(Notification::to_requester(NotificationKind::WorkflowApproved, &snapshot))
            .await;

        Ok(Progression::Completed(records))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::Progression;
    use crate::audit::AuditOutcome;
    use crate::domain::approval::StageStatus;
    use crate::domain::expense::PaymentMethodType;
    use crate::workflow::store::ApprovalStore;
    use crate::workflow::test_support::{harness, request_with, requester};

    #[tokio::test]
    async fn missing_next_stage_is_reported_as_stalled() {
        let harness = harness();
        let request = request_with(Decimal::new(1_500, 0), PaymentMethodType::DirectVendor, true);
        let config = harness.determiner().determine(&request, &requester()).expect("determine");
        let records =
            harness.instantiator().instantiate(&request, &config).await.expect("instantiate");

        let mut orphan = records[0].clone();
        orphan.total_stages = 3;
        orphan.stage_number = 2;
        orphan.stage_status = StageStatus::Approved;

        let progression = harness.progression().progress(&orphan).await.expect("progress");

        assert_eq!(progression, Progression::Stalled);
        let stalled = harness.audit.events_of_type("workflow.stage_missing");
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].outcome, AuditOutcome::Failed);
    }

    #[tokio::test]
    async fn unmet_conditions_are_attached_without_blocking() {
        let harness = harness();
        let mut request =
            request_with(Decimal::new(7_500, 0), PaymentMethodType::PurchaseOrder, true);
        request.has_business_case = false;
        request.competitive_quote_count = 1;
        let config = harness.determiner().determine(&request, &requester()).expect("determine");
        let records =
            harness.instantiator().instantiate(&request, &config).await.expect("instantiate");

        let mut finance = records[1].clone();
        finance.stage_status = StageStatus::Approved;

        let Progression::Advanced(executive) =
            harness.progression().progress(&finance).await.expect("progress")
        else {
            panic!("executive stage should activate");
        };

        assert!(executive.is_active());
        assert_eq!(executive.conditions_met, Some(false));
        assert_eq!(executive.unmet_conditions.len(), 2);

        let stored =
            harness.store.find_by_id(&executive.id).await.expect("find").expect("record exists");
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn expired_next_stage_is_not_reported_as_advanced() {
        let harness = harness();
        let request = request_with(Decimal::new(1_500, 0), PaymentMethodType::DirectVendor, true);
        let config = harness.determiner().determine(&request, &requester()).expect("determine");
        let records =
            harness.instantiator().instantiate(&request, &config).await.expect("instantiate");

        let mut expired = records[1].clone();
        expired.stage_status = StageStatus::Expired;
        harness.store.overwrite(expired.clone()).await;
        let mut manager = records[0].clone();
        manager.stage_status = StageStatus::Approved;

        let progression = harness.progression().progress(&manager).await.expect("progress");

        assert_eq!(progression, Progression::Stalled);
        let stored = harness.store.find_by_id(&expired.id).await.expect("find").expect("exists");
        assert_eq!(stored.stage_status, StageStatus::Expired);
        assert!(stored.stage_started_at.is_none());
    }
}
