use std::sync::Arc;

use tracing::info;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome};
use crate::domain::approval::{normalize_id, ApprovalId, ApprovalRecord, Approver, StageStatus};
use crate::errors::WorkflowError;
use crate::workflow::notify::{Notification, NotificationKind};
use crate::workflow::services::WorkflowServices;

/// Adds a delegate to a pending stage's approver set.
pub struct DelegationHandler {
    services: Arc<WorkflowServices>,
}

impl DelegationHandler {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services }
    }

    pub async fn delegate(
        &self,
        approval_id: &ApprovalId,
        delegate_to: &str,
        delegated_by: &str,
        reason: Option<&str>,
    ) -> Result<ApprovalRecord, WorkflowError> {
        let mut record = self.services.load_approval(approval_id).await?;

        let delegator = match self.check_delegation(&record, delegate_to, delegated_by) {
            Ok(delegator) => delegator,
            Err(error) => {
                self.services.refused(
                    &record,
                    "delegation.refused",
                    AuditCategory::Delegation,
                    delegated_by,
                    &error,
                );
                return Err(error);
            }
        };

        let now = self.services.now();
        let expected_version = record.version;
        let delegate_id = delegate_to.trim().to_string();

        // Delegate identities are not checked against any directory.
        record.required_approvers.push(Approver {
            id: delegate_id.clone(),
            name: delegate_id.clone(),
            email: String::new(),
            role: delegator.role,
            delegated: true,
            delegated_by: delegator.delegated_by.clone().or_else(|| Some(delegator.id.clone())),
            escalated: false,
        });
        record.delegated_to = Some(delegate_id.clone());
        record.delegated_by = Some(delegator.id.clone());
        record.delegated_at = Some(now);
        record.delegation_reason =
            reason.map(str::trim).filter(|text| !text.is_empty()).map(str::to_string);
        record.updated_at = now;
        self.services.commit(&mut record, StageStatus::Pending, expected_version).await?;

        info!(
            event_name = "workflow.delegation.applied",
            correlation_id = %record.request_id,
            request_id = %record.request_id,
            approval_id = %record.id,
            delegated_by = %delegator.id,
            delegated_to = %delegate_id,
            "approval delegated"
        );
        self.services.audit(
            AuditEvent::new(
                Some(record.request_id.clone()),
                Some(record.id.clone()),
                "delegation.applied",
                AuditCategory::Delegation,
                delegated_by,
                AuditOutcome::Success,
            )
            .with_metadata("delegated_to", delegate_id.clone()),
        );

        if let Some(delegate) = record.required_approvers.last().cloned() {
            self.services
                .notify(Notification::to_approvers(
                    NotificationKind::Delegated,
                    &record,
                    &[delegate],
                ))
                .await;
        }

        Ok(record)
    }

    fn check_delegation(
        &self,
        record: &ApprovalRecord,
        delegate_to: &str,
        delegated_by: &str,
    ) -> Result<Approver, WorkflowError> {
        let failed = |reason: &str| WorkflowError::DelegationFailed {
            approval_id: record.id.clone(),
            reason: reason.to_string(),
        };

        if record.stage_status.is_terminal() {
            return Err(WorkflowError::AlreadyProcessed {
                approval_id: record.id.clone(),
                status: record.stage_status,
            });
        }
        if !record.allow_delegation {
            return Err(failed("delegation is not allowed for this stage"));
        }
        if record.stage_status != StageStatus::Pending {
            return Err(failed(&format!("stage is `{}`, not pending", record.stage_status)));
        }
        if record.stage_started_at.is_none() {
            return Err(WorkflowError::StageNotActive {
                approval_id: record.id.clone(),
                stage_number: record.stage_number,
            });
        }

        let delegator_key = normalize_id(delegated_by);
        let Some(delegator) = record
            .required_approvers
            .iter()
            .find(|approver| normalize_id(&approver.id) == delegator_key)
        else {
            return Err(WorkflowError::UnauthorizedApprover {
                approval_id: record.id.clone(),
                actor_id: delegated_by.to_string(),
            });
        };

        let delegate_key = normalize_id(delegate_to);
        if delegate_key.is_empty() {
            return Err(failed("delegate must be named"));
        }
        if record.authorizes(delegate_to) {
            return Err(failed(&format!("`{}` is already an approver", delegate_to.trim())));
        }

        Ok(delegator.clone())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::audit::AuditOutcome;
    use crate::domain::approval::StageStatus;
    use crate::domain::expense::PaymentMethodType;
    use crate::errors::ErrorKind;
    use crate::workflow::decision::ApprovalDecision;
    use crate::workflow::notify::{NotificationKind, NotificationTarget};
    use crate::workflow::store::ApprovalStore;
    use crate::workflow::test_support::{harness, request_with};

    #[tokio::test]
    async fn delegate_can_decide_alongside_original_approver() {
        let harness = harness();
        let records = harness
            .start(request_with(Decimal::new(60, 0), PaymentMethodType::CreditCard, true))
            .await;
        let approval_id = records[0].id.clone();

        let delegated = harness
            .delegation()
            .delegate(&approval_id, "u-deputy", "u-assignor", Some("on leave"))
            .await
            .expect("delegate");

        assert_eq!(delegated.stage_status, StageStatus::Pending);
        assert_eq!(delegated.delegated_to.as_deref(), Some("u-deputy"));
        assert_eq!(delegated.delegated_by.as_deref(), Some("u-assignor"));
        assert_eq!(delegated.delegation_reason.as_deref(), Some("on leave"));
        assert!(delegated.required_approvers.iter().any(|approver| approver.delegated));
        assert!(delegated.authorizes("u-assignor"));

        harness.flush().await;
        let last = harness.notifier.sent().pop().expect("delegate notified");
        assert_eq!(last.kind, NotificationKind::Delegated);
        assert_eq!(last.targets.first().map(NotificationTarget::id), Some("u-deputy"));

        harness
            .decisions()
            .process(&approval_id, ApprovalDecision::approve(), "u-deputy")
            .await
            .expect("delegate approves");
    }

    #[tokio::test]
    async fn outsider_cannot_delegate() {
        let harness = harness();
        let records = harness
            .start(request_with(Decimal::new(60, 0), PaymentMethodType::CreditCard, true))
            .await;

        let error = harness
            .delegation()
            .delegate(&records[0].id, "u-deputy", "u-intruder", None)
            .await
            .expect_err("not an approver");

        assert_eq!(error.kind(), ErrorKind::UnauthorizedApprover);
        let refused = harness.audit.events_of_type("delegation.refused");
        assert_eq!(refused.len(), 1);
        assert_eq!(refused[0].outcome, AuditOutcome::Rejected);
        let stored = harness.store.find_by_id(&records[0].id).await.expect("find").expect("exists");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn duplicate_or_blank_delegate_fails() {
        let harness = harness();
        let records = harness
            .start(request_with(Decimal::new(60, 0), PaymentMethodType::CreditCard, true))
            .await;

        for delegate in ["  ", "U-ASSIGNOR"] {
            let error = harness
                .delegation()
                .delegate(&records[0].id, delegate, "u-assignor", None)
                .await
                .expect_err("invalid delegate");
            assert_eq!(error.kind(), ErrorKind::DelegationFailed);
        }
    }

    #[tokio::test]
    async fn stage_without_delegation_rights_refuses() {
        let harness = harness();
        let records = harness
            .start(request_with(Decimal::new(60, 0), PaymentMethodType::CreditCard, true))
            .await;
        let mut locked = records[0].clone();
        locked.allow_delegation = false;
        harness.store.overwrite(locked).await;

        let error = harness
            .delegation()
            .delegate(&records[0].id, "u-deputy", "u-assignor", None)
            .await
            .expect_err("delegation disabled");
        assert_eq!(error.kind(), ErrorKind::DelegationFailed);
    }

    #[tokio::test]
    async fn finished_stage_cannot_be_delegated() {
        let harness = harness();
        let records = harness
            .start(request_with(Decimal::new(60, 0), PaymentMethodType::CreditCard, true))
            .await;
        harness
            .decisions()
            .process(&records[0].id, ApprovalDecision::approve(), "u-assignor")
            .await
            .expect("approve");

        let error = harness
            .delegation()
            .delegate(&records[0].id, "u-deputy", "u-assignor", None)
            .await
            .expect_err("already approved");
        assert_eq!(error.kind(), ErrorKind::WorkflowAlreadyProcessed);
    }
}
