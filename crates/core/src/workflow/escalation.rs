use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome};
use crate::domain::approval::{ApprovalId, ApprovalRecord, Approver, StageStatus};
use crate::domain::expense::Requester;
use crate::errors::WorkflowError;
use crate::workflow::notify::{Notification, NotificationKind};
use crate::workflow::services::WorkflowServices;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub approval_id: ApprovalId,
    pub error_class: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: usize,
    /// Records newly escalated by this sweep.
    pub escalated: usize,
    /// Records another writer moved between the scan and the update.
    pub skipped: usize,
    pub failures: Vec<SweepFailure>,
}

enum SweepStep {
    Escalated,
    Skipped,
}

/// Escalates active stages whose deadline has passed. Safe to run on any
/// schedule; a second sweep at the same instant finds nothing to do.
pub struct EscalationSweeper {
    services: Arc<WorkflowServices>,
}

impl EscalationSweeper {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services }
    }

    pub async fn sweep(&self) -> Result<SweepReport, WorkflowError> {
        let now = self.services.now();
        let overdue = self.services.store.list_overdue(now).await?;
        let mut report = SweepReport { scanned: overdue.len(), ..SweepReport::default() };

        for record in overdue {
            let approval_id = record.id.clone();
            let request_id = record.request_id.clone();
            match self.escalate(record, now).await {
                Ok(SweepStep::Escalated) => report.escalated += 1,
                Ok(SweepStep::Skipped) => report.skipped += 1,
                Err(error) => {
                    warn!(
                        event_name = "workflow.escalation.failed",
                        correlation_id = %request_id,
                        request_id = %request_id,
                        approval_id = %approval_id,
                        error_class = error.kind().as_str(),
                        error = %error,
                        "escalation failed; record stays pending for the next sweep"
                    );
                    self.services.audit(
                        AuditEvent::new(
                            Some(request_id),
                            Some(approval_id.clone()),
                            "escalation.failed",
                            AuditCategory::Escalation,
                            "escalation-sweeper",
                            AuditOutcome::Failed,
                        )
                        .with_metadata("error_class", error.kind().as_str()),
                    );
                    report.failures.push(SweepFailure {
                        approval_id,
                        error_class: error.kind().as_str().to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }

        info!(
            event_name = "workflow.escalation.sweep_completed",
            scanned = report.scanned,
            escalated = report.escalated,
            skipped = report.skipped,
            failed = report.failures.len(),
            "escalation sweep completed"
        );
        Ok(report)
    }

    async fn escalate(
        &self,
        mut record: ApprovalRecord,
        now: DateTime<Utc>,
    ) -> Result<SweepStep, WorkflowError> {
        let Some(deadline) = record.stage_deadline else {
            return Ok(SweepStep::Skipped);
        };

        let role = record
            .escalation_rules
            .escalate_to
            .unwrap_or(self.services.settings.default_escalation_role);
        let targets = self
            .services
            .resolver
            .resolve(role, &Requester::from_id(record.requester_id.clone()))
            .map_err(|error| WorkflowError::EscalationFailed {
                approval_id: record.id.clone(),
                reason: error.to_string(),
            })?;
        let Some(first_target) = targets.first() else {
            return Err(WorkflowError::EscalationFailed {
                approval_id: record.id.clone(),
                reason: format!("no `{role}` approver to escalate to"),
            });
        };

        let expected_version = record.version;
        record.stage_status = StageStatus::Escalated;
        record.escalated_at = Some(now);
        record.escalated_to = Some(first_target.id.clone());
        record.escalation_reason = Some(overdue_reason(now, deadline));
        for target in &targets {
            if !record.authorizes(&target.id) {
                record.required_approvers.push(Approver { escalated: true, ..target.clone() });
            }
        }
        record.updated_at = now;

        match self.services.commit(&mut record, StageStatus::Pending, expected_version).await {
            Ok(()) => {}
            Err(WorkflowError::AlreadyProcessed { .. }) => return Ok(SweepStep::Skipped),
            Err(error) => return Err(error),
        }

        info!(
            event_name = "workflow.escalation.escalated",
            correlation_id = %record.request_id,
            request_id = %record.request_id,
            approval_id = %record.id,
            escalated_to = %first_target.id,
            role = role.as_str(),
            "overdue approval escalated"
        );
        self.services.audit(
            AuditEvent::new(
                Some(record.request_id.clone()),
                Some(record.id.clone()),
                "escalation.escalated",
                AuditCategory::Escalation,
                "escalation-sweeper",
                AuditOutcome::Success,
            )
            .with_metadata("escalated_to", first_target.id.clone())
            .with_metadata("reason", record.escalation_reason.clone().unwrap_or_default()),
        );

        let mut notification =
            Notification::to_approvers(NotificationKind::Escalated, &record, &targets);
        if record.escalation_rules.notify_requester {
            notification = notification.also_requester();
        }
        self.services.notify(notification).await;

        Ok(SweepStep::Escalated)
    }
}

fn overdue_reason(now: DateTime<Utc>, deadline: DateTime<Utc>) -> String {
    let overdue = now - deadline;
    let hours = overdue.num_hours();
    let minutes = overdue.num_minutes() - hours * 60;
    format!("overdue by {hours}h {minutes}m")
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal::Decimal;

    use crate::domain::approval::{ApproverRole, StageStatus};
    use crate::domain::expense::PaymentMethodType;
    use crate::errors::ErrorKind;
    use crate::workflow::decision::ApprovalDecision;
    use crate::workflow::notify::NotificationKind;
    use crate::workflow::resolver::DirectoryApproverResolver;
    use crate::workflow::store::ApprovalStore;
    use crate::workflow::test_support::{harness, harness_with_resolver, request_with};

    #[tokio::test]
    async fn overdue_stage_is_escalated_to_executive() {
        let harness = harness();
        let records = harness
            .start(request_with(Decimal::new(60, 0), PaymentMethodType::CreditCard, true))
            .await;

        harness.clock.advance(Duration::hours(48 + 3) + Duration::minutes(15));
        let report = harness.sweeper().sweep().await.expect("sweep");

        assert_eq!(report.escalated, 1);
        let escalated =
            harness.store.find_by_id(&records[0].id).await.expect("find").expect("exists");
        assert_eq!(escalated.stage_status, StageStatus::Escalated);
        assert_eq!(escalated.escalated_at, Some(harness.clock_now()));
        assert_eq!(escalated.escalated_to.as_deref(), Some("u-director"));
        assert_eq!(escalated.escalation_reason.as_deref(), Some("overdue by 3h 15m"));
        assert!(escalated.authorizes("u-director"));
        assert!(escalated.required_approvers.iter().any(|a| a.role == ApproverRole::Executive));
        assert!(escalated.required_approvers.iter().any(|approver| approver.escalated));
        harness.flush().await;
        assert_eq!(harness.notifier.kinds().last(), Some(&NotificationKind::Escalated));
    }

    #[tokio::test]
    async fn escalated_stage_still_accepts_decisions() {
        let harness = harness();
        let records = harness
            .start(request_with(Decimal::new(60, 0), PaymentMethodType::CreditCard, true))
            .await;
        harness.clock.advance(Duration::hours(60));
        harness.sweeper().sweep().await.expect("sweep");

        let result = harness
            .decisions()
            .process(&records[0].id, ApprovalDecision::approve(), "u-director")
            .await
            .expect("escalation target approves");
        assert_eq!(result.record.stage_status, StageStatus::Approved);
    }

    #[tokio::test]
    async fn stages_within_deadline_are_left_alone() {
        let harness = harness();
        harness.start(request_with(Decimal::new(60, 0), PaymentMethodType::CreditCard, true)).await;

        harness.clock.advance(Duration::hours(47));
        let report = harness.sweeper().sweep().await.expect("sweep");

        assert_eq!(report.scanned, 0);
        assert_eq!(report.escalated, 0);
    }

    #[tokio::test]
    async fn unresolvable_target_is_reported_and_left_pending() {
        let resolver = DirectoryApproverResolver::new(
            crate::workflow::test_support::members()
                .into_iter()
                .filter(|member| member.role != Some(ApproverRole::Executive))
                .collect(),
        );
        let harness = harness_with_resolver(resolver);
        let records = harness
            .start(request_with(Decimal::new(60, 0), PaymentMethodType::CreditCard, true))
            .await;

        harness.clock.advance(Duration::hours(50));
        let report = harness.sweeper().sweep().await.expect("sweep");

        assert_eq!(report.escalated, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error_class, ErrorKind::EscalationFailed.as_str());
        let stored = harness.store.find_by_id(&records[0].id).await.expect("find").expect("exists");
        assert_eq!(stored.stage_status, StageStatus::Pending);
        assert_eq!(stored.version, 1);
    }
}
