use std::sync::Arc;

use tracing::info;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome};
use crate::domain::approval::{
    ApprovalId, ApprovalRecord, EscalationRules, RiskLevel, StageConditions, StageStatus,
};
use crate::domain::expense::{ExpenseRequest, PaymentStatus};
use crate::errors::WorkflowError;
use crate::workflow::conditions::StageConditionEvaluator;
use crate::workflow::definition::{WorkflowConfig, WorkflowStage};
use crate::workflow::determiner::AUTO_APPROVAL_REASON;
use crate::workflow::notify::{Notification, NotificationKind};
use crate::workflow::services::{deadline_after, WorkflowServices};

const AUTO_APPROVAL_STAGE_NAME: &str = "Auto Approval";

/// Turns a decided workflow into persisted approval records.
pub struct WorkflowInstantiator {
    services: Arc<WorkflowServices>,
    conditions: StageConditionEvaluator,
}

impl WorkflowInstantiator {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services, conditions: StageConditionEvaluator }
    }

    pub async fn instantiate(
        &self,
        request: &ExpenseRequest,
        config: &WorkflowConfig,
    ) -> Result<Vec<ApprovalRecord>, WorkflowError> {
        config.validate()?;
        let now = self.services.now();

        let mut request = request.clone();
        request.updated_at = now;

        if config.is_auto_approved() {
            request.payment_status = PaymentStatus::Approved;
            let record = self.auto_approved_record(&request, config);
            self.services.store.insert_workflow(&request, std::slice::from_ref(&record)).await?;

            info!(
                event_name = "workflow.instantiate.auto_approved",
                correlation_id = %request.id,
                request_id = %request.id,
                approval_id = %record.id,
                "request auto-approved"
            );
            self.services.audit(
                AuditEvent::new(
                    Some(request.id.clone()),
                    Some(record.id.clone()),
                    "workflow.auto_approved",
                    AuditCategory::Workflow,
                    "workflow-engine",
                    AuditOutcome::Success,
                )
                .with_metadata("amount", request.amount.to_string()),
            );
            return Ok(vec![record]);
        }

        request.payment_status = PaymentStatus::PendingApproval;
        let total_stages = config.total_stages();
        let mut records: Vec<ApprovalRecord> = config
            .stages
            .iter()
            .map(|stage| self.stage_record(&request, config, stage, total_stages))
            .collect();

        if let Some(first) = records.first_mut() {
            let evaluation = self.conditions.evaluate(&first.approval_conditions, &request);
            first.stage_started_at = Some(now);
            first.stage_deadline = Some(deadline_after(now, first.escalation_hours)?);
            first.conditions_met = Some(evaluation.satisfied);
            first.unmet_conditions = evaluation.unmet;
        }

        self.services.store.insert_workflow(&request, &records).await?;

        info!(
            event_name = "workflow.instantiate.created",
            correlation_id = %request.id,
            request_id = %request.id,
            total_stages,
            "approval workflow created"
        );
        self.services.audit(
            AuditEvent::new(
                Some(request.id.clone()),
                records.first().map(|record| record.id.clone()),
                "workflow.created",
                AuditCategory::Workflow,
                "workflow-engine",
                AuditOutcome::Success,
            )
            .with_metadata("total_stages", total_stages.to_string())
            .with_metadata("amount", request.amount.to_string()),
        );

        if let Some(first) = records.first() {
            if config.notifications.notify_on_activation {
                self.services
                    .notify(Notification::to_approvers(
                        NotificationKind::StageActivated,
                        first,
                        &first.required_approvers,
                    ))
                    .await;
            }
        }

        Ok(records)
    }

    fn auto_approved_record(
        &self,
        request: &ExpenseRequest,
        config: &WorkflowConfig,
    ) -> ApprovalRecord {
        let now = request.updated_at;
        let reason =
            config.auto_approval_reason.clone().unwrap_or_else(|| AUTO_APPROVAL_REASON.to_string());

        ApprovalRecord {
            id: ApprovalId::generate(),
            request_id: request.id.clone(),
            requester_id: request.requester_id.clone(),
            stage_number: 1,
            total_stages: 1,
            stage_name: AUTO_APPROVAL_STAGE_NAME.to_string(),
            is_parallel: false,
            required_approvers: Vec::new(),
            minimum_approvers: 0,
            requires_all_approvers: false,
            stage_status: StageStatus::Approved,
            stage_started_at: Some(now),
            stage_deadline: None,
            escalation_hours: 0,
            approval_conditions: StageConditions::default(),
            escalation_rules: EscalationRules::default(),
            allow_delegation: false,
            approval_limit: None,
            risk_level: RiskLevel::Low,
            requires_additional_review: false,
            approver_id: None,
            approved_at: Some(now),
            approval_notes: Some(reason),
            approved_amount: Some(request.amount),
            received_approvals: Vec::new(),
            rejected_at: None,
            rejection_reason: None,
            required_information: Vec::new(),
            delegated_to: None,
            delegated_by: None,
            delegated_at: None,
            delegation_reason: None,
            escalated_to: None,
            escalated_at: None,
            escalation_reason: None,
            conditions_met: Some(true),
            unmet_conditions: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn stage_record(
        &self,
        request: &ExpenseRequest,
        config: &WorkflowConfig,
        stage: &WorkflowStage,
        total_stages: u32,
    ) -> ApprovalRecord {
        let now = request.updated_at;
        ApprovalRecord {
            id: ApprovalId::generate(),
            request_id: request.id.clone(),
            requester_id: request.requester_id.clone(),
            stage_number: stage.stage_number,
            total_stages,
            stage_name: stage.name.clone(),
            is_parallel: config.parallel_approval,
            required_approvers: stage.required_approvers.clone(),
            minimum_approvers: stage.minimum_approvers,
            requires_all_approvers: stage.requires_all_approvers,
            stage_status: StageStatus::Pending,
            stage_started_at: None,
            stage_deadline: None,
            escalation_hours: stage.deadline_hours,
            approval_conditions: stage.conditions.clone(),
            escalation_rules: stage.escalation_rules.clone(),
            allow_delegation: stage.allow_delegation,
            approval_limit: stage.approval_limit,
            risk_level: stage.risk_level,
            requires_additional_review: stage.requires_additional_review,
            approver_id: None,
            approved_at: None,
            approval_notes: None,
            approved_amount: None,
            received_approvals: Vec::new(),
            rejected_at: None,
            rejection_reason: None,
            required_information: Vec::new(),
            delegated_to: None,
            delegated_by: None,
            delegated_at: None,
            delegation_reason: None,
            escalated_to: None,
            escalated_at: None,
            escalation_reason: None,
            conditions_met: None,
            unmet_conditions: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}
