use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome};
use crate::domain::approval::{normalize_id, ApprovalId, ApprovalRecord, StageStatus};
use crate::domain::expense::ExpenseRequest;
use crate::errors::WorkflowError;
use crate::workflow::notify::{Notification, NotificationKind};
use crate::workflow::progression::{Progression, ProgressionEngine};
use crate::workflow::services::{deadline_after, WorkflowServices};
use crate::workflow::store::WorkflowOutcome;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approved,
    Rejected,
    NeedsInfo,
    Delegated,
    Escalated,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::NeedsInfo => "needs_info",
            Self::Delegated => "delegated",
            Self::Escalated => "escalated",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub action: DecisionAction,
    #[serde(default)]
    pub notes: Option<String>,
    /// Defaults to the requested amount.
    #[serde(default)]
    pub approved_amount: Option<Decimal>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub required_information: Vec<String>,
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        Self {
            action: DecisionAction::Approved,
            notes: None,
            approved_amount: None,
            rejection_reason: None,
            required_information: Vec::new(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Rejected,
            rejection_reason: Some(reason.into()),
            ..Self::approve()
        }
    }

    pub fn request_information(items: Vec<String>) -> Self {
        Self { action: DecisionAction::NeedsInfo, required_information: items, ..Self::approve() }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.approved_amount = Some(amount);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// A parallel stage recorded the approval and is still collecting.
    AwaitingApprovals { received: usize, required: usize },
    StageAdvanced(ApprovalRecord),
    WorkflowApproved,
    WorkflowRejected,
    InformationRequested,
    /// The stage was approved but its successor is missing or already closed.
    ProgressionStalled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionResult {
    pub record: ApprovalRecord,
    pub outcome: DecisionOutcome,
}

/// Applies approver decisions to a single approval record.
pub struct DecisionProcessor {
    services: Arc<WorkflowServices>,
    progression: ProgressionEngine,
}

impl DecisionProcessor {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        let progression = ProgressionEngine::new(services.clone());
        Self { services, progression }
    }

    pub async fn process(
        &self,
        approval_id: &ApprovalId,
        decision: ApprovalDecision,
        actor_id: &str,
    ) -> Result<DecisionResult, WorkflowError> {
        let record = self.services.load_approval(approval_id).await?;

        if let Err(error) = self.check_actionable(&record, &decision, actor_id) {
            self.services.refused(
                &record,
                "decision.refused",
                AuditCategory::Decision,
                actor_id,
                &error,
            );
            return Err(error);
        }

        let request = self.services.load_request(&record.request_id).await?;

        match decision.action {
            DecisionAction::Approved => self.approve(record, &request, decision, actor_id).await,
            DecisionAction::Rejected => self.reject(record, decision, actor_id).await,
            DecisionAction::NeedsInfo => self.request_information(record, decision, actor_id).await,
            DecisionAction::Delegated | DecisionAction::Escalated => {
                Err(WorkflowError::InvalidDecision(format!(
                    "`{}` is not an approver decision",
                    decision.action.as_str()
                )))
            }
        }
    }

    /// Answers a needs-info request. Only the requester may respond; the
    /// stage returns to pending with a fresh deadline.
    pub async fn provide_information(
        &self,
        approval_id: &ApprovalId,
        responder_id: &str,
        response: &str,
    ) -> Result<ApprovalRecord, WorkflowError> {
        let mut record = self.services.load_approval(approval_id).await?;

        let check = if record.stage_status != StageStatus::NeedsInfo {
            Err(WorkflowError::AlreadyProcessed {
                approval_id: record.id.clone(),
                status: record.stage_status,
            })
        } else if normalize_id(responder_id) != normalize_id(&record.requester_id) {
            Err(WorkflowError::UnauthorizedApprover {
                approval_id: record.id.clone(),
                actor_id: responder_id.to_string(),
            })
        } else if response.trim().is_empty() {
            Err(WorkflowError::InvalidDecision("information response must not be empty".into()))
        } else {
            Ok(())
        };
        if let Err(error) = check {
            self.services.refused(
                &record,
                "decision.information_refused",
                AuditCategory::Decision,
                responder_id,
                &error,
            );
            return Err(error);
        }

        let now = self.services.now();
        let expected_version = record.version;
        let note = format!("Information provided by {responder_id}: {}", response.trim());
        append_note(&mut record.approval_notes, &note);
        record.stage_status = StageStatus::Pending;
        record.stage_deadline = Some(deadline_after(now, record.escalation_hours)?);
        record.updated_at = now;
        self.services.commit(&mut record, StageStatus::NeedsInfo, expected_version).await?;

        info!(
            event_name = "workflow.decision.information_provided",
            correlation_id = %record.request_id,
            request_id = %record.request_id,
            approval_id = %record.id,
            "requester answered information request"
        );
        self.audit_success(&record, "decision.information_provided", responder_id);
        self.services
            .notify(Notification::to_approvers(
                NotificationKind::StageActivated,
                &record,
                &record.required_approvers,
            ))
            .await;

        Ok(record)
    }

    fn check_actionable(
        &self,
        record: &ApprovalRecord,
        decision: &ApprovalDecision,
        actor_id: &str,
    ) -> Result<(), WorkflowError> {
        if !record.stage_status.accepts_decisions() {
            return Err(WorkflowError::AlreadyProcessed {
                approval_id: record.id.clone(),
                status: record.stage_status,
            });
        }
        if record.stage_started_at.is_none() {
            return Err(WorkflowError::StageNotActive {
                approval_id: record.id.clone(),
                stage_number: record.stage_number,
            });
        }
        if !record.authorizes(actor_id) {
            return Err(WorkflowError::UnauthorizedApprover {
                approval_id: record.id.clone(),
                actor_id: actor_id.to_string(),
            });
        }
        match decision.action {
            DecisionAction::Delegated | DecisionAction::Escalated => {
                Err(WorkflowError::InvalidDecision(format!(
                    "`{}` is applied by the workflow, not by an approver",
                    decision.action.as_str()
                )))
            }
            DecisionAction::NeedsInfo
                if decision.required_information.iter().all(|item| item.trim().is_empty()) =>
            {
                Err(WorkflowError::InvalidDecision(
                    "an information request must name at least one item".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn approve(
        &self,
        mut record: ApprovalRecord,
        request: &ExpenseRequest,
        decision: ApprovalDecision,
        actor_id: &str,
    ) -> Result<DecisionResult, WorkflowError> {
        let amount = decision.approved_amount.unwrap_or(request.amount);
        if amount <= Decimal::ZERO {
            return Err(WorkflowError::InvalidDecision(format!(
                "approved amount {amount} must be positive"
            )));
        }
        if amount > request.amount {
            return Err(WorkflowError::InvalidDecision(format!(
                "approved amount {amount} exceeds requested amount {}",
                request.amount
            )));
        }
        if record.is_final_stage() {
            if let Some(limit) = record.approval_limit.filter(|limit| amount > *limit) {
                return Err(WorkflowError::InvalidDecision(format!(
                    "approved amount {amount} exceeds the stage approval limit {limit}"
                )));
            }
        }
        if record.has_approval_from(actor_id) {
            return Err(WorkflowError::AlreadyProcessed {
                approval_id: record.id.clone(),
                status: record.stage_status,
            });
        }

        let now = self.services.now();
        let expected_status = record.stage_status;
        let expected_version = record.version;
        let credited_before = record.approvals_received();
        record.received_approvals.push(actor_id.to_string());
        if record.approvals_received() == credited_before {
            // The approver this delegate stands in for has already signed.
            return Err(WorkflowError::AlreadyProcessed {
                approval_id: record.id.clone(),
                status: record.stage_status,
            });
        }
        if let Some(notes) = decision.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            append_note(&mut record.approval_notes, notes);
        }
        record.updated_at = now;

        let required = record.approvals_required();
        let received = record.approvals_received();
        if received < required {
            self.services.commit(&mut record, expected_status, expected_version).await?;
            self.audit_success(&record, "decision.partial_approval", actor_id);
            return Ok(DecisionResult {
                record,
                outcome: DecisionOutcome::AwaitingApprovals { received, required },
            });
        }

        record.stage_status = StageStatus::Approved;
        record.approver_id = Some(actor_id.to_string());
        record.approved_at = Some(now);
        record.approved_amount = Some(amount);
        self.services.commit(&mut record, expected_status, expected_version).await?;

        info!(
            event_name = "workflow.decision.approved",
            correlation_id = %record.request_id,
            request_id = %record.request_id,
            approval_id = %record.id,
            stage_number = record.stage_number,
            approver_id = %actor_id,
            "approval stage approved"
        );
        self.audit_success(&record, "decision.approved", actor_id);

        let outcome = match self.progression.progress(&record).await? {
            Progression::Advanced(next) => DecisionOutcome::StageAdvanced(next),
            Progression::Completed(records) => {
                if let Some(finalized) = records.into_iter().find(|stored| stored.id == record.id)
                {
                    record = finalized;
                }
                DecisionOutcome::WorkflowApproved
            }
            Progression::Stalled => DecisionOutcome::ProgressionStalled,
        };

        Ok(DecisionResult { record, outcome })
    }

    async fn reject(
        &self,
        mut record: ApprovalRecord,
        decision: ApprovalDecision,
        actor_id: &str,
    ) -> Result<DecisionResult, WorkflowError> {
        let now = self.services.now();
        let expected_status = record.stage_status;
        let expected_version = record.version;

        record.stage_status = StageStatus::Rejected;
        record.approver_id = Some(actor_id.to_string());
        record.rejected_at = Some(now);
        record.rejection_reason = decision.rejection_reason.or_else(|| decision.notes.clone());
        record.approval_notes = decision.notes;
        record.updated_at = now;
        self.services.commit(&mut record, expected_status, expected_version).await?;

        self.services
            .store
            .finalize_request(&record.request_id, WorkflowOutcome::Rejected, now)
            .await?;

        info!(
            event_name = "workflow.decision.rejected",
            correlation_id = %record.request_id,
            request_id = %record.request_id,
            approval_id = %record.id,
            stage_number = record.stage_number,
            approver_id = %actor_id,
            "approval workflow rejected"
        );
        self.audit_success(&record, "decision.rejected", actor_id);
        self.services.notify(Notification::to_requester(NotificationKind::Rejected, &record)).await;

        Ok(DecisionResult { record, outcome: DecisionOutcome::WorkflowRejected })
    }

    async fn request_information(
        &self,
        mut record: ApprovalRecord,
        decision: ApprovalDecision,
        actor_id: &str,
    ) -> Result<DecisionResult, WorkflowError> {
        let now = self.services.now();
        let expected_status = record.stage_status;
        let expected_version = record.version;

        record.stage_status = StageStatus::NeedsInfo;
        record.required_information = decision
            .required_information
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();
        record.approval_notes = decision.notes;
        record.updated_at = now;
        self.services.commit(&mut record, expected_status, expected_version).await?;

        info!(
            event_name = "workflow.decision.information_requested",
            correlation_id = %record.request_id,
            request_id = %record.request_id,
            approval_id = %record.id,
            items = record.required_information.len(),
            "approver requested more information"
        );
        self.audit_success(&record, "decision.information_requested", actor_id);
        self.services
            .notify(Notification::to_requester(NotificationKind::InformationRequested, &record))
            .await;

        Ok(DecisionResult { record, outcome: DecisionOutcome::InformationRequested })
    }

    fn audit_success(&self, record: &ApprovalRecord, event_type: &str, actor_id: &str) {
        self.services.audit(
            AuditEvent::new(
                Some(record.request_id.clone()),
                Some(record.id.clone()),
                event_type,
                AuditCategory::Decision,
                actor_id,
                AuditOutcome::Success,
            )
            .with_metadata("stage_number", record.stage_number.to_string())
            .with_metadata("stage_status", record.stage_status.as_str()),
        );
    }
}

fn append_note(notes: &mut Option<String>, note: &str) {
    *notes = Some(match notes.take() {
        Some(existing) if !existing.is_empty() => format!("{existing}\n{note}"),
        _ => note.to_string(),
    });
}
