use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{NotificationSettings, MAX_DEADLINE_HOURS};
use crate::domain::approval::{
    Approver, ApproverRole, EscalationRules, RiskLevel, StageConditions,
};
use crate::errors::WorkflowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Default,
    AutoApproval,
    Custom,
    Template,
    Expedited,
}

/// One step of a workflow before it is persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub stage_number: u32,
    pub name: String,
    pub description: String,
    pub role: ApproverRole,
    pub required_approvers: Vec<Approver>,
    pub minimum_approvers: u32,
    pub requires_all_approvers: bool,
    pub approval_limit: Option<Decimal>,
    pub deadline_hours: u32,
    pub escalation_rules: EscalationRules,
    pub allow_delegation: bool,
    pub conditions: StageConditions,
    pub risk_level: RiskLevel,
    pub requires_additional_review: bool,
}

/// The decided shape of a request's approval workflow. Consumed once by the
/// instantiator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub workflow_type: WorkflowType,
    pub stages: Vec<WorkflowStage>,
    pub parallel_approval: bool,
    /// `Some(true)` only for auto-approved requests.
    pub auto_approved: Option<bool>,
    pub auto_approval_reason: Option<String>,
    pub notifications: NotificationSettings,
}

impl WorkflowConfig {
    pub fn total_stages(&self) -> u32 {
        u32::try_from(self.stages.len()).unwrap_or(u32::MAX)
    }

    pub fn is_auto_approved(&self) -> bool {
        self.auto_approved == Some(true)
    }

    pub fn stage(&self, stage_number: u32) -> Option<&WorkflowStage> {
        self.stages.iter().find(|stage| stage.stage_number == stage_number)
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.is_auto_approved() {
            if !self.stages.is_empty() {
                return Err(WorkflowError::InvalidWorkflow(
                    "auto-approved workflow must not define stages".to_string(),
                ));
            }
            return Ok(());
        }

        if self.stages.is_empty() {
            return Err(WorkflowError::InvalidWorkflow(
                "workflow requires at least one stage".to_string(),
            ));
        }

        for (index, stage) in self.stages.iter().enumerate() {
            let expected = u32::try_from(index + 1).unwrap_or(u32::MAX);
            if stage.stage_number != expected {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "stage numbers must be contiguous from 1; found {} at position {expected}",
                    stage.stage_number
                )));
            }

            if stage.required_approvers.is_empty() {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "stage {} (`{}`) has no approvers",
                    stage.stage_number, stage.name
                )));
            }

            let available = u32::try_from(stage.required_approvers.len()).unwrap_or(u32::MAX);
            if stage.minimum_approvers == 0 || stage.minimum_approvers > available {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "stage {} requires {} approvals but has {available} approvers",
                    stage.stage_number, stage.minimum_approvers
                )));
            }

            if stage.deadline_hours == 0 || stage.deadline_hours > MAX_DEADLINE_HOURS {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "stage {} deadline of {}h is outside 1..={MAX_DEADLINE_HOURS}",
                    stage.stage_number, stage.deadline_hours
                )));
            }
        }

        Ok(())
    }
}
