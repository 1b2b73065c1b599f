use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::WorkflowSettings;
use crate::domain::approval::{ApproverRole, EscalationRules, StageConditions};
use crate::domain::expense::{ExpenseRequest, Requester};
use crate::errors::WorkflowError;
use crate::workflow::definition::{WorkflowConfig, WorkflowStage, WorkflowType};
use crate::workflow::resolver::ApproverResolver;
use crate::workflow::risk::RiskAssessor;

pub const AUTO_APPROVAL_REASON: &str = "under auto-approval limit";
const EXECUTIVE_MINIMUM_QUOTES: u32 = 3;

/// Decides between auto-approval and a staged workflow for a request.
pub struct WorkflowDeterminer {
    resolver: Arc<dyn ApproverResolver>,
    risk: Arc<dyn RiskAssessor>,
    settings: WorkflowSettings,
}

struct StageTemplate {
    role: ApproverRole,
    name: &'static str,
    description: &'static str,
    approval_limit: Option<Decimal>,
    deadline_hours: u32,
    escalate_to: Option<ApproverRole>,
    conditions: StageConditions,
}

impl WorkflowDeterminer {
    pub fn new(
        resolver: Arc<dyn ApproverResolver>,
        risk: Arc<dyn RiskAssessor>,
        settings: WorkflowSettings,
    ) -> Self {
        Self { resolver, risk, settings }
    }

    pub fn determine(
        &self,
        request: &ExpenseRequest,
        requester: &Requester,
    ) -> Result<WorkflowConfig, WorkflowError> {
        let method = &request.payment_method;
        let policy = self.settings.payment_methods.get(&method.method_type).ok_or_else(|| {
            WorkflowError::Configuration(format!(
                "no approval policy configured for payment method `{}`",
                method.method_type
            ))
        })?;

        let under_limit = policy.auto_approval_limit.is_some_and(|limit| request.amount <= limit);
        if under_limit && !method.requires_approval && !policy.always_requires_approval {
            debug!(
                event_name = "workflow.determine.auto_approved",
                correlation_id = %request.id,
                request_id = %request.id,
                amount = %request.amount,
                payment_method = method.method_type.as_str(),
                "request is under its auto-approval limit"
            );
            return Ok(WorkflowConfig {
                workflow_type: WorkflowType::AutoApproval,
                stages: Vec::new(),
                parallel_approval: false,
                auto_approved: Some(true),
                auto_approval_reason: Some(AUTO_APPROVAL_REASON.to_string()),
                notifications: self.settings.notifications,
            });
        }

        let stages = self
            .templates(request)
            .into_iter()
            .zip(1u32..)
            .map(|(template, stage_number)| {
                self.build_stage(template, stage_number, request, requester)
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            event_name = "workflow.determine.staged",
            correlation_id = %request.id,
            request_id = %request.id,
            amount = %request.amount,
            stages = stages.len(),
            "request routed through staged approval"
        );

        Ok(WorkflowConfig {
            workflow_type: WorkflowType::Default,
            stages,
            parallel_approval: false,
            auto_approved: None,
            auto_approval_reason: None,
            notifications: self.settings.notifications,
        })
    }

    fn templates(&self, request: &ExpenseRequest) -> Vec<StageTemplate> {
        let settings = &self.settings;
        let mut templates = vec![StageTemplate {
            role: ApproverRole::Manager,
            name: "Manager Approval",
            description: "Direct manager reviews the expense",
            approval_limit: Some(settings.high_value_threshold),
            deadline_hours: settings.manager_deadline_hours,
            escalate_to: Some(ApproverRole::Executive),
            conditions: StageConditions::default(),
        }];

        if request.amount >= settings.high_value_threshold {
            templates.push(StageTemplate {
                role: ApproverRole::Finance,
                name: "Finance Review",
                description: "Finance checks budget and policy compliance",
                approval_limit: Some(settings.executive_threshold),
                deadline_hours: settings.finance_deadline_hours,
                escalate_to: Some(ApproverRole::Executive),
                conditions: StageConditions::default(),
            });
        }

        if request.amount >= settings.executive_threshold {
            let quotes = request.payment_method.method_type.requires_competitive_quotes();
            templates.push(StageTemplate {
                role: ApproverRole::Executive,
                name: "Executive Approval",
                description: "Executive sign-off for high-value spend",
                approval_limit: None,
                deadline_hours: settings.executive_deadline_hours,
                escalate_to: None,
                conditions: StageConditions {
                    requires_business_case: true,
                    requires_competitive_quotes: quotes,
                    minimum_quotes: if quotes { EXECUTIVE_MINIMUM_QUOTES } else { 0 },
                    ..StageConditions::default()
                },
            });
        }

        templates
    }

    fn build_stage(
        &self,
        template: StageTemplate,
        stage_number: u32,
        request: &ExpenseRequest,
        requester: &Requester,
    ) -> Result<WorkflowStage, WorkflowError> {
        let required_approvers = self
            .resolver
            .resolve(template.role, requester)
            .map_err(|error| WorkflowError::InvalidWorkflow(error.to_string()))?;
        let risk_level = self.risk.assess(request, stage_number, requester);
        let requires_additional_review = request.amount >= self.settings.executive_threshold
            || risk_level.requires_additional_review();

        Ok(WorkflowStage {
            stage_number,
            name: template.name.to_string(),
            description: template.description.to_string(),
            role: template.role,
            required_approvers,
            minimum_approvers: 1,
            requires_all_approvers: false,
            approval_limit: template.approval_limit,
            deadline_hours: template.deadline_hours,
            escalation_rules: EscalationRules {
                escalate_to: template.escalate_to,
                notify_requester: self.settings.notifications.notify_requester,
                ..EscalationRules::default()
            },
            allow_delegation: self.settings.allow_delegation,
            conditions: template.conditions,
            risk_level,
            requires_additional_review,
        })
    }
}
