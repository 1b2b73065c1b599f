use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::{RiskSettings, WorkflowSettings};
use crate::domain::approval::{ApprovalId, ApprovalRecord};
use crate::domain::expense::{ExpenseRequest, ExpenseRequestId, Requester};
use crate::errors::WorkflowError;
use crate::workflow::clock::{Clock, SystemClock};
use crate::workflow::decision::{ApprovalDecision, DecisionProcessor, DecisionResult};
use crate::workflow::definition::WorkflowConfig;
use crate::workflow::delegation::DelegationHandler;
use crate::workflow::determiner::WorkflowDeterminer;
use crate::workflow::escalation::{EscalationSweeper, SweepReport};
use crate::workflow::instantiator::WorkflowInstantiator;
use crate::workflow::notify::{
    NotificationDispatcher, NotificationGateway, TracingNotificationGateway,
};
use crate::workflow::resolver::ApproverResolver;
use crate::workflow::risk::{RiskAssessor, RuleBasedRiskAssessor};
use crate::workflow::services::WorkflowServices;
use crate::workflow::store::ApprovalStore;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkflowStart {
    pub config: WorkflowConfig,
    pub records: Vec<ApprovalRecord>,
}

/// A request together with its full stage history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkflowHistory {
    pub request: ExpenseRequest,
    pub records: Vec<ApprovalRecord>,
}

impl WorkflowHistory {
    pub fn active_stage(&self) -> Option<&ApprovalRecord> {
        self.records.iter().find(|record| record.is_active())
    }
}

pub struct EngineBuilder {
    store: Arc<dyn ApprovalStore>,
    resolver: Arc<dyn ApproverResolver>,
    risk: Option<Arc<dyn RiskAssessor>>,
    notifier: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    settings: WorkflowSettings,
    risk_settings: RiskSettings,
}

impl EngineBuilder {
    pub fn settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn risk_settings(mut self, settings: RiskSettings) -> Self {
        self.risk_settings = settings;
        self
    }

    pub fn risk_assessor(mut self, risk: Arc<dyn RiskAssessor>) -> Self {
        self.risk = Some(risk);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationGateway>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn build(self) -> ApprovalWorkflowEngine {
        let risk = self
            .risk
            .unwrap_or_else(|| Arc::new(RuleBasedRiskAssessor::new(self.risk_settings.clone())));
        let notifier = NotificationDispatcher::new(
            self.notifier,
            Duration::from_millis(self.settings.notification_timeout_ms),
        );
        let services = Arc::new(WorkflowServices {
            store: self.store,
            resolver: self.resolver.clone(),
            notifier,
            clock: self.clock,
            audit: self.audit,
            settings: self.settings.clone(),
        });

        ApprovalWorkflowEngine {
            determiner: WorkflowDeterminer::new(self.resolver, risk, self.settings),
            instantiator: WorkflowInstantiator::new(services.clone()),
            decisions: DecisionProcessor::new(services.clone()),
            delegation: DelegationHandler::new(services.clone()),
            sweeper: EscalationSweeper::new(services.clone()),
            services,
        }
    }
}

/// Entry point for callers: starts workflows and routes every later action
/// to the component that owns it.
pub struct ApprovalWorkflowEngine {
    services: Arc<WorkflowServices>,
    determiner: WorkflowDeterminer,
    instantiator: WorkflowInstantiator,
    decisions: DecisionProcessor,
    delegation: DelegationHandler,
    sweeper: EscalationSweeper,
}

impl ApprovalWorkflowEngine {
    pub fn builder(
        store: Arc<dyn ApprovalStore>,
        resolver: Arc<dyn ApproverResolver>,
    ) -> EngineBuilder {
        EngineBuilder {
            store,
            resolver,
            risk: None,
            notifier: Arc::new(TracingNotificationGateway),
            clock: Arc::new(SystemClock),
            audit: Arc::new(TracingAuditSink),
            settings: WorkflowSettings::default(),
            risk_settings: RiskSettings::default(),
        }
    }

    /// Decides the workflow without persisting anything.
    pub fn plan(
        &self,
        request: &ExpenseRequest,
        requester: &Requester,
    ) -> Result<WorkflowConfig, WorkflowError> {
        self.determiner.determine(request, requester)
    }

    pub async fn start_workflow(
        &self,
        request: ExpenseRequest,
        requester: &Requester,
    ) -> Result<WorkflowStart, WorkflowError> {
        if !self.services.store.list_for_request(&request.id).await?.is_empty() {
            return Err(WorkflowError::InvalidWorkflow(format!(
                "a workflow already exists for request `{}`",
                request.id
            )));
        }

        info!(
            event_name = "workflow.engine.start",
            correlation_id = %request.id,
            request_id = %request.id,
            amount = %request.amount,
            payment_method = request.payment_method.method_type.as_str(),
            "starting approval workflow"
        );
        let config = self.determiner.determine(&request, requester)?;
        let records = self.instantiator.instantiate(&request, &config).await?;
        Ok(WorkflowStart { config, records })
    }

    pub async fn process_decision(
        &self,
        approval_id: &ApprovalId,
        decision: ApprovalDecision,
        actor_id: &str,
    ) -> Result<DecisionResult, WorkflowError> {
        self.decisions.process(approval_id, decision, actor_id).await
    }

    pub async fn delegate(
        &self,
        approval_id: &ApprovalId,
        delegate_to: &str,
        delegated_by: &str,
        reason: Option<&str>,
    ) -> Result<ApprovalRecord, WorkflowError> {
        self.delegation.delegate(approval_id, delegate_to, delegated_by, reason).await
    }

    pub async fn provide_information(
        &self,
        approval_id: &ApprovalId,
        responder_id: &str,
        response: &str,
    ) -> Result<ApprovalRecord, WorkflowError> {
        self.decisions.provide_information(approval_id, responder_id, response).await
    }

    pub async fn sweep(&self) -> Result<SweepReport, WorkflowError> {
        self.sweeper.sweep().await
    }

    /// Waits for notifications still being delivered in the background.
    pub async fn flush_notifications(&self) {
        self.services.flush_notifications().await;
    }

    pub async fn history(
        &self,
        request_id: &ExpenseRequestId,
    ) -> Result<WorkflowHistory, WorkflowError> {
        let request = self.services.load_request(request_id).await?;
        let records = self.services.store.list_for_request(request_id).await?;
        Ok(WorkflowHistory { request, records })
    }
}
