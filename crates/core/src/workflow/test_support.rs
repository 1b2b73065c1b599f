use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::audit::InMemoryAuditSink;
use crate::config::WorkflowSettings;
use crate::domain::approval::{
    ApprovalId, ApprovalRecord, Approver, ApproverRole, EscalationRules, RiskLevel,
    StageConditions, StageStatus,
};
use crate::domain::expense::{
    ExpenseRequest, ExpenseRequestId, PaymentMethod, PaymentMethodType, PaymentStatus, Requester,
};
use crate::workflow::clock::{Clock, ManualClock};
use crate::workflow::decision::DecisionProcessor;
use crate::workflow::delegation::DelegationHandler;
use crate::workflow::determiner::WorkflowDeterminer;
use crate::workflow::engine::ApprovalWorkflowEngine;
use crate::workflow::escalation::EscalationSweeper;
use crate::workflow::instantiator::WorkflowInstantiator;
use crate::workflow::notify::{InMemoryNotificationGateway, NotificationDispatcher};
use crate::workflow::progression::ProgressionEngine;
use crate::workflow::resolver::{DirectoryApproverResolver, DirectoryMember};
use crate::workflow::risk::RuleBasedRiskAssessor;
use crate::workflow::services::WorkflowServices;
use crate::workflow::store::InMemoryApprovalStore;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid timestamp")
}

pub fn expense_request(amount: Decimal) -> ExpenseRequest {
    request_with(amount, PaymentMethodType::PersonReimbursement, true)
}

pub fn request_with(
    amount: Decimal,
    method_type: PaymentMethodType,
    requires_approval: bool,
) -> ExpenseRequest {
    ExpenseRequest {
        id: ExpenseRequestId("EXP-2026-0001".to_string()),
        requester_id: "u-ref".to_string(),
        amount,
        currency: "USD".to_string(),
        category: "travel".to_string(),
        description: "Crew travel to regional final".to_string(),
        business_justification: Some("Assigned fixture".to_string()),
        has_business_case: true,
        competitive_quote_count: 3,
        has_receipt: true,
        payment_method: PaymentMethod { method_type, requires_approval },
        payment_status: PaymentStatus::PendingApproval,
        created_at: t0(),
        updated_at: t0(),
    }
}

pub fn requester() -> Requester {
    Requester::from_id("u-ref")
}

fn member(
    id: &str,
    role: Option<ApproverRole>,
    manager_id: Option<&str>,
) -> DirectoryMember {
    DirectoryMember {
        id: id.to_string(),
        name: id.to_string(),
        email: format!("{id}@league.test"),
        role,
        manager_id: manager_id.map(str::to_string),
        department: Some("officiating".to_string()),
    }
}

pub fn members() -> Vec<DirectoryMember> {
    vec![
        member("u-ref", None, Some("u-assignor")),
        member("u-assignor", Some(ApproverRole::Manager), Some("u-director")),
        member("u-director", Some(ApproverRole::Executive), None),
        member("u-treasurer", Some(ApproverRole::Finance), Some("u-director")),
        member("u-controller", Some(ApproverRole::Finance), Some("u-director")),
    ]
}

pub fn directory() -> DirectoryApproverResolver {
    DirectoryApproverResolver::new(members())
}

pub fn pending_record(
    request: &ExpenseRequest,
    stage_number: u32,
    total_stages: u32,
) -> ApprovalRecord {
    ApprovalRecord {
        id: ApprovalId(format!("APR-{}-{stage_number}", request.id)),
        request_id: request.id.clone(),
        requester_id: request.requester_id.clone(),
        stage_number,
        total_stages,
        stage_name: "Manager Approval".to_string(),
        is_parallel: false,
        required_approvers: vec![Approver {
            id: "u-assignor".to_string(),
            name: "u-assignor".to_string(),
            email: "u-assignor@league.test".to_string(),
            role: ApproverRole::Manager,
            delegated: false,
            delegated_by: None,
            escalated: false,
        }],
        minimum_approvers: 1,
        requires_all_approvers: false,
        stage_status: StageStatus::Pending,
        stage_started_at: None,
        stage_deadline: None,
        escalation_hours: 48,
        approval_conditions: StageConditions::default(),
        escalation_rules: EscalationRules {
            escalate_to: Some(ApproverRole::Executive),
            ..EscalationRules::default()
        },
        allow_delegation: true,
        approval_limit: Some(Decimal::new(1_000, 0)),
        risk_level: RiskLevel::Low,
        requires_additional_review: false,
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
        created_at: t0(),
        updated_at: t0(),
    }
}

/// In-memory engine with a manual clock and capturing notifier and audit
/// sink. Components built from it share the same collaborators.
pub struct Harness {
    pub engine: ApprovalWorkflowEngine,
    pub services: Arc<WorkflowServices>,
    pub store: Arc<InMemoryApprovalStore>,
    pub notifier: Arc<InMemoryNotificationGateway>,
    pub clock: Arc<ManualClock>,
    pub audit: InMemoryAuditSink,
    pub settings: WorkflowSettings,
}

impl Harness {
    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn determiner(&self) -> WorkflowDeterminer {
        WorkflowDeterminer::new(
            self.services.resolver.clone(),
            Arc::new(RuleBasedRiskAssessor::default()),
            self.settings.clone(),
        )
    }

    pub fn instantiator(&self) -> WorkflowInstantiator {
        WorkflowInstantiator::new(self.services.clone())
    }

    pub fn progression(&self) -> ProgressionEngine {
        ProgressionEngine::new(self.services.clone())
    }

    pub fn decisions(&self) -> DecisionProcessor {
        DecisionProcessor::new(self.services.clone())
    }

    pub fn delegation(&self) -> DelegationHandler {
        DelegationHandler::new(self.services.clone())
    }

    pub fn sweeper(&self) -> EscalationSweeper {
        EscalationSweeper::new(self.services.clone())
    }

    /// Waits for background notification deliveries from the engine and
    /// from components built off this harness.
    pub async fn flush(&self) {
        self.engine.flush_notifications().await;
        self.services.flush_notifications().await;
    }

    pub async fn start(&self, request: ExpenseRequest) -> Vec<ApprovalRecord> {
        self.engine.start_workflow(request, &requester()).await.expect("start workflow").records
    }
}

pub fn harness() -> Harness {
    harness_with_resolver(directory())
}

pub fn harness_with_resolver(resolver: DirectoryApproverResolver) -> Harness {
    harness_with(resolver, WorkflowSettings::default())
}

pub fn harness_with_settings(settings: WorkflowSettings) -> Harness {
    harness_with(directory(), settings)
}

fn harness_with(resolver: DirectoryApproverResolver, settings: WorkflowSettings) -> Harness {
    let store = Arc::new(InMemoryApprovalStore::new());
    let notifier = Arc::new(InMemoryNotificationGateway::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let audit = InMemoryAuditSink::default();
    let resolver = Arc::new(resolver);

    let engine = ApprovalWorkflowEngine::builder(store.clone(), resolver.clone())
        .settings(settings.clone())
        .notifier(notifier.clone())
        .clock(clock.clone())
        .audit_sink(Arc::new(audit.clone()))
        .build();

    let services = Arc::new(WorkflowServices {
        store: store.clone(),
        resolver,
        notifier: NotificationDispatcher::new(
            notifier.clone(),
            StdDuration::from_millis(settings.notification_timeout_ms),
        ),
        clock: clock.clone(),
        audit: Arc::new(audit.clone()),
        settings: settings.clone(),
    });

    Harness { engine, services, store, notifier, clock, audit, settings }
}
