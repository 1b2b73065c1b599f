//! Expense approval workflow: deciding the stage plan for a request,
//! persisting it, and moving it through decisions, delegation and
//! escalation until it is approved or rejected.

pub mod clock;
pub mod conditions;
pub mod decision;
pub mod definition;
pub mod delegation;
pub mod determiner;
pub mod engine;
pub mod escalation;
pub mod instantiator;
pub mod notify;
pub mod progression;
pub mod resolver;
pub mod risk;
pub mod services;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conditions::{ConditionEvaluation, StageConditionEvaluator};
pub use decision::{
    ApprovalDecision, DecisionAction, DecisionOutcome, DecisionProcessor, DecisionResult,
};
pub use definition::{WorkflowConfig, WorkflowStage, WorkflowType};
pub use delegation::DelegationHandler;
pub use determiner::WorkflowDeterminer;
pub use engine::{ApprovalWorkflowEngine, EngineBuilder, WorkflowHistory, WorkflowStart};
pub use escalation::{EscalationSweeper, SweepFailure, SweepReport};
pub use instantiator::WorkflowInstantiator;
pub use notify::{
    InMemoryNotificationGateway, Notification, NotificationError, NotificationGateway,
    NotificationKind, NotificationTarget, TracingNotificationGateway,
};
pub use progression::{Progression, ProgressionEngine};
pub use resolver::{ApproverResolver, DirectoryApproverResolver, DirectoryMember, ResolveError};
pub use risk::{RiskAssessor, RuleBasedRiskAssessor};
pub use store::{ApprovalStore, InMemoryApprovalStore, StoreError, WorkflowOutcome};
