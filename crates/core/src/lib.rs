pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
pub use config::{AppConfig, ConfigError, LoadOptions, WorkflowSettings};
pub use domain::approval::{
    ApprovalId, ApprovalRecord, Approver, ApproverRole, RiskLevel, StageStatus,
};
pub use domain::expense::{
    ExpenseRequest, ExpenseRequestId, PaymentMethod, PaymentMethodType, PaymentStatus, Requester,
};
pub use errors::{ErrorKind, InterfaceError, WorkflowError};
pub use workflow::{ApprovalStore, ApprovalWorkflowEngine, StoreError, WorkflowOutcome};
