use thiserror::Error;

use crate::domain::approval::{ApprovalId, StageStatus};
use crate::domain::expense::ExpenseRequestId;

/// Stable error classification surfaced to callers and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidWorkflow,
    ApprovalNotFound,
    RequestNotFound,
    UnauthorizedApprover,
    WorkflowAlreadyProcessed,
    StageNotActive,
    InvalidDecision,
    EscalationFailed,
    DelegationFailed,
    NotificationFailed,
    DatabaseError,
    ConfigurationError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidWorkflow => "INVALID_WORKFLOW",
            Self::ApprovalNotFound => "APPROVAL_NOT_FOUND",
            Self::RequestNotFound => "REQUEST_NOT_FOUND",
            Self::UnauthorizedApprover => "UNAUTHORIZED_APPROVER",
            Self::WorkflowAlreadyProcessed => "WORKFLOW_ALREADY_PROCESSED",
            Self::StageNotActive => "STAGE_NOT_ACTIVE",
            Self::InvalidDecision => "INVALID_DECISION",
            Self::EscalationFailed => "ESCALATION_FAILED",
            Self::DelegationFailed => "DELEGATION_FAILED",
            Self::NotificationFailed => "NOTIFICATION_FAILED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),
    #[error("approval `{0}` not found")]
    ApprovalNotFound(ApprovalId),
    #[error("expense request `{0}` not found")]
    RequestNotFound(ExpenseRequestId),
    #[error("`{actor_id}` is not an approver for `{approval_id}`")]
    UnauthorizedApprover { approval_id: ApprovalId, actor_id: String },
    #[error("approval `{approval_id}` was already processed (stage status `{status}`)")]
    AlreadyProcessed { approval_id: ApprovalId, status: StageStatus },
    #[error("stage {stage_number} of approval `{approval_id}` has not been activated")]
    StageNotActive { approval_id: ApprovalId, stage_number: u32 },
    #[error("invalid decision: {0}")]
    InvalidDecision(String),
    #[error("escalation of `{approval_id}` failed: {reason}")]
    EscalationFailed { approval_id: ApprovalId, reason: String },
    #[error("delegation of `{approval_id}` failed: {reason}")]
    DelegationFailed { approval_id: ApprovalId, reason: String },
    #[error("notification failed: {0}")]
    NotificationFailed(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidWorkflow(_) => ErrorKind::InvalidWorkflow,
            Self::ApprovalNotFound(_) => ErrorKind::ApprovalNotFound,
            Self::RequestNotFound(_) => ErrorKind::RequestNotFound,
            Self::UnauthorizedApprover { .. } => ErrorKind::UnauthorizedApprover,
            Self::AlreadyProcessed { .. } => ErrorKind::WorkflowAlreadyProcessed,
            Self::StageNotActive { .. } => ErrorKind::StageNotActive,
            Self::InvalidDecision(_) => ErrorKind::InvalidDecision,
            Self::EscalationFailed { .. } => ErrorKind::EscalationFailed,
            Self::DelegationFailed { .. } => ErrorKind::DelegationFailed,
            Self::NotificationFailed(_) => ErrorKind::NotificationFailed,
            Self::Database(_) => ErrorKind::DatabaseError,
            Self::Configuration(_) => ErrorKind::ConfigurationError,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested approval could not be found.",
            Self::Forbidden { .. } => "You are not an approver for this stage.",
            Self::Conflict { .. } => "This approval stage has already been processed.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    /// Client-class errors are final; retrying the same call cannot succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. })
    }
}

impl From<WorkflowError> for InterfaceError {
    fn from(value: WorkflowError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            WorkflowError::ApprovalNotFound(_) | WorkflowError::RequestNotFound(_) => {
                Self::NotFound { message: value.to_string(), correlation_id }
            }
            WorkflowError::UnauthorizedApprover { .. } => {
                Self::Forbidden { message: value.to_string(), correlation_id }
            }
            WorkflowError::AlreadyProcessed { .. } | WorkflowError::StageNotActive { .. } => {
                Self::Conflict { message: value.to_string(), correlation_id }
            }
            WorkflowError::InvalidWorkflow(_)
            | WorkflowError::InvalidDecision(_)
            | WorkflowError::DelegationFailed { .. } => {
                Self::BadRequest { message: value.to_string(), correlation_id }
            }
            WorkflowError::Database(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            WorkflowError::EscalationFailed { .. } | WorkflowError::NotificationFailed(_) => {
                Self::ServiceUnavailable { message: value.to_string(), correlation_id }
            }
            WorkflowError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::approval::{ApprovalId, StageStatus};
    use crate::errors::{ErrorKind, InterfaceError, WorkflowError};

    #[test]
    fn already_processed_maps_to_conflict_with_correlation_id() {
        let interface = WorkflowError::AlreadyProcessed {
            approval_id: ApprovalId("APR-1".to_owned()),
            status: StageStatus::Approved,
        }
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::Conflict { ref correlation_id, .. } if correlation_id == "req-1"
        ));
        assert!(!interface.is_retryable());
    }

    #[test]
    fn unauthorized_approver_maps_to_forbidden() {
        let error = WorkflowError::UnauthorizedApprover {
            approval_id: ApprovalId("APR-2".to_owned()),
            actor_id: "u-intruder".to_owned(),
        };
        assert_eq!(error.kind().as_str(), "UNAUTHORIZED_APPROVER");

        let interface = error.into_interface("req-2");
        assert_eq!(interface.user_message(), "You are not an approver for this stage.");
    }

    #[test]
    fn database_error_maps_to_retryable_service_unavailable() {
        let interface =
            WorkflowError::Database("database lock timeout".to_owned()).into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert!(interface.is_retryable());
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let error = WorkflowError::Configuration("no policy for purchase_order".to_owned());
        assert_eq!(error.kind(), ErrorKind::ConfigurationError);

        let interface = error.into_interface("req-4");
        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
