use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::approval::{ApprovalRecord, Approver};
use crate::errors::WorkflowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    StageActivated,
    Escalated,
    Delegated,
    Rejected,
    InformationRequested,
    WorkflowApproved,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StageActivated => "stage_activated",
            Self::Escalated => "escalated",
            Self::Delegated => "delegated",
            Self::Rejected => "rejected",
            Self::InformationRequested => "information_requested",
            Self::WorkflowApproved => "workflow_approved",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationTarget {
    Approver(Approver),
    Requester { requester_id: String },
}

impl NotificationTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::Approver(approver) => &approver.id,
            Self::Requester { requester_id } => requester_id,
        }
    }
}

/// One notification per transition; the record is a snapshot taken after
/// the transition committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub approval: ApprovalRecord,
    pub targets: Vec<NotificationTarget>,
}

impl Notification {
    pub fn to_approvers(
        kind: NotificationKind,
        approval: &ApprovalRecord,
        approvers: &[Approver],
    ) -> Self {
        Self {
            kind,
            approval: approval.clone(),
            targets: approvers.iter().cloned().map(NotificationTarget::Approver).collect(),
        }
    }

    pub fn to_requester(kind: NotificationKind, approval: &ApprovalRecord) -> Self {
        Self {
            kind,
            approval: approval.clone(),
            targets: vec![NotificationTarget::Requester {
                requester_id: approval.requester_id.clone(),
            }],
        }
    }

    pub fn also_requester(mut self) -> Self {
        let requester_id = self.approval.requester_id.clone();
        self.targets.push(NotificationTarget::Requester { requester_id });
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
    #[error("notification timed out after {0}ms")]
    Timeout(u64),
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Gateway that only logs. Used when no delivery channel is wired.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotificationGateway;

#[async_trait]
impl NotificationGateway for TracingNotificationGateway {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        let targets: Vec<&str> = notification.targets.iter().map(NotificationTarget::id).collect();
        info!(
            event_name = "workflow.notification.sent",
            kind = notification.kind.as_str(),
            correlation_id = %notification.approval.request_id,
            request_id = %notification.approval.request_id,
            approval_id = %notification.approval.id,
            targets = %targets.join(","),
            "workflow notification dispatched"
        );
        Ok(())
    }
}

/// Captures notifications for assertions. Can be told to fail.
#[derive(Default)]
pub struct InMemoryNotificationGateway {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl InMemoryNotificationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deliveries(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent().iter().map(|notification| notification.kind).collect()
    }
}

#[async_trait]
impl NotificationGateway for InMemoryNotificationGateway {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Delivery("gateway configured to fail".to_string()));
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
        Ok(())
    }
}

/// Bounds each delivery with a timeout and swallows failures.
#[derive(Clone)]
pub struct NotificationDispatcher {
    gateway: Arc<dyn NotificationGateway>,
    timeout: Duration,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl NotificationDispatcher {
    pub fn new(gateway: Arc<dyn NotificationGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout, in_flight: Arc::default() }
    }

    /// Hands the notification to a background task and returns at once.
    /// `on_failure` runs in that task with the already logged error.
    /// Without a tokio runtime the delivery runs inline.
    pub async fn send<F>(&self, notification: Notification, on_failure: F)
    where
        F: FnOnce(WorkflowError) + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            if let Some(error) = self.dispatch(notification).await {
                on_failure(error);
            }
            return;
        };

        let dispatcher = self.clone();
        let task = runtime.spawn(async move {
            if let Some(error) = dispatcher.dispatch(notification).await {
                on_failure(error);
            }
        });

        let mut in_flight = lock_tasks(&self.in_flight);
        in_flight.retain(|task| !task.is_finished());
        in_flight.push(task);
    }

    /// Waits for every background delivery started so far.
    pub async fn flush(&self) {
        let tasks = std::mem::take(&mut *lock_tasks(&self.in_flight));
        for task in tasks {
            if let Err(error) = task.await {
                warn!(
                    event_name = "workflow.notification.task_failed",
                    error = %error,
                    "notification task did not complete"
                );
            }
        }
    }

    /// Returns the failure, already logged, so callers can audit it.
    pub async fn dispatch(&self, notification: Notification) -> Option<WorkflowError> {
        if notification.targets.is_empty() {
            return None;
        }

        let kind = notification.kind;
        let request_id = notification.approval.request_id.clone();
        let approval_id = notification.approval.id.clone();
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);

        let delivery = self.gateway.notify(notification);
        let result = match tokio::time::timeout(self.timeout, delivery).await {
            Ok(delivery) => delivery,
            Err(_) => Err(NotificationError::Timeout(timeout_ms)),
        };

        let error = result.err()?;
        let error = WorkflowError::NotificationFailed(error.to_string());
        warn!(
            event_name = "workflow.notification.failed",
            kind = kind.as_str(),
            correlation_id = %request_id,
            request_id = %request_id,
            approval_id = %approval_id,
            error_class = error.kind().as_str(),
            error = %error,
            "notification failed; transition stands"
        );
        Some(error)
    }
}

fn lock_tasks(tasks: &Mutex<Vec<JoinHandle<()>>>) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
    match tasks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use super::{
        InMemoryNotificationGateway, Notification, NotificationDispatcher, NotificationError,
        NotificationGateway, NotificationKind,
    };
    use crate::errors::ErrorKind;
    use crate::workflow::test_support::{expense_request, pending_record};

    struct StalledGateway;

    #[async_trait]
    impl NotificationGateway for StalledGateway {
        async fn notify(&self, _notification: Notification) -> Result<(), NotificationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn notification() -> Notification {
        let record = pending_record(&expense_request(Decimal::new(60, 0)), 1, 1);
        let approvers = record.required_approvers.clone();
        Notification::to_approvers(NotificationKind::StageActivated, &record, &approvers)
    }

    #[tokio::test]
    async fn delivered_notifications_are_captured() {
        let gateway = Arc::new(InMemoryNotificationGateway::new());
        let dispatcher = NotificationDispatcher::new(gateway.clone(), Duration::from_millis(50));

        assert!(dispatcher.dispatch(notification()).await.is_none());
        assert_eq!(gateway.kinds(), vec![NotificationKind::StageActivated]);
    }

    #[tokio::test]
    async fn gateway_failure_is_reported_not_raised() {
        let gateway = Arc::new(InMemoryNotificationGateway::new());
        gateway.fail_deliveries(true);
        let dispatcher = NotificationDispatcher::new(gateway.clone(), Duration::from_millis(50));

        let failure = dispatcher.dispatch(notification()).await.expect("failure is reported");
        assert_eq!(failure.kind(), ErrorKind::NotificationFailed);
        assert!(gateway.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_gateway_is_cut_off_by_timeout() {
        let dispatcher =
            NotificationDispatcher::new(Arc::new(StalledGateway), Duration::from_millis(200));

        let failure = dispatcher.dispatch(notification()).await.expect("timeout is reported");
        assert!(failure.to_string().contains("timed out after 200ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn send_returns_before_a_slow_gateway_finishes() {
        let dispatcher =
            NotificationDispatcher::new(Arc::new(StalledGateway), Duration::from_secs(5));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let captured = failures.clone();

        let started = tokio::time::Instant::now();
        dispatcher
            .send(notification(), move |error| {
                captured.lock().expect("failures lock").push(error.kind());
            })
            .await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(failures.lock().expect("failures lock").is_empty());

        dispatcher.flush().await;
        assert_eq!(*failures.lock().expect("failures lock"), vec![ErrorKind::NotificationFailed]);
    }
}
