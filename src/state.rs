use tokio::time::Instant;

use crate::scheduler::TaskHandle;

/// Lifecycle of the supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Online,
    OfflineRetrying,
}

/// The three scheduled jobs owned by the handler. At most one of each is
/// outstanding; polling and keepalive exist only while online.
#[derive(Default)]
pub(crate) struct ScheduledTasks {
    pub(crate) polling: Option<TaskHandle>,
    pub(crate) keepalive: Option<TaskHandle>,
    pub(crate) retry: Option<TaskHandle>,
}

impl ScheduledTasks {
    /// Cancels polling and keepalive. Calling it again is a no-op.
    pub(crate) fn cancel_maintenance(&mut self) {
        if let Some(polling) = self.polling.take() {
            polling.cancel();
        }
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.cancel();
        }
    }

    pub(crate) fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.cancel();
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        self.cancel_maintenance();
        self.cancel_retry();
    }

    pub(crate) fn retry_deadline(&self) -> Option<Instant> {
        self.retry.as_ref().map(TaskHandle::deadline)
    }
}
