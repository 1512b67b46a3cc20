// Shared scheduling facility for all timed work of a handler.
//
// Every task body runs while holding the scheduler's gate, so bodies never
// overlap: a slow device call delays a later tick but cannot run alongside it.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Handle to a scheduled task. Cancellation is cooperative: a body that is
/// already running finishes, but nothing further runs after `cancel`.
#[derive(Debug)]
pub struct TaskHandle {
    token: CancellationToken,
    deadline: Instant,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// When the first (or only) run is due.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[derive(Clone, Default)]
pub struct Scheduler {
    gate: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` once after `delay`.
    pub fn schedule<F, Fut>(&self, name: &'static str, delay: Duration, task: F) -> TaskHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let deadline = Instant::now() + delay;
        let gate = self.gate.clone();
        let task_token = token.clone();

        let join = tokio::spawn(async move {
            // Wait for the deadline unless cancelled first
            tokio::select! {
                biased;
                _ = task_token.cancelled() => {
                    trace!(task = name, "Scheduled task cancelled before it ran");
                    return;
                }
                _ = sleep_until(deadline) => {}
            }
            let _guard = gate.lock().await;
            // Cancelled while queued behind another task
            if task_token.is_cancelled() {
                return;
            }
            trace!(task = name, "Running scheduled task");
            task().await;
        });

        TaskHandle {
            token,
            deadline,
            join,
        }
    }

    /// Runs `task` after `initial`, then again `period` after each run
    /// completes, until cancelled.
    pub fn schedule_with_fixed_delay<F, Fut>(
        &self,
        name: &'static str,
        initial: Duration,
        period: Duration,
        task: F,
    ) -> TaskHandle
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let deadline = Instant::now() + initial;
        let gate = self.gate.clone();
        let task_token = token.clone();

        let join = tokio::spawn(async move {
            let mut next = deadline;
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = sleep_until(next) => {}
                }
                {
                    let _guard = gate.lock().await;
                    if task_token.is_cancelled() {
                        break;
                    }
                    trace!(task = name, "Running periodic task");
                    task().await;
                }
                // Fixed delay: measured from the end of the run
                next = Instant::now() + period;
            }
            trace!(task = name, "Periodic task stopped");
        });

        TaskHandle {
            token,
            deadline,
            join,
        }
    }

    /// Runs `task` as soon as the gate is free and waits for it to finish.
    /// The task keeps running if the caller stops waiting.
    pub async fn execute<Fut>(&self, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let gate = self.gate.clone();
        let join = tokio::spawn(async move {
            let _guard = gate.lock().await;
            task.await;
        });
        let _ = join.await;
    }

    /// Fire-and-forget variant of [`Scheduler::execute`].
    pub fn spawn<Fut>(&self, task: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let gate = self.gate.clone();
        tokio::spawn(async move {
            let _guard = gate.lock().await;
            task.await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_runs_once_after_delay() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = scheduler.schedule("once", Duration::from_secs(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_run() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = scheduler.schedule("once", Duration::from_secs(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_repeats_until_cancelled() {
        let scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = scheduler.schedule_with_fixed_delay(
            "tick",
            Duration::from_secs(1),
            Duration::from_secs(1),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bodies_do_not_overlap() {
        let scheduler = Scheduler::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(scheduler.schedule("overlap", Duration::from_secs(1), move || async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(TaskHandle::is_finished));
    }
}
