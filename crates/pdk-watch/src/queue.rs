// Execution queue. At most one action runs at a time; while one runs,
// only the most recent submission is retained and earlier pending ones
// are dropped. The running action can be cancelled, which reports its
// completion as unsuccessful.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// The work an execution runs: receives its cancellation token, returns
/// success.
pub type Action = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, bool> + Send>;

/// One queued execution.
pub struct Submission {
    pub label: String,
    pub action: Action,
}

/// How one execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub label: String,
    pub success: bool,
    pub cancelled: bool,
}

struct QueueShared {
    /// Latest retained submission; replaced, never queued deeper.
    pending: Mutex<Option<Submission>>,
    /// Token of the currently running action.
    current: Mutex<Option<CancellationToken>>,
    running: AtomicBool,
    wakeup: Notify,
    shutdown: CancellationToken,
}

/// Handle to the queue worker.
#[derive(Clone)]
pub struct ExecutionQueue {
    shared: Arc<QueueShared>,
}

impl ExecutionQueue {
    /// Create the queue and its worker task. Completions are reported in
    /// submission-execution order on the returned channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(QueueShared {
            pending: Mutex::new(None),
            current: Mutex::new(None),
            running: AtomicBool::new(false),
            wakeup: Notify::new(),
            shutdown: CancellationToken::new(),
        });

        let worker_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_shared.wakeup.notified() => {}
                    _ = worker_shared.shutdown.cancelled() => break,
                }

                // Drain: a submission arriving mid-run is picked up as
                // soon as the running action completes.
                loop {
                    let Some(submission) = worker_shared.pending.lock().take() else {
                        break;
                    };

                    let cancel = CancellationToken::new();
                    *worker_shared.current.lock() = Some(cancel.clone());
                    worker_shared.running.store(true, Ordering::SeqCst);

                    tracing::debug!(target: "watch", label = %submission.label, "starting execution");
                    let success = (submission.action)(cancel.clone()).await;
                    let cancelled = cancel.is_cancelled();

                    worker_shared.running.store(false, Ordering::SeqCst);
                    *worker_shared.current.lock() = None;

                    let _ = completion_tx.send(Completion {
                        label: submission.label,
                        success: success && !cancelled,
                        cancelled,
                    });

                    if worker_shared.shutdown.is_cancelled() {
                        return;
                    }
                }
            }
        });

        (Self { shared }, completion_rx)
    }

    /// Submit an execution. While an action runs, this replaces any
    /// not-yet-started submission; only the latest is retained.
    pub fn submit(&self, label: impl Into<String>, action: Action) {
        let label = label.into();
        let mut pending = self.shared.pending.lock();
        if let Some(dropped) = pending.replace(Submission {
            label: label.clone(),
            action,
        }) {
            tracing::debug!(
                target: "watch",
                dropped = %dropped.label,
                retained = %label,
                "superseded pending execution"
            );
        }
        drop(pending);
        self.shared.wakeup.notify_one();
    }

    /// Cancel the currently running action, if any. Returns true when a
    /// signal was sent.
    pub fn cancel_running(&self) -> bool {
        match self.shared.current.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn has_pending(&self) -> bool {
        self.shared.pending.lock().is_some()
    }

    /// Stop the worker after the current action finishes.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.wakeup.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quick_action(marker: Arc<Mutex<Vec<String>>>, name: &str) -> Action {
        let name = name.to_string();
        Box::new(move |_cancel| {
            Box::pin(async move {
                marker.lock().push(name);
                true
            })
        })
    }

    #[tokio::test]
    async fn test_single_submission_runs() {
        let (queue, mut completions) = ExecutionQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        queue.submit("run-1", quick_action(Arc::clone(&log), "one"));

        let done = tokio::time::timeout(Duration::from_secs(2), completions.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.label, "run-1");
        assert!(done.success);
        assert_eq!(log.lock().as_slice(), ["one"]);
    }

    #[tokio::test]
    async fn test_latest_pending_wins_while_running() {
        let (queue, mut completions) = ExecutionQueue::new();
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        // A slow action holds the queue while three more arrive.
        let slow_log = Arc::clone(&log);
        queue.submit(
            "slow",
            Box::new(move |_c| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    slow_log.lock().push("slow".into());
                    true
                })
            }),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.submit("gen-1", quick_action(Arc::clone(&log), "gen-1"));
        queue.submit("gen-2", quick_action(Arc::clone(&log), "gen-2"));
        queue.submit("gen-3", quick_action(Arc::clone(&log), "gen-3"));

        let first = tokio::time::timeout(Duration::from_secs(2), completions.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.label, "slow");
        let second = tokio::time::timeout(Duration::from_secs(2), completions.recv())
            .await
            .unwrap()
            .unwrap();
        // Intermediate generations were dropped.
        assert_eq!(second.label, "gen-3");
        assert_eq!(log.lock().as_slice(), ["slow", "gen-3"]);
    }

    #[tokio::test]
    async fn test_cancel_running_reports_unsuccessful() {
        let (queue, mut completions) = ExecutionQueue::new();

        queue.submit(
            "cancellable",
            Box::new(|cancel| {
                Box::pin(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(30)) => true,
                        _ = cancel.cancelled() => false,
                    }
                })
            }),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.is_running());
        assert!(queue.cancel_running());

        let done = tokio::time::timeout(Duration::from_secs(2), completions.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!done.success);
        assert!(done.cancelled);
    }

    #[tokio::test]
    async fn test_cancel_without_running_returns_false() {
        let (queue, _completions) = ExecutionQueue::new();
        assert!(!queue.cancel_running());
    }
}
