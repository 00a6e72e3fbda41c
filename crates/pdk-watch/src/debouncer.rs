// Debouncer. Aggregates file changes into one batch per quiet period,
// deduplicating identical (path, kind) entries, with an immediate-flush
// escape hatch for explicit user triggers.

use crate::watcher::{FileChange, WatchEvent};
use pdk_core::constants::DEFAULT_DEBOUNCE_MS;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

/// One aggregated generation of changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Deduplicated changes; internal order is unspecified.
    pub changes: Vec<FileChange>,
    /// True when the watcher overflowed and a full re-scan is needed.
    pub rescan: bool,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && !self.rescan
    }
}

/// Observable debouncer state shared with the UI.
#[derive(Debug, Default)]
struct DebouncerState {
    queued: AtomicUsize,
    debouncing: AtomicBool,
}

/// Handle to a running debouncer task.
#[derive(Clone)]
pub struct Debouncer {
    state: Arc<DebouncerState>,
    flush_tx: mpsc::Sender<()>,
}

impl Debouncer {
    /// Spawn the debouncer loop: events in, batches out after `window`
    /// of quiet.
    pub fn spawn(
        mut events: mpsc::Receiver<WatchEvent>,
        window: Duration,
        batch_tx: mpsc::Sender<ChangeBatch>,
    ) -> Self {
        let state = Arc::new(DebouncerState::default());
        let (flush_tx, mut flush_rx) = mpsc::channel::<()>(4);
        let task_state = Arc::clone(&state);

        tokio::spawn(async move {
            let mut pending = ChangeBatch::default();
            let mut deadline: Option<Instant> = None;

            loop {
                // Copy the deadline out so the timer future does not
                // borrow state the event arm mutates.
                let wait_until = deadline;
                let emit = tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => {
                            accumulate(&mut pending, event);
                            task_state.queued.store(pending.changes.len(), Ordering::Relaxed);
                            task_state.debouncing.store(true, Ordering::Relaxed);
                            deadline = Some(Instant::now() + window);
                            false
                        }
                        // Source gone: flush what is left, then stop.
                        None => {
                            if !pending.is_empty() {
                                let batch = std::mem::take(&mut pending);
                                let _ = batch_tx.send(batch).await;
                            }
                            break;
                        }
                    },
                    _ = flush_rx.recv() => true,
                    _ = async move {
                        match wait_until {
                            Some(at) => sleep_until(at).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => true,
                };

                if emit {
                    deadline = None;
                    task_state.debouncing.store(false, Ordering::Relaxed);
                    if !pending.is_empty() {
                        let batch = std::mem::take(&mut pending);
                        task_state.queued.store(0, Ordering::Relaxed);
                        if batch_tx.send(batch).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { state, flush_tx }
    }

    /// Emit whatever is pending right now, without waiting for quiet.
    pub async fn flush(&self) {
        let _ = self.flush_tx.send(()).await;
    }

    /// Number of changes waiting in the current window.
    pub fn queued(&self) -> usize {
        self.state.queued.load(Ordering::Relaxed)
    }

    /// True while a quiet-period timer is armed.
    pub fn is_debouncing(&self) -> bool {
        self.state.debouncing.load(Ordering::Relaxed)
    }

    pub fn default_window() -> Duration {
        Duration::from_millis(DEFAULT_DEBOUNCE_MS)
    }
}

fn accumulate(pending: &mut ChangeBatch, event: WatchEvent) {
    match event {
        WatchEvent::Change(change) => {
            // Identical (relative path, kind) entries collapse.
            let duplicate = pending
                .changes
                .iter()
                .any(|c| c.relative_path == change.relative_path && c.kind == change.kind);
            if !duplicate {
                pending.changes.push(change);
            }
        }
        WatchEvent::Rescan => pending.rescan = true,
    }
}
