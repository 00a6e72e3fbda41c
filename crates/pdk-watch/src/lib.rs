// pdk-watch: Watch mode for PDK.
//
// Pipeline: FileWatcher -> Debouncer -> ExecutionQueue. Each debounce
// batch becomes a "generation"; a newer generation cancels the run in
// flight and supersedes anything still pending.

pub mod debouncer;
pub mod queue;
pub mod watcher;

pub use debouncer::{ChangeBatch, Debouncer};
pub use queue::{Action, Completion, ExecutionQueue, Submission};
pub use watcher::{ChangeKind, FileChange, FileWatcher, WatchEvent};

use pdk_core::error::PdkResult;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Watch-mode tuning.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub debounce: Duration,
    /// Additional exclusion globs on top of the defaults.
    pub excludes: Vec<String>,
    /// Bound for the raw watcher event queue.
    pub event_queue_size: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Debouncer::default_window(),
            excludes: Vec::new(),
            event_queue_size: 1024,
        }
    }
}

/// One scheduled re-execution.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Monotonic counter; generation 0 is the startup run.
    pub number: u64,
    /// True for the run triggered at startup rather than by changes.
    pub initial: bool,
    /// The triggering file set (empty for the initial run).
    pub batch: ChangeBatch,
}

impl Generation {
    pub fn label(&self) -> String {
        if self.initial {
            "initial run".to_string()
        } else {
            format!("generation {} ({} change(s))", self.number, self.batch.changes.len())
        }
    }
}

/// Drive the watch loop until cancelled.
///
/// `make_action` turns each generation into the queue action that
/// re-executes the pipeline. Rapid saves collapse to one run; a newer
/// generation cancels the in-flight run; completions are logged as they
/// arrive.
pub async fn run_watch_loop<F>(
    root: PathBuf,
    options: WatchOptions,
    make_action: F,
    cancel: CancellationToken,
) -> PdkResult<()>
where
    F: Fn(&Generation) -> Action,
{
    let (event_tx, event_rx) = mpsc::channel(options.event_queue_size);
    let _watcher = FileWatcher::start(root.clone(), &options.excludes, event_tx)?;

    let (batch_tx, mut batch_rx) = mpsc::channel(16);
    let _debouncer = Debouncer::spawn(event_rx, options.debounce, batch_tx);

    let (exec_queue, mut completions) = ExecutionQueue::new();

    tracing::info!(target: "watch", root = %root.display(), "watching for changes");

    let mut generation_number = 0u64;
    let initial = Generation {
        number: 0,
        initial: true,
        batch: ChangeBatch::default(),
    };
    exec_queue.submit(initial.label(), make_action(&initial));

    loop {
        tokio::select! {
            batch = batch_rx.recv() => {
                let Some(batch) = batch else { break };
                if batch.is_empty() {
                    continue;
                }
                generation_number += 1;
                let generation = Generation {
                    number: generation_number,
                    initial: false,
                    batch,
                };
                for change in &generation.batch.changes {
                    tracing::debug!(
                        target: "watch",
                        "changed: {} ({:?})",
                        change.relative_path.display(),
                        change.kind
                    );
                }
                // A newer generation supersedes the one in flight.
                if exec_queue.is_running() {
                    exec_queue.cancel_running();
                }
                exec_queue.submit(generation.label(), make_action(&generation));
            }
            completion = completions.recv() => {
                if let Some(done) = completion {
                    if done.cancelled {
                        tracing::info!(target: "watch", "{}: superseded", done.label);
                    } else if done.success {
                        tracing::info!(target: "watch", "{}: succeeded", done.label);
                    } else {
                        tracing::warn!(target: "watch", "{}: failed", done.label);
                    }
                }
            }
            _ = cancel.cancelled() => {
                exec_queue.cancel_running();
                exec_queue.shutdown();
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// S5-style end-to-end: three rapid creates collapse into a single
    /// re-execution after the startup run, then quiet stays quiet.
    #[tokio::test]
    async fn test_watch_collapses_rapid_saves() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let runs: Arc<Mutex<Vec<(bool, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let runs_clone = Arc::clone(&runs);
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(run_watch_loop(
            root.clone(),
            WatchOptions {
                debounce: Duration::from_millis(500),
                ..Default::default()
            },
            move |generation: &Generation| {
                let runs = Arc::clone(&runs_clone);
                let initial = generation.initial;
                // Platforms differ on create/modify event pairing, so
                // count distinct files rather than raw entries.
                let mut paths: Vec<_> = generation
                    .batch
                    .changes
                    .iter()
                    .map(|c| c.relative_path.clone())
                    .collect();
                paths.sort();
                paths.dedup();
                let count = paths.len();
                Box::new(move |_c| {
                    Box::pin(async move {
                        runs.lock().push((initial, count));
                        true
                    })
                })
            },
            loop_cancel,
        ));

        // Let the watcher arm, then create three files inside 200 ms.
        tokio::time::sleep(Duration::from_millis(300)).await;
        for name in ["a.yml", "b.yml", "c.yml"] {
            std::fs::write(root.join(name), "x").unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // One debounce window plus a second of quiet.
        tokio::time::sleep(Duration::from_millis(1600)).await;
        cancel.cancel();
        let _ = handle.await;

        let runs = runs.lock();
        assert_eq!(runs.first(), Some(&(true, 0)), "startup run comes first");
        let change_runs: Vec<_> = runs.iter().filter(|(initial, _)| !initial).collect();
        assert_eq!(change_runs.len(), 1, "rapid saves collapse to one run: {runs:?}");
        assert_eq!(change_runs[0].1, 3, "batch carries all three files");
    }
}
