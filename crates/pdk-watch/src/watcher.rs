// Recursive filesystem watcher. Wraps the platform backend, applies the
// glob exclusion list before emission, and degrades to a rescan request
// when the event queue overflows.

use glob::Pattern;
use pdk_core::constants::DEFAULT_WATCH_EXCLUDES;
use pdk_core::error::{codes, PdkError, PdkResult};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// What happened to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// One observed filesystem change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileChange {
    pub path: PathBuf,
    pub relative_path: PathBuf,
    pub kind: ChangeKind,
}

/// Events delivered to the debouncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Change(FileChange),
    /// The event queue overflowed; the consumer should treat the whole
    /// directory as invalidated and re-scan.
    Rescan,
}

/// Handle keeping the platform watcher alive. Dropping it stops
/// observation.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FileWatcher {
    /// Start watching `root` recursively. Emits onto a bounded channel;
    /// overflow collapses into a single `Rescan`.
    pub fn start(
        root: impl Into<PathBuf>,
        extra_excludes: &[String],
        tx: mpsc::Sender<WatchEvent>,
    ) -> PdkResult<Self> {
        let root = root.into();
        let patterns = build_patterns(extra_excludes)?;
        let watch_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    // Transient errors (permission denial on a subtree)
                    // are logged and skipped, not fatal.
                    tracing::warn!(target: "watch", "watcher error: {e}");
                    return;
                }
            };

            let Some(kind) = map_kind(&event.kind) else {
                return;
            };

            for path in &event.paths {
                let relative = path
                    .strip_prefix(&watch_root)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| path.clone());

                if is_excluded(&relative, &patterns) {
                    continue;
                }

                let change = WatchEvent::Change(FileChange {
                    path: path.clone(),
                    relative_path: relative,
                    kind,
                });

                match tx.try_send(change) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Queue bound hit: collapse into one rescan.
                        let _ = tx.try_send(WatchEvent::Rescan);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
            }
        })
        .map_err(|e| {
            PdkError::new(codes::FILE_IO, format!("failed to create file watcher: {e}"))
        })?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| {
                PdkError::new(
                    codes::FILE_IO,
                    format!("failed to watch {}: {e}", root.display()),
                )
                .with_suggestion("Check that the workspace directory exists and is readable")
            })?;

        Ok(Self {
            _watcher: watcher,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn map_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        _ => None,
    }
}

fn build_patterns(extra: &[String]) -> PdkResult<Vec<Pattern>> {
    DEFAULT_WATCH_EXCLUDES
        .iter()
        .map(|s| s.to_string())
        .chain(extra.iter().cloned())
        .map(|p| {
            Pattern::new(&p).map_err(|e| {
                PdkError::new(codes::CONFIG_INVALID, format!("invalid exclude glob '{p}': {e}"))
            })
        })
        .collect()
}

fn is_excluded(relative: &Path, patterns: &[Pattern]) -> bool {
    let text = relative.to_string_lossy().replace('\\', "/");
    patterns.iter().any(|p| {
        p.matches(&text)
            // `.git/**` style patterns also exclude the directory itself.
            || p.as_str()
                .strip_suffix("/**")
                .is_some_and(|prefix| text == prefix || text.starts_with(&format!("{prefix}/")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_exclusion_patterns() {
        let patterns = build_patterns(&[]).unwrap();
        assert!(is_excluded(Path::new(".git/HEAD"), &patterns));
        assert!(is_excluded(Path::new("node_modules/x/y.js"), &patterns));
        assert!(is_excluded(Path::new(".pdk/artifacts/a"), &patterns));
        assert!(is_excluded(Path::new("bin/app.exe"), &patterns));
        assert!(!is_excluded(Path::new("src/main.rs"), &patterns));
        assert!(!is_excluded(Path::new("azure-pipelines.yml"), &patterns));
    }

    #[test]
    fn test_user_extends_exclusions() {
        let patterns = build_patterns(&["dist/**".to_string()]).unwrap();
        assert!(is_excluded(Path::new("dist/bundle.js"), &patterns));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(build_patterns(&["[".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_watcher_emits_create_events() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let _watcher = FileWatcher::start(dir.path(), &[], tx).unwrap();

        // Give the backend a moment to arm.
        tokio::time::sleep(Duration::from_millis(250)).await;
        std::fs::write(dir.path().join("a.yml"), "x").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        match event {
            WatchEvent::Change(change) => {
                assert_eq!(change.relative_path, Path::new("a.yml"));
            }
            WatchEvent::Rescan => panic!("unexpected rescan"),
        }
    }

    #[tokio::test]
    async fn test_watcher_skips_excluded_paths() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let _watcher = FileWatcher::start(dir.path(), &[], tx).unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        std::fs::write(dir.path().join(".git/config"), "x").unwrap();
        std::fs::write(dir.path().join("kept.yml"), "x").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        match event {
            WatchEvent::Change(change) => {
                assert_eq!(change.relative_path, Path::new("kept.yml"));
            }
            WatchEvent::Rescan => panic!("unexpected rescan"),
        }
    }
}
