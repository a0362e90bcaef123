//! Watches the tree source file and reports changes.

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Quiet period after the last event before reporting, so one save is one
/// change.
pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// Keeps the underlying watcher alive. Dropping it stops watching.
pub struct SourceWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl SourceWatcher {
    /// Watch `file` and receive one message per settled burst of changes.
    ///
    /// The parent directory is watched, since editors often replace files
    /// instead of writing them in place.
    pub fn new(file: &Path) -> Result<(Self, mpsc::Receiver<()>)> {
        let file = file
            .canonicalize()
            .with_context(|| format!("cannot watch {}", file.display()))?;
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .with_context(|| format!("{} has no parent directory", file.display()))?;

        let (change_tx, change_rx) = mpsc::channel(1);
        let watched = file.clone();

        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    if events.iter().any(|event| is_relevant(&event.path, &watched)) {
                        debug!("Source file changed: {}", watched.display());
                        // A full queue already has a pending reload.
                        let _ = change_tx.try_send(());
                    }
                }
                Err(e) => warn!("File watch error: {}", e),
            }
        })
        .context("failed to create file watcher")?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", dir.display()))?;
        info!("Watching {} for changes", file.display());

        Ok((
            Self {
                _debouncer: debouncer,
            },
            change_rx,
        ))
    }
}

/// Whether a changed path in the watched directory is the tree file.
fn is_relevant(path: &Path, file: &Path) -> bool {
    path == file || (path.parent() == file.parent() && path.file_name() == file.file_name())
}
