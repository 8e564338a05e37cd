//! Script Directory Watcher
//!
//! Triggers an out-of-cycle reconciliation whenever the script store changes
//! on disk, so out-of-band edits are picked up without waiting for the
//! periodic pass. The engine's own file operations already reconcile
//! inline; the watcher only covers external mutations.

use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::ScriptEngine;

/// Filesystem watcher driving on-demand reconciliation
pub struct ScriptWatcher {
    engine: Arc<ScriptEngine>,
    rx: mpsc::Receiver<()>,
    /// The underlying watcher (kept alive)
    _watcher: RecommendedWatcher,
}

impl ScriptWatcher {
    /// Create a watcher over the engine's script directory.
    pub fn new(engine: Arc<ScriptEngine>) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel(16);

        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        // Full channel means a reconcile is already pending
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => {
                    error!(error = %e, "script watcher error");
                }
            })?;

        watcher.watch(engine.scripts_dir(), RecursiveMode::Recursive)?;
        info!(dir = %engine.scripts_dir().display(), "watching script directory");

        Ok(Self {
            engine,
            rx,
            _watcher: watcher,
        })
    }

    /// Run the watcher loop, reconciling after each batch of changes.
    pub async fn run(mut self) {
        while self.rx.recv().await.is_some() {
            // Drain the burst so one editor save triggers a single pass
            while self.rx.try_recv().is_ok() {}

            debug!("script store changed, reconciling");
            let engine = Arc::clone(&self.engine);
            if tokio::task::spawn_blocking(move || engine.reconcile_now())
                .await
                .is_err()
            {
                error!("reconciliation task panicked");
            }
        }
        debug!("script watcher loop ended");
    }
}
