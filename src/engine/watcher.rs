//! Model file watcher
//!
//! Polls the model file's modification time and invokes a reload callback
//! when it moves forward. The watcher never touches model state itself.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::handle::file_mtime;

/// Reload hook. `Ok(true)` means a new model was installed.
pub type ReloadCallback = Arc<dyn Fn() -> anyhow::Result<bool> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Stopped,
    Running,
}

/// Extra time `stop` waits on top of one poll interval.
const STOP_SLACK: Duration = Duration::from_secs(1);

pub struct ModelWatcher {
    model_path: PathBuf,
    interval: Duration,
    state: Mutex<WatcherState>,
    started: AtomicBool,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ModelWatcher {
    pub fn new(model_path: impl AsRef<Path>, interval: Duration) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            interval,
            state: Mutex::new(WatcherState::Stopped),
            started: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> WatcherState {
        *self.state.lock()
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Spawn the polling loop on the current tokio runtime.
    ///
    /// The file's current mtime (if any) is the initial observation. An
    /// instance runs at most once; restarting needs a new watcher.
    pub fn start(&self, on_change: ReloadCallback) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("model watcher for {} was already started", self.model_path.display());
        }

        let initial = file_mtime(&self.model_path);
        let task = tokio::spawn(watch_loop(
            self.model_path.clone(),
            self.interval,
            initial,
            on_change,
            self.shutdown.clone(),
        ));

        *self.task.lock() = Some(task);
        *self.state.lock() = WatcherState::Running;
        info!(
            "Started watching model file {} every {:?}",
            self.model_path.display(),
            self.interval
        );
        Ok(())
    }

    /// Stop polling. Idempotent; waits roughly one interval for the loop to
    /// exit and never aborts a reload that is already running.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        *self.state.lock() = WatcherState::Stopped;

        let Some(task) = task else {
            return;
        };

        self.shutdown.notify_one();
        match tokio::time::timeout(self.interval + STOP_SLACK, task).await {
            Ok(Ok(())) => info!("Stopped model watcher"),
            Ok(Err(e)) => error!("Model watcher task failed: {}", e),
            Err(_) => warn!("Model watcher still busy with a reload, detaching"),
        }
    }
}

impl Drop for ModelWatcher {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

async fn watch_loop(
    path: PathBuf,
    interval: Duration,
    mut last_mtime: Option<SystemTime>,
    on_change: ReloadCallback,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.notified() => {
                debug!("Model watcher received shutdown");
                break;
            }
        }

        // A missing file keeps the last observation.
        let Some(current) = file_mtime(&path) else {
            debug!("Model file {} not present", path.display());
            continue;
        };

        if !is_newer(current, last_mtime) {
            continue;
        }

        info!("Model file changed, triggering reload...");
        // Recorded before the outcome is known so a half-written file is
        // retried on its next modification only.
        last_mtime = Some(current);

        let callback = on_change.clone();
        match tokio::task::spawn_blocking(move || callback()).await {
            Ok(Ok(true)) => info!("Model reload applied"),
            Ok(Ok(false)) => warn!("Model reload rejected, keeping current model"),
            Ok(Err(e)) => error!("Error during model reload: {:#}", e),
            Err(e) => error!("Model reload panicked: {}", e),
        }
    }
}

fn is_newer(current: SystemTime, last: Option<SystemTime>) -> bool {
    last.map_or(true, |last| current > last)
}
