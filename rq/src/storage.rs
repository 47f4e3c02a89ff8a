//! Public façade over the task directories

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::StoreError;
use crate::fsops;
use crate::key::TaskKey;
use crate::task::{Layout, Outcome, Task, WaitingLayout};
use crate::update::{ReplicateRefUpdate, UriUpdates};

/// Tally of per-ref outcomes for a multi-ref operation
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Summary {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.skipped + self.failed
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "applied: {}, skipped: {}, failed: {}",
            self.applied, self.skipped, self.failed
        )
    }
}

/// Persistent store of replication tasks
///
/// Owns `<events_dir>/ref-updates` for the life of the process. Other
/// processes sharing the directory are expected and tolerated. Operations
/// never fail towards the caller: errors are logged and show up as
/// [`Outcome::Failed`] or as a missing entry in later listings.
pub struct ReplicationTasksStorage {
    layout: Layout,
    lock: Mutex<()>,
    delete_disabled: AtomicBool,
}

impl ReplicationTasksStorage {
    /// Open the queue under `events_dir` with the flat waiting layout
    pub fn open(events_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_layout(events_dir, WaitingLayout::default())
    }

    /// Open the queue, creating its directories
    ///
    /// Failing to create them is the only error this type ever returns.
    pub fn open_with_layout(events_dir: impl AsRef<Path>, waiting_layout: WaitingLayout) -> Result<Self, StoreError> {
        let layout = Layout::new(events_dir.as_ref(), waiting_layout);
        layout.ensure()?;
        debug!(path = ?layout.ref_updates, ?waiting_layout, "Opened replication tasks storage");
        Ok(Self {
            layout,
            lock: Mutex::new(()),
            delete_disabled: AtomicBool::new(false),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        Self::open_with_layout(&config.events_directory, config.waiting_layout)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Queue one ref update; a duplicate of a waiting task is a no-op
    pub fn create(&self, update: &ReplicateRefUpdate) -> TaskKey {
        let _guard = self.guard();
        self.task(update.clone()).create()
    }

    /// Make `finish` leave running files in place
    pub fn disable_delete_for_testing(&self, delete_disabled: bool) {
        self.delete_disabled.store(delete_disabled, Ordering::SeqCst);
    }

    /// Claim every ref of `push`
    pub fn start<U: UriUpdates + ?Sized>(&self, push: &U) -> Summary {
        let _guard = self.guard();
        self.each(push, |task| task.start())
    }

    /// Return every ref of `push` to waiting so it can be retried
    pub fn reset<U: UriUpdates + ?Sized>(&self, push: &U) -> Summary {
        let _guard = self.guard();
        self.each(push, |task| task.reset())
    }

    /// Move every running task back to waiting
    ///
    /// Called at startup: anything still running belonged to a process that
    /// died mid-push.
    pub fn reset_all(&self) -> Summary {
        let _guard = self.guard();
        let mut summary = Summary::default();

        for (path, _) in fsops::list_files(&self.layout.running) {
            let Some(key) = path.file_name().and_then(|n| n.to_str()).and_then(TaskKey::parse) else {
                warn!(path = %path.display(), "Ignoring unexpected file in running tasks");
                continue;
            };
            summary.record(Task::from_key(&self.layout, key).reset());
        }

        if summary.total() > 0 {
            info!("Reset running tasks to waiting: {}", summary);
        } else {
            debug!("No running tasks to reset");
        }
        summary
    }

    /// True if any ref of `push` is still waiting
    pub fn is_waiting<U: UriUpdates + ?Sized>(&self, push: &U) -> bool {
        push.ref_updates()
            .into_iter()
            .any(|update| self.task(update).is_waiting())
    }

    /// Retire every ref of `push`
    pub fn finish<U: UriUpdates + ?Sized>(&self, push: &U) -> Summary {
        self.each(push, |task| task.finish())
    }

    /// Forget a task that has not been claimed yet
    pub fn delete(&self, update: &ReplicateRefUpdate) -> Outcome {
        let _guard = self.guard();
        self.task(update.clone()).delete()
    }

    pub fn list_waiting(&self) -> Vec<ReplicateRefUpdate> {
        self.list_dir(&self.layout.waiting)
    }

    pub fn list_running(&self) -> Vec<ReplicateRefUpdate> {
        self.list_dir(&self.layout.running)
    }

    pub fn list_building(&self) -> Vec<ReplicateRefUpdate> {
        self.list_dir(&self.layout.building)
    }

    /// Everything on disk: building, running and waiting
    pub fn list(&self) -> Vec<ReplicateRefUpdate> {
        self.list_dir(&self.layout.ref_updates)
    }

    fn list_dir(&self, dir: &Path) -> Vec<ReplicateRefUpdate> {
        if let Err(e) = fsops::ensure_dir(dir) {
            error!(error = %e, "Error while listing tasks");
            return Vec::new();
        }

        fsops::list_files(dir)
            .into_iter()
            .filter_map(|(path, bytes)| match serde_json::from_slice(&bytes) {
                Ok(update) => Some(update),
                Err(source) => {
                    let in_flight = self.is_in_flight(&path);
                    let err = StoreError::Record { path, source };
                    if in_flight {
                        debug!(error = %err, "Skipping task record still being written");
                    } else {
                        warn!(error = %err, "Skipping task record");
                    }
                    None
                }
            })
            .collect()
    }

    /// Records under `building` may be read while a `create` is still writing them
    fn is_in_flight(&self, path: &Path) -> bool {
        path.starts_with(&self.layout.building)
    }

    fn task(&self, update: ReplicateRefUpdate) -> Task<'_> {
        Task::new(&self.layout, update).with_delete_disabled(self.delete_disabled.load(Ordering::SeqCst))
    }

    fn each<U, F>(&self, push: &U, op: F) -> Summary
    where
        U: UriUpdates + ?Sized,
        F: Fn(&Task<'_>) -> Outcome,
    {
        let mut summary = Summary::default();
        for update in push.ref_updates() {
            summary.record(op(&self.task(update)));
        }
        summary
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
