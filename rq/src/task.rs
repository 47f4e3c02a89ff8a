//! A single replication task and its state transitions
//!
//! A task's state is nothing more than the directory its key-named file sits
//! in. Each transition is one rename, which is what makes concurrent nodes
//! safe without a lock service.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::fsops;
use crate::key::TaskKey;
use crate::update::ReplicateRefUpdate;
use crate::{BUILDING_DIR, REF_UPDATES_DIR, RUNNING_DIR, WAITING_DIR};

/// How waiting tasks are laid out on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitingLayout {
    /// `waiting/<key>`
    #[default]
    Flat,
    /// `waiting/<key[0..2]>/<key>`, bounds directory fan-out on big queues
    Sharded,
}

/// Result of a single task transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The transition happened
    Applied,
    /// Nothing to do: the source was already gone or deleting is disabled
    Skipped,
    /// An I/O error prevented the transition; it has been logged
    Failed,
}

/// Resolved paths of one queue
#[derive(Debug, Clone)]
pub struct Layout {
    pub ref_updates: PathBuf,
    pub building: PathBuf,
    pub running: PathBuf,
    pub waiting: PathBuf,
    pub waiting_layout: WaitingLayout,
}

impl Layout {
    pub fn new(events_dir: &Path, waiting_layout: WaitingLayout) -> Self {
        let ref_updates = events_dir.join(REF_UPDATES_DIR);
        Self {
            building: ref_updates.join(BUILDING_DIR),
            running: ref_updates.join(RUNNING_DIR),
            waiting: ref_updates.join(WAITING_DIR),
            ref_updates,
            waiting_layout,
        }
    }

    /// Create the three state directories
    pub fn ensure(&self) -> Result<(), StoreError> {
        fsops::ensure_dir(&self.building)?;
        fsops::ensure_dir(&self.running)?;
        fsops::ensure_dir(&self.waiting)?;
        Ok(())
    }

    pub fn running_path(&self, key: &TaskKey) -> PathBuf {
        self.running.join(key.as_str())
    }

    /// Where newly waiting tasks are placed under the configured layout
    pub fn waiting_path(&self, key: &TaskKey) -> PathBuf {
        match self.waiting_layout {
            WaitingLayout::Flat => self.flat_waiting_path(key),
            WaitingLayout::Sharded => self.waiting.join(key.shard()).join(key.as_str()),
        }
    }

    pub fn flat_waiting_path(&self, key: &TaskKey) -> PathBuf {
        self.waiting.join(key.as_str())
    }
}

/// One replication unit bound to its key and paths
pub struct Task<'a> {
    layout: &'a Layout,
    key: TaskKey,
    update: Option<ReplicateRefUpdate>,
    delete_disabled: bool,
}

impl<'a> Task<'a> {
    pub fn new(layout: &'a Layout, update: ReplicateRefUpdate) -> Self {
        Self {
            layout,
            key: TaskKey::derive(&update),
            update: Some(update),
            delete_disabled: false,
        }
    }

    /// A task known only by key; it can be moved around but not created
    pub fn from_key(layout: &'a Layout, key: TaskKey) -> Self {
        Self {
            layout,
            key,
            update: None,
            delete_disabled: false,
        }
    }

    /// Leave running files in place on `finish` (tests inspect them)
    pub fn with_delete_disabled(mut self, disabled: bool) -> Self {
        self.delete_disabled = disabled;
        self
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    /// Queue the task unless it is already waiting
    ///
    /// Writes the record under a temporary name in `building` and renames it
    /// into `waiting`. On failure the error is logged and nothing is queued;
    /// the key is returned either way.
    pub fn create(&self) -> TaskKey {
        if self.is_waiting() {
            debug!(key = %self.key, "Task already waiting {}", self.tag());
            return self.key.clone();
        }

        let Some(update) = &self.update else {
            warn!(key = %self.key, "Cannot create a task without its record");
            return self.key.clone();
        };

        let json = match serde_json::to_string(update) {
            Ok(json) => json + "\n",
            Err(e) => {
                warn!(key = %self.key, error = %e, "Couldn't serialize task {}", update);
                return self.key.clone();
            }
        };

        if let Err(e) = self.publish(&json) {
            warn!(key = %self.key, error = %e, "Couldn't create task {}", json.trim_end());
        }
        self.key.clone()
    }

    fn publish(&self, json: &str) -> Result<(), StoreError> {
        let building = fsops::ensure_dir(&self.layout.building)?;
        let waiting = self.layout.waiting_path(&self.key);
        ensure_parent(&waiting)?;

        let tmp = fsops::write_new_file(&building, self.key.as_str(), json.as_bytes())?;
        debug!("CREATE {} {}", tmp.display(), self.tag());

        debug!("RENAME {} {} {}", tmp.display(), waiting.display(), self.tag());
        if let Err(e) = fsops::atomic_move(&tmp, &waiting) {
            // Do not leave an orphan visible to list()
            if let Err(cleanup) = fsops::delete(&tmp) {
                warn!(error = %cleanup, "Couldn't remove temporary task file");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Claim the task: waiting -> running
    pub fn start(&self) -> Outcome {
        let waiting = self.current_waiting_path();
        self.rename(&waiting, &self.layout.running_path(&self.key))
    }

    /// Give the task back: running -> waiting
    pub fn reset(&self) -> Outcome {
        let running = self.layout.running_path(&self.key);
        self.rename(&running, &self.layout.waiting_path(&self.key))
    }

    pub fn is_waiting(&self) -> bool {
        fsops::exists(&self.layout.waiting_path(&self.key))
            || (self.layout.waiting_layout == WaitingLayout::Sharded
                && fsops::exists(&self.layout.flat_waiting_path(&self.key)))
    }

    /// Retire a running task by deleting its file
    ///
    /// A file that is already gone (double finish, or another node got there
    /// first) is reported as [`Outcome::Skipped`].
    pub fn finish(&self) -> Outcome {
        let running = self.layout.running_path(&self.key);
        if self.delete_disabled {
            debug!("DELETE {} {} DISABLED", running.display(), self.tag());
            return Outcome::Skipped;
        }

        debug!("DELETE {} {}", running.display(), self.tag());
        self.remove(&running)
    }

    /// Drop a task that is still waiting, before anyone claims it
    pub fn delete(&self) -> Outcome {
        let mut outcome = self.remove(&self.layout.waiting_path(&self.key));
        if self.layout.waiting_layout == WaitingLayout::Sharded && outcome == Outcome::Skipped {
            outcome = self.remove(&self.layout.flat_waiting_path(&self.key));
        }
        outcome
    }

    /// Existing waiting file, preferring the configured layout
    ///
    /// In sharded mode a flat file left from before the switch is still picked up.
    fn current_waiting_path(&self) -> PathBuf {
        let waiting = self.layout.waiting_path(&self.key);
        if self.layout.waiting_layout == WaitingLayout::Sharded && !fsops::exists(&waiting) {
            let flat = self.layout.flat_waiting_path(&self.key);
            if fsops::exists(&flat) {
                return flat;
            }
        }
        waiting
    }

    fn rename(&self, from: &Path, to: &Path) -> Outcome {
        if let Err(e) = ensure_parent(to) {
            error!(key = %self.key, error = %e, "Error while renaming task");
            return Outcome::Failed;
        }

        debug!("RENAME {} to {} {}", from.display(), to.display(), self.tag());
        match fsops::atomic_move(from, to) {
            Ok(()) => Outcome::Applied,
            Err(e) if e.is_not_found() => {
                debug!(
                    key = %self.key,
                    "Task not at {} (already moved by another node or never created)",
                    from.display()
                );
                Outcome::Skipped
            }
            Err(e) => {
                error!(key = %self.key, error = %e, "Error while renaming task");
                Outcome::Failed
            }
        }
    }

    fn remove(&self, path: &Path) -> Outcome {
        match fsops::delete(path) {
            Ok(true) => Outcome::Applied,
            Ok(false) => {
                debug!(key = %self.key, "Task already absent at {}", path.display());
                Outcome::Skipped
            }
            Err(e) => {
                error!(key = %self.key, error = %e, "Error while deleting task");
                Outcome::Failed
            }
        }
    }

    fn tag(&self) -> String {
        match &self.update {
            Some(update) => update.log_tag(),
            None => format!("({})", self.key),
        }
    }
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fsops::ensure_dir(parent)?;
    }
    Ok(())
}
