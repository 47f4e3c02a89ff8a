//! RefQueue - durable replication task queue
//!
//! Records which (project, ref, destination) replication units are pending,
//! in flight, or done, using nothing but atomic renames on a shared
//! filesystem. Any number of processes, on any number of hosts mounting the
//! same volume, may create, claim and retire tasks concurrently.
//!
//! # Architecture
//!
//! ```text
//! <events_dir>/
//! └── ref-updates/
//!     ├── building/<key><random>   # records being written
//!     ├── running/<key>            # claimed by a worker
//!     └── waiting/<key>            # queued (or waiting/<key[0..2]>/<key> when sharded)
//! ```
//!
//! A task's state is the directory holding the file named by its key.
//! Every transition is a single `rename(2)`, so readers see a task in one
//! place or the other, never both and never neither. The whole tree must live
//! on one filesystem.
//!
//! # Example
//!
//! ```ignore
//! use refqueue::{ReplicateRefUpdate, ReplicationTasksStorage, UriUpdateSet};
//!
//! let storage = ReplicationTasksStorage::open("/var/lib/replication")?;
//! let update = ReplicateRefUpdate::new("proj", "refs/heads/main", "ssh://mirror/proj.git", "mirror");
//! storage.create(&update);
//!
//! let push = UriUpdateSet::from(&update);
//! storage.start(&push);
//! // ... push the ref ...
//! storage.finish(&push);
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod fsops;
mod key;
mod storage;
mod task;
mod update;

pub use error::StoreError;
pub use key::TaskKey;
pub use storage::{ReplicationTasksStorage, Summary};
pub use task::{Layout, Outcome, Task, WaitingLayout};
pub use update::{ReplicateRefUpdate, UriUpdateSet, UriUpdates, to_ascii_uri};

/// Ref name used for tasks that replicate every ref of a project
pub const ALL_REFS: &str = "..all..";

/// Directory under the events directory that holds the queue
pub const REF_UPDATES_DIR: &str = "ref-updates";

/// Sub-directory for records still being written
pub const BUILDING_DIR: &str = "building";

/// Sub-directory for claimed tasks
pub const RUNNING_DIR: &str = "running";

/// Sub-directory for queued tasks
pub const WAITING_DIR: &str = "waiting";
