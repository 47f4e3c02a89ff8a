//! Queue error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the directory primitives
///
/// Only [`StoreError::Provision`] ever escapes the public API (from
/// `ReplicationTasksStorage::open`). Everything else is logged at the task
/// boundary and reported as an outcome.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Couldn't create {path}")]
    Provision {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to rename {from} to {to}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete {path}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed task record {path}")]
    Record {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// The underlying I/O error, if any
    pub fn io_error(&self) -> Option<&std::io::Error> {
        match self {
            Self::Provision { source, .. }
            | Self::Write { source, .. }
            | Self::Rename { source, .. }
            | Self::Delete { source, .. } => Some(source),
            Self::Record { .. } => None,
        }
    }

    /// True when the source file of the operation was already gone
    ///
    /// That is the normal result of another node winning a race, not a fault.
    pub fn is_not_found(&self) -> bool {
        self.io_error()
            .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_rename_message() {
        let err = StoreError::Rename {
            from: PathBuf::from("/q/waiting/abc"),
            to: PathBuf::from("/q/running/abc"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/q/waiting/abc"));
        assert!(msg.contains("/q/running/abc"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_record_error_has_no_io() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = StoreError::Record {
            path: PathBuf::from("/q/waiting/abc"),
            source,
        };
        assert!(err.io_error().is_none());
        assert!(!err.is_not_found());
    }
}
