//! Content-derived task identifiers

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

use crate::update::ReplicateRefUpdate;

/// Hex SHA-1 of `project\nref\nuri\nremote`
///
/// Every host derives the same key for the same update, which is what lets
/// independent nodes deduplicate without talking to each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskKey(String);

impl TaskKey {
    pub fn derive(update: &ReplicateRefUpdate) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(update.project.as_bytes());
        hasher.update(b"\n");
        hasher.update(update.ref_name.as_bytes());
        hasher.update(b"\n");
        hasher.update(update.uri.as_bytes());
        hasher.update(b"\n");
        hasher.update(update.remote.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Accept a key read back from a file name
    ///
    /// Returns `None` unless it is 40 lowercase hex characters.
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 40 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character shard used by the sharded waiting layout
    pub fn shard(&self) -> &str {
        self.0.get(..2).unwrap_or(self.0.as_str())
    }
}

impl TryFrom<String> for TaskKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).ok_or_else(|| format!("invalid task key: {:?}", s))
    }
}

impl From<TaskKey> for String {
    fn from(key: TaskKey) -> Self {
        key.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TaskKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
