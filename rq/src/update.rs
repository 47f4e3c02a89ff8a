//! Replication units and the batches collaborators hand to the queue

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One ref of one project destined for one remote URI
///
/// This is the persisted record: each task file holds exactly one of these as
/// a JSON object. Changing the field set breaks readers of existing queues.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicateRefUpdate {
    pub project: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    /// Destination URI in canonical ASCII form
    pub uri: String,
    /// Logical remote name the URI belongs to
    pub remote: String,
}

impl ReplicateRefUpdate {
    pub fn new(
        project: impl Into<String>,
        ref_name: impl Into<String>,
        uri: impl AsRef<str>,
        remote: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            ref_name: ref_name.into(),
            uri: to_ascii_uri(uri.as_ref()),
            remote: remote.into(),
        }
    }

    /// Short form used in transition logs: `(project:ref => uri)`
    pub(crate) fn log_tag(&self) -> String {
        format!("({}:{} => {})", self.project, self.ref_name, self.uri)
    }
}

impl fmt::Display for ReplicateRefUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ref-update {}:{} uri:{} remote:{}",
            self.project, self.ref_name, self.uri, self.remote
        )
    }
}

/// Canonical ASCII form of a URI
///
/// ASCII characters pass through untouched; anything else is written as the
/// percent-encoded bytes of its UTF-8 encoding. Applying it twice is a no-op,
/// so keys derived on different hosts agree no matter who canonicalised first.
pub fn to_ascii_uri(uri: &str) -> String {
    if uri.is_ascii() {
        return uri.to_string();
    }

    let mut out = String::with_capacity(uri.len() * 3);
    for ch in uri.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    out
}

/// A multi-ref replication unit: one project, one destination, many refs
///
/// The queue only needs these four facts; how the implementor arrives at its
/// ref set is its own business.
pub trait UriUpdates {
    /// Project the refs belong to
    fn project(&self) -> &str;

    /// Destination URI
    fn uri(&self) -> &str;

    /// Logical remote name
    fn remote_name(&self) -> &str;

    /// Refs involved in this unit
    fn refs(&self) -> Vec<&str>;

    /// One update per ref
    fn ref_updates(&self) -> Vec<ReplicateRefUpdate> {
        self.refs()
            .into_iter()
            .map(|r| ReplicateRefUpdate::new(self.project(), r, self.uri(), self.remote_name()))
            .collect()
    }
}

/// Plain owned implementation of [`UriUpdates`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriUpdateSet {
    pub project: String,
    pub uri: String,
    pub remote: String,
    pub refs: BTreeSet<String>,
}

impl UriUpdateSet {
    pub fn new(
        project: impl Into<String>,
        uri: impl AsRef<str>,
        remote: impl Into<String>,
        refs: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            project: project.into(),
            uri: to_ascii_uri(uri.as_ref()),
            remote: remote.into(),
            refs: refs.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<&ReplicateRefUpdate> for UriUpdateSet {
    fn from(update: &ReplicateRefUpdate) -> Self {
        Self::new(
            update.project.clone(),
            &update.uri,
            update.remote.clone(),
            [update.ref_name.clone()],
        )
    }
}

impl UriUpdates for UriUpdateSet {
    fn project(&self) -> &str {
        &self.project
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn remote_name(&self) -> &str {
        &self.remote
    }

    fn refs(&self) -> Vec<&str> {
        self.refs.iter().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_shape() {
        let update = ReplicateRefUpdate::new("myProject", "refs/heads/main", "http://example.com/p.git", "myDest");
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(
            json,
            r#"{"project":"myProject","ref":"refs/heads/main","uri":"http://example.com/p.git","remote":"myDest"}"#
        );
    }

    #[test]
    fn test_record_parses_foreign_field_order() {
        let json = r#"{"remote":"r","uri":"ssh://h/p.git","ref":"refs/tags/v1","project":"p"}"#;
        let update: ReplicateRefUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update, ReplicateRefUpdate::new("p", "refs/tags/v1", "ssh://h/p.git", "r"));
    }

    #[test]
    fn test_display() {
        let update = ReplicateRefUpdate::new("p", "refs/heads/x", "ssh://h/p.git", "mirror");
        assert_eq!(update.to_string(), "ref-update p:refs/heads/x uri:ssh://h/p.git remote:mirror");
    }

    #[test]
    fn test_ascii_uri_passthrough() {
        assert_eq!(to_ascii_uri("ssh://host/a%20b.git"), "ssh://host/a%20b.git");
    }

    #[test]
    fn test_ascii_uri_encodes_non_ascii() {
        assert_eq!(to_ascii_uri("http://host/caf\u{e9}.git"), "http://host/caf%C3%A9.git");
        let once = to_ascii_uri("http://h/\u{65e5}\u{672c}");
        assert_eq!(to_ascii_uri(&once), once);
    }

    #[test]
    fn test_uri_update_set_expands_refs() {
        let set = UriUpdateSet::new("p", "ssh://h/p.git", "mirror", ["refs/heads/b", "refs/heads/a"]);
        let updates = set.ref_updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].ref_name, "refs/heads/a");
        assert_eq!(updates[1].ref_name, "refs/heads/b");
        assert!(updates.iter().all(|u| u.remote == "mirror" && u.project == "p"));
    }

    #[test]
    fn test_uri_update_set_from_update() {
        let update = ReplicateRefUpdate::new("p", "refs/heads/main", "ssh://h/p.git", "mirror");
        let set = UriUpdateSet::from(&update);
        assert_eq!(set.ref_updates(), vec![update]);
    }
}
