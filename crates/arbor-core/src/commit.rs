//! Commits — immutable records linking a tree snapshot to its history.
//!
//! A commit is addressed by the SHA-256 of its canonical JSON, parent
//! reference included, so history forms a hash-verified chain: altering
//! any ancestor would change every descendant's address.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A commit object. The address is external — it is whatever the
/// object store computed when the serialized commit was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Commit {
    /// Parent commit address (None for the first commit on a branch).
    pub parent: Option<String>,
    /// Address of the root tree snapshot.
    pub tree: String,
    /// Opaque user id of the author, as supplied by the identity provider.
    pub author: String,
    /// Commit message.
    pub message: String,
    /// When this commit was created.
    pub timestamp: DateTime<Utc>,
}

impl Commit {
    /// Create a new commit stamped with the current time.
    pub fn new(parent: Option<String>, tree: String, author: String, message: String) -> Self {
        Self {
            parent,
            tree,
            author,
            message,
            timestamp: Utc::now(),
        }
    }
}

/// A commit paired with its address, as returned by commit creation and
/// history walks.
#[derive(Debug, Clone, Serialize)]
pub struct CommitEntry {
    /// The commit's content address.
    pub address: String,
    /// The commit itself.
    pub commit: Commit,
}
