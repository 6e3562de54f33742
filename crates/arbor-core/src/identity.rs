//! Identity provider seam.
//!
//! The platform's user directory lives elsewhere; this core only ever
//! asks "does this id exist?". Ids are opaque strings and are never
//! interpreted beyond that check.

use std::collections::HashSet;

/// Resolves user ids supplied as `owner_id`/`author_id`.
pub trait IdentityProvider: Send + Sync {
    /// Whether the directory knows this user id.
    fn exists(&self, user_id: &str) -> bool;
}

/// A directory that accepts every id. The default for development and
/// for CLI use, where authentication happened upstream.
#[derive(Debug, Default)]
pub struct OpenDirectory;

impl IdentityProvider for OpenDirectory {
    fn exists(&self, _user_id: &str) -> bool {
        true
    }
}

/// A directory backed by a fixed set of ids.
#[derive(Debug, Default)]
pub struct FixedDirectory {
    users: HashSet<String>,
}

impl FixedDirectory {
    /// Build a directory from the given ids.
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }
}

impl IdentityProvider for FixedDirectory {
    fn exists(&self, user_id: &str) -> bool {
        self.users.contains(user_id)
    }
}
