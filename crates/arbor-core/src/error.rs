//! Error types for arbor operations.
//!
//! Every failure carries enough detail for the caller; the embedding
//! request layer maps errors to transport status via [`ArborError::kind`].
//! Nothing here is retried or swallowed internally.

use thiserror::Error;

use crate::pr::PullRequestStatus;

/// All possible arbor errors.
#[derive(Debug, Error)]
pub enum ArborError {
    /// No repository is allocated under the given identifier.
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),
    /// The identity provider does not know this user id.
    #[error("author not found: {0}")]
    AuthorNotFound(String),
    /// The address does not resolve to a commit.
    #[error("commit not found: {0}")]
    CommitNotFound(String),
    /// The branch has no tip in this repository.
    #[error("branch not found: {0}")]
    BranchNotFound(String),
    /// An object with the given address was not found.
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    /// No pull request with this id.
    #[error("pull request not found: #{0}")]
    PullRequestNotFound(u64),
    /// The commit's tree has no file at this path.
    #[error("no such file in commit: {0}")]
    FileNotFound(String),
    /// The owner already has a repository at the computed path, or the
    /// branch already exists.
    #[error("name conflict: {0} already exists")]
    NameConflict(String),
    /// The repository allocation exists but its store was never
    /// initialized (or only partially).
    #[error("repository store not initialized: {0}")]
    StoreNotInitialized(String),
    /// The branch tip moved underneath a compare-and-swap advancement.
    #[error("branch {branch} moved: expected tip {expected}, found {found}")]
    StaleBranchTip {
        branch: String,
        expected: String,
        found: String,
    },
    /// A status transition was requested on a pull request that already
    /// left the open state.
    #[error("pull request #{id} is {status}, not open")]
    PullRequestNotOpen { id: u64, status: PullRequestStatus },
    /// A repository name, owner id, or branch name failed validation.
    #[error("invalid name: {0}")]
    InvalidName(String),
    /// A file path failed validation (empty, absolute, traversal, or
    /// walking through an existing file).
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// A string that must be an object address is not one.
    #[error("malformed object address: {0}")]
    InvalidAddress(String),
    /// Stored bytes do not hash to their claimed address, or a
    /// hash-verified object fails to decode as its expected type.
    #[error("object {address} is corrupt: {detail}")]
    Corrupt { address: String, detail: String },
    /// Could not acquire an advisory lock within the timeout.
    #[error("could not acquire {0} lock within timeout")]
    LockTimeout(String),
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of an error, for mapping to transport-level
/// status codes. Crossing the boundary, an error is the pair
/// (`kind()`, `to_string()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced entity (repository, commit, object, author, branch,
    /// file, pull request) does not resolve.
    NotFound,
    /// A create collided with an existing allocation.
    NameConflict,
    /// The operation is not valid against the entity's current state.
    InvalidState,
    /// Caller-supplied input failed validation.
    InvalidArgument,
    /// Stored data does not match its content address.
    IntegrityViolation,
    /// Infrastructure failure: I/O, encoding, lock acquisition.
    Internal,
}

impl ArborError {
    /// The error's kind, for the `(kind, message)` reporting contract.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArborError::RepositoryNotFound(_)
            | ArborError::AuthorNotFound(_)
            | ArborError::CommitNotFound(_)
            | ArborError::BranchNotFound(_)
            | ArborError::ObjectNotFound(_)
            | ArborError::PullRequestNotFound(_)
            | ArborError::FileNotFound(_) => ErrorKind::NotFound,
            ArborError::NameConflict(_) => ErrorKind::NameConflict,
            ArborError::StoreNotInitialized(_)
            | ArborError::StaleBranchTip { .. }
            | ArborError::PullRequestNotOpen { .. } => ErrorKind::InvalidState,
            ArborError::InvalidName(_)
            | ArborError::InvalidPath(_)
            | ArborError::InvalidAddress(_) => ErrorKind::InvalidArgument,
            ArborError::Corrupt { .. } => ErrorKind::IntegrityViolation,
            ArborError::LockTimeout(_) | ArborError::Io(_) | ArborError::Json(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Convenience alias for Results in arbor.
pub type ArborResult<T> = Result<T, ArborError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            ArborError::RepositoryNotFound("a/b".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ArborError::NameConflict("a/b".into()).kind(),
            ErrorKind::NameConflict
        );
        assert_eq!(
            ArborError::Corrupt {
                address: "00".into(),
                detail: "bad".into()
            }
            .kind(),
            ErrorKind::IntegrityViolation
        );
        assert_eq!(
            ArborError::LockTimeout("refs".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_messages_name_the_subject() {
        let e = ArborError::CommitNotFound("abc123".into());
        assert!(e.to_string().contains("abc123"));

        let e = ArborError::StaleBranchTip {
            branch: "main".into(),
            expected: "aaa".into(),
            found: "bbb".into(),
        };
        assert!(e.to_string().contains("main"));
    }
}
