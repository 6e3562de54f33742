//! arbor-core — Version-control and code-review engine.
//!
//! Arbor is the storage core of a collaboration platform: repositories
//! with content-addressed history, forks that copy a whole object
//! graph, and pull requests whose diffs are computed fresh from branch
//! tips. The request-handling layer lives elsewhere; everything here
//! is synchronous, disk-bound, and safe to call from worker threads.

pub mod commit;
pub mod diff;
pub mod error;
pub mod fsutil;
pub mod hash;
pub mod hub;
pub mod identity;
pub mod lock;
pub mod object;
pub mod pr;
pub mod refs;
pub mod repo;
pub mod tree;

pub use commit::{Commit, CommitEntry};
pub use diff::{ChangeType, DiffHunk, DiffLine, FileDiff, LineOp};
pub use error::{ArborError, ArborResult, ErrorKind};
pub use hub::{RepoHub, RepoId, RepoMeta, Visibility};
pub use pr::{NewPullRequest, PullRequest, PullRequestStatus, PullRequestStore};
pub use refs::DEFAULT_BRANCH;
pub use repo::{FileEdit, Repository};
pub use tree::{Tree, TreeEntry};
