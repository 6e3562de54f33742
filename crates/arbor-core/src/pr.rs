//! Pull requests: a proposed integration of one repository/branch pair
//! into another.
//!
//! A pull request stores only the proposal (where from, where to, by
//! whom) and its status. Its diff is never persisted; every request
//! recomputes it from the two branch tips, so a review always shows
//! the current state of both sides.
//!
//! Merging is not implemented anywhere in the core. `mark_merged`
//! records a decision made elsewhere and performs no integration.

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::diff::{self, FileDiff};
use crate::error::{ArborError, ArborResult};
use crate::fsutil::atomic_write;
use crate::hub::{RepoHub, RepoId};
use crate::lock::RepoLock;
use crate::refs;
use crate::repo::LOCK_TIMEOUT;

const PULLS_LOCK: &str = "pulls.lock";

/// Pull request lifecycle status.
///
/// `open` is the only state that admits transitions; `merged` and
/// `closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestStatus {
    Open,
    Merged,
    Closed,
}

impl fmt::Display for PullRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PullRequestStatus::Open => "open",
            PullRequestStatus::Merged => "merged",
            PullRequestStatus::Closed => "closed",
        })
    }
}

/// One pull request document (`pulls/<id>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PullRequest {
    pub id: u64,
    pub source_repo: RepoId,
    pub source_branch: String,
    pub target_repo: RepoId,
    pub target_branch: String,
    pub title: String,
    pub description: Option<String>,
    /// Opaque user id of the proposer.
    pub author: String,
    pub status: PullRequestStatus,
    pub created_at: DateTime<Utc>,
}

/// Inputs for [`PullRequestStore::create`].
#[derive(Debug, Clone)]
pub struct NewPullRequest {
    pub source_repo: RepoId,
    pub source_branch: String,
    pub target_repo: RepoId,
    pub target_branch: String,
    pub title: String,
    pub description: Option<String>,
    pub author: String,
}

/// The hub's pull-request store, borrowed from [`RepoHub::pulls`].
///
/// Repository lookups during create and diff go through the hub, so a
/// pull request may span two repositories (a fork and its parent).
pub struct PullRequestStore<'h> {
    hub: &'h RepoHub,
    dir: PathBuf,
}

impl<'h> PullRequestStore<'h> {
    pub(crate) fn new(hub: &'h RepoHub, dir: PathBuf) -> Self {
        Self { hub, dir }
    }

    /// Open a new pull request.
    ///
    /// Both repositories must resolve and both branch names must be
    /// well-formed. Whether the branches have tips, differ, or even
    /// belong to related histories is not checked; a review against an
    /// unborn branch simply fails at diff time.
    pub fn create(&self, new: NewPullRequest) -> ArborResult<PullRequest> {
        self.hub.open(&new.source_repo)?;
        self.hub.open(&new.target_repo)?;
        refs::validate_branch_name(&new.source_branch)?;
        refs::validate_branch_name(&new.target_branch)?;

        let _lock = self.store_lock()?;
        let id = self.next_id()?;
        let pr = PullRequest {
            id,
            source_repo: new.source_repo,
            source_branch: new.source_branch,
            target_repo: new.target_repo,
            target_branch: new.target_branch,
            title: new.title,
            description: new.description,
            author: new.author,
            status: PullRequestStatus::Open,
            created_at: Utc::now(),
        };
        self.write(&pr)?;

        info!(
            pr = pr.id,
            source = %pr.source_repo,
            target = %pr.target_repo,
            "pull request created"
        );
        Ok(pr)
    }

    /// Load a pull request by id.
    pub fn get(&self, id: u64) -> ArborResult<PullRequest> {
        let data = match fs::read(self.doc_path(id)) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ArborError::PullRequestNotFound(id));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// The pull request's diff as of right now: the target branch tip
    /// (old side) against the source branch tip (new side).
    ///
    /// Fails with `BranchNotFound` when either branch has no tip yet.
    pub fn diff(&self, id: u64) -> ArborResult<Vec<FileDiff>> {
        let pr = self.get(id)?;
        let source = self.hub.open(&pr.source_repo)?;
        let target = self.hub.open(&pr.target_repo)?;

        let source_tip = source.branch_tip(&pr.source_branch)?.ok_or_else(|| {
            ArborError::BranchNotFound(format!("{}:{}", pr.source_repo, pr.source_branch))
        })?;
        let target_tip = target.branch_tip(&pr.target_branch)?.ok_or_else(|| {
            ArborError::BranchNotFound(format!("{}:{}", pr.target_repo, pr.target_branch))
        })?;

        diff::diff_commits(target.objects(), &target_tip, source.objects(), &source_tip)
    }

    /// Every pull request targeting the given repository, any status,
    /// ordered by id.
    pub fn list_for_target(&self, repo: &RepoId) -> ArborResult<Vec<PullRequest>> {
        let mut prs = Vec::new();
        for id in self.ids()? {
            let pr = self.get(id)?;
            if pr.target_repo == *repo {
                prs.push(pr);
            }
        }
        Ok(prs)
    }

    /// Close the pull request without merging.
    pub fn close(&self, id: u64) -> ArborResult<PullRequest> {
        self.transition(id, PullRequestStatus::Closed)
    }

    /// Record that the pull request was merged by an external decision.
    /// No branch integration happens here.
    pub fn mark_merged(&self, id: u64) -> ArborResult<PullRequest> {
        self.transition(id, PullRequestStatus::Merged)
    }

    fn transition(&self, id: u64, to: PullRequestStatus) -> ArborResult<PullRequest> {
        let _lock = self.store_lock()?;
        let mut pr = self.get(id)?;
        if pr.status != PullRequestStatus::Open {
            return Err(ArborError::PullRequestNotOpen {
                id,
                status: pr.status,
            });
        }
        pr.status = to;
        self.write(&pr)?;
        info!(pr = id, status = %to, "pull request transitioned");
        Ok(pr)
    }

    /// All document ids present in the store, ascending.
    fn ids(&self) -> ArborResult<Vec<u64>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(stem) = name.strip_suffix(".json") {
                if let Ok(id) = stem.parse::<u64>() {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// The next sequential id. Callers hold the store lock.
    fn next_id(&self) -> ArborResult<u64> {
        Ok(self.ids()?.last().copied().unwrap_or(0) + 1)
    }

    fn store_lock(&self) -> ArborResult<RepoLock> {
        fs::create_dir_all(&self.dir)?;
        RepoLock::acquire(&self.dir, PULLS_LOCK, LOCK_TIMEOUT)
    }

    fn write(&self, pr: &PullRequest) -> ArborResult<()> {
        let json = serde_json::to_vec_pretty(pr)?;
        atomic_write(&self.doc_path(pr.id), &json)?;
        Ok(())
    }

    fn doc_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}
