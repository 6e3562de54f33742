//! The platform root: one directory owning every repository allocation
//! and the pull-request store.
//!
//! Layout under the hub root:
//!
//! ```text
//! <root>/repos/<owner>/<name>/   one allocation per repository
//! <root>/pulls/                  pull-request documents, one per id
//! ```
//!
//! The hub is the identity boundary: operations that record a user id
//! (create, fork, commit) resolve it against the [`IdentityProvider`]
//! before touching storage. `Repository` handles obtained here treat
//! ids as opaque.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::commit::CommitEntry;
use crate::error::{ArborError, ArborResult};
use crate::fsutil::atomic_write;
use crate::identity::{IdentityProvider, OpenDirectory};
use crate::lock::RepoLock;
use crate::object::ObjectStore;
use crate::pr::PullRequestStore;
use crate::repo::{
    FileEdit, Repository, LOCKS_DIR, LOCK_TIMEOUT, META_FILE, OBJECTS_DIR, REFS_DIR,
};
use crate::tree::TreeEntry;

const REPOS_DIR: &str = "repos";
const PULLS_DIR: &str = "pulls";
const META_LOCK: &str = "meta.lock";

/// A repository identifier: `owner/name`.
///
/// Both components double as path components under the hub root, so
/// they are validated on construction and the pair is globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoId {
    owner: String,
    name: String,
}

impl RepoId {
    pub fn new(owner: &str, name: &str) -> ArborResult<Self> {
        validate_component(owner, "owner")?;
        validate_component(name, "repository name")?;
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoId {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name)) => RepoId::new(owner, name),
            None => Err(ArborError::InvalidName(format!(
                "repository id must be owner/name, got: {s}"
            ))),
        }
    }
}

impl Serialize for RepoId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RepoId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Who may see a repository. Enforcement happens in the platform's
/// request layer; the core only records the setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        })
    }
}

/// Persisted repository metadata (`repo.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoMeta {
    pub id: RepoId,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    /// The repository this one was forked from, if any.
    pub parent: Option<RepoId>,
    /// Repositories forked from this one, oldest first.
    pub forks: Vec<RepoId>,
}

/// The repository store over a platform root directory.
pub struct RepoHub {
    root: PathBuf,
    identity: Box<dyn IdentityProvider>,
}

impl RepoHub {
    /// A hub rooted at `root` that accepts every user id.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_identity(root, Box::new(OpenDirectory))
    }

    /// A hub that resolves user ids against the given provider.
    pub fn with_identity(root: impl Into<PathBuf>, identity: Box<dyn IdentityProvider>) -> Self {
        Self {
            root: root.into(),
            identity,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a new, empty repository for `owner` with default
    /// visibility.
    pub fn create_repository(&self, name: &str, owner: &str) -> ArborResult<Repository> {
        self.create_repository_with(name, owner, Visibility::default())
    }

    /// Allocate a new, empty repository.
    ///
    /// The allocation directory itself is the uniqueness check: out of
    /// two racing creates for the same `owner/name`, exactly one sees
    /// the directory already present and fails with `NameConflict`.
    pub fn create_repository_with(
        &self,
        name: &str,
        owner: &str,
        visibility: Visibility,
    ) -> ArborResult<Repository> {
        let id = RepoId::new(owner, name)?;
        self.require_user(owner)?;

        let dir = self.repo_dir(&id);
        self.claim_allocation(&id, &dir)?;

        let meta = RepoMeta {
            id: id.clone(),
            visibility,
            created_at: Utc::now(),
            parent: None,
            forks: Vec::new(),
        };
        write_meta(&dir, &meta)?;

        info!(repo = %id, visibility = %visibility, "repository created");
        Ok(Repository::at(id, &dir))
    }

    /// Open an existing repository.
    pub fn open(&self, id: &RepoId) -> ArborResult<Repository> {
        let dir = self.repo_dir(id);
        if !dir.exists() {
            return Err(ArborError::RepositoryNotFound(id.to_string()));
        }
        if !dir.join(META_FILE).exists() || !dir.join(OBJECTS_DIR).exists() {
            return Err(ArborError::StoreNotInitialized(id.to_string()));
        }
        Ok(Repository::at(id.clone(), &dir))
    }

    /// The repository's persisted metadata.
    pub fn repo_meta(&self, id: &RepoId) -> ArborResult<RepoMeta> {
        let dir = self.repo_dir(id);
        if !dir.exists() {
            return Err(ArborError::RepositoryNotFound(id.to_string()));
        }
        read_meta(&dir, id)
    }

    /// All repository ids owned by `owner`, sorted by name. An owner
    /// with no allocations lists as empty.
    pub fn list_repositories(&self, owner: &str) -> ArborResult<Vec<RepoId>> {
        validate_component(owner, "owner")?;
        let owner_dir = self.root.join(REPOS_DIR).join(owner);
        if !owner_dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&owner_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            ids.push(RepoId::new(owner, &name)?);
        }
        ids.sort();
        Ok(ids)
    }

    /// Metadata for every repository owned by `owner`, sorted by name.
    ///
    /// An allocation left half-initialized by a crashed create is
    /// skipped rather than failing the whole listing.
    pub fn list_repository_metas(&self, owner: &str) -> ArborResult<Vec<RepoMeta>> {
        let mut metas = Vec::new();
        for id in self.list_repositories(owner)? {
            match self.repo_meta(&id) {
                Ok(meta) => metas.push(meta),
                Err(ArborError::StoreNotInitialized(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(metas)
    }

    /// Commit through the hub, resolving the author against the
    /// identity provider first.
    pub fn commit(
        &self,
        id: &RepoId,
        branch: &str,
        author: &str,
        message: &str,
        edits: &[FileEdit],
    ) -> ArborResult<CommitEntry> {
        self.require_user(author)?;
        self.open(id)?.commit(branch, author, message, edits)
    }

    /// Fork a repository into `new_owner`'s namespace under the same
    /// name.
    ///
    /// Copies every object reachable from every branch tip into the new
    /// store (same content, same addresses) and the ref table
    /// tip-for-tip. Records lineage in both directions. After this
    /// returns, the two repositories share no mutable state.
    pub fn fork(&self, source_id: &RepoId, new_owner: &str) -> ArborResult<Repository> {
        let source = self.open(source_id)?;
        self.require_user(new_owner)?;

        let fork_id = RepoId::new(new_owner, source_id.name())?;
        let fork_dir = self.repo_dir(&fork_id);
        self.claim_allocation(&fork_id, &fork_dir)?;

        let fork = Repository::at(fork_id.clone(), &fork_dir);

        // Each tip is read once; objects always land before a ref
        // moves, so every tip seen here has its full graph present.
        let mut copied = 0usize;
        for branch in source.branches()? {
            if let Some(tip) = source.branch_tip(&branch)? {
                copied += copy_commit_graph(source.objects(), fork.objects(), &tip)?;
                fork.refs().create(&branch, &tip)?;
            }
        }
        debug!(source = %source_id, fork = %fork_id, objects = copied, "fork graph copied");

        let source_dir = self.repo_dir(source_id);
        let source_meta = read_meta(&source_dir, source_id)?;
        let meta = RepoMeta {
            id: fork_id.clone(),
            visibility: source_meta.visibility,
            created_at: Utc::now(),
            parent: Some(source_id.clone()),
            forks: Vec::new(),
        };
        write_meta(&fork_dir, &meta)?;

        // Lineage on the source side, under its metadata lock: two
        // concurrent forks both get into the list.
        {
            let _lock = meta_lock(&source_dir)?;
            let mut source_meta = read_meta(&source_dir, source_id)?;
            source_meta.forks.push(fork_id.clone());
            write_meta(&source_dir, &source_meta)?;
        }

        info!(source = %source_id, fork = %fork_id, "repository forked");
        Ok(fork)
    }

    /// The hub's pull-request store.
    pub fn pulls(&self) -> PullRequestStore<'_> {
        PullRequestStore::new(self, self.root.join(PULLS_DIR))
    }

    fn repo_dir(&self, id: &RepoId) -> PathBuf {
        self.root.join(REPOS_DIR).join(id.owner()).join(id.name())
    }

    /// Create the allocation directory and its standard layout.
    fn claim_allocation(&self, id: &RepoId, dir: &Path) -> ArborResult<()> {
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::create_dir(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ArborError::NameConflict(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(dir.join(OBJECTS_DIR))?;
        fs::create_dir_all(dir.join(REFS_DIR))?;
        fs::create_dir_all(dir.join(LOCKS_DIR))?;
        Ok(())
    }

    pub(crate) fn require_user(&self, user_id: &str) -> ArborResult<()> {
        if self.identity.exists(user_id) {
            Ok(())
        } else {
            Err(ArborError::AuthorNotFound(user_id.to_string()))
        }
    }
}

fn meta_lock(dir: &Path) -> ArborResult<RepoLock> {
    let locks_dir = dir.join(LOCKS_DIR);
    fs::create_dir_all(&locks_dir)?;
    RepoLock::acquire(&locks_dir, META_LOCK, LOCK_TIMEOUT)
}

fn read_meta(dir: &Path, id: &RepoId) -> ArborResult<RepoMeta> {
    let path = dir.join(META_FILE);
    let data = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ArborError::StoreNotInitialized(id.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&data)?)
}

fn write_meta(dir: &Path, meta: &RepoMeta) -> ArborResult<()> {
    let json = serde_json::to_vec_pretty(meta)?;
    atomic_write(&dir.join(META_FILE), &json)?;
    Ok(())
}

/// Copy every object reachable from the commit at `tip` into `dest`,
/// skipping objects already present there. Returns the number written.
fn copy_commit_graph(src: &ObjectStore, dest: &ObjectStore, tip: &str) -> ArborResult<usize> {
    let mut copied = 0;
    let mut pending = vec![tip.to_string()];
    while let Some(address) = pending.pop() {
        // Commits are written after their trees, so a present commit
        // means its whole snapshot is present too.
        if dest.contains(&address) {
            continue;
        }
        let commit = src.get_commit(&address)?;
        copied += copy_tree(src, dest, &commit.tree)?;
        dest.put(&src.get(&address)?)?;
        copied += 1;
        if let Some(parent) = commit.parent {
            pending.push(parent);
        }
    }
    Ok(copied)
}

fn copy_tree(src: &ObjectStore, dest: &ObjectStore, address: &str) -> ArborResult<usize> {
    if dest.contains(address) {
        return Ok(0);
    }
    let tree = src.get_tree(address)?;
    let mut copied = 0;
    for entry in tree.entries.values() {
        match entry {
            TreeEntry::Blob(blob) => {
                if !dest.contains(blob) {
                    dest.put(&src.get(blob)?)?;
                    copied += 1;
                }
            }
            TreeEntry::Tree(sub) => {
                copied += copy_tree(src, dest, sub)?;
            }
        }
    }
    dest.put(&src.get(address)?)?;
    Ok(copied + 1)
}

fn validate_component(value: &str, what: &str) -> ArborResult<()> {
    if value.is_empty() || value.len() > 100 {
        return Err(ArborError::InvalidName(format!(
            "{what} must be 1-100 characters, got {}",
            value.len()
        )));
    }
    if value.starts_with('.') || value.starts_with('-') {
        return Err(ArborError::InvalidName(format!(
            "{what} may not start with '.' or '-': {value}"
        )));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '.'))
    {
        return Err(ArborError::InvalidName(format!(
            "{what} contains forbidden character {c:?}: {value}"
        )));
    }
    Ok(())
}
