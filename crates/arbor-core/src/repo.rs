//! A single repository: an object store, a branch ref table, and the
//! commit engine that ties them together.
//!
//! `Repository` is a handle over an on-disk allocation owned by the
//! hub. It never outlives its directory and holds no open file
//! descriptors between operations, so handles are cheap to create and
//! safe to use from multiple threads (each gets its own).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::commit::{Commit, CommitEntry};
use crate::error::{ArborError, ArborResult};
use crate::hub::RepoId;
use crate::lock::RepoLock;
use crate::object::ObjectStore;
use crate::refs::{self, RefTable};
use crate::tree::{self, TreeEdit, TreeEntry};

pub(crate) const OBJECTS_DIR: &str = "objects";
pub(crate) const REFS_DIR: &str = "refs";
pub(crate) const LOCKS_DIR: &str = "locks";
pub(crate) const META_FILE: &str = "repo.json";

/// How long a writer waits for a contended lock before giving up.
pub(crate) const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// One path -> content change within a commit.
#[derive(Debug, Clone)]
pub struct FileEdit {
    /// Path within the snapshot, `/`-separated.
    pub path: String,
    /// New file content, or `None` to delete the path.
    pub content: Option<String>,
}

impl FileEdit {
    /// An edit that writes `content` at `path`.
    pub fn set(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
        }
    }

    /// An edit that removes the file at `path`.
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: None,
        }
    }
}

/// An open handle to one repository's storage.
pub struct Repository {
    id: RepoId,
    dir: PathBuf,
    objects: ObjectStore,
    refs: RefTable,
}

impl Repository {
    /// Open a handle over an existing allocation. The hub validates the
    /// allocation before handing out handles.
    pub(crate) fn at(id: RepoId, dir: &Path) -> Self {
        Self {
            objects: ObjectStore::new(&dir.join(OBJECTS_DIR)),
            refs: RefTable::new(&dir.join(REFS_DIR)),
            id,
            dir: dir.to_path_buf(),
        }
    }

    /// The repository's `owner/name` identifier.
    pub fn id(&self) -> &RepoId {
        &self.id
    }

    /// The repository's object store. Diffs and forks read through
    /// this; it is append-only, so shared read access is always safe.
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub(crate) fn refs(&self) -> &RefTable {
        &self.refs
    }

    /// Apply a batch of file edits as one new commit on `branch`,
    /// advancing the branch ref to it.
    ///
    /// The branch's previous tip (if any) becomes the parent. A batch
    /// with zero effective edits is permitted and still produces a new
    /// commit over the unchanged tree. The author id is recorded as
    /// given; identity checks belong to the hub boundary.
    ///
    /// Holds the per-branch lock for the whole operation, so two
    /// concurrent commits against the same branch serialize and one's
    /// parent is the other.
    pub fn commit(
        &self,
        branch: &str,
        author: &str,
        message: &str,
        edits: &[FileEdit],
    ) -> ArborResult<CommitEntry> {
        refs::validate_branch_name(branch)?;

        let _lock = self.branch_lock(branch)?;

        let tip = self.refs.read(branch)?;
        let base_tree = match &tip {
            Some(address) => Some(self.objects.get_commit(address)?.tree),
            None => None,
        };

        let mut tree_edits = Vec::with_capacity(edits.len());
        for edit in edits {
            let segments = validate_path(&edit.path)?;
            let blob = match &edit.content {
                Some(content) => Some(self.objects.put(content.as_bytes())?),
                None => None,
            };
            tree_edits.push(TreeEdit { segments, blob });
        }

        let root = tree::rebuild(&self.objects, base_tree.as_deref(), &tree_edits)?;
        let commit = Commit::new(tip.clone(), root, author.to_string(), message.to_string());
        let address = self.objects.put_commit(&commit)?;
        self.refs.advance(branch, tip.as_deref(), &address)?;

        info!(
            repo = %self.id,
            branch,
            commit = %address,
            edits = edits.len(),
            "commit created"
        );

        Ok(CommitEntry { address, commit })
    }

    /// Walk the parent chain from the branch tip, newest first, up to
    /// `limit` entries. A branch with no commits yet has empty history.
    pub fn log(&self, branch: &str, limit: usize) -> ArborResult<Vec<CommitEntry>> {
        let mut entries = Vec::new();
        let mut cursor = self.refs.read(branch)?;
        while let Some(address) = cursor {
            if entries.len() >= limit {
                break;
            }
            let commit = self.objects.get_commit(&address)?;
            cursor = commit.parent.clone();
            entries.push(CommitEntry { address, commit });
        }
        Ok(entries)
    }

    /// Read one file's content out of a commit's snapshot.
    pub fn read_file(&self, commit_address: &str, path: &str) -> ArborResult<Vec<u8>> {
        let segments = validate_path(path)?;
        let commit = self.objects.get_commit(commit_address)?;
        match tree::find(&self.objects, &commit.tree, &segments)? {
            Some(TreeEntry::Blob(address)) => self.objects.get(&address),
            _ => Err(ArborError::FileNotFound(path.to_string())),
        }
    }

    /// The full path -> blob-address listing of a commit's snapshot.
    pub fn list_files(&self, commit_address: &str) -> ArborResult<BTreeMap<String, String>> {
        let commit = self.objects.get_commit(commit_address)?;
        tree::flatten(&self.objects, &commit.tree)
    }

    /// The branch's current tip, or `None` if it has no commits yet.
    pub fn branch_tip(&self, branch: &str) -> ArborResult<Option<String>> {
        self.refs.read(branch)
    }

    /// All branch names with at least one commit, sorted.
    pub fn branches(&self) -> ArborResult<Vec<String>> {
        self.refs.list()
    }

    /// Create a new branch pointing at an existing commit.
    ///
    /// The commit must already be in this repository's store; there is
    /// no way to create a branch in an empty repository other than
    /// committing to it.
    ///
    /// Holds the same per-branch lock a commit holds, so a create
    /// racing a first commit to the same name serializes with it:
    /// whichever runs second observes the other's ref instead of
    /// overwriting it.
    pub fn create_branch(&self, name: &str, at_commit: &str) -> ArborResult<()> {
        refs::validate_branch_name(name)?;
        self.objects.get_commit(at_commit)?;

        let _lock = self.branch_lock(name)?;
        self.refs.create(name, at_commit)?;
        info!(repo = %self.id, branch = name, tip = at_commit, "branch created");
        Ok(())
    }

    fn branch_lock(&self, branch: &str) -> ArborResult<RepoLock> {
        let locks_dir = self.dir.join(LOCKS_DIR);
        fs::create_dir_all(&locks_dir)?;
        // Branch names are validated printable ASCII without path
        // separators, so they embed directly into the lock file name.
        RepoLock::acquire(&locks_dir, &format!("refs-{branch}.lock"), LOCK_TIMEOUT)
    }
}

/// Split and validate a snapshot path into its segments.
///
/// Paths are relative, `/`-separated, and may not contain traversal
/// segments, empty segments, backslashes, or NUL bytes.
pub(crate) fn validate_path(path: &str) -> ArborResult<Vec<String>> {
    if path.is_empty() {
        return Err(ArborError::InvalidPath("path is empty".to_string()));
    }
    if path.starts_with('/') {
        return Err(ArborError::InvalidPath(format!("absolute path: {path}")));
    }
    if path.contains('\\') {
        return Err(ArborError::InvalidPath(format!(
            "backslash in path: {path}"
        )));
    }
    if path.contains('\0') {
        return Err(ArborError::InvalidPath("NUL byte in path".to_string()));
    }

    let mut segments = Vec::new();
    for segment in path.split('/') {
        if segment.is_empty() {
            return Err(ArborError::InvalidPath(format!(
                "empty segment in path: {path}"
            )));
        }
        if segment == "." || segment == ".." {
            return Err(ArborError::InvalidPath(format!(
                "traversal segment in path: {path}"
            )));
        }
        segments.push(segment.to_string());
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::tempdir;

    fn test_repo(dir: &Path) -> Repository {
        let id: RepoId = "alice/project".parse().unwrap();
        fs::create_dir_all(dir.join(OBJECTS_DIR)).unwrap();
        fs::create_dir_all(dir.join(REFS_DIR)).unwrap();
        fs::create_dir_all(dir.join(LOCKS_DIR)).unwrap();
        Repository::at(id, dir)
    }

    #[test]
    fn test_commit_and_read_back() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());

        let entry = repo
            .commit(
                "main",
                "alice",
                "initial",
                &[FileEdit::set("README.md", "# hello\n")],
            )
            .unwrap();

        assert!(entry.commit.parent.is_none());
        assert_eq!(entry.commit.author, "alice");
        assert_eq!(entry.commit.message, "initial");

        let content = repo.read_file(&entry.address, "README.md").unwrap();
        assert_eq!(content, b"# hello\n");
    }

    #[test]
    fn test_commit_advances_tip_and_chains_parents() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());

        let first = repo
            .commit("main", "alice", "one", &[FileEdit::set("a.txt", "1\n")])
            .unwrap();
        let second = repo
            .commit("main", "alice", "two", &[FileEdit::set("a.txt", "2\n")])
            .unwrap();

        assert_eq!(
            second.commit.parent.as_deref(),
            Some(first.address.as_str())
        );
        assert_eq!(
            repo.branch_tip("main").unwrap().as_deref(),
            Some(second.address.as_str())
        );

        let history = repo.log("main", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].address, second.address);
        assert_eq!(history[1].address, first.address);
    }

    #[test]
    fn test_log_respects_limit() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());

        for i in 0..5 {
            repo.commit(
                "main",
                "alice",
                &format!("commit {i}"),
                &[FileEdit::set("f.txt", format!("{i}\n"))],
            )
            .unwrap();
        }

        let history = repo.log("main", 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].commit.message, "commit 4");
        assert_eq!(history[1].commit.message, "commit 3");
    }

    #[test]
    fn test_log_of_unborn_branch_is_empty() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());
        assert!(repo.log("main", 10).unwrap().is_empty());
        assert!(repo.branch_tip("main").unwrap().is_none());
    }

    #[test]
    fn test_empty_edit_batch_still_commits() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());

        let first = repo
            .commit("main", "alice", "content", &[FileEdit::set("a.txt", "x\n")])
            .unwrap();
        let noop = repo.commit("main", "alice", "nothing changed", &[]).unwrap();

        assert_eq!(noop.commit.parent.as_deref(), Some(first.address.as_str()));
        assert_eq!(noop.commit.tree, first.commit.tree);
        assert_ne!(noop.address, first.address);
    }

    #[test]
    fn test_delete_removes_file_and_prunes_directories() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());

        repo.commit(
            "main",
            "alice",
            "deep",
            &[
                FileEdit::set("src/nested/lib.rs", "mod x;\n"),
                FileEdit::set("README.md", "root\n"),
            ],
        )
        .unwrap();
        let after = repo
            .commit(
                "main",
                "alice",
                "remove deep file",
                &[FileEdit::delete("src/nested/lib.rs")],
            )
            .unwrap();

        let files = repo.list_files(&after.address).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("README.md"));

        // The emptied src/nested and src directories are gone entirely.
        let root = repo.objects().get_tree(&after.commit.tree).unwrap();
        assert!(!root.entries.contains_key("src"));
    }

    #[test]
    fn test_delete_of_missing_path_is_noop() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());

        let first = repo
            .commit("main", "alice", "base", &[FileEdit::set("a.txt", "x\n")])
            .unwrap();
        let second = repo
            .commit(
                "main",
                "alice",
                "remove nothing",
                &[FileEdit::delete("ghost.txt")],
            )
            .unwrap();

        assert_eq!(second.commit.tree, first.commit.tree);
    }

    #[test]
    fn test_unchanged_subtree_keeps_its_address() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());

        let first = repo
            .commit(
                "main",
                "alice",
                "two dirs",
                &[
                    FileEdit::set("static/style.css", "body {}\n"),
                    FileEdit::set("src/main.rs", "fn main() {}\n"),
                ],
            )
            .unwrap();
        let second = repo
            .commit(
                "main",
                "alice",
                "touch src only",
                &[FileEdit::set("src/main.rs", "fn main() { run() }\n")],
            )
            .unwrap();

        assert_ne!(first.commit.tree, second.commit.tree);

        let before = repo.objects().get_tree(&first.commit.tree).unwrap();
        let after = repo.objects().get_tree(&second.commit.tree).unwrap();
        assert_eq!(
            before.entries.get("static").unwrap().address(),
            after.entries.get("static").unwrap().address()
        );
        assert_ne!(
            before.entries.get("src").unwrap().address(),
            after.entries.get("src").unwrap().address()
        );
    }

    #[test]
    fn test_branch_isolation() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());

        let base = repo
            .commit("main", "alice", "base", &[FileEdit::set("a.txt", "1\n")])
            .unwrap();
        repo.create_branch("dev", &base.address).unwrap();

        repo.commit("dev", "alice", "on dev", &[FileEdit::set("a.txt", "2\n")])
            .unwrap();

        assert_eq!(
            repo.branch_tip("main").unwrap().as_deref(),
            Some(base.address.as_str())
        );
        assert_ne!(
            repo.branch_tip("dev").unwrap(),
            repo.branch_tip("main").unwrap()
        );
        assert_eq!(repo.branches().unwrap(), vec!["dev", "main"]);
    }

    #[test]
    fn test_create_branch_requires_existing_commit() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());

        let absent = crate::hash::hash_bytes(b"nowhere");
        let result = repo.create_branch("dev", &absent);
        assert!(matches!(result, Err(ArborError::CommitNotFound(_))));
    }

    #[test]
    fn test_create_branch_rejects_duplicate() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());

        let base = repo
            .commit("main", "alice", "base", &[FileEdit::set("a.txt", "1\n")])
            .unwrap();
        repo.create_branch("dev", &base.address).unwrap();
        let result = repo.create_branch("dev", &base.address);
        assert!(matches!(result, Err(ArborError::NameConflict(_))));
    }

    #[test]
    fn test_read_file_misses() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());

        let entry = repo
            .commit(
                "main",
                "alice",
                "base",
                &[FileEdit::set("dir/file.txt", "x\n")],
            )
            .unwrap();

        let missing = repo.read_file(&entry.address, "nope.txt");
        assert!(matches!(missing, Err(ArborError::FileNotFound(_))));

        // A directory path is not a file.
        let dir_path = repo.read_file(&entry.address, "dir");
        assert!(matches!(dir_path, Err(ArborError::FileNotFound(_))));
    }

    #[test]
    fn test_path_validation() {
        assert!(validate_path("a/b/c.txt").is_ok());
        assert!(matches!(
            validate_path(""),
            Err(ArborError::InvalidPath(_))
        ));
        assert!(matches!(
            validate_path("/etc/passwd"),
            Err(ArborError::InvalidPath(_))
        ));
        assert!(matches!(
            validate_path("a//b"),
            Err(ArborError::InvalidPath(_))
        ));
        assert!(matches!(
            validate_path("a/"),
            Err(ArborError::InvalidPath(_))
        ));
        assert!(matches!(
            validate_path("../up"),
            Err(ArborError::InvalidPath(_))
        ));
        assert!(matches!(
            validate_path("a/../b"),
            Err(ArborError::InvalidPath(_))
        ));
        assert!(matches!(
            validate_path("a/./b"),
            Err(ArborError::InvalidPath(_))
        ));
        assert!(matches!(
            validate_path("a\\b"),
            Err(ArborError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_commit_rejects_invalid_branch_name() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());

        let result = repo.commit("bad/name", "alice", "x", &[]);
        assert!(matches!(result, Err(ArborError::InvalidName(_))));
    }

    #[test]
    fn test_create_branch_waits_for_branch_lock() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());
        let base = repo
            .commit("main", "alice", "base", &[FileEdit::set("a.txt", "1\n")])
            .unwrap();

        // Hold the lock a commit to "dev" would hold.
        let held = RepoLock::acquire(
            &dir.path().join(LOCKS_DIR),
            "refs-dev.lock",
            Duration::from_secs(1),
        )
        .unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let done_flag = done.clone();
        let path = dir.path().to_path_buf();
        let address = base.address.clone();
        let handle = thread::spawn(move || {
            let repo = test_repo(&path);
            let result = repo.create_branch("dev", &address);
            done_flag.store(true, Ordering::SeqCst);
            result
        });

        // While the lock is held the create must not complete.
        thread::sleep(Duration::from_millis(100));
        assert!(!done.load(Ordering::SeqCst));

        drop(held);
        handle.join().unwrap().unwrap();
        assert_eq!(
            repo.branch_tip("dev").unwrap().as_deref(),
            Some(base.address.as_str())
        );
    }

    #[test]
    fn test_create_branch_racing_first_commit_keeps_the_commit() {
        let dir = tempdir().unwrap();
        let repo = test_repo(dir.path());
        let base = repo
            .commit("main", "alice", "base", &[FileEdit::set("a.txt", "1\n")])
            .unwrap();

        let path = dir.path().to_path_buf();
        let barrier = Arc::new(Barrier::new(2));

        let commit_path = path.clone();
        let commit_barrier = barrier.clone();
        let committer = thread::spawn(move || {
            let repo = test_repo(&commit_path);
            commit_barrier.wait();
            repo.commit(
                "dev",
                "alice",
                "first on dev",
                &[FileEdit::set("b.txt", "2\n")],
            )
            .unwrap()
        });

        let create_barrier = barrier.clone();
        let base_address = base.address.clone();
        let creator = thread::spawn(move || {
            let repo = test_repo(&path);
            create_barrier.wait();
            repo.create_branch("dev", &base_address)
        });

        let committed = committer.join().unwrap();
        let created = creator.join().unwrap();

        // Serialized either way, the commit ends up as the tip: if the
        // create won the race the commit chained onto it, and if the
        // commit won the create sees the branch already there.
        assert_eq!(
            repo.branch_tip("dev").unwrap().as_deref(),
            Some(committed.address.as_str())
        );
        match created {
            Ok(()) => assert_eq!(
                committed.commit.parent.as_deref(),
                Some(base.address.as_str())
            ),
            Err(e) => {
                assert!(matches!(e, ArborError::NameConflict(_)));
                assert!(committed.commit.parent.is_none());
            }
        }
    }

    #[test]
    fn test_concurrent_commits_serialize() {
        let dir = tempdir().unwrap();
        // Initialize the layout once before spawning.
        test_repo(dir.path());
        let path = dir.path().to_path_buf();
        let barrier = Arc::new(Barrier::new(2));

        let mut handles = Vec::new();
        for i in 0..2 {
            let barrier = barrier.clone();
            let path = path.clone();
            handles.push(thread::spawn(move || {
                let repo = test_repo(&path);
                barrier.wait();
                repo.commit(
                    "main",
                    "alice",
                    &format!("commit {i}"),
                    &[FileEdit::set(format!("f{i}.txt"), "x\n")],
                )
                .unwrap()
            }));
        }

        let entries: Vec<CommitEntry> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_ne!(entries[0].address, entries[1].address);
        let (first, second) = if entries[0].commit.parent.is_none() {
            (&entries[0], &entries[1])
        } else {
            (&entries[1], &entries[0])
        };
        assert!(first.commit.parent.is_none());
        assert_eq!(
            second.commit.parent.as_deref(),
            Some(first.address.as_str())
        );

        let repo = test_repo(&path);
        assert_eq!(
            repo.branch_tip("main").unwrap().as_deref(),
            Some(second.address.as_str())
        );
        // Both files made it into the final snapshot.
        let files = repo.list_files(&second.address).unwrap();
        assert_eq!(files.len(), 2);
    }
}
