//! Branch refs — the only mutable pointers in the model.
//!
//! Each branch is one small file under the repository's `refs/`
//! directory holding the address of its tip commit. Writes go through
//! [`crate::fsutil::atomic_write`], and advancement compare-and-swaps
//! on the expected previous tip so a concurrent commit can never be
//! silently overwritten, even if a caller bypasses the branch lock.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ArborError, ArborResult};
use crate::fsutil::{atomic_write, read_pointer};

/// The branch every repository starts with. It exists implicitly and
/// gains its first tip on the first commit.
pub const DEFAULT_BRANCH: &str = "main";

/// The ref table of a single repository.
pub struct RefTable {
    /// Root path: `<repo>/refs/`.
    refs_dir: PathBuf,
}

impl RefTable {
    /// Create a RefTable over the given directory.
    pub fn new(refs_dir: &Path) -> Self {
        Self {
            refs_dir: refs_dir.to_path_buf(),
        }
    }

    /// Read a branch's tip commit address. A branch with no commits yet
    /// has no ref file and reads as `None`.
    pub fn read(&self, branch: &str) -> ArborResult<Option<String>> {
        validate_branch_name(branch)?;
        read_pointer(&self.refs_dir.join(branch))
    }

    /// Advance a branch to `new_tip`, compare-and-swapping on the
    /// expected previous tip.
    ///
    /// The caller is expected to hold the branch lock; the CAS is the
    /// backstop that turns a lost-update race into a visible
    /// `StaleBranchTip` error instead of dropped history.
    pub fn advance(
        &self,
        branch: &str,
        expected: Option<&str>,
        new_tip: &str,
    ) -> ArborResult<()> {
        validate_branch_name(branch)?;
        let current = read_pointer(&self.refs_dir.join(branch))?;
        if current.as_deref() != expected {
            return Err(ArborError::StaleBranchTip {
                branch: branch.to_string(),
                expected: expected.unwrap_or("(none)").to_string(),
                found: current.unwrap_or_else(|| "(none)".to_string()),
            });
        }
        atomic_write(&self.refs_dir.join(branch), new_tip.as_bytes())?;
        debug!(branch, tip = new_tip, "branch ref advanced");
        Ok(())
    }

    /// Create a new branch pointing at `tip`. Fails with `NameConflict`
    /// if the branch already exists.
    ///
    /// Like [`RefTable::advance`], the caller is expected to hold the
    /// branch lock; the existence check and the write are not one
    /// atomic step. (A repository under construction, as in a fork's
    /// ref copy, has no other writers and needs no lock.)
    pub fn create(&self, branch: &str, tip: &str) -> ArborResult<()> {
        validate_branch_name(branch)?;
        let path = self.refs_dir.join(branch);
        if path.exists() {
            return Err(ArborError::NameConflict(branch.to_string()));
        }
        atomic_write(&path, tip.as_bytes())?;
        debug!(branch, tip, "branch created");
        Ok(())
    }

    /// List all branches that have a tip, sorted by name.
    pub fn list(&self) -> ArborResult<Vec<String>> {
        if !self.refs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut branches = Vec::new();
        for entry in fs::read_dir(&self.refs_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            // A crashed atomic_write can leave a *.tmp behind; never a ref.
            if name.ends_with(".tmp") {
                continue;
            }
            branches.push(name);
        }
        branches.sort();
        Ok(branches)
    }
}

/// Validate a branch name: printable ASCII, no path separators, no
/// leading dash or dot, and none of the suffixes the storage layer
/// reserves for itself.
pub(crate) fn validate_branch_name(name: &str) -> ArborResult<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(ArborError::InvalidName(format!(
            "branch name must be 1-255 chars, got {}",
            name.len()
        )));
    }
    if name.starts_with('-') || name.starts_with('.') {
        return Err(ArborError::InvalidName(format!(
            "branch name may not start with '-' or '.': {name}"
        )));
    }
    if name.contains("..") || name.ends_with(".lock") || name.ends_with(".tmp") {
        return Err(ArborError::InvalidName(format!(
            "branch name contains a forbidden pattern: {name}"
        )));
    }
    if name
        .bytes()
        .any(|b| !(0x21..=0x7e).contains(&b) || matches!(b, b'/' | b'\\' | b'~' | b'^' | b':'))
    {
        return Err(ArborError::InvalidName(format!(
            "branch name contains forbidden characters: {name}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn table(dir: &Path) -> RefTable {
        fs::create_dir_all(dir.join("refs")).unwrap();
        RefTable::new(&dir.join("refs"))
    }

    #[test]
    fn test_read_unborn_branch() {
        let dir = tempdir().unwrap();
        let refs = table(dir.path());
        assert_eq!(refs.read(DEFAULT_BRANCH).unwrap(), None);
    }

    #[test]
    fn test_advance_from_nothing_then_read() {
        let dir = tempdir().unwrap();
        let refs = table(dir.path());

        refs.advance("main", None, "aaa111").unwrap();
        assert_eq!(refs.read("main").unwrap(), Some("aaa111".to_string()));

        refs.advance("main", Some("aaa111"), "bbb222").unwrap();
        assert_eq!(refs.read("main").unwrap(), Some("bbb222".to_string()));
    }

    #[test]
    fn test_advance_with_stale_expectation_fails() {
        let dir = tempdir().unwrap();
        let refs = table(dir.path());

        refs.advance("main", None, "aaa111").unwrap();

        // A second writer that still believes the branch is unborn.
        let result = refs.advance("main", None, "ccc333");
        assert!(matches!(result, Err(ArborError::StaleBranchTip { .. })));

        // And one that believes an outdated tip.
        refs.advance("main", Some("aaa111"), "bbb222").unwrap();
        let result = refs.advance("main", Some("aaa111"), "ddd444");
        assert!(matches!(result, Err(ArborError::StaleBranchTip { .. })));

        assert_eq!(refs.read("main").unwrap(), Some("bbb222".to_string()));
    }

    #[test]
    fn test_create_existing_branch_conflicts() {
        let dir = tempdir().unwrap();
        let refs = table(dir.path());

        refs.create("dev", "aaa111").unwrap();
        let result = refs.create("dev", "bbb222");
        assert!(matches!(result, Err(ArborError::NameConflict(_))));
    }

    #[test]
    fn test_list_is_sorted_and_skips_temp_files() {
        let dir = tempdir().unwrap();
        let refs = table(dir.path());

        refs.create("zeta", "aaa").unwrap();
        refs.create("alpha", "bbb").unwrap();
        fs::write(dir.path().join("refs/crashed.tmp"), "junk").unwrap();

        assert_eq!(refs.list().unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_branch_name_validation() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("feature/x").is_err());
        assert!(validate_branch_name("v1.2").is_ok());
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("-rf").is_err());
        assert!(validate_branch_name(".hidden").is_err());
        assert!(validate_branch_name("a..b").is_err());
        assert!(validate_branch_name("dev.lock").is_err());
        assert!(validate_branch_name("dev.tmp").is_err());
        assert!(validate_branch_name("has space").is_err());
        assert!(validate_branch_name("tab\tname").is_err());
    }
}
