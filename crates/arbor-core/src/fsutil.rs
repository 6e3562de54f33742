//! Filesystem utilities for crash-safe writes.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::ArborResult;

/// Write data to a file atomically using temp-file-then-rename.
///
/// On POSIX, `rename()` within the same filesystem is atomic: either the
/// old file or the new file is visible, never a partial write. We fsync
/// the temp file before renaming so the data is durable on disk.
///
/// The temp name is the full file name plus `.tmp` (appended, not
/// substituted) so `v1.2` and `v1.3` never collide on `v1.tmp`.
pub fn atomic_write(path: &Path, data: &[u8]) -> ArborResult<()> {
    let mut tmp_name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("unnamed"));
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_data()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a small pointer file, treating a missing file or blank content
/// as "no value".
pub fn read_pointer(path: &Path) -> ArborResult<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pointer");
        atomic_write(&path, b"abc123").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "abc123");
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pointer");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn test_tmp_names_keep_dotted_names_apart() {
        let dir = tempdir().unwrap();
        atomic_write(&dir.path().join("v1.2"), b"two").unwrap();
        atomic_write(&dir.path().join("v1.3"), b"three").unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("v1.2")).unwrap(), "two");
        assert_eq!(fs::read_to_string(dir.path().join("v1.3")).unwrap(), "three");
    }

    #[test]
    fn test_read_pointer_missing_and_blank() {
        let dir = tempdir().unwrap();
        assert_eq!(read_pointer(&dir.path().join("absent")).unwrap(), None);

        let blank = dir.path().join("blank");
        fs::write(&blank, "  \n").unwrap();
        assert_eq!(read_pointer(&blank).unwrap(), None);

        let set = dir.path().join("set");
        fs::write(&set, "deadbeef\n").unwrap();
        assert_eq!(read_pointer(&set).unwrap(), Some("deadbeef".to_string()));
    }
}
