//! Content-addressable object store.
//!
//! Every blob, tree, and commit in a repository lives here, stored
//! under `objects/` with a 2-character prefix directory scheme (like
//! git). An object's address is the SHA-256 of its bytes, so the store
//! is append-only and idempotent: identical content is written once
//! and shared by every commit, branch, and fork that references it.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::commit::Commit;
use crate::error::{ArborError, ArborResult};
use crate::fsutil::atomic_write;
use crate::hash::{hash_bytes, is_address};
use crate::tree::Tree;

/// The object store manages content-addressable storage on disk.
pub struct ObjectStore {
    /// Root path: `<repo>/objects/`.
    root: PathBuf,
}

impl ObjectStore {
    /// Create a new ObjectStore rooted at the given path.
    pub fn new(objects_dir: &Path) -> Self {
        Self {
            root: objects_dir.to_path_buf(),
        }
    }

    /// Store bytes and return their content address.
    ///
    /// If the object already exists (same content), this is a no-op
    /// beyond computing the address. Objects are never mutated or
    /// deleted once written. The write goes through a temp file and
    /// rename, so an interrupted put can leave a stale `*.tmp` behind
    /// but never a partial object under its final address.
    pub fn put(&self, data: &[u8]) -> ArborResult<String> {
        let address = hash_bytes(data);
        let path = self.object_path(&address);

        if path.exists() {
            return Ok(address);
        }

        // Create the 2-char prefix directory
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        atomic_write(&path, data)?;
        Ok(address)
    }

    /// Retrieve an object by its address.
    ///
    /// The bytes read back are re-hashed; a mismatch means the storage
    /// medium corrupted the object and surfaces as an integrity error
    /// rather than silently handing out wrong content.
    pub fn get(&self, address: &str) -> ArborResult<Vec<u8>> {
        if !is_address(address) {
            return Err(ArborError::InvalidAddress(address.to_string()));
        }
        let path = self.object_path(address);
        if !path.exists() {
            return Err(ArborError::ObjectNotFound(address.to_string()));
        }
        let data = fs::read(&path)?;

        let actual = hash_bytes(&data);
        if actual != address {
            warn!(address, actual, "stored object fails hash verification");
            return Err(ArborError::Corrupt {
                address: address.to_string(),
                detail: format!("content hashes to {actual}"),
            });
        }
        Ok(data)
    }

    /// Check if an object exists, without reading it.
    pub fn contains(&self, address: &str) -> bool {
        is_address(address) && self.object_path(address).exists()
    }

    /// Store a tree as canonical JSON and return its address.
    ///
    /// `Tree` serializes its entries through a `BTreeMap`, so equal
    /// trees always produce identical bytes and identical addresses.
    pub fn put_tree(&self, tree: &Tree) -> ArborResult<String> {
        let json = serde_json::to_string(tree)?;
        self.put(json.as_bytes())
    }

    /// Load a tree by its address.
    pub fn get_tree(&self, address: &str) -> ArborResult<Tree> {
        let data = self.get(address)?;
        serde_json::from_slice(&data).map_err(|e| ArborError::Corrupt {
            address: address.to_string(),
            detail: format!("not a tree: {e}"),
        })
    }

    /// Store a commit as canonical JSON and return its address.
    pub fn put_commit(&self, commit: &Commit) -> ArborResult<String> {
        let json = serde_json::to_string(commit)?;
        self.put(json.as_bytes())
    }

    /// Load a commit by its address.
    ///
    /// A missing object surfaces as `CommitNotFound`: every caller here
    /// is looking up a commit by an address it believes names one.
    pub fn get_commit(&self, address: &str) -> ArborResult<Commit> {
        let data = match self.get(address) {
            Ok(data) => data,
            Err(ArborError::ObjectNotFound(a)) | Err(ArborError::InvalidAddress(a)) => {
                return Err(ArborError::CommitNotFound(a));
            }
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&data).map_err(|e| ArborError::Corrupt {
            address: address.to_string(),
            detail: format!("not a commit: {e}"),
        })
    }

    /// Get the filesystem path for an object address.
    ///
    /// Uses 2-char prefix directories: address `abcdef...` -> `ab/cdef...`
    fn object_path(&self, address: &str) -> PathBuf {
        let (prefix, rest) = address.split_at(2);
        self.root.join(prefix).join(rest)
    }
}
