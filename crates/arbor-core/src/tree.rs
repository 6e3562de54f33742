//! Trees — immutable, content-addressed directory snapshots.
//!
//! A tree maps path segments to blob references (files) or subtree
//! references (directories). Trees are never mutated in place: applying
//! an edit rebuilds the spine of tree nodes from the changed leaf up to
//! a new root, while every untouched subtree is carried over by
//! address. The cost of a commit is therefore bounded by the number of
//! changed path segments, not the size of the snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ArborError, ArborResult};
use crate::object::ObjectStore;

/// One entry in a tree: a file or a subdirectory, by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "address", rename_all = "lowercase")]
pub enum TreeEntry {
    /// A file; the address names a blob.
    Blob(String),
    /// A subdirectory; the address names another tree.
    Tree(String),
}

impl TreeEntry {
    /// The address of the referenced object.
    pub fn address(&self) -> &str {
        match self {
            TreeEntry::Blob(a) | TreeEntry::Tree(a) => a,
        }
    }
}

/// An ordered mapping from path segment to entry.
///
/// The `BTreeMap` keeps entries sorted by name, so serializing a tree
/// is deterministic: equal trees get equal bytes and equal addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tree {
    /// Map of path segment -> entry.
    pub entries: BTreeMap<String, TreeEntry>,
}

/// A single leaf change to apply during a rebuild: a blob address to
/// place at the path, or `None` to remove the file there.
#[derive(Debug, Clone)]
pub(crate) struct TreeEdit {
    /// The path split into segments, already validated.
    pub segments: Vec<String>,
    /// New blob address, or `None` for deletion.
    pub blob: Option<String>,
}

/// Rebuild a tree from `base`, applying `edits`, and return the new
/// root address.
///
/// `base` is the current root tree address, or `None` for a branch with
/// no commits yet. With zero edits this reproduces the base address
/// exactly (content addressing makes the rewrite a no-op).
pub(crate) fn rebuild(
    store: &ObjectStore,
    base: Option<&str>,
    edits: &[TreeEdit],
) -> ArborResult<String> {
    let refs: Vec<&TreeEdit> = edits.iter().collect();
    match rebuild_dir(store, base, &refs, 0, "")? {
        Some(address) => Ok(address),
        // Everything was deleted (or there was nothing): the root is
        // the empty tree, which still gets a real address.
        None => store.put_tree(&Tree::default()),
    }
}

/// Rebuild one directory level. Returns the new tree address, or `None`
/// if the directory ended up empty and should be pruned from its parent.
fn rebuild_dir(
    store: &ObjectStore,
    base: Option<&str>,
    edits: &[&TreeEdit],
    depth: usize,
    prefix: &str,
) -> ArborResult<Option<String>> {
    let mut tree = match base {
        Some(address) => store.get_tree(address)?,
        None => Tree::default(),
    };

    // Group edits by the segment they touch at this depth, preserving
    // arrival order within each group (later edits win).
    let mut groups: BTreeMap<&str, Vec<&TreeEdit>> = BTreeMap::new();
    for edit in edits {
        groups.entry(edit.segments[depth].as_str()).or_default().push(edit);
    }

    for (name, group) in groups {
        let full = join_path(prefix, name);
        let leaf: Vec<&&TreeEdit> = group.iter().filter(|e| e.segments.len() == depth + 1).collect();
        let deep: Vec<&TreeEdit> = group
            .iter()
            .filter(|e| e.segments.len() > depth + 1)
            .copied()
            .collect();

        // A leaf write and deeper edits cannot both land on one name.
        // Leaf deletes are fine: they apply first, so a batch may
        // replace a file with a directory (delete, then write under it).
        if leaf.iter().any(|e| e.blob.is_some()) && !deep.is_empty() {
            return Err(ArborError::InvalidPath(format!(
                "{full}: edited as both a file and a directory"
            )));
        }

        for edit in leaf {
            match &edit.blob {
                Some(address) => {
                    if matches!(tree.entries.get(name), Some(TreeEntry::Tree(_))) {
                        return Err(ArborError::InvalidPath(format!("{full}: is a directory")));
                    }
                    tree.entries
                        .insert(name.to_string(), TreeEntry::Blob(address.clone()));
                }
                None => match tree.entries.get(name) {
                    Some(TreeEntry::Tree(_)) => {
                        return Err(ArborError::InvalidPath(format!("{full}: is a directory")));
                    }
                    // Deleting a path that is not there is a no-op; the
                    // commit may still end up with zero effective edits.
                    Some(TreeEntry::Blob(_)) | None => {
                        tree.entries.remove(name);
                    }
                },
            }
        }

        if !deep.is_empty() {
            let child_base = match tree.entries.get(name) {
                Some(TreeEntry::Tree(address)) => Some(address.clone()),
                Some(TreeEntry::Blob(_)) => {
                    return Err(ArborError::InvalidPath(format!("{full}: not a directory")));
                }
                None => None,
            };
            match rebuild_dir(store, child_base.as_deref(), &deep, depth + 1, &full)? {
                Some(address) => {
                    tree.entries.insert(name.to_string(), TreeEntry::Tree(address));
                }
                // The subtree emptied out: prune it from this level.
                None => {
                    tree.entries.remove(name);
                }
            }
        }
    }

    if tree.entries.is_empty() {
        return Ok(None);
    }
    store.put_tree(&tree).map(Some)
}

/// Flatten a tree into a full-path -> blob-address listing.
pub(crate) fn flatten(store: &ObjectStore, address: &str) -> ArborResult<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    flatten_into(store, address, "", &mut files)?;
    Ok(files)
}

fn flatten_into(
    store: &ObjectStore,
    address: &str,
    prefix: &str,
    out: &mut BTreeMap<String, String>,
) -> ArborResult<()> {
    let tree = store.get_tree(address)?;
    for (name, entry) in &tree.entries {
        let full = join_path(prefix, name);
        match entry {
            TreeEntry::Blob(blob) => {
                out.insert(full, blob.clone());
            }
            TreeEntry::Tree(subtree) => flatten_into(store, subtree, &full, out)?,
        }
    }
    Ok(())
}

/// Walk a tree down the given path segments.
pub(crate) fn find(
    store: &ObjectStore,
    root: &str,
    segments: &[String],
) -> ArborResult<Option<TreeEntry>> {
    let mut tree = store.get_tree(root)?;
    for (i, segment) in segments.iter().enumerate() {
        match tree.entries.get(segment) {
            Some(entry) if i + 1 == segments.len() => return Ok(Some(entry.clone())),
            Some(TreeEntry::Tree(address)) => tree = store.get_tree(address)?,
            Some(TreeEntry::Blob(_)) | None => return Ok(None),
        }
    }
    Ok(None)
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn edit(path: &str, blob: Option<String>) -> TreeEdit {
        TreeEdit {
            segments: path.split('/').map(String::from).collect(),
            blob,
        }
    }

    fn put(store: &ObjectStore, content: &str) -> String {
        store.put(content.as_bytes()).unwrap()
    }

    #[test]
    fn test_rebuild_from_nothing() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let blob = put(&store, "hello");
        let root = rebuild(&store, None, &[edit("a.txt", Some(blob.clone()))]).unwrap();

        let files = flatten(&store, &root).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files.get("a.txt"), Some(&blob));
    }

    #[test]
    fn test_rebuild_creates_intermediate_dirs() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let blob = put(&store, "deep");
        let root = rebuild(&store, None, &[edit("src/core/lib.rs", Some(blob.clone()))]).unwrap();

        let files = flatten(&store, &root).unwrap();
        assert_eq!(files.get("src/core/lib.rs"), Some(&blob));

        let top = store.get_tree(&root).unwrap();
        assert!(matches!(top.entries.get("src"), Some(TreeEntry::Tree(_))));
    }

    #[test]
    fn test_untouched_subtree_keeps_its_address() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let b1 = put(&store, "one");
        let b2 = put(&store, "two");
        let root = rebuild(
            &store,
            None,
            &[edit("left/a.txt", Some(b1)), edit("right/b.txt", Some(b2))],
        )
        .unwrap();
        let before = store.get_tree(&root).unwrap();

        let b3 = put(&store, "changed");
        let root2 = rebuild(&store, Some(&root), &[edit("left/a.txt", Some(b3))]).unwrap();
        let after = store.get_tree(&root2).unwrap();

        assert_ne!(root, root2);
        assert_ne!(before.entries.get("left"), after.entries.get("left"));
        // The right/ subtree was not rewritten, only referenced.
        assert_eq!(before.entries.get("right"), after.entries.get("right"));
    }

    #[test]
    fn test_delete_prunes_empty_dirs() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let blob = put(&store, "x");
        let root = rebuild(
            &store,
            None,
            &[edit("keep.txt", Some(blob.clone())), edit("sub/only.txt", Some(blob))],
        )
        .unwrap();

        let root2 = rebuild(&store, Some(&root), &[edit("sub/only.txt", None)]).unwrap();
        let top = store.get_tree(&root2).unwrap();
        assert!(top.entries.contains_key("keep.txt"));
        assert!(!top.entries.contains_key("sub"));
    }

    #[test]
    fn test_delete_everything_yields_empty_root() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let blob = put(&store, "x");
        let root = rebuild(&store, None, &[edit("a.txt", Some(blob))]).unwrap();
        let root2 = rebuild(&store, Some(&root), &[edit("a.txt", None)]).unwrap();

        assert_eq!(store.get_tree(&root2).unwrap(), Tree::default());
    }

    #[test]
    fn test_delete_missing_path_is_noop() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let blob = put(&store, "x");
        let root = rebuild(&store, None, &[edit("a.txt", Some(blob))]).unwrap();
        let root2 = rebuild(&store, Some(&root), &[edit("ghost.txt", None)]).unwrap();
        assert_eq!(root, root2);
    }

    #[test]
    fn test_no_edits_reproduces_base_address() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let blob = put(&store, "x");
        let root = rebuild(&store, None, &[edit("a.txt", Some(blob))]).unwrap();
        let root2 = rebuild(&store, Some(&root), &[]).unwrap();
        assert_eq!(root, root2);
    }

    #[test]
    fn test_file_directory_conflicts_rejected() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let blob = put(&store, "x");
        let root = rebuild(&store, None, &[edit("a", Some(blob.clone()))]).unwrap();

        // Walking through an existing file.
        let through = rebuild(&store, Some(&root), &[edit("a/b.txt", Some(blob.clone()))]);
        assert!(matches!(through, Err(ArborError::InvalidPath(_))));

        // Writing a blob over an existing directory.
        let root = rebuild(&store, None, &[edit("d/inner.txt", Some(blob.clone()))]).unwrap();
        let over = rebuild(&store, Some(&root), &[edit("d", Some(blob.clone()))]);
        assert!(matches!(over, Err(ArborError::InvalidPath(_))));

        // Both sides of the conflict inside a single batch.
        let batch = rebuild(
            &store,
            None,
            &[edit("x", Some(blob.clone())), edit("x/y.txt", Some(blob))],
        );
        assert!(matches!(batch, Err(ArborError::InvalidPath(_))));
    }

    #[test]
    fn test_delete_then_write_under_replaces_file_with_dir() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let blob = put(&store, "was a file");
        let root = rebuild(&store, None, &[edit("thing", Some(blob))]).unwrap();

        let inner = put(&store, "now a dir");
        let root2 = rebuild(
            &store,
            Some(&root),
            &[edit("thing", None), edit("thing/part.txt", Some(inner.clone()))],
        )
        .unwrap();

        let files = flatten(&store, &root2).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files.get("thing/part.txt"), Some(&inner));
    }

    #[test]
    fn test_later_edit_wins_within_batch() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let first = put(&store, "first");
        let second = put(&store, "second");
        let root = rebuild(
            &store,
            None,
            &[edit("a.txt", Some(first)), edit("a.txt", Some(second.clone()))],
        )
        .unwrap();

        let files = flatten(&store, &root).unwrap();
        assert_eq!(files.get("a.txt"), Some(&second));
    }

    #[test]
    fn test_find_walks_nested_paths() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::new(dir.path());

        let blob = put(&store, "content");
        let root = rebuild(&store, None, &[edit("src/main.rs", Some(blob.clone()))]).unwrap();

        let segments: Vec<String> = vec!["src".into(), "main.rs".into()];
        let entry = find(&store, &root, &segments).unwrap();
        assert_eq!(entry, Some(TreeEntry::Blob(blob)));

        let missing: Vec<String> = vec!["src".into(), "absent.rs".into()];
        assert_eq!(find(&store, &root, &missing).unwrap(), None);
    }
}
