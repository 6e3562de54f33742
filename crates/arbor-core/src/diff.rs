//! Diff computation between commits.
//!
//! Produces structured, line-level patches suitable for a review UI:
//! per-file change classification, hunks grouped with surrounding
//! context, and addition/deletion counters. All of it is read-only
//! over immutable objects, so diffs run lock-free and in parallel with
//! commits.

use serde::{Deserialize, Serialize};

use crate::error::ArborResult;
use crate::object::ObjectStore;
use crate::tree::{self, Tree, TreeEntry};

/// Unchanged lines carried around each hunk.
const CONTEXT_LINES: usize = 3;

/// How a file changed between the two sides of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

/// What kind of diff operation on a line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LineOp {
    /// Line exists only in the "after" version.
    Add,
    /// Line exists only in the "before" version.
    Remove,
    /// Line is identical in both versions.
    Context,
}

/// A single line within a diff hunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffLine {
    pub op: LineOp,
    pub content: String,
    /// 1-based line number in the old file (None for Add lines).
    pub old_lineno: Option<usize>,
    /// 1-based line number in the new file (None for Remove lines).
    pub new_lineno: Option<usize>,
}

/// A contiguous block of changes within a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffHunk {
    /// Starting line in the old file (1-based; 0 when the hunk has no
    /// old lines and sits before the first line, git-style).
    pub old_start: usize,
    /// Number of lines from the old file in this hunk.
    pub old_count: usize,
    /// Starting line in the new file (1-based; 0 as above).
    pub new_start: usize,
    /// Number of lines from the new file in this hunk.
    pub new_count: usize,
    /// The individual diff lines.
    pub lines: Vec<DiffLine>,
}

/// The diff result for a single file.
///
/// This field set seeds the platform's review UI and must stay stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    /// Full path of the file within the snapshot.
    pub path: String,
    /// What kind of change.
    pub change_type: ChangeType,
    /// Diff hunks. Empty for binary files, and for a change the line
    /// split cannot see (a trailing-newline-only edit changes the blob
    /// address but no line): the file still lists as modified, with
    /// zero hunks and zero counters.
    pub hunks: Vec<DiffHunk>,
    /// True if the file appears to be binary.
    pub is_binary: bool,
    /// Lines added count.
    pub additions: usize,
    /// Lines removed count.
    pub deletions: usize,
}

/// Returns true if the data appears to be binary (contains a null byte
/// in the first 8KB).
pub fn is_binary(data: &[u8]) -> bool {
    let check_len = data.len().min(8192);
    data[..check_len].contains(&0)
}

/// Compute the longest common subsequence table for two slices of lines.
fn lcs_table(old: &[&str], new: &[&str]) -> Vec<Vec<usize>> {
    let m = old.len();
    let n = new.len();
    let mut table = vec![vec![0usize; n + 1]; m + 1];

    for i in 1..=m {
        for j in 1..=n {
            if old[i - 1] == new[j - 1] {
                table[i][j] = table[i - 1][j - 1] + 1;
            } else {
                table[i][j] = table[i - 1][j].max(table[i][j - 1]);
            }
        }
    }

    table
}

/// Edit operation produced by LCS backtracking.
#[derive(Debug, PartialEq)]
enum EditOp {
    Equal(usize, usize), // old_idx, new_idx
    Insert(usize),       // new_idx
    Delete(usize),       // old_idx
}

/// Backtrack through the LCS table to produce a sequence of edit operations.
fn lcs_backtrack(table: &[Vec<usize>], old: &[&str], new: &[&str]) -> Vec<EditOp> {
    let mut ops = Vec::new();
    let mut i = old.len();
    let mut j = new.len();

    while i > 0 || j > 0 {
        if i > 0 && j > 0 && old[i - 1] == new[j - 1] {
            ops.push(EditOp::Equal(i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || table[i][j - 1] >= table[i - 1][j]) {
            ops.push(EditOp::Insert(j - 1));
            j -= 1;
        } else {
            ops.push(EditOp::Delete(i - 1));
            i -= 1;
        }
    }

    ops.reverse();
    ops
}

/// A diff line before hunk grouping: op, content, old/new line numbers.
type TaggedLine = (LineOp, String, Option<usize>, Option<usize>);

/// Compute diff hunks between two strings (treated as line sequences).
///
/// `context_lines` controls how many unchanged lines surround each hunk.
pub fn compute_line_diff(old: &str, new: &str, context_lines: usize) -> Vec<DiffHunk> {
    let old_lines: Vec<&str> = if old.is_empty() {
        Vec::new()
    } else {
        old.lines().collect()
    };
    let new_lines: Vec<&str> = if new.is_empty() {
        Vec::new()
    } else {
        new.lines().collect()
    };

    let table = lcs_table(&old_lines, &new_lines);
    let ops = lcs_backtrack(&table, &old_lines, &new_lines);

    // Convert edit ops to tagged lines with line numbers
    let mut tagged: Vec<TaggedLine> = Vec::new();
    for op in &ops {
        match op {
            EditOp::Equal(oi, ni) => {
                tagged.push((
                    LineOp::Context,
                    old_lines[*oi].to_string(),
                    Some(*oi + 1),
                    Some(*ni + 1),
                ));
            }
            EditOp::Delete(oi) => {
                tagged.push((
                    LineOp::Remove,
                    old_lines[*oi].to_string(),
                    Some(*oi + 1),
                    None,
                ));
            }
            EditOp::Insert(ni) => {
                tagged.push((LineOp::Add, new_lines[*ni].to_string(), None, Some(*ni + 1)));
            }
        }
    }

    group_into_hunks(&tagged, context_lines)
}

/// Group tagged diff lines into hunks, including context lines around changes.
fn group_into_hunks(tagged: &[TaggedLine], context_lines: usize) -> Vec<DiffHunk> {
    if tagged.is_empty() {
        return Vec::new();
    }

    // Find indices of changed lines
    let change_indices: Vec<usize> = tagged
        .iter()
        .enumerate()
        .filter(|(_, (op, ..))| *op != LineOp::Context)
        .map(|(i, _)| i)
        .collect();

    if change_indices.is_empty() {
        return Vec::new();
    }

    // Build ranges: each change gets context_lines before and after
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &ci in &change_indices {
        let start = ci.saturating_sub(context_lines);
        let end = (ci + context_lines + 1).min(tagged.len());
        if let Some(last) = ranges.last_mut() {
            if start <= last.1 {
                last.1 = end; // merge overlapping ranges
            } else {
                ranges.push((start, end));
            }
        } else {
            ranges.push((start, end));
        }
    }

    // Convert ranges to hunks
    let mut hunks = Vec::new();
    for (start, end) in ranges {
        let mut lines = Vec::new();
        let mut old_start = None;
        let mut new_start = None;
        let mut old_count = 0usize;
        let mut new_count = 0usize;

        for (op, content, old_ln, new_ln) in &tagged[start..end] {
            if old_start.is_none() {
                old_start = *old_ln;
            }
            if new_start.is_none() {
                new_start = *new_ln;
            }

            match op {
                LineOp::Context => {
                    old_count += 1;
                    new_count += 1;
                }
                LineOp::Remove => {
                    old_count += 1;
                }
                LineOp::Add => {
                    new_count += 1;
                }
            }

            lines.push(DiffLine {
                op: op.clone(),
                content: content.clone(),
                old_lineno: *old_ln,
                new_lineno: *new_ln,
            });
        }

        // A hunk with no lines on one side anchors to the nearest
        // preceding line on that side; 0 means "before the first line".
        let old_start = old_start.unwrap_or_else(|| anchor_before(tagged, start, |t| t.2));
        let new_start = new_start.unwrap_or_else(|| anchor_before(tagged, start, |t| t.3));

        hunks.push(DiffHunk {
            old_start,
            old_count,
            new_start,
            new_count,
            lines,
        });
    }

    hunks
}

/// The line number, on one side, of the last tagged line before `start`.
fn anchor_before<F>(tagged: &[TaggedLine], start: usize, side: F) -> usize
where
    F: Fn(&TaggedLine) -> Option<usize>,
{
    tagged[..start].iter().rev().find_map(side).unwrap_or(0)
}

/// Compute a FileDiff for a single file given old and new content bytes.
fn file_diff(path: &str, change_type: ChangeType, old_bytes: &[u8], new_bytes: &[u8]) -> FileDiff {
    if is_binary(old_bytes) || is_binary(new_bytes) {
        return FileDiff {
            path: path.to_string(),
            change_type,
            hunks: Vec::new(),
            is_binary: true,
            additions: 0,
            deletions: 0,
        };
    }

    let old_str = String::from_utf8_lossy(old_bytes);
    let new_str = String::from_utf8_lossy(new_bytes);
    let hunks = compute_line_diff(&old_str, &new_str, CONTEXT_LINES);

    let mut additions = 0;
    let mut deletions = 0;
    for hunk in &hunks {
        for line in &hunk.lines {
            match line.op {
                LineOp::Add => additions += 1,
                LineOp::Remove => deletions += 1,
                LineOp::Context => {}
            }
        }
    }

    FileDiff {
        path: path.to_string(),
        change_type,
        hunks,
        is_binary: false,
        additions,
        deletions,
    }
}

/// Compute the file diffs between two commits, ordered by path.
///
/// The two commits may live in different repositories (a fork and its
/// parent share no storage but do share addresses), so each side reads
/// from its own store. Fails with `CommitNotFound` if either address
/// does not resolve to a commit.
pub fn diff_commits(
    old_store: &ObjectStore,
    old_commit: &str,
    new_store: &ObjectStore,
    new_commit: &str,
) -> ArborResult<Vec<FileDiff>> {
    let old = old_store.get_commit(old_commit)?;
    let new = new_store.get_commit(new_commit)?;

    let mut files = Vec::new();
    diff_trees(
        old_store,
        Some(&old.tree),
        new_store,
        Some(&new.tree),
        "",
        &mut files,
    )?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Recursive tree-to-tree delta.
///
/// Equal addresses mean equal content wherever they are stored, so an
/// unchanged subtree is skipped without reading a single object.
fn diff_trees(
    old_store: &ObjectStore,
    old: Option<&str>,
    new_store: &ObjectStore,
    new: Option<&str>,
    prefix: &str,
    out: &mut Vec<FileDiff>,
) -> ArborResult<()> {
    if old == new {
        return Ok(());
    }

    let old_tree = match old {
        Some(address) => old_store.get_tree(address)?,
        None => Tree::default(),
    };
    let new_tree = match new {
        Some(address) => new_store.get_tree(address)?,
        None => Tree::default(),
    };

    let mut names: Vec<&String> = old_tree.entries.keys().collect();
    for name in new_tree.entries.keys() {
        if !old_tree.entries.contains_key(name) {
            names.push(name);
        }
    }
    names.sort();

    for name in names {
        let full = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };

        match (old_tree.entries.get(name), new_tree.entries.get(name)) {
            (Some(TreeEntry::Blob(a)), Some(TreeEntry::Blob(b))) => {
                if a != b {
                    let old_bytes = old_store.get(a)?;
                    let new_bytes = new_store.get(b)?;
                    out.push(file_diff(&full, ChangeType::Modified, &old_bytes, &new_bytes));
                }
            }
            (Some(TreeEntry::Tree(a)), Some(TreeEntry::Tree(b))) => {
                diff_trees(old_store, Some(a), new_store, Some(b), &full, out)?;
            }
            // A path that changed kind: the old side disappears, the
            // new side appears.
            (Some(TreeEntry::Blob(a)), Some(TreeEntry::Tree(b))) => {
                let old_bytes = old_store.get(a)?;
                out.push(file_diff(&full, ChangeType::Deleted, &old_bytes, &[]));
                diff_trees(old_store, None, new_store, Some(b), &full, out)?;
            }
            (Some(TreeEntry::Tree(a)), Some(TreeEntry::Blob(b))) => {
                diff_trees(old_store, Some(a), new_store, None, &full, out)?;
                let new_bytes = new_store.get(b)?;
                out.push(file_diff(&full, ChangeType::Added, &[], &new_bytes));
            }
            (Some(TreeEntry::Blob(a)), None) => {
                let old_bytes = old_store.get(a)?;
                out.push(file_diff(&full, ChangeType::Deleted, &old_bytes, &[]));
            }
            (Some(TreeEntry::Tree(a)), None) => {
                diff_trees(old_store, Some(a), new_store, None, &full, out)?;
            }
            (None, Some(TreeEntry::Blob(b))) => {
                let new_bytes = new_store.get(b)?;
                out.push(file_diff(&full, ChangeType::Added, &[], &new_bytes));
            }
            (None, Some(TreeEntry::Tree(b))) => {
                diff_trees(old_store, None, new_store, Some(b), &full, out)?;
            }
            (None, None) => {}
        }
    }

    Ok(())
}
