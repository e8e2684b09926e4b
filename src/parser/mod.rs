//! Step 1: Parse unified diff text into per-file coordinate tables.
//!
//! The reviewer prompt, the diff itself and the platform all number lines
//! differently. This module builds the single source of truth for the
//! translation: for every physical line the diff renders we record where
//! it lives in the old and/or new file, keyed by file path.
//!
//! Robustness rules:
//! - Works on multi-file raw diffs (`--- a/x` / `+++ b/x` boundaries).
//! - Ignores `\ No newline at end of file` marker lines.
//! - Malformed hunk headers leave the counters untouched (degrade, don't abort).
//! - Binary patches (`GIT binary patch`, `Binary files ... differ`) yield
//!   an empty table for that file.
//!
//! Parsing never fails; a file the diff does not cover is simply absent
//! from the returned map and surfaces downstream as an unresolved warning.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

lazy_static! {
    static ref HUNK_RE: Regex =
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap();
}

/// Role of one rendered diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Add,
    Remove,
    Context,
}

/// One row per physical line emitted by the diff renderer for one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffLineEntry {
    /// 1-based ordinal within the full rendered diff text (not reset per
    /// file). Prompt text shown to the reviewer numbers lines this way.
    pub rendered_line: u32,
    /// The line's true number: new-file number for additions and context,
    /// old-file number for removals.
    pub resolved_line: u32,
    /// Old-file coordinate, when the line exists on the old side.
    pub old_line: Option<u32>,
    /// New-file coordinate, when the line exists on the new side.
    pub new_line: Option<u32>,
    pub kind: ChangeKind,
}

impl DiffLineEntry {
    /// True for `+`/`-` lines, false for context.
    pub fn is_change(&self) -> bool {
        matches!(self.kind, ChangeKind::Add | ChangeKind::Remove)
    }
}

/// Ordered coordinate entries for a single file. Built once per diff and
/// never mutated afterward, so concurrent readers need no locking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCoordinateTable {
    pub path: String,
    pub entries: Vec<DiffLineEntry>,
}

impl FileCoordinateTable {
    /// Find the first change entry resolved at `line` (document order).
    pub fn change_at(&self, line: u32) -> Option<&DiffLineEntry> {
        self.entries
            .iter()
            .find(|e| e.is_change() && e.resolved_line == line)
    }

    /// Find the first context entry resolved at `line`.
    pub fn context_at(&self, line: u32) -> Option<&DiffLineEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == ChangeKind::Context && e.resolved_line == line)
    }

    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.is_change())
    }

    /// Nearest change entry by rendered-line distance; ties prefer the
    /// earliest-occurring entry.
    pub fn nearest_change_by_rendered(&self, rendered: u32) -> Option<&DiffLineEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_change())
            .min_by_key(|e| (e.rendered_line.abs_diff(rendered), e.rendered_line))
    }

    /// Nearest change entry by resolved-line distance, for queries that
    /// match no rendered entry at all; same tie-break.
    pub fn nearest_change_by_resolved(&self, line: u32) -> Option<&DiffLineEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_change())
            .min_by_key(|e| (e.resolved_line.abs_diff(line), e.rendered_line))
    }

    /// Old-file number of the line that occupies `new` on the new side
    /// (context lines only; added lines have no old coordinate).
    pub fn old_for_new(&self, new: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.new_line == Some(new))
            .and_then(|e| e.old_line)
    }

    /// New-file number of the line that occupies `old` on the old side.
    pub fn new_for_old(&self, old: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.old_line == Some(old))
            .and_then(|e| e.new_line)
    }

    /// Old-file line immediately preceding the addition at new-file `new`.
    pub fn old_before_addition(&self, new: u32) -> Option<u32> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.kind == ChangeKind::Add && e.new_line == Some(new))?;
        self.entries[..idx]
            .iter()
            .rev()
            .find_map(|e| e.old_line)
    }

    /// New-file line immediately following the removal at old-file `old`.
    pub fn new_after_removal(&self, old: u32) -> Option<u32> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.kind == ChangeKind::Remove && e.old_line == Some(old))?;
        self.entries[idx + 1..].iter().find_map(|e| e.new_line)
    }
}

/// Simple heuristic to detect binary patches or messages in unified diff.
pub fn looks_like_binary_patch(s: &str) -> bool {
    s.contains("GIT binary patch")
        || s.starts_with("Binary files ")
        || (s.starts_with("Files ") && s.contains(" differ"))
}

/// Parses a (possibly multi-file) unified diff into coordinate tables
/// keyed by new-side path, falling back to the old-side path for
/// deletions. Never fails; unrecognized lines are skipped.
pub fn parse_diff_tables(diff: &str) -> HashMap<String, FileCoordinateTable> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut tables: HashMap<String, FileCoordinateTable> = HashMap::new();

    let mut current: Option<OpenFile> = None;
    let mut old_line = 0u32;
    let mut new_line = 0u32;
    let mut in_hunk = false;

    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i];
        let rendered = (i + 1) as u32;

        // File boundary: `--- ` immediately followed by `+++ `.
        if line.starts_with("--- ")
            && lines.get(i + 1).is_some_and(|n| n.starts_with("+++ "))
        {
            seal(&mut tables, current.take());
            let old_path = header_path(&line[4..]);
            let new_path = header_path(&lines[i + 1][4..]);
            current = Some(OpenFile {
                old_path,
                new_path,
                entries: Vec::new(),
            });
            in_hunk = false;
            i += 2;
            continue;
        }

        if line.starts_with("diff --git ") || looks_like_binary_patch(line) {
            // Next file preamble or binary marker: close any running hunk.
            in_hunk = false;
            i += 1;
            continue;
        }

        if line.starts_with("@@") {
            if let Some(c) = HUNK_RE.captures(line) {
                // Malformed counts fail the regex entirely; a matched
                // header always yields usable counters.
                old_line = cap_u32(&c, 1);
                new_line = cap_u32(&c, 3);
                in_hunk = current.is_some();
            }
            // Unparseable header: counters stay as they were.
            i += 1;
            continue;
        }

        // `\ No newline at end of file` is not diff content.
        if line.starts_with('\\') {
            i += 1;
            continue;
        }

        if let (true, Some(file)) = (in_hunk, current.as_mut()) {
            if let Some(_rest) = line.strip_prefix('+') {
                file.entries.push(DiffLineEntry {
                    rendered_line: rendered,
                    resolved_line: new_line,
                    old_line: None,
                    new_line: Some(new_line),
                    kind: ChangeKind::Add,
                });
                new_line += 1;
            } else if let Some(_rest) = line.strip_prefix('-') {
                file.entries.push(DiffLineEntry {
                    rendered_line: rendered,
                    resolved_line: old_line,
                    old_line: Some(old_line),
                    new_line: None,
                    kind: ChangeKind::Remove,
                });
                old_line += 1;
            } else {
                // ' '-prefixed context; anything else sneaking in is
                // treated as context as well.
                file.entries.push(DiffLineEntry {
                    rendered_line: rendered,
                    resolved_line: new_line,
                    old_line: Some(old_line),
                    new_line: Some(new_line),
                    kind: ChangeKind::Context,
                });
                old_line += 1;
                new_line += 1;
            }
        }

        i += 1;
    }

    seal(&mut tables, current.take());
    debug!("step1: parsed diff into {} file table(s)", tables.len());
    tables
}

struct OpenFile {
    old_path: Option<String>,
    new_path: Option<String>,
    entries: Vec<DiffLineEntry>,
}

/// Finish the current file and store its table (empty tables included:
/// a file with no hunks is known, just not commentable).
fn seal(tables: &mut HashMap<String, FileCoordinateTable>, file: Option<OpenFile>) {
    let Some(f) = file else { return };
    let Some(path) = f.new_path.or(f.old_path) else {
        return;
    };
    tables.insert(
        path.clone(),
        FileCoordinateTable {
            path,
            entries: f.entries,
        },
    );
}

/// Extract the repo-relative path from a `---`/`+++` header remainder.
/// `/dev/null` (new/deleted files) maps to `None`.
fn header_path(rest: &str) -> Option<String> {
    let token = rest.split('\t').next().unwrap_or(rest).trim();
    if token == "/dev/null" {
        return None;
    }
    let token = token
        .strip_prefix("a/")
        .or_else(|| token.strip_prefix("b/"))
        .unwrap_or(token);
    Some(token.to_string())
}

fn cap_u32(c: &regex::Captures<'_>, idx: usize) -> u32 {
    c.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_ADDS: &str = "\
--- a/test.js
+++ b/test.js
@@ -1,6 +1,8 @@
 line one
 line two
 line three
+inserted four
 line five
 line six
+inserted seven
 line eight
";

    #[test]
    fn registers_two_add_entries() {
        let tables = parse_diff_tables(TWO_ADDS);
        let t = tables.get("test.js").unwrap();
        let adds: Vec<&DiffLineEntry> = t
            .entries
            .iter()
            .filter(|e| e.kind == ChangeKind::Add)
            .collect();
        assert_eq!(adds.len(), 2);
        assert_eq!(adds[0].resolved_line, 4);
        assert_eq!(adds[1].resolved_line, 7);
        assert!(adds.iter().all(|e| e.is_change()));
    }

    #[test]
    fn added_line_offset_matches_new_start() {
        let diff = "\
--- a/f.txt
+++ b/f.txt
@@ -1,3 +1,4 @@
 a
 b
+added
 c
";
        let tables = parse_diff_tables(diff);
        let t = tables.get("f.txt").unwrap();
        let add = t
            .entries
            .iter()
            .find(|e| e.kind == ChangeKind::Add)
            .unwrap();
        // newStart (1) + 0-based offset among new-side lines (2).
        assert_eq!(add.resolved_line, 3);
    }

    #[test]
    fn context_lines_carry_both_coordinates() {
        let diff = "\
--- a/f.txt
+++ b/f.txt
@@ -10,3 +12,3 @@
 a
-old
+new
 b
";
        let tables = parse_diff_tables(diff);
        let t = tables.get("f.txt").unwrap();
        let ctx = &t.entries[0];
        assert_eq!(ctx.kind, ChangeKind::Context);
        assert_eq!(ctx.old_line, Some(10));
        assert_eq!(ctx.new_line, Some(12));
        assert_eq!(ctx.resolved_line, 12);
        let rem = &t.entries[1];
        assert_eq!(rem.resolved_line, 11);
        assert_eq!(rem.old_line, Some(11));
        let add = &t.entries[2];
        assert_eq!(add.resolved_line, 13);
        assert_eq!(add.new_line, Some(13));
    }

    #[test]
    fn deletion_only_file_keyed_by_old_path() {
        let diff = "\
--- a/gone.rs
+++ /dev/null
@@ -1,2 +0,0 @@
-first
-second
";
        let tables = parse_diff_tables(diff);
        let t = tables.get("gone.rs").unwrap();
        assert_eq!(t.entries.len(), 2);
        assert!(t.entries.iter().all(|e| e.kind == ChangeKind::Remove));
    }

    #[test]
    fn rendered_line_is_global_ordinal() {
        let diff = "\
--- a/a.txt
+++ b/a.txt
@@ -1,1 +1,2 @@
 keep
+new a
--- a/b.txt
+++ b/b.txt
@@ -1,1 +1,2 @@
 keep
+new b
";
        let tables = parse_diff_tables(diff);
        let a = tables.get("a.txt").unwrap();
        let b = tables.get("b.txt").unwrap();
        // a.txt body starts at physical line 4; b.txt at line 9.
        assert_eq!(a.entries[0].rendered_line, 4);
        assert_eq!(a.entries[1].rendered_line, 5);
        assert_eq!(b.entries[0].rendered_line, 9);
        assert_eq!(b.entries[1].rendered_line, 10);
    }

    #[test]
    fn no_hunks_yields_empty_table() {
        let diff = "--- a/empty.js\n+++ b/empty.js\n";
        let tables = parse_diff_tables(diff);
        let t = tables.get("empty.js").unwrap();
        assert!(t.entries.is_empty());
        assert!(!t.has_changes());
    }

    #[test]
    fn malformed_hunk_header_is_skipped() {
        let diff = "\
--- a/f.txt
+++ b/f.txt
@@ bogus @@
+floating
@@ -1,1 +1,2 @@
 keep
+counted
";
        let tables = parse_diff_tables(diff);
        let t = tables.get("f.txt").unwrap();
        // Only the well-formed hunk contributes entries.
        assert_eq!(t.entries.len(), 2);
        assert_eq!(t.entries[1].resolved_line, 2);
    }

    #[test]
    fn no_newline_marker_is_ignored() {
        let diff = "\
--- a/f.txt
+++ b/f.txt
@@ -1,1 +1,1 @@
-old
\\ No newline at end of file
+new
\\ No newline at end of file
";
        let tables = parse_diff_tables(diff);
        let t = tables.get("f.txt").unwrap();
        assert_eq!(t.entries.len(), 2);
        assert_eq!(t.entries[1].kind, ChangeKind::Add);
        assert_eq!(t.entries[1].resolved_line, 1);
    }

    #[test]
    fn nearest_change_prefers_earliest_on_tie() {
        let diff = "\
--- a/f.txt
+++ b/f.txt
@@ -1,3 +1,3 @@
-before
 middle
+after
";
        let tables = parse_diff_tables(diff);
        let t = tables.get("f.txt").unwrap();
        // Context entry renders at line 5; both changes are 1 away.
        let ctx = t.entries.iter().find(|e| !e.is_change()).unwrap();
        let nearest = t.nearest_change_by_rendered(ctx.rendered_line).unwrap();
        assert_eq!(nearest.kind, ChangeKind::Remove);
    }

    #[test]
    fn old_new_correspondence_lookups() {
        let diff = "\
--- a/f.txt
+++ b/f.txt
@@ -5,4 +7,4 @@
 ctx
-removed
+added
 ctx
";
        let tables = parse_diff_tables(diff);
        let t = tables.get("f.txt").unwrap();
        assert_eq!(t.old_for_new(7), Some(5));
        assert_eq!(t.new_for_old(5), Some(7));
        // The addition at new 8 is preceded by old line 6 (the removal).
        assert_eq!(t.old_before_addition(8), Some(6));
        // The removal at old 6 is followed by new line 8 (the addition).
        assert_eq!(t.new_after_removal(6), Some(8));
    }
}
