//! Step 3: Resolve platform positions and derive line codes.
//!
//! The platform addresses a diff line by `(old_line, new_line)` plus a
//! content-addressed `line_code` string, `sha1(file_path)_old_new`. A
//! validated feedback item usually knows only one side; this module fills
//! in the missing coordinate from the coordinate table when possible and
//! falls back to documented approximations when it is not. Nothing here
//! aborts: a position with neither side known resolves to the degenerate
//! `0/0` anchor, which the orchestrator treats as "post a general note".
//!
//! The line code is a pure function of `(path, old, new)`: recomputing it
//! for the same inputs is byte-identical, so it doubles as a dedup key
//! downstream.

use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::git_providers::DiffRefs;
use crate::parser::{ChangeKind, FileCoordinateTable};

/// Partially-known coordinates for one feedback item, prior to
/// normalization. Zero, one or both sides may be present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawPosition {
    pub old_line: Option<u32>,
    pub new_line: Option<u32>,
}

impl RawPosition {
    /// Derive the raw coordinates for a validated line from its table
    /// entry: additions carry only the new side, removals only the old,
    /// context lines both. Unknown lines (or a missing table) resolve to
    /// the empty position.
    pub fn from_table(line: u32, table: Option<&FileCoordinateTable>) -> RawPosition {
        let Some(table) = table else {
            return RawPosition::default();
        };
        if let Some(entry) = table.change_at(line) {
            return match entry.kind {
                ChangeKind::Add => RawPosition {
                    old_line: None,
                    new_line: Some(line),
                },
                ChangeKind::Remove => RawPosition {
                    old_line: Some(line),
                    new_line: None,
                },
                ChangeKind::Context => RawPosition {
                    old_line: entry.old_line,
                    new_line: entry.new_line,
                },
            };
        }
        if let Some(entry) = table.context_at(line) {
            return RawPosition {
                old_line: entry.old_line,
                new_line: entry.new_line,
            };
        }
        RawPosition::default()
    }
}

/// Fully-resolved platform position for one inline comment. Constructed
/// immutably per feedback item; never mutated after encoding.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlatformPosition {
    pub base_sha: String,
    pub start_sha: String,
    pub head_sha: String,
    pub old_path: String,
    pub new_path: String,
    pub position_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_line: Option<u32>,
    /// Content-addressed line identifier; not part of the wire payload.
    #[serde(skip)]
    pub line_code: String,
}

impl PlatformPosition {
    /// Fill in the missing coordinate and derive the line code.
    ///
    /// Payload fill rules: a lone `new_line` borrows its old coordinate
    /// from the table's old↔new correspondence, else reuses `new_line`
    /// (documented approximation); symmetric for a lone `old_line`. Both
    /// absent leaves both sides unset, producing the degenerate `0/0`
    /// line code.
    pub fn normalize(
        raw: RawPosition,
        file_path: &str,
        refs: &DiffRefs,
        table: Option<&FileCoordinateTable>,
    ) -> PlatformPosition {
        let (old_line, new_line) = match (raw.old_line, raw.new_line) {
            (Some(o), Some(n)) => (Some(o), Some(n)),
            (None, Some(n)) => {
                let o = table.and_then(|t| t.old_for_new(n)).unwrap_or(n);
                (Some(o), Some(n))
            }
            (Some(o), None) => {
                let n = table.and_then(|t| t.new_for_old(o)).unwrap_or(o);
                (Some(o), Some(n))
            }
            (None, None) => (None, None),
        };

        let (code_old, code_new) = line_code_coords(raw, table);

        PlatformPosition {
            base_sha: refs.base_sha.clone(),
            start_sha: refs.start_sha.clone().unwrap_or_default(),
            head_sha: refs.head_sha.clone(),
            old_path: file_path.to_string(),
            new_path: file_path.to_string(),
            position_type: "text",
            old_line,
            new_line,
            line_code: line_code(file_path, code_old, code_new),
        }
    }

    /// False for the degenerate `0/0` anchor: such a position must not be
    /// submitted inline.
    pub fn is_well_anchored(&self) -> bool {
        self.old_line.is_some() || self.new_line.is_some()
    }

    /// True when all three revisions needed for an inline anchor are set.
    pub fn has_complete_refs(&self) -> bool {
        !self.base_sha.is_empty() && !self.start_sha.is_empty() && !self.head_sha.is_empty()
    }
}

/// Coordinates used for the line code, following the platform's own
/// addressing convention. These deliberately differ from the payload
/// fill-in: an addition is coded against the old line *preceding* it and
/// a deletion against the new line *following* it.
fn line_code_coords(raw: RawPosition, table: Option<&FileCoordinateTable>) -> (u32, u32) {
    match (raw.old_line, raw.new_line) {
        (Some(o), Some(n)) => (o, n),
        (None, Some(n)) => {
            let o = table
                .and_then(|t| t.old_before_addition(n))
                .unwrap_or_else(|| n.saturating_sub(1));
            (o, n)
        }
        (Some(o), None) => {
            let n = table
                .and_then(|t| t.new_after_removal(o))
                .unwrap_or_else(|| o.saturating_add(1));
            (o, n)
        }
        (None, None) => (0, 0),
    }
}

/// The platform's opaque line identifier: lowercase hex SHA-1 of the
/// UTF-8 file path, followed by the resolved old and new line numbers.
pub fn line_code(file_path: &str, old_line: u32, new_line: u32) -> String {
    let mut hasher = Sha1::new();
    hasher.update(file_path.as_bytes());
    format!("{:x}_{}_{}", hasher.finalize(), old_line, new_line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_diff_tables;

    fn refs() -> DiffRefs {
        DiffRefs {
            base_sha: "base".into(),
            start_sha: Some("start".into()),
            head_sha: "head".into(),
        }
    }

    #[test]
    fn line_code_is_pure() {
        let a = line_code("src/app/main.rs", 10, 12);
        let b = line_code("src/app/main.rs", 10, 12);
        assert_eq!(a, b);
        // Changing the path always changes the digest prefix.
        let c = line_code("src/app/other.rs", 10, 12);
        assert_ne!(a.split('_').next(), c.split('_').next());
        assert!(a.ends_with("_10_12"));
    }

    #[test]
    fn addition_without_table_codes_preceding_old_line() {
        let path = "src/app/fill-transfer/constants.ts";
        let pos = PlatformPosition::normalize(
            RawPosition {
                old_line: None,
                new_line: Some(194),
            },
            path,
            &refs(),
            None,
        );
        let mut hasher = Sha1::new();
        hasher.update(path.as_bytes());
        let expected = format!("{:x}_193_194", hasher.finalize());
        assert_eq!(pos.line_code, expected);
        // Payload fill-in reuses the known side when no table exists.
        assert_eq!(pos.old_line, Some(194));
        assert_eq!(pos.new_line, Some(194));
    }

    #[test]
    fn deletion_without_table_codes_following_new_line() {
        let pos = PlatformPosition::normalize(
            RawPosition {
                old_line: Some(41),
                new_line: None,
            },
            "a.rs",
            &refs(),
            None,
        );
        assert!(pos.line_code.ends_with("_41_42"));
    }

    #[test]
    fn table_recovers_real_coordinates() {
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
        let table = tables.get("f.txt");

        // Context line: both sides known from the table entry.
        let raw = RawPosition::from_table(7, table);
        assert_eq!(raw.old_line, Some(5));
        assert_eq!(raw.new_line, Some(7));
        let pos = PlatformPosition::normalize(raw, "f.txt", &refs(), table);
        assert!(pos.line_code.ends_with("_5_7"));

        // Addition at new 8: coded against the preceding old line 6.
        let raw = RawPosition::from_table(8, table);
        assert_eq!(raw, RawPosition { old_line: None, new_line: Some(8) });
        let pos = PlatformPosition::normalize(raw, "f.txt", &refs(), table);
        assert!(pos.line_code.ends_with("_6_8"));

        // Removal at old 6: coded against the following new line 8.
        let raw = RawPosition::from_table(6, table);
        assert_eq!(raw, RawPosition { old_line: Some(6), new_line: None });
        let pos = PlatformPosition::normalize(raw, "f.txt", &refs(), table);
        assert!(pos.line_code.ends_with("_6_8"));
    }

    #[test]
    fn degenerate_position_is_not_inline_capable() {
        let pos = PlatformPosition::normalize(RawPosition::default(), "f.txt", &refs(), None);
        assert!(!pos.is_well_anchored());
        assert!(pos.line_code.ends_with("_0_0"));
        assert_eq!(pos.old_line, None);
        assert_eq!(pos.new_line, None);
    }

    #[test]
    fn missing_start_sha_blocks_inline_refs() {
        let refs = DiffRefs {
            base_sha: "base".into(),
            start_sha: None,
            head_sha: "head".into(),
        };
        let pos = PlatformPosition::normalize(
            RawPosition {
                old_line: None,
                new_line: Some(3),
            },
            "f.txt",
            &refs,
            None,
        );
        assert!(!pos.has_complete_refs());
    }

    #[test]
    fn payload_serializes_platform_shape() {
        let pos = PlatformPosition::normalize(
            RawPosition {
                old_line: Some(5),
                new_line: Some(7),
            },
            "f.txt",
            &refs(),
            None,
        );
        let json = serde_json::to_value(&pos).unwrap();
        assert_eq!(json["position_type"], "text");
        assert_eq!(json["new_path"], "f.txt");
        assert_eq!(json["old_line"], 5);
        assert_eq!(json["new_line"], 7);
        assert!(json.get("line_code").is_none());
    }
}
