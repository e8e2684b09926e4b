//! Step 2: Validate and correct AI-proposed line numbers.
//!
//! The model's line numbers are untrusted: they may point at a context
//! line, a line outside any hunk, or nowhere at all. This module decides
//! whether a proposed `(file, line)` names an actual changed line and, if
//! not, substitutes the nearest changed line or keeps the original with a
//! warning. Nothing is adjusted silently: every change is appended to the item's
//! description so a human can always tell a corrected location from an
//! originally-correct one.
//!
//! Pure functions over immutable tables; safe to call concurrently.

use std::collections::HashMap;

use tracing::debug;

use crate::feedback::FeedbackItem;
use crate::parser::{ChangeKind, FileCoordinateTable};

/// What to do when a proposed line matches neither a change nor a context
/// entry (wholly outside the diff). Relocation can misattribute feedback
/// to an unrelated line, so the caller must choose explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationPolicy {
    /// Substitute the nearest changed line (annotated).
    Relocate,
    /// Keep the original line and return an unresolved warning carrying
    /// the nearest candidate.
    WarnOnly,
}

/// Where a correction came from; drives annotation text and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionOrigin {
    /// The proposed line exists in the diff but is unchanged.
    ContextLine,
    /// The proposed line is outside every hunk.
    OutsideDiff,
}

/// Result of validating one proposed location. Never an error: callers
/// are forced to handle the non-ideal cases instead of trusting an
/// unverified line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The line names an actual changed line.
    Valid,
    /// A nearby changed line was substituted.
    CorrectedTo {
        line: u32,
        kind: ChangeKind,
        origin: CorrectionOrigin,
    },
    /// No usable mapping; the candidate (if any) is the nearest changed
    /// line the caller may relocate to under its own policy.
    UnresolvedWarning {
        reason: String,
        candidate: Option<(u32, ChangeKind)>,
    },
}

/// Outcome counters for one feedback batch. Used to monitor the upstream
/// model's coordinate accuracy over time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    /// Proposed line matched a changed line as-is.
    pub accurate: usize,
    /// Any substitution applied (context-line and outside-diff together).
    pub corrected: usize,
    /// Subset of `corrected` where the model referenced a context line.
    pub context_line_errors: usize,
    /// No mapping for the file, or no changed lines to anchor to.
    pub unmappable: usize,
}

/// Validate one proposed `(file, line)` pair against the coordinate
/// tables. Total over all inputs: never panics, never errors.
pub fn validate(
    file_path: &str,
    proposed_line: u32,
    tables: &HashMap<String, FileCoordinateTable>,
    policy: RelocationPolicy,
) -> ValidationOutcome {
    let Some(table) = tables.get(file_path) else {
        return ValidationOutcome::UnresolvedWarning {
            reason: format!("no diff mapping for file '{file_path}'"),
            candidate: None,
        };
    };

    if !table.has_changes() {
        return ValidationOutcome::UnresolvedWarning {
            reason: format!("no changed lines in file '{file_path}'"),
            candidate: None,
        };
    }

    if table.change_at(proposed_line).is_some() {
        return ValidationOutcome::Valid;
    }

    if let Some(ctx) = table.context_at(proposed_line) {
        // The query line renders inside the diff, so nearest is measured
        // in rendered-line distance from the referenced context line.
        let nearest = table
            .nearest_change_by_rendered(ctx.rendered_line)
            .expect("has_changes checked above");
        return ValidationOutcome::CorrectedTo {
            line: nearest.resolved_line,
            kind: nearest.kind,
            origin: CorrectionOrigin::ContextLine,
        };
    }

    // Outside every hunk: the query has no rendered position, so fall
    // back to resolved-line distance.
    let nearest = table
        .nearest_change_by_resolved(proposed_line)
        .expect("has_changes checked above");
    match policy {
        RelocationPolicy::Relocate => ValidationOutcome::CorrectedTo {
            line: nearest.resolved_line,
            kind: nearest.kind,
            origin: CorrectionOrigin::OutsideDiff,
        },
        RelocationPolicy::WarnOnly => ValidationOutcome::UnresolvedWarning {
            reason: format!("line {proposed_line} is outside the diff for '{file_path}'"),
            candidate: Some((nearest.resolved_line, nearest.kind)),
        },
    }
}

/// Validate a whole feedback batch, substituting corrected line numbers
/// and annotating every adjusted or unverifiable item. Returns the
/// corrected items in input order together with outcome statistics.
pub fn correct_feedback(
    items: Vec<FeedbackItem>,
    tables: &HashMap<String, FileCoordinateTable>,
    policy: RelocationPolicy,
) -> (Vec<FeedbackItem>, ValidationStats) {
    let mut stats = ValidationStats::default();
    let mut out = Vec::with_capacity(items.len());

    for mut item in items {
        match validate(&item.file_path, item.line, tables, policy) {
            ValidationOutcome::Valid => {
                stats.accurate += 1;
            }
            ValidationOutcome::CorrectedTo { line, origin, .. } => {
                stats.corrected += 1;
                let why = match origin {
                    CorrectionOrigin::ContextLine => {
                        stats.context_line_errors += 1;
                        "the reported line is unchanged in this diff"
                    }
                    CorrectionOrigin::OutsideDiff => "the reported line is outside the diff",
                };
                debug!(
                    "step2: corrected {}:{} -> {} ({why})",
                    item.file_path, item.line, line
                );
                item.description.push_str(&format!(
                    "\n\n> ⚠️ Line adjusted from {} to {}: {}; anchored to the nearest changed line.",
                    item.line, line, why
                ));
                item.line = line;
            }
            ValidationOutcome::UnresolvedWarning { reason, .. } => {
                stats.unmappable += 1;
                debug!("step2: unresolved {}:{} ({reason})", item.file_path, item.line);
                item.description.push_str(&format!(
                    "\n\n> ⚠️ Could not verify this location ({reason}); line {} kept as reported.",
                    item.line
                ));
            }
        }
        out.push(item);
    }

    debug!(
        "step2: batch validated accurate={} corrected={} context_errors={} unmappable={}",
        stats.accurate, stats.corrected, stats.context_line_errors, stats.unmappable
    );
    (out, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::Severity;
    use crate::parser::parse_diff_tables;

    const TEST_JS: &str = "\
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

    fn item(path: &str, line: u32) -> FeedbackItem {
        FeedbackItem {
            file_path: path.into(),
            line,
            severity: Severity::Medium,
            title: "possible bug".into(),
            description: "something looks off".into(),
        }
    }

    #[test]
    fn exact_change_line_is_valid() {
        let tables = parse_diff_tables(TEST_JS);
        let out = validate("test.js", 4, &tables, RelocationPolicy::WarnOnly);
        assert_eq!(out, ValidationOutcome::Valid);
    }

    #[test]
    fn context_line_corrects_to_nearest_change() {
        let tables = parse_diff_tables(TEST_JS);
        // New-file line 3 is context, rendered at line 6; the add at new
        // line 4 renders at line 7 and is the nearest change.
        let out = validate("test.js", 3, &tables, RelocationPolicy::WarnOnly);
        assert_eq!(
            out,
            ValidationOutcome::CorrectedTo {
                line: 4,
                kind: ChangeKind::Add,
                origin: CorrectionOrigin::ContextLine,
            }
        );
    }

    #[test]
    fn missing_file_warns() {
        let tables = parse_diff_tables(TEST_JS);
        let out = validate("absent.js", 1, &tables, RelocationPolicy::Relocate);
        assert!(matches!(
            out,
            ValidationOutcome::UnresolvedWarning { candidate: None, .. }
        ));
    }

    #[test]
    fn never_panics_on_hostile_inputs() {
        let tables = parse_diff_tables(TEST_JS);
        let empty = HashMap::new();
        for line in [0, 1, 999, u32::MAX] {
            validate("test.js", line, &tables, RelocationPolicy::Relocate);
            validate("test.js", line, &empty, RelocationPolicy::WarnOnly);
            validate("", line, &tables, RelocationPolicy::WarnOnly);
        }
    }

    #[test]
    fn out_of_diff_policy_is_explicit() {
        let tables = parse_diff_tables(TEST_JS);
        // New-file line 100 matches nothing in the table.
        let warned = validate("test.js", 100, &tables, RelocationPolicy::WarnOnly);
        assert!(matches!(
            warned,
            ValidationOutcome::UnresolvedWarning {
                candidate: Some((7, ChangeKind::Add)),
                ..
            }
        ));
        let relocated = validate("test.js", 100, &tables, RelocationPolicy::Relocate);
        assert_eq!(
            relocated,
            ValidationOutcome::CorrectedTo {
                line: 7,
                kind: ChangeKind::Add,
                origin: CorrectionOrigin::OutsideDiff,
            }
        );
    }

    #[test]
    fn correction_distance_is_minimal() {
        let tables = parse_diff_tables(TEST_JS);
        let table = tables.get("test.js").unwrap();
        // For every context line, the chosen correction must be at
        // minimal rendered distance among all change entries.
        for ctx in table.entries.iter().filter(|e| !e.is_change()) {
            let chosen = table.nearest_change_by_rendered(ctx.rendered_line).unwrap();
            let best = table
                .entries
                .iter()
                .filter(|e| e.is_change())
                .map(|e| e.rendered_line.abs_diff(ctx.rendered_line))
                .min()
                .unwrap();
            assert_eq!(chosen.rendered_line.abs_diff(ctx.rendered_line), best);
        }
    }

    #[test]
    fn batch_annotates_corrections_visibly() {
        let tables = parse_diff_tables(TEST_JS);
        let (out, stats) = correct_feedback(
            vec![item("test.js", 3), item("test.js", 4)],
            &tables,
            RelocationPolicy::WarnOnly,
        );
        assert_eq!(out[0].line, 4);
        assert!(out[0].description.contains("⚠️"));
        assert!(out[0].description.contains("adjusted from 3 to 4"));
        // The originally-correct item is untouched.
        assert_eq!(out[1].description, "something looks off");
        assert_eq!(stats.accurate, 1);
        assert_eq!(stats.corrected, 1);
        assert_eq!(stats.context_line_errors, 1);
    }

    #[test]
    fn file_without_changes_counts_unmappable() {
        let diff = "--- a/empty.js\n+++ b/empty.js\n";
        let tables = parse_diff_tables(diff);
        let (out, stats) = correct_feedback(
            vec![item("empty.js", 999)],
            &tables,
            RelocationPolicy::Relocate,
        );
        assert_eq!(stats.unmappable, 1);
        assert_eq!(out[0].line, 999);
        assert!(out[0].description.contains("Could not verify"));
    }
}
