//! Diff coordinate reconciliation engine for automated MR review.
//!
//! Three incompatible line-numbering schemes meet when a reviewer bot
//! comments on a change: the unified diff's own arithmetic, the full-file
//! numbers the model sees in its prompt, and the platform's hash-derived
//! line addressing. This crate translates between them and posts the
//! result, in four steps:
//!
//! 1) **Step 1 — Coordinate tables**
//!    - Parse the raw unified diff into per-file tables mapping every
//!      rendered line to its role and true old/new position
//!
//! 2) **Step 2 — Validation & correction**
//!    - Check each AI-proposed `(file, line)` against the tables
//!    - Substitute the nearest changed line for context references,
//!      annotate every adjustment, count outcome statistics
//!
//! 3) **Step 3 — Position encoding**
//!    - Fill in the missing old/new coordinate per item
//!    - Derive the platform's `sha1(path)_old_new` line code
//!
//! 4) **Step 4 — Submission**
//!    - Post inline discussions, demoting to general notes on rejection
//!
//! Steps 1–3 are pure, synchronous functions over immutable structures;
//! only step 4 performs I/O. The pipeline uses `tracing` for debug
//! logging and avoids `async-trait` and heap trait objects.

pub mod errors;
pub mod feedback;
pub mod git_providers;
pub mod parser; // step 1
pub mod position; // step 3
pub mod publish; // step 4
pub mod validate; // step 2

use std::collections::HashMap;
use std::time::Instant;

use tracing::debug;

/// Final output of a full pipeline run: per-item submission results plus
/// the coordinate-accuracy statistics from the validation step.
#[derive(Debug)]
pub struct AnchorReport {
    pub results: Vec<SubmissionResult>,
    pub stats: ValidationStats,
}

/// Encode platform positions for an already-corrected feedback batch.
///
/// Pure; useful for callers that fetched the diff themselves. Items whose
/// line still matches nothing (unverified warnings) get the degenerate
/// anchor and will be posted as general notes.
pub fn anchor_feedback(
    items: Vec<FeedbackItem>,
    tables: &HashMap<String, FileCoordinateTable>,
    refs: &DiffRefs,
) -> Vec<AnchoredFeedback> {
    items
        .into_iter()
        .map(|item| {
            let table = tables.get(&item.file_path);
            let raw = RawPosition::from_table(item.line, table);
            let position = PlatformPosition::normalize(raw, &item.file_path, refs, table);
            AnchoredFeedback { item, position }
        })
        .collect()
}

/// Run the whole reconciliation pipeline for one MR: fetch metadata and
/// the raw diff, validate/correct the feedback batch, encode positions,
/// and publish with inline→general fallback.
///
/// # Logging
/// Emits `DEBUG` logs per sub-stage (`step0: fetch`, `step1: parse`,
/// `step2: validate`, `step4: publish`) and an `INFO` summary from the
/// publisher.
pub async fn run_anchored_review(
    provider_cfg: &ProviderConfig,
    id: &ChangeRequestId,
    items: Vec<FeedbackItem>,
    policy: RelocationPolicy,
    publish_cfg: &PublishConfig,
) -> MrResult<AnchorReport> {
    let t0 = Instant::now();

    debug!("step0: init provider client");
    let client = GitLabClient::new(provider_cfg)?;
    let meta = client.get_meta(id).await?;
    debug!("step0: meta ok, head_sha={}", meta.diff_refs.head_sha);
    let diff = client.get_raw_diff(id).await?;

    let tables = parse_diff_tables(&diff);
    debug!(
        "step1: {} file table(s) ({} ms)",
        tables.len(),
        t0.elapsed().as_millis()
    );

    let (corrected, stats) = correct_feedback(items, &tables, policy);

    let anchored = anchor_feedback(corrected, &tables, &meta.diff_refs);
    debug!("step3: {} item(s) anchored", anchored.len());

    let ctx = MrContext {
        id: id.clone(),
        diff_refs: meta.diff_refs.clone(),
        web_url: meta.web_url.clone(),
    };
    let results = publish_feedback(provider_cfg, &ctx, anchored, publish_cfg).await?;

    debug!(
        "pipeline done: {} result(s) in {} ms",
        results.len(),
        t0.elapsed().as_millis()
    );
    Ok(AnchorReport { results, stats })
}

// -----------------------------------------------------------------------------
// Convenience re-exports for downstream users
// -----------------------------------------------------------------------------

pub use errors::{Error, MrResult};
pub use feedback::{FeedbackItem, Severity};
pub use git_providers::{ChangeRequestId, DiffRefs, GitLabClient, MrMeta, ProviderConfig};
pub use parser::{
    ChangeKind, DiffLineEntry, FileCoordinateTable, parse_diff_tables,
};
pub use position::{PlatformPosition, RawPosition, line_code};
pub use publish::{
    AnchoredFeedback, CommentChannel, MrContext, PublishConfig, SubmissionResult,
    publish_feedback,
};
pub use validate::{
    CorrectionOrigin, RelocationPolicy, ValidationOutcome, ValidationStats, correct_feedback,
    validate as validate_location,
};
