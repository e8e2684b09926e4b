//! Step 4: Comment submission orchestrator.
//!
//! Posts one comment per feedback item:
//! - inline discussion when the item carries a well-anchored position,
//! - general MR note otherwise, or when the platform rejects the anchor.
//!
//! A transport rejection of the inline attempt is logged and demoted to
//! the general path; only a double failure (inline and fallback both
//! rejected) escalates to the caller. Dry-run computes and logs every
//! action without calling the API. No async-trait, no `Box<dyn ...>`.

pub mod gitlab;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::info;

use crate::errors::{Error, MrResult};
use crate::feedback::FeedbackItem;
use crate::git_providers::{ChangeRequestId, DiffRefs, ProviderConfig};
use crate::position::PlatformPosition;

/// Configuration for the publishing step.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// If true, do not actually send anything; just log what would be posted.
    pub dry_run: bool,
    /// Concurrency for posting requests (platform rate limits apply).
    pub max_concurrency: usize,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            dry_run: env_bool("MR_ANCHOR_PUBLISH_DRY_RUN", true),
            max_concurrency: env_usize("MR_ANCHOR_PUBLISH_CONCURRENCY", 2),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Merge-request context a submission needs: where to post and how to
/// build deep links. Revision identifiers come from MR metadata.
#[derive(Debug, Clone)]
pub struct MrContext {
    pub id: ChangeRequestId,
    pub diff_refs: DiffRefs,
    pub web_url: String,
}

/// One feedback item together with its encoded platform position.
#[derive(Debug, Clone)]
pub struct AnchoredFeedback {
    pub item: FeedbackItem,
    pub position: PlatformPosition,
}

/// Which endpoint ended up carrying the comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentChannel {
    Inline,
    General,
}

/// Platform-side identifiers of the created comment.
#[derive(Debug, Clone)]
pub struct ProviderIds {
    pub discussion_id: Option<String>,
    pub note_id: Option<u64>,
}

/// Terminal result for a single submitted item.
#[derive(Debug, Clone)]
pub struct SubmissionResult {
    pub file_path: String,
    pub line: u32,
    pub channel: CommentChannel,
    /// Was a network POST performed (false in dry-run)?
    pub performed: bool,
    /// Why the general channel was used, when it was not the first choice.
    pub fallback_reason: Option<String>,
    pub provider_ids: Option<ProviderIds>,
}

/// Publish all anchored items for the given MR with bounded concurrency.
///
/// Each submission is an independent request/response exchange; results
/// come back in input order.
pub async fn publish_feedback(
    cfg: &ProviderConfig,
    ctx: &MrContext,
    anchored: Vec<AnchoredFeedback>,
    pcfg: &PublishConfig,
) -> MrResult<Vec<SubmissionResult>> {
    let t0 = Instant::now();
    info!(
        "step4: publish start items={} dry_run={}",
        anchored.len(),
        pcfg.dry_run
    );

    let http = gitlab::build_http_client()?;
    let headers = gitlab::build_gitlab_headers(&cfg.token)?;
    let base = cfg.base_api.trim_end_matches('/').to_string();

    let sem = Arc::new(Semaphore::new(pcfg.max_concurrency.max(1)));
    let mut futs = Vec::with_capacity(anchored.len());
    for a in anchored {
        let http = http.clone();
        let headers = headers.clone();
        let base = base.clone();
        let ctx = ctx.clone();
        let dry_run = pcfg.dry_run;
        let sem = sem.clone();

        futs.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.expect("semaphore never closed");
            gitlab::submit(&http, &headers, &base, &ctx, &a, dry_run).await
        }));
    }

    let mut out = Vec::with_capacity(futs.len());
    for f in futs {
        out.push(
            f.await
                .map_err(|e| Error::Other(format!("join error: {e}")))??,
        );
    }

    let inline = out
        .iter()
        .filter(|r| r.channel == CommentChannel::Inline)
        .count();
    info!(
        "step4: publish done inline={} general={} in {} ms",
        inline,
        out.len() - inline,
        t0.elapsed().as_millis()
    );
    Ok(out)
}
