//! GitLab submission backend.
//!
//! API:
//! - POST /projects/:id/merge_requests/:iid/discussions   (inline)
//! - POST /projects/:id/merge_requests/:iid/notes         (general)
//!
//! State machine per item: TryInline → {Posted | FallbackGeneral} →
//! Posted | Failed. The inline path is attempted at most once; a
//! rejected anchor demotes to a note that carries a human-readable
//! location reference and, when available, a deep link built from the
//! position's line code.

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::errors::{Error, MrResult, ProviderError};
use crate::feedback::FeedbackItem;
use crate::position::PlatformPosition;
use crate::publish::{
    AnchoredFeedback, CommentChannel, MrContext, ProviderIds, SubmissionResult,
};

/// Submit one anchored item, falling back to a general note on any
/// inline rejection. Errors only when both attempts fail.
pub async fn submit(
    http: &reqwest::Client,
    headers: &HeaderMap,
    base_api: &str,
    ctx: &MrContext,
    anchored: &AnchoredFeedback,
    dry_run: bool,
) -> MrResult<SubmissionResult> {
    let item = &anchored.item;
    let pos = &anchored.position;
    let body = render_body(item);

    let mut inline_cause: Option<Error> = None;
    if pos.is_well_anchored() && pos.has_complete_refs() {
        match post_inline(http, headers, base_api, ctx, &body, pos, item, dry_run).await {
            Ok(res) => return Ok(res),
            Err(e) => {
                // Platform refused the anchor (or transport died); demote
                // instead of propagating.
                debug!(
                    "step4: inline rejected for {}:{} ({e}); falling back to note",
                    item.file_path, item.line
                );
                inline_cause = Some(e);
            }
        }
    } else {
        debug!(
            "step4: {}:{} has no inline-capable anchor; posting general note",
            item.file_path, item.line
        );
    }

    let reason = inline_cause
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no inline-capable anchor".to_string());

    match post_general(http, headers, base_api, ctx, &body, pos, item, dry_run).await {
        Ok(mut res) => {
            res.fallback_reason = Some(reason);
            Ok(res)
        }
        Err(fallback) => match inline_cause {
            Some(inline) => Err(Error::SubmissionFailed {
                inline: Box::new(inline),
                fallback: Box::new(fallback),
            }),
            None => Err(fallback),
        },
    }
}

/// Render the markdown body: severity tag, title, (annotated) description.
fn render_body(item: &FeedbackItem) -> String {
    format!(
        "**[{}]** {}\n\n{}",
        item.severity.tag(),
        item.title,
        item.description
    )
}

/// Location footer for general notes: deep link when a line code was
/// derived from a real anchor, plain text otherwise.
fn location_reference(item: &FeedbackItem, pos: &PlatformPosition, web_url: &str) -> String {
    if pos.is_well_anchored() {
        format!(
            "\n\n---\nLocation: [`{}:{}`]({}/diffs#{})",
            item.file_path, item.line, web_url, pos.line_code
        )
    } else {
        format!("\n\n---\nLocation: `{}:{}`", item.file_path, item.line)
    }
}

async fn post_inline(
    http: &reqwest::Client,
    headers: &HeaderMap,
    base_api: &str,
    ctx: &MrContext,
    body: &str,
    pos: &PlatformPosition,
    item: &FeedbackItem,
    dry_run: bool,
) -> MrResult<SubmissionResult> {
    let url = format!(
        "{}/projects/{}/merge_requests/{}/discussions",
        base_api,
        urlencoding::encode(&ctx.id.project),
        ctx.id.iid
    );

    #[derive(serde::Serialize)]
    struct Req<'a> {
        body: &'a str,
        position: &'a PlatformPosition,
    }

    debug!(
        "step4: inline POST path={} line={} dry_run={}",
        item.file_path, item.line, dry_run
    );
    if dry_run {
        return Ok(SubmissionResult {
            file_path: item.file_path.clone(),
            line: item.line,
            channel: CommentChannel::Inline,
            performed: false,
            fallback_reason: None,
            provider_ids: None,
        });
    }

    let resp = http
        .post(&url)
        .headers(headers.clone())
        .json(&Req { body, position: pos })
        .send()
        .await?;
    let resp = check_status(resp, "inline discussion").await?;

    #[derive(serde::Deserialize)]
    struct DiscussionResp {
        id: String,
    }
    let disc: DiscussionResp = resp
        .json()
        .await
        .unwrap_or(DiscussionResp { id: String::new() });

    Ok(SubmissionResult {
        file_path: item.file_path.clone(),
        line: item.line,
        channel: CommentChannel::Inline,
        performed: true,
        fallback_reason: None,
        provider_ids: Some(ProviderIds {
            discussion_id: Some(disc.id),
            note_id: None,
        }),
    })
}

async fn post_general(
    http: &reqwest::Client,
    headers: &HeaderMap,
    base_api: &str,
    ctx: &MrContext,
    body: &str,
    pos: &PlatformPosition,
    item: &FeedbackItem,
    dry_run: bool,
) -> MrResult<SubmissionResult> {
    let url = format!(
        "{}/projects/{}/merge_requests/{}/notes",
        base_api,
        urlencoding::encode(&ctx.id.project),
        ctx.id.iid
    );

    #[derive(serde::Serialize)]
    struct Req<'a> {
        body: &'a str,
    }

    let full = format!("{}{}", body, location_reference(item, pos, &ctx.web_url));
    debug!(
        "step4: note POST path={} line={} dry_run={}",
        item.file_path, item.line, dry_run
    );
    if dry_run {
        return Ok(SubmissionResult {
            file_path: item.file_path.clone(),
            line: item.line,
            channel: CommentChannel::General,
            performed: false,
            fallback_reason: None,
            provider_ids: None,
        });
    }

    let resp = http
        .post(&url)
        .headers(headers.clone())
        .json(&Req { body: &full })
        .send()
        .await?;
    let resp = check_status(resp, "general note").await?;

    #[derive(serde::Deserialize)]
    struct NoteResp {
        id: u64,
    }
    let nr: NoteResp = resp.json().await.unwrap_or(NoteResp { id: 0 });

    Ok(SubmissionResult {
        file_path: item.file_path.clone(),
        line: item.line,
        channel: CommentChannel::General,
        performed: true,
        fallback_reason: None,
        provider_ids: Some(ProviderIds {
            discussion_id: None,
            note_id: Some(nr.id),
        }),
    })
}

/// Surface non-2xx responses as provider errors, keeping the response
/// body in the debug log for diagnostics.
async fn check_status(resp: reqwest::Response, what: &str) -> MrResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.ok();
    debug!("step4: {what} post rejected status={status} body={body:?}");
    Err(Error::Provider(ProviderError::from_status(status.as_u16())))
}

pub(crate) fn build_http_client() -> MrResult<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(8)
        .build()?;
    Ok(client)
}

pub(crate) fn build_gitlab_headers(token: &str) -> MrResult<HeaderMap> {
    let mut h = HeaderMap::new();
    h.insert(USER_AGENT, HeaderValue::from_static("mr-anchor/0.1"));
    h.insert(ACCEPT, HeaderValue::from_static("application/json"));
    h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    h.insert(
        "PRIVATE-TOKEN",
        HeaderValue::from_str(token).map_err(|e| Error::Validation(format!("bad token: {e}")))?,
    );
    Ok(h)
}
