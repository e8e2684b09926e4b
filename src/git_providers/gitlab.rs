//! GitLab provider (REST v4) for MR metadata and raw diffs.
//!
//! Endpoints used:
//! - GET /projects/:id/merge_requests/:iid            (meta + diff_refs)
//! - GET /projects/:id/merge_requests/:iid/raw_diffs  (unified diff text)

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::errors::{MrResult, ProviderError};
use crate::git_providers::types::{ChangeRequestId, DiffRefs, MrMeta};
use crate::git_providers::ProviderConfig;

#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: Client,
    base_api: String,
    token: String,
}

impl GitLabClient {
    /// Build a client with sane transport timeouts and pooling.
    pub fn new(cfg: &ProviderConfig) -> MrResult<Self> {
        cfg.validate()?;
        let http = Client::builder()
            .user_agent("mr-anchor/0.1")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(8)
            .build()?;
        Ok(Self {
            http,
            base_api: cfg.base_api.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
        })
    }

    /// Fetch MR metadata. Includes `diff_refs` with head/base/start SHAs
    /// and the web URL used for fallback deep links.
    pub async fn get_meta(&self, id: &ChangeRequestId) -> MrResult<MrMeta> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}",
            self.base_api,
            urlencoding::encode(&id.project),
            id.iid
        );
        debug!("step0: GET mr meta project={} iid={}", id.project, id.iid);
        let resp: GitLabMr = self
            .http
            .get(url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let diff_refs = resp
            .diff_refs
            .ok_or_else(|| ProviderError::InvalidResponse("missing diff_refs".into()))?;

        Ok(MrMeta {
            id: id.clone(),
            title: resp.title,
            state: resp.state,
            web_url: resp.web_url,
            created_at: resp.created_at,
            updated_at: resp.updated_at,
            source_branch: Some(resp.source_branch),
            target_branch: Some(resp.target_branch),
            diff_refs: DiffRefs {
                base_sha: diff_refs.base_sha,
                start_sha: Some(diff_refs.start_sha),
                head_sha: diff_refs.head_sha,
            },
        })
    }

    /// Fetch the full unified diff for the MR as plain text.
    pub async fn get_raw_diff(&self, id: &ChangeRequestId) -> MrResult<String> {
        let url = format!(
            "{}/projects/{}/merge_requests/{}/raw_diffs",
            self.base_api,
            urlencoding::encode(&id.project),
            id.iid
        );
        debug!("step0: GET raw diffs project={} iid={}", id.project, id.iid);
        let text = self
            .http
            .get(url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!("step0: raw diff fetched, {} bytes", text.len());
        Ok(text)
    }
}

// ---- GitLab wire shapes (subset we consume) ----

#[derive(Debug, Deserialize)]
struct GitLabMr {
    title: String,
    state: String,
    web_url: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    source_branch: String,
    target_branch: String,
    diff_refs: Option<GitLabDiffRefs>,
}

#[derive(Debug, Deserialize)]
struct GitLabDiffRefs {
    base_sha: String,
    start_sha: String,
    head_sha: String,
}
