//! Normalized merge-request metadata consumed by the coordinate engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unique reference to a merge request inside the platform.
///
/// * `project` – numeric ID or "group/project" path.
/// * `iid`     – MR IID (project-scoped number).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequestId {
    pub project: String,
    pub iid: u64,
}

/// Triple of SHAs used to bind inline comments reliably.
///
/// `start_sha` is optional: some views expose only base/head, and a
/// position without it is simply not inline-eligible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffRefs {
    pub base_sha: String,
    pub start_sha: Option<String>,
    pub head_sha: String,
}

/// High-level MR metadata: the revision context for positions plus the
/// web URL deep links are built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MrMeta {
    pub id: ChangeRequestId,
    pub title: String,
    pub state: String,
    pub web_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_branch: Option<String>,
    pub target_branch: Option<String>,
    pub diff_refs: DiffRefs,
}
