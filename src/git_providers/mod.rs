//! Platform client layer (metadata + raw diffs) for the coordinate engine.
//!
//! Only the pieces the reconciliation pipeline needs: the MR's diff refs
//! (base/start/head SHAs), its web URL for deep links, and the raw
//! unified diff text the coordinate tables are built from. No async-trait
//! and no heap trait objects; plain async fns on a concrete client.

pub mod types;
pub use types::*;

pub mod gitlab;
pub use gitlab::GitLabClient;

use crate::errors::{ConfigError, MrResult};

/// Runtime configuration for the platform client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API base, e.g. "https://gitlab.com/api/v4".
    pub base_api: String,
    /// Access token (PAT or project token).
    pub token: String,
}

impl ProviderConfig {
    /// Check the config before any network call is attempted.
    pub fn validate(&self) -> MrResult<()> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingToken.into());
        }
        if !self.base_api.starts_with("http://") && !self.base_api.starts_with("https://") {
            return Err(ConfigError::InvalidBaseUrl(self.base_api.clone()).into());
        }
        Ok(())
    }
}
