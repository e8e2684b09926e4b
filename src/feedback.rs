//! Feedback items produced by the upstream AI response parser.
//!
//! These arrive as untrusted input: `line` is whatever the model printed
//! and has no guaranteed relationship to the diff. Severity, title and
//! description are opaque pass-through strings as far as the coordinate
//! engine is concerned.

use serde::{Deserialize, Serialize};

/// Normalized severity attached by the upstream reviewer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Short uppercase tag used when rendering comment bodies.
    pub fn tag(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

/// One unit of reviewer feedback aimed at a file/line in the change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackItem {
    /// Repo-relative path as reported by the model.
    pub file_path: String,
    /// Proposed line number (new-file numbering in the prompt shown to
    /// the model). Untrusted until validated against the diff.
    pub line: u32,
    pub severity: Severity,
    pub title: String,
    pub description: String,
}
