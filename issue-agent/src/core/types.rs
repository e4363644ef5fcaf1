//! Shared deterministic types for the agent core.
//!
//! These mirror the tracker entities the core reads. They carry no behavior
//! tied to a concrete host; adapters in [`crate::io::tracker`] map wire
//! payloads onto them.

use serde::{Deserialize, Serialize};

/// A tracked unit of work. Read-only from the agent's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// A comment on an issue or pull request (pull requests share the issue
/// comment stream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    /// Login of the authoring account.
    pub author: String,
    pub body: String,
    /// RFC 3339 timestamp as reported by the host.
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    /// Head branch name (without owner qualification).
    pub head_ref: String,
    pub title: String,
    pub body: String,
    pub html_url: String,
}

/// One changed file in a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrFile {
    pub filename: String,
    /// Unified diff hunk text; absent for binary or oversized files.
    pub patch: Option<String>,
}

/// Ephemeral per-run context handed to the change producers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentContext {
    pub issue_number: u64,
    pub issue_title: String,
    pub issue_body: String,
    /// Body of the latest reviewer comment on the linked PR, or empty.
    pub reviewer_feedback: String,
}

impl AgentContext {
    pub fn from_issue(issue: &Issue, reviewer_feedback: Option<&str>) -> Self {
        Self {
            issue_number: issue.number,
            issue_title: issue.title.clone(),
            issue_body: issue.body.clone(),
            reviewer_feedback: reviewer_feedback.unwrap_or_default().to_string(),
        }
    }
}

/// Binary reviewer outcome for a pull request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approved,
    ChangesRequested,
}

impl Verdict {
    /// Tag spelling used in `STATUS: <VERDICT>` lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Approved => "APPROVED",
            Verdict::ChangesRequested => "CHANGES_REQUESTED",
        }
    }

    /// Disposition name for a formal review submission.
    pub fn review_event(self) -> &'static str {
        match self {
            Verdict::Approved => "APPROVE",
            Verdict::ChangesRequested => "REQUEST_CHANGES",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
