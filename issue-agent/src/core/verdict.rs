//! Ordered verdict rules for pull request review.
//!
//! Rules are evaluated first-match-wins, cheapest first, so the generative
//! service is only consulted when every deterministic rule passes:
//!
//! 1. CI status other than `success` requests changes.
//! 2. A linked PR missing the fallback artifact requests changes.
//! 3. An unconfigured generative service approves.
//! 4. The generative response decides; anything but an explicit
//!    `CHANGES_REQUESTED` approves.

use crate::core::issue_ref::artifact_path;
use crate::core::types::Verdict;

/// Verdict plus the human-readable message published with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewDecision {
    pub verdict: Verdict,
    pub message: String,
}

impl ReviewDecision {
    fn new(verdict: Verdict, message: impl Into<String>) -> Self {
        Self {
            verdict,
            message: message.into(),
        }
    }
}

/// Rule 1: CI must report `success` (case-insensitive).
pub fn ci_rule(ci_status: &str) -> Option<ReviewDecision> {
    if ci_status.trim().eq_ignore_ascii_case("success") {
        return None;
    }
    Some(ReviewDecision::new(
        Verdict::ChangesRequested,
        format!("CI status is {}. Please fix CI failures.", ci_status.trim()),
    ))
}

/// Rule 2: a PR linked to an issue must touch that issue's artifact.
pub fn artifact_rule(issue_number: Option<u64>, changed_files: &[String]) -> Option<ReviewDecision> {
    let expected = artifact_path(issue_number?);
    if changed_files.iter().any(|name| *name == expected) {
        return None;
    }
    Some(ReviewDecision::new(
        Verdict::ChangesRequested,
        format!("Expected file {expected} not found in PR. Please add output or code changes."),
    ))
}

/// Rule 3: no reviewer model configured.
pub fn unconfigured_decision() -> ReviewDecision {
    ReviewDecision::new(
        Verdict::Approved,
        "LLM not configured; minimal checks passed.",
    )
}

/// Rule 4: interpret the generative response, failing open.
pub fn interpret_response(response: Option<&str>) -> ReviewDecision {
    let text = response.map(str::trim).filter(|text| !text.is_empty());
    match text {
        None => ReviewDecision::new(Verdict::Approved, "No LLM response; defaulting to approve."),
        Some(text) if text.contains("CHANGES_REQUESTED") => {
            ReviewDecision::new(Verdict::ChangesRequested, text)
        }
        Some(text) => ReviewDecision::new(Verdict::Approved, text),
    }
}
