//! Plain-text comment tags that carry all durable agent state.
//!
//! Two tags exist:
//!
//! - `Iteration: <N>` in agent-authored issue comments (the iteration counter).
//! - `STATUS: <VERDICT>` leading a reviewer comment (the review verdict).
//!
//! Both are matched only at the start of a line so that incidental mentions
//! inside prose ("the last STATUS: APPROVED was wrong") never count. Parsing
//! and formatting live here together; changing the grammar touches no other
//! module.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Verdict;

static ITERATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*Iteration:[ \t]*(\d+)").unwrap());

static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*STATUS:[ \t]*(APPROVED|CHANGES_REQUESTED)\b").unwrap()
});

/// Parse the first `Iteration: <N>` tag in a comment body.
///
/// Values that overflow `u32` are skipped rather than wrapped.
pub fn parse_iteration(body: &str) -> Option<u32> {
    ITERATION_RE
        .captures_iter(body)
        .find_map(|caps| caps[1].parse::<u32>().ok())
}

pub fn iteration_line(iteration: u32) -> String {
    format!("Iteration: {iteration}")
}

/// Parse the first `STATUS: <VERDICT>` tag in a comment body.
pub fn parse_verdict(body: &str) -> Option<Verdict> {
    let caps = STATUS_RE.captures(body)?;
    match &caps[1] {
        "APPROVED" => Some(Verdict::Approved),
        "CHANGES_REQUESTED" => Some(Verdict::ChangesRequested),
        _ => None,
    }
}

pub fn status_line(verdict: Verdict) -> String {
    format!("STATUS: {}", verdict.as_str())
}

/// Body of the plain verdict comment read back by the next resolution run.
pub fn verdict_comment(verdict: Verdict, summary: &str) -> String {
    format!("{}\n\nSummary:\n{}\n", status_line(verdict), summary.trim_end())
}

/// Body of the formal review accompanying the verdict comment.
pub fn review_body(verdict: Verdict, details: &str) -> String {
    format!("{}\n\nDetails:\n{}\n", status_line(verdict), details.trim_end())
}
