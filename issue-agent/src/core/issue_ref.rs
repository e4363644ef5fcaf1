//! Deterministic mapping between issues, branches, artifacts and PRs.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::PullRequest;

static TITLE_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\d+)").unwrap());
/// The `(#<N>)` suffix the agent puts on its own PR titles.
static TITLE_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(#(\d+)\)\s*$").unwrap());
static BRANCH_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"issue-(\d+)").unwrap());

/// Branch owned by the agent for an issue. Never stored, always recomputed.
pub fn branch_name(issue_number: u64) -> String {
    format!("agent/issue-{issue_number}")
}

/// Repository-relative path of the fallback audit artifact.
pub fn artifact_path(issue_number: u64) -> String {
    format!("agent_output/issue-{issue_number}.md")
}

/// Recover the linked issue number from a PR: a trailing `(#<N>)` in the
/// title, then the first `#<N>` in the title, then the head branch `issue-<N>`.
pub fn extract_issue_number(title: &str, head_ref: &str) -> Option<u64> {
    let from_title = title_marker(title).or_else(|| {
        TITLE_NUMBER_RE
            .captures(title)
            .and_then(|caps| caps[1].parse().ok())
    });
    if from_title.is_some() {
        return from_title;
    }
    BRANCH_NUMBER_RE
        .captures(head_ref)
        .and_then(|caps| caps[1].parse().ok())
}

/// True if the PR head ref names `issue-<N>` or its title names `#<N>`.
///
/// A title ending in `(#<M>)` links only issue M; other `#` references in it
/// are ignored. Matches are token-bounded: `issue-1` does not match `issue-12`.
pub fn pr_matches_issue(pr: &PullRequest, issue_number: u64) -> bool {
    if contains_number_token(&pr.head_ref, "issue-", issue_number) {
        return true;
    }
    match title_marker(&pr.title) {
        Some(marked) => marked == issue_number,
        None => contains_number_token(&pr.title, "#", issue_number),
    }
}

fn title_marker(title: &str) -> Option<u64> {
    TITLE_MARKER_RE
        .captures(title)
        .and_then(|caps| caps[1].parse().ok())
}

fn contains_number_token(haystack: &str, prefix: &str, number: u64) -> bool {
    let needle = format!("{prefix}{number}");
    haystack.match_indices(&needle).any(|(idx, _)| {
        !haystack[idx + needle.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    })
}
