//! Tie-break policies for picking one canonical entity from host listings.
//!
//! Hosts return lists in an order they choose. Every "which one counts"
//! decision goes through this module so the answer never depends on that
//! order:
//!
//! - PR for an issue: highest PR number among matches.
//! - Newest comment: latest `created_at`, then highest comment id.

use std::cmp::Reverse;

use crate::core::issue_ref::pr_matches_issue;
use crate::core::tags::parse_verdict;
use crate::core::types::{Comment, PullRequest};

/// Pick the PR treated as "the" PR for an issue.
pub fn pull_request_for_issue(prs: &[PullRequest], issue_number: u64) -> Option<&PullRequest> {
    prs.iter()
        .filter(|pr| pr_matches_issue(pr, issue_number))
        .max_by_key(|pr| pr.number)
}

/// Pick the open PR whose head ref equals `head` exactly.
pub fn pull_request_for_head<'a>(prs: &'a [PullRequest], head: &str) -> Option<&'a PullRequest> {
    prs.iter()
        .filter(|pr| pr.head_ref == head)
        .max_by_key(|pr| pr.number)
}

/// Comments ordered newest first.
pub fn newest_first(comments: &[Comment]) -> Vec<&Comment> {
    let mut ordered: Vec<&Comment> = comments.iter().collect();
    ordered.sort_by_key(|c| Reverse((c.created_at.as_str(), c.id)));
    ordered
}

/// Latest reviewer comment on a PR.
///
/// With a reviewer login, only that account's comments count (newest wins,
/// whatever it says). Without one, the newest comment carrying a `STATUS:`
/// tag wins.
pub fn latest_reviewer_comment<'a>(
    comments: &'a [Comment],
    reviewer_login: Option<&str>,
) -> Option<&'a Comment> {
    newest_first(comments)
        .into_iter()
        .find(|comment| match reviewer_login {
            Some(login) => comment.author == login,
            None => parse_verdict(&comment.body).is_some(),
        })
}
