//! Pull request reconciliation: find the PR tied to an issue, upsert it by
//! head ref, and record the iteration on the issue.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::selection::{latest_reviewer_comment, pull_request_for_head, pull_request_for_issue};
use crate::core::tags::iteration_line;
use crate::core::types::{Comment, Issue, PullRequest};
use crate::io::tracker::{NewPullRequest, Tracker};

pub struct PullRequestReconciler<'a, T: Tracker> {
    tracker: &'a T,
}

impl<'a, T: Tracker> PullRequestReconciler<'a, T> {
    pub fn new(tracker: &'a T) -> Self {
        Self { tracker }
    }

    /// The open PR treated as "the" PR for an issue. Lookup failures count as
    /// no PR.
    #[instrument(skip_all, fields(issue_number))]
    pub fn find_for_issue(&self, issue_number: u64) -> Option<PullRequest> {
        match self.tracker.list_open_pull_requests(None) {
            Ok(prs) => {
                let found = pull_request_for_issue(&prs, issue_number).cloned();
                debug!(pr = ?found.as_ref().map(|pr| pr.number), "pull request lookup");
                found
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "listing pull requests failed; assuming none");
                None
            }
        }
    }

    /// Newest reviewer comment on a PR. Lookup failures count as no verdict.
    #[instrument(skip_all, fields(pr_number))]
    pub fn latest_reviewer_comment(
        &self,
        pr_number: u64,
        reviewer_login: Option<&str>,
    ) -> Option<Comment> {
        match self.tracker.list_comments(pr_number) {
            Ok(comments) => latest_reviewer_comment(&comments, reviewer_login).cloned(),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "listing PR comments failed; assuming no verdict");
                None
            }
        }
    }

    /// Update the open PR whose head is exactly `head`, or create one.
    ///
    /// A failed listing propagates rather than risking a duplicate PR.
    #[instrument(skip_all, fields(head))]
    pub fn create_or_update(
        &self,
        base: &str,
        head: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let open = self
            .tracker
            .list_open_pull_requests(Some(head))
            .context("list pull requests for head")?;
        if let Some(existing) = pull_request_for_head(&open, head) {
            info!(pr = existing.number, "updating existing pull request");
            return self
                .tracker
                .update_pull_request(existing.number, title, body)
                .context("update pull request");
        }
        info!("creating pull request");
        self.tracker
            .create_pull_request(&NewPullRequest {
                base: base.to_string(),
                head: head.to_string(),
                title: title.to_string(),
                body: body.to_string(),
            })
            .context("create pull request")
    }

    /// Post the iteration record consumed by later runs.
    pub fn record_iteration(&self, issue_number: u64, pr: &PullRequest, iteration: u32) -> Result<Comment> {
        self.tracker
            .create_comment(issue_number, &iteration_comment(&pr.html_url, iteration))
            .context("post iteration comment")
    }
}

pub fn pr_title(issue: &Issue) -> String {
    format!("Agent: {} (#{})", issue.title, issue.number)
}

pub fn pr_body(issue_number: u64, iteration: u32) -> String {
    format!(
        "Implements issue #{issue_number}.\n\n{}\n\nAgent-generated PR. Reviewer feedback will trigger another iteration if needed.",
        iteration_line(iteration)
    )
}

pub fn iteration_comment(pr_url: &str, iteration: u32) -> String {
    format!(
        "Code Agent created/updated PR: {pr_url}\n\n{}",
        iteration_line(iteration)
    )
}
