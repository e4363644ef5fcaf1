//! Reviewer verdict protocol.
//!
//! The engine inspects a pull request's CI status and changed files, decides a
//! verdict with the ordered rules in [`crate::core::verdict`], and publishes it
//! as a `STATUS:` comment (read back by the next resolution run) plus a formal
//! review.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::issue_ref::extract_issue_number;
use crate::core::tags::{review_body, verdict_comment};
use crate::core::types::{Issue, PullRequest};
use crate::core::verdict::{
    ReviewDecision, artifact_rule, ci_rule, interpret_response, unconfigured_decision,
};
use crate::io::llm::TextCompletion;
use crate::io::prompt::{PromptEngine, REVIEW_SYSTEM_PROMPT, ReviewPromptInput};
use crate::io::tracker::Tracker;

/// Outcome of one review invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewReport {
    pub pr_number: u64,
    /// Issue linked through the PR title or branch, if any.
    pub issue_number: Option<u64>,
    pub decision: ReviewDecision,
    /// False when the verdict comment was posted but the formal review failed.
    pub review_submitted: bool,
}

pub struct ReviewVerdictEngine<'a, T: Tracker, L: TextCompletion> {
    tracker: &'a T,
    llm: &'a L,
    prompts: PromptEngine,
    diff_limit_bytes: usize,
}

impl<'a, T: Tracker, L: TextCompletion> ReviewVerdictEngine<'a, T, L> {
    pub fn new(tracker: &'a T, llm: &'a L, diff_limit_bytes: usize) -> Result<Self> {
        Ok(Self {
            tracker,
            llm,
            prompts: PromptEngine::new()?,
            diff_limit_bytes,
        })
    }

    /// Decide and publish a verdict for `pr_number`.
    #[instrument(skip_all, fields(pr_number))]
    pub fn review(&self, pr_number: u64, ci_status: &str) -> Result<ReviewReport> {
        let pr = self
            .tracker
            .get_pull_request(pr_number)
            .with_context(|| format!("fetch pull request #{pr_number}"))?;
        let issue_number = extract_issue_number(&pr.title, &pr.head_ref);
        let decision = self.decide(&pr, ci_status)?;
        let review_submitted = self.publish(pr_number, &decision)?;
        Ok(ReviewReport {
            pr_number,
            issue_number,
            decision,
            review_submitted,
        })
    }

    /// Apply the rules in order; the first one that fires decides.
    pub fn decide(&self, pr: &PullRequest, ci_status: &str) -> Result<ReviewDecision> {
        if let Some(decision) = ci_rule(ci_status) {
            info!(ci_status, "CI rule requested changes");
            return Ok(decision);
        }

        // Files are only needed by the artifact rule and the prompt.
        let issue_number = extract_issue_number(&pr.title, &pr.head_ref);
        if issue_number.is_none() && !self.llm.is_configured() {
            return Ok(unconfigured_decision());
        }

        let files = self
            .tracker
            .list_pull_request_files(pr.number)
            .with_context(|| format!("list files of pull request #{}", pr.number))?;
        let names: Vec<String> = files.iter().map(|f| f.filename.clone()).collect();
        if let Some(decision) = artifact_rule(issue_number, &names) {
            info!(issue_number, "artifact rule requested changes");
            return Ok(decision);
        }

        if !self.llm.is_configured() {
            return Ok(unconfigured_decision());
        }

        let issue = issue_number.and_then(|n| self.linked_issue(n));
        let (issue_title, issue_body) = issue
            .as_ref()
            .map_or(("", ""), |i| (i.title.as_str(), i.body.as_str()));
        let prompt = self.prompts.render_review(&ReviewPromptInput {
            pr,
            issue_title,
            issue_body,
            files: &files,
            ci_status,
            diff_limit_bytes: self.diff_limit_bytes,
        })?;
        let response = self.llm.complete(REVIEW_SYSTEM_PROMPT, &prompt);
        Ok(interpret_response(response.as_deref()))
    }

    /// Post the verdict comment, then submit the formal review.
    ///
    /// The comment is the durable record, so only its failure propagates.
    /// Returns whether the formal review was accepted.
    pub fn publish(&self, pr_number: u64, decision: &ReviewDecision) -> Result<bool> {
        self.tracker
            .create_comment(pr_number, &verdict_comment(decision.verdict, &decision.message))
            .context("post verdict comment")?;
        let submitted = match self.tracker.create_review(
            pr_number,
            decision.verdict,
            &review_body(decision.verdict, &decision.message),
        ) {
            Ok(()) => true,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "formal review submission failed");
                false
            }
        };
        info!(verdict = %decision.verdict, review_submitted = submitted, "verdict published");
        Ok(submitted)
    }

    fn linked_issue(&self, number: u64) -> Option<Issue> {
        match self.tracker.get_issue(number) {
            Ok(issue) => Some(issue),
            Err(err) => {
                warn!(issue_number = number, err = %format!("{err:#}"), "linked issue unavailable");
                None
            }
        }
    }
}
