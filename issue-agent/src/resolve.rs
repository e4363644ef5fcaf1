//! The issue-resolution step.
//!
//! One call to [`IssueResolver::resolve`] performs one iteration for one issue:
//!
//! 1. Read tracker history: linked PR, latest reviewer comment, iteration count.
//! 2. Gate: stop if the PR is approved or the iteration cap is reached.
//! 3. Prepare the working copy on `agent/issue-<N>`.
//! 4. Apply a generated patch, or the deterministic fallback.
//! 5. Commit and push if dirty; upsert the PR; record `Iteration: <N+1>`.
//!
//! Steps 1-2 never mutate anything. All durable state lives in the tracker.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::issue_ref::branch_name;
use crate::core::iteration::{Gate, current_iteration, evaluate_gate};
use crate::core::tags::parse_verdict;
use crate::core::types::{AgentContext, PullRequest};
use crate::fallback::{self, FallbackReport};
use crate::io::config::AgentConfig;
use crate::io::llm::TextCompletion;
use crate::io::tracker::Tracker;
use crate::patch::{PatchGenerator, PatchOutcome};
use crate::reconcile::{PullRequestReconciler, pr_body, pr_title};
use crate::workspace::WorkspaceManager;

/// Result of one resolution step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The linked PR carries an approving verdict; nothing was touched.
    AlreadyApproved { pr_number: u64 },
    /// The iteration cap is reached; nothing was touched.
    MaxIterationsReached { iteration: u32, max_iterations: u32 },
    Updated(ResolveReport),
}

/// What a proceeding resolution step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveReport {
    pub issue_number: u64,
    pub branch: String,
    /// Iteration recorded by this run.
    pub iteration: u32,
    pub patch: PatchOutcome,
    /// Present when the fallback ran.
    pub fallback: Option<FallbackReport>,
    /// False when the tree was clean and no commit was made.
    pub committed: bool,
    pub pull_request: PullRequest,
}

pub struct IssueResolver<'a, T: Tracker, L: TextCompletion> {
    cfg: &'a AgentConfig,
    tracker: &'a T,
    llm: &'a L,
    cwd: PathBuf,
}

impl<'a, T: Tracker, L: TextCompletion> IssueResolver<'a, T, L> {
    /// `cwd` is reused as the working copy when it is one.
    pub fn new(cfg: &'a AgentConfig, tracker: &'a T, llm: &'a L, cwd: impl Into<PathBuf>) -> Self {
        Self {
            cfg,
            tracker,
            llm,
            cwd: cwd.into(),
        }
    }

    pub fn tracker(&self) -> &'a T {
        self.tracker
    }

    #[instrument(skip_all, fields(issue_number))]
    pub fn resolve(&self, issue_number: u64) -> Result<ResolveOutcome> {
        let reconciler = PullRequestReconciler::new(self.tracker);
        let issue = self
            .tracker
            .get_issue(issue_number)
            .with_context(|| format!("fetch issue #{issue_number}"))?;

        let linked = reconciler.find_for_issue(issue_number);
        let feedback = linked.as_ref().and_then(|pr| {
            reconciler.latest_reviewer_comment(pr.number, self.cfg.reviewer_login.as_deref())
        });
        let verdict = feedback.as_ref().and_then(|c| parse_verdict(&c.body));

        let bot_login = self
            .tracker
            .authenticated_login()
            .context("resolve agent account")?;
        let history = self
            .tracker
            .list_comments(issue_number)
            .with_context(|| format!("list comments on issue #{issue_number}"))?;
        let iteration = current_iteration(&history, &bot_login);

        match evaluate_gate(verdict, iteration, self.cfg.max_iterations) {
            Gate::Approved => {
                let pr_number = linked.map(|pr| pr.number).unwrap_or_default();
                info!(pr_number, "pull request already approved; nothing to do");
                return Ok(ResolveOutcome::AlreadyApproved { pr_number });
            }
            Gate::CapReached {
                iteration,
                max_iterations,
            } => {
                info!(iteration, max_iterations, "max iterations reached; nothing to do");
                return Ok(ResolveOutcome::MaxIterationsReached {
                    iteration,
                    max_iterations,
                });
            }
            Gate::Proceed { .. } => {}
        }

        let ctx = AgentContext::from_issue(&issue, feedback.as_ref().map(|c| c.body.as_str()));
        let workspace = WorkspaceManager::ensure_repository(self.cfg, &self.cwd)?;
        let branch = branch_name(issue_number);
        workspace.checkout_branch(&branch)?;

        let patch = PatchGenerator::new(self.llm)?.generate(&ctx, workspace.git())?;
        let fallback = if patch.applied() {
            None
        } else {
            info!(reason = patch.as_str(), "applying fallback change");
            Some(fallback::apply(&ctx, workspace.workdir())?)
        };

        let committed = workspace.commit_and_push(&branch, issue_number)?;
        let next = iteration + 1;
        let pull_request = reconciler.create_or_update(
            &self.cfg.base_branch,
            &branch,
            &pr_title(&issue),
            &pr_body(issue_number, next),
        )?;
        info!(pr = pull_request.number, url = %pull_request.html_url, "pull request ready");
        reconciler.record_iteration(issue_number, &pull_request, next)?;

        Ok(ResolveOutcome::Updated(ResolveReport {
            issue_number,
            branch,
            iteration: next,
            patch,
            fallback,
            committed,
            pull_request,
        }))
    }
}
