//! Generative patch production.
//!
//! The generator asks the text service for a unified diff and applies it to
//! the working copy. Anything short of a clean application is reported as a
//! non-applied outcome so the caller can fall back; none of it is an error.

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::core::types::AgentContext;
use crate::io::git::Git;
use crate::io::llm::TextCompletion;
use crate::io::prompt::{PATCH_SYSTEM_PROMPT, PromptEngine};

const DIFF_MARKER: &str = "diff --git";

/// What happened to the generative patch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    Unconfigured,
    /// No text, or only whitespace.
    NoResponse,
    /// Text without a `diff --git` header; never handed to git.
    NotADiff,
    /// git rejected the diff; the working tree is unchanged.
    ApplyFailed,
}

impl PatchOutcome {
    pub fn applied(self) -> bool {
        self == PatchOutcome::Applied
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatchOutcome::Applied => "applied",
            PatchOutcome::Unconfigured => "unconfigured",
            PatchOutcome::NoResponse => "no-response",
            PatchOutcome::NotADiff => "not-a-diff",
            PatchOutcome::ApplyFailed => "apply-failed",
        }
    }
}

pub struct PatchGenerator<'a, L: TextCompletion> {
    llm: &'a L,
    prompts: PromptEngine,
}

impl<'a, L: TextCompletion> PatchGenerator<'a, L> {
    pub fn new(llm: &'a L) -> Result<Self> {
        Ok(Self {
            llm,
            prompts: PromptEngine::new()?,
        })
    }

    /// Request a diff for `ctx` and apply it to `git`'s working tree.
    #[instrument(skip_all, fields(issue_number = ctx.issue_number))]
    pub fn generate(&self, ctx: &AgentContext, git: &Git) -> Result<PatchOutcome> {
        if !self.llm.is_configured() {
            debug!("generative service unconfigured");
            return Ok(PatchOutcome::Unconfigured);
        }
        let prompt = self.prompts.render_patch(ctx)?;
        let Some(response) = self.llm.complete(PATCH_SYSTEM_PROMPT, &prompt) else {
            return Ok(PatchOutcome::NoResponse);
        };
        if response.trim().is_empty() {
            return Ok(PatchOutcome::NoResponse);
        }
        let Some(diff) = candidate_diff(&response) else {
            info!("response is not a unified diff");
            return Ok(PatchOutcome::NotADiff);
        };
        if git.apply_patch(&diff)? {
            info!(diff_bytes = diff.len(), "generated patch applied");
            Ok(PatchOutcome::Applied)
        } else {
            info!("generated patch did not apply");
            Ok(PatchOutcome::ApplyFailed)
        }
    }
}

/// Extract an applicable diff from a model reply.
///
/// Replies without a `diff --git` header are rejected. A diff wrapped in a
/// Markdown code fence is unwrapped. The result always ends with a newline.
pub fn candidate_diff(text: &str) -> Option<String> {
    let text = text.trim();
    if !text.contains(DIFF_MARKER) {
        return None;
    }
    let body = unfence(text).unwrap_or(text).trim_start_matches('\n');
    let mut diff = body.trim_end().to_string();
    diff.push('\n');
    Some(diff)
}

fn unfence(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let body_start = open + text[open..].find('\n')? + 1;
    let body_end = text[body_start..]
        .find("\n```")
        .map_or(text.len(), |i| body_start + i + 1);
    let body = &text[body_start..body_end];
    body.contains(DIFF_MARKER).then_some(body)
}
