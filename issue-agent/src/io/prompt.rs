//! Prompt rendering for patch generation and review.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::types::{AgentContext, PrFile, PullRequest};

const PATCH_TEMPLATE: &str = include_str!("prompts/patch.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");

pub const PATCH_SYSTEM_PROMPT: &str = "You are a senior software engineer. Output ONLY a unified diff patch that applies cleanly. If unsure, output an empty response.";

pub const REVIEW_SYSTEM_PROMPT: &str = "You are a strict code reviewer. Reply with STATUS: APPROVED or STATUS: CHANGES_REQUESTED and a short rationale.";

const NO_DIFF: &str = "No diff available.";
const TRUNCATION_MARKER: &str = "\n[diff truncated]";

/// Everything the review prompt shows the model.
#[derive(Debug, Clone)]
pub struct ReviewPromptInput<'a> {
    pub pr: &'a PullRequest,
    pub issue_title: &'a str,
    pub issue_body: &'a str,
    pub files: &'a [PrFile],
    pub ci_status: &'a str,
    /// Byte budget for the concatenated per-file diff text.
    pub diff_limit_bytes: usize,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("patch", PATCH_TEMPLATE)
            .context("load patch template")?;
        env.add_template("review", REVIEW_TEMPLATE)
            .context("load review template")?;
        Ok(Self { env })
    }

    pub fn render_patch(&self, ctx: &AgentContext) -> Result<String> {
        let template = self.env.get_template("patch")?;
        let rendered = template.render(context! {
            title => ctx.issue_title.as_str(),
            body => ctx.issue_body.as_str(),
            feedback => ctx.reviewer_feedback.as_str(),
        })?;
        Ok(rendered)
    }

    pub fn render_review(&self, input: &ReviewPromptInput<'_>) -> Result<String> {
        let template = self.env.get_template("review")?;
        let files: Vec<&str> = input.files.iter().map(|f| f.filename.as_str()).collect();
        let rendered = template.render(context! {
            pr_title => input.pr.title.as_str(),
            pr_body => input.pr.body.as_str(),
            issue_title => input.issue_title,
            issue_body => input.issue_body,
            files => files,
            diff => diff_text(input.files, input.diff_limit_bytes),
            ci_status => input.ci_status,
        })?;
        Ok(rendered)
    }
}

/// Concatenate per-file patches as `File: <name>\n<patch>` blocks, cut to `limit` bytes.
pub fn diff_text(files: &[PrFile], limit: usize) -> String {
    let blocks: Vec<String> = files
        .iter()
        .filter_map(|f| {
            f.patch
                .as_deref()
                .map(|patch| format!("File: {}\n{patch}", f.filename))
        })
        .collect();
    if blocks.is_empty() {
        return NO_DIFF.to_string();
    }
    let mut text = blocks.join("\n\n");
    if text.len() > limit {
        let mut cut = limit;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        debug!(original_bytes = text.len(), kept_bytes = cut, "truncated review diff");
        text.truncate(cut);
        text.push_str(TRUNCATION_MARKER);
    }
    text
}
