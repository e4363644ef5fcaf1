//! Deterministic fallback change.
//!
//! Runs when no generated patch was applied. It always writes the audit
//! artifact `agent_output/issue-<N>.md`, plus any file whose keyword rule
//! matches the issue text, so every run produces an observable change.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::issue_ref::artifact_path;
use crate::core::types::AgentContext;

/// Writes `path` when the issue text mentions both `hello` and `keyword`.
struct KeywordRule {
    keyword: &'static str,
    path: &'static str,
    contents: &'static str,
}

const RULES: &[KeywordRule] = &[
    KeywordRule {
        keyword: "python",
        path: "hello.py",
        contents: "print(\"Hello, world!\")\n",
    },
    KeywordRule {
        keyword: "rust",
        path: "hello.rs",
        contents: "fn main() {\n    println!(\"Hello, world!\");\n}\n",
    },
];

/// Repository-relative paths written by one fallback run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackReport {
    pub written: Vec<String>,
}

/// Apply the keyword rules, then write the artifact. I/O errors propagate.
#[instrument(skip_all, fields(issue_number = ctx.issue_number))]
pub fn apply(ctx: &AgentContext, workdir: &Path) -> Result<FallbackReport> {
    let mut written = Vec::new();
    let text = format!("{}\n{}", ctx.issue_title, ctx.issue_body).to_lowercase();
    if text.contains("hello") {
        for rule in RULES.iter().filter(|rule| text.contains(rule.keyword)) {
            write_file(workdir, rule.path, rule.contents)?;
            debug!(path = rule.path, keyword = rule.keyword, "keyword rule applied");
            written.push(rule.path.to_string());
        }
    }

    let artifact = artifact_path(ctx.issue_number);
    write_file(workdir, &artifact, &artifact_contents(ctx))?;
    written.push(artifact);

    info!(files = ?written, "fallback change written");
    Ok(FallbackReport { written })
}

/// Audit artifact body: title and body verbatim plus the agent note.
pub fn artifact_contents(ctx: &AgentContext) -> String {
    format!(
        "# Issue {}\n\n## Title\n{}\n\n## Body\n{}\n\n## Agent Note\nLLM failed or patch not produced; fallback rules applied.\n",
        ctx.issue_number, ctx.issue_title, ctx.issue_body
    )
}

fn write_file(workdir: &Path, relative: &str, contents: &str) -> Result<()> {
    let path = workdir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
}
