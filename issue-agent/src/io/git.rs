//! Git adapter for the agent's working copy.
//!
//! A small, explicit wrapper around `git` subprocess calls. Every command runs
//! with a timeout and without interactive credential prompts. URLs carrying
//! credentials are redacted before they reach logs or error messages.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};
use url::Url;

use crate::io::config::GitAuthor;
use crate::io::process::{ProcessOutput, run_with_timeout};

const OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Clone `url` into `dest` and return a wrapper for the new working copy.
    #[instrument(skip_all, fields(url = %redact_url(url), dest = %dest.display()))]
    pub fn clone_into(url: &str, dest: &Path, timeout: Duration) -> Result<Self> {
        let parent = dest
            .parent()
            .ok_or_else(|| anyhow!("clone destination has no parent: {}", dest.display()))?;
        let dest_arg = dest.to_string_lossy().into_owned();
        let git = Git::new(parent, timeout);
        git.run_checked_redacted(&["clone", url, &dest_arg], url)?;
        debug!("clone complete");
        Ok(Git::new(dest, timeout))
    }

    /// True if `dir` is the top of a working copy.
    pub fn is_repository(dir: &Path) -> bool {
        dir.join(".git").exists()
    }

    #[instrument(skip_all)]
    pub fn fetch(&self) -> Result<()> {
        self.run_checked(&["fetch", "--prune", "origin"])?;
        Ok(())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        self.ref_exists(&format!("refs/heads/{branch}"))
    }

    /// True if `origin/<branch>` is known locally (after a fetch).
    pub fn remote_branch_exists(&self, branch: &str) -> Result<bool> {
        self.ref_exists(&format!("refs/remotes/origin/{branch}"))
    }

    #[instrument(skip_all, fields(branch))]
    pub fn checkout(&self, branch: &str) -> Result<()> {
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Create `branch` at `start_point` and check it out.
    #[instrument(skip_all, fields(branch, start_point))]
    pub fn checkout_new(&self, branch: &str, start_point: &str) -> Result<()> {
        self.run_checked(&["checkout", "-b", branch, start_point])?;
        Ok(())
    }

    #[instrument(skip_all, fields(target))]
    pub fn reset_hard(&self, target: &str) -> Result<()> {
        self.run_checked(&["reset", "--hard", target])?;
        Ok(())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_checked(&["status", "--porcelain=v1", "-uall"])?;
        out.stdout_text()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_status_line)
            .collect()
    }

    /// True if the working tree has any change, untracked files included.
    pub fn is_dirty(&self) -> Result<bool> {
        Ok(!self.status_porcelain()?.is_empty())
    }

    /// Stage everything, untracked files included (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Commit staged changes as `author`.
    #[instrument(skip_all)]
    pub fn commit(&self, message: &str, author: &GitAuthor) -> Result<()> {
        let name = format!("user.name={}", author.name);
        let email = format!("user.email={}", author.email);
        self.run_checked(&["-c", &name, "-c", &email, "commit", "-m", message])?;
        Ok(())
    }

    /// Force-push `branch` to origin and set it as upstream.
    #[instrument(skip_all, fields(branch))]
    pub fn push_force(&self, branch: &str) -> Result<()> {
        self.run_checked(&["push", "--force", "-u", "origin", branch])?;
        Ok(())
    }

    /// Apply a unified diff from memory, tolerating whitespace differences.
    ///
    /// Returns `Ok(false)` when git rejects the patch; the tree is left
    /// untouched in that case since `git apply` is all-or-nothing.
    #[instrument(skip_all, fields(diff_bytes = diff.len()))]
    pub fn apply_patch(&self, diff: &str) -> Result<bool> {
        let out = self.run_raw(
            &["apply", "--whitespace=nowarn", "--ignore-whitespace", "-"],
            Some(diff.as_bytes()),
        )?;
        if out.success() {
            return Ok(true);
        }
        debug!(stderr = %out.stderr_text().trim(), "git apply rejected patch");
        Ok(false)
    }

    fn ref_exists(&self, full_ref: &str) -> Result<bool> {
        let out = self.run_raw(&["show-ref", "--verify", "--quiet", full_ref], None)?;
        Ok(out.success())
    }

    fn run_checked(&self, args: &[&str]) -> Result<ProcessOutput> {
        let out = self.run_raw(args, None)?;
        if !out.success() {
            return Err(command_failure(&args.join(" "), &out));
        }
        Ok(out)
    }

    /// Like `run_checked`, but never lets `secret_url` appear in the error.
    fn run_checked_redacted(&self, args: &[&str], secret_url: &str) -> Result<ProcessOutput> {
        let out = self.run_raw(args, None)?;
        if !out.success() {
            let redacted = redact_url(secret_url);
            let shown = args.join(" ").replace(secret_url, &redacted);
            let err = command_failure(&shown, &out);
            return Err(anyhow!(err.to_string().replace(secret_url, &redacted)));
        }
        Ok(out)
    }

    fn run_raw(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<ProcessOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0");
        let subcommand = args.first().copied().unwrap_or_default();
        debug!(subcommand, "running git");
        run_with_timeout(cmd, stdin, self.timeout, OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run git {subcommand}"))
    }
}

fn command_failure(shown_args: &str, out: &ProcessOutput) -> anyhow::Error {
    if out.timed_out {
        return anyhow!("git {shown_args} timed out");
    }
    anyhow!("git {shown_args} failed: {}", out.stderr_text().trim())
}

/// Replace any userinfo in `raw` with `***`. Non-URL inputs pass through.
pub fn redact_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if url.username().is_empty() && url.password().is_none() {
        return raw.to_string();
    }
    // Only fails for cannot-be-a-base URLs, which carry no credentials.
    let _ = url.set_username("***");
    let _ = url.set_password(None);
    url.to_string()
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let path = line[3..].trim();
    let path = path.split_once(" -> ").map_or(path, |(_, new)| new.trim());
    Ok(StatusEntry {
        code,
        path: path.to_string(),
    })
}
