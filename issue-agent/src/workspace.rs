//! Working-copy management: locate or clone the repository, put the issue
//! branch in a known state, and publish changes.
//!
//! Branch handling is idempotent across runs. A branch that already exists
//! on the remote is always reset to the remote tip so stale local commits
//! never stack onto new remote history.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::io::config::{AgentConfig, GitAuthor};
use crate::io::git::{Git, redact_url};

/// Owns the local working copy for one target repository.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    git: Git,
    base_branch: String,
    author: GitAuthor,
}

impl WorkspaceManager {
    /// Wrap an existing working copy without touching it.
    pub fn open(workdir: impl Into<PathBuf>, cfg: &AgentConfig) -> Self {
        Self {
            git: Git::new(workdir, cfg.git_timeout()),
            base_branch: cfg.base_branch.clone(),
            author: cfg.git_author.clone(),
        }
    }

    /// Return a usable working copy.
    ///
    /// `cwd` is reused when it is already a working copy. Otherwise a cached
    /// clone under `workdir_root` is fetched, or cloned on first use.
    #[instrument(skip_all, fields(cwd = %cwd.display()))]
    pub fn ensure_repository(cfg: &AgentConfig, cwd: &Path) -> Result<Self> {
        if Git::is_repository(cwd) {
            debug!("running inside a working copy, reusing it");
            return Ok(Self::open(cwd, cfg));
        }

        let cache = cache_dir(cfg)?;
        if Git::is_repository(&cache) {
            debug!(path = %cache.display(), "reusing cached clone");
            let manager = Self::open(&cache, cfg);
            manager.git.fetch()?;
            return Ok(manager);
        }

        let parent = cache
            .parent()
            .ok_or_else(|| anyhow!("cache path has no parent: {}", cache.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create cache directory {}", parent.display()))?;
        let url = clone_url(cfg)?;
        info!(url = %redact_url(&url), path = %cache.display(), "cloning repository");
        Git::clone_into(&url, &cache, cfg.git_timeout())?;
        Ok(Self::open(&cache, cfg))
    }

    pub fn workdir(&self) -> &Path {
        self.git.workdir()
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    /// Check out `branch` in a state consistent with the remote.
    ///
    /// - local branch exists: check it out, hard-reset to `origin/<branch>`
    ///   if that exists, else keep local state;
    /// - only the remote branch exists: create the local branch from it;
    /// - neither: branch off `origin/<base>` (or local `<base>`).
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        self.git.fetch()?;
        let remote = format!("origin/{branch}");
        let remote_exists = self.git.remote_branch_exists(branch)?;

        if self.git.branch_exists(branch)? {
            self.git.checkout(branch)?;
            if remote_exists {
                self.git.reset_hard(&remote)?;
                debug!("reset local branch to remote tip");
            } else {
                warn!(branch, "remote branch missing; local state is authoritative");
            }
            return Ok(());
        }

        if remote_exists {
            info!(branch, "resuming branch from remote");
            return self.git.checkout_new(branch, &remote);
        }

        let start = if self.git.remote_branch_exists(&self.base_branch)? {
            format!("origin/{}", self.base_branch)
        } else {
            self.base_branch.clone()
        };
        info!(branch, start = %start, "creating branch");
        self.git.checkout_new(branch, &start)
    }

    /// Stage, commit and force-push all changes.
    ///
    /// Returns `Ok(false)` without committing when the tree is clean, so
    /// re-runs that produce identical content create no empty commits.
    #[instrument(skip_all, fields(branch, issue_number))]
    pub fn commit_and_push(&self, branch: &str, issue_number: u64) -> Result<bool> {
        if !self.git.is_dirty()? {
            info!("no changes detected; skipping commit");
            return Ok(false);
        }
        self.git.add_all()?;
        self.git.commit(&commit_message(issue_number), &self.author)?;
        self.git.push_force(branch)?;
        info!("changes committed and pushed");
        Ok(true)
    }
}

pub fn commit_message(issue_number: u64) -> String {
    format!("Agent update for issue #{issue_number}")
}

/// Clone URL: the configured override, or an authenticated GitHub URL.
pub fn clone_url(cfg: &AgentConfig) -> Result<String> {
    if let Some(url) = &cfg.clone_url {
        return Ok(url.clone());
    }
    let (owner, name) = cfg.owner_and_name()?;
    let mut url = Url::parse(&format!("https://github.com/{owner}/{name}.git"))
        .context("build clone url")?;
    url.set_username("x-access-token")
        .map_err(|()| anyhow!("clone url cannot carry credentials"))?;
    url.set_password(Some(cfg.token.trim()))
        .map_err(|()| anyhow!("clone url cannot carry credentials"))?;
    Ok(url.to_string())
}

/// Per-repository cache location: `<root>/<owner>-<name>/workspace`.
pub fn cache_dir(cfg: &AgentConfig) -> Result<PathBuf> {
    let (owner, name) = cfg.owner_and_name()?;
    Ok(cfg
        .workdir_root
        .join(format!("{owner}-{name}"))
        .join("workspace"))
}
