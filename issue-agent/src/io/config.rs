//! Agent configuration: built-in defaults, an optional TOML file, then the
//! environment, validated once after layering.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::retry::RetryPolicy;

/// A fatal configuration problem, reported before any work starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting has no value. Names the env variables that supply it.
    Missing(&'static str),
    /// A setting has a value that cannot be used.
    Invalid { key: String, message: String },
    /// The config file could not be read or parsed.
    File { path: PathBuf, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing required setting {key}"),
            ConfigError::Invalid { key, message } => write!(f, "invalid {key}: {message}"),
            ConfigError::File { path, message } => {
                write!(f, "config file {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.into(),
    }
}

/// Supported generative text providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Yandex,
    Anthropic,
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "yandex" => Ok(Provider::Yandex),
            "anthropic" => Ok(Provider::Anthropic),
            other => Err(invalid(
                "LLM_PROVIDER",
                format!("unknown provider '{other}' (expected openai, yandex or anthropic)"),
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl LlmConfig {
    /// Provider and key, or `None` when the service is unconfigured.
    ///
    /// A provider without a key counts as unconfigured.
    pub fn active(&self) -> Result<Option<(Provider, &str)>, ConfigError> {
        let Some(name) = self.provider.as_deref() else {
            return Ok(None);
        };
        let provider = name.parse::<Provider>()?;
        Ok(self.api_key.as_deref().map(|key| (provider, key)))
    }
}

/// Identity used for agent commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for GitAuthor {
    fn default() -> Self {
        Self {
            name: "issue-agent".to_string(),
            email: "issue-agent@users.noreply.github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Tracker API token. Never logged.
    pub token: String,
    /// Target repository, `owner/name`.
    pub repository: String,
    pub base_branch: String,
    /// Label selecting issues eligible for polling.
    pub agent_label: String,
    /// Reviewer account; enables strict author-matched verdict lookup.
    pub reviewer_login: Option<String>,
    pub max_iterations: u32,
    /// Single-run issue number.
    pub issue_number: Option<u64>,
    /// CI status handed to the review entry point.
    pub ci_status: String,
    pub pr_number: Option<u64>,
    pub api_url: String,
    /// Overrides the authenticated clone URL derived from `repository`.
    pub clone_url: Option<String>,
    /// Root for cached clones when not running inside a working copy.
    pub workdir_root: PathBuf,
    pub http_timeout_secs: u64,
    pub git_timeout_secs: u64,
    pub review_diff_limit_bytes: usize,
    pub poll_interval_secs: u64,
    pub llm: LlmConfig,
    pub retry: RetryPolicy,
    pub git_author: GitAuthor,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            repository: String::new(),
            base_branch: "main".to_string(),
            agent_label: "agent".to_string(),
            reviewer_login: None,
            max_iterations: 3,
            issue_number: None,
            ci_status: "success".to_string(),
            pr_number: None,
            api_url: "https://api.github.com".to_string(),
            clone_url: None,
            workdir_root: std::env::temp_dir().join("issue-agent"),
            http_timeout_secs: 60,
            git_timeout_secs: 600,
            review_diff_limit_bytes: 60_000,
            poll_interval_secs: 0,
            llm: LlmConfig::default(),
            retry: RetryPolicy::default(),
            git_author: GitAuthor::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::Missing("GITHUB_TOKEN (or TOKEN)"));
        }
        if self.repository.trim().is_empty() {
            return Err(ConfigError::Missing("GITHUB_REPOSITORY (or REPO)"));
        }
        self.owner_and_name()?;
        if self.max_iterations == 0 {
            return Err(invalid("MAX_ITERATIONS", "must be > 0"));
        }
        if self.http_timeout_secs == 0 {
            return Err(invalid("HTTP_TIMEOUT_SECS", "must be > 0"));
        }
        if self.git_timeout_secs == 0 {
            return Err(invalid("GIT_TIMEOUT_SECS", "must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("RETRY_MAX_ATTEMPTS", "must be > 0"));
        }
        if self.base_branch.trim().is_empty() {
            return Err(invalid("BASE_BRANCH", "must not be empty"));
        }
        self.llm.active()?;
        Ok(())
    }

    /// Split `repository` into owner and name.
    pub fn owner_and_name(&self) -> Result<(&str, &str), ConfigError> {
        match self.repository.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok((owner, name))
            }
            _ => Err(invalid(
                "GITHUB_REPOSITORY",
                format!("'{}' is not of the form owner/name", self.repository),
            )),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Load configuration from an optional TOML file and the process environment.
pub fn load_config(path: Option<&Path>) -> Result<AgentConfig> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Load configuration with an injectable environment lookup.
///
/// A missing file yields defaults. Empty environment values count as unset.
pub fn load_config_with(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<AgentConfig> {
    let mut cfg = match path {
        Some(path) => read_file(path)?,
        None => AgentConfig::default(),
    };
    let lookup = |key: &str| env(key).filter(|value| !value.trim().is_empty());
    apply_env(&mut cfg, &lookup)?;
    cfg.validate()?;
    debug!(
        repository = %cfg.repository,
        base_branch = %cfg.base_branch,
        max_iterations = cfg.max_iterations,
        llm_provider = ?cfg.llm.provider,
        "configuration loaded"
    );
    Ok(cfg)
}

fn read_file(path: &Path) -> Result<AgentConfig, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "config file missing, using defaults");
        return Ok(AgentConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::File {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::File {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn apply_env(
    cfg: &mut AgentConfig,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(token) = env("GITHUB_TOKEN").or_else(|| env("TOKEN")) {
        cfg.token = token;
    }
    if let Some(repo) = env("GITHUB_REPOSITORY").or_else(|| env("REPO")) {
        cfg.repository = repo.trim().to_string();
    }
    set_string(&mut cfg.base_branch, env("BASE_BRANCH"));
    set_string(&mut cfg.agent_label, env("AGENT_LABEL"));
    set_string(&mut cfg.ci_status, env("CI_STATUS"));
    set_string(&mut cfg.api_url, env("GITHUB_API_URL"));
    set_string(&mut cfg.git_author.name, env("GIT_AUTHOR_NAME"));
    set_string(&mut cfg.git_author.email, env("GIT_AUTHOR_EMAIL"));
    set_option(&mut cfg.reviewer_login, env("REVIEWER_BOT_LOGIN"));
    set_option(&mut cfg.clone_url, env("AGENT_CLONE_URL"));
    set_option(&mut cfg.llm.provider, env("LLM_PROVIDER"));
    set_option(&mut cfg.llm.api_key, env("LLM_API_KEY"));
    set_option(&mut cfg.llm.model, env("LLM_MODEL"));
    set_option(&mut cfg.llm.base_url, env("LLM_BASE_URL"));
    if let Some(root) = env("AGENT_WORKDIR_ROOT") {
        cfg.workdir_root = PathBuf::from(root);
    }

    set_number(&mut cfg.max_iterations, "MAX_ITERATIONS", env)?;
    set_number(&mut cfg.http_timeout_secs, "HTTP_TIMEOUT_SECS", env)?;
    set_number(&mut cfg.git_timeout_secs, "GIT_TIMEOUT_SECS", env)?;
    set_number(&mut cfg.retry.max_attempts, "RETRY_MAX_ATTEMPTS", env)?;
    set_number(&mut cfg.retry.base_delay_ms, "RETRY_BASE_DELAY_MS", env)?;
    set_number(&mut cfg.review_diff_limit_bytes, "REVIEW_DIFF_LIMIT_BYTES", env)?;
    set_number(&mut cfg.poll_interval_secs, "POLL_INTERVAL_SECS", env)?;
    if let Some(value) = env("ISSUE_NUMBER") {
        cfg.issue_number = Some(parse_number("ISSUE_NUMBER", &value)?);
    }
    if let Some(value) = env("PR_NUMBER") {
        cfg.pr_number = Some(parse_number("PR_NUMBER", &value)?);
    }
    Ok(())
}

fn set_string(slot: &mut String, value: Option<String>) {
    if let Some(value) = value {
        *slot = value.trim().to_string();
    }
}

fn set_option(slot: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        *slot = Some(value.trim().to_string());
    }
}

fn set_number<T: FromStr>(
    slot: &mut T,
    key: &str,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(value) = env(key) {
        *slot = parse_number(key, &value)?;
    }
    Ok(())
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, format!("'{value}' is not a valid number")))
}
