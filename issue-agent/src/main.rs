//! Issue-resolution agent CLI.
//!
//! Resolves labeled issues into pull requests and reviews those pull requests.
//! All durable state lives in tracker comments, so every command is safe to
//! re-run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use issue_agent::exit_codes;
use issue_agent::io::config::{AgentConfig, ConfigError, load_config};
use issue_agent::io::event;
use issue_agent::io::llm::LlmClient;
use issue_agent::io::tracker::GithubTracker;
use issue_agent::logging;
use issue_agent::poll::{PollOptions, poll};
use issue_agent::resolve::{IssueResolver, ResolveOutcome};
use issue_agent::review::ReviewVerdictEngine;

#[derive(Parser)]
#[command(
    name = "issue-agent",
    version,
    about = "Resolve tracked issues into pull requests and iterate on review"
)]
struct Cli {
    /// TOML file layered under environment variables. A missing file is ignored.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one resolution step for a single issue.
    RunOnce {
        /// Issue number; falls back to `ISSUE_NUMBER`.
        #[arg(long)]
        issue: Option<u64>,
    },
    /// Repeatedly run resolution steps over all labeled open issues.
    Poll {
        /// Stop after this many cycles (default: run forever).
        #[arg(long)]
        max_cycles: Option<u64>,
    },
    /// Decide and publish a verdict for a pull request.
    Review {
        /// PR number; falls back to the CI event payload, then `PR_NUMBER`.
        #[arg(long)]
        pr: Option<u64>,
        /// CI status to judge; falls back to `CI_STATUS`.
        #[arg(long)]
        ci_status: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init();
    let code = match run(cli) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            if err.downcast_ref::<ConfigError>().is_some() {
                exit_codes::USAGE
            } else {
                exit_codes::FAILURE
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::RunOnce { issue } => cmd_run_once(&cfg, issue),
        Command::Poll { max_cycles } => cmd_poll(&cfg, max_cycles),
        Command::Review { pr, ci_status } => cmd_review(&cfg, pr, ci_status),
    }
}

fn cmd_run_once(cfg: &AgentConfig, issue: Option<u64>) -> Result<()> {
    let issue_number = issue
        .or(cfg.issue_number)
        .ok_or(ConfigError::Missing("ISSUE_NUMBER (or --issue)"))?;
    let tracker = GithubTracker::from_config(cfg)?;
    let llm = LlmClient::from_config(cfg)?;
    let resolver = IssueResolver::new(cfg, &tracker, &llm, current_dir()?);
    match resolver.resolve(issue_number)? {
        ResolveOutcome::AlreadyApproved { .. } => println!("approved"),
        ResolveOutcome::MaxIterationsReached { .. } => println!("max-iterations"),
        ResolveOutcome::Updated(report) => println!("{}", report.pull_request.html_url),
    }
    Ok(())
}

fn cmd_poll(cfg: &AgentConfig, max_cycles: Option<u64>) -> Result<()> {
    let tracker = GithubTracker::from_config(cfg)?;
    let llm = LlmClient::from_config(cfg)?;
    let resolver = IssueResolver::new(cfg, &tracker, &llm, current_dir()?);
    let summary = poll(
        &resolver,
        &cfg.agent_label,
        PollOptions {
            max_cycles,
            interval: cfg.poll_interval(),
        },
    );
    println!(
        "cycles={} processed={} failed={}",
        summary.cycles, summary.processed, summary.failed
    );
    Ok(())
}

fn cmd_review(cfg: &AgentConfig, pr: Option<u64>, ci_status: Option<String>) -> Result<()> {
    let event_path = std::env::var_os("GITHUB_EVENT_PATH").map(PathBuf::from);
    let pr_number = discover_pr_number(pr, event_path.as_deref(), cfg.pr_number)?
        .ok_or(ConfigError::Missing("PR_NUMBER (or --pr)"))?;
    let ci_status = ci_status.unwrap_or_else(|| cfg.ci_status.clone());

    let tracker = GithubTracker::from_config(cfg)?;
    let llm = LlmClient::from_config(cfg)?;
    let engine = ReviewVerdictEngine::new(&tracker, &llm, cfg.review_diff_limit_bytes)?;
    let report = engine.review(pr_number, &ci_status)?;
    println!("{}", report.decision.verdict);
    Ok(())
}

/// `--pr`, then the event payload, then `PR_NUMBER`.
fn discover_pr_number(
    flag: Option<u64>,
    event_path: Option<&Path>,
    configured: Option<u64>,
) -> Result<Option<u64>> {
    if flag.is_some() {
        return Ok(flag);
    }
    if let Some(path) = event_path
        && path.exists()
        && let Some(number) = event::pull_request_number(path)?
    {
        return Ok(Some(number));
    }
    Ok(configured)
}

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().context("resolve current directory")
}
