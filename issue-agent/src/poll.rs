//! Batch polling over labeled issues.
//!
//! Each cycle lists open issues carrying the agent label and runs one
//! resolution step per issue. A failing issue is logged and skipped; the loop
//! itself only ends when the cycle bound is reached.

use std::thread;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::io::llm::TextCompletion;
use crate::io::tracker::Tracker;
use crate::resolve::{IssueResolver, ResolveOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// `None` polls forever.
    pub max_cycles: Option<u64>,
    /// Sleep between cycles; zero disables it.
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub cycles: u64,
    /// Issues whose resolution step returned without error.
    pub processed: u64,
    pub failed: u64,
}

/// Run resolution steps over every eligible issue until the cycle bound.
#[instrument(skip_all, fields(label))]
pub fn poll<T: Tracker, L: TextCompletion>(
    resolver: &IssueResolver<'_, T, L>,
    label: &str,
    options: PollOptions,
) -> PollSummary {
    let mut summary = PollSummary::default();
    loop {
        if options.max_cycles.is_some_and(|max| summary.cycles >= max) {
            break;
        }
        summary.cycles += 1;
        run_cycle(resolver, label, &mut summary);

        let more = options.max_cycles.is_none_or(|max| summary.cycles < max);
        if more && !options.interval.is_zero() {
            thread::sleep(options.interval);
        }
    }
    info!(
        cycles = summary.cycles,
        processed = summary.processed,
        failed = summary.failed,
        "polling finished"
    );
    summary
}

fn run_cycle<T: Tracker, L: TextCompletion>(
    resolver: &IssueResolver<'_, T, L>,
    label: &str,
    summary: &mut PollSummary,
) {
    let issues = match resolver.tracker().list_open_issues(label) {
        Ok(issues) => issues,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "listing issues failed; skipping cycle");
            return;
        }
    };
    info!(cycle = summary.cycles, issues = issues.len(), "poll cycle");
    for issue in issues {
        match resolver.resolve(issue.number) {
            Ok(outcome) => {
                summary.processed += 1;
                if let ResolveOutcome::Updated(report) = outcome {
                    info!(
                        issue_number = issue.number,
                        iteration = report.iteration,
                        "issue iteration recorded"
                    );
                }
            }
            Err(err) => {
                summary.failed += 1;
                error!(issue_number = issue.number, err = %format!("{err:#}"), "issue processing failed");
            }
        }
    }
}
