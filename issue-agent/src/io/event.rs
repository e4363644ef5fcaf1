//! PR number discovery from a CI event payload (`GITHUB_EVENT_PATH`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(default)]
    pull_request: Option<EventPullRequest>,
}

#[derive(Debug, Deserialize)]
struct EventPullRequest {
    number: u64,
}

/// Read `pull_request.number` from an event payload file.
///
/// Returns `Ok(None)` for payloads of events that carry no pull request.
pub fn pull_request_number(path: &Path) -> Result<Option<u64>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read event {}", path.display()))?;
    let payload: EventPayload =
        serde_json::from_str(&contents).with_context(|| format!("parse event {}", path.display()))?;
    let number = payload.pull_request.map(|pr| pr.number);
    debug!(?number, "event payload read");
    Ok(number)
}
