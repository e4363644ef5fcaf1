//! Iteration counting and the resolution gate.
//!
//! The iteration count is never stored anywhere except as an `Iteration: <N>`
//! tag in an agent-authored issue comment. Only comments authored by the
//! agent's own account count, so issue participants cannot spoof the counter.

use crate::core::selection::newest_first;
use crate::core::tags::parse_iteration;
use crate::core::types::{Comment, Verdict};

/// Current iteration recovered from issue comments, or `0` if none.
pub fn current_iteration(comments: &[Comment], bot_login: &str) -> u32 {
    newest_first(comments)
        .into_iter()
        .filter(|comment| comment.author == bot_login)
        .find_map(|comment| parse_iteration(&comment.body))
        .unwrap_or(0)
}

/// Decision taken before any mutation of branch, commit or PR state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Proceed; the run will record `iteration + 1`.
    Proceed { iteration: u32 },
    /// The linked PR already carries an approving verdict.
    Approved,
    /// The iteration cap has been reached.
    CapReached { iteration: u32, max_iterations: u32 },
}

/// Evaluate the gate. Approval is checked first, then the cap.
pub fn evaluate_gate(latest_verdict: Option<Verdict>, iteration: u32, max_iterations: u32) -> Gate {
    if latest_verdict == Some(Verdict::Approved) {
        return Gate::Approved;
    }
    if iteration >= max_iterations {
        return Gate::CapReached {
            iteration,
            max_iterations,
        };
    }
    Gate::Proceed { iteration }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: u64, author: &str, body: &str) -> Comment {
        Comment {
            id,
            author: author.to_string(),
            body: body.to_string(),
            created_at: format!("2026-01-01T00:00:{id:02}Z"),
        }
    }

    #[test]
    fn no_comments_means_zero() {
        assert_eq!(current_iteration(&[], "bot"), 0);
    }

    #[test]
    fn newest_bot_record_wins() {
        let comments = vec![
            comment(1, "bot", "PR: x\n\nIteration: 1"),
            comment(2, "bot", "PR: x\n\nIteration: 2"),
            comment(3, "bot", "unrelated status note"),
        ];
        assert_eq!(current_iteration(&comments, "bot"), 2);
    }

    #[test]
    fn other_authors_cannot_spoof_the_counter() {
        let comments = vec![
            comment(1, "bot", "Iteration: 1"),
            comment(2, "mallory", "Iteration: 99"),
        ];
        assert_eq!(current_iteration(&comments, "bot"), 1);
    }

    #[test]
    fn approval_wins_over_cap() {
        assert_eq!(evaluate_gate(Some(Verdict::Approved), 5, 3), Gate::Approved);
    }

    #[test]
    fn cap_applies_regardless_of_changes_requested() {
        assert_eq!(
            evaluate_gate(Some(Verdict::ChangesRequested), 3, 3),
            Gate::CapReached {
                iteration: 3,
                max_iterations: 3
            }
        );
    }

    #[test]
    fn proceeds_below_cap() {
        assert_eq!(evaluate_gate(None, 2, 3), Gate::Proceed { iteration: 2 });
    }
}
