//! Issue-resolution agent driven entirely by tracker history.
//!
//! The agent picks up a tracked issue, produces a change on a deterministic
//! branch, opens or updates a pull request, and iterates on reviewer feedback.
//! No local database exists: the iteration counter and review verdicts live as
//! plain-text tags in tracker comments. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (tag grammar, branch naming,
//!   tie-break policies, gate and verdict rules). No I/O, fully testable.
//! - **[`io`]**: Side-effecting adapters (configuration, git, tracker HTTP,
//!   generative service). Traits at the seams so tests can script them.
//!
//! Orchestration modules ([`resolve`], [`review`], [`poll`]) coordinate core
//! logic with I/O to implement the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod fallback;
pub mod io;
pub mod logging;
pub mod patch;
pub mod poll;
pub mod reconcile;
pub mod resolve;
pub mod review;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workspace;
