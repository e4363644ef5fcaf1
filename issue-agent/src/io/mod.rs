//! Side-effecting adapters: configuration, processes, git, tracker HTTP and
//! the generative service.

pub mod config;
pub mod event;
pub mod git;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod retry;
pub mod tracker;
