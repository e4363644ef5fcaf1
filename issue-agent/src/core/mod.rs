//! Deterministic, pure logic shared by the agent.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! tracker entities and return deterministic outputs suitable for tests.

pub mod issue_ref;
pub mod iteration;
pub mod selection;
pub mod tags;
pub mod types;
pub mod verdict;
