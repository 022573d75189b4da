//! Multi-role agent workflow driver that chains handoff prompts.
//!
//! A run walks an ordered list of roles. Each role is executed by one external
//! agent invocation, and its free-text output carries the prompt for the next
//! role in a "handoff packet". The crate is split into pure logic and I/O:
//!
//! - **[`core`]**: Pure logic (handoff parsing, sequence policy, brief
//!   shortening, timeout backoff). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config file, run directory, logs,
//!   prompt templates, child processes).
//!
//! Orchestration modules ([`start`], [`select`], [`step`], [`run`],
//! [`continuation`]) coordinate core logic with I/O to implement CLI commands.

pub mod continuation;
pub mod core;
pub mod errors;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
pub mod select;
pub mod start;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
