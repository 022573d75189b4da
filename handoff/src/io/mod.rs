//! I/O helpers for handoff commands.

pub mod agent;
pub mod config;
pub mod events;
pub mod process;
pub mod prompt;
pub mod run_dir;
pub mod run_log;
