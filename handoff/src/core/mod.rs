//! Deterministic, pure logic shared by the workflow driver.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! text and sequences and return deterministic outputs suitable for tests.

pub mod backoff;
pub mod brief;
pub mod handoff;
pub mod sequence;
pub mod types;
