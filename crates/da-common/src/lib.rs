//! Shared types for the distributed-agreement stack.
//!
//! This crate contains:
//! - **Process identity** — the `ProcessId` type and the hosts table
//! - **Configuration** — mode-specific config file parsing
//! - **Log writer** — the append-only, line-oriented event log

pub mod config;
pub mod hosts;
pub mod log;

/// Small positive integer identifying a process within the group (1..N).
pub type ProcessId = u16;

/// A per-process sequence number, monotone starting at 1.
pub type Seq = u32;
