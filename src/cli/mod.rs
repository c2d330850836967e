//! Command-line interface for docpool.
//!
//! Provides commands for driving a synthetic workload through the worker
//! pool and for inspecting the effective pool configuration.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
