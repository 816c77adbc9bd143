//! `cachegroup` command-line tool.
//!
//! Provides commands for:
//! - Replaying a membership scenario on simulated nodes
//! - Mapping a key to its bucket

pub mod commands;
pub mod config;

pub use commands::{run, simulate, SimulationOutcome};
pub use config::{CliCommand, CliConfig, Scenario, Step};
