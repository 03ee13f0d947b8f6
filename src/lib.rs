//! Touch server - host side of a device test run
//!
//! This library runs a driving command and a TCP relay side by side and
//! reconciles them into a single exit code.

pub mod cli;
pub mod commands;
pub mod common;
pub mod orchestrator;
pub mod output;
pub mod relay;
pub mod report;
pub mod runner;

// Re-export commonly used types for tests
pub use common::{config::RunConfiguration, Error, Result};
pub use orchestrator::Orchestrator;
