//! Common utilities shared by the relay, runner and orchestrator

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
