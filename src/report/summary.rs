//! End-of-run summary

use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use super::tally::ResultTally;
use crate::common::{Error, Result};

/// How the run ended, from the orchestrator's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The relay saw a complete test run
    Completed,
    /// The connection went silent for the stall timeout
    Stalled,
    /// The relay hit an unexpected socket error
    RelayFailed,
    /// The driving command failed before the relay finished
    CommandFailed,
    /// The command finished but the relay did not within the grace period
    GracePeriodExpired,
    /// The host was interrupted
    Interrupted,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Stalled => write!(f, "stalled"),
            Self::RelayFailed => write!(f, "relay failed"),
            Self::CommandFailed => write!(f, "command failed"),
            Self::GracePeriodExpired => write!(f, "grace period expired"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Serializable record of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub exit_code: i32,
    pub outcome: RunOutcome,
    /// Listener result code, absent if it never finished
    pub listener_code: Option<i32>,
    /// Driving command result code, absent if it was never joined
    pub command_code: Option<i32>,
    pub connections: u32,
    pub probes: u32,
    pub bytes_relayed: u64,
    pub results: ResultTally,
    pub duration_secs: f64,
}

impl RunSummary {
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Emit the summary as a single log event
    pub fn log(&self) {
        tracing::info!(
            exit_code = self.exit_code,
            outcome = %self.outcome,
            passed = self.results.passed,
            failed = self.results.failed,
            ignored = self.results.ignored,
            inconclusive = self.results.inconclusive,
            bytes = self.bytes_relayed,
            probes = self.probes,
            "Test run finished"
        );
    }

    /// Write the summary as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| Error::file_write(path, &e))
    }
}
