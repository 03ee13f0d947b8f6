//! Lifecycle record of the driving command

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Where the driving command is in its lifecycle
///
/// Transitions only move forward: `NotStarted -> Running -> Exited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running {
        pid: Option<u32>,
        started: Instant,
    },
    Exited {
        code: i32,
        started: Instant,
        exited: Instant,
    },
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Running { .. } => write!(f, "running"),
            Self::Exited { code, .. } => write!(f, "exited ({code})"),
        }
    }
}

/// Identity and state of the supervised process
#[derive(Debug, Clone)]
pub struct RunnerProcessHandle {
    command: PathBuf,
    arguments: Vec<String>,
    state: ProcessState,
}

impl RunnerProcessHandle {
    pub fn new(command: &Path, arguments: &[String]) -> Self {
        Self {
            command: command.to_path_buf(),
            arguments: arguments.to_vec(),
            state: ProcessState::NotStarted,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Record a successful spawn. Ignored unless the process was not started.
    pub fn mark_started(&mut self, pid: Option<u32>) -> bool {
        if self.state != ProcessState::NotStarted {
            return false;
        }
        self.state = ProcessState::Running {
            pid,
            started: Instant::now(),
        };
        true
    }

    /// Record the exit code. Ignored unless the process is running.
    pub fn mark_exited(&mut self, code: i32) -> bool {
        let ProcessState::Running { started, .. } = self.state else {
            return false;
        };
        self.state = ProcessState::Exited {
            code,
            started,
            exited: Instant::now(),
        };
        true
    }

    /// Time between start and exit (or now, while running)
    pub fn runtime(&self) -> Option<Duration> {
        match self.state {
            ProcessState::NotStarted => None,
            ProcessState::Running { started, .. } => Some(started.elapsed()),
            ProcessState::Exited { started, exited, .. } => Some(exited - started),
        }
    }

    /// Command line for log output
    pub fn display(&self) -> String {
        let mut line = self.command.display().to_string();
        if !self.arguments.is_empty() {
            line.push(' ');
            line.push_str(&shell_words::join(&self.arguments));
        }
        line
    }
}
