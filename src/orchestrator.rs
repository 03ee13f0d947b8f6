//! Run orchestration
//!
//! Runs the relay listener and the driving command side by side and turns
//! their two independent outcomes into one exit code:
//!
//! 1. Whichever finishes first is inspected.
//! 2. A command that fails before the relay finishes is the authoritative
//!    failure; the listener is canceled and its result ignored.
//! 3. Otherwise the relay gets a bounded grace period to finish.
//! 4. The command is always stopped and reaped before returning, and the
//!    exit code is the relay's result.

use std::time::{Duration, Instant};

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::common::{config::RunConfiguration, Result};
use crate::output::OutputSink;
use crate::relay::{Listener, ListenerHandle, RelaySettings, LISTENER_FAILED, LISTENER_OK};
use crate::report::{RunOutcome, RunSummary};
use crate::runner::{ProcessSupervisor, CANCELED_EXIT_CODE};

/// How long a canceled listener may take to wind down before it is aborted
const LISTENER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Exit code for every failure path
pub const EXIT_FAILURE: i32 = 1;

/// Which activity finished first
enum FirstFinished {
    Listener(i32),
    Command(i32),
    Interrupted,
}

/// Coordinates one test run
pub struct Orchestrator {
    config: RunConfiguration,
    sink: OutputSink,
    interrupt: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: RunConfiguration, sink: OutputSink) -> Self {
        Self {
            config,
            sink,
            interrupt: CancellationToken::new(),
        }
    }

    /// Token that aborts the whole run when canceled (e.g. on Ctrl+C)
    pub fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Bind the listener and execute the run
    ///
    /// Only a bind failure is returned as an error; every other failure is
    /// reflected in the summary's exit code.
    pub async fn run(&self) -> Result<RunSummary> {
        let listener = Listener::bind(
            self.config.bind,
            RelaySettings::from(&self.config),
            self.sink.clone(),
        )
        .await?;
        Ok(self.execute(listener).await)
    }

    /// Execute the run with an already bound listener
    pub async fn execute(&self, listener: Listener) -> RunSummary {
        let started = Instant::now();
        let relay = listener.handle();
        let mut listener_task = tokio::spawn(listener.run());

        let command_cancel = CancellationToken::new();
        let mut command_task = self.spawn_command(command_cancel.clone());

        let first = tokio::select! {
            () = self.interrupt.cancelled() => FirstFinished::Interrupted,
            joined = &mut listener_task => FirstFinished::Listener(listener_code(joined)),
            joined = &mut command_task => FirstFinished::Command(command_code(joined)),
        };

        let mut command_result = None;
        let (exit_code, listener_result, outcome) = match first {
            FirstFinished::Interrupted => {
                tracing::warn!("Interrupted, stopping the test run");
                relay.cancel();
                let listener_result = shutdown_listener(listener_task).await;
                (EXIT_FAILURE, listener_result, RunOutcome::Interrupted)
            }
            FirstFinished::Command(code) if code != 0 => {
                command_result = Some(code);
                if listener_task.is_finished() {
                    let listener_result = listener_code(listener_task.await);
                    tracing::info!(
                        command_code = code,
                        listener_code = listener_result,
                        "Command failed after the relay finished"
                    );
                    let outcome = relay_outcome(listener_result, &relay);
                    (listener_result, Some(listener_result), outcome)
                } else {
                    tracing::error!(code, "Command failed before the test run was received");
                    relay.cancel();
                    let listener_result = shutdown_listener(listener_task).await;
                    (EXIT_FAILURE, listener_result, RunOutcome::CommandFailed)
                }
            }
            FirstFinished::Command(code) => {
                command_result = Some(code);
                tracing::debug!(
                    grace_secs = self.config.grace_period.as_secs_f64(),
                    "Command finished, waiting for the relay"
                );
                match tokio::time::timeout(self.config.grace_period, &mut listener_task).await {
                    Ok(joined) => {
                        let code = listener_code(joined);
                        (code, Some(code), relay_outcome(code, &relay))
                    }
                    Err(_) => {
                        tracing::error!(
                            "Command finished but the listener did not receive or finish the test run within {:?}",
                            self.config.grace_period
                        );
                        relay.cancel();
                        let listener_result = shutdown_listener(listener_task).await;
                        (EXIT_FAILURE, listener_result, RunOutcome::GracePeriodExpired)
                    }
                }
            }
            FirstFinished::Listener(code) => (code, Some(code), relay_outcome(code, &relay)),
        };

        // The command must not outlive the run, whatever the outcome.
        command_cancel.cancel();
        if command_result.is_none() {
            command_result = Some(command_code(command_task.await));
        }

        let stats = relay.stats();
        let mut summary = RunSummary {
            exit_code,
            outcome,
            listener_code: listener_result,
            command_code: command_result,
            connections: stats.connections,
            probes: stats.probes,
            bytes_relayed: stats.bytes_relayed,
            results: stats.tally,
            duration_secs: 0.0,
        };
        summary.set_duration(started.elapsed());
        summary
    }

    fn spawn_command(&self, cancel: CancellationToken) -> JoinHandle<i32> {
        let supervisor = ProcessSupervisor::new(self.sink.clone(), self.config.poll_interval);
        let command = self.config.command.clone();
        let arguments = self.config.arguments.clone();
        tokio::spawn(async move { supervisor.run(&command, &arguments, cancel).await })
    }
}

fn listener_code(joined: std::result::Result<i32, JoinError>) -> i32 {
    joined.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Listener task failed");
        LISTENER_FAILED
    })
}

fn command_code(joined: std::result::Result<i32, JoinError>) -> i32 {
    joined.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Command supervisor task failed");
        CANCELED_EXIT_CODE
    })
}

fn relay_outcome(code: i32, relay: &ListenerHandle) -> RunOutcome {
    if code != LISTENER_OK {
        RunOutcome::RelayFailed
    } else if relay.stats().stalled {
        RunOutcome::Stalled
    } else {
        RunOutcome::Completed
    }
}

/// Join a canceled listener, aborting it if it does not stop in time
async fn shutdown_listener(mut task: JoinHandle<i32>) -> Option<i32> {
    match tokio::time::timeout(LISTENER_SHUTDOWN_TIMEOUT, &mut task).await {
        Ok(joined) => Some(listener_code(joined)),
        Err(_) => {
            tracing::warn!("Listener did not stop after cancel, aborting it");
            task.abort();
            None
        }
    }
}
