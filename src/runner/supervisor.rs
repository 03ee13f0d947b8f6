//! Launch and supervision of the driving command

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::handle::RunnerProcessHandle;
use crate::output::OutputSink;

/// Returned when the command was killed before it exited on its own
pub const CANCELED_EXIT_CODE: i32 = -1;
/// Returned when the command could not be started at all
pub const LAUNCH_FAILED_EXIT_CODE: i32 = -2;

/// How long piped output may keep draining after the command exits
///
/// Shared by both pipes. A process that left the command's group can still
/// hold them open indefinitely.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const STDOUT_PREFIX: &str = "Command: ";
const STDERR_PREFIX: &str = "Command [stderr]: ";

/// Runs the driving command and forwards its output line by line
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    sink: OutputSink,
    poll_interval: Duration,
}

impl ProcessSupervisor {
    pub fn new(sink: OutputSink, poll_interval: Duration) -> Self {
        Self {
            sink,
            poll_interval,
        }
    }

    /// Run `command` to completion or until `cancel` fires
    ///
    /// Returns the command's own exit code, [`CANCELED_EXIT_CODE`] if it was
    /// killed (by `cancel` or by a signal), or [`LAUNCH_FAILED_EXIT_CODE`] if
    /// it never started. The process is reaped before this returns.
    pub async fn run(&self, command: &Path, arguments: &[String], cancel: CancellationToken) -> i32 {
        let mut handle = RunnerProcessHandle::new(command, arguments);

        let mut std_cmd = std::process::Command::new(command);
        std_cmd
            .args(arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a forced stop also takes down anything it spawned
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(command = %handle.display(), error = %e, "Failed to start command");
                return LAUNCH_FAILED_EXIT_CODE;
            }
        };
        handle.mark_started(child.id());
        tracing::info!(command = %handle.display(), pid = ?child.id(), "Command started");

        let mut forwarders = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(forward_lines(stdout, self.sink.clone(), STDOUT_PREFIX));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(forward_lines(stderr, self.sink.clone(), STDERR_PREFIX));
        }

        let pgid = child.id();
        let code = self.supervise(&mut child, &cancel).await;
        handle.mark_exited(code);
        // Anything the command left running in its group goes with it.
        kill_group(pgid);
        tracing::info!(
            code,
            runtime_ms = handle.runtime().map(|d| d.as_millis() as u64),
            "Command {}",
            handle.state()
        );

        drain(forwarders).await;
        code
    }

    /// Poll for exit on a fixed interval, checking `cancel` between polls
    async fn supervise(&self, child: &mut Child, cancel: &CancellationToken) -> i32 {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match child.try_wait() {
                Ok(Some(status)) => return exit_code(status),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to poll command status, stopping it");
                    terminate(child).await;
                    return CANCELED_EXIT_CODE;
                }
            }

            if cancel.is_cancelled() {
                tracing::info!(pid = ?child.id(), "Cancellation requested, killing command");
                terminate(child).await;
                return CANCELED_EXIT_CODE;
            }
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(CANCELED_EXIT_CODE)
}

/// SIGKILL the process group led by the command
#[cfg(unix)]
fn kill_group(leader: Option<u32>) {
    let Some(pgid) = leader.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created for this child.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the group already emptied out.
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::debug!(pgid, error = %err, "killpg failed");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_leader: Option<u32>) {}

/// Kill the command (and its process group) and reap it. Never fails.
async fn terminate(child: &mut Child) {
    kill_group(child.id());

    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "Command already stopped");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!(error = %e, "Failed to reap command");
    }
}

/// Copy lines from a child pipe to the sink with a prefix
fn forward_lines<R>(reader: R, sink: OutputSink, prefix: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    if sink.write_line(&format!("{prefix}{line}")).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Command output closed");
                    break;
                }
            }
        }
    })
}

/// Join the forwarders under one deadline, aborting any still running
async fn drain(forwarders: Vec<JoinHandle<()>>) {
    let deadline = Instant::now() + OUTPUT_DRAIN_TIMEOUT;
    for mut forwarder in forwarders {
        if tokio::time::timeout_at(deadline, &mut forwarder)
            .await
            .is_err()
        {
            tracing::debug!("Command output still open after exit, detaching");
            forwarder.abort();
        }
    }
}
