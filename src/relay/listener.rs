//! TCP listener relaying one device test run to the host output

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::session::{ListenSession, SessionEnd, SessionKind};
use super::stall::StallTimer;
use crate::common::{config::RunConfiguration, Error, Result};
use crate::output::OutputSink;
use crate::report::ResultTally;

/// Listener finished normally or was canceled
pub const LISTENER_OK: i32 = 0;
/// Listener hit an unexpected socket error
pub const LISTENER_FAILED: i32 = 1;

/// Relay tuning taken from the run configuration
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub stall_timeout: Duration,
    pub probe_threshold: usize,
    pub buffer_size: usize,
}

impl From<&RunConfiguration> for RelaySettings {
    fn from(config: &RunConfiguration) -> Self {
        Self {
            stall_timeout: config.stall_timeout,
            probe_threshold: config.probe_threshold,
            buffer_size: config.buffer_size,
        }
    }
}

/// Counters shared with whoever holds a [`ListenerHandle`]
#[derive(Debug, Default, Clone)]
pub struct RelayStats {
    pub connections: u32,
    pub probes: u32,
    pub bytes_relayed: u64,
    pub stalled: bool,
    pub tally: ResultTally,
}

/// Cloneable control handle for a running [`Listener`]
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    cancel: CancellationToken,
    canceled: Arc<AtomicBool>,
    stats: Arc<Mutex<RelayStats>>,
}

impl ListenerHandle {
    /// Stop the listener
    ///
    /// Safe to call any number of times from any task; only the first call
    /// has an effect.
    pub fn cancel(&self) {
        if !self.canceled.swap(true, Ordering::SeqCst) {
            tracing::info!("Canceling the server");
            self.cancel.cancel();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Snapshot of the relay counters
    pub fn stats(&self) -> RelayStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Sequential TCP listener: one connection at a time, one test run per listener
pub struct Listener {
    tcp: TcpListener,
    local_addr: SocketAddr,
    settings: RelaySettings,
    sink: OutputSink,
    handle: ListenerHandle,
}

impl Listener {
    /// Bind the listen socket
    ///
    /// Fails if the address is unavailable; there is no retry.
    pub async fn bind(addr: SocketAddr, settings: RelaySettings, sink: OutputSink) -> Result<Self> {
        tracing::info!(%addr, "Touch server configured");
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = tcp.local_addr()?;
        tracing::info!(addr = %local_addr, "Touch server listening");

        Ok(Self {
            tcp,
            local_addr,
            settings,
            sink,
            handle: ListenerHandle {
                cancel: CancellationToken::new(),
                canceled: Arc::new(AtomicBool::new(false)),
                stats: Arc::new(Mutex::new(RelayStats::default())),
            },
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ListenerHandle {
        self.handle.clone()
    }

    /// Accept connections until one test run has been relayed
    ///
    /// Returns [`LISTENER_OK`] when a run completes, stalls or is canceled,
    /// and [`LISTENER_FAILED`] on an unexpected socket error. The socket is
    /// closed when this returns.
    pub async fn run(self) -> i32 {
        loop {
            let accepted = tokio::select! {
                () = self.handle.cancel.cancelled() => {
                    tracing::debug!("Listener canceled while waiting for a connection");
                    return LISTENER_OK;
                }
                accepted = self.tcp.accept() => accepted,
            };

            let (stream, remote) = match accepted {
                Ok(conn) => conn,
                Err(e) => return self.fail(&e),
            };

            match self.process(stream, remote).await {
                Ok(SessionEnd::Closed(SessionKind::TestRun)) => {
                    tracing::info!(%remote, "Test run finished");
                    return LISTENER_OK;
                }
                Ok(SessionEnd::Closed(SessionKind::Probe)) => {
                    tracing::info!(%remote, "Discarded reachability probe, waiting for the test run");
                }
                Ok(SessionEnd::Stalled) => {
                    if let Ok(mut stats) = self.handle.stats.lock() {
                        stats.stalled = true;
                    }
                    self.handle.cancel();
                    return LISTENER_OK;
                }
                Ok(SessionEnd::Canceled) => return LISTENER_OK,
                Err(e) => return self.fail(&e),
            }
        }
    }

    fn fail(&self, e: &std::io::Error) -> i32 {
        if self.handle.is_canceled() {
            return LISTENER_OK;
        }
        tracing::error!(error = %e, "Unexpected listener error");
        LISTENER_FAILED
    }

    /// Relay one connection until it closes, stalls or the listener is canceled
    async fn process(&self, mut stream: TcpStream, remote: SocketAddr) -> std::io::Result<SessionEnd> {
        tracing::info!(%remote, "Connection accepted");
        let mut session = ListenSession::new(
            remote,
            self.settings.buffer_size,
            self.settings.probe_threshold,
        );
        if let Ok(mut stats) = self.handle.stats.lock() {
            stats.connections += 1;
        }

        self.sink
            .write_chunk(session.header(chrono::Local::now()).as_bytes())
            .await?;

        let mut stall = StallTimer::new(self.settings.stall_timeout);

        loop {
            let read = tokio::select! {
                biased;
                () = self.handle.cancel.cancelled() => {
                    self.finish_tally(None);
                    return Ok(SessionEnd::Canceled);
                }
                () = &mut stall => {
                    tracing::warn!(
                        %remote,
                        bytes = session.bytes_received(),
                        idle_secs = session.last_activity().elapsed().as_secs(),
                        "No data for {:?}, the test run is probably hung",
                        self.settings.stall_timeout
                    );
                    self.finish_tally(None);
                    return Ok(SessionEnd::Stalled);
                }
                read = stream.read(session.buffer_mut()) => read?,
            };

            if read == 0 {
                break;
            }

            session.record(read);
            stall.reset();
            let chunk = session.chunk(read);
            self.sink.write_chunk(chunk).await?;

            if let Ok(mut stats) = self.handle.stats.lock() {
                stats.bytes_relayed += read as u64;
                stats.tally.feed(chunk);
            }
        }

        let kind = session.close();
        tracing::debug!(%remote, bytes = session.bytes_received(), ?kind, "Connection closed");
        self.finish_tally(Some(kind));
        Ok(SessionEnd::Closed(kind))
    }

    /// Count any unterminated last line, and the session if it was a probe
    fn finish_tally(&self, closed: Option<SessionKind>) {
        if let Ok(mut stats) = self.handle.stats.lock() {
            stats.tally.finish();
            if closed == Some(SessionKind::Probe) {
                stats.probes += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::CaptureBuffer;
    use tokio::io::AsyncWriteExt;
    use tokio::task::JoinHandle;

    fn settings(stall: Duration) -> RelaySettings {
        RelaySettings {
            stall_timeout: stall,
            probe_threshold: 16,
            buffer_size: 16 * 1024,
        }
    }

    async fn start(stall: Duration) -> (SocketAddr, ListenerHandle, CaptureBuffer, JoinHandle<i32>) {
        let (sink, buffer) = OutputSink::capture();
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), settings(stall), sink)
            .await
            .unwrap();
        let addr = listener.local_addr();
        let handle = listener.handle();
        let task = tokio::spawn(listener.run());
        (addr, handle, buffer, task)
    }

    async fn send_and_close(addr: SocketAddr, payload: &[u8]) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(payload).await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);
    }

    #[tokio::test]
    async fn test_test_run_is_relayed_after_header() {
        let (addr, handle, buffer, task) = start(Duration::from_secs(10)).await;

        let payload = b"MathTests\n\t[PASS] Adds\n\t[FAIL] Divides : boom\n";
        send_and_close(addr, payload).await;

        assert_eq!(task.await.unwrap(), LISTENER_OK);
        let text = buffer.text();
        assert!(text.starts_with("[Local Date/Time:\t"), "{text}");
        let header_end = text.find("]\n[Remote Address:\t127.0.0.1:").unwrap();
        let payload_start = text.find("MathTests").unwrap();
        assert!(header_end < payload_start);
        assert!(text.ends_with(std::str::from_utf8(payload).unwrap()));

        let stats = handle.stats();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.probes, 0);
        assert_eq!(stats.bytes_relayed, payload.len() as u64);
        assert_eq!(stats.tally.passed, 1);
        assert_eq!(stats.tally.failures, vec!["Divides"]);
    }

    #[tokio::test]
    async fn test_probe_does_not_complete_run() {
        let (addr, handle, buffer, task) = start(Duration::from_secs(10)).await;

        send_and_close(addr, b"ping").await;
        send_and_close(addr, b"").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());
        assert_eq!(handle.stats().probes, 2);

        send_and_close(addr, b"0123456789abcdef").await;
        assert_eq!(task.await.unwrap(), LISTENER_OK);

        let stats = handle.stats();
        assert_eq!(stats.connections, 3);
        assert_eq!(stats.bytes_relayed, 20);
        assert!(buffer.text().ends_with("0123456789abcdef"));
    }

    #[tokio::test]
    async fn test_silent_connection_stalls() {
        let stall = Duration::from_millis(300);
        let (addr, handle, _buffer, task) = start(stall).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"first chunk of a long run").await.unwrap();
        let sent = std::time::Instant::now();

        let code = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        let waited = sent.elapsed();

        assert_eq!(code, LISTENER_OK);
        assert!(waited >= stall - Duration::from_millis(50), "{waited:?}");
        assert!(waited < stall + Duration::from_millis(500), "{waited:?}");
        assert!(handle.stats().stalled);
        assert!(handle.is_canceled());
    }

    #[tokio::test]
    async fn test_stall_counts_unterminated_last_line() {
        let (addr, handle, _buffer, task) = start(Duration::from_millis(200)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"\t[PASS] Adds\n\t[FAIL] Divides : boom").await.unwrap();

        let code = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, LISTENER_OK);

        let stats = handle.stats();
        assert!(stats.stalled);
        assert_eq!(stats.tally.passed, 1);
        assert_eq!(stats.tally.failed, 1);
        assert_eq!(stats.tally.failures, vec!["Divides"]);
    }

    #[tokio::test]
    async fn test_connection_reset_is_failure() {
        let (addr, handle, _buffer, task) = start(Duration::from_secs(10)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"0123456789abcdef and more").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Zero linger turns the close into a reset.
        drop(reset_on_close(stream));

        let code = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, LISTENER_FAILED);
        assert!(!handle.is_canceled());
    }

    #[allow(deprecated)]
    fn reset_on_close(stream: TcpStream) -> TcpStream {
        stream.set_linger(Some(Duration::ZERO)).unwrap();
        stream
    }

    #[tokio::test]
    async fn test_cancel_while_accepting() {
        let (_addr, handle, buffer, task) = start(Duration::from_secs(10)).await;

        handle.cancel();
        handle.cancel();
        assert_eq!(task.await.unwrap(), LISTENER_OK);
        assert!(buffer.text().is_empty());
        handle.cancel();
        assert!(handle.is_canceled());
    }

    #[tokio::test]
    async fn test_cancel_during_relay() {
        let (addr, handle, _buffer, task) = start(Duration::from_secs(10)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"partial").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();

        assert_eq!(task.await.unwrap(), LISTENER_OK);
        assert!(!handle.stats().stalled);
    }

    #[tokio::test]
    async fn test_socket_closed_after_run() {
        let (addr, _handle, _buffer, task) = start(Duration::from_secs(10)).await;
        send_and_close(addr, b"a full test run payload").await;
        assert_eq!(task.await.unwrap(), LISTENER_OK);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_an_error() {
        let (addr, handle, _buffer, _task) = start(Duration::from_secs(10)).await;
        let (sink, _) = OutputSink::capture();
        let err = Listener::bind(addr, settings(Duration::from_secs(10)), sink)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Bind { .. }));
        handle.cancel();
    }
}
