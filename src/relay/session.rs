//! A single accepted connection

use std::net::SocketAddr;
use std::time::Instant;

use chrono::{DateTime, Local};

/// What an accepted connection turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Short connection the device uses to find a reachable host address
    Probe,
    /// A real test run streaming results
    TestRun,
}

/// How relaying a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Peer closed the connection
    Closed(SessionKind),
    /// No bytes arrived for the stall timeout
    Stalled,
    /// The listener was canceled while relaying
    Canceled,
}

/// Lifecycle state of one TCP connection
///
/// Owns its receive buffer, so nothing is shared between connections.
#[derive(Debug)]
pub struct ListenSession {
    remote: SocketAddr,
    bytes_received: u64,
    last_activity: Instant,
    kind: Option<SessionKind>,
    probe_threshold: usize,
    buffer: Vec<u8>,
}

impl ListenSession {
    pub fn new(remote: SocketAddr, buffer_size: usize, probe_threshold: usize) -> Self {
        Self {
            remote,
            bytes_received: 0,
            last_activity: Instant::now(),
            kind: None,
            probe_threshold,
            buffer: vec![0u8; buffer_size],
        }
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Receive buffer for the next read
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Bytes of the last read, as recorded by [`record`](Self::record)
    pub fn chunk(&self, len: usize) -> &[u8] {
        &self.buffer[..len]
    }

    /// Account for a successful non-empty read
    pub fn record(&mut self, len: usize) {
        self.bytes_received += len as u64;
        self.last_activity = Instant::now();
        if self.kind.is_none() && self.bytes_received >= self.probe_threshold as u64 {
            self.kind = Some(SessionKind::TestRun);
        }
    }

    /// Final classification when the peer closes
    pub fn close(&mut self) -> SessionKind {
        *self.kind.get_or_insert(SessionKind::Probe)
    }

    /// Identification written before any relayed payload
    pub fn header(&self, now: DateTime<Local>) -> String {
        format!(
            "[Local Date/Time:\t{}]\n[Remote Address:\t{}]\n",
            now.format("%Y-%m-%d %H:%M:%S"),
            self.remote
        )
    }
}
