//! TCP relay for device test output
//!
//! The device connects back to the host and streams its results as raw bytes.
//! Short connections are reachability probes and are skipped; the first real
//! connection is copied to the host output until the peer closes it or goes
//! quiet for the stall timeout.

mod listener;
mod session;
mod stall;

pub use listener::{
    Listener, ListenerHandle, RelaySettings, RelayStats, LISTENER_FAILED, LISTENER_OK,
};
pub use session::{ListenSession, SessionEnd, SessionKind};
pub use stall::StallTimer;
