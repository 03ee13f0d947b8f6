//! Inactivity deadline for an active connection

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// Deadline that moves forward every time activity is recorded
///
/// The timer is a future: awaiting it (usually inside `tokio::select!`)
/// completes once `timeout` has passed since the last [`reset`](Self::reset).
pub struct StallTimer {
    timeout: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl StallTimer {
    /// Arm a timer that fires `timeout` from now
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sleep: Box::pin(tokio::time::sleep(timeout)),
        }
    }

    /// Push the deadline to `timeout` from now
    pub fn reset(&mut self) {
        self.sleep.as_mut().reset(Instant::now() + self.timeout);
    }

    /// Current deadline
    pub fn deadline(&self) -> Instant {
        self.sleep.deadline()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Future for StallTimer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.sleep.as_mut().poll(cx)
    }
}
