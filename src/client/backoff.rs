use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::backoff::{INITIAL, MAX};
use crate::shutdown::{Cancelled, Shutdown};

#[derive(Debug, Default)]
struct BackoffState {
    until: Option<Instant>,
    /// Zero until the first throttle.
    duration: Duration,
}

/// Shared throttle state for the upstream price API. Every cadence consults
/// and mutates it, so all access goes through one mutex.
#[derive(Debug, Default)]
pub struct Backoff {
    state: Mutex<BackoffState>,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a throttled response and return the new window length.
    ///
    /// Without a hint the window starts at 30s and doubles per consecutive
    /// throttle, capped at 5 minutes. A server hint replaces the window.
    pub fn on_rate_limited(&self, retry_after: Option<Duration>) -> Duration {
        let mut state = self.state.lock();
        let next = match retry_after {
            Some(hint) => hint.min(MAX),
            None if state.duration.is_zero() => INITIAL,
            None => (state.duration * 2).min(MAX),
        };
        state.duration = next;
        state.until = Some(Instant::now() + next);
        warn!(backoff_secs = next.as_secs(), hinted = retry_after.is_some(), "Upstream rate limited, backing off");
        next
    }

    /// Any successful, non-throttled response clears the backoff.
    pub fn on_success(&self) {
        let mut state = self.state.lock();
        if !state.duration.is_zero() {
            info!("Upstream recovered, backoff cleared");
        }
        state.duration = Duration::ZERO;
        state.until = None;
    }

    pub fn current_duration(&self) -> Duration {
        self.state.lock().duration
    }

    /// Time left in the active window, if any.
    pub fn remaining(&self) -> Option<Duration> {
        let until = self.state.lock().until?;
        let left = until.saturating_duration_since(Instant::now());
        (!left.is_zero()).then_some(left)
    }

    /// Block until no backoff window is active. The window may be extended by
    /// another task while waiting, so re-check after each sleep.
    pub async fn wait(&self, shutdown: &mut Shutdown) -> Result<(), Cancelled> {
        while let Some(left) = self.remaining() {
            shutdown.sleep(left).await?;
        }
        if shutdown.is_triggered() {
            return Err(Cancelled);
        }
        Ok(())
    }
}
