//! # Backoff Supervisor
//!
//! Decides what happens after each connection setup outcome.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Reconnect Decisions                                  │
//! │                                                                         │
//! │  setup OK ─────────► reset delay to start ──► Refresh (details, owned)  │
//! │                                                                         │
//! │  setup failed ─┐                                                        │
//! │  disconnected ─┴──► RetryAfter(delay), then delay = min(2·delay, max)   │
//! │                                                                         │
//! │  BACKOFF STRATEGY (Exponential, no jitter)                              │
//! │  ─────────────────────────────────────────                              │
//! │  Attempt 1: 1s                                                          │
//! │  Attempt 2: 2s                                                          │
//! │  Attempt 3: 4s                                                          │
//! │  ...                                                                    │
//! │  Max: 15min                                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The supervisor only computes delays. The worker owns the timer, so a
//! shutdown cancels any scheduled attempt by dropping its deadline.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::debug;

/// What the worker should do after a setup outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectDecision {
    /// Connected: load details and reconcile owned purchases.
    Refresh,
    /// Try to connect again after the delay.
    RetryAfter(Duration),
}

/// Exponential reconnect delay with a ceiling.
pub struct BackoffSupervisor {
    backoff: ExponentialBackoff,
    start: Duration,
    max: Duration,
}

impl BackoffSupervisor {
    pub fn new(start: Duration, max: Duration) -> Self {
        let backoff = ExponentialBackoff {
            current_interval: start,
            initial_interval: start,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: max,
            max_elapsed_time: None,
            ..Default::default()
        };
        Self {
            backoff,
            start,
            max,
        }
    }

    /// Delay the next failure would produce.
    pub fn current_delay(&self) -> Duration {
        self.backoff.current_interval
    }

    /// Records a setup outcome.
    pub fn on_setup(&mut self, ok: bool) -> ConnectDecision {
        if ok {
            self.reset();
            ConnectDecision::Refresh
        } else {
            ConnectDecision::RetryAfter(self.next_delay())
        }
    }

    /// Records a dropped connection.
    pub fn on_disconnect(&mut self) -> ConnectDecision {
        ConnectDecision::RetryAfter(self.next_delay())
    }

    /// Returns the delay to use now and doubles the next one.
    fn next_delay(&mut self) -> Duration {
        let delay = self
            .backoff
            .next_backoff()
            // Millisecond resolution: drops float noise from the multiplier.
            .map(|d| Duration::from_millis(d.as_millis() as u64))
            .unwrap_or(self.max);
        debug!(
            delay_ms = delay.as_millis() as u64,
            next_ms = self.backoff.current_interval.as_millis() as u64,
            "Reconnect delay computed"
        );
        delay
    }

    /// Back to the start delay.
    pub fn reset(&mut self) {
        self.backoff.reset();
        debug!(start_ms = self.start.as_millis() as u64, "Reconnect backoff reset");
    }
}

impl std::fmt::Debug for BackoffSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffSupervisor")
            .field("current", &self.backoff.current_interval)
            .field("start", &self.start)
            .field("max", &self.max)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> BackoffSupervisor {
        BackoffSupervisor::new(Duration::from_secs(1), Duration::from_secs(900))
    }

    #[test]
    fn test_delays_double_from_start() {
        let mut s = supervisor();
        assert_eq!(s.on_setup(false), ConnectDecision::RetryAfter(Duration::from_secs(1)));
        assert_eq!(s.on_setup(false), ConnectDecision::RetryAfter(Duration::from_secs(2)));
        assert_eq!(s.on_disconnect(), ConnectDecision::RetryAfter(Duration::from_secs(4)));
        assert_eq!(s.current_delay(), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_is_capped() {
        let mut s = supervisor();
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            if let ConnectDecision::RetryAfter(d) = s.on_setup(false) {
                last = d;
            }
        }
        assert_eq!(last, Duration::from_secs(900));
    }

    #[test]
    fn test_success_resets_to_start() {
        let mut s = supervisor();
        s.on_setup(false);
        s.on_setup(false);
        assert_eq!(s.on_setup(true), ConnectDecision::Refresh);
        assert_eq!(s.current_delay(), Duration::from_secs(1));
        assert_eq!(s.on_disconnect(), ConnectDecision::RetryAfter(Duration::from_secs(1)));
    }
}
