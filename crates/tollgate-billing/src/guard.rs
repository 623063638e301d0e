//! # Consumption Guard
//!
//! Keeps a purchase token from being consumed twice at the same time.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   run(token, op)                                                        │
//! │        │                                                                │
//! │        ├── token in flight? ──yes──► None (op never runs)               │
//! │        │                                                                │
//! │        └── insert token ──► op().await ──► remove token ──► Some(out)   │
//! │                                        (removed on every exit path,     │
//! │                                         including cancellation)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;

use tracing::debug;

/// Set of tokens with a consume call in flight.
#[derive(Debug, Default)]
pub struct ConsumptionGuard {
    in_flight: Mutex<HashSet<String>>,
}

impl ConsumptionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `op` unless a call for `token` is already in flight.
    pub async fn run<F, Fut, T>(&self, token: &str, op: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _ticket = match self.enter(token) {
            Some(ticket) => ticket,
            None => {
                debug!(token, "Consume already in flight, skipping");
                return None;
            }
        };
        Some(op().await)
    }

    pub fn is_in_flight(&self, token: &str) -> bool {
        self.lock().contains(token)
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().len()
    }

    fn enter(&self, token: &str) -> Option<Ticket<'_>> {
        if self.lock().insert(token.to_string()) {
            Some(Ticket {
                guard: self,
                token: token.to_string(),
            })
        } else {
            None
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Removes its token from the guard when dropped.
struct Ticket<'a> {
    guard: &'a ConsumptionGuard,
    token: String,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        self.guard.lock().remove(&self.token);
    }
}
