//! # Latest-Value Cells
//!
//! Observable cells that always hold a current value.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         LatestCell<T>                                   │
//! │                                                                         │
//! │   set(v) ──► equal to current? ──yes──► dropped (distinct-until-changed)│
//! │                     │                                                   │
//! │                     no                                                  │
//! │                     ▼                                                   │
//! │              watch::Sender ──► every subscriber sees the latest value   │
//! │                                (a new subscriber gets it immediately)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cells are written only by the billing worker. Readers never block it: a
//! slow subscriber just skips intermediate values and reads the newest one.

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Observable cell holding the latest value of `T`.
#[derive(Debug)]
pub struct LatestCell<T> {
    tx: watch::Sender<T>,
}

impl<T> LatestCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a cell holding `initial`.
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Returns a copy of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Stores `value`, notifying subscribers only if it differs.
    ///
    /// Returns true if the stored value changed.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    /// Subscribes to the cell. The receiver starts at the current value.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// True if anyone currently subscribes to the cell.
    pub fn is_observed(&self) -> bool {
        self.observer_count() > 0
    }

    /// Stream of the current value followed by every change.
    pub fn stream(&self) -> BoxStream<'static, T> {
        WatchStream::new(self.subscribe()).boxed()
    }
}

/// Combines two watched values into a derived stream.
///
/// Emits once immediately, then again whenever either side changes. Ends
/// when either sender is dropped.
pub fn combine_latest<A, B, T, F>(
    a: watch::Receiver<A>,
    b: watch::Receiver<B>,
    f: F,
) -> BoxStream<'static, T>
where
    A: Send + Sync + 'static,
    B: Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(&A, &B) -> T + Send + 'static,
{
    stream::unfold((a, b, f, true), |(mut a, mut b, f, first)| async move {
        if !first {
            let alive = tokio::select! {
                changed = a.changed() => changed.is_ok(),
                changed = b.changed() => changed.is_ok(),
            };
            if !alive {
                return None;
            }
        }
        let value = f(&a.borrow_and_update(), &b.borrow_and_update());
        Some((value, (a, b, f, false)))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_is_distinct_until_changed() {
        let cell = LatestCell::new(1u32);
        assert!(!cell.set(1));
        assert!(cell.set(2));
        assert_eq!(cell.get(), 2);
    }

    #[test]
    fn test_observer_count_follows_receivers() {
        let cell = LatestCell::new(false);
        assert!(!cell.is_observed());
        let rx = cell.subscribe();
        assert_eq!(cell.observer_count(), 1);
        drop(rx);
        assert!(!cell.is_observed());
    }

    #[tokio::test]
    async fn test_stream_starts_with_current_value() {
        let cell = LatestCell::new("a".to_string());
        let mut s = cell.stream();
        assert_eq!(s.next().await.as_deref(), Some("a"));

        cell.set("b".to_string());
        assert_eq!(s.next().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_combine_latest_reacts_to_either_side() {
        let left = LatestCell::new(1);
        let right = LatestCell::new(10);
        let mut sums = combine_latest(left.subscribe(), right.subscribe(), |a, b| a + b);

        assert_eq!(sums.next().await, Some(11));
        left.set(2);
        assert_eq!(sums.next().await, Some(12));
        right.set(20);
        assert_eq!(sums.next().await, Some(22));
    }
}
