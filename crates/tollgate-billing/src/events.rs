//! # Event Fabric
//!
//! Multicast notification channels between the worker and UI collaborators.
//!
//! ## Channels
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           EventFabric                                   │
//! │                                                                         │
//! │  new_purchases       broadcast, replays ONE pending item to the next   │
//! │  (Vec<SkuId>)        subscriber if it fired while nobody listened      │
//! │                                                                         │
//! │  consumed_purchases  broadcast, dropped when nobody listens            │
//! │  (Vec<SkuId>)                                                           │
//! │                                                                         │
//! │  flow_in_process     LatestCell<bool>                                  │
//! │  connection          LatestCell<ConnectionState>                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Emission never blocks the worker. A subscriber that falls more than
//! [`EVENT_CAPACITY`] items behind loses the oldest ones.

use std::sync::Mutex;

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use tollgate_core::SkuId;

use crate::cell::LatestCell;

/// Per-subscriber buffer of each event channel.
pub const EVENT_CAPACITY: usize = 16;

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of the store session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never started, or shut down.
    #[default]
    Disconnected,
    /// Setup requested or a reconnect is scheduled.
    Connecting,
    /// Setup finished OK; the store accepts queries.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

// =============================================================================
// Event Channel
// =============================================================================

/// One multicast channel.
#[derive(Debug)]
pub struct EventChannel<T> {
    name: &'static str,
    tx: broadcast::Sender<T>,
    replay_one: bool,
    /// Item emitted while there were no subscribers. Guarded together with
    /// the subscriber check so a subscribe cannot slip between them.
    pending: Mutex<Option<T>>,
}

impl<T> EventChannel<T>
where
    T: Clone + std::fmt::Debug + Send + 'static,
{
    /// Creates a channel that drops items nobody listens to.
    pub fn new(name: &'static str) -> Self {
        Self::build(name, false)
    }

    /// Creates a channel that keeps the latest unheard item for the next
    /// subscriber.
    pub fn replaying(name: &'static str) -> Self {
        Self::build(name, true)
    }

    fn build(name: &'static str, replay_one: bool) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name,
            tx,
            replay_one,
            pending: Mutex::new(None),
        }
    }

    /// Emits an item to every current subscriber.
    pub fn emit(&self, item: T) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if self.tx.receiver_count() > 0 {
            let _ = self.tx.send(item);
        } else if self.replay_one {
            debug!(channel = self.name, ?item, "No subscribers, holding event");
            *pending = Some(item);
        } else {
            debug!(channel = self.name, ?item, "No subscribers, event dropped");
        }
    }

    /// Subscribes to future items, starting with the held one if any.
    pub fn subscribe(&self) -> BoxStream<'static, T> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let held = pending.take();
        let rx = self.tx.subscribe();
        drop(pending);

        let name = self.name;
        stream::iter(held)
            .chain(BroadcastStream::new(rx).filter_map(move |r| async move {
                match r {
                    Ok(item) => Some(item),
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        warn!(channel = name, skipped = n, "Subscriber lagged, events lost");
                        None
                    }
                }
            }))
            .boxed()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// =============================================================================
// Event Fabric
// =============================================================================

/// All channels the worker publishes to.
#[derive(Debug)]
pub struct EventFabric {
    /// Ids of each newly completed purchase.
    pub new_purchases: EventChannel<Vec<SkuId>>,

    /// Ids of each consumed purchase.
    pub consumed_purchases: EventChannel<Vec<SkuId>>,

    /// True between a successful flow launch and the store's response.
    pub flow_in_process: LatestCell<bool>,

    /// Store session state.
    pub connection: LatestCell<ConnectionState>,
}

impl EventFabric {
    pub fn new() -> Self {
        Self {
            new_purchases: EventChannel::replaying("new_purchases"),
            consumed_purchases: EventChannel::new("consumed_purchases"),
            flow_in_process: LatestCell::new(false),
            connection: LatestCell::new(ConnectionState::Disconnected),
        }
    }
}

impl Default for EventFabric {
    fn default() -> Self {
        Self::new()
    }
}
