//! # Store Client Seam
//!
//! The vendor store SDK, reached only through [`StoreClient`].
//!
//! ## Data Flow
//! ```text
//! ┌──────────────┐   async calls (query, launch, consume, ack)   ┌─────────────┐
//! │              │ ────────────────────────────────────────────► │             │
//! │ BillingAgent │                                                │ StoreClient │
//! │   (worker)   │ ◄──── StoreEvent via StoreCallbacks (mpsc) ─── │  (vendor)   │
//! └──────────────┘   setup finished, disconnected, purchases      └─────────────┘
//! ```
//!
//! Callbacks may fire on any thread at any time. They only enqueue an event;
//! the worker applies it on its own task, so the vendor thread never touches
//! orchestrator state.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use tollgate_core::{
    DetailsResponse, FlowParams, PurchaseRecord, PurchasesResponse, SkuId, SkuKind, StoreResult,
    UiHandle,
};

/// Asynchronous operations of the platform store.
///
/// Every call returns a [`StoreResult`]. Connection setup is answered
/// through [`StoreCallbacks::on_setup_finished`].
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Starts a session. The outcome arrives as a callback.
    async fn start_connection(&self, callbacks: StoreCallbacks);

    /// Ends the session. No callbacks fire afterwards.
    async fn end_connection(&self);

    /// Fetches listing details for `ids` of one kind.
    async fn query_details(&self, kind: SkuKind, ids: &[SkuId]) -> DetailsResponse;

    /// Fetches every purchase of one kind the user currently owns.
    async fn query_owned_purchases(&self, kind: SkuKind) -> PurchasesResponse;

    /// Shows the purchase UI. The outcome arrives as a purchases callback.
    async fn launch_flow(&self, ui: &UiHandle, params: FlowParams) -> StoreResult;

    /// Consumes a one-time purchase so it can be bought again.
    async fn consume(&self, token: &str) -> StoreResult;

    /// Acknowledges a purchase so the store does not refund it.
    async fn acknowledge(&self, token: &str) -> StoreResult;
}

// =============================================================================
// Callbacks
// =============================================================================

/// Something the store told us without being asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Answer to `start_connection`.
    SetupFinished(StoreResult),
    /// The session dropped.
    Disconnected,
    /// A flow finished, or the store pushed purchases made elsewhere.
    PurchasesUpdated {
        result: StoreResult,
        purchases: Vec<PurchaseRecord>,
    },
}

/// Handle the store uses to reach the worker.
#[derive(Debug, Clone)]
pub struct StoreCallbacks {
    tx: mpsc::UnboundedSender<StoreEvent>,
}

impl StoreCallbacks {
    /// Creates the callbacks and the receiver the worker drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn on_setup_finished(&self, result: StoreResult) {
        self.deliver(StoreEvent::SetupFinished(result));
    }

    pub fn on_disconnected(&self) {
        self.deliver(StoreEvent::Disconnected);
    }

    pub fn on_purchases_updated(&self, result: StoreResult, purchases: Vec<PurchaseRecord>) {
        self.deliver(StoreEvent::PurchasesUpdated { result, purchases });
    }

    fn deliver(&self, event: StoreEvent) {
        if self.tx.send(event).is_err() {
            // Worker stopped; late vendor callbacks are expected after shutdown.
            trace!("Store callback after worker shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::ResponseCode;

    #[tokio::test]
    async fn test_callbacks_enqueue_in_order() {
        let (callbacks, mut rx) = StoreCallbacks::channel();
        let cloned = callbacks.clone();

        callbacks.on_setup_finished(StoreResult::ok());
        cloned.on_purchases_updated(StoreResult::new(ResponseCode::UserCanceled, ""), vec![]);
        callbacks.on_disconnected();

        assert_eq!(rx.recv().await, Some(StoreEvent::SetupFinished(StoreResult::ok())));
        assert!(matches!(
            rx.recv().await,
            Some(StoreEvent::PurchasesUpdated { ref result, .. }) if result.code == ResponseCode::UserCanceled
        ));
        assert_eq!(rx.recv().await, Some(StoreEvent::Disconnected));
    }

    #[test]
    fn test_callback_after_worker_gone_is_silent() {
        let (callbacks, rx) = StoreCallbacks::channel();
        drop(rx);
        callbacks.on_disconnected();
    }
}
