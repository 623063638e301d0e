//! # Storefront
//!
//! Thin façade the UI layer holds instead of a raw [`BillingHandle`].
//!
//! It adds one behavior on top of the handle: when a new purchase includes
//! a subscription, owned purchases are refreshed so the tier it replaced
//! drops back to `Unpurchased`.
//!
//! ```text
//! new_purchases ──► any id a subscription? ──yes──► refresh_purchases()
//! ```

use std::collections::HashSet;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tollgate_core::{SkuId, UiHandle};

use crate::agent::BillingHandle;
use crate::error::BillingResult;
use crate::flow::LaunchedFlow;

/// UI-facing entry point.
#[derive(Debug)]
pub struct Storefront {
    handle: BillingHandle,
    watcher: JoinHandle<()>,
}

impl Storefront {
    /// Wraps a running agent and starts the subscription watcher.
    ///
    /// The watcher subscribes to new purchases, so it also receives one
    /// purchase completed before the storefront existed.
    pub fn new(handle: BillingHandle) -> Self {
        let subscriptions: HashSet<SkuId> =
            handle.catalog_spec().subscriptions.iter().cloned().collect();
        let mut purchases = handle.new_purchases();
        let watcher_handle = handle.clone();

        let watcher = tokio::spawn(async move {
            while let Some(skus) = purchases.next().await {
                if !skus.iter().any(|sku| subscriptions.contains(sku)) {
                    continue;
                }
                debug!(?skus, "Subscription purchased, refreshing owned purchases");
                if let Err(e) = watcher_handle.refresh_purchases().await {
                    warn!(error = %e, "Refresh after subscription purchase failed");
                }
            }
        });

        Self { handle, watcher }
    }

    /// The wrapped handle, for reactive views.
    pub fn handle(&self) -> &BillingHandle {
        &self.handle
    }

    /// Buys `id`, replacing a held tier of its upgrade group if any.
    pub async fn buy(&self, ui: UiHandle, id: &str) -> BillingResult<LaunchedFlow> {
        self.handle.buy(ui, id).await
    }

    /// Stops the watcher and the agent.
    pub async fn shutdown(self) -> BillingResult<()> {
        self.watcher.abort();
        self.handle.shutdown().await
    }
}
