//! # Flow Launcher
//!
//! Resolves subscription upgrades and hands the purchase UI to the store.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  launch(ui, target, candidates)                                         │
//! │    │                                                                    │
//! │    ├─ details(target) absent ─────────────► Err(DetailsNotReady)        │
//! │    │                                                                    │
//! │    ├─ held subscriptions among candidates                               │
//! │    │     0 ──► plain purchase                                           │
//! │    │     1 ──► replace_token = that purchase's token                    │
//! │    │    2+ ──► Err(AmbiguousUpgrade), store never called                │
//! │    │                                                                    │
//! │    └─ store.launch_flow ── OK ──► flow_in_process ← true                │
//! │                          └ err ─► logged, flag unchanged                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tracing::{error, info, warn};

use tollgate_core::{FlowParams, PurchaseRecord, SkuId, SkuKind, UiHandle};

use crate::catalog::Catalog;
use crate::error::{BillingError, BillingResult, StoreOperation};
use crate::events::EventFabric;
use crate::store::StoreClient;

/// A flow the store accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedFlow {
    pub sku: SkuId,
    /// Token of the subscription being replaced, if any.
    pub replaced_token: Option<String>,
}

/// Launches purchase flows.
pub struct FlowLauncher {
    catalog: Arc<Catalog>,
    store: Arc<dyn StoreClient>,
    events: Arc<EventFabric>,
}

impl FlowLauncher {
    pub fn new(catalog: Arc<Catalog>, store: Arc<dyn StoreClient>, events: Arc<EventFabric>) -> Self {
        Self {
            catalog,
            store,
            events,
        }
    }

    pub async fn launch(
        &self,
        ui: &UiHandle,
        target: &str,
        upgrade_candidates: &[SkuId],
    ) -> BillingResult<LaunchedFlow> {
        let details = self
            .catalog
            .details(target)?
            .ok_or_else(|| BillingError::DetailsNotReady(target.to_string()))?;

        let replace_token = if upgrade_candidates.is_empty() {
            None
        } else {
            self.resolve_upgrade(upgrade_candidates).await?
        };

        let params = FlowParams {
            details,
            replace_token: replace_token.clone(),
        };
        let upgrade = params.is_upgrade();
        let result = self.store.launch_flow(ui, params).await;
        if !result.is_ok() {
            error!(
                sku = target,
                code = %result.code,
                message = %result.debug_message,
                "Billing flow launch failed"
            );
            return Err(BillingError::store(StoreOperation::LaunchFlow, &result));
        }

        self.events.flow_in_process.set(true);
        info!(sku = target, upgrade, "Billing flow launched");
        Ok(LaunchedFlow {
            sku: target.to_string(),
            replaced_token: replace_token,
        })
    }

    /// Finds the single held subscription a purchase would replace.
    async fn resolve_upgrade(&self, candidates: &[SkuId]) -> BillingResult<Option<String>> {
        let response = self
            .store
            .query_owned_purchases(SkuKind::Subscription)
            .await;
        if !response.result.is_ok() {
            // Treated as nothing held; the store rejects a wrong plain
            // purchase with ItemAlreadyOwned.
            warn!(
                code = %response.result.code,
                "Could not query held subscriptions, launching without upgrade"
            );
            return Ok(None);
        }

        let held: Vec<&PurchaseRecord> = response
            .purchases
            .iter()
            .filter(|p| p.covers_any(candidates))
            .collect();

        match held.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(one.token.clone())),
            many => {
                error!(
                    held = many.len(),
                    ?candidates,
                    "More than one replaceable subscription held, not launching"
                );
                Err(BillingError::AmbiguousUpgrade {
                    held: many.len(),
                    candidates: candidates.to_vec(),
                })
            }
        }
    }
}

impl std::fmt::Debug for FlowLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowLauncher").finish_non_exhaustive()
    }
}
