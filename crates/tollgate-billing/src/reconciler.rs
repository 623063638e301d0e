//! # Reconciler
//!
//! Applies purchase lists from the store to the catalog and triggers the
//! consume/acknowledge side effects.
//!
//! ## One Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for each purchase                                                      │
//! │    │                                                                    │
//! │    ├─ covers no skus ──► skip                                           │
//! │    ├─ token consumed earlier? ──► skip                                  │
//! │    ├─ mark covered skus observed (unknown skus: log)                    │
//! │    │                                                                    │
//! │    ├─ not Purchased ──► state ← Pending / Unpurchased, no events        │
//! │    │                                                                    │
//! │    └─ Purchased                                                         │
//! │         ├─ signature invalid ──► skip entirely                          │
//! │         ├─ token acknowledged earlier ──► state ← Purchased+Ack         │
//! │         ├─ state ← Purchased / Purchased+Ack                            │
//! │         ├─ all skus auto-consume ──► consume ──► NewPurchase            │
//! │         └─ otherwise, not acked ──► acknowledge ──► NewPurchase         │
//! │                                                                         │
//! │  ids_to_confirm not observed ──► state ← Unpurchased                    │
//! │  settled tokens of those ids not in the list ──► forgotten              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Store failures are logged and leave entitlement state as it was, so the
//! next pass retries them. A pass is idempotent per purchase, not
//! transactional across the list.
//!
//! Settled tokens are remembered only while the store keeps reporting them:
//! an authoritative pass that no longer lists a token drops it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use tollgate_core::{PurchaseRecord, ResponseCode, SkuId, SkuKind, SkuState};

use crate::catalog::Catalog;
use crate::config::AckNotifyPolicy;
use crate::error::{BillingError, BillingResult, StoreOperation};
use crate::events::EventFabric;
use crate::guard::ConsumptionGuard;
use crate::security::PurchaseVerifier;
use crate::store::StoreClient;

// =============================================================================
// Report
// =============================================================================

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Purchases looked at.
    pub purchases: usize,
    /// Covered ids missing from the catalog.
    pub unknown_skus: usize,
    /// Purchases dropped for a bad signature.
    pub rejected_signatures: usize,
    /// Purchases mixing consumable and non-consumable ids.
    pub mixed_bundles: usize,
    /// Successful consume calls.
    pub consumed: usize,
    /// Successful acknowledge calls.
    pub acknowledged: usize,
    /// New-purchase notifications emitted.
    pub new_purchase_events: usize,
    /// Ids reset because the store no longer reports them.
    pub reset: usize,
    /// Settled tokens dropped because the store no longer reports them.
    pub forgotten: usize,
}

impl std::ops::AddAssign for ReconcileReport {
    fn add_assign(&mut self, other: Self) {
        self.purchases += other.purchases;
        self.unknown_skus += other.unknown_skus;
        self.rejected_signatures += other.rejected_signatures;
        self.mixed_bundles += other.mixed_bundles;
        self.consumed += other.consumed;
        self.acknowledged += other.acknowledged;
        self.new_purchase_events += other.new_purchase_events;
        self.reset += other.reset;
        self.forgotten += other.forgotten;
    }
}

/// Result of a guarded consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed,
    /// Another consume for the token was in flight.
    Suppressed,
    Failed(ResponseCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Consumability {
    Consumable,
    NonConsumable,
}

/// Tokens this session already settled with the store, with the ids each
/// one covers.
#[derive(Debug, Default)]
struct SettledTokens {
    acknowledged: HashMap<String, Vec<SkuId>>,
    consumed: HashMap<String, Vec<SkuId>>,
}

impl SettledTokens {
    fn len(&self) -> usize {
        self.acknowledged.len() + self.consumed.len()
    }

    /// Drops tokens covering any of `ids` that are not in `reported`.
    fn forget_unreported(&mut self, ids: &[SkuId], reported: &HashSet<&str>) -> usize {
        let before = self.len();
        let keep = |token: &String, skus: &mut Vec<SkuId>| {
            reported.contains(token.as_str()) || !skus.iter().any(|sku| ids.contains(sku))
        };
        self.acknowledged.retain(keep);
        self.consumed.retain(keep);
        before - self.len()
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// The purchase-list processing algorithm.
pub struct Reconciler {
    catalog: Arc<Catalog>,
    store: Arc<dyn StoreClient>,
    verifier: Arc<dyn PurchaseVerifier>,
    events: Arc<EventFabric>,
    guard: ConsumptionGuard,
    ack_policy: AckNotifyPolicy,
    settled: Mutex<SettledTokens>,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<dyn StoreClient>,
        verifier: Arc<dyn PurchaseVerifier>,
        events: Arc<EventFabric>,
        ack_policy: AckNotifyPolicy,
    ) -> Self {
        Self {
            catalog,
            store,
            verifier,
            events,
            guard: ConsumptionGuard::new(),
            ack_policy,
            settled: Mutex::new(SettledTokens::default()),
        }
    }

    /// Applies `purchases` to the catalog.
    ///
    /// When `ids_to_confirm` is given, the list is authoritative for those
    /// ids: any of them not covered by a purchase is reset to `Unpurchased`.
    pub async fn reconcile(
        &self,
        purchases: &[PurchaseRecord],
        ids_to_confirm: Option<&[SkuId]>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut observed: HashSet<&str> = HashSet::new();
        let mut reported: HashSet<&str> = HashSet::new();

        for purchase in purchases {
            report.purchases += 1;

            if let Err(e) = purchase.check() {
                error!(error = %e, "Skipping malformed purchase");
                continue;
            }
            reported.insert(purchase.token.as_str());

            let consumed_earlier = self.settled().consumed.contains_key(&purchase.token);
            if consumed_earlier {
                debug!(token = %purchase.token, "Ignoring purchase consumed earlier");
                continue;
            }

            for sku in &purchase.skus {
                if self.catalog.contains(sku) {
                    observed.insert(sku.as_str());
                } else {
                    error!(
                        sku = %sku,
                        token = %purchase.token,
                        "Purchase covers an unknown SKU, check the store console"
                    );
                    report.unknown_skus += 1;
                }
            }

            if purchase.is_purchased() {
                self.process_purchased(purchase, &mut report).await;
            } else {
                self.apply_purchase_state(purchase);
            }
        }

        if let Some(ids) = ids_to_confirm {
            for id in ids.iter().filter(|id| !observed.contains(id.as_str())) {
                match self.catalog.apply_state(id, SkuState::Unpurchased) {
                    Ok(true) => {
                        info!(sku = %id, "Store no longer reports SKU, reset to unpurchased");
                        report.reset += 1;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(sku = %id, error = %e, "Cannot confirm SKU"),
                }
            }

            report.forgotten = self.settled().forget_unreported(ids, &reported);
            if report.forgotten > 0 {
                debug!(
                    forgotten = report.forgotten,
                    "Dropped settled tokens the store no longer reports"
                );
            }
        }

        debug!(?report, "Reconciliation pass finished");
        report
    }

    async fn process_purchased(&self, purchase: &PurchaseRecord, report: &mut ReconcileReport) {
        if let Err(e) = self.check_signature(purchase) {
            error!(
                error = %e,
                skus = ?purchase.skus,
                "Discarding purchase, check the public key"
            );
            report.rejected_signatures += 1;
            return;
        }

        let acknowledged_earlier = self.settled().acknowledged.contains_key(&purchase.token);
        if acknowledged_earlier {
            self.apply_each(purchase, SkuState::PurchasedAndAcknowledged);
            return;
        }

        self.apply_purchase_state(purchase);

        match self.classify(purchase, report) {
            Consumability::Consumable => {
                if self.consume(purchase).await == ConsumeOutcome::Consumed {
                    report.consumed += 1;
                }
                self.notify_new_purchase(purchase, report);
            }
            Consumability::NonConsumable if !purchase.acknowledged => {
                let result = self.store.acknowledge(&purchase.token).await;
                if result.is_ok() {
                    info!(token = %purchase.token, skus = ?purchase.skus, "Purchase acknowledged");
                    self.apply_each(purchase, SkuState::PurchasedAndAcknowledged);
                    self.settle_acknowledged(purchase);
                    report.acknowledged += 1;
                    self.notify_new_purchase(purchase, report);
                } else {
                    error!(
                        token = %purchase.token,
                        code = %result.code,
                        message = %result.debug_message,
                        "Error acknowledging purchase"
                    );
                    if self.ack_policy == AckNotifyPolicy::Always {
                        self.notify_new_purchase(purchase, report);
                    }
                }
            }
            Consumability::NonConsumable => self.settle_acknowledged(purchase),
        }
    }

    fn check_signature(&self, purchase: &PurchaseRecord) -> BillingResult<()> {
        if self.verifier.verify(&purchase.payload, &purchase.signature) {
            Ok(())
        } else {
            Err(BillingError::InvalidSignature {
                token: purchase.token.clone(),
            })
        }
    }

    fn classify(&self, purchase: &PurchaseRecord, report: &mut ReconcileReport) -> Consumability {
        let auto = purchase
            .skus
            .iter()
            .filter(|sku| self.catalog.is_auto_consume(sku))
            .count();

        if auto == 0 {
            Consumability::NonConsumable
        } else if auto == purchase.skus.len() {
            Consumability::Consumable
        } else {
            error!(
                token = %purchase.token,
                skus = ?purchase.skus,
                "Purchase mixes consumable and non-consumable SKUs, not consuming"
            );
            report.mixed_bundles += 1;
            Consumability::NonConsumable
        }
    }

    // =========================================================================
    // Consumption
    // =========================================================================

    /// Consumes a purchase unless a consume for its token is in flight.
    ///
    /// On success every covered id goes back to `Unpurchased` and a
    /// consumed notification fires. On failure state is left alone.
    pub async fn consume(&self, purchase: &PurchaseRecord) -> ConsumeOutcome {
        let result = match self
            .guard
            .run(&purchase.token, || self.store.consume(&purchase.token))
            .await
        {
            Some(result) => result,
            None => return ConsumeOutcome::Suppressed,
        };

        if !result.is_ok() {
            error!(
                token = %purchase.token,
                code = %result.code,
                message = %result.debug_message,
                "Error while consuming"
            );
            return ConsumeOutcome::Failed(result.code);
        }

        info!(token = %purchase.token, skus = ?purchase.skus, "Purchase consumed");
        self.settled()
            .consumed
            .insert(purchase.token.clone(), purchase.skus.clone());
        self.apply_each(purchase, SkuState::Unpurchased);
        self.events.consumed_purchases.emit(purchase.skus.clone());
        ConsumeOutcome::Consumed
    }

    /// Manual consumption path: consumes the first owned one-time purchase
    /// covering `sku`.
    pub async fn consume_by_id(&self, sku: &str) -> BillingResult<()> {
        self.catalog.record(sku)?;

        let response = self.store.query_owned_purchases(SkuKind::OneTime).await;
        if !response.result.is_ok() {
            error!(
                code = %response.result.code,
                message = %response.result.debug_message,
                "Problem getting purchases"
            );
            return Err(BillingError::store(
                StoreOperation::QueryPurchases,
                &response.result,
            ));
        }

        let purchase = response
            .purchases
            .iter()
            .find(|p| p.covers(sku))
            .ok_or_else(|| BillingError::PurchaseNotFound(sku.to_string()))?;

        match self.consume(purchase).await {
            ConsumeOutcome::Consumed | ConsumeOutcome::Suppressed => Ok(()),
            ConsumeOutcome::Failed(code) => Err(BillingError::Store {
                operation: StoreOperation::Consume,
                code,
                message: format!("consume of {} failed", purchase.token),
            }),
        }
    }

    // =========================================================================
    // Full Refresh
    // =========================================================================

    /// Queries owned purchases of both kinds and reconciles each list with
    /// that kind's ids as the confirmation set.
    ///
    /// A failed query skips its kind; the other kind is still reconciled.
    pub async fn refresh_purchases(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for kind in SkuKind::ALL {
            let response = self.store.query_owned_purchases(kind).await;
            if !response.result.is_ok() {
                error!(
                    %kind,
                    code = %response.result.code,
                    message = %response.result.debug_message,
                    "Problem getting purchases"
                );
                continue;
            }
            let ids = self.catalog.ids_of(kind).to_vec();
            report += self.reconcile(&response.purchases, Some(&ids)).await;
        }
        info!(
            purchases = report.purchases,
            reset = report.reset,
            "Owned purchases refreshed"
        );
        report
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn apply_purchase_state(&self, purchase: &PurchaseRecord) {
        self.apply_each(
            purchase,
            SkuState::from_purchase(purchase.state, purchase.acknowledged),
        );
    }

    fn apply_each(&self, purchase: &PurchaseRecord, state: SkuState) {
        for sku in &purchase.skus {
            // Unknown ids were already reported while marking observed.
            let _ = self.catalog.apply_state(sku, state);
        }
    }

    fn notify_new_purchase(&self, purchase: &PurchaseRecord, report: &mut ReconcileReport) {
        self.events.new_purchases.emit(purchase.skus.clone());
        report.new_purchase_events += 1;
    }

    fn settle_acknowledged(&self, purchase: &PurchaseRecord) {
        self.settled()
            .acknowledged
            .insert(purchase.token.clone(), purchase.skus.clone());
    }

    /// Number of tokens currently remembered as acknowledged or consumed.
    pub fn settled_count(&self) -> usize {
        self.settled().len()
    }

    fn settled(&self) -> std::sync::MutexGuard<'_, SettledTokens> {
        self.settled.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("ack_policy", &self.ack_policy)
            .field("in_flight", &self.guard.in_flight_count())
            .finish_non_exhaustive()
    }
}
