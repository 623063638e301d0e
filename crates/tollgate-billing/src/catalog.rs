//! # Catalog
//!
//! The fixed set of configured SKUs and their observable cells.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Catalog                                    │
//! │                                                                         │
//! │   id ──► SkuRecord                                                      │
//! │          ├── kind                 (fixed at initialize)                 │
//! │          ├── state    LatestCell<SkuState>         written by worker    │
//! │          ├── details  LatestCell<Option<Details>>  written by worker    │
//! │          └── last_details_fetch   freshness stamp                       │
//! │                                                                         │
//! │   first observer of a details cell ──► stale? ──► requery (capacity 1)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The id set never changes after [`Catalog::initialize`]. Any lookup of an
//! id outside it fails with [`BillingError::UnknownSku`](crate::error::BillingError::UnknownSku).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use tollgate_core::{CatalogSpec, CoreError, SkuDetails, SkuId, SkuKind, SkuState};

use crate::cell::LatestCell;
use crate::error::BillingResult;

/// Request for the worker to refetch listing details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailsRequery {
    /// Id whose observation triggered the request.
    pub trigger: SkuId,
}

// =============================================================================
// SKU Record
// =============================================================================

/// Per-item cells.
#[derive(Debug)]
pub struct SkuRecord {
    id: SkuId,
    kind: SkuKind,
    state: LatestCell<SkuState>,
    details: LatestCell<Option<SkuDetails>>,
    last_details_fetch: Mutex<Option<Instant>>,
}

impl SkuRecord {
    fn new(id: SkuId, kind: SkuKind) -> Self {
        Self {
            id,
            kind,
            state: LatestCell::new(SkuState::Unpurchased),
            details: LatestCell::new(None),
            last_details_fetch: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> SkuKind {
        self.kind
    }

    pub fn state(&self) -> &LatestCell<SkuState> {
        &self.state
    }

    pub fn details(&self) -> &LatestCell<Option<SkuDetails>> {
        &self.details
    }

    fn stamp(&self, at: Option<Instant>) {
        *self.last_details_fetch.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    fn is_stale(&self, max_age: Duration) -> bool {
        match *self.last_details_fetch.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(at) => at.elapsed() > max_age,
            None => true,
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Keyed collection of [`SkuRecord`]s.
#[derive(Debug)]
pub struct Catalog {
    spec: CatalogSpec,
    records: HashMap<SkuId, SkuRecord>,
    auto_consume: HashSet<SkuId>,
    requery_interval: Duration,
    requery_tx: mpsc::Sender<DetailsRequery>,
}

impl Catalog {
    /// Builds the catalog from a validated spec.
    ///
    /// Returns the receiving side of the details requery channel. It holds
    /// at most one pending request; further triggers coalesce into it.
    pub fn initialize(
        spec: CatalogSpec,
        requery_interval: Duration,
    ) -> BillingResult<(Self, mpsc::Receiver<DetailsRequery>)> {
        spec.validate()?;

        let mut records = HashMap::new();
        for kind in SkuKind::ALL {
            for id in spec.ids_of(kind) {
                records.insert(id.clone(), SkuRecord::new(id.clone(), kind));
            }
        }
        let auto_consume = spec.auto_consume.iter().cloned().collect();
        let (requery_tx, requery_rx) = mpsc::channel(1);

        info!(
            one_time = spec.one_time.len(),
            subscriptions = spec.subscriptions.len(),
            auto_consume = spec.auto_consume.len(),
            "Catalog initialized"
        );

        Ok((
            Self {
                spec,
                records,
                auto_consume,
                requery_interval,
                requery_tx,
            },
            requery_rx,
        ))
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// The configuration the catalog was built from.
    pub fn spec(&self) -> &CatalogSpec {
        &self.spec
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn record(&self, id: &str) -> BillingResult<&SkuRecord> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| CoreError::UnknownSku(id.to_string()))?;
        Ok(record)
    }

    pub fn kind_of(&self, id: &str) -> BillingResult<SkuKind> {
        self.record(id).map(SkuRecord::kind)
    }

    /// Configured ids of one kind, in configuration order.
    pub fn ids_of(&self, kind: SkuKind) -> &[SkuId] {
        self.spec.ids_of(kind)
    }

    pub fn is_auto_consume(&self, id: &str) -> bool {
        self.auto_consume.contains(id)
    }

    /// Current state snapshot.
    pub fn state(&self, id: &str) -> BillingResult<SkuState> {
        Ok(self.record(id)?.state.get())
    }

    /// Current details snapshot.
    pub fn details(&self, id: &str) -> BillingResult<Option<SkuDetails>> {
        Ok(self.record(id)?.details.get())
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Subscribes to an item's state.
    pub fn observe_state(&self, id: &str) -> BillingResult<watch::Receiver<SkuState>> {
        Ok(self.record(id)?.state.subscribe())
    }

    /// Subscribes to an item's details.
    ///
    /// The first subscriber of an idle cell checks freshness: if the
    /// details are older than the requery interval, every record is stamped
    /// and one requery is requested from the worker.
    pub fn observe_details(
        &self,
        id: &str,
    ) -> BillingResult<watch::Receiver<Option<SkuDetails>>> {
        let record = self.record(id)?;
        let was_idle = !record.details.is_observed();
        let rx = record.details.subscribe();

        if was_idle && record.is_stale(self.requery_interval) {
            self.request_requery(id);
        }
        Ok(rx)
    }

    fn request_requery(&self, trigger: &str) {
        let now = Instant::now();
        for record in self.records.values() {
            record.stamp(Some(now));
        }

        match self.requery_tx.try_send(DetailsRequery {
            trigger: trigger.to_string(),
        }) {
            Ok(()) => debug!(sku = trigger, "Details requery requested"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(sku = trigger, "Details requery already pending")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(sku = trigger, "Details requery dropped, worker is gone")
            }
        }
    }

    // =========================================================================
    // Mutation (worker only)
    // =========================================================================

    /// Sets an item's state. Returns true if it changed.
    pub fn apply_state(&self, id: &str, state: SkuState) -> BillingResult<bool> {
        let record = self.record(id)?;
        let changed = record.state.set(state);
        if changed {
            debug!(sku = id, %state, "SKU state changed");
        }
        Ok(changed)
    }

    /// Stores freshly fetched details and stamps the record.
    pub fn apply_details(&self, details: SkuDetails) -> BillingResult<()> {
        let record = self.record(&details.sku)?;
        record.stamp(Some(Instant::now()));
        record.details.set(Some(details));
        Ok(())
    }

    /// Marks every record of `kind` as never fetched, so the next observer
    /// triggers a requery.
    pub fn mark_stale(&self, kind: SkuKind) {
        for record in self.records.values().filter(|r| r.kind == kind) {
            record.stamp(None);
        }
    }
}
