//! # tollgate-billing: Purchase-State Orchestration
//!
//! Tracks entitlement state for a fixed catalog, reconciles it against the
//! platform store, and drives the purchase / consume / acknowledge
//! lifecycle.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Billing Agent Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 BillingAgent (single worker task)                │  │
//! │  │                                                                  │  │
//! │  │  Owns every mutation of catalog cells and the flow flag          │  │
//! │  │  Handles store callbacks and handle commands one at a time       │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Reconciler     │  │ FlowLauncher   │  │ BackoffSupervisor      │    │
//! │  │                │  │                │  │                        │    │
//! │  │ verify, apply, │  │ upgrade        │  │ 1s, 2s, 4s ... 15min   │    │
//! │  │ consume, ack   │  │ resolution     │  │ reset on connect       │    │
//! │  └───────┬────────┘  └────────────────┘  └────────────────────────┘    │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Catalog        │  │ Consumption    │  │ EventFabric            │    │
//! │  │ state/details  │  │ Guard          │  │ new / consumed / flow  │    │
//! │  │ cells per SKU  │  │ token dedupe   │  │ connection             │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  STORE SEAM: StoreClient trait (async) + StoreCallbacks (events in)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `BillingAgent` worker and the `BillingHandle` contract
//! - [`catalog`] - Per-SKU cells and details freshness
//! - [`cell`] - Latest-value observable cells
//! - [`config`] - `billing.toml` + environment configuration
//! - [`error`] - Billing error types
//! - [`events`] - Multicast notification channels
//! - [`flow`] - Purchase flow launch and upgrade resolution
//! - [`guard`] - In-flight consume deduplication
//! - [`reconciler`] - Purchase-list processing
//! - [`security`] - Purchase signature verification
//! - [`store`] - The Store Client seam
//! - [`storefront`] - UI-facing façade
//! - [`supervisor`] - Reconnect backoff
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tollgate_billing::{BillingAgent, BillingConfig, Storefront};
//!
//! let config = BillingConfig::load_or_default(None);
//! let agent = BillingAgent::from_config(&config, Arc::new(vendor_store))?;
//! let storefront = Storefront::new(agent.start());
//!
//! let mut owned = storefront.handle().is_purchased("remove_ads")?;
//! storefront.buy(UiHandle::new("main"), "remove_ads").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod catalog;
pub mod cell;
pub mod config;
pub mod error;
pub mod events;
pub mod flow;
pub mod guard;
pub mod reconciler;
pub mod security;
pub mod store;
pub mod storefront;
pub mod supervisor;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{BillingAgent, BillingHandle};
pub use catalog::{Catalog, DetailsRequery, SkuRecord};
pub use cell::LatestCell;
pub use config::{AckNotifyPolicy, BillingConfig};
pub use error::{BillingError, BillingResult, ErrorCategory, StoreOperation};
pub use events::{ConnectionState, EventFabric};
pub use flow::{FlowLauncher, LaunchedFlow};
pub use guard::ConsumptionGuard;
pub use reconciler::{ConsumeOutcome, ReconcileReport, Reconciler};
pub use security::{Ed25519Verifier, PurchaseVerifier};
pub use store::{StoreCallbacks, StoreClient, StoreEvent};
pub use storefront::Storefront;
pub use supervisor::{BackoffSupervisor, ConnectDecision};

// Domain types callers need alongside the handle.
pub use tollgate_core::{
    CatalogSpec, PurchaseRecord, PurchaseState, ResponseCode, SkuDetails, SkuId, SkuKind,
    SkuState, StoreResult, UiHandle,
};
