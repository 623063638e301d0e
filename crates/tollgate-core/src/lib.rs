//! # tollgate-core: Pure Domain Types for Tollgate
//!
//! This crate holds the vocabulary of the purchase-state orchestrator:
//! what a SKU is, which states it moves through, what the store hands back
//! for a purchase, and how a catalog configuration is validated.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tollgate Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 UI collaborators (not in this repo)             │   │
//! │  │     isPurchased ──► canPurchase ──► buy ──► newPurchases        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              tollgate-billing (orchestration core)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tollgate-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌─────────────┐  ┌────────────┐               │   │
//! │  │   │   types   │  │ validation  │  │   error    │               │   │
//! │  │   │ SkuState  │  │ CatalogSpec │  │ CoreError  │               │   │
//! │  │   │ Purchase  │  │  subset     │  │ Validation │               │   │
//! │  │   └───────────┘  └─────────────┘  └────────────┘               │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO TIMERS • NO CHANNELS • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (SkuState, PurchaseRecord, StoreResult, etc.)
//! - [`validation`] - Catalog configuration rules
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use tollgate_core::{PurchaseState, SkuState};
//!
//! // An acknowledged purchase maps to the terminal entitlement state.
//! let state = SkuState::from_purchase(PurchaseState::Purchased, true);
//! assert_eq!(state, SkuState::PurchasedAndAcknowledged);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;
pub use validation::CatalogSpec;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of a SKU identifier accepted by the catalog.
pub const MAX_SKU_LEN: usize = 150;
