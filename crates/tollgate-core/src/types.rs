//! # Domain Types
//!
//! Core domain types used throughout Tollgate.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   SkuDetails    │   │ PurchaseRecord  │   │  StoreResult    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  sku            │   │  token (ident.) │   │  code           │       │
//! │  │  kind           │   │  skus (1..n)    │   │  debug_message  │       │
//! │  │  title, price   │   │  state, acked   │   └─────────────────┘       │
//! │  │  description    │   │  payload + sig  │                             │
//! │  └─────────────────┘   └─────────────────┘                             │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    SkuKind      │   │    SkuState     │   │ PurchaseState   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  OneTime        │   │  Unpurchased    │   │  Unspecified    │       │
//! │  │  Subscription   │   │  Pending        │   │  Pending        │       │
//! │  └─────────────────┘   │  Purchased      │   │  Purchased      │       │
//! │                        │  Purchased+Ack  │   └─────────────────┘       │
//! │                        └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! A SKU is identified by its catalog id. A purchase is identified by its
//! opaque store `token`; the same token can arrive many times through
//! different queries and pushes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Catalog item identifier.
pub type SkuId = String;

// =============================================================================
// SKU Kind
// =============================================================================

/// Whether an item is bought once or held as a recurring entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkuKind {
    /// Purchasable once; may be auto-consumed so it can be bought again.
    OneTime,
    /// Recurring entitlement.
    Subscription,
}

impl SkuKind {
    /// Both kinds, in the order the store is queried.
    pub const ALL: [SkuKind; 2] = [SkuKind::OneTime, SkuKind::Subscription];
}

impl std::fmt::Display for SkuKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkuKind::OneTime => write!(f, "one_time"),
            SkuKind::Subscription => write!(f, "subscription"),
        }
    }
}

// =============================================================================
// SKU State
// =============================================================================

/// Entitlement state of a single catalog item.
///
/// ## State Machine
/// ```text
/// ┌─────────────┐  pending   ┌─────────┐  purchased  ┌───────────┐
/// │ Unpurchased │ ─────────► │ Pending │ ──────────► │ Purchased │
/// └─────────────┘            └─────────┘             └─────┬─────┘
///        ▲                                                 │ acknowledge
///        │  consumed / confirmed absent                    ▼
///        └──────────────────────────────── ┌──────────────────────────┐
///                                          │ PurchasedAndAcknowledged │
///                                          └──────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkuState {
    /// Not held by the user.
    #[default]
    Unpurchased,
    /// Payment started but not completed (e.g. cash payment pending).
    Pending,
    /// Paid, not yet acknowledged to the store.
    Purchased,
    /// Paid and acknowledged; the entitlement is durable.
    PurchasedAndAcknowledged,
}

impl SkuState {
    /// Maps a store purchase state onto the entitlement state it implies.
    ///
    /// An unspecified purchase carries no entitlement and maps to
    /// `Unpurchased`.
    pub fn from_purchase(state: PurchaseState, acknowledged: bool) -> Self {
        match state {
            PurchaseState::Unspecified => SkuState::Unpurchased,
            PurchaseState::Pending => SkuState::Pending,
            PurchaseState::Purchased if acknowledged => SkuState::PurchasedAndAcknowledged,
            PurchaseState::Purchased => SkuState::Purchased,
        }
    }

    /// True once the user fully owns the item.
    #[inline]
    pub fn is_entitled(&self) -> bool {
        matches!(self, SkuState::PurchasedAndAcknowledged)
    }
}

impl std::fmt::Display for SkuState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkuState::Unpurchased => write!(f, "unpurchased"),
            SkuState::Pending => write!(f, "pending"),
            SkuState::Purchased => write!(f, "purchased"),
            SkuState::PurchasedAndAcknowledged => write!(f, "purchased_and_acknowledged"),
        }
    }
}

// =============================================================================
// SKU Details
// =============================================================================

/// Store-provided listing data for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuDetails {
    /// Catalog id.
    pub sku: SkuId,

    /// One-time or subscription.
    pub kind: SkuKind,

    /// Localised display title.
    pub title: String,

    /// Formatted price, already localised by the store (e.g. "¥120").
    pub price: String,

    /// Localised description.
    pub description: String,
}

// =============================================================================
// Purchase
// =============================================================================

/// Store-side state of a purchase transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseState {
    Unspecified,
    Pending,
    Purchased,
}

impl std::fmt::Display for PurchaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurchaseState::Unspecified => write!(f, "unspecified"),
            PurchaseState::Pending => write!(f, "pending"),
            PurchaseState::Purchased => write!(f, "purchased"),
        }
    }
}

/// A purchase as delivered by the store.
///
/// Ephemeral: the orchestrator never stores these, it only applies them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    /// Opaque purchase identity.
    pub token: String,

    /// Items covered by this single transaction (never empty).
    pub skus: Vec<SkuId>,

    /// Store-side state.
    pub state: PurchaseState,

    /// Whether the purchase has been acknowledged to the store.
    pub acknowledged: bool,

    /// Exact bytes the store signed (JSON document).
    pub payload: String,

    /// Base64 signature over `payload`.
    pub signature: String,

    /// Store order id, absent for pending purchases.
    #[serde(default)]
    pub order_id: Option<String>,

    /// When the purchase was made.
    pub purchase_time: DateTime<Utc>,
}

impl PurchaseRecord {
    /// Returns true if this purchase covers the given SKU.
    pub fn covers(&self, sku: &str) -> bool {
        self.skus.iter().any(|s| s == sku)
    }

    /// Returns true if any of the given SKUs is covered.
    pub fn covers_any<'a, I>(&self, skus: I) -> bool
    where
        I: IntoIterator<Item = &'a SkuId>,
    {
        skus.into_iter().any(|s| self.covers(s))
    }

    /// Returns true if the store reports the purchase as paid.
    #[inline]
    pub fn is_purchased(&self) -> bool {
        self.state == PurchaseState::Purchased
    }

    /// Rejects records that cover no SKUs.
    pub fn check(&self) -> CoreResult<()> {
        if self.skus.is_empty() {
            return Err(CoreError::EmptyPurchase {
                token: self.token.clone(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Store Responses
// =============================================================================

/// Response code returned by every Store Client operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    Ok,
    UserCanceled,
    ServiceTimeout,
    ServiceDisconnected,
    ServiceUnavailable,
    BillingUnavailable,
    ItemUnavailable,
    DeveloperError,
    Error,
    ItemAlreadyOwned,
    ItemNotOwned,
    FeatureNotSupported,
}

impl ResponseCode {
    /// True for `Ok`.
    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, ResponseCode::Ok)
    }

    /// Codes that describe an outage rather than a request problem.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResponseCode::ServiceTimeout
                | ResponseCode::ServiceDisconnected
                | ResponseCode::ServiceUnavailable
                | ResponseCode::Error
        )
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResponseCode::Ok => "ok",
            ResponseCode::UserCanceled => "user_canceled",
            ResponseCode::ServiceTimeout => "service_timeout",
            ResponseCode::ServiceDisconnected => "service_disconnected",
            ResponseCode::ServiceUnavailable => "service_unavailable",
            ResponseCode::BillingUnavailable => "billing_unavailable",
            ResponseCode::ItemUnavailable => "item_unavailable",
            ResponseCode::DeveloperError => "developer_error",
            ResponseCode::Error => "error",
            ResponseCode::ItemAlreadyOwned => "item_already_owned",
            ResponseCode::ItemNotOwned => "item_not_owned",
            ResponseCode::FeatureNotSupported => "feature_not_supported",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a Store Client call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreResult {
    pub code: ResponseCode,
    #[serde(default)]
    pub debug_message: String,
}

impl StoreResult {
    /// A successful result with no message.
    pub fn ok() -> Self {
        StoreResult {
            code: ResponseCode::Ok,
            debug_message: String::new(),
        }
    }

    /// A result with the given code and message.
    pub fn new(code: ResponseCode, debug_message: impl Into<String>) -> Self {
        StoreResult {
            code,
            debug_message: debug_message.into(),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}

/// Result of a details query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailsResponse {
    pub result: StoreResult,
    pub items: Vec<SkuDetails>,
}

/// Result of an owned-purchases query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchasesResponse {
    pub result: StoreResult,
    pub purchases: Vec<PurchaseRecord>,
}

// =============================================================================
// Purchase Flow
// =============================================================================

/// Opaque reference to the host surface a purchase flow is shown on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UiHandle(pub String);

impl UiHandle {
    pub fn new(id: impl Into<String>) -> Self {
        UiHandle(id.into())
    }
}

/// Parameters handed to the store when launching a purchase flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowParams {
    /// Details of the item being bought.
    pub details: SkuDetails,

    /// Token of a held subscription this purchase replaces (upgrade/downgrade).
    pub replace_token: Option<String>,
}

impl FlowParams {
    /// Returns true if the flow replaces an existing subscription.
    pub fn is_upgrade(&self) -> bool {
        self.replace_token.is_some()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
