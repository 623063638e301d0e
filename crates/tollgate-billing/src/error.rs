//! # Billing Error Types
//!
//! Error types for billing operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Billing Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Store       │  │     Signature           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Store{op,code} │  │  InvalidSignature       │ │
//! │  │  UnknownSku     │  │  PurchaseNot-   │  │  InvalidPublicKey       │ │
//! │  │  ConfigLoad/Save│  │    Found        │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Connection    │  │      Flow       │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  NotConnected   │  │  DetailsNot-    │  │  ChannelError           │ │
//! │  │                 │  │    Ready        │  │  ShuttingDown           │ │
//! │  │                 │  │  AmbiguousUpgr. │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Store failures during reconciliation never surface here: the worker logs
//! them and the next reconciliation pass heals the state. Only operations
//! with a caller waiting on a reply (`buy`, `consume_by_id`) return these.

use thiserror::Error;
use tollgate_core::{CoreError, ResponseCode, StoreResult};

/// Result type alias for billing operations.
pub type BillingResult<T> = Result<T, BillingError>;

// =============================================================================
// Store Operations
// =============================================================================

/// Store Client operation a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    StartConnection,
    QueryDetails,
    QueryPurchases,
    LaunchFlow,
    Consume,
    Acknowledge,
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StoreOperation::StartConnection => "start_connection",
            StoreOperation::QueryDetails => "query_details",
            StoreOperation::QueryPurchases => "query_purchases",
            StoreOperation::LaunchFlow => "launch_flow",
            StoreOperation::Consume => "consume",
            StoreOperation::Acknowledge => "acknowledge",
        };
        write!(f, "{}", s)
    }
}

/// Coarse grouping used by hosts to pick a handling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Store,
    Signature,
    Connection,
    Flow,
    Internal,
}

// =============================================================================
// Billing Error
// =============================================================================

/// Billing error type covering all possible orchestrator failures.
#[derive(Debug, Error)]
pub enum BillingError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid billing configuration.
    #[error("Invalid billing configuration: {0}")]
    InvalidConfig(String),

    /// Id is not part of the configured catalog.
    #[error("Unknown SKU: {0}")]
    UnknownSku(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// A Store Client call returned a non-OK code.
    #[error("Store {operation} failed with {code}: {message}")]
    Store {
        operation: StoreOperation,
        code: ResponseCode,
        message: String,
    },

    /// No owned purchase covers the requested id.
    #[error("No owned purchase covers {0}")]
    PurchaseNotFound(String),

    // =========================================================================
    // Signature Errors
    // =========================================================================
    /// Public key could not be decoded.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Purchase signature did not verify.
    #[error("Invalid signature on purchase {token}")]
    InvalidSignature { token: String },

    // =========================================================================
    // Connection Errors
    // =========================================================================
    /// Operation needs a ready store connection.
    #[error("Not connected to the store")]
    NotConnected,

    // =========================================================================
    // Flow Errors
    // =========================================================================
    /// Listing details have not arrived yet; a flow cannot be launched.
    #[error("Details for {0} are not loaded yet")]
    DetailsNotReady(String),

    /// More than one replaceable subscription is held.
    #[error("Cannot pick the subscription to replace: {held} held among {candidates:?}")]
    AmbiguousUpgrade { held: usize, candidates: Vec<String> },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Agent is shutting down.
    #[error("Billing agent is shutting down")]
    ShuttingDown,
}

impl BillingError {
    /// Builds a store error from a non-OK result.
    pub fn store(operation: StoreOperation, result: &StoreResult) -> Self {
        BillingError::Store {
            operation,
            code: result.code,
            message: result.debug_message.clone(),
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for BillingError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownSku(sku) => BillingError::UnknownSku(sku),
            other => BillingError::InvalidConfig(other.to_string()),
        }
    }
}

impl From<tollgate_core::ValidationError> for BillingError {
    fn from(err: tollgate_core::ValidationError) -> Self {
        BillingError::InvalidConfig(err.to_string())
    }
}

impl From<std::io::Error> for BillingError {
    fn from(err: std::io::Error) -> Self {
        BillingError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for BillingError {
    fn from(err: toml::de::Error) -> Self {
        BillingError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for BillingError {
    fn from(err: toml::ser::Error) -> Self {
        BillingError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl BillingError {
    /// Returns the category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            BillingError::InvalidConfig(_)
            | BillingError::UnknownSku(_)
            | BillingError::ConfigLoadFailed(_)
            | BillingError::ConfigSaveFailed(_) => ErrorCategory::Configuration,
            BillingError::Store { .. } | BillingError::PurchaseNotFound(_) => ErrorCategory::Store,
            BillingError::InvalidPublicKey(_) | BillingError::InvalidSignature { .. } => {
                ErrorCategory::Signature
            }
            BillingError::NotConnected => ErrorCategory::Connection,
            BillingError::DetailsNotReady(_) | BillingError::AmbiguousUpgrade { .. } => {
                ErrorCategory::Flow
            }
            BillingError::ChannelError(_) | BillingError::ShuttingDown => ErrorCategory::Internal,
        }
    }

    /// Returns true if the same call may succeed later without any change.
    ///
    /// ## Retryable Errors
    /// - Store outages (timeout, disconnected, unavailable)
    /// - No connection yet, or a lost one being re-established
    /// - Details that simply have not loaded yet
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::Store { code, .. } => code.is_transient(),
            BillingError::NotConnected | BillingError::DetailsNotReady(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
            || matches!(self, BillingError::InvalidPublicKey(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let timeout = StoreResult::new(ResponseCode::ServiceTimeout, "slow");
        assert!(BillingError::store(StoreOperation::Consume, &timeout).is_retryable());
        assert!(BillingError::NotConnected.is_retryable());
        assert!(BillingError::DetailsNotReady("sub01".into()).is_retryable());

        let dev = StoreResult::new(ResponseCode::DeveloperError, "bad args");
        assert!(!BillingError::store(StoreOperation::LaunchFlow, &dev).is_retryable());
        assert!(!BillingError::InvalidConfig("bad".into()).is_retryable());
        assert!(!BillingError::AmbiguousUpgrade {
            held: 2,
            candidates: vec![]
        }
        .is_retryable());
    }

    #[test]
    fn test_categories() {
        assert!(BillingError::UnknownSku("x".into()).is_config_error());
        assert!(BillingError::InvalidPublicKey("short".into()).is_config_error());
        assert_eq!(
            BillingError::InvalidSignature { token: "t".into() }.category(),
            ErrorCategory::Signature
        );
        assert_eq!(BillingError::ShuttingDown.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_error_display() {
        let err = BillingError::store(
            StoreOperation::Acknowledge,
            &StoreResult::new(ResponseCode::ItemNotOwned, "gone"),
        );
        assert_eq!(
            err.to_string(),
            "Store acknowledge failed with item_not_owned: gone"
        );
    }

    #[test]
    fn test_core_error_conversion() {
        let err: BillingError = CoreError::UnknownSku("gems".into()).into();
        assert!(matches!(err, BillingError::UnknownSku(ref s) if s == "gems"));
    }
}
