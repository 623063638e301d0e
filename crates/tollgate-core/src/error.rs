//! # Error Types
//!
//! Domain-specific error types for tollgate-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tollgate-core errors (this file)                                      │
//! │  ├── CoreError        - Domain lookups and mapping failures            │
//! │  └── ValidationError  - Catalog configuration failures                 │
//! │                                                                         │
//! │  tollgate-billing errors (separate crate)                              │
//! │  └── BillingError     - Store, signature, connection, flow failures    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → BillingError → UI collaborator    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// SKU is not part of the configured catalog.
    ///
    /// ## When This Occurs
    /// - A purchase record covers an id the catalog was never told about
    /// - A UI collaborator asks for a cell of an unconfigured id
    /// - The store returns details for an id nobody requested
    #[error("Unknown SKU: {0}")]
    UnknownSku(String),

    /// Purchase record has no SKUs.
    #[error("Purchase {token} covers no SKUs")]
    EmptyPurchase { token: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Catalog configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g. an id listed as both one-time and subscription).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },

    /// Value must belong to another configured set.
    #[error("{field} '{value}' is not listed in {parent}")]
    NotInSet {
        field: String,
        value: String,
        parent: String,
    },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::UnknownSku("gold_coins".to_string());
        assert_eq!(err.to_string(), "Unknown SKU: gold_coins");

        let err = ValidationError::NotInSet {
            field: "auto_consume".to_string(),
            value: "premium".to_string(),
            parent: "one_time".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "auto_consume 'premium' is not listed in one_time"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "sku".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
