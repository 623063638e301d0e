//! # Validation Module
//!
//! Catalog configuration rules.
//!
//! ## What Gets Checked
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Catalog Validation                                 │
//! │                                                                         │
//! │  one_time       ─┐                                                      │
//! │  subscriptions  ─┼──► every id non-empty, no id listed twice            │
//! │                  │                                                      │
//! │  auto_consume   ─┴──► auto_consume ⊆ one_time                           │
//! │                                                                         │
//! │  upgrade_groups ────► members are subscriptions, ≥ 2 per group          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tollgate_core::CatalogSpec;
//!
//! let spec = CatalogSpec {
//!     one_time: vec!["coins".into(), "remove_ads".into()],
//!     subscriptions: vec!["silver".into(), "gold".into()],
//!     auto_consume: vec!["coins".into()],
//!     upgrade_groups: vec![vec!["silver".into(), "gold".into()]],
//! };
//! assert!(spec.validate().is_ok());
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{SkuId, SkuKind};
use crate::MAX_SKU_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// SKU Validators
// =============================================================================

/// Validates a catalog id.
///
/// ## Rules
/// - Must not be empty
/// - At most [`MAX_SKU_LEN`] characters
///
/// The character set is the store's business; ids such as
/// `com.example.Premium-Tier` are passed through as configured.
pub fn validate_sku_id(sku: &str) -> ValidationResult<()> {
    if sku.is_empty() {
        return Err(ValidationError::Required {
            field: "sku".to_string(),
        });
    }

    if sku.len() > MAX_SKU_LEN {
        return Err(ValidationError::TooLong {
            field: "sku".to_string(),
            max: MAX_SKU_LEN,
        });
    }

    Ok(())
}

// =============================================================================
// Catalog Spec
// =============================================================================

/// The configured SKU lists a catalog is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSpec {
    /// One-time purchasable items.
    #[serde(default)]
    pub one_time: Vec<SkuId>,

    /// Subscription items.
    #[serde(default)]
    pub subscriptions: Vec<SkuId>,

    /// One-time items consumed automatically after purchase.
    #[serde(default)]
    pub auto_consume: Vec<SkuId>,

    /// Subscription tiers that replace each other on purchase.
    #[serde(default)]
    pub upgrade_groups: Vec<Vec<SkuId>>,
}

impl CatalogSpec {
    /// Validates the lists against each other.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for sku in self.one_time.iter().chain(self.subscriptions.iter()) {
            validate_sku_id(sku)?;
            if !seen.insert(sku.as_str()) {
                return Err(ValidationError::Duplicate {
                    field: "sku".to_string(),
                    value: sku.clone(),
                });
            }
        }

        for sku in &self.auto_consume {
            if !self.one_time.contains(sku) {
                return Err(ValidationError::NotInSet {
                    field: "auto_consume".to_string(),
                    value: sku.clone(),
                    parent: "one_time".to_string(),
                });
            }
        }

        for group in &self.upgrade_groups {
            if group.len() < 2 {
                return Err(ValidationError::InvalidFormat {
                    field: "upgrade_groups".to_string(),
                    reason: "a group needs at least two subscription tiers".to_string(),
                });
            }
            for sku in group {
                if !self.subscriptions.contains(sku) {
                    return Err(ValidationError::NotInSet {
                        field: "upgrade_groups".to_string(),
                        value: sku.clone(),
                        parent: "subscriptions".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Returns the kind of a configured id.
    pub fn kind_of(&self, sku: &str) -> Option<SkuKind> {
        if self.one_time.iter().any(|s| s == sku) {
            Some(SkuKind::OneTime)
        } else if self.subscriptions.iter().any(|s| s == sku) {
            Some(SkuKind::Subscription)
        } else {
            None
        }
    }

    /// Returns the configured ids of one kind.
    pub fn ids_of(&self, kind: SkuKind) -> &[SkuId] {
        match kind {
            SkuKind::OneTime => &self.one_time,
            SkuKind::Subscription => &self.subscriptions,
        }
    }

    /// Returns every configured id, one-time first.
    pub fn all_ids(&self) -> impl Iterator<Item = &SkuId> {
        self.one_time.iter().chain(self.subscriptions.iter())
    }

    /// Returns the other tiers a purchase of `sku` would replace.
    pub fn upgrade_candidates(&self, sku: &str) -> Vec<SkuId> {
        self.upgrade_groups
            .iter()
            .filter(|group| group.iter().any(|s| s == sku))
            .flat_map(|group| group.iter().filter(|s| s.as_str() != sku).cloned())
            .collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> CatalogSpec {
        CatalogSpec {
            one_time: vec!["coins".into(), "remove_ads".into()],
            subscriptions: vec!["sub01".into(), "sub02".into()],
            auto_consume: vec!["coins".into()],
            upgrade_groups: vec![vec!["sub01".into(), "sub02".into()]],
        }
    }

    #[test]
    fn test_validate_sku_id() {
        assert!(validate_sku_id("jp.example.consumable_01").is_ok());
        assert!(validate_sku_id("jp.co.bitz.Example.consumable_01").is_ok());
        assert!(validate_sku_id("premium-upgrade").is_ok());
        assert!(validate_sku_id("").is_err());
        assert!(validate_sku_id(&"a".repeat(MAX_SKU_LEN + 1)).is_err());
    }

    #[test]
    fn test_store_console_style_ids_are_accepted() {
        let s = CatalogSpec {
            one_time: vec![
                "jp.co.bitz.Example.consumable_01".into(),
                "jp.co.bitz.Example.non_consumable_01".into(),
            ],
            subscriptions: vec![
                "jp.co.bitz.Example.renewable_subscription_01".into(),
                "jp.co.bitz.Example.renewable_subscription_02".into(),
            ],
            auto_consume: vec!["jp.co.bitz.Example.consumable_01".into()],
            upgrade_groups: vec![vec![
                "jp.co.bitz.Example.renewable_subscription_01".into(),
                "jp.co.bitz.Example.renewable_subscription_02".into(),
            ]],
        };
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_valid_spec() {
        assert!(spec().validate().is_ok());
    }

    #[test]
    fn test_auto_consume_must_be_one_time() {
        let mut s = spec();
        s.auto_consume.push("sub01".into());
        let err = s.validate().unwrap_err();
        assert!(matches!(err, ValidationError::NotInSet { ref value, .. } if value == "sub01"));
    }

    #[test]
    fn test_duplicate_across_kinds() {
        let mut s = spec();
        s.subscriptions.push("coins".into());
        assert!(matches!(
            s.validate(),
            Err(ValidationError::Duplicate { .. })
        ));
    }

    #[test]
    fn test_upgrade_group_rules() {
        let mut s = spec();
        s.upgrade_groups = vec![vec!["sub01".into()]];
        assert!(s.validate().is_err());

        s.upgrade_groups = vec![vec!["sub01".into(), "remove_ads".into()]];
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_kind_lookup_and_candidates() {
        let s = spec();
        assert_eq!(s.kind_of("coins"), Some(SkuKind::OneTime));
        assert_eq!(s.kind_of("sub02"), Some(SkuKind::Subscription));
        assert_eq!(s.kind_of("nope"), None);
        assert_eq!(s.upgrade_candidates("sub01"), vec!["sub02".to_string()]);
        assert!(s.upgrade_candidates("coins").is_empty());
        assert_eq!(s.all_ids().count(), 4);
    }
}
