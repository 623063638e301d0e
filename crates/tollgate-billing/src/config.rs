//! # Billing Configuration
//!
//! Configuration management for the billing orchestrator.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TOLLGATE_PUBLIC_KEY=MCowBQYDK2VwAyEA...                            │
//! │     TOLLGATE_ACK_NOTIFY=on_confirmed                                   │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tollgate/billing.toml (Linux)                            │
//! │     ~/Library/Application Support/com.tollgate.billing/billing.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     1s..15min reconnect backoff, 4h details requery                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # billing.toml
//! [catalog]
//! one_time = ["consa", "remove_ads"]
//! subscriptions = ["sub01", "sub02"]
//! auto_consume = ["consa"]
//! upgrade_groups = [["sub01", "sub02"]]
//!
//! [connection]
//! initial_backoff_ms = 1000
//! max_backoff_secs = 900
//!
//! [details]
//! requery_interval_secs = 14400
//!
//! [security]
//! public_key = "base64 ed25519 key"
//!
//! [notifications]
//! ack_notify = "always"   # always | on_confirmed
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use tollgate_core::CatalogSpec;

use crate::error::{BillingError, BillingResult};

// =============================================================================
// Acknowledge Notification Policy
// =============================================================================

/// When a non-consumable purchase produces a new-purchase notification.
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  ALWAYS (Default)                                                       │
/// │  ────────────────                                                       │
/// │  • Notify after the acknowledge call, whether it succeeded or not      │
/// │  • A failed acknowledge is retried on the next reconciliation pass     │
/// │                                                                         │
/// │  ON_CONFIRMED                                                           │
/// │  ────────────                                                           │
/// │  • Notify only once the store confirmed the acknowledge                │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckNotifyPolicy {
    #[default]
    Always,
    OnConfirmed,
}

impl std::fmt::Display for AckNotifyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckNotifyPolicy::Always => write!(f, "always"),
            AckNotifyPolicy::OnConfirmed => write!(f, "on_confirmed"),
        }
    }
}

impl std::str::FromStr for AckNotifyPolicy {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(AckNotifyPolicy::Always),
            "on_confirmed" | "confirmed" => Ok(AckNotifyPolicy::OnConfirmed),
            other => Err(BillingError::InvalidConfig(format!(
                "Unknown ack notify policy: '{}'. Valid options: always, on_confirmed",
                other
            ))),
        }
    }
}

// =============================================================================
// Settings Sections
// =============================================================================

/// Store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// First reconnect delay in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Reconnect delay ceiling in seconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_initial_backoff() -> u64 {
    1000
}
fn default_max_backoff() -> u64 {
    900 // 15 minutes
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

/// Listing details freshness settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsSettings {
    /// Age after which a newly observed details cell triggers a requery.
    #[serde(default = "default_requery_interval")]
    pub requery_interval_secs: u64,
}

fn default_requery_interval() -> u64 {
    4 * 60 * 60
}

impl Default for DetailsSettings {
    fn default() -> Self {
        DetailsSettings {
            requery_interval_secs: default_requery_interval(),
        }
    }
}

/// Purchase verification settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// Base64 ed25519 public key of the store.
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Notification behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub ack_notify: AckNotifyPolicy,
}

// =============================================================================
// Main Billing Configuration
// =============================================================================

/// Complete billing configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Configured SKU lists.
    #[serde(default)]
    pub catalog: CatalogSpec,

    /// Reconnect backoff.
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Details requery.
    #[serde(default)]
    pub details: DetailsSettings,

    /// Signature verification.
    #[serde(default)]
    pub security: SecuritySettings,

    /// Notification behavior.
    #[serde(default)]
    pub notifications: NotificationSettings,
}

impl BillingConfig {
    /// Creates a config with defaults for the given catalog.
    pub fn new(catalog: CatalogSpec) -> Self {
        BillingConfig {
            catalog,
            ..Self::default()
        }
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (billing.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> BillingResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading billing config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load billing config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> BillingResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| BillingError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Billing config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> BillingResult<()> {
        self.catalog.validate()?;

        if self.connection.initial_backoff_ms == 0 {
            return Err(BillingError::InvalidConfig(
                "initial_backoff_ms must be greater than 0".into(),
            ));
        }

        if self.max_backoff() < self.initial_backoff() {
            return Err(BillingError::InvalidConfig(format!(
                "max_backoff_secs ({}) is below initial_backoff_ms ({})",
                self.connection.max_backoff_secs, self.connection.initial_backoff_ms
            )));
        }

        if self.details.requery_interval_secs == 0 {
            return Err(BillingError::InvalidConfig(
                "requery_interval_secs must be greater than 0".into(),
            ));
        }

        if self.catalog.all_ids().next().is_none() {
            warn!("Billing catalog is empty");
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("TOLLGATE_PUBLIC_KEY") {
            debug!("Overriding public key from environment");
            self.security.public_key = Some(key);
        }

        if let Ok(ms) = std::env::var("TOLLGATE_INITIAL_BACKOFF_MS") {
            if let Ok(v) = ms.parse::<u64>() {
                self.connection.initial_backoff_ms = v;
            }
        }

        if let Ok(secs) = std::env::var("TOLLGATE_MAX_BACKOFF_SECS") {
            if let Ok(v) = secs.parse::<u64>() {
                self.connection.max_backoff_secs = v;
            }
        }

        if let Ok(secs) = std::env::var("TOLLGATE_DETAILS_REQUERY_SECS") {
            if let Ok(v) = secs.parse::<u64>() {
                debug!(secs = v, "Overriding details requery interval from environment");
                self.details.requery_interval_secs = v;
            }
        }

        if let Ok(policy) = std::env::var("TOLLGATE_ACK_NOTIFY") {
            match policy.parse() {
                Ok(parsed) => self.notifications.ack_notify = parsed,
                Err(_) => warn!(policy = %policy, "Unknown ack notify policy in environment"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tollgate", "billing")
            .map(|dirs| dirs.config_dir().join("billing.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// First reconnect delay.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.connection.initial_backoff_ms)
    }

    /// Reconnect delay ceiling.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.connection.max_backoff_secs)
    }

    /// Details staleness threshold.
    pub fn requery_interval(&self) -> Duration {
        Duration::from_secs(self.details.requery_interval_secs)
    }

    /// Notification policy for acknowledged purchases.
    pub fn ack_notify(&self) -> AckNotifyPolicy {
        self.notifications.ack_notify
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> CatalogSpec {
        CatalogSpec {
            one_time: vec!["consa".into(), "remove_ads".into()],
            subscriptions: vec!["sub01".into(), "sub02".into()],
            auto_consume: vec!["consa".into()],
            upgrade_groups: vec![vec!["sub01".into(), "sub02".into()]],
        }
    }

    #[test]
    fn test_defaults() {
        let config = BillingConfig::default();
        assert_eq!(config.initial_backoff(), Duration::from_secs(1));
        assert_eq!(config.max_backoff(), Duration::from_secs(900));
        assert_eq!(config.requery_interval(), Duration::from_secs(14_400));
        assert_eq!(config.ack_notify(), AckNotifyPolicy::Always);
        assert!(config.security.public_key.is_none());
    }

    #[test]
    fn test_ack_policy_parsing() {
        assert_eq!(
            "always".parse::<AckNotifyPolicy>().unwrap(),
            AckNotifyPolicy::Always
        );
        assert_eq!(
            "ON_CONFIRMED".parse::<AckNotifyPolicy>().unwrap(),
            AckNotifyPolicy::OnConfirmed
        );
        assert!("sometimes".parse::<AckNotifyPolicy>().is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BillingConfig::new(catalog());
        assert!(config.validate().is_ok());

        config.connection.max_backoff_secs = 0;
        assert!(config.validate().is_err());

        config.connection.max_backoff_secs = 900;
        config.catalog.auto_consume.push("sub01".into());
        assert!(matches!(
            config.validate(),
            Err(BillingError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip_keeps_sections() {
        let mut config = BillingConfig::new(catalog());
        config.notifications.ack_notify = AckNotifyPolicy::OnConfirmed;
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[catalog]"));
        assert!(toml_str.contains("[connection]"));
        assert!(toml_str.contains("on_confirmed"));

        let parsed: BillingConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: BillingConfig = toml::from_str(
            r#"
            [catalog]
            one_time = ["consa"]
            auto_consume = ["consa"]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.connection.initial_backoff_ms, 1000);
        assert_eq!(parsed.details.requery_interval_secs, 14_400);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = std::env::temp_dir().join(format!("tollgate-config-{}", std::process::id()));
        let path = dir.join("billing.toml");
        let config = BillingConfig::new(catalog());
        config.save(Some(path.clone())).unwrap();

        let loaded = BillingConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.catalog, config.catalog);
        let _ = std::fs::remove_dir_all(dir);
    }
}
