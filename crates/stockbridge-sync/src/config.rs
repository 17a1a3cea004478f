//! # Bridge Configuration
//!
//! Settings for one connection: a Store/POS platform pair plus the engine
//! knobs that govern how passes between them run.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCKBRIDGE_POS_API_TOKEN=...                                      │
//! │     STOCKBRIDGE_STORE_URL=https://shop.example.com                     │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stockbridge/stockbridge.toml (Linux)                     │
//! │     ~/Library/Application Support/com.stockbridge.stockbridge/...      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     7 day window, "SB-" prefix, 15 s request timeout                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Credentials are optional at load time so that `config init` and `status`
//! work on a half-filled file. [`BridgeConfig::check_credentials`] is the
//! gate a pass goes through before touching either platform.
//!
//! ## Configuration File Format
//! ```toml
//! [connection]
//! id = "default"
//!
//! [store]
//! base_url = "https://shop.example.com"
//! consumer_key = "ck_..."
//! consumer_secret = "cs_..."
//! order_statuses = ["processing", "completed"]
//!
//! [pos]
//! base_url = "https://pos.example.com/api/v1"
//! api_token = "..."
//! location_id = "main"
//!
//! [pos.variant_overrides]
//! "TEE-PLAIN" = "var-881"
//!
//! [sync]
//! window_days = 7
//! reference_prefix = "SB-"
//! request_timeout_secs = 15
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use stockbridge_core::validation::validate_connection_id;
use stockbridge_core::{Platform, DEFAULT_CURRENCY_SCALE, DEFAULT_REFERENCE_PREFIX, DEFAULT_WINDOW_DAYS};

use crate::client::{PosClientConfig, StoreClientConfig};
use crate::error::{SyncError, SyncResult};

/// Placeholder written in place of secrets by [`BridgeConfig::to_redacted_toml`].
const REDACTED: &str = "********";

/// Longest trailing fetch window accepted.
pub const MAX_WINDOW_DAYS: i64 = 365;

// =============================================================================
// Secret (De)serialization
// =============================================================================

/// TOML round-tripping for optional secrets.
mod secret {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SecretString>, D::Error> {
        Ok(Option::<String>::deserialize(d)?
            .filter(|s| !s.trim().is_empty())
            .map(SecretString::from))
    }

    pub fn serialize<S: Serializer>(value: &Option<SecretString>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(secret) => s.serialize_str(secret.expose_secret()),
            None => s.serialize_none(),
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Identifies the platform pair. Ledger, mirror and locks are all scoped
/// by this id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    #[serde(default = "default_connection_id")]
    pub id: String,
}

fn default_connection_id() -> String {
    "default".to_string()
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            id: default_connection_id(),
        }
    }
}

// =============================================================================
// Store Settings
// =============================================================================

/// Storefront API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Site root, e.g. `https://shop.example.com`.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(
        default,
        deserialize_with = "secret::deserialize",
        serialize_with = "secret::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub consumer_key: Option<SecretString>,

    #[serde(
        default,
        deserialize_with = "secret::deserialize",
        serialize_with = "secret::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub consumer_secret: Option<SecretString>,

    /// Order statuses that count as a sale.
    #[serde(default = "default_order_statuses")]
    pub order_statuses: Vec<String>,

    /// Orders per page.
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Upper bound on pages fetched per pass.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Decimal places in Store money amounts.
    #[serde(default = "default_currency_scale")]
    pub currency_scale: u32,
}

fn default_order_statuses() -> Vec<String> {
    vec!["processing".to_string(), "completed".to_string()]
}

fn default_per_page() -> u32 {
    50
}

fn default_max_pages() -> u32 {
    20
}

fn default_currency_scale() -> u32 {
    DEFAULT_CURRENCY_SCALE
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            base_url: None,
            consumer_key: None,
            consumer_secret: None,
            order_statuses: default_order_statuses(),
            per_page: default_per_page(),
            max_pages: default_max_pages(),
            currency_scale: default_currency_scale(),
        }
    }
}

// =============================================================================
// POS Settings
// =============================================================================

/// Point-of-sale API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosSettings {
    /// API root, e.g. `https://pos.example.com/api/v1`.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(
        default,
        deserialize_with = "secret::deserialize",
        serialize_with = "secret::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_token: Option<SecretString>,

    /// Location whose stock this connection reconciles.
    #[serde(default)]
    pub location_id: Option<String>,

    /// Decimal places in POS money amounts.
    #[serde(default = "default_currency_scale")]
    pub currency_scale: u32,

    /// Known variant ids for "single" products, by SKU.
    #[serde(default)]
    pub variant_overrides: BTreeMap<String, String>,
}

impl Default for PosSettings {
    fn default() -> Self {
        PosSettings {
            base_url: None,
            api_token: None,
            location_id: None,
            currency_scale: default_currency_scale(),
            variant_overrides: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Pass behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Trailing fetch window.
    #[serde(default = "default_window_days")]
    pub window_days: i64,

    /// Prefix on every reference this engine writes.
    #[serde(default = "default_reference_prefix")]
    pub reference_prefix: String,

    /// Bound on every platform call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Delay between passes in `watch` mode.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Lifetime of the cross-process pass lease.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: i64,
}

fn default_window_days() -> i64 {
    DEFAULT_WINDOW_DAYS
}

fn default_reference_prefix() -> String {
    DEFAULT_REFERENCE_PREFIX.to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_interval() -> u64 {
    300
}

fn default_lock_ttl() -> i64 {
    900
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            window_days: default_window_days(),
            reference_prefix: default_reference_prefix(),
            request_timeout_secs: default_request_timeout(),
            interval_secs: default_interval(),
            lock_ttl_secs: default_lock_ttl(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete configuration for one connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub pos: PosSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl BridgeConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (stockbridge.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading bridge config from file");
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
            warn!("Failed to load bridge config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Bridge config saved");
        Ok(())
    }

    /// Validates value ranges and URL shapes.
    ///
    /// Missing credentials are not an error here; see
    /// [`check_credentials`](Self::check_credentials).
    pub fn validate(&self) -> SyncResult<()> {
        validate_connection_id(&self.connection.id)
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        for (platform, url) in [
            (Platform::Store, self.store.base_url.as_deref()),
            (Platform::Pos, self.pos.base_url.as_deref()),
        ] {
            if let Some(url) = url {
                let parsed = Url::parse(url)?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(SyncError::InvalidUrl(format!(
                        "{platform} URL must start with http:// or https://, got: {url}"
                    )));
                }
            }
        }

        if !(1..=MAX_WINDOW_DAYS).contains(&self.sync.window_days) {
            return Err(SyncError::InvalidConfig(format!(
                "sync.window_days must be between 1 and {MAX_WINDOW_DAYS}"
            )));
        }
        if self.sync.reference_prefix.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "sync.reference_prefix must not be empty".into(),
            ));
        }
        if self.sync.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.sync.lock_ttl_secs < 1 {
            return Err(SyncError::InvalidConfig(
                "sync.lock_ttl_secs must be at least 1".into(),
            ));
        }
        if self.store.per_page == 0 || self.store.per_page > 100 {
            return Err(SyncError::InvalidConfig(
                "store.per_page must be between 1 and 100".into(),
            ));
        }
        if self.store.max_pages == 0 {
            return Err(SyncError::InvalidConfig(
                "store.max_pages must be greater than 0".into(),
            ));
        }
        if self.store.order_statuses.is_empty() {
            return Err(SyncError::InvalidConfig(
                "store.order_statuses must list at least one status".into(),
            ));
        }
        if self.store.currency_scale > 6 || self.pos.currency_scale > 6 {
            return Err(SyncError::InvalidConfig(
                "currency_scale must be between 0 and 6".into(),
            ));
        }
        if self.pos.variant_overrides.keys().any(|sku| sku.trim().is_empty()) {
            return Err(SyncError::InvalidConfig(
                "pos.variant_overrides contains an empty SKU".into(),
            ));
        }

        Ok(())
    }

    /// Fails with [`SyncError::MissingCredentials`] unless both platforms
    /// are fully configured.
    pub fn check_credentials(&self) -> SyncResult<()> {
        self.store_client_config()?;
        self.pos_client_config()?;
        self.location_id()?;
        Ok(())
    }

    /// Applies `STOCKBRIDGE_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("STOCKBRIDGE_CONNECTION_ID") {
            debug!(connection_id = %id, "Overriding connection id from environment");
            self.connection.id = id;
        }

        if let Some(url) = lookup("STOCKBRIDGE_STORE_URL") {
            debug!(url = %url, "Overriding Store URL from environment");
            self.store.base_url = Some(url);
        }
        if let Some(key) = lookup("STOCKBRIDGE_STORE_CONSUMER_KEY") {
            self.store.consumer_key = Some(SecretString::from(key));
        }
        if let Some(secret) = lookup("STOCKBRIDGE_STORE_CONSUMER_SECRET") {
            self.store.consumer_secret = Some(SecretString::from(secret));
        }

        if let Some(url) = lookup("STOCKBRIDGE_POS_URL") {
            debug!(url = %url, "Overriding POS URL from environment");
            self.pos.base_url = Some(url);
        }
        if let Some(token) = lookup("STOCKBRIDGE_POS_API_TOKEN") {
            self.pos.api_token = Some(SecretString::from(token));
        }
        if let Some(location) = lookup("STOCKBRIDGE_POS_LOCATION_ID") {
            self.pos.location_id = Some(location);
        }

        if let Some(days) = lookup("STOCKBRIDGE_WINDOW_DAYS") {
            match days.parse() {
                Ok(d) => self.sync.window_days = d,
                Err(_) => warn!(value = %days, "Ignoring invalid STOCKBRIDGE_WINDOW_DAYS"),
            }
        }
        if let Some(secs) = lookup("STOCKBRIDGE_REQUEST_TIMEOUT_SECS") {
            match secs.parse() {
                Ok(s) => self.sync.request_timeout_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid STOCKBRIDGE_REQUEST_TIMEOUT_SECS"),
            }
        }

        if let Some(path) = lookup("STOCKBRIDGE_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stockbridge", "stockbridge")
            .map(|dirs| dirs.config_dir().join("stockbridge.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn connection_id(&self) -> &str {
        &self.connection.id
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.request_timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs.max(1))
    }

    /// SQLite file for this connection.
    pub fn database_path(&self) -> PathBuf {
        self.database.path.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "stockbridge", "stockbridge")
                .map(|dirs| dirs.data_dir().join("stockbridge.db"))
                .unwrap_or_else(|| PathBuf::from("stockbridge.db"))
        })
    }

    pub fn location_id(&self) -> SyncResult<&str> {
        self.pos
            .location_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| missing(Platform::Pos, "pos.location_id"))
    }

    /// Client settings for the Store API.
    pub fn store_client_config(&self) -> SyncResult<StoreClientConfig> {
        let base_url = self
            .store
            .base_url
            .clone()
            .ok_or_else(|| missing(Platform::Store, "store.base_url"))?;
        let consumer_key = self
            .store
            .consumer_key
            .clone()
            .ok_or_else(|| missing(Platform::Store, "store.consumer_key"))?;
        let consumer_secret = self
            .store
            .consumer_secret
            .clone()
            .ok_or_else(|| missing(Platform::Store, "store.consumer_secret"))?;

        Ok(StoreClientConfig {
            base_url,
            consumer_key,
            consumer_secret,
            timeout: self.request_timeout(),
        })
    }

    /// Client settings for the POS API.
    pub fn pos_client_config(&self) -> SyncResult<PosClientConfig> {
        let base_url = self
            .pos
            .base_url
            .clone()
            .ok_or_else(|| missing(Platform::Pos, "pos.base_url"))?;
        let api_token = self
            .pos
            .api_token
            .clone()
            .ok_or_else(|| missing(Platform::Pos, "pos.api_token"))?;

        Ok(PosClientConfig {
            base_url,
            api_token,
            timeout: self.request_timeout(),
        })
    }

    /// TOML rendering with every secret masked.
    pub fn to_redacted_toml(&self) -> SyncResult<String> {
        let mask = |s: &Option<SecretString>| {
            s.as_ref()
                .filter(|v| !v.expose_secret().is_empty())
                .map(|_| SecretString::from(REDACTED))
        };

        let mut shown = self.clone();
        shown.store.consumer_key = mask(&self.store.consumer_key);
        shown.store.consumer_secret = mask(&self.store.consumer_secret);
        shown.pos.api_token = mask(&self.pos.api_token);
        Ok(toml::to_string_pretty(&shown)?)
    }
}

fn missing(platform: Platform, field: &str) -> SyncError {
    SyncError::MissingCredentials {
        platform,
        field: field.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn complete() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.store.base_url = Some("https://shop.example.com".into());
        config.store.consumer_key = Some(SecretString::from("ck_live"));
        config.store.consumer_secret = Some(SecretString::from("cs_live"));
        config.pos.base_url = Some("https://pos.example.com/api/v1".into());
        config.pos.api_token = Some(SecretString::from("tok"));
        config.pos.location_id = Some("main".into());
        config
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.connection_id(), "default");
        assert_eq!(config.sync.window_days, 7);
        assert_eq!(config.sync.reference_prefix, "SB-");
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.store.order_statuses, vec!["processing", "completed"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BridgeConfig::default();

        config.connection.id = "has space".into();
        assert!(config.validate().is_err());
        config.connection.id = "shop-1".into();

        config.store.base_url = Some("ftp://shop.example.com".into());
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));
        config.store.base_url = Some("https://shop.example.com".into());

        config.sync.window_days = 0;
        assert!(config.validate().is_err());
        config.sync.window_days = MAX_WINDOW_DAYS + 1;
        assert!(config.validate().is_err());
        config.sync.window_days = i64::MAX;
        assert!(config.validate().is_err());
        config.sync.window_days = MAX_WINDOW_DAYS;
        assert!(config.validate().is_ok());
        config.sync.window_days = 3;

        config.sync.reference_prefix = " ".into();
        assert!(config.validate().is_err());
        config.sync.reference_prefix = "SB-".into();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_credentials() {
        let config = BridgeConfig::default();
        let err = config.check_credentials().unwrap_err();
        assert!(err.is_config_error());
        assert!(matches!(
            err,
            SyncError::MissingCredentials { platform: Platform::Store, .. }
        ));

        let mut config = complete();
        config.pos.location_id = None;
        assert!(matches!(
            config.check_credentials(),
            Err(SyncError::MissingCredentials { platform: Platform::Pos, .. })
        ));

        assert!(complete().check_credentials().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let toml_str = r#"
            [connection]
            id = "shop-1"

            [store]
            base_url = "https://shop.example.com"
            consumer_key = "ck_abc"
            consumer_secret = "cs_def"

            [pos]
            api_token = ""
            location_id = "main"

            [pos.variant_overrides]
            "TEE-PLAIN" = "var-881"
        "#;
        let config: BridgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection_id(), "shop-1");
        assert_eq!(
            config.store.consumer_key.as_ref().unwrap().expose_secret(),
            "ck_abc"
        );
        // Empty secrets read as absent
        assert!(config.pos.api_token.is_none());
        assert_eq!(config.pos.variant_overrides["TEE-PLAIN"], "var-881");
        assert_eq!(config.sync.lock_ttl_secs, 900);

        let written = toml::to_string_pretty(&config).unwrap();
        assert!(written.contains("[connection]"));
        assert!(written.contains("cs_def"));
    }

    #[test]
    fn test_redacted_toml_hides_secrets() {
        let shown = complete().to_redacted_toml().unwrap();
        assert!(!shown.contains("ck_live"));
        assert!(!shown.contains("cs_live"));
        assert!(!shown.contains("\"tok\""));
        assert!(shown.contains(REDACTED));
        assert!(shown.contains("https://shop.example.com"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STOCKBRIDGE_CONNECTION_ID", "from-env"),
            ("STOCKBRIDGE_POS_API_TOKEN", "env-token"),
            ("STOCKBRIDGE_WINDOW_DAYS", "3"),
            ("STOCKBRIDGE_REQUEST_TIMEOUT_SECS", "not-a-number"),
        ]);
        let mut config = BridgeConfig::default();
        config.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.connection_id(), "from-env");
        assert_eq!(
            config.pos.api_token.as_ref().unwrap().expose_secret(),
            "env-token"
        );
        assert_eq!(config.sync.window_days, 3);
        assert_eq!(config.sync.request_timeout_secs, 15);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!(
            "stockbridge-config-{}.toml",
            uuid::Uuid::new_v4()
        ));
        let mut config = complete();
        config.connection.id = "saved".into();
        config.save(Some(path.clone())).unwrap();

        let loaded: BridgeConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.connection_id(), "saved");
        assert!(loaded.check_credentials().is_ok());

        std::fs::remove_file(path).unwrap();
    }
}
