//! Per-connection settings handed to every engine operation.

use std::collections::BTreeMap;
use std::time::Duration;

use stockbridge_core::{EchoMarkers, Platform, DEFAULT_CURRENCY_SCALE, STORE_CREATED_VIA};

use crate::config::BridgeConfig;
use crate::error::SyncResult;

/// Everything a pass needs to know about the platform pair it runs against.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: String,
    pub echo: EchoMarkers,
    pub window_days: i64,
    pub request_timeout: Duration,
    /// POS location whose stock this connection tracks.
    pub location_id: String,
    pub variant_overrides: BTreeMap<String, String>,
    pub store_currency_scale: u32,
    pub pos_currency_scale: u32,
    pub order_statuses: Vec<String>,
    pub per_page: u32,
    pub max_pages: u32,
    pub lock_ttl_secs: i64,
}

impl ConnectionContext {
    /// Builds the context from a validated config. Fails if the POS
    /// location is missing.
    pub fn from_config(config: &BridgeConfig) -> SyncResult<Self> {
        Ok(ConnectionContext {
            connection_id: config.connection.id.clone(),
            echo: EchoMarkers {
                reference_prefix: config.sync.reference_prefix.clone(),
                store_created_via: STORE_CREATED_VIA.to_string(),
            },
            window_days: config.sync.window_days,
            request_timeout: config.request_timeout(),
            location_id: config.location_id()?.to_string(),
            variant_overrides: config.pos.variant_overrides.clone(),
            store_currency_scale: config.store.currency_scale,
            pos_currency_scale: config.pos.currency_scale,
            order_statuses: config.store.order_statuses.clone(),
            per_page: config.store.per_page,
            max_pages: config.store.max_pages,
            lock_ttl_secs: config.sync.lock_ttl_secs,
        })
    }

    /// Context with default settings, for tests and embedding.
    pub fn new(connection_id: impl Into<String>, location_id: impl Into<String>) -> Self {
        ConnectionContext {
            connection_id: connection_id.into(),
            echo: EchoMarkers::default(),
            window_days: stockbridge_core::DEFAULT_WINDOW_DAYS,
            request_timeout: Duration::from_secs(15),
            location_id: location_id.into(),
            variant_overrides: BTreeMap::new(),
            store_currency_scale: DEFAULT_CURRENCY_SCALE,
            pos_currency_scale: DEFAULT_CURRENCY_SCALE,
            order_statuses: vec!["processing".to_string(), "completed".to_string()],
            per_page: 50,
            max_pages: 20,
            lock_ttl_secs: 900,
        }
    }

    pub fn reference_prefix(&self) -> &str {
        &self.echo.reference_prefix
    }

    /// Decimal places of money amounts on `platform`.
    pub fn currency_scale(&self, platform: Platform) -> u32 {
        match platform {
            Platform::Store => self.store_currency_scale,
            Platform::Pos => self.pos_currency_scale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn test_from_config_requires_location() {
        let mut config = BridgeConfig::default();
        assert!(ConnectionContext::from_config(&config).is_err());

        config.pos.location_id = Some("main".into());
        config.pos.currency_scale = 0;
        config.pos.api_token = Some(SecretString::from("t"));
        config.sync.reference_prefix = "BRIDGE-".into();
        let ctx = ConnectionContext::from_config(&config).unwrap();
        assert_eq!(ctx.location_id, "main");
        assert_eq!(ctx.reference_prefix(), "BRIDGE-");
        assert_eq!(ctx.currency_scale(Platform::Pos), 0);
        assert_eq!(ctx.currency_scale(Platform::Store), 2);
    }
}
