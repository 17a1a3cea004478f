//! # Store Client
//!
//! WooCommerce-shaped REST API (`/wp-json/wc/v3`), authenticated with a
//! consumer key / secret pair over HTTP basic auth.
//!
//! ## Endpoints Used
//! ```text
//! GET  /orders?after=&status=&per_page=&page=&orderby=date&order=asc
//! GET  /products?sku=                       (exact SKU; variations included)
//! GET  /products?per_page=&page=            (bootstrap)
//! GET  /products/{id}/variations?per_page=  (bootstrap)
//! PUT  /products/{id}                       {"stock_quantity": n}
//! PUT  /products/{parent}/variations/{id}   {"stock_quantity": n}
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use stockbridge_core::Platform;

use super::{check_response, wire, ApiError, ApiResult, StoreApi};

const API_PREFIX: &str = "wp-json/wc/v3/";

// =============================================================================
// Wire DTOs
// =============================================================================

/// Filter for [`StoreApi::list_orders`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderQuery {
    /// Only orders created after this instant; `None` disables the filter.
    pub after: Option<DateTime<Utc>>,
    /// Order statuses to include (e.g. `processing`, `completed`).
    pub statuses: Vec<String>,
    pub page: u32,
    pub per_page: u32,
}

/// An order as returned by `GET /orders`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreOrder {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    #[serde(default)]
    pub status: String,
    /// UTC creation time without offset, e.g. `2024-05-01T10:15:00`.
    #[serde(default)]
    pub date_created_gmt: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_decimal")]
    pub total: Option<String>,
    #[serde(default)]
    pub created_via: Option<String>,
    #[serde(default)]
    pub billing: Option<StoreBilling>,
    #[serde(default)]
    pub line_items: Vec<StoreLineItem>,
    #[serde(default)]
    pub meta_data: Vec<StoreMeta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreBilling {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreLineItem {
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub product_id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub variation_id: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default, deserialize_with = "wire::quantity")]
    pub quantity: i64,
    #[serde(default, deserialize_with = "wire::opt_decimal")]
    pub price: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub key: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// A product or variation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreProduct {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    /// Set for variations.
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub sku: String,
    /// `simple`, `variable`, or `variation`.
    #[serde(rename = "type", default)]
    pub product_type: String,
    #[serde(default)]
    pub manage_stock: bool,
    #[serde(default, deserialize_with = "wire::opt_quantity")]
    pub stock_quantity: Option<i64>,
}

impl StoreOrder {
    /// Creation time, or `None` if missing or malformed.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.date_created_gmt.as_deref()?;
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// `"First Last"`, if any part of the billing name is set.
    pub fn billing_name(&self) -> Option<String> {
        let billing = self.billing.as_ref()?;
        let name = format!("{} {}", billing.first_name.trim(), billing.last_name.trim());
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    /// True if a meta entry with `key` is present.
    pub fn has_meta(&self, key: &str) -> bool {
        self.meta_data.iter().any(|m| m.key == key)
    }
}

impl StoreProduct {
    pub fn is_variable(&self) -> bool {
        self.product_type == "variable"
    }
}

// =============================================================================
// HTTP Client
// =============================================================================

/// Connection settings for [`WooStoreClient`].
#[derive(Debug, Clone)]
pub struct StoreClientConfig {
    pub base_url: String,
    pub consumer_key: SecretString,
    pub consumer_secret: SecretString,
    pub timeout: Duration,
}

/// reqwest-backed [`StoreApi`].
#[derive(Clone)]
pub struct WooStoreClient {
    inner: Arc<WooStoreClientInner>,
}

struct WooStoreClientInner {
    client: reqwest::Client,
    api_root: Url,
    consumer_key: SecretString,
    consumer_secret: SecretString,
    timeout: Duration,
}

impl WooStoreClient {
    /// Creates a client rooted at `{base_url}/wp-json/wc/v3/`.
    pub fn new(config: StoreClientConfig) -> ApiResult<Self> {
        let invalid = |message: String| ApiError::InvalidUrl {
            platform: Platform::Store,
            message,
        };

        let mut base = Url::parse(&config.base_url).map_err(|e| invalid(e.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let api_root = base.join(API_PREFIX).map_err(|e| invalid(e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("stockbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::from_reqwest(Platform::Store, config.timeout, e))?;

        Ok(Self {
            inner: Arc::new(WooStoreClientInner {
                client,
                api_root,
                consumer_key: config.consumer_key,
                consumer_secret: config.consumer_secret,
                timeout: config.timeout,
            }),
        })
    }

    fn url(&self, path: &str) -> ApiResult<Url> {
        self.inner
            .api_root
            .join(path)
            .map_err(|e| ApiError::InvalidUrl {
                platform: Platform::Store,
                message: e.to_string(),
            })
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.inner.client.request(method, url).basic_auth(
            self.inner.consumer_key.expose_secret(),
            Some(self.inner.consumer_secret.expose_secret()),
        )
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> ApiResult<T> {
        let map = |e| ApiError::from_reqwest(Platform::Store, self.inner.timeout, e);
        let response = builder.send().await.map_err(map)?;
        let response = check_response(Platform::Store, response).await?;
        response.json::<T>().await.map_err(map)
    }
}

#[async_trait]
impl StoreApi for WooStoreClient {
    #[instrument(skip(self, query), fields(page = query.page))]
    async fn list_orders(&self, query: &OrderQuery) -> ApiResult<Vec<StoreOrder>> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("per_page", query.per_page.to_string()),
            ("orderby", "date".to_string()),
            ("order", "asc".to_string()),
        ];
        if !query.statuses.is_empty() {
            params.push(("status", query.statuses.join(",")));
        }
        if let Some(after) = query.after {
            params.push(("after", after.format("%Y-%m-%dT%H:%M:%S").to_string()));
        }

        let builder = self
            .request(reqwest::Method::GET, self.url("orders")?)
            .query(&params);
        let orders: Vec<StoreOrder> = self.send_json(builder).await?;
        debug!(count = orders.len(), "Fetched store orders");
        Ok(orders)
    }

    #[instrument(skip(self))]
    async fn get_product_by_sku(&self, sku: &str) -> ApiResult<Option<StoreProduct>> {
        let builder = self
            .request(reqwest::Method::GET, self.url("products")?)
            .query(&[("sku", sku)]);
        let products: Vec<StoreProduct> = self.send_json(builder).await?;
        // The sku filter can match partially on some installs
        Ok(products.into_iter().find(|p| p.sku == sku))
    }

    #[instrument(skip(self))]
    async fn set_stock(
        &self,
        product_id: &str,
        parent_id: Option<&str>,
        quantity: i64,
    ) -> ApiResult<()> {
        let path = match parent_id {
            Some(parent) => format!("products/{parent}/variations/{product_id}"),
            None => format!("products/{product_id}"),
        };
        let body = serde_json::json!({
            "manage_stock": true,
            "stock_quantity": quantity,
        });
        let builder = self.request(reqwest::Method::PUT, self.url(&path)?).json(&body);
        let _: serde_json::Value = self.send_json(builder).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_products(&self, page: u32, per_page: u32) -> ApiResult<Vec<StoreProduct>> {
        let builder = self
            .request(reqwest::Method::GET, self.url("products")?)
            .query(&[("page", page), ("per_page", per_page)]);
        self.send_json(builder).await
    }

    #[instrument(skip(self))]
    async fn list_variations(
        &self,
        parent_id: &str,
        page: u32,
        per_page: u32,
    ) -> ApiResult<Vec<StoreProduct>> {
        let path = format!("products/{parent_id}/variations");
        let builder = self
            .request(reqwest::Method::GET, self.url(&path)?)
            .query(&[("page", page), ("per_page", per_page)]);
        let mut variations: Vec<StoreProduct> = self.send_json(builder).await?;
        for variation in &mut variations {
            variation.parent_id.get_or_insert_with(|| parent_id.to_string());
            if variation.product_type.is_empty() {
                variation.product_type = "variation".to_string();
            }
        }
        Ok(variations)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
