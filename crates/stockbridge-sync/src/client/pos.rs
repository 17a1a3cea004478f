//! # POS Client
//!
//! Point-of-sale REST API authenticated with a bearer token. Collections may
//! come back bare (`[...]`) or wrapped (`{"data": [...]}`); both are accepted.
//!
//! ## Endpoints Used
//! ```text
//! GET  /sales?location_id=&since=
//! GET  /products?location_id=          (variants nested)
//! POST /sales                          {location_id, reference, items[]}
//! GET  /products/{id}/stock?location_id=&variant_id=
//! ```

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use stockbridge_core::Platform;

use super::{check_response, wire, ApiError, ApiResult, PosApi};

// =============================================================================
// Wire DTOs
// =============================================================================

/// A completed sale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PosSale {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    /// RFC 3339.
    #[serde(default)]
    pub created_at: Option<String>,
    /// Free-form reference; writes made by this engine carry the bridge prefix.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_decimal")]
    pub total: Option<String>,
    #[serde(default)]
    pub customer: Option<PosCustomer>,
    #[serde(default, alias = "line_items")]
    pub items: Vec<PosSaleItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PosCustomer {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PosSaleItem {
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub product_id: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default, deserialize_with = "wire::quantity")]
    pub quantity: i64,
    #[serde(default, deserialize_with = "wire::opt_decimal")]
    pub unit_price: Option<String>,
}

/// A catalog product with its variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PosProduct {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// `single` or `variable`.
    #[serde(rename = "type", default)]
    pub product_type: String,
    #[serde(default)]
    pub variants: Vec<PosVariant>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PosVariant {
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
}

impl PosProduct {
    pub fn is_variable(&self) -> bool {
        self.product_type.eq_ignore_ascii_case("variable")
    }
}

/// Body of `POST /sales`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSaleTransaction {
    pub location_id: String,
    /// Deterministic; lets the POS absorb a replayed write.
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub items: Vec<NewSaleItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSaleItem {
    pub product_id: String,
    pub variant_id: String,
    pub quantity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedSale {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosStockReport {
    #[serde(deserialize_with = "wire::quantity")]
    pub quantity: i64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Collection<T> {
    Bare(Vec<T>),
    Wrapped { data: Vec<T> },
}

impl<T> Collection<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Collection::Bare(items) | Collection::Wrapped { data: items } => items,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Single<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Single<T> {
    fn into_inner(self) -> T {
        match self {
            Single::Bare(item) | Single::Wrapped { data: item } => item,
        }
    }
}

// =============================================================================
// HTTP Client
// =============================================================================

/// Connection settings for [`PosHttpClient`].
#[derive(Debug, Clone)]
pub struct PosClientConfig {
    pub base_url: String,
    pub api_token: SecretString,
    pub timeout: Duration,
}

/// reqwest-backed [`PosApi`].
#[derive(Clone)]
pub struct PosHttpClient {
    inner: Arc<PosHttpClientInner>,
}

struct PosHttpClientInner {
    client: reqwest::Client,
    api_root: Url,
    api_token: SecretString,
    timeout: Duration,
}

impl PosHttpClient {
    pub fn new(config: PosClientConfig) -> ApiResult<Self> {
        let mut api_root = Url::parse(&config.base_url).map_err(|e| ApiError::InvalidUrl {
            platform: Platform::Pos,
            message: e.to_string(),
        })?;
        if !api_root.path().ends_with('/') {
            let path = format!("{}/", api_root.path());
            api_root.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("stockbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::from_reqwest(Platform::Pos, config.timeout, e))?;

        Ok(Self {
            inner: Arc::new(PosHttpClientInner {
                client,
                api_root,
                api_token: config.api_token,
                timeout: config.timeout,
            }),
        })
    }

    fn url(&self, path: &str) -> ApiResult<Url> {
        self.inner
            .api_root
            .join(path)
            .map_err(|e| ApiError::InvalidUrl {
                platform: Platform::Pos,
                message: e.to_string(),
            })
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.inner
            .client
            .request(method, url)
            .bearer_auth(self.inner.api_token.expose_secret())
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> ApiResult<T> {
        let map = |e| ApiError::from_reqwest(Platform::Pos, self.inner.timeout, e);
        let response = builder.send().await.map_err(map)?;
        let response = check_response(Platform::Pos, response).await?;
        response.json::<T>().await.map_err(map)
    }
}

#[async_trait]
impl PosApi for PosHttpClient {
    #[instrument(skip(self))]
    async fn list_sales(
        &self,
        since: Option<DateTime<Utc>>,
        location_id: &str,
    ) -> ApiResult<Vec<PosSale>> {
        let mut params = vec![("location_id", location_id.to_string())];
        if let Some(since) = since {
            params.push(("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        let builder = self
            .request(reqwest::Method::GET, self.url("sales")?)
            .query(&params);
        let sales = self.send_json::<Collection<PosSale>>(builder).await?.into_vec();
        debug!(count = sales.len(), "Fetched POS sales");
        Ok(sales)
    }

    #[instrument(skip(self))]
    async fn list_products(&self, location_id: &str) -> ApiResult<Vec<PosProduct>> {
        let builder = self
            .request(reqwest::Method::GET, self.url("products")?)
            .query(&[("location_id", location_id)]);
        let products = self
            .send_json::<Collection<PosProduct>>(builder)
            .await?
            .into_vec();
        debug!(count = products.len(), "Fetched POS catalog");
        Ok(products)
    }

    #[instrument(skip(self, sale), fields(reference = %sale.reference))]
    async fn create_sale_transaction(&self, sale: &NewSaleTransaction) -> ApiResult<CreatedSale> {
        let builder = self
            .request(reqwest::Method::POST, self.url("sales")?)
            .json(sale);
        Ok(self.send_json::<Single<CreatedSale>>(builder).await?.into_inner())
    }

    #[instrument(skip(self))]
    async fn get_stock_report(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
        location_id: &str,
    ) -> ApiResult<PosStockReport> {
        let mut params = vec![("location_id", location_id)];
        if let Some(variant) = variant_id {
            params.push(("variant_id", variant));
        }
        let path = format!("products/{product_id}/stock");
        let builder = self
            .request(reqwest::Method::GET, self.url(&path)?)
            .query(&params);
        Ok(self
            .send_json::<Single<PosStockReport>>(builder)
            .await?
            .into_inner())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_shapes() {
        let bare: Collection<PosSale> =
            serde_json::from_str(r#"[{"id": "S-1", "items": []}]"#).unwrap();
        assert_eq!(bare.into_vec().len(), 1);

        let wrapped: Collection<PosSale> =
            serde_json::from_str(r#"{"data": [{"id": 2}, {"id": 3}]}"#).unwrap();
        let sales = wrapped.into_vec();
        assert_eq!(sales[1].id, "3");
    }

    #[test]
    fn test_variable_product_parsing() {
        let json = r#"{
            "id": "p-1", "sku": "TEE", "type": "VARIABLE",
            "variants": [{"id": null, "sku": "TEE-S"}, {"id": 88, "sku": "TEE-M"}]
        }"#;
        let product: PosProduct = serde_json::from_str(json).unwrap();
        assert!(product.is_variable());
        assert_eq!(product.variants[0].id, None);
        assert_eq!(product.variants[1].id.as_deref(), Some("88"));
    }

    #[test]
    fn test_sale_item_alias_and_quantity() {
        let json = r#"{"id": "S-9", "reference": "SB-STORE-1-0",
                       "line_items": [{"sku": "ABC", "quantity": 2.0, "unit_price": "4.50"}]}"#;
        let sale: PosSale = serde_json::from_str(json).unwrap();
        assert_eq!(sale.items[0].quantity, 2);
        assert_eq!(sale.items[0].unit_price.as_deref(), Some("4.50"));
    }

    #[test]
    fn test_single_shapes() {
        let wrapped: Single<CreatedSale> = serde_json::from_str(r#"{"data": {"id": 5}}"#).unwrap();
        assert_eq!(wrapped.into_inner().id, "5");
        let bare: Single<PosStockReport> = serde_json::from_str(r#"{"quantity": 7}"#).unwrap();
        assert_eq!(bare.into_inner().quantity, 7);
    }
}
