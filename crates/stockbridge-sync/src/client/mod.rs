//! # Platform API Clients
//!
//! The engine talks to each platform through a trait, so the reconciler can
//! be driven by an HTTP client in production and an in-memory fake in tests.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  trait StoreApi ◄── WooStoreClient (reqwest, basic auth)               │
//! │  trait PosApi   ◄── PosHttpClient  (reqwest, bearer token)             │
//! │                                                                         │
//! │  Wire DTOs (StoreOrder, PosSale, ...) stop at this boundary:           │
//! │  the fetcher turns them into ChangeRecord, the resolver into           │
//! │  ProductIdentity.                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Classes
//! | Error | Class | Reconciler reaction |
//! |-------|-------|---------------------|
//! | network failure, HTTP 5xx, 401/403, 429 | unavailable | abort direction |
//! | timeout | timeout | item error, continue |
//! | other 4xx, unparseable body | rejected | item error, continue |

pub mod pos;
pub mod store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use stockbridge_core::Platform;

pub use pos::{
    CreatedSale, NewSaleItem, NewSaleTransaction, PosClientConfig, PosCustomer, PosHttpClient,
    PosProduct, PosSale, PosSaleItem, PosStockReport, PosVariant,
};
pub use store::{
    OrderQuery, StoreBilling, StoreClientConfig, StoreLineItem, StoreMeta, StoreOrder,
    StoreProduct, WooStoreClient,
};

// =============================================================================
// Error Type
// =============================================================================

/// A failed platform call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Could not reach the platform at all.
    #[error("{platform} unreachable: {message}")]
    Network { platform: Platform, message: String },

    /// The platform answered with a non-success status.
    #[error("{platform} returned HTTP {status}: {body}")]
    Status {
        platform: Platform,
        status: u16,
        body: String,
    },

    /// HTTP 429.
    #[error("{platform} rate limited, retry after {retry_after} seconds")]
    RateLimited { platform: Platform, retry_after: u64 },

    /// The call exceeded its time budget.
    #[error("{platform} request timed out after {secs} seconds")]
    Timeout { platform: Platform, secs: u64 },

    /// The response body did not match the expected shape.
    #[error("{platform} response could not be parsed: {message}")]
    Parse { platform: Platform, message: String },

    /// A request URL could not be built.
    #[error("Invalid {platform} URL: {message}")]
    InvalidUrl { platform: Platform, message: String },
}

/// Result type for platform calls.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn platform(&self) -> Platform {
        match self {
            ApiError::Network { platform, .. }
            | ApiError::Status { platform, .. }
            | ApiError::RateLimited { platform, .. }
            | ApiError::Timeout { platform, .. }
            | ApiError::Parse { platform, .. }
            | ApiError::InvalidUrl { platform, .. } => *platform,
        }
    }

    /// True when the platform as a whole should be considered down for the
    /// rest of the direction.
    pub fn is_unavailable(&self) -> bool {
        match self {
            ApiError::Network { .. } | ApiError::RateLimited { .. } => true,
            ApiError::Status { status, .. } => *status >= 500 || *status == 401 || *status == 403,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout { .. })
    }

    /// Maps a transport error from reqwest.
    pub fn from_reqwest(platform: Platform, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout {
                platform,
                secs: timeout.as_secs(),
            }
        } else if err.is_decode() {
            ApiError::Parse {
                platform,
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            ApiError::Status {
                platform,
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            ApiError::Network {
                platform,
                message: err.to_string(),
            }
        }
    }
}

// =============================================================================
// Platform Traits
// =============================================================================

/// Storefront order system.
#[async_trait]
pub trait StoreApi: Send + Sync {
    /// Lists orders. `query.after = None` drops the date filter.
    async fn list_orders(&self, query: &OrderQuery) -> ApiResult<Vec<StoreOrder>>;

    /// Looks a product (or variation) up by exact SKU.
    async fn get_product_by_sku(&self, sku: &str) -> ApiResult<Option<StoreProduct>>;

    /// Sets the absolute stock quantity of a product or variation.
    async fn set_stock(
        &self,
        product_id: &str,
        parent_id: Option<&str>,
        quantity: i64,
    ) -> ApiResult<()>;

    /// One page of the product catalog (1-based).
    async fn list_products(&self, page: u32, per_page: u32) -> ApiResult<Vec<StoreProduct>>;

    /// One page of a variable product's variations (1-based).
    async fn list_variations(
        &self,
        parent_id: &str,
        page: u32,
        per_page: u32,
    ) -> ApiResult<Vec<StoreProduct>>;
}

/// Point-of-sale / inventory system.
#[async_trait]
pub trait PosApi: Send + Sync {
    /// Lists sales at a location. `since = None` drops the date filter.
    async fn list_sales(
        &self,
        since: Option<DateTime<Utc>>,
        location_id: &str,
    ) -> ApiResult<Vec<PosSale>>;

    /// Full product catalog at a location, variants nested.
    async fn list_products(&self, location_id: &str) -> ApiResult<Vec<PosProduct>>;

    /// Records a sale, which deducts stock on the POS side.
    async fn create_sale_transaction(&self, sale: &NewSaleTransaction) -> ApiResult<CreatedSale>;

    /// Current on-hand quantity for a product (or one of its variants).
    async fn get_stock_report(
        &self,
        product_id: &str,
        variant_id: Option<&str>,
        location_id: &str,
    ) -> ApiResult<PosStockReport>;
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Bounds a platform call by `limit`.
pub async fn with_timeout<T, F>(platform: Platform, limit: Duration, fut: F) -> ApiResult<T>
where
    F: Future<Output = ApiResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout {
            platform,
            secs: limit.as_secs(),
        }),
    }
}

/// Turns a non-success response into an [`ApiError`].
pub(crate) async fn check_response(
    platform: Platform,
    response: reqwest::Response,
) -> ApiResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);
        return Err(ApiError::RateLimited {
            platform,
            retry_after,
        });
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > 200 {
        let cut = (0..=200).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        body.truncate(cut);
    }
    Err(ApiError::Status {
        platform,
        status: status.as_u16(),
        body,
    })
}

/// Lenient deserializers for fields the platforms send as either JSON
/// strings or numbers.
pub(crate) mod wire {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn value_to_string(value: Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// `"123"` or `123` → `"123"`.
    pub fn id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        value_to_string(Value::deserialize(d)?)
            .ok_or_else(|| serde::de::Error::custom("expected string or number id"))
    }

    /// Like [`id`], but `null`, `""` and `0` mean absent.
    pub fn opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(value_to_string(Value::deserialize(d)?).filter(|s| !s.is_empty() && s != "0"))
    }

    /// Decimal amount as string, from either a string or a number.
    pub fn opt_decimal<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(value_to_string(Value::deserialize(d)?).filter(|s| !s.trim().is_empty()))
    }

    /// Integer quantity from an integer, float, or numeric string.
    pub fn quantity<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        match Value::deserialize(d)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .ok_or_else(|| serde::de::Error::custom("quantity out of range")),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(|f| f.round() as i64)
                .map_err(serde::de::Error::custom),
            Value::Null => Ok(0),
            other => Err(serde::de::Error::custom(format!(
                "expected quantity, got {other}"
            ))),
        }
    }

    /// Optional integer quantity (`null` → `None`).
    pub fn opt_quantity<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(None),
            Value::Number(n) => Ok(n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64))),
            Value::String(s) => Ok(s.trim().parse::<f64>().ok().map(|f| f.round() as i64)),
            _ => Ok(None),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ApiError {
        ApiError::Status {
            platform: Platform::Pos,
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn test_failure_classes() {
        assert!(status(500).is_unavailable());
        assert!(status(503).is_unavailable());
        assert!(status(401).is_unavailable());
        assert!(status(403).is_unavailable());
        assert!(!status(400).is_unavailable());
        assert!(!status(404).is_unavailable());
        assert!(!status(422).is_unavailable());

        let timeout = ApiError::Timeout {
            platform: Platform::Store,
            secs: 15,
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_unavailable());
        assert_eq!(timeout.platform(), Platform::Store);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ApiError>(1)
        };
        let err = with_timeout(Platform::Pos, Duration::from_secs(15), slow)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Timeout { secs: 15, .. }));
    }

    #[test]
    fn test_lenient_wire_fields() {
        #[derive(serde::Deserialize)]
        struct Row {
            #[serde(deserialize_with = "wire::id")]
            id: String,
            #[serde(default, deserialize_with = "wire::opt_id")]
            parent: Option<String>,
            #[serde(deserialize_with = "wire::quantity")]
            qty: i64,
            #[serde(default, deserialize_with = "wire::opt_decimal")]
            price: Option<String>,
        }

        let row: Row =
            serde_json::from_str(r#"{"id": 42, "parent": 0, "qty": "3", "price": 9.5}"#).unwrap();
        assert_eq!(row.id, "42");
        assert_eq!(row.parent, None);
        assert_eq!(row.qty, 3);
        assert_eq!(row.price.as_deref(), Some("9.5"));
    }
}
