//! # Domain Types
//!
//! Core domain types used throughout Stockbridge.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  ChangeRecord   │   │ ProductIdentity │   │  LedgerEntry    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  source_platform│   │  sku (join key) │   │  source_platform│       │
//! │  │  source_id      │   │  store ids      │   │  source_id      │       │
//! │  │  line_items[]   │   │  pos ids        │   │  (UNIQUE)       │       │
//! │  │  total_amount   │   │  variant id     │   │  processed_at   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   StockLevel    │   │    Platform     │   │   Direction     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  sku            │   │  Store          │   │  StoreToPos     │       │
//! │  │  quantity >= 0  │   │  Pos            │   │  PosToStore     │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//! A `ChangeRecord` lives for one fetch cycle and is never persisted. Only the
//! `LedgerEntry` derived from it survives the pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::money::Money;

// =============================================================================
// Platform
// =============================================================================

/// One of the two platforms being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Storefront order system.
    Store,
    /// Point-of-sale / inventory system.
    Pos,
}

impl Platform {
    /// Returns the opposite platform.
    #[inline]
    pub const fn other(&self) -> Self {
        match self {
            Platform::Store => Platform::Pos,
            Platform::Pos => Platform::Store,
        }
    }

    /// Lowercase name used in storage and logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Platform::Store => "store",
            Platform::Pos => "pos",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "store" | "woocommerce" | "woo" => Ok(Platform::Store),
            "pos" => Ok(Platform::Pos),
            other => Err(CoreError::UnknownPlatform(other.to_string())),
        }
    }
}

// =============================================================================
// Direction
// =============================================================================

/// One half of a bidirectional pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Store orders deduct POS stock.
    StoreToPos,
    /// POS sales deduct Store stock.
    PosToStore,
}

impl Direction {
    /// Both directions in pass order.
    pub const PASS_ORDER: [Direction; 2] = [Direction::StoreToPos, Direction::PosToStore];

    /// Platform whose records are read.
    #[inline]
    pub const fn source(&self) -> Platform {
        match self {
            Direction::StoreToPos => Platform::Store,
            Direction::PosToStore => Platform::Pos,
        }
    }

    /// Platform whose stock is written.
    #[inline]
    pub const fn target(&self) -> Platform {
        self.source().other()
    }

    /// Returns the direction that reads from `platform`.
    pub const fn from_source(platform: Platform) -> Self {
        match platform {
            Platform::Store => Direction::StoreToPos,
            Platform::Pos => Direction::PosToStore,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::StoreToPos => "store_to_pos",
            Direction::PosToStore => "pos_to_store",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "store_to_pos" => Ok(Direction::StoreToPos),
            "pos_to_store" => Ok(Direction::PosToStore),
            other => Err(CoreError::UnknownDirection(other.to_string())),
        }
    }
}

// =============================================================================
// Change Record
// =============================================================================

/// A line in an order or sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Shared join key across both platforms.
    pub sku: String,
    /// Units sold (always positive once past the client boundary).
    pub quantity: i64,
    /// Unit price in the source platform's minor units.
    pub unit_price: Money,
    /// Source-platform product id, when the platform reports one.
    pub product_id: Option<String>,
}

/// A normalized sale/order from either platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub source_platform: Platform,
    /// Unique per platform.
    pub source_id: String,
    pub occurred_at: DateTime<Utc>,
    pub line_items: Vec<LineItem>,
    pub total_amount: Money,
    /// Billing name or POS customer name, for the audit ledger.
    pub customer_label: Option<String>,
    /// Platform reference (POS sale reference, Store `created_via` marker).
    pub reference: Option<String>,
}

impl ChangeRecord {
    /// Deterministic reference for the compensating write made on the
    /// target platform for line `index` of this record.
    ///
    /// Replaying the same record yields the same reference, which lets a
    /// target that deduplicates on reference absorb a retried write.
    ///
    /// ## Example
    /// ```rust
    /// use chrono::Utc;
    /// use stockbridge_core::{ChangeRecord, Money, Platform};
    ///
    /// let record = ChangeRecord {
    ///     source_platform: Platform::Store,
    ///     source_id: "1001".into(),
    ///     occurred_at: Utc::now(),
    ///     line_items: vec![],
    ///     total_amount: Money::zero(),
    ///     customer_label: None,
    ///     reference: None,
    /// };
    /// assert_eq!(record.write_reference("SB-", 0), "SB-STORE-1001-0");
    /// ```
    pub fn write_reference(&self, prefix: &str, index: usize) -> String {
        format!(
            "{}{}-{}-{}",
            prefix,
            self.source_platform.as_str().to_uppercase(),
            self.source_id,
            index
        )
    }
}

// =============================================================================
// Product Identity
// =============================================================================

/// Resolved mapping of a SKU to each platform's native product keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductIdentity {
    pub sku: String,
    pub store_product_id: Option<String>,
    /// Parent product when the Store product is a variation.
    pub store_parent_id: Option<String>,
    pub pos_product_id: Option<String>,
    /// Required for "variable" POS products; the product id for "single".
    pub pos_variant_id: Option<String>,
    /// Quantity reported by the target catalog at resolution time.
    pub reported_stock: Option<i64>,
}

impl ProductIdentity {
    /// Identity as seen from the Store catalog.
    pub fn store(sku: impl Into<String>, product_id: impl Into<String>) -> Self {
        ProductIdentity {
            sku: sku.into(),
            store_product_id: Some(product_id.into()),
            store_parent_id: None,
            pos_product_id: None,
            pos_variant_id: None,
            reported_stock: None,
        }
    }

    /// Identity as seen from the POS catalog.
    pub fn pos(
        sku: impl Into<String>,
        product_id: impl Into<String>,
        variant_id: impl Into<String>,
    ) -> Self {
        ProductIdentity {
            sku: sku.into(),
            store_product_id: None,
            store_parent_id: None,
            pos_product_id: Some(product_id.into()),
            pos_variant_id: Some(variant_id.into()),
            reported_stock: None,
        }
    }

    /// Records the source-side product id carried on the line item.
    pub fn with_source_product(mut self, source: Platform, product_id: Option<&str>) -> Self {
        let Some(id) = product_id else {
            return self;
        };
        match source {
            Platform::Store if self.store_product_id.is_none() => {
                self.store_product_id = Some(id.to_string());
            }
            Platform::Pos if self.pos_product_id.is_none() => {
                self.pos_product_id = Some(id.to_string());
            }
            _ => {}
        }
        self
    }
}

/// Why a SKU could not be matched on the target platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    /// Line item carried no usable SKU.
    EmptySku,
    /// No product with this SKU in the target catalog.
    NotInCatalog,
}

impl fmt::Display for UnmatchedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmatchedReason::EmptySku => f.write_str("line item has no SKU"),
            UnmatchedReason::NotInCatalog => f.write_str("not found in target catalog"),
        }
    }
}

/// Outcome of resolving a SKU against a target catalog.
///
/// `Unmatched` is an expected, reportable condition, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Matched(ProductIdentity),
    Unmatched {
        sku: String,
        target: Platform,
        reason: UnmatchedReason,
    },
}

// =============================================================================
// Ledger Entry
// =============================================================================

/// Durable idempotency/audit record, one per processed `ChangeRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// UUID v4.
    pub id: String,
    /// Connection (platform pair) the record was processed under.
    pub connection_id: String,
    pub source_platform: Platform,
    pub source_id: String,
    pub direction: Direction,
    /// Total in the source platform's minor units.
    pub total_amount: Money,
    /// Decimal places of `total_amount`.
    pub currency_scale: u32,
    pub customer_label: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    /// Line items that moved stock.
    pub items_deducted: i64,
    /// Units deducted on the target platform.
    pub stock_moved: i64,
}

impl LedgerEntry {
    /// Builds a ledger entry for a freshly reconciled record.
    pub fn for_record(
        connection_id: &str,
        record: &ChangeRecord,
        currency_scale: u32,
        items_deducted: i64,
        stock_moved: i64,
    ) -> Self {
        LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            connection_id: connection_id.to_string(),
            source_platform: record.source_platform,
            source_id: record.source_id.clone(),
            direction: Direction::from_source(record.source_platform),
            total_amount: record.total_amount,
            currency_scale,
            customer_label: record.customer_label.clone(),
            occurred_at: record.occurred_at,
            processed_at: Utc::now(),
            items_deducted,
            stock_moved,
        }
    }
}

// =============================================================================
// Stock Level
// =============================================================================

/// Locally mirrored quantity-on-hand for one SKU.
///
/// This mirror, not the platforms' own stock reports, is the source of truth
/// during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub connection_id: String,
    pub sku: String,
    /// Never negative.
    pub quantity: i64,
    pub last_synced_at: DateTime<Utc>,
}

// =============================================================================
// Echo Detection
// =============================================================================

/// Markers that identify a record as written by this engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoMarkers {
    /// Prefix stamped on POS sale references.
    pub reference_prefix: String,
    /// `created_via` value stamped on Store records.
    pub store_created_via: String,
}

impl Default for EchoMarkers {
    fn default() -> Self {
        EchoMarkers {
            reference_prefix: crate::DEFAULT_REFERENCE_PREFIX.to_string(),
            store_created_via: crate::STORE_CREATED_VIA.to_string(),
        }
    }
}

impl EchoMarkers {
    /// Returns true if `record` originated from the other platform via this
    /// engine and must not be reconciled back.
    pub fn is_echo(&self, record: &ChangeRecord) -> bool {
        let Some(reference) = record.reference.as_deref() else {
            return false;
        };
        match record.source_platform {
            Platform::Pos => reference.starts_with(&self.reference_prefix),
            Platform::Store => {
                reference == self.store_created_via
                    || reference == crate::STORE_ORIGIN_META_KEY
                    || reference.starts_with(&self.reference_prefix)
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(platform: Platform, reference: Option<&str>) -> ChangeRecord {
        ChangeRecord {
            source_platform: platform,
            source_id: "1001".into(),
            occurred_at: Utc::now(),
            line_items: vec![LineItem {
                sku: "ABC".into(),
                quantity: 3,
                unit_price: Money::from_minor(500),
                product_id: Some("77".into()),
            }],
            total_amount: Money::from_minor(1500),
            customer_label: None,
            reference: reference.map(str::to_string),
        }
    }

    #[test]
    fn test_direction_platforms() {
        assert_eq!(Direction::StoreToPos.source(), Platform::Store);
        assert_eq!(Direction::StoreToPos.target(), Platform::Pos);
        assert_eq!(Direction::PosToStore.source(), Platform::Pos);
        assert_eq!(Direction::PosToStore.target(), Platform::Store);
        assert_eq!(Direction::from_source(Platform::Pos), Direction::PosToStore);
    }

    #[test]
    fn test_platform_parsing() {
        assert_eq!("store".parse::<Platform>().unwrap(), Platform::Store);
        assert_eq!("WooCommerce".parse::<Platform>().unwrap(), Platform::Store);
        assert_eq!("POS".parse::<Platform>().unwrap(), Platform::Pos);
        assert!("erp".parse::<Platform>().is_err());
        assert_eq!("pos-to-store".parse::<Direction>().unwrap(), Direction::PosToStore);
    }

    #[test]
    fn test_echo_detection_pos_reference() {
        let markers = EchoMarkers::default();
        assert!(markers.is_echo(&record(Platform::Pos, Some("SB-STORE-1001-0"))));
        assert!(!markers.is_echo(&record(Platform::Pos, Some("R-0042"))));
        assert!(!markers.is_echo(&record(Platform::Pos, None)));
    }

    #[test]
    fn test_echo_detection_store_marker() {
        let markers = EchoMarkers::default();
        assert!(markers.is_echo(&record(Platform::Store, Some("stockbridge"))));
        assert!(markers.is_echo(&record(Platform::Store, Some("_stockbridge_source"))));
        assert!(!markers.is_echo(&record(Platform::Store, Some("checkout"))));
    }

    #[test]
    fn test_write_reference_is_deterministic() {
        let r = record(Platform::Store, None);
        assert_eq!(r.write_reference("SB-", 2), r.write_reference("SB-", 2));
        assert_ne!(r.write_reference("SB-", 0), r.write_reference("SB-", 1));
    }

    #[test]
    fn test_identity_source_product() {
        let identity = ProductIdentity::pos("ABC", "p1", "v1")
            .with_source_product(Platform::Store, Some("77"));
        assert_eq!(identity.store_product_id.as_deref(), Some("77"));
        assert_eq!(identity.pos_product_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_ledger_entry_for_record() {
        let r = record(Platform::Store, None);
        let entry = LedgerEntry::for_record("default", &r, 2, 1, 3);
        assert_eq!(entry.direction, Direction::StoreToPos);
        assert_eq!(entry.source_id, "1001");
        assert_eq!(entry.stock_moved, 3);
        assert!(!entry.id.is_empty());
    }
}
