//! # Boundary Checks
//!
//! Everything a platform hands us passes through here before it can move
//! stock. Serde has already checked the wire shape; these check meaning.
//!
//! ```text
//!   platform JSON ──serde──► DTO ──fetcher──► validate_line_item ──► ChangeRecord
//!                                                 │
//!                                                 └─ Err: line dropped, warning
//!
//!   mirror write ──► validate_stock_quantity ──► SQLite CHECK (quantity >= 0)
//! ```
//!
//! ```rust
//! use stockbridge_core::validation::{normalize_sku, validate_quantity};
//!
//! assert_eq!(normalize_sku("  TSHIRT-M ").unwrap(), "TSHIRT-M");
//! assert!(validate_quantity(0).is_err());
//! ```

use crate::error::ValidationError;
use crate::types::LineItem;

pub type ValidationResult<T> = Result<T, ValidationError>;

pub const MAX_SKU_LENGTH: usize = 100;
pub const MAX_CONNECTION_ID_LENGTH: usize = 64;

/// Trims a SKU and checks it can be looked up.
///
/// Case is kept: neither platform folds it, so `tee-m` and `TEE-M` are two
/// products.
///
/// ```rust
/// use stockbridge_core::validation::normalize_sku;
///
/// assert!(normalize_sku("COKE-330").is_ok());
/// assert!(normalize_sku("   ").is_err());
/// assert!(normalize_sku(&"A".repeat(101)).is_err());
/// ```
pub fn normalize_sku(sku: &str) -> ValidationResult<String> {
    let sku = sku.trim();
    if sku.is_empty() {
        return Err(ValidationError::Required { field: "sku" });
    }
    if sku.chars().count() > MAX_SKU_LENGTH {
        return Err(ValidationError::TooLong {
            field: "sku",
            max: MAX_SKU_LENGTH,
        });
    }
    if sku.chars().any(char::is_control) {
        return Err(ValidationError::InvalidFormat {
            field: "sku",
            reason: "contains control characters",
        });
    }
    Ok(sku.to_string())
}

/// Connection ids key every ledger, mirror and lease row, and appear in
/// file names, so they are restricted to `[A-Za-z0-9_-]`.
pub fn validate_connection_id(id: &str) -> ValidationResult<()> {
    const FIELD: &str = "connection.id";

    if id.is_empty() {
        return Err(ValidationError::Required { field: FIELD });
    }
    if id.len() > MAX_CONNECTION_ID_LENGTH {
        return Err(ValidationError::TooLong {
            field: FIELD,
            max: MAX_CONNECTION_ID_LENGTH,
        });
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !id.chars().all(allowed) {
        return Err(ValidationError::InvalidFormat {
            field: FIELD,
            reason: "only letters, digits, '-' and '_' are allowed",
        });
    }
    Ok(())
}

/// A sold quantity. Refund lines and adjustments (zero or below) never
/// move stock.
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty > 0 {
        Ok(())
    } else {
        Err(ValidationError::MustBePositive { field: "quantity" })
    }
}

/// An absolute stock level about to be written.
pub fn validate_stock_quantity(qty: i64) -> ValidationResult<()> {
    if qty >= 0 {
        Ok(())
    } else {
        Err(ValidationError::MustNotBeNegative {
            field: "stock_quantity",
        })
    }
}

/// Returns the line with its SKU trimmed, or why it cannot be reconciled.
pub fn validate_line_item(item: LineItem) -> ValidationResult<LineItem> {
    let sku = normalize_sku(&item.sku)?;
    validate_quantity(item.quantity)?;
    Ok(LineItem { sku, ..item })
}
