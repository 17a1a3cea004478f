//! Errors raised by the pure domain rules.
//!
//! ```text
//! ValidationError  one bad line item or field; the fetcher drops the line
//! CoreError        a value from a platform or the database that does not parse
//! ```
//!
//! Neither ever aborts a pass: they become warnings or item errors upstream.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("unknown direction: {0}")]
    UnknownDirection(String),

    /// A price string such as `"12.5x"` that is not a decimal.
    #[error("invalid amount '{value}': {reason}")]
    InvalidAmount { value: String, reason: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Why a field was refused at the platform boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: &'static str },

    #[error("{field} is longer than {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("{field} cannot be negative")]
    MustNotBeNegative { field: &'static str },

    #[error("{field}: {reason}")]
    InvalidFormat {
        field: &'static str,
        reason: &'static str,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_field() {
        let err = ValidationError::Required { field: "sku" };
        assert_eq!(err.to_string(), "sku is required");

        let err = ValidationError::TooLong {
            field: "connection.id",
            max: 64,
        };
        assert_eq!(err.to_string(), "connection.id is longer than 64 characters");
    }

    #[test]
    fn test_validation_is_transparent_inside_core_error() {
        let err: CoreError = ValidationError::MustBePositive { field: "quantity" }.into();
        assert_eq!(err.to_string(), "quantity must be greater than zero");
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
