//! # Pass-Level Errors
//!
//! A `SyncError` means no pass ran, or one could not finish setting up.
//! Anything that goes wrong with a single record lands in the
//! [`SyncReport`](stockbridge_core::SyncReport) instead.
//!
//! ```text
//!   config   InvalidConfig, MissingCredentials, InvalidUrl, ConfigLoad/Save
//!   engine   PassInProgress, Database, Internal
//!   platform Api   (bootstrap only; a pass turns these into item errors)
//! ```

use thiserror::Error;

use stockbridge_core::Platform;
use stockbridge_db::DbError;

use crate::client::ApiError;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing {platform} configuration: {field}")]
    MissingCredentials { platform: Platform, field: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("cannot read config: {0}")]
    ConfigLoadFailed(String),

    #[error("cannot write config: {0}")]
    ConfigSaveFailed(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// The lease for this connection is held by another pass.
    #[error("a sync pass is already running for connection '{connection_id}'")]
    PassInProgress { connection_id: String },

    #[error("local database: {0}")]
    Database(#[from] DbError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl SyncError {
    /// Whether the next scheduled pass can be expected to get further.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Api(api) => api.is_unavailable() || api.is_timeout(),
            SyncError::Database(db) => db.is_busy(),
            SyncError::PassInProgress { .. } => true,
            _ => false,
        }
    }

    /// Needs the operator to edit the config before anything will work.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingCredentials { .. }
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials_is_config_error() {
        let missing = SyncError::MissingCredentials {
            platform: Platform::Pos,
            field: "pos.api_token".into(),
        };
        assert!(missing.is_config_error());
        assert!(!missing.is_retryable());
        assert_eq!(missing.to_string(), "missing pos configuration: pos.api_token");
    }

    #[test]
    fn test_retryable_errors() {
        let down = SyncError::Api(ApiError::Network {
            platform: Platform::Store,
            message: "connection refused".into(),
        });
        assert!(down.is_retryable());

        let busy = SyncError::PassInProgress {
            connection_id: "default".into(),
        };
        assert!(busy.is_retryable());
        assert!(!busy.is_config_error());

        let locked = SyncError::from(DbError::Busy("database is locked".into()));
        assert!(locked.is_retryable());

        let missing = SyncError::from(DbError::not_found("SyncRun", "r-1"));
        assert!(!missing.is_retryable());
    }
}
