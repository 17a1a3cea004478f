//! # stockbridge-core: Pure Domain Logic for Stockbridge
//!
//! ```text
//!   stockbridge-cli ──► stockbridge-sync ──► stockbridge-db
//!                              │                    │
//!                              ▼                    ▼
//!                       stockbridge-core (no I/O, no async)
//! ```
//!
//! Everything here is a plain value or a pure function. The sync crate
//! talks to the platforms; this crate decides what their answers mean.
//!
//! ## Modules
//!
//! - [`types`] - Platforms, change records, identities, ledger and stock rows
//! - [`money`] - Integer minor-unit money with decimal parsing
//! - [`deduction`] - Clamped stock deduction math
//! - [`report`] - Per-record and per-direction result aggregation
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation at the platform boundary
//!
//! ## Example Usage
//!
//! ```rust
//! use stockbridge_core::deduction::plan_deduction;
//!
//! // 3 requested, 2 on hand: clamp to what exists
//! let plan = plan_deduction(3, 2);
//! assert_eq!(plan.applied, 2);
//! assert_eq!(plan.remaining, 0);
//! assert!(plan.is_short());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod deduction;
pub mod error;
pub mod money;
pub mod report;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use deduction::{plan_deduction, DeductionPlan};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use report::{
    DirectionReport, DirectionSummary, ItemError, ItemErrorKind, ReconcileResult, RecordOutcome,
    RunStatus, SyncReport, SyncResponse, SyncResults,
};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default trailing window for change-set fetching, in days.
pub const DEFAULT_WINDOW_DAYS: i64 = 7;

/// Default reference prefix stamped on every write this engine makes.
///
/// Records carrying it are recognised as echoes and never fetched back.
pub const DEFAULT_REFERENCE_PREFIX: &str = "SB-";

/// `created_via` value for Store records written by this engine.
pub const STORE_CREATED_VIA: &str = "stockbridge";

/// Store order meta key marking a record that originated on the POS.
pub const STORE_ORIGIN_META_KEY: &str = "_stockbridge_source";

/// Default number of decimal places in a platform's money amounts.
pub const DEFAULT_CURRENCY_SCALE: u32 = 2;
