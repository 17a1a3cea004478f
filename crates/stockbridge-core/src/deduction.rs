//! # Stock Deduction
//!
//! The one piece of arithmetic every reconciliation funnels through.
//!
//! ## Conservation Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  applied   = min(requested, on_hand)                                    │
//! │  remaining = on_hand - applied          (never below zero)              │
//! │                                                                         │
//! │  on_hand=10, requested=3  → applied=3, remaining=7                      │
//! │  on_hand=2,  requested=3  → applied=2, remaining=0   (short by 1)       │
//! │  on_hand=0,  requested=3  → applied=0, remaining=0   (insufficient)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Result of clamping a requested deduction against on-hand stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductionPlan {
    pub on_hand: i64,
    pub requested: i64,
    /// Units actually removed.
    pub applied: i64,
    /// Quantity left after the deduction.
    pub remaining: i64,
}

impl DeductionPlan {
    /// True when fewer units were applied than requested.
    #[inline]
    pub const fn is_short(&self) -> bool {
        self.applied < self.requested
    }

    /// True when nothing at all could be deducted.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.applied == 0
    }

    /// Units requested but not available.
    #[inline]
    pub const fn shortfall(&self) -> i64 {
        self.requested - self.applied
    }
}

/// Clamps a requested deduction to the stock that exists.
///
/// Negative inputs are treated as zero; the result never drives stock below
/// zero.
pub fn plan_deduction(requested: i64, on_hand: i64) -> DeductionPlan {
    let requested = requested.max(0);
    let on_hand = on_hand.max(0);
    let applied = requested.min(on_hand);
    DeductionPlan {
        on_hand,
        requested,
        applied,
        remaining: on_hand - applied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_deduction() {
        let plan = plan_deduction(3, 10);
        assert_eq!(plan.applied, 3);
        assert_eq!(plan.remaining, 7);
        assert!(!plan.is_short());
    }

    #[test]
    fn test_clamped_deduction() {
        let plan = plan_deduction(3, 2);
        assert_eq!(plan.applied, 2);
        assert_eq!(plan.remaining, 0);
        assert!(plan.is_short());
        assert_eq!(plan.shortfall(), 1);
    }

    #[test]
    fn test_nothing_on_hand() {
        let plan = plan_deduction(5, 0);
        assert!(plan.is_empty());
        assert_eq!(plan.remaining, 0);
    }

    #[test]
    fn test_conservation_holds_for_range() {
        for on_hand in -2..12 {
            for requested in -2..12 {
                let plan = plan_deduction(requested, on_hand);
                let old = on_hand.max(0);
                assert_eq!(plan.remaining, (old - requested.max(0).min(old)).max(0));
                assert!(plan.remaining >= 0);
                assert!(plan.applied <= old);
            }
        }
    }
}
