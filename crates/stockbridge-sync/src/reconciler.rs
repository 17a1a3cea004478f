//! # Stock Reconciler
//!
//! Applies one [`ChangeRecord`] from the source platform to the target.
//!
//! ## Record Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ledger has (source, id)? ──yes──► Duplicate (nothing touched)          │
//! │          │ no                                                           │
//! │          ▼                                                              │
//! │  for each line item                                                     │
//! │    resolve SKU on target ──unmatched──► item error, next item           │
//! │    on_hand = mirror (seeded from target catalog if absent)              │
//! │    applied = min(requested, on_hand)                                    │
//! │      applied == 0 ──► warning, no write                                 │
//! │    target write                                                         │
//! │      POS   : sale transaction, reference SB-{SRC}-{id}-{line}           │
//! │      Store : absolute stock = on_hand - applied                         │
//! │      timeout / 4xx ──► item error, next item                            │
//! │      unavailable   ──► Aborted, direction stops                         │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  any item handled? ──no──► Failed                                       │
//! │          │ yes                                                          │
//! │          ▼                                                              │
//! │  one SQLite transaction: mirror decrements + ledger entry ──► Success   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The target write and the local commit are not atomic across systems. A
//! crash between them replays the record on the next pass; the POS write
//! carries a deterministic reference and the Store write is an absolute
//! quantity, so the replay converges on the same state.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use stockbridge_core::{
    plan_deduction, ChangeRecord, Direction, ItemError, ItemErrorKind, LedgerEntry, LineItem,
    Platform, ProductIdentity, ReconcileResult, Resolution,
};
use stockbridge_db::{Database, StockDecrement};

use crate::client::{with_timeout, ApiError, NewSaleItem, NewSaleTransaction, PosApi, StoreApi};
use crate::context::ConnectionContext;
use crate::resolver::IdentityResolver;

/// How a failed platform call affects the record.
enum Failure {
    /// Record continues with the next item.
    Item(ItemError),
    /// Target is down; stop the direction.
    Abort(ItemError),
}

/// Applies change records to the target platform and the local mirror.
pub struct StockReconciler {
    ctx: ConnectionContext,
    db: Database,
    store: Arc<dyn StoreApi>,
    pos: Arc<dyn PosApi>,
}

impl StockReconciler {
    pub fn new(
        ctx: &ConnectionContext,
        db: Database,
        store: Arc<dyn StoreApi>,
        pos: Arc<dyn PosApi>,
    ) -> Self {
        StockReconciler {
            ctx: ctx.clone(),
            db,
            store,
            pos,
        }
    }

    /// Reconciles one record against the resolver's target platform.
    ///
    /// Never fails: every problem ends up in the returned result.
    #[instrument(
        skip(self, record, resolver),
        fields(source = %record.source_platform, source_id = %record.source_id)
    )]
    pub async fn reconcile(
        &self,
        record: &ChangeRecord,
        resolver: &mut IdentityResolver,
    ) -> ReconcileResult {
        let connection_id = self.ctx.connection_id.as_str();
        let source = record.source_platform;

        match self
            .db
            .ledger()
            .exists(connection_id, source, &record.source_id)
            .await
        {
            Ok(true) => {
                debug!("Already in ledger, skipping");
                return ReconcileResult::duplicate(&record.source_id);
            }
            Ok(false) => {}
            Err(e) => {
                let mut result = ReconcileResult::started(&record.source_id);
                result
                    .errors
                    .push(item_error(record, None, ItemErrorKind::Storage, e.to_string()));
                return result;
            }
        }

        let mut result = ReconcileResult::started(&record.source_id);
        let mut decrements: Vec<StockDecrement> = Vec::new();
        // Units already taken from each SKU by earlier lines of this record
        let mut pending: HashMap<String, i64> = HashMap::new();
        let mut handled = 0usize;
        let mut stock_moved = 0i64;

        for (index, item) in record.line_items.iter().enumerate() {
            let identity = match resolver.resolve(&item.sku).await {
                Ok(Resolution::Matched(identity)) => {
                    identity.with_source_product(source, item.product_id.as_deref())
                }
                Ok(Resolution::Unmatched { sku, target, reason }) => {
                    debug!(sku = %sku, target = %target, "Unmatched SKU");
                    result.errors.push(item_error(
                        record,
                        Some(&sku),
                        ItemErrorKind::Unmatched,
                        format!("SKU {sku} {reason} on {target}"),
                    ));
                    continue;
                }
                Err(err) => match classify(record, Some(&item.sku), err) {
                    Failure::Item(e) => {
                        result.errors.push(e);
                        continue;
                    }
                    Failure::Abort(e) => return aborted(result, e),
                },
            };

            let mirror = match self.mirror_quantity(&identity, resolver, record).await {
                Ok(quantity) => quantity,
                Err(Failure::Item(e)) => {
                    result.errors.push(e);
                    continue;
                }
                Err(Failure::Abort(e)) => return aborted(result, e),
            };
            let taken = pending.get(&identity.sku).copied().unwrap_or(0);
            let plan = plan_deduction(item.quantity, mirror - taken);

            if plan.is_empty() {
                warn!(sku = %identity.sku, requested = item.quantity, "Insufficient stock");
                result.warnings.push(format!(
                    "{} {} [{}]: insufficient stock, requested {} with {} on hand",
                    source, record.source_id, identity.sku, item.quantity, plan.on_hand
                ));
                handled += 1;
                continue;
            }
            if plan.is_short() {
                warn!(sku = %identity.sku, shortfall = plan.shortfall(), "Partial deduction");
                result.warnings.push(format!(
                    "{} {} [{}]: insufficient stock, deducted {} of {}",
                    source, record.source_id, identity.sku, plan.applied, plan.requested
                ));
            }

            let write = self
                .write_target(record, index, item, &identity, plan.applied, plan.remaining)
                .await;
            match write {
                Ok(()) => {
                    debug!(sku = %identity.sku, applied = plan.applied, "Target updated");
                    *pending.entry(identity.sku.clone()).or_insert(0) += plan.applied;
                    decrements.push(StockDecrement {
                        sku: identity.sku.clone(),
                        applied: plan.applied,
                    });
                    handled += 1;
                    stock_moved += plan.applied;
                }
                Err(err) => match classify(record, Some(&identity.sku), err) {
                    Failure::Item(e) => result.errors.push(e),
                    Failure::Abort(e) => return aborted(result, e),
                },
            }
        }

        if handled == 0 {
            if result.errors.is_empty() {
                result.errors.push(item_error(
                    record,
                    None,
                    ItemErrorKind::Unmatched,
                    "record has no line items".to_string(),
                ));
            }
            info!(errors = result.errors.len(), "No line item could be applied");
            return result;
        }

        let entry = LedgerEntry::for_record(
            connection_id,
            record,
            self.ctx.currency_scale(source),
            decrements.len() as i64,
            stock_moved,
        );
        match self.db.ledger().commit(&entry, &decrements).await {
            Ok(()) => {
                result.mark_success(stock_moved);
                info!(stock_moved, errors = result.errors.len(), "Record reconciled");
            }
            Err(e) if e.is_unique_violation() => {
                // Another pass committed it between the check and now
                warn!("Record committed concurrently, reporting as duplicate");
                return ReconcileResult::duplicate(&record.source_id);
            }
            Err(e) => {
                result
                    .errors
                    .push(item_error(record, None, ItemErrorKind::Storage, e.to_string()));
            }
        }

        result
    }

    /// Mirror quantity for a SKU, seeding it from the target's reported
    /// stock the first time the SKU is seen.
    async fn mirror_quantity(
        &self,
        identity: &ProductIdentity,
        resolver: &IdentityResolver,
        record: &ChangeRecord,
    ) -> Result<i64, Failure> {
        let connection_id = self.ctx.connection_id.as_str();
        let storage = |e: stockbridge_db::DbError| {
            Failure::Item(item_error(
                record,
                Some(&identity.sku),
                ItemErrorKind::Storage,
                e.to_string(),
            ))
        };

        if let Some(level) = self
            .db
            .stock()
            .get(connection_id, &identity.sku)
            .await
            .map_err(storage)?
        {
            return Ok(level.quantity);
        }

        let reported = resolver
            .reported_stock(identity)
            .await
            .map_err(|e| classify(record, Some(&identity.sku), e))?;

        match reported {
            Some(quantity) => {
                let level = self
                    .db
                    .stock()
                    .seed_if_absent(connection_id, &identity.sku, quantity)
                    .await
                    .map_err(storage)?;
                Ok(level.quantity)
            }
            None => {
                debug!(sku = %identity.sku, "No reported stock to seed mirror from");
                Ok(0)
            }
        }
    }

    /// Issues the compensating write on the target platform.
    async fn write_target(
        &self,
        record: &ChangeRecord,
        index: usize,
        item: &LineItem,
        identity: &ProductIdentity,
        applied: i64,
        remaining: i64,
    ) -> Result<(), ApiError> {
        let target = record.source_platform.other();
        let limit = self.ctx.request_timeout;

        match target {
            Platform::Pos => {
                let (Some(product_id), Some(variant_id)) =
                    (identity.pos_product_id.clone(), identity.pos_variant_id.clone())
                else {
                    return Err(ApiError::Parse {
                        platform: Platform::Pos,
                        message: format!("no POS product/variant id for {}", identity.sku),
                    });
                };
                let sale = NewSaleTransaction {
                    location_id: self.ctx.location_id.clone(),
                    reference: record.write_reference(self.ctx.reference_prefix(), index),
                    note: Some(format!(
                        "{} {} {}",
                        Direction::from_source(record.source_platform),
                        record.source_platform,
                        record.source_id
                    )),
                    items: vec![NewSaleItem {
                        product_id,
                        variant_id,
                        quantity: applied,
                        unit_price: Some(
                            item.unit_price
                                .format(self.ctx.currency_scale(record.source_platform)),
                        ),
                    }],
                };
                with_timeout(target, limit, self.pos.create_sale_transaction(&sale)).await?;
                Ok(())
            }
            Platform::Store => {
                let Some(product_id) = identity.store_product_id.as_deref() else {
                    return Err(ApiError::Parse {
                        platform: Platform::Store,
                        message: format!("no Store product id for {}", identity.sku),
                    });
                };
                with_timeout(
                    target,
                    limit,
                    self.store
                        .set_stock(product_id, identity.store_parent_id.as_deref(), remaining),
                )
                .await
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn item_error(
    record: &ChangeRecord,
    sku: Option<&str>,
    kind: ItemErrorKind,
    message: String,
) -> ItemError {
    ItemError {
        source_platform: record.source_platform,
        source_id: record.source_id.clone(),
        sku: sku.map(str::to_string),
        kind,
        message,
    }
}

fn classify(record: &ChangeRecord, sku: Option<&str>, err: ApiError) -> Failure {
    if err.is_unavailable() {
        Failure::Abort(item_error(record, sku, ItemErrorKind::Unavailable, err.to_string()))
    } else if err.is_timeout() {
        Failure::Item(item_error(record, sku, ItemErrorKind::Timeout, err.to_string()))
    } else {
        Failure::Item(item_error(record, sku, ItemErrorKind::Rejected, err.to_string()))
    }
}

fn aborted(mut result: ReconcileResult, error: ItemError) -> ReconcileResult {
    warn!(error = %error, "Target unavailable, aborting record");
    result.errors.push(error);
    result.mark_aborted();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockbridge_core::Money;

    fn record() -> ChangeRecord {
        ChangeRecord {
            source_platform: Platform::Store,
            source_id: "1001".into(),
            occurred_at: Utc::now(),
            line_items: vec![],
            total_amount: Money::zero(),
            customer_label: None,
            reference: None,
        }
    }

    #[test]
    fn test_classify_failures() {
        let r = record();
        let down = ApiError::Status {
            platform: Platform::Pos,
            status: 503,
            body: String::new(),
        };
        assert!(matches!(
            classify(&r, Some("ABC"), down),
            Failure::Abort(ItemError { kind: ItemErrorKind::Unavailable, .. })
        ));

        let slow = ApiError::Timeout {
            platform: Platform::Pos,
            secs: 15,
        };
        assert!(matches!(
            classify(&r, Some("ABC"), slow),
            Failure::Item(ItemError { kind: ItemErrorKind::Timeout, .. })
        ));

        let rejected = ApiError::Status {
            platform: Platform::Pos,
            status: 422,
            body: "bad variant".into(),
        };
        match classify(&r, Some("ABC"), rejected) {
            Failure::Item(e) => {
                assert_eq!(e.kind, ItemErrorKind::Rejected);
                assert_eq!(e.sku.as_deref(), Some("ABC"));
                assert_eq!(e.source_id, "1001");
            }
            Failure::Abort(_) => panic!("4xx must not abort"),
        }
    }
}
