//! # Change-Set Fetcher
//!
//! Pulls the trailing window of sales from one platform and normalizes them
//! into [`ChangeRecord`]s.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Query with date filter (since = now - window_days)                 │
//! │       └── failed? retry once without the filter                        │
//! │  2. Filter client-side by occurred_at >= since                         │
//! │  3. Drop echoes (records this engine wrote on that platform)           │
//! │  4. Drop invalid line items (empty SKU, quantity <= 0)                 │
//! │  5. Sort oldest first                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use stockbridge_core::validation::validate_line_item;
use stockbridge_core::{ChangeRecord, LineItem, Money, Platform, STORE_ORIGIN_META_KEY};

use crate::client::{with_timeout, ApiResult, OrderQuery, PosApi, PosSale, StoreApi, StoreOrder};
use crate::config::MAX_WINDOW_DAYS;
use crate::context::ConnectionContext;

/// Output of one fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchedChanges {
    /// Oldest first.
    pub records: Vec<ChangeRecord>,
    /// Records skipped because this engine wrote them.
    pub echoes_skipped: u32,
    /// Dropped lines and records, fallback notices.
    pub warnings: Vec<String>,
}

/// Reads change sets from either platform.
pub struct ChangeSetFetcher {
    ctx: ConnectionContext,
    store: Arc<dyn StoreApi>,
    pos: Arc<dyn PosApi>,
}

impl ChangeSetFetcher {
    pub fn new(ctx: &ConnectionContext, store: Arc<dyn StoreApi>, pos: Arc<dyn PosApi>) -> Self {
        ChangeSetFetcher {
            ctx: ctx.clone(),
            store,
            pos,
        }
    }

    /// Start of the trailing window ending at `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - window_length(self.ctx.window_days)
    }

    /// Fetches every change on `platform` since `since`.
    ///
    /// Errors only when the platform could not be read even without the
    /// date filter.
    pub async fn fetch_changes(
        &self,
        platform: Platform,
        since: DateTime<Utc>,
    ) -> ApiResult<FetchedChanges> {
        let mut fetched = FetchedChanges::default();

        let raw = match platform {
            Platform::Store => self.fetch_store(since, &mut fetched.warnings).await?,
            Platform::Pos => self.fetch_pos(since, &mut fetched.warnings).await?,
        };
        let total = raw.len();

        for (record, warnings) in raw {
            if record.occurred_at < since {
                continue;
            }
            if self.ctx.echo.is_echo(&record) {
                debug!(
                    platform = %platform,
                    source_id = %record.source_id,
                    "Skipping record written by this engine"
                );
                fetched.echoes_skipped += 1;
                continue;
            }
            fetched.warnings.extend(warnings);
            if record.line_items.is_empty() {
                fetched.warnings.push(format!(
                    "{} {}: no usable line items, skipped",
                    platform, record.source_id
                ));
                continue;
            }
            fetched.records.push(record);
        }

        fetched.records.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });

        info!(
            platform = %platform,
            fetched = total,
            kept = fetched.records.len(),
            echoes = fetched.echoes_skipped,
            "Fetched change set"
        );
        Ok(fetched)
    }

    // =========================================================================
    // Store
    // =========================================================================

    async fn fetch_store(
        &self,
        since: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> ApiResult<Vec<(ChangeRecord, Vec<String>)>> {
        let orders = match self.list_store_orders(Some(since)).await {
            Ok(orders) => orders,
            Err(err) => {
                warn!(error = %err, "Date-filtered order query failed, retrying unfiltered");
                warnings.push(format!("store date filter failed ({err}), filtered locally"));
                self.list_store_orders(None).await?
            }
        };

        Ok(orders
            .into_iter()
            .map(|order| self.store_order_to_record(order))
            .collect())
    }

    async fn list_store_orders(&self, after: Option<DateTime<Utc>>) -> ApiResult<Vec<StoreOrder>> {
        let mut orders = Vec::new();
        for page in 1..=self.ctx.max_pages {
            let query = OrderQuery {
                after,
                statuses: self.ctx.order_statuses.clone(),
                page,
                per_page: self.ctx.per_page,
            };
            let batch = with_timeout(
                Platform::Store,
                self.ctx.request_timeout,
                self.store.list_orders(&query),
            )
            .await?;

            let short = batch.len() < self.ctx.per_page as usize;
            orders.extend(batch);
            if short {
                break;
            }
            if page == self.ctx.max_pages {
                warn!(max_pages = page, "Stopped paging Store orders at the page limit");
            }
        }
        Ok(orders)
    }

    fn store_order_to_record(&self, order: StoreOrder) -> (ChangeRecord, Vec<String>) {
        let scale = self.ctx.store_currency_scale;
        let mut warnings = Vec::new();

        let occurred_at = order.created_at().unwrap_or_else(|| {
            warnings.push(format!("store {}: missing creation time", order.id));
            Utc::now()
        });

        let engine_created =
            order.created_via.as_deref() == Some(self.ctx.echo.store_created_via.as_str());
        let reference = if engine_created {
            order.created_via.clone()
        } else if order.has_meta(STORE_ORIGIN_META_KEY) {
            Some(STORE_ORIGIN_META_KEY.to_string())
        } else {
            order.created_via.clone()
        };
        let customer_label = order.billing_name();

        let mut line_items = Vec::with_capacity(order.line_items.len());
        let mut lines_total = Money::zero();
        for (index, line) in order.line_items.into_iter().enumerate() {
            let unit_price = parse_amount(line.price.as_deref(), scale);
            let item = LineItem {
                sku: line.sku.unwrap_or_default(),
                quantity: line.quantity,
                unit_price,
                product_id: line.variation_id.or(line.product_id),
            };
            match validate_line_item(item) {
                Ok(item) => match add_line_total(lines_total, &item) {
                    Some(total) => {
                        lines_total = total;
                        line_items.push(item);
                    }
                    None => warnings.push(format!(
                        "store {} line {}: line total out of range, dropped",
                        order.id, index
                    )),
                },
                Err(e) => {
                    warnings.push(format!("store {} line {}: {}, dropped", order.id, index, e))
                }
            }
        }

        let total_amount = match order.total.as_deref() {
            Some(total) => parse_amount(Some(total), scale),
            None => lines_total,
        };

        let record = ChangeRecord {
            source_platform: Platform::Store,
            source_id: order.id,
            occurred_at,
            line_items,
            total_amount,
            customer_label,
            reference,
        };
        (record, warnings)
    }

    // =========================================================================
    // POS
    // =========================================================================

    async fn fetch_pos(
        &self,
        since: DateTime<Utc>,
        warnings: &mut Vec<String>,
    ) -> ApiResult<Vec<(ChangeRecord, Vec<String>)>> {
        let location = self.ctx.location_id.as_str();
        let timeout = self.ctx.request_timeout;

        let filtered =
            with_timeout(Platform::Pos, timeout, self.pos.list_sales(Some(since), location)).await;
        let sales = match filtered {
            Ok(sales) => sales,
            Err(err) => {
                warn!(error = %err, "Date-filtered sales query failed, retrying unfiltered");
                warnings.push(format!("pos date filter failed ({err}), filtered locally"));
                with_timeout(Platform::Pos, timeout, self.pos.list_sales(None, location)).await?
            }
        };

        Ok(sales
            .into_iter()
            .map(|sale| self.pos_sale_to_record(sale))
            .collect())
    }

    fn pos_sale_to_record(&self, sale: PosSale) -> (ChangeRecord, Vec<String>) {
        let scale = self.ctx.pos_currency_scale;
        let mut warnings = Vec::new();

        let occurred_at = sale
            .created_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| {
                warnings.push(format!("pos {}: missing creation time", sale.id));
                Utc::now()
            });

        let mut line_items = Vec::with_capacity(sale.items.len());
        let mut lines_total = Money::zero();
        for (index, line) in sale.items.into_iter().enumerate() {
            let item = LineItem {
                sku: line.sku.unwrap_or_default(),
                quantity: line.quantity,
                unit_price: parse_amount(line.unit_price.as_deref(), scale),
                product_id: line.product_id,
            };
            match validate_line_item(item) {
                Ok(item) => match add_line_total(lines_total, &item) {
                    Some(total) => {
                        lines_total = total;
                        line_items.push(item);
                    }
                    None => warnings.push(format!(
                        "pos {} line {}: line total out of range, dropped",
                        sale.id, index
                    )),
                },
                Err(e) => {
                    warnings.push(format!("pos {} line {}: {}, dropped", sale.id, index, e))
                }
            }
        }

        let total_amount = match sale.total.as_deref() {
            Some(total) => parse_amount(Some(total), scale),
            None => lines_total,
        };

        let record = ChangeRecord {
            source_platform: Platform::Pos,
            source_id: sale.id,
            occurred_at,
            line_items,
            total_amount,
            customer_label: sale
                .customer
                .and_then(|c| c.name)
                .filter(|n| !n.trim().is_empty()),
            reference: sale.reference,
        };
        (record, warnings)
    }
}

/// Decimal string to minor units; unparseable amounts count as zero.
/// A context built without going through config validation can carry any
/// day count; `ChronoDuration::days` panics outside its range.
fn window_length(days: i64) -> ChronoDuration {
    ChronoDuration::days(days.clamp(1, MAX_WINDOW_DAYS))
}

/// `total` plus this line's price times quantity, or `None` when either
/// step leaves the minor-unit range.
fn add_line_total(total: Money, item: &LineItem) -> Option<Money> {
    item.unit_price
        .checked_mul(item.quantity)
        .and_then(|line| total.checked_add(line))
}

fn parse_amount(raw: Option<&str>, scale: u32) -> Money {
    match raw {
        Some(value) => Money::parse_decimal(value, scale).unwrap_or_else(|e| {
            debug!(value, error = %e, "Unparseable amount, using zero");
            Money::zero()
        }),
        None => Money::zero(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount(Some("12.50"), 2).minor_units(), 1250);
        assert_eq!(parse_amount(Some("1000"), 0).minor_units(), 1000);
        assert_eq!(parse_amount(Some("n/a"), 2), Money::zero());
        assert_eq!(parse_amount(None, 2), Money::zero());
    }

    #[test]
    fn test_add_line_total_refuses_overflow() {
        let line = |price: i64, quantity: i64| LineItem {
            sku: "MUG".to_string(),
            quantity,
            unit_price: Money::from_minor(price),
            product_id: None,
        };

        assert_eq!(add_line_total(Money::from_minor(100), &line(250, 2)), Some(Money::from_minor(600)));
        assert_eq!(add_line_total(Money::zero(), &line(10_000_000, 1_000_000_000_000_000)), None);
        assert_eq!(add_line_total(Money::from_minor(i64::MAX), &line(1, 1)), None);
    }

    #[test]
    fn test_window_length_is_bounded() {
        assert_eq!(window_length(7), ChronoDuration::days(7));
        assert_eq!(window_length(0), ChronoDuration::days(1));
        assert_eq!(window_length(i64::MAX), ChronoDuration::days(MAX_WINDOW_DAYS));
    }
}
