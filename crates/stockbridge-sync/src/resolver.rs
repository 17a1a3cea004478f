//! # Identity Resolver
//!
//! Maps a SKU to the target platform's native product keys.
//!
//! ## Catalog Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Target POS                                                             │
//! │    pass start: list_products(location) → index by SKU                  │
//! │      single   : product sku  → (product id, override or product id)    │
//! │      variable : product sku  → (product id, first non-null variant id) │
//! │                 variant sku  → (product id, own id or the same)        │
//! │                                                                         │
//! │  Target Store                                                           │
//! │    get_product_by_sku on first request, memoized (hit and miss)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A resolver lives for exactly one direction of one pass. Nothing it learns
//! is persisted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use stockbridge_core::validation::normalize_sku;
use stockbridge_core::{Platform, ProductIdentity, Resolution, UnmatchedReason};

use crate::client::{with_timeout, ApiResult, PosApi, PosProduct, StoreApi};
use crate::context::ConnectionContext;

/// Per-pass SKU resolver for one target platform.
pub struct IdentityResolver {
    target: Platform,
    ctx: ConnectionContext,
    store: Arc<dyn StoreApi>,
    pos: Arc<dyn PosApi>,
    /// Preloaded POS catalog (POS target only).
    pos_index: HashMap<String, ProductIdentity>,
    /// Store lookups so far, misses included.
    store_cache: HashMap<String, Option<ProductIdentity>>,
}

impl IdentityResolver {
    /// Prepares a resolver for `target`.
    ///
    /// For a POS target this loads the whole location catalog; a failure
    /// here means the direction cannot run.
    pub async fn for_pass(
        target: Platform,
        ctx: &ConnectionContext,
        store: Arc<dyn StoreApi>,
        pos: Arc<dyn PosApi>,
    ) -> ApiResult<Self> {
        let pos_index = match target {
            Platform::Pos => {
                let products = with_timeout(
                    Platform::Pos,
                    ctx.request_timeout,
                    pos.list_products(&ctx.location_id),
                )
                .await?;
                let index = index_pos_catalog(&products, &ctx.variant_overrides);
                debug!(
                    products = products.len(),
                    skus = index.len(),
                    "Indexed POS catalog"
                );
                index
            }
            Platform::Store => HashMap::new(),
        };

        Ok(IdentityResolver {
            target,
            ctx: ctx.clone(),
            store,
            pos,
            pos_index,
            store_cache: HashMap::new(),
        })
    }

    pub fn target(&self) -> Platform {
        self.target
    }

    /// Resolves `sku` on the target platform.
    ///
    /// An unknown or empty SKU is `Unmatched`, not an error. Errors are only
    /// platform failures while looking the SKU up.
    pub async fn resolve(&mut self, sku: &str) -> ApiResult<Resolution> {
        let sku = match normalize_sku(sku) {
            Ok(sku) => sku,
            Err(_) => {
                return Ok(Resolution::Unmatched {
                    sku: sku.to_string(),
                    target: self.target,
                    reason: UnmatchedReason::EmptySku,
                })
            }
        };

        let found = match self.target {
            Platform::Pos => self.pos_index.get(&sku).cloned(),
            Platform::Store => self.resolve_on_store(&sku).await?,
        };

        Ok(match found {
            Some(identity) => Resolution::Matched(identity),
            None => Resolution::Unmatched {
                sku,
                target: self.target,
                reason: UnmatchedReason::NotInCatalog,
            },
        })
    }

    async fn resolve_on_store(&mut self, sku: &str) -> ApiResult<Option<ProductIdentity>> {
        if let Some(cached) = self.store_cache.get(sku) {
            return Ok(cached.clone());
        }

        let product = with_timeout(
            Platform::Store,
            self.ctx.request_timeout,
            self.store.get_product_by_sku(sku),
        )
        .await?;

        let identity = product.map(|p| {
            let mut identity = ProductIdentity::store(sku, p.id);
            identity.store_parent_id = p.parent_id;
            identity.reported_stock = p.stock_quantity;
            identity
        });
        if identity.is_none() {
            debug!(sku = %sku, "SKU not found on Store");
        }
        self.store_cache.insert(sku.to_string(), identity.clone());
        Ok(identity)
    }

    /// Quantity the target platform reports for a resolved product.
    ///
    /// Only used to seed the mirror the first time a SKU is seen.
    pub async fn reported_stock(&self, identity: &ProductIdentity) -> ApiResult<Option<i64>> {
        if identity.reported_stock.is_some() {
            return Ok(identity.reported_stock);
        }
        match self.target {
            Platform::Store => Ok(None),
            Platform::Pos => {
                let Some(product_id) = identity.pos_product_id.as_deref() else {
                    return Ok(None);
                };
                let variant_id = identity
                    .pos_variant_id
                    .as_deref()
                    .filter(|v| *v != product_id);
                let report = with_timeout(
                    Platform::Pos,
                    self.ctx.request_timeout,
                    self.pos.get_stock_report(product_id, variant_id, &self.ctx.location_id),
                )
                .await?;
                Ok(Some(report.quantity))
            }
        }
    }
}

// =============================================================================
// POS Catalog Index
// =============================================================================

/// Builds the SKU index for a POS catalog. First product wins on duplicate
/// SKUs.
pub fn index_pos_catalog(
    products: &[PosProduct],
    overrides: &BTreeMap<String, String>,
) -> HashMap<String, ProductIdentity> {
    let mut index = HashMap::new();
    let mut insert = |sku: &str, identity: ProductIdentity| {
        if index.contains_key(sku) {
            warn!(sku = %sku, "Duplicate SKU in POS catalog, keeping first");
        } else {
            index.insert(sku.to_string(), identity);
        }
    };

    for product in products {
        let product_sku = product.sku.as_deref().and_then(|s| normalize_sku(s).ok());

        if product.is_variable() {
            let first_variant = product.variants.iter().find_map(|v| v.id.clone());
            match &first_variant {
                Some(variant_id) => debug!(
                    product_id = %product.id,
                    variant_id = %variant_id,
                    "Chose first variant with an id"
                ),
                None => warn!(
                    product_id = %product.id,
                    "Variable product has no variant ids, using product id"
                ),
            }
            let fallback = first_variant.unwrap_or_else(|| product.id.clone());

            if let Some(sku) = &product_sku {
                insert(
                    sku.as_str(),
                    ProductIdentity::pos(sku.as_str(), product.id.as_str(), fallback.as_str()),
                );
            }
            for variant in &product.variants {
                let Some(sku) = variant.sku.as_deref().and_then(|s| normalize_sku(s).ok()) else {
                    continue;
                };
                let variant_id = variant.id.as_deref().unwrap_or(&fallback);
                insert(
                    sku.as_str(),
                    ProductIdentity::pos(sku.as_str(), product.id.as_str(), variant_id),
                );
            }
        } else if let Some(sku) = &product_sku {
            let variant_id = overrides
                .get(sku)
                .map(String::as_str)
                .unwrap_or(&product.id);
            insert(
                sku.as_str(),
                ProductIdentity::pos(sku.as_str(), product.id.as_str(), variant_id),
            );
        }
    }

    index
}
