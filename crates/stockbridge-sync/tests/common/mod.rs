//! In-memory Store and POS fakes plus fixtures shared by the engine tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use stockbridge_core::Platform;
use stockbridge_db::{Database, DbConfig};
use stockbridge_sync::client::{
    ApiError, ApiResult, CreatedSale, NewSaleTransaction, OrderQuery, PosApi, PosProduct,
    PosSale, PosSaleItem, PosStockReport, PosVariant, StoreApi, StoreLineItem, StoreMeta,
    StoreOrder, StoreProduct,
};
use stockbridge_sync::{BridgeConfig, PassLockRegistry, SyncOrchestrator, SyncOrchestratorBuilder};

pub const CONNECTION: &str = "default";
pub const LOCATION: &str = "main";

/// Injected failure for one product on a fake platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Timeout,
    Reject,
    Down,
}

impl Fault {
    fn to_error(self, platform: Platform) -> ApiError {
        match self {
            Fault::Timeout => ApiError::Timeout { platform, secs: 15 },
            Fault::Reject => ApiError::Status {
                platform,
                status: 422,
                body: "rejected".into(),
            },
            Fault::Down => ApiError::Status {
                platform,
                status: 503,
                body: "maintenance".into(),
            },
        }
    }
}

fn network(platform: Platform) -> ApiError {
    ApiError::Network {
        platform,
        message: "connection refused".into(),
    }
}

// =============================================================================
// Fake Store
// =============================================================================

#[derive(Default)]
pub struct FakeStore {
    pub orders: Mutex<Vec<StoreOrder>>,
    /// Catalog in listing order; variations live in `variations`.
    pub products: Mutex<Vec<StoreProduct>>,
    pub variations: Mutex<HashMap<String, Vec<StoreProduct>>>,
    pub set_stock_calls: Mutex<Vec<(String, Option<String>, i64)>>,
    pub faults: Mutex<HashMap<String, Fault>>,
    pub reject_date_filter: AtomicBool,
    pub down: AtomicBool,
    pub order_queries: AtomicUsize,
    pub sku_lookups: AtomicUsize,
}

impl FakeStore {
    pub fn add_order(&self, order: StoreOrder) {
        self.orders.lock().unwrap().push(order);
    }

    pub fn add_product(&self, product: StoreProduct) {
        self.products.lock().unwrap().push(product);
    }

    pub fn fail(&self, product_id: &str, fault: Fault) {
        self.faults.lock().unwrap().insert(product_id.to_string(), fault);
    }

    pub fn set_stock_calls(&self) -> Vec<(String, Option<String>, i64)> {
        self.set_stock_calls.lock().unwrap().clone()
    }

    fn check_up(&self) -> ApiResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(network(Platform::Store));
        }
        Ok(())
    }

    fn all_products(&self) -> Vec<StoreProduct> {
        let mut all = self.products.lock().unwrap().clone();
        for variations in self.variations.lock().unwrap().values() {
            all.extend(variations.iter().cloned());
        }
        all
    }
}

#[async_trait]
impl StoreApi for FakeStore {
    async fn list_orders(&self, query: &OrderQuery) -> ApiResult<Vec<StoreOrder>> {
        self.order_queries.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        if query.after.is_some() && self.reject_date_filter.load(Ordering::SeqCst) {
            return Err(Fault::Reject.to_error(Platform::Store));
        }

        let orders = self.orders.lock().unwrap();
        let start = ((query.page.max(1) - 1) * query.per_page) as usize;
        Ok(orders
            .iter()
            .skip(start)
            .take(query.per_page as usize)
            .cloned()
            .collect())
    }

    async fn get_product_by_sku(&self, sku: &str) -> ApiResult<Option<StoreProduct>> {
        self.sku_lookups.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        Ok(self.all_products().into_iter().find(|p| p.sku == sku))
    }

    async fn set_stock(
        &self,
        product_id: &str,
        parent_id: Option<&str>,
        quantity: i64,
    ) -> ApiResult<()> {
        self.check_up()?;
        if let Some(fault) = self.faults.lock().unwrap().get(product_id) {
            return Err(fault.to_error(Platform::Store));
        }
        self.set_stock_calls.lock().unwrap().push((
            product_id.to_string(),
            parent_id.map(str::to_string),
            quantity,
        ));
        Ok(())
    }

    async fn list_products(&self, page: u32, per_page: u32) -> ApiResult<Vec<StoreProduct>> {
        self.check_up()?;
        let products = self.products.lock().unwrap();
        let start = ((page.max(1) - 1) * per_page) as usize;
        Ok(products
            .iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect())
    }

    async fn list_variations(
        &self,
        parent_id: &str,
        page: u32,
        per_page: u32,
    ) -> ApiResult<Vec<StoreProduct>> {
        self.check_up()?;
        let variations = self.variations.lock().unwrap();
        let start = ((page.max(1) - 1) * per_page) as usize;
        Ok(variations
            .get(parent_id)
            .map(|all| {
                all.iter()
                    .skip(start)
                    .take(per_page as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

// =============================================================================
// Fake POS
// =============================================================================

#[derive(Default)]
pub struct FakePos {
    pub sales: Mutex<Vec<PosSale>>,
    pub catalog: Mutex<Vec<PosProduct>>,
    /// On-hand by product id.
    pub stock: Mutex<HashMap<String, i64>>,
    pub created: Mutex<Vec<NewSaleTransaction>>,
    /// Faults by variant id.
    pub faults: Mutex<HashMap<String, Fault>>,
    pub down: AtomicBool,
    pub writes_down: AtomicBool,
    pub catalog_loads: AtomicUsize,
    /// On the next sale write, another process takes over the pass lease.
    pub lease_takeover: Mutex<Option<Database>>,
}

impl FakePos {
    pub fn add_sale(&self, sale: PosSale) {
        self.sales.lock().unwrap().push(sale);
    }

    pub fn add_product(&self, product: PosProduct) {
        self.catalog.lock().unwrap().push(product);
    }

    pub fn fail(&self, variant_id: &str, fault: Fault) {
        self.faults.lock().unwrap().insert(variant_id.to_string(), fault);
    }

    pub fn created(&self) -> Vec<NewSaleTransaction> {
        self.created.lock().unwrap().clone()
    }

    fn check_up(&self) -> ApiResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(network(Platform::Pos));
        }
        Ok(())
    }
}

#[async_trait]
impl PosApi for FakePos {
    async fn list_sales(
        &self,
        _since: Option<DateTime<Utc>>,
        _location_id: &str,
    ) -> ApiResult<Vec<PosSale>> {
        self.check_up()?;
        Ok(self.sales.lock().unwrap().clone())
    }

    async fn list_products(&self, _location_id: &str) -> ApiResult<Vec<PosProduct>> {
        self.catalog_loads.fetch_add(1, Ordering::SeqCst);
        self.check_up()?;
        Ok(self.catalog.lock().unwrap().clone())
    }

    async fn create_sale_transaction(&self, sale: &NewSaleTransaction) -> ApiResult<CreatedSale> {
        self.check_up()?;
        let takeover = self.lease_takeover.lock().unwrap().take();
        if let Some(db) = takeover {
            take_over_lease(&db, "other-host").await;
        }
        if self.writes_down.load(Ordering::SeqCst) {
            return Err(network(Platform::Pos));
        }
        for item in &sale.items {
            if let Some(fault) = self.faults.lock().unwrap().get(&item.variant_id) {
                return Err(fault.to_error(Platform::Pos));
            }
        }

        let mut created = self.created.lock().unwrap();
        created.push(sale.clone());
        let id = format!("S-BRIDGE-{}", created.len());

        // The POS lists our own writes back like any other sale
        self.sales.lock().unwrap().push(PosSale {
            id: id.clone(),
            created_at: Some(rfc3339(Utc::now())),
            reference: Some(sale.reference.clone()),
            total: None,
            customer: None,
            items: sale
                .items
                .iter()
                .map(|item| PosSaleItem {
                    product_id: Some(item.product_id.clone()),
                    variant_id: Some(item.variant_id.clone()),
                    sku: None,
                    quantity: item.quantity,
                    unit_price: item.unit_price.clone(),
                })
                .collect(),
        });

        Ok(CreatedSale { id })
    }

    async fn get_stock_report(
        &self,
        product_id: &str,
        _variant_id: Option<&str>,
        _location_id: &str,
    ) -> ApiResult<PosStockReport> {
        self.check_up()?;
        let quantity = self
            .stock
            .lock()
            .unwrap()
            .get(product_id)
            .copied()
            .unwrap_or(0);
        Ok(PosStockReport { quantity })
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn hours_ago(hours: i64) -> DateTime<Utc> {
    Utc::now() - Duration::hours(hours)
}

/// A processing Store order placed `age_hours` ago.
pub fn store_order(id: &str, lines: &[(&str, i64)], age_hours: i64) -> StoreOrder {
    StoreOrder {
        id: id.into(),
        status: "processing".into(),
        date_created_gmt: Some(hours_ago(age_hours).format("%Y-%m-%dT%H:%M:%S").to_string()),
        total: Some("30.00".into()),
        created_via: Some("checkout".into()),
        billing: None,
        line_items: lines
            .iter()
            .map(|(sku, quantity)| StoreLineItem {
                product_id: None,
                variation_id: None,
                sku: Some(sku.to_string()),
                quantity: *quantity,
                price: Some("10.00".into()),
            })
            .collect(),
        meta_data: Vec::new(),
    }
}

/// A Store order this engine created on behalf of a POS sale.
pub fn bridged_store_order(id: &str, lines: &[(&str, i64)]) -> StoreOrder {
    let mut order = store_order(id, lines, 1);
    order.created_via = Some("stockbridge".into());
    order
}

/// A Store order tagged with the POS-origin meta key.
pub fn meta_tagged_store_order(id: &str, lines: &[(&str, i64)]) -> StoreOrder {
    let mut order = store_order(id, lines, 1);
    order.meta_data.push(StoreMeta {
        key: "_stockbridge_source".into(),
        value: serde_json::json!("pos"),
    });
    order
}

pub fn store_product(id: &str, sku: &str, stock: Option<i64>) -> StoreProduct {
    StoreProduct {
        id: id.into(),
        parent_id: None,
        sku: sku.into(),
        product_type: "simple".into(),
        manage_stock: stock.is_some(),
        stock_quantity: stock,
    }
}

pub fn pos_sale(id: &str, lines: &[(&str, i64)], age_hours: i64) -> PosSale {
    PosSale {
        id: id.into(),
        created_at: Some(rfc3339(hours_ago(age_hours))),
        reference: Some(format!("TILL-{id}")),
        total: Some("20.00".into()),
        customer: None,
        items: lines
            .iter()
            .map(|(sku, quantity)| PosSaleItem {
                product_id: None,
                variant_id: None,
                sku: Some(sku.to_string()),
                quantity: *quantity,
                unit_price: Some("10.00".into()),
            })
            .collect(),
    }
}

pub fn pos_single(id: &str, sku: &str) -> PosProduct {
    PosProduct {
        id: id.into(),
        sku: Some(sku.into()),
        name: Some(sku.into()),
        product_type: "single".into(),
        variants: Vec::new(),
    }
}

pub fn pos_variable(id: &str, sku: &str, variants: &[(Option<&str>, &str)]) -> PosProduct {
    PosProduct {
        id: id.into(),
        sku: Some(sku.into()),
        name: Some(sku.into()),
        product_type: "variable".into(),
        variants: variants
            .iter()
            .map(|(vid, vsku)| PosVariant {
                id: vid.map(str::to_string),
                sku: Some(vsku.to_string()),
            })
            .collect(),
    }
}

/// Config with every credential set, pointing nowhere real.
pub fn config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.connection.id = CONNECTION.into();
    config.store.base_url = Some("https://shop.example.test".into());
    config.store.consumer_key = Some("ck_test".to_string().into());
    config.store.consumer_secret = Some("cs_test".to_string().into());
    config.pos.base_url = Some("https://pos.example.test/api/v1".into());
    config.pos.api_token = Some("token".to_string().into());
    config.pos.location_id = Some(LOCATION.into());
    config
}

pub async fn database() -> Database {
    Database::new(DbConfig::in_memory())
        .await
        .expect("in-memory database")
}

/// Fakes, database and an orchestrator wired together.
/// What another process does once our lease has expired: the stale row is
/// replaced by its own.
pub async fn take_over_lease(db: &Database, holder: &str) {
    let locks = db.locks();
    if let Some(lease) = locks.current(CONNECTION).await.unwrap() {
        locks.release(CONNECTION, &lease.holder).await.unwrap();
    }
    assert!(locks.try_acquire(CONNECTION, holder, 900).await.unwrap());
}

pub struct Harness {
    pub db: Database,
    pub store: Arc<FakeStore>,
    pub pos: Arc<FakePos>,
    pub orchestrator: SyncOrchestrator,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(config()).await
    }

    pub async fn with_config(config: BridgeConfig) -> Self {
        Self::build(config, |builder| builder).await
    }

    pub async fn build(
        config: BridgeConfig,
        customize: impl FnOnce(SyncOrchestratorBuilder) -> SyncOrchestratorBuilder,
    ) -> Self {
        let db = database().await;
        let store = Arc::new(FakeStore::default());
        let pos = Arc::new(FakePos::default());

        let builder = SyncOrchestratorBuilder::new(config)
            .with_database(db.clone())
            .with_store(store.clone())
            .with_pos(pos.clone())
            .with_pass_locks(Arc::new(PassLockRegistry::default()));
        let orchestrator = customize(builder).build().expect("orchestrator");

        Harness {
            db,
            store,
            pos,
            orchestrator,
        }
    }

    pub async fn mirror(&self, sku: &str) -> Option<i64> {
        self.db
            .stock()
            .get(CONNECTION, sku)
            .await
            .unwrap()
            .map(|level| level.quantity)
    }

    pub async fn set_mirror(&self, sku: &str, quantity: i64) {
        self.db.stock().set(CONNECTION, sku, quantity).await.unwrap();
    }
}
