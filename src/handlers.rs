use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::cache_registry::CacheRegistry;
use crate::client_identity::ClientId;
use crate::error::{GuardError, GuardResult};
use crate::key_builder::build_key;
use crate::metrics::CacheSnapshot;
use crate::response::HealthResponse;
use crate::throttler::{LimitScope, RequestThrottle, ThrottleStats};

pub const PRODUCTS: &str = "products";
pub const LISTINGS: &str = "listings";

const PAGE_SIZE: usize = 20;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub throttle: Arc<RequestThrottle>,
    pub caches: Arc<CacheRegistry>,
    pub catalog: Arc<Catalog>,
}

/// In-memory stand-in for the product store.
pub struct Catalog {
    products: BTreeMap<String, Value>,
}

impl Catalog {
    pub fn new(products: impl IntoIterator<Item = Value>) -> Self {
        let products = products
            .into_iter()
            .filter_map(|product| {
                let id = product.get("id")?.as_str()?.to_string();
                Some((id, product))
            })
            .collect();
        Self { products }
    }

    pub fn demo() -> Self {
        Self::new([
            json!({"id": "lamp-01", "name": "Desk lamp", "category": "lighting", "price": 3900}),
            json!({"id": "lamp-02", "name": "Floor lamp", "category": "lighting", "price": 8900}),
            json!({"id": "mug-01", "name": "Stoneware mug", "category": "kitchen", "price": 1400}),
            json!({"id": "kettle-01", "name": "Kettle", "category": "kitchen", "price": 4500}),
        ])
    }

    pub async fn product(&self, id: &str) -> GuardResult<Value> {
        self.products
            .get(id)
            .cloned()
            .ok_or_else(|| GuardError::NotFound(format!("product {}", id)))
    }

    pub async fn list(&self, category: Option<&str>, page: usize) -> GuardResult<Value> {
        let items: Vec<&Value> = self
            .products
            .values()
            .filter(|product| {
                category.map_or(true, |wanted| {
                    product.get("category").and_then(Value::as_str) == Some(wanted)
                })
            })
            .skip(page.saturating_sub(1) * PAGE_SIZE)
            .take(PAGE_SIZE)
            .collect();

        Ok(json!({ "page": page.max(1), "items": items }))
    }
}

/// Fetch one product through the product cache
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> GuardResult<Json<Value>> {
    let cache = state.caches.namespace(PRODUCTS);
    let key = build_key("product", [("id", id.as_str())]);
    let ttl = cache.settings().default_ttl;

    let product = cache
        .get_or_set(&key, ttl, || state.catalog.product(&id))
        .await?;
    Ok(Json(product))
}

/// List products, cached per distinct query
pub async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> GuardResult<Json<Value>> {
    let cache = state.caches.namespace(LISTINGS);
    let key = build_key("listing", &params);
    let ttl = cache.settings().default_ttl;

    let category = params.get("category").map(String::as_str);
    let page = params
        .get("page")
        .and_then(|page| page.parse().ok())
        .unwrap_or(1);

    let listing = cache
        .get_or_set(&key, ttl, || state.catalog.list(category, page))
        .await?;
    Ok(Json(listing))
}

/// Sign-in endpoint guarded by the `auth` throttle.
///
/// Credential checks belong to the account service; only the throttle is exercised here.
pub async fn login(ClientId(client): ClientId) -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "client": client })),
    )
}

/// Checkout endpoint guarded by the `payment` throttle.
pub async fn checkout(ClientId(client): ClientId) -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "pending", "client": client })),
    )
}

#[derive(Debug, Deserialize)]
pub struct InvalidateQuery {
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub namespace: String,
    pub removed: usize,
}

/// Invalidate entries in a namespace; without a pattern the namespace is cleared
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(query): Query<InvalidateQuery>,
) -> GuardResult<Json<InvalidateResponse>> {
    let cache = state.caches.existing(&namespace)?;

    let removed = match query.pattern.as_deref() {
        Some(pattern) => cache.delete_pattern(pattern)?,
        None => {
            let removed = cache.size();
            cache.clear();
            removed
        }
    };

    Ok(Json(InvalidateResponse { namespace, removed }))
}

/// Forget throttle state for one client in one category
pub async fn reset_rate_limit(
    State(state): State<AppState>,
    Path((category, identifier)): Path<(String, String)>,
) -> impl IntoResponse {
    state
        .throttle
        .reset(&LimitScope::category(category.as_str()), &identifier);

    Json(json!({
        "status": "success",
        "category": category,
        "identifier": identifier,
    }))
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub throttle: ThrottleStats,
    pub caches: BTreeMap<String, CacheSnapshot>,
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        throttle: state.throttle.stats(),
        caches: state.caches.stats(),
    })
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse::healthy())
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ready",
        "cache_namespaces": state.caches.names(),
    }))
}
