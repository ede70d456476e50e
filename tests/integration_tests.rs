use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use storefront_guard::config::Config;
use storefront_guard::create_app;
use storefront_guard::handlers::AppState;
use tower::ServiceExt;

fn app_with(config: &Config) -> (Router, AppState) {
    let state = AppState::from_config(config).unwrap();
    (create_app(state.clone()), state)
}

const ADMIN: &str = "192.0.2.1";

fn app() -> (Router, AppState) {
    app_with(&Config {
        allow_list: vec![ADMIN.to_string()],
        ..Config::default()
    })
}

async fn send(app: &Router, method: Method, uri: &str, client: &str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn header<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response.headers()[name].to_str().unwrap()
}

#[test]
fn test_zero_cache_capacity_rejected() {
    let config = Config {
        cache_max_size: 0,
        ..Config::default()
    };
    assert!(AppState::from_config(&config).is_err());
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = app();
    let response = send(&app, Method::GET, "/health", "203.0.113.1").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_product_is_cached_and_annotated() {
    let (app, state) = app();

    let first = send(&app, Method::GET, "/api/products/lamp-01", "203.0.113.1").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "x-ratelimit-limit"), "60");
    assert_eq!(header(&first, "x-ratelimit-remaining"), "59");
    assert_eq!(json_body(first).await["name"], "Desk lamp");

    let second = send(&app, Method::GET, "/api/products/lamp-01", "203.0.113.1").await;
    assert_eq!(header(&second, "x-ratelimit-remaining"), "58");

    let products = state.caches.existing("products").unwrap();
    let stats = products.stats();
    assert_eq!(stats.size, 1);
    // the first request misses, the second hits
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(products.get("product:id=lamp-01").unwrap()["id"], "lamp-01");
}

#[tokio::test]
async fn test_missing_product_is_not_cached() {
    let (app, state) = app();
    let response = send(&app, Method::GET, "/api/products/ghost", "203.0.113.1").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "not_found");
    assert_eq!(state.caches.existing("products").unwrap().size(), 0);
}

#[tokio::test]
async fn test_listing_key_ignores_query_order() {
    let (app, state) = app();
    send(&app, Method::GET, "/api/products?page=1&category=kitchen", "203.0.113.1").await;
    let response = send(&app, Method::GET, "/api/products?category=kitchen&page=1", "203.0.113.1").await;

    let body = json_body(response).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 2);

    let listings = state.caches.existing("listings").unwrap();
    assert_eq!(listings.size(), 1);
    assert!(listings.get("listing:category=kitchen&page=1").is_some());
}

#[tokio::test]
async fn test_login_denied_after_limit() {
    let (app, _) = app();

    for _ in 0..5 {
        let response = send(&app, Method::POST, "/auth/login", "198.51.100.8").await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let denied = send(&app, Method::POST, "/auth/login", "198.51.100.8").await;
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&denied, "retry-after"), "900");
    assert_eq!(header(&denied, "x-ratelimit-remaining"), "0");

    let body = json_body(denied).await;
    assert_eq!(body["limit"], 5);
    assert_eq!(body["retryAfter"], 900);
    assert!(body["error"].is_string());

    // someone else is unaffected
    let other = send(&app, Method::POST, "/auth/login", "198.51.100.9").await;
    assert_eq!(other.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_escalated_client_blocked_everywhere() {
    let (app, state) = app();
    let client = "198.51.100.20";

    for _ in 0..8 {
        send(&app, Method::POST, "/payment/checkout", client).await;
    }
    assert!(state.throttle.is_blocked(client));

    let response = send(&app, Method::GET, "/api/products/mug-01", client).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(response).await;
    assert!(body["retryAfter"].as_u64().unwrap() > 25 * 60);
}

#[tokio::test]
async fn test_private_forwarded_hops_are_skipped() {
    let (app, state) = app();
    send(&app, Method::POST, "/payment/checkout", "10.0.0.3, 203.0.113.77").await;

    let stats = state.throttle.stats();
    assert_eq!(stats.tracked_counters, 1);
    assert_eq!(stats.decisions.allowed_requests, 1);

    let response = send(&app, Method::POST, "/payment/checkout", "203.0.113.77").await;
    assert_eq!(header(&response, "x-ratelimit-remaining"), "1");
}

#[tokio::test]
async fn test_pattern_invalidation() {
    let (app, state) = app();
    for id in ["lamp-01", "lamp-02", "mug-01"] {
        send(&app, Method::GET, &format!("/api/products/{}", id), "203.0.113.1").await;
    }

    let response = send(&app, Method::DELETE, "/admin/cache/products?pattern=lamp", ADMIN).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["removed"], 2);

    let products = state.caches.existing("products").unwrap();
    assert_eq!(products.size(), 1);
    assert!(products.get("product:id=mug-01").is_some());
}

#[tokio::test]
async fn test_invalidation_errors() {
    let (app, _) = app();

    let unknown = send(&app, Method::DELETE, "/admin/cache/ghost", ADMIN).await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let bad = send(&app, Method::DELETE, "/admin/cache/products?pattern=%28", ADMIN).await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_clear_namespace_without_pattern() {
    let (app, state) = app();
    send(&app, Method::GET, "/api/products/lamp-01", "203.0.113.1").await;
    send(&app, Method::GET, "/api/products/mug-01", "203.0.113.1").await;

    let response = send(&app, Method::DELETE, "/admin/cache/products", ADMIN).await;
    assert_eq!(json_body(response).await["removed"], 2);
    assert_eq!(state.caches.existing("products").unwrap().size(), 0);
}

#[tokio::test]
async fn test_reset_endpoint_restores_quota() {
    let (app, _) = app();
    let client = "198.51.100.30";

    for _ in 0..3 {
        send(&app, Method::POST, "/payment/checkout", client).await;
    }
    let denied = send(&app, Method::POST, "/payment/checkout", client).await;
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

    let reset = send(
        &app,
        Method::DELETE,
        &format!("/admin/rate-limit/payment/{}", client),
        ADMIN,
    )
    .await;
    assert_eq!(reset.status(), StatusCode::OK);

    let allowed = send(&app, Method::POST, "/payment/checkout", client).await;
    assert_eq!(allowed.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_blocked_client_cannot_reset_itself() {
    let (app, state) = app();
    let client = "198.51.100.40";

    for _ in 0..8 {
        send(&app, Method::POST, "/payment/checkout", client).await;
    }
    assert!(state.throttle.is_blocked(client));

    for path in ["/admin/rate-limit/payment/198.51.100.40", "/admin/rate-limit/api/198.51.100.40"] {
        let response = send(&app, Method::DELETE, path, client).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["error"], "forbidden");
    }
    assert!(state.throttle.is_blocked(client));

    let denied = send(&app, Method::POST, "/payment/checkout", client).await;
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_cache_admin_requires_allow_listed_client() {
    let (app, state) = app();
    send(&app, Method::GET, "/api/products/lamp-01", "203.0.113.1").await;

    let refused = send(&app, Method::DELETE, "/admin/cache/products", "203.0.113.1").await;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);
    assert_eq!(state.caches.existing("products").unwrap().size(), 1);

    // unknown namespaces are hidden from non-admins as well
    let unknown = send(&app, Method::DELETE, "/admin/cache/ghost", "203.0.113.1").await;
    assert_eq!(unknown.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_allow_listed_client_is_unlimited() {
    let config = Config {
        allow_list: vec!["203.0.113.200".to_string()],
        ..Config::default()
    };
    let (app, _) = app_with(&config);

    for _ in 0..20 {
        let response = send(&app, Method::POST, "/payment/checkout", "203.0.113.200").await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(header(&response, "x-ratelimit-remaining"), "3");
    }
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = app();
    send(&app, Method::GET, "/api/products/lamp-01", "203.0.113.1").await;

    let response = send(&app, Method::GET, "/metrics", "203.0.113.1").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["throttle"]["decisions"]["allowed_requests"], 1);
    assert_eq!(body["caches"]["products"]["size"], 1);
    assert_eq!(body["caches"]["products"]["misses"], 1);
}
