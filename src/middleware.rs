use crate::client_identity::{self, ClientId};
use crate::error::{GuardError, GuardResult};
use crate::handlers::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Logging middleware for request/response tracking
pub async fn logging_middleware(mut request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client_id = client_identity::resolve(request.headers(), peer);
    let request_id = request_id(&request);

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID, value);
    }

    info!(
        target: "storefront_guard::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        client_id = %client_id,
        "Incoming request"
    );

    let mut response = next.run(request).await;

    info!(
        target: "storefront_guard::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request completed"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}

/// Only allow-listed clients may reach admin routes.
pub async fn require_admin(
    State(state): State<AppState>,
    ClientId(client): ClientId,
    request: Request,
    next: Next,
) -> GuardResult<Response> {
    if !state.throttle.config().is_allowed(&client) {
        warn!(
            target: "storefront_guard::middleware",
            client_id = %client,
            uri = %request.uri(),
            "Admin route refused"
        );
        return Err(GuardError::Forbidden(client));
    }
    Ok(next.run(request).await)
}

// Keep an upstream id when one was supplied.
fn request_id(request: &Request) -> String {
    request
        .headers()
        .get(REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
