//! Tower middleware that puts a [`RequestThrottle`] in front of a handler.

use crate::client_identity;
use crate::response::{apply_quota_headers, denial_response};
use crate::throttler::{LimitScope, RequestThrottle};
use axum::extract::{ConnectInfo, Request};
use axum::response::Response;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Wraps a service so every request is checked against one throttle scope.
///
/// Refused requests never reach the inner service and get a 429 with a JSON
/// `{error, limit, retryAfter}` body. Allowed responses carry
/// `X-RateLimit-Limit` and `X-RateLimit-Remaining`.
#[derive(Clone)]
pub struct RateLimitLayer {
    throttle: Arc<RequestThrottle>,
    scope: Arc<LimitScope>,
}

impl RateLimitLayer {
    pub fn new(throttle: Arc<RequestThrottle>, scope: LimitScope) -> Self {
        Self {
            throttle,
            scope: Arc::new(scope),
        }
    }

    pub fn category(throttle: Arc<RequestThrottle>, category: impl Into<String>) -> Self {
        Self::new(throttle, LimitScope::category(category))
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            throttle: self.throttle.clone(),
            scope: self.scope.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    throttle: Arc<RequestThrottle>,
    scope: Arc<LimitScope>,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let identifier = client_identity::resolve(request.headers(), peer);
        let decision = self.throttle.check(&self.scope, &identifier);

        if !decision.allowed {
            return Box::pin(async move { Ok(denial_response(&decision)) });
        }

        // the clone may not be ready; drive the instance that was polled
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let mut response = inner.call(request).await?;
            apply_quota_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}
