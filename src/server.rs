use crate::cache_registry::CacheRegistry;
use crate::config::Config;
use crate::error::GuardResult;
use crate::handlers::{
    checkout, get_product, health_check, invalidate_cache, list_products, login, metrics,
    readiness_check, reset_rate_limit, AppState, Catalog, LISTINGS, PRODUCTS,
};
use crate::housekeeping::Housekeeping;
use crate::middleware::{logging_middleware, require_admin};
use crate::rate_limit_config::{API, AUTH, PAYMENT};
use crate::rate_limit_layer::RateLimitLayer;
use crate::throttler::RequestThrottle;
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

impl AppState {
    /// Build the throttle, cache namespaces and catalog from configuration.
    pub fn from_config(config: &Config) -> GuardResult<Self> {
        let throttle = Arc::new(RequestThrottle::new(config.throttle_config()?));

        let caches = Arc::new(CacheRegistry::new(config.cache_settings())?);
        caches.register(PRODUCTS, config.cache_settings())?;
        caches.register(LISTINGS, config.cache_settings())?;

        Ok(Self {
            throttle,
            caches,
            catalog: Arc::new(Catalog::demo()),
        })
    }
}

/// Assemble the router. Each group of routes sits behind its own throttle scope;
/// admin routes answer only allow-listed clients.
pub fn create_app(state: AppState) -> Router {
    let throttle = state.throttle.clone();

    let catalog = Router::new()
        .route("/api/products", get(list_products))
        .route("/api/products/:id", get(get_product))
        .route_layer(RateLimitLayer::category(throttle.clone(), API));

    let auth = Router::new()
        .route("/auth/login", post(login))
        .route_layer(RateLimitLayer::category(throttle.clone(), AUTH));

    let payment = Router::new()
        .route("/payment/checkout", post(checkout))
        .route_layer(RateLimitLayer::category(throttle, PAYMENT));

    let admin = Router::new()
        .route("/admin/cache/:namespace", delete(invalidate_cache))
        .route(
            "/admin/rate-limit/:category/:identifier",
            delete(reset_rate_limit),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(catalog)
        .merge(auth)
        .merge(payment)
        .merge(admin)
        .route("/metrics", get(metrics))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    state: AppState,
    bind_addr: SocketAddr,
    housekeeping_interval: Duration,
}

impl Server {
    pub fn new(config: Config) -> GuardResult<Self> {
        let state = AppState::from_config(&config)?;
        Ok(Self {
            state,
            bind_addr: config.bind_addr,
            housekeeping_interval: config.housekeeping_interval,
        })
    }

    pub async fn run(self) -> GuardResult<()> {
        let housekeeping = Housekeeping::spawn(
            self.state.throttle.clone(),
            self.state.caches.clone(),
            self.housekeeping_interval,
        );

        let app = create_app(self.state);
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        info!("Storefront guard listening on {}", self.bind_addr);
        info!("Health check available at /health");
        info!("Metrics available at /metrics");

        let served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        housekeeping.shutdown().await;
        served?;

        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
