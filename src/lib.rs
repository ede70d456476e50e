pub mod algorithms;
pub mod cache;
pub mod cache_registry;
pub mod client_identity;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod housekeeping;
pub mod key_builder;
pub mod metrics;
pub mod middleware;
pub mod rate_limit_config;
pub mod rate_limit_layer;
pub mod response;
pub mod server;
pub mod throttler;

pub use cache::{BoundedCache, CacheSettings};
pub use cache_registry::CacheRegistry;
pub use config::Config;
pub use error::{GuardError, GuardResult};
pub use key_builder::build_key;
pub use rate_limit_config::{LimitRule, ThrottleConfig};
pub use rate_limit_layer::RateLimitLayer;
pub use server::create_app;
pub use throttler::{Decision, LimitScope, RequestThrottle};
