use crate::cache::CacheSettings;
use crate::error::GuardResult;
use crate::housekeeping::DEFAULT_INTERVAL;
use crate::rate_limit_config::ThrottleConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "storefront-guard", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Log level for this crate when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// JSON file with per-category limits and an allow-list
    #[arg(long, env = "RATE_LIMIT_FILE")]
    pub rate_limit_file: Option<PathBuf>,

    /// Client identifiers that are never throttled
    #[arg(long, env = "RATE_LIMIT_ALLOW_LIST", value_delimiter = ',')]
    pub allow_list: Vec<String>,

    /// Interval between housekeeping sweeps
    #[arg(long, env = "HOUSEKEEPING_INTERVAL", default_value = "5m", value_parser = humantime::parse_duration)]
    pub housekeeping_interval: Duration,

    /// Maximum entries per cache namespace
    #[arg(long, env = "CACHE_MAX_SIZE", default_value_t = 1000)]
    pub cache_max_size: usize,

    /// Default TTL for cached entries
    #[arg(long, env = "CACHE_TTL", default_value = "5m", value_parser = humantime::parse_duration)]
    pub cache_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let cache = CacheSettings::default();
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            log_level: "info".to_string(),
            rate_limit_file: None,
            allow_list: Vec::new(),
            housekeeping_interval: DEFAULT_INTERVAL,
            cache_max_size: cache.max_size,
            cache_ttl: cache.default_ttl,
        }
    }
}

impl Config {
    /// Throttle limits: the optional file layered over defaults, plus the allow-list.
    pub fn throttle_config(&self) -> GuardResult<ThrottleConfig> {
        let mut config = match &self.rate_limit_file {
            Some(path) => ThrottleConfig::from_file(path)?,
            None => ThrottleConfig::default(),
        };
        for identifier in &self.allow_list {
            let identifier = identifier.trim();
            if !identifier.is_empty() {
                config.allow(identifier);
            }
        }
        Ok(config)
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings::new(self.cache_max_size, self.cache_ttl)
    }
}
