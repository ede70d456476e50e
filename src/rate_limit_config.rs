use crate::error::{GuardError, GuardResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

pub const AUTH: &str = "auth";
pub const API: &str = "api";
pub const PAYMENT: &str = "payment";

const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(30 * 60);
const DEFAULT_ESCALATION_FACTOR: u32 = 2;

/// Limits for one throttle category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct LimitRule {
    /// Requests allowed inside one window
    #[validate(range(min = 1))]
    pub max: u32,

    /// Length of the sliding window
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// How long an escalated identifier stays blocked
    #[serde(with = "humantime_serde", default = "default_block_duration")]
    pub block_duration: Duration,

    /// Attempts above `max * escalation_factor` inside a window trigger a block
    #[validate(range(min = 1))]
    #[serde(default = "default_escalation_factor")]
    pub escalation_factor: u32,
}

fn default_block_duration() -> Duration {
    DEFAULT_BLOCK_DURATION
}

fn default_escalation_factor() -> u32 {
    DEFAULT_ESCALATION_FACTOR
}

impl LimitRule {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            block_duration: DEFAULT_BLOCK_DURATION,
            escalation_factor: DEFAULT_ESCALATION_FACTOR,
        }
    }

    pub fn with_block_duration(mut self, block_duration: Duration) -> Self {
        self.block_duration = block_duration;
        self
    }

    pub fn with_escalation_factor(mut self, factor: u32) -> Self {
        self.escalation_factor = factor;
        self
    }

    pub fn auth() -> Self {
        Self::new(5, Duration::from_secs(15 * 60))
    }

    pub fn api() -> Self {
        Self::new(60, Duration::from_secs(60))
    }

    pub fn payment() -> Self {
        Self::new(3, Duration::from_secs(5 * 60))
    }

    /// Attempt count above which an identifier is blocked outright.
    pub fn escalation_threshold(&self) -> u64 {
        u64::from(self.max) * u64::from(self.escalation_factor)
    }

    /// Validate rule parameters
    pub fn check(&self) -> GuardResult<()> {
        self.validate()?;
        if self.window.is_zero() {
            return Err(GuardError::Configuration(
                "Window must be greater than 0".to_string(),
            ));
        }
        if self.block_duration.is_zero() {
            return Err(GuardError::Configuration(
                "Block duration must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-category limits plus identifiers that bypass throttling entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default)]
    pub categories: HashMap<String, LimitRule>,
    #[serde(default)]
    pub allow_list: HashSet<String>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        let categories = HashMap::from([
            (AUTH.to_string(), LimitRule::auth()),
            (API.to_string(), LimitRule::api()),
            (PAYMENT.to_string(), LimitRule::payment()),
        ]);
        Self {
            categories,
            allow_list: HashSet::new(),
        }
    }
}

impl ThrottleConfig {
    /// Load categories from a JSON file, layered over the built-in defaults.
    pub fn from_file(path: impl AsRef<Path>) -> GuardResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let overrides: ThrottleConfig = serde_json::from_str(&raw)?;

        let mut config = Self::default();
        config.categories.extend(overrides.categories);
        config.allow_list.extend(overrides.allow_list);
        config.validate()?;
        Ok(config)
    }

    /// Rule for a category; unknown categories fall back to `api`.
    pub fn rule(&self, category: &str) -> LimitRule {
        self.categories
            .get(category)
            .or_else(|| self.categories.get(API))
            .copied()
            .unwrap_or_else(LimitRule::api)
    }

    pub fn set_rule(&mut self, category: impl Into<String>, rule: LimitRule) {
        self.categories.insert(category.into(), rule);
    }

    pub fn allow(&mut self, identifier: impl Into<String>) {
        self.allow_list.insert(identifier.into());
    }

    pub fn is_allowed(&self, identifier: &str) -> bool {
        self.allow_list.contains(identifier)
    }

    pub fn validate(&self) -> GuardResult<()> {
        for (category, rule) in &self.categories {
            rule.check().map_err(|e| {
                GuardError::Configuration(format!("category '{}': {}", category, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_categories() {
        let config = ThrottleConfig::default();
        assert_eq!(config.rule(AUTH).max, 5);
        assert_eq!(config.rule(AUTH).window, Duration::from_secs(900));
        assert_eq!(config.rule(API).max, 60);
        assert_eq!(config.rule(PAYMENT).max, 3);
        assert_eq!(config.rule(PAYMENT).window, Duration::from_secs(300));
    }

    #[test]
    fn test_unknown_category_falls_back_to_api() {
        let mut config = ThrottleConfig::default();
        assert_eq!(config.rule("search"), LimitRule::api());

        config.set_rule(API, LimitRule::new(10, Duration::from_secs(10)));
        assert_eq!(config.rule("search").max, 10);
    }

    #[test]
    fn test_rule_deserializes_humantime() {
        let rule: LimitRule =
            serde_json::from_str(r#"{"max": 10, "window": "2m", "block_duration": "1h"}"#)
                .unwrap();
        assert_eq!(rule.window, Duration::from_secs(120));
        assert_eq!(rule.block_duration, Duration::from_secs(3600));
        assert_eq!(rule.escalation_factor, 2);
    }

    #[test]
    fn test_validation_rejects_zero_max_and_window() {
        assert!(LimitRule::new(0, Duration::from_secs(1)).check().is_err());
        assert!(LimitRule::new(1, Duration::ZERO).check().is_err());
        assert!(LimitRule::new(1, Duration::from_secs(1))
            .with_escalation_factor(0)
            .check()
            .is_err());
        assert!(LimitRule::api().check().is_ok());
    }

    #[test]
    fn test_from_file_layers_over_defaults() {
        let path = std::env::temp_dir().join(format!("limits-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"{"categories": {"search": {"max": 30, "window": "30s"}}, "allow_list": ["203.0.113.9"]}"#,
        )
        .unwrap();

        let config = ThrottleConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.rule("search").max, 30);
        assert_eq!(config.rule(AUTH).max, 5);
        assert!(config.is_allowed("203.0.113.9"));
    }
}
