use crate::algorithms::SlidingWindow;
use crate::clock::{ceil_secs, deadline, Clock, SystemClock};
use crate::error::GuardResult;
use crate::metrics::{ThrottleMetrics, ThrottleSnapshot};
use crate::rate_limit_config::{LimitRule, ThrottleConfig};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitScope {
    /// A configured category such as `auth`; unknown names use `api` limits.
    Category(String),
    /// An explicit rule counted under its own key.
    Custom { key: String, rule: LimitRule },
}

impl LimitScope {
    pub fn category(name: impl Into<String>) -> Self {
        LimitScope::Category(name.into())
    }

    pub fn custom(key: impl Into<String>, rule: LimitRule) -> Self {
        LimitScope::Custom {
            key: key.into(),
            rule,
        }
    }

    fn counter_key(&self) -> String {
        match self {
            LimitScope::Category(name) => name.clone(),
            LimitScope::Custom { key, .. } => format!("custom:{}", key),
        }
    }
}

/// Outcome of a throttle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    /// Zero when allowed, at least one when denied
    pub retry_after_secs: u64,
    pub limit: u32,
    pub remaining: u32,
}

impl Decision {
    pub fn allowed(limit: u32, remaining: u32) -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
            limit,
            remaining,
        }
    }

    pub fn denied(limit: u32, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs: retry_after_secs.max(1),
            limit,
            remaining: 0,
        }
    }
}

/// Records removed by one housekeeping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub counters_removed: usize,
    pub blocks_removed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThrottleStats {
    pub tracked_counters: usize,
    pub active_blocks: usize,
    pub decisions: ThrottleSnapshot,
}

/// Sliding-window request throttle with escalating blocks.
///
/// Counters are keyed by (scope, client identifier); blocks are keyed by the
/// client identifier alone, so an identifier blocked for hammering one scope
/// is refused everywhere until the block lapses.
pub struct RequestThrottle {
    config: RwLock<ThrottleConfig>,
    counters: DashMap<(String, String), SlidingWindow>,
    blocks: DashMap<String, Instant>,
    clock: Arc<dyn Clock>,
    metrics: ThrottleMetrics,
}

impl RequestThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ThrottleConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: RwLock::new(config),
            counters: DashMap::new(),
            blocks: DashMap::new(),
            clock,
            metrics: ThrottleMetrics::default(),
        }
    }

    /// Resolve the rule that applies to a scope.
    pub fn rule_for(&self, scope: &LimitScope) -> LimitRule {
        match scope {
            LimitScope::Category(name) => self.config.read().rule(name),
            LimitScope::Custom { rule, .. } => *rule,
        }
    }

    /// Count a request from `identifier` against `scope` and decide whether it may proceed.
    ///
    /// Denied attempts are counted too; once they push the window past the
    /// rule's escalation threshold the identifier is blocked for the rule's
    /// block duration.
    pub fn check(&self, scope: &LimitScope, identifier: &str) -> Decision {
        let rule = self.rule_for(scope);
        let decision = self.decide(scope, identifier, &rule);
        self.metrics.record_request(decision.allowed);
        decision
    }

    fn decide(&self, scope: &LimitScope, identifier: &str, rule: &LimitRule) -> Decision {
        if self.config.read().is_allowed(identifier) {
            return Decision::allowed(rule.max, rule.max);
        }

        let now = self.clock.now();

        if let Some(retry_after) = self.active_block(identifier, now) {
            debug!(
                target: "storefront_guard::throttle",
                identifier = %identifier,
                retry_after,
                "Request refused while blocked"
            );
            return Decision::denied(rule.max, retry_after);
        }

        let mut record = self
            .counters
            .entry((scope.counter_key(), identifier.to_string()))
            .or_insert_with(|| SlidingWindow::new(rule.window));
        record.set_window(rule.window);
        record.prune(now);

        let count = record.count() as u64;
        if count >= u64::from(rule.max) {
            record.record(now);
            drop(record);

            if count > rule.escalation_threshold() {
                self.escalate(scope, identifier, rule, now);
            }

            debug!(
                target: "storefront_guard::throttle",
                scope = ?scope,
                identifier = %identifier,
                attempts = count + 1,
                "Rate limit exceeded"
            );
            return Decision::denied(rule.max, ceil_secs(rule.window));
        }

        record.record(now);
        Decision::allowed(rule.max, rule.max - count as u32 - 1)
    }

    /// Seconds left on a live block. Lapsed blocks are removed here.
    fn active_block(&self, identifier: &str, now: Instant) -> Option<u64> {
        let expiry = *self.blocks.get(identifier)?;
        if expiry > now {
            return Some(ceil_secs(expiry - now));
        }
        self.blocks.remove_if(identifier, |_, expiry| *expiry <= now);
        None
    }

    fn escalate(&self, scope: &LimitScope, identifier: &str, rule: &LimitRule, now: Instant) {
        let expiry = deadline(now, rule.block_duration);
        let previous = self.blocks.insert(identifier.to_string(), expiry);

        if previous.map_or(true, |prev| prev <= now) {
            self.metrics.record_escalation();
            warn!(
                target: "storefront_guard::throttle",
                scope = ?scope,
                identifier = %identifier,
                block_secs = rule.block_duration.as_secs(),
                "Escalating to block after repeated limit violations"
            );
        }
    }

    /// Forget counters for `scope` and any block on `identifier`.
    pub fn reset(&self, scope: &LimitScope, identifier: &str) {
        self.counters
            .remove(&(scope.counter_key(), identifier.to_string()));
        self.blocks.remove(identifier);
        info!(
            target: "storefront_guard::throttle",
            scope = ?scope,
            identifier = %identifier,
            "Rate limit state reset"
        );
    }

    /// Drop empty counters and lapsed blocks.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();

        let counters_before = self.counters.len();
        self.counters.retain(|_, record| {
            record.prune(now);
            !record.is_empty()
        });

        let blocks_before = self.blocks.len();
        self.blocks.retain(|_, expiry| *expiry > now);

        SweepReport {
            counters_removed: counters_before.saturating_sub(self.counters.len()),
            blocks_removed: blocks_before.saturating_sub(self.blocks.len()),
        }
    }

    pub fn is_blocked(&self, identifier: &str) -> bool {
        self.active_block(identifier, self.clock.now()).is_some()
    }

    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            tracked_counters: self.counters.len(),
            active_blocks: self.blocks.len(),
            decisions: self.metrics.snapshot(),
        }
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config.read().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, config: ThrottleConfig) -> GuardResult<()> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }
}
