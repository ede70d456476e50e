//! Sliding window request log.
//!
//! Keeps the instants of recent requests for one (scope, client) pair and
//! discards those that fall out of the trailing window before counting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window: Duration,
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            hits: VecDeque::new(),
        }
    }

    /// Change the window used by later prunes (configuration reloads).
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// Drop hits older than `now - window`.
    pub fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) > self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.hits.push_back(now);
    }

    pub fn count(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}
