//! Rate limiting for platform API calls
//!
//! Tracks calls per platform over a sliding one-hour window. The limiter is
//! advisory and process-local: each instance keeps its own budget.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::RateLimitConfig;

const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

/// Usage fraction at which a soft warning is logged
const WARN_RATIO: f64 = 0.8;

/// Sliding-window rate limiter keyed by platform name
pub struct RateLimiter {
    /// Platform-specific limits (calls per window)
    limits: HashMap<String, u32>,
    default_limit: u32,
    window: Duration,
    calls: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given limits
    pub fn new(default_limit: u32, limits: HashMap<String, u32>) -> Self {
        Self {
            limits,
            default_limit,
            window: DEFAULT_WINDOW,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.default_per_hour, config.platforms.clone())
    }

    /// Replace the one-hour window
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn limit_for(&self, platform: &str) -> u32 {
        self.limits
            .get(platform)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Check if another call is allowed (without recording)
    pub fn check(&self, platform: &str) -> bool {
        self.check_at(platform, Instant::now())
    }

    pub fn check_at(&self, platform: &str, now: Instant) -> bool {
        let limit = self.limit_for(platform);
        let mut calls = self.lock();
        let count = match calls.get_mut(platform) {
            Some(window) => {
                prune(window, now, self.window);
                window.len()
            }
            None => 0,
        };

        if count >= limit as usize {
            warn!(platform, count, limit, "Rate limit exceeded");
            return false;
        }

        if count as f64 >= (limit as f64 * WARN_RATIO).floor() && count > 0 {
            warn!(platform, count, limit, "Rate limit 80% reached");
        }

        true
    }

    /// Record a call against the platform's budget
    pub fn record(&self, platform: &str) {
        self.record_at(platform, Instant::now());
    }

    pub fn record_at(&self, platform: &str, at: Instant) {
        self.lock()
            .entry(platform.to_string())
            .or_default()
            .push_back(at);
    }

    /// Calls recorded inside the window ending at `now`
    pub fn usage_at(&self, platform: &str, now: Instant) -> usize {
        let mut calls = self.lock();
        match calls.get_mut(platform) {
            Some(window) => {
                prune(window, now, self.window);
                window.len()
            }
            None => 0,
        }
    }

    /// Forget all recorded calls for a platform
    pub fn reset(&self, platform: &str) {
        self.lock().remove(platform);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        // A panic while holding the lock leaves the counters usable
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(oldest) = window.front() {
        if now.saturating_duration_since(*oldest) >= span {
            window.pop_front();
        } else {
            break;
        }
    }
}
