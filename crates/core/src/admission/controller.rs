//! Sliding-window quota enforcement.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::AdmissionConfig;

use super::types::{AdmissionDecision, Tier};

/// One active quota window for a single identity.
///
/// Expired windows are replaced in place when the identity is next seen,
/// never accumulated.
#[derive(Debug, Clone)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

impl Window {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            count: 0,
        }
    }

    fn expired(&self, now: DateTime<Utc>, length: Duration) -> bool {
        now - self.started_at >= length
    }

    fn reset_at(&self, length: Duration) -> DateTime<Utc> {
        self.started_at + length
    }
}

/// Enforces per-tier sliding-window quotas plus a global request ceiling.
///
/// Counting policy: only admitted requests consume quota. A rejected request
/// leaves the window counter untouched, so the `remaining` reported on a 429
/// is exact and the window reset is the only way to regain budget.
///
/// The counters live behind a process-local mutex. If that lock is poisoned
/// the controller fails closed and rejects, since downstream capacity
/// planning depends on enforcement actually happening.
pub struct AdmissionController {
    config: AdmissionConfig,
    windows: Mutex<HashMap<(Tier, String), Window>>,
    global: Mutex<Window>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            global: Mutex::new(Window::new(Utc::now())),
        }
    }

    /// Quota for a tier; None means unlimited.
    fn tier_quota(&self, tier: Tier) -> Option<u32> {
        match tier {
            Tier::Anonymous => Some(self.config.anonymous_quota),
            Tier::Registered => Some(self.config.registered_quota),
            Tier::Premium => self.config.premium_quota,
        }
    }

    /// Check whether a request from `caller_key` at `tier` may proceed.
    ///
    /// Admitted requests increment both the caller's window and the global
    /// window atomically with the check.
    pub fn check(&self, caller_key: &str, tier: Tier) -> AdmissionDecision {
        self.check_at(caller_key, tier, Utc::now())
    }

    fn check_at(&self, caller_key: &str, tier: Tier, now: DateTime<Utc>) -> AdmissionDecision {
        let window_len = Duration::seconds(self.config.window_secs as i64);
        let global_len = Duration::seconds(60);

        // Global ceiling first: it protects the worker pool regardless of tier.
        let Ok(mut global) = self.global.lock() else {
            return Self::fail_closed(now, window_len);
        };
        if global.expired(now, global_len) {
            *global = Window::new(now);
        }
        if global.count >= self.config.global_per_minute {
            let reset_at = global.reset_at(global_len);
            return AdmissionDecision {
                allowed: false,
                remaining: Some(0),
                reset_at,
            };
        }

        let Ok(mut windows) = self.windows.lock() else {
            return Self::fail_closed(now, window_len);
        };

        let key = (tier, caller_key.to_string());
        let window = windows.entry(key).or_insert_with(|| Window::new(now));
        if window.expired(now, window_len) {
            *window = Window::new(now);
        }

        match self.tier_quota(tier) {
            Some(quota) => {
                if window.count >= quota {
                    AdmissionDecision {
                        allowed: false,
                        remaining: Some(0),
                        reset_at: window.reset_at(window_len),
                    }
                } else {
                    window.count += 1;
                    global.count += 1;
                    AdmissionDecision {
                        allowed: true,
                        remaining: Some(quota - window.count),
                        reset_at: window.reset_at(window_len),
                    }
                }
            }
            None => {
                // Unlimited tier still counts toward the global ceiling.
                window.count += 1;
                global.count += 1;
                AdmissionDecision {
                    allowed: true,
                    remaining: None,
                    reset_at: window.reset_at(window_len),
                }
            }
        }
    }

    fn fail_closed(now: DateTime<Utc>, window_len: Duration) -> AdmissionDecision {
        AdmissionDecision {
            allowed: false,
            remaining: Some(0),
            reset_at: now + window_len,
        }
    }
}
