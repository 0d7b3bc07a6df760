// =============================================================================
// Rate-Limit Tracker: monitors exchange API weight to avoid 429s and bans
// =============================================================================
//
// Binance-style exchanges enforce a request-weight budget per minute (1200 on
// binance.com, we hard-cap ourselves at 1000). The tracker reads the
// `X-MBX-USED-WEIGHT-1M` response header after every request and keeps atomic
// counters that any task may query lock-free.
//
// The reported weight is only trusted for the wall-clock minute it was
// observed in; once the minute rolls over the budget is considered fresh again
// even if no request has been sent since.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use tracing::{debug, warn};

/// Hard ceiling at which we refuse to send additional requests.
const WEIGHT_HARD_LIMIT: u32 = 1000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 800;

const WEIGHT_HEADER: &str = "X-MBX-USED-WEIGHT-1M";

/// Thread-safe request-weight tracker backed by atomic counters.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
    /// Unix minute in which `used_weight_1m` was last reported.
    weight_minute: AtomicI64,
    refused_requests: AtomicU32,
}

/// Immutable snapshot of the current rate-limit state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
    pub refused_requests: u32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
            weight_minute: AtomicI64::new(0),
            refused_requests: AtomicU32::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Header-based updates
    // -------------------------------------------------------------------------

    /// Update the weight counter from the HTTP response headers.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let Some(weight) = headers
            .get(WEIGHT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return;
        };
        self.record_weight(weight, current_minute());
    }

    fn record_weight(&self, weight: u32, minute: i64) {
        let prev = self.weight_at(minute);
        self.used_weight_1m.store(weight, Ordering::Relaxed);
        self.weight_minute.store(minute, Ordering::Relaxed);

        if weight >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
            warn!(
                used_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "rate-limit weight crossed warning threshold"
            );
        }
        debug!(used_weight_1m = weight, "rate-limit weight updated from header");
    }

    fn weight_at(&self, minute: i64) -> u32 {
        if self.weight_minute.load(Ordering::Relaxed) == minute {
            self.used_weight_1m.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    // -------------------------------------------------------------------------
    // Pre-flight checks
    // -------------------------------------------------------------------------

    /// Return `true` if we can afford to spend `weight` more request weight
    /// in the current minute without exceeding the hard limit.
    pub fn can_send_request(&self, weight: u32) -> bool {
        self.can_send_at(weight, current_minute())
    }

    fn can_send_at(&self, weight: u32, minute: i64) -> bool {
        let current = self.weight_at(minute);
        let allowed = current + weight <= WEIGHT_HARD_LIMIT;
        if !allowed {
            self.refused_requests.fetch_add(1, Ordering::Relaxed);
            warn!(
                current_weight = current,
                requested_weight = weight,
                hard_limit = WEIGHT_HARD_LIMIT,
                "request blocked, would exceed rate-limit"
            );
        }
        allowed
    }

    // -------------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            used_weight_1m: self.weight_at(current_minute()),
            refused_requests: self.refused_requests.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight_1m.load(Ordering::Relaxed))
            .field("refused_requests", &self.refused_requests.load(Ordering::Relaxed))
            .finish()
    }
}

fn current_minute() -> i64 {
    chrono::Utc::now().timestamp() / 60
}
