use crate::models::UsageSnapshot;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-wide usage counters, shared through `AppState`.
///
/// Active counts only move through the guards returned by [`UsageCounters::enter`]
/// and [`UsageCounters::begin_conversion`], whose `Drop` releases them.
#[derive(Debug)]
pub struct UsageCounters {
    active_users: AtomicU64,
    active_conversions: AtomicU64,
    total_conversions: AtomicU64,
    started_at: Instant,
}

impl Default for UsageCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageCounters {
    pub fn new() -> Self {
        Self {
            active_users: AtomicU64::new(0),
            active_conversions: AtomicU64::new(0),
            total_conversions: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Register an inbound caller for the lifetime of the returned guard.
    pub fn enter(self: &Arc<Self>) -> UserGuard {
        self.active_users.fetch_add(1, Ordering::SeqCst);
        UserGuard {
            counters: Arc::clone(self),
        }
    }

    /// Register a running conversion for the lifetime of the returned guard.
    pub fn begin_conversion(self: &Arc<Self>) -> ConversionGuard {
        self.active_conversions.fetch_add(1, Ordering::SeqCst);
        ConversionGuard {
            counters: Arc::clone(self),
            recorded: false,
        }
    }

    fn record_conversion(&self) {
        self.total_conversions.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            active_users: self.active_users.load(Ordering::SeqCst),
            active_conversions: self.active_conversions.load(Ordering::SeqCst),
            total_conversions: self.total_conversions.load(Ordering::SeqCst),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

fn saturating_decrement(counter: &AtomicU64) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
}

/// Holds one `active_users` slot.
#[derive(Debug)]
pub struct UserGuard {
    counters: Arc<UsageCounters>,
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        saturating_decrement(&self.counters.active_users);
    }
}

/// Holds one `active_conversions` slot.
#[derive(Debug)]
pub struct ConversionGuard {
    counters: Arc<UsageCounters>,
    recorded: bool,
}

impl ConversionGuard {
    /// Count the conversion as completed. Later calls are no-ops.
    pub fn succeed(&mut self) {
        if !self.recorded {
            self.recorded = true;
            self.counters.record_conversion();
        }
    }
}

impl Drop for ConversionGuard {
    fn drop(&mut self) {
        saturating_decrement(&self.counters.active_conversions);
    }
}
