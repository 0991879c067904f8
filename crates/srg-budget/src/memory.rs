// crates/srg-budget/src/memory.rs
// ============================================================================
// Module: In-Memory Budget Tracker
// Description: Single-process sliding-window token budget tracker.
// Purpose: Enforce per-tenant token ceilings without an external backend.
// Dependencies: srg-core, std::sync::Mutex, std::time::Instant
// ============================================================================

//! ## Overview
//! State lives behind one `std::sync::Mutex<HashMap<...>>`, matching the
//! single-lock design of the reference tracker. All mutation happens
//! without crossing a suspension point, so the mutex is never held across
//! an `.await`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use srg_core::model::BudgetSummary;
use srg_core::model::UsageEntry;
use srg_core::traits::BudgetBackendError;
use srg_core::traits::BudgetCheckOutcome;
use srg_core::traits::BudgetExceeded;
use srg_core::traits::BudgetTracker;

#[derive(Debug, Default)]
struct TenantBucket {
    entries: Vec<UsageEntry>,
}

impl TenantBucket {
    fn prune(&mut self, cutoff: f64) {
        self.entries.retain(|entry| entry.timestamp >= cutoff);
    }

    fn total_tokens(&self) -> u64 {
        self.entries.iter().map(|entry| entry.tokens).sum()
    }
}

/// In-memory sliding-window budget tracker.
pub struct InMemoryBudgetTracker {
    default_ceiling: u64,
    window_seconds: u64,
    tenant_ceilings: HashMap<String, u64>,
    buckets: Mutex<HashMap<String, TenantBucket>>,
    epoch: Instant,
}

impl InMemoryBudgetTracker {
    /// Builds a tracker with a default ceiling, a window in seconds, and
    /// optional per-tenant overrides.
    #[must_use]
    pub fn new(default_ceiling: u64, window_seconds: u64, tenant_ceilings: HashMap<String, u64>) -> Self {
        Self {
            default_ceiling,
            window_seconds,
            tenant_ceilings,
            buckets: Mutex::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }

    fn ceiling_for(&self, tenant_id: &str) -> u64 {
        self.tenant_ceilings.get(tenant_id).copied().unwrap_or(self.default_ceiling)
    }

    fn now_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn usage(&self, tenant_id: &str) -> u64 {
        let cutoff = self.now_secs() - self.window_seconds as f64;
        let mut buckets = self.lock_buckets();
        let bucket = buckets.entry(tenant_id.to_string()).or_default();
        bucket.prune(cutoff);
        bucket.total_tokens()
    }

    #[allow(
        clippy::unwrap_used,
        reason = "lock is only ever held briefly and never poisoned by a panicking critical section"
    )]
    fn lock_buckets(&self) -> std::sync::MutexGuard<'_, HashMap<String, TenantBucket>> {
        self.buckets.lock().unwrap()
    }

    fn summary_for(&self, tenant_id: &str) -> BudgetSummary {
        let ceiling = self.ceiling_for(tenant_id);
        let used = self.usage(tenant_id);
        let remaining = ceiling.saturating_sub(used);
        let utilization_pct = if ceiling > 0 {
            (used as f64 / ceiling as f64 * 100.0 * 100.0).round() / 100.0
        } else {
            0.0
        };
        BudgetSummary {
            tenant_id: tenant_id.to_string(),
            window_seconds: self.window_seconds,
            ceiling,
            used,
            remaining,
            utilization_pct,
        }
    }
}

#[async_trait]
impl BudgetTracker for InMemoryBudgetTracker {
    async fn check(&self, tenant_id: &str, requested: u64) -> Result<BudgetCheckOutcome, BudgetBackendError> {
        let ceiling = self.ceiling_for(tenant_id);
        let used = self.usage(tenant_id);
        if used + requested > ceiling {
            return Ok(BudgetCheckOutcome::Exceeded(BudgetExceeded {
                tenant_id: tenant_id.to_string(),
                used,
                ceiling,
                window_seconds: self.window_seconds,
            }));
        }
        Ok(BudgetCheckOutcome::Allowed(self.summary_for(tenant_id)))
    }

    async fn check_running(&self, tenant_id: &str, requested: u64) -> Result<bool, BudgetBackendError> {
        let ceiling = self.ceiling_for(tenant_id);
        let used = self.usage(tenant_id);
        Ok(used + requested <= ceiling)
    }

    async fn record(&self, tenant_id: &str, tokens: u64) -> Result<(), BudgetBackendError> {
        let timestamp = self.now_secs();
        let mut buckets = self.lock_buckets();
        buckets.entry(tenant_id.to_string()).or_default().entries.push(UsageEntry { timestamp, tokens });
        Ok(())
    }

    async fn summary(&self, tenant_id: &str) -> Result<BudgetSummary, BudgetBackendError> {
        Ok(self.summary_for(tenant_id))
    }
}

#[cfg(test)]
mod tests {
    use super::InMemoryBudgetTracker;
    use srg_core::traits::BudgetCheckOutcome;
    use srg_core::traits::BudgetTracker;
    use std::collections::HashMap;

    #[tokio::test]
    async fn allows_within_ceiling_and_exceeds_past_it() {
        let tracker = InMemoryBudgetTracker::new(100, 3600, HashMap::new());
        match tracker.check("tenant-a", 50).await.expect("check succeeds") {
            BudgetCheckOutcome::Allowed(summary) => assert_eq!(summary.used, 0),
            BudgetCheckOutcome::Exceeded(_) => panic!("should not exceed"),
        }
        tracker.record("tenant-a", 60).await.expect("record succeeds");
        match tracker.check("tenant-a", 50).await.expect("check succeeds") {
            BudgetCheckOutcome::Exceeded(exceeded) => assert_eq!(exceeded.used, 60),
            BudgetCheckOutcome::Allowed(_) => panic!("should exceed"),
        }
    }

    #[tokio::test]
    async fn summary_matches_recorded_usage() {
        let tracker = InMemoryBudgetTracker::new(200, 3600, HashMap::new());
        tracker.record("tenant-b", 50).await.expect("record succeeds");
        let summary = tracker.summary("tenant-b").await.expect("summary succeeds");
        assert_eq!(summary.used, 50);
        assert_eq!(summary.remaining, 150);
        assert!((summary.utilization_pct - 25.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn per_tenant_ceiling_override_applies() {
        let mut overrides = HashMap::new();
        overrides.insert("tenant-c".to_string(), 10);
        let tracker = InMemoryBudgetTracker::new(1000, 3600, overrides);
        let summary = tracker.summary("tenant-c").await.expect("summary succeeds");
        assert_eq!(summary.ceiling, 10);
    }
}
