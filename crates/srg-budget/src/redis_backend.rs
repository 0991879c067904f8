// crates/srg-budget/src/redis_backend.rs
// ============================================================================
// Module: Redis Budget Tracker
// Description: Cross-host sliding-window token budget tracker backed by a
//              Redis sorted set.
// Purpose: Give budget enforcement cross-host consistency, per spec.md §5.
// Dependencies: redis, srg-core, tracing
// ============================================================================

//! ## Overview
//! Each tenant is a sorted set keyed `<prefix>:<tenant>` whose members are
//! `<timestamp>:<tokens>:<nonce>` strings scored by timestamp. Prune and
//! read happen as two separate commands (`ZREMRANGEBYSCORE` then
//! `ZRANGEBYSCORE`) without a transaction — spec.md §4.4 accepts the race
//! this creates (over-accepting by at most one concurrent request) as
//! preferable to rejecting a legitimate one. `record` pipelines `ZADD` with
//! an `EXPIRE` refresh.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use redis::AsyncCommands;
use srg_core::model::BudgetSummary;
use srg_core::traits::BudgetBackendError;
use srg_core::traits::BudgetCheckOutcome;
use srg_core::traits::BudgetExceeded;
use srg_core::traits::BudgetTracker;

/// Redis-backed sliding-window budget tracker.
pub struct RedisBudgetTracker {
    client: redis::Client,
    key_prefix: String,
    default_ceiling: u64,
    window_seconds: u64,
    tenant_ceilings: HashMap<String, u64>,
    nonce_counter: AtomicU64,
}

impl RedisBudgetTracker {
    /// Builds a tracker against the given Redis connection URL.
    ///
    /// # Errors
    /// Returns [`BudgetBackendError`] if the URL cannot be parsed into a
    /// client.
    pub fn new(
        redis_url: &str,
        key_prefix: impl Into<String>,
        default_ceiling: u64,
        window_seconds: u64,
        tenant_ceilings: HashMap<String, u64>,
    ) -> Result<Self, BudgetBackendError> {
        let client = redis::Client::open(redis_url).map_err(|err| BudgetBackendError(err.to_string()))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
            default_ceiling,
            window_seconds,
            tenant_ceilings,
            nonce_counter: AtomicU64::new(0),
        })
    }

    fn ceiling_for(&self, tenant_id: &str) -> u64 {
        self.tenant_ceilings.get(tenant_id).copied().unwrap_or(self.default_ceiling)
    }

    fn key_for(&self, tenant_id: &str) -> String {
        format!("{}:{}", self.key_prefix, tenant_id)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, BudgetBackendError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| BudgetBackendError(err.to_string()))
    }

    fn now_unix_secs() -> f64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    async fn usage(&self, tenant_id: &str) -> Result<u64, BudgetBackendError> {
        let mut conn = self.connection().await?;
        let key = self.key_for(tenant_id);
        let cutoff = Self::now_unix_secs() - self.window_seconds as f64;

        let _: () = conn
            .zrembyscore(&key, f64::NEG_INFINITY, cutoff)
            .await
            .map_err(|err| BudgetBackendError(err.to_string()))?;

        let members: Vec<String> = conn
            .zrangebyscore(&key, cutoff, f64::INFINITY)
            .await
            .map_err(|err| BudgetBackendError(err.to_string()))?;

        Ok(members.iter().filter_map(|member| parse_tokens(member)).sum())
    }

    fn summary_from_usage(&self, tenant_id: &str, used: u64) -> BudgetSummary {
        let ceiling = self.ceiling_for(tenant_id);
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

fn parse_tokens(member: &str) -> Option<u64> {
    member.split(':').nth(1).and_then(|segment| segment.parse::<u64>().ok())
}

#[async_trait]
impl BudgetTracker for RedisBudgetTracker {
    async fn check(&self, tenant_id: &str, requested: u64) -> Result<BudgetCheckOutcome, BudgetBackendError> {
        let ceiling = self.ceiling_for(tenant_id);
        let used = self.usage(tenant_id).await?;
        if used + requested > ceiling {
            return Ok(BudgetCheckOutcome::Exceeded(BudgetExceeded {
                tenant_id: tenant_id.to_string(),
                used,
                ceiling,
                window_seconds: self.window_seconds,
            }));
        }
        Ok(BudgetCheckOutcome::Allowed(self.summary_from_usage(tenant_id, used)))
    }

    async fn check_running(&self, tenant_id: &str, requested: u64) -> Result<bool, BudgetBackendError> {
        let ceiling = self.ceiling_for(tenant_id);
        let used = self.usage(tenant_id).await?;
        Ok(used + requested <= ceiling)
    }

    async fn record(&self, tenant_id: &str, tokens: u64) -> Result<(), BudgetBackendError> {
        let mut conn = self.connection().await?;
        let key = self.key_for(tenant_id);
        let now = Self::now_unix_secs();
        let nonce = self.nonce_counter.fetch_add(1, Ordering::Relaxed);
        let member = format!("{now}:{tokens}:{nonce}");
        let ttl = self.window_seconds.saturating_mul(2).max(1);

        let _: () = redis::pipe()
            .atomic()
            .zadd(&key, &member, now)
            .expire(&key, ttl as i64)
            .query_async(&mut conn)
            .await
            .map_err(|err| BudgetBackendError(err.to_string()))?;

        tracing::debug!(tenant_id, tokens, "recorded budget usage");
        Ok(())
    }

    async fn summary(&self, tenant_id: &str) -> Result<BudgetSummary, BudgetBackendError> {
        let used = self.usage(tenant_id).await?;
        Ok(self.summary_from_usage(tenant_id, used))
    }
}

#[cfg(test)]
mod tests {
    use super::parse_tokens;

    #[test]
    fn parses_tokens_from_member_encoding() {
        assert_eq!(parse_tokens("1700000000.5:42:7"), Some(42));
        assert_eq!(parse_tokens("malformed"), None);
    }
}
