//! Outbox delivery state machine.
//!
//! Pure transition logic for outbox items: claiming, completion, failure
//! classification, exponential backoff with jitter, and stale-claim recovery.
//! Persistence and adapter calls live elsewhere; everything here operates on
//! values so the rules are auditable and unit-testable.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::channel::Channel;
use crate::domain::lead::LeadId;
use crate::domain::outbox::{ContentHash, OutboxItem, OutboxItemId, OutboxStatus};
use crate::domain::tenant::TenantId;

#[derive(Clone, Debug)]
pub struct OutboxEngineConfig {
    /// Attempts after which an item becomes terminally failed.
    pub max_attempts: u32,
    pub retry_base_delay_seconds: i64,
    pub retry_backoff_multiplier: u32,
    /// Upper bound of the uniform jitter added to every retry delay.
    pub retry_jitter_seconds: i64,
    /// Visibility timeout: how long a `sending` claim is honored before the
    /// item becomes reclaimable.
    pub claim_timeout_seconds: i64,
}

impl Default for OutboxEngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_base_delay_seconds: 10,
            retry_backoff_multiplier: 2,
            retry_jitter_seconds: 5,
            claim_timeout_seconds: 120,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OutboxEngineError {
    #[error("invalid outbox transition from {from:?} to {to:?}: {reason}")]
    InvalidTransition { from: OutboxStatus, to: OutboxStatus, reason: String },
    #[error("item {0} already claimed by {1}")]
    ClaimConflict(OutboxItemId, String),
    #[error("item {0} is not due until {1}")]
    NotYetDue(OutboxItemId, DateTime<Utc>),
}

/// How a delivery failure should be treated, mirroring the adapter error
/// classification: transient failures retry up to the cap, fatal ones are
/// terminal immediately.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Fatal,
}

#[derive(Clone, Debug)]
pub struct OutboxEngine {
    config: OutboxEngineConfig,
}

impl OutboxEngine {
    pub fn new(config: OutboxEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OutboxEngineConfig {
        &self.config
    }

    /// Build a fresh `queued` item for an admitted send request.
    #[allow(clippy::too_many_arguments)]
    pub fn new_item(
        &self,
        tenant_id: TenantId,
        lead_id: LeadId,
        channel: Channel,
        to_peer: impl Into<String>,
        text: impl Into<String>,
        attachments: Vec<String>,
        now: DateTime<Utc>,
    ) -> OutboxItem {
        let text = text.into();
        let content_hash = ContentHash::compute(&text, &attachments);
        OutboxItem {
            id: OutboxItemId(Uuid::new_v4()),
            tenant_id,
            lead_id,
            channel,
            to_peer: to_peer.into(),
            text,
            attachments,
            content_hash,
            status: OutboxStatus::Queued,
            attempts: 0,
            max_attempts: self.config.max_attempts,
            next_attempt_at: now,
            claimed_by: None,
            claimed_at: None,
            last_error: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition `queued`/`retry` (due) to `sending` under a worker claim.
    ///
    /// A `sending` item whose claim has outlived the visibility timeout is
    /// treated as abandoned and may be stolen; a live claim conflicts.
    pub fn claim(
        &self,
        mut item: OutboxItem,
        worker_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<OutboxItem, OutboxEngineError> {
        match item.status {
            OutboxStatus::Queued | OutboxStatus::Retry => {}
            OutboxStatus::Sending => {
                if let Some(claimed_at) = item.claimed_at {
                    let expires = claimed_at + Duration::seconds(self.config.claim_timeout_seconds);
                    if now < expires {
                        return Err(OutboxEngineError::ClaimConflict(
                            item.id.clone(),
                            item.claimed_by.clone().unwrap_or_default(),
                        ));
                    }
                }
            }
            OutboxStatus::Sent | OutboxStatus::Failed => {
                return Err(OutboxEngineError::InvalidTransition {
                    from: item.status,
                    to: OutboxStatus::Sending,
                    reason: "item already terminal".to_string(),
                });
            }
        }

        if now < item.next_attempt_at {
            return Err(OutboxEngineError::NotYetDue(item.id.clone(), item.next_attempt_at));
        }

        item.status = OutboxStatus::Sending;
        item.claimed_by = Some(worker_id.into());
        item.claimed_at = Some(now);
        item.updated_at = now;
        Ok(item)
    }

    /// Transition `sending` to `sent`.
    pub fn complete(
        &self,
        mut item: OutboxItem,
        now: DateTime<Utc>,
    ) -> Result<OutboxItem, OutboxEngineError> {
        if item.status != OutboxStatus::Sending {
            return Err(OutboxEngineError::InvalidTransition {
                from: item.status,
                to: OutboxStatus::Sent,
                reason: "only a claimed item can complete".to_string(),
            });
        }
        item.status = OutboxStatus::Sent;
        item.sent_at = Some(now);
        item.claimed_by = None;
        item.claimed_at = None;
        item.last_error = None;
        item.updated_at = now;
        Ok(item)
    }

    /// Record a failed attempt. Transient failures below the attempt cap go
    /// back to `retry` with backoff; everything else is terminal `failed`.
    pub fn fail(
        &self,
        mut item: OutboxItem,
        kind: FailureKind,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<OutboxItem, OutboxEngineError> {
        if item.status != OutboxStatus::Sending {
            return Err(OutboxEngineError::InvalidTransition {
                from: item.status,
                to: OutboxStatus::Retry,
                reason: "only a claimed item can fail".to_string(),
            });
        }

        item.attempts += 1;
        item.last_error = Some(error.into());
        item.claimed_by = None;
        item.claimed_at = None;
        item.updated_at = now;

        let retryable = kind == FailureKind::Transient && item.attempts < item.max_attempts;
        if retryable {
            item.status = OutboxStatus::Retry;
            item.next_attempt_at = now + self.backoff_delay(item.attempts);
        } else {
            item.status = OutboxStatus::Failed;
        }
        Ok(item)
    }

    /// Items whose `sending` claim outlived the visibility timeout, eligible
    /// for reclaim by any worker.
    pub fn stale_claims(
        &self,
        items: Vec<OutboxItem>,
        reference_time: DateTime<Utc>,
    ) -> Vec<OutboxItem> {
        let cutoff = reference_time - Duration::seconds(self.config.claim_timeout_seconds);
        items
            .into_iter()
            .filter(|item| {
                item.status == OutboxStatus::Sending
                    && item.claimed_at.is_some_and(|claimed_at| claimed_at < cutoff)
            })
            .collect()
    }

    /// Exponential backoff with uniform jitter for the given attempt number.
    fn backoff_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        let base = self
            .config
            .retry_base_delay_seconds
            .saturating_mul(i64::from(self.config.retry_backoff_multiplier.pow(exponent)));
        let jitter = if self.config.retry_jitter_seconds > 0 {
            rand::thread_rng().gen_range(0..=self.config.retry_jitter_seconds)
        } else {
            0
        };
        Duration::seconds(base + jitter)
    }
}

impl Default for OutboxEngine {
    fn default() -> Self {
        Self::new(OutboxEngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{FailureKind, OutboxEngine, OutboxEngineConfig, OutboxEngineError};
    use crate::domain::channel::Channel;
    use crate::domain::lead::LeadId;
    use crate::domain::outbox::{OutboxItem, OutboxStatus};
    use crate::domain::tenant::TenantId;

    fn engine(max_attempts: u32) -> OutboxEngine {
        OutboxEngine::new(OutboxEngineConfig {
            max_attempts,
            retry_base_delay_seconds: 10,
            retry_backoff_multiplier: 2,
            retry_jitter_seconds: 0,
            claim_timeout_seconds: 120,
        })
    }

    fn queued_item(engine: &OutboxEngine, now: chrono::DateTime<Utc>) -> OutboxItem {
        engine.new_item(
            TenantId(Uuid::new_v4()),
            LeadId(Uuid::new_v4()),
            Channel::Whatsapp,
            "15551112222",
            "ping",
            Vec::new(),
            now,
        )
    }

    #[test]
    fn new_item_starts_queued_with_zero_attempts() {
        let engine = engine(5);
        let item = queued_item(&engine, Utc::now());
        assert_eq!(item.status, OutboxStatus::Queued);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.max_attempts, 5);
    }

    #[test]
    fn claim_marks_item_sending() {
        let engine = engine(5);
        let now = Utc::now();
        let claimed = engine.claim(queued_item(&engine, now), "worker-1", now).expect("claim");
        assert_eq!(claimed.status, OutboxStatus::Sending);
        assert_eq!(claimed.claimed_by.as_deref(), Some("worker-1"));
        assert_eq!(claimed.claimed_at, Some(now));
    }

    #[test]
    fn live_claim_conflicts_but_stale_claim_is_stolen() {
        let engine = engine(5);
        let now = Utc::now();
        let claimed = engine.claim(queued_item(&engine, now), "worker-1", now).expect("claim");

        let conflict = engine.claim(claimed.clone(), "worker-2", now + Duration::seconds(30));
        assert!(matches!(conflict, Err(OutboxEngineError::ClaimConflict(_, _))));

        let stolen = engine
            .claim(claimed, "worker-2", now + Duration::seconds(121))
            .expect("stale claim is reclaimable");
        assert_eq!(stolen.claimed_by.as_deref(), Some("worker-2"));
    }

    #[test]
    fn item_not_due_is_not_claimable() {
        let engine = engine(5);
        let mut item = queued_item(&engine, Utc::now());
        item.status = OutboxStatus::Retry;
        item.next_attempt_at = Utc::now() + Duration::seconds(60);

        let result = engine.claim(item, "worker-1", Utc::now());
        assert!(matches!(result, Err(OutboxEngineError::NotYetDue(_, _))));
    }

    #[test]
    fn complete_records_sent_timestamp_and_releases_claim() {
        let engine = engine(5);
        let now = Utc::now();
        let claimed = engine.claim(queued_item(&engine, now), "worker-1", now).expect("claim");
        let sent = engine.complete(claimed, now).expect("complete");

        assert_eq!(sent.status, OutboxStatus::Sent);
        assert_eq!(sent.sent_at, Some(now));
        assert!(sent.claimed_by.is_none());
    }

    #[test]
    fn transient_failure_schedules_exponential_backoff() {
        let engine = engine(5);
        let now = Utc::now();
        let claimed = engine.claim(queued_item(&engine, now), "worker-1", now).expect("claim");
        let failed = engine.fail(claimed, FailureKind::Transient, "send timed out", now).expect("fail");

        assert_eq!(failed.status, OutboxStatus::Retry);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.next_attempt_at, now + Duration::seconds(10));
        assert_eq!(failed.last_error.as_deref(), Some("send timed out"));

        let reclaimed =
            engine.claim(failed, "worker-2", now + Duration::seconds(11)).expect("reclaim");
        let failed_again = engine
            .fail(reclaimed, FailureKind::Transient, "send timed out", now + Duration::seconds(11))
            .expect("fail again");
        assert_eq!(failed_again.attempts, 2);
        assert_eq!(
            failed_again.next_attempt_at,
            now + Duration::seconds(11) + Duration::seconds(20)
        );
    }

    #[test]
    fn attempts_exceeding_cap_become_terminal_and_unclaimable() {
        let engine = engine(2);
        let mut now = Utc::now();
        let mut item = queued_item(&engine, now);

        for _ in 0..2 {
            let claimed = engine.claim(item, "worker-1", now).expect("claim");
            item = engine.fail(claimed, FailureKind::Transient, "timeout", now).expect("fail");
            now += Duration::seconds(1_000);
        }

        assert_eq!(item.status, OutboxStatus::Failed);
        assert_eq!(item.attempts, 2);

        let result = engine.claim(item, "worker-1", now);
        assert!(matches!(
            result,
            Err(OutboxEngineError::InvalidTransition { from: OutboxStatus::Failed, .. })
        ));
    }

    #[test]
    fn fatal_failure_is_terminal_on_first_attempt() {
        let engine = engine(5);
        let now = Utc::now();
        let claimed = engine.claim(queued_item(&engine, now), "worker-1", now).expect("claim");
        let failed =
            engine.fail(claimed, FailureKind::Fatal, "recipient rejected", now).expect("fail");

        assert_eq!(failed.status, OutboxStatus::Failed);
        assert_eq!(failed.attempts, 1);
    }

    #[test]
    fn jitter_stays_within_the_configured_bound() {
        let engine = OutboxEngine::new(OutboxEngineConfig {
            retry_base_delay_seconds: 10,
            retry_backoff_multiplier: 1,
            retry_jitter_seconds: 5,
            ..OutboxEngineConfig::default()
        });
        let now = Utc::now();

        for _ in 0..32 {
            let claimed = engine.claim(queued_item(&engine, now), "worker-1", now).expect("claim");
            let failed = engine.fail(claimed, FailureKind::Transient, "timeout", now).expect("fail");
            let delay = failed.next_attempt_at - now;
            assert!(delay >= chrono::Duration::seconds(10));
            assert!(delay <= chrono::Duration::seconds(15));
        }
    }

    #[test]
    fn stale_claims_ignores_fresh_and_unclaimed_items() {
        let engine = engine(5);
        let now = Utc::now();

        let stale = {
            let claimed = engine
                .claim(queued_item(&engine, now - Duration::seconds(300)), "worker-1", now - Duration::seconds(300))
                .expect("claim");
            claimed
        };
        let fresh = engine.claim(queued_item(&engine, now), "worker-2", now).expect("claim");
        let queued = queued_item(&engine, now);

        let found = engine.stale_claims(vec![stale.clone(), fresh, queued], now);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale.id);
    }
}
