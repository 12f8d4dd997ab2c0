//! Outbound admission and delivery.
//!
//! `OutboxService` owns the enqueue path (tenant settings, allow-list, lead
//! lookup, idempotent insert); `DeliveryWorker` owns the claim/send/settle
//! loop. Both lean on the pure engine in `courier-core` for every status
//! transition, so the rules tested there are the rules running here.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use courier_channels::registry::AdapterRegistry;
use courier_channels::AdapterError;
use courier_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use courier_core::domain::channel::Channel;
use courier_core::domain::message::{Message, MessageDirection, MessageId, MessageStatus};
use courier_core::domain::outbox::{ContentHash, OutboxItem, OutboxStatus};
use courier_core::domain::tenant::TenantId;
use courier_core::errors::{ApplicationError, DomainError};
use courier_core::identity::normalize_peer;
use courier_core::outbox_engine::{FailureKind, OutboxEngine};
use courier_db::repositories::{
    LeadRepository, MessageRepository, OutboxRepository, TenantRepository,
};
use uuid::Uuid;

use crate::storage_error;

/// Outbound send request as it arrives at the boundary; the recipient is a
/// raw peer string and is normalized here.
#[derive(Clone, Debug)]
pub struct SendRequest {
    pub tenant_id: TenantId,
    pub channel: Channel,
    pub to: String,
    pub text: String,
    pub attachments: Vec<String>,
}

/// Admission verdict. `NotAllowed` and `NoLead` are terminal; the caller must
/// re-submit explicitly after fixing the cause.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// Fresh insert or the already-stored item for the same (lead, content).
    Accepted { item: OutboxItem },
    Declined { reason: String },
    NotAllowed { peer: String },
    NoLead { peer: String },
}

pub struct OutboxService {
    tenants: Arc<dyn TenantRepository>,
    leads: Arc<dyn LeadRepository>,
    outbox: Arc<dyn OutboxRepository>,
    engine: OutboxEngine,
    audit: Arc<dyn AuditSink>,
}

impl OutboxService {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        leads: Arc<dyn LeadRepository>,
        outbox: Arc<dyn OutboxRepository>,
        engine: OutboxEngine,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { tenants, leads, outbox, engine, audit }
    }

    pub async fn enqueue(
        &self,
        request: SendRequest,
        correlation_id: &str,
    ) -> Result<EnqueueOutcome, ApplicationError> {
        if request.text.trim().is_empty() && request.attachments.is_empty() {
            return Err(DomainError::InvariantViolation(
                "outbound message requires text or attachments".to_string(),
            )
            .into());
        }

        let settings = self
            .tenants
            .find_provider_settings(&request.tenant_id, request.channel)
            .await
            .map_err(storage_error)?;

        let Some(settings) = settings else {
            self.emit_rejection(&request, correlation_id, "provider_not_configured");
            return Ok(EnqueueOutcome::Declined { reason: "provider_not_configured".to_string() });
        };
        if !settings.enabled {
            self.emit_rejection(&request, correlation_id, "provider_disabled");
            return Ok(EnqueueOutcome::Declined { reason: "provider_disabled".to_string() });
        }

        let peer = normalize_peer(request.channel, &request.to, &settings.normalization);
        if !settings.recipient_allowed(&peer) {
            self.emit_rejection(&request, correlation_id, "recipient_not_allowed");
            return Ok(EnqueueOutcome::NotAllowed { peer });
        }

        let lead = self
            .leads
            .find_by_peer(&request.tenant_id, request.channel, &peer)
            .await
            .map_err(storage_error)?;
        // Leads are only ever created by inbound resolution.
        let Some(lead) = lead else {
            self.emit_rejection(&request, correlation_id, "no_lead_for_peer");
            return Ok(EnqueueOutcome::NoLead { peer });
        };

        let now = Utc::now();
        let candidate = self.engine.new_item(
            request.tenant_id,
            lead.id,
            request.channel,
            peer,
            request.text,
            request.attachments,
            now,
        );
        let content_hash = candidate.content_hash.clone();
        let stored = self.outbox.insert_if_absent(candidate).await.map_err(storage_error)?;

        let fresh = stored.created_at == now && stored.content_hash == content_hash;
        info!(
            event_name = "outbox.enqueued",
            tenant_id = %request.tenant_id,
            lead_id = %lead.id,
            item_id = %stored.id,
            correlation_id,
            fresh,
            "outbound message admitted"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(request.tenant_id),
                Some(lead.id),
                correlation_id,
                "outbox_enqueued",
                AuditCategory::Outbox,
                "outbox_service",
                AuditOutcome::Success,
            )
            .with_metadata("item_id", stored.id.to_string())
            .with_metadata("fresh", fresh.to_string()),
        );

        Ok(EnqueueOutcome::Accepted { item: stored })
    }

    fn emit_rejection(&self, request: &SendRequest, correlation_id: &str, reason: &str) {
        info!(
            event_name = "outbox.rejected",
            tenant_id = %request.tenant_id,
            channel = request.channel.as_str(),
            correlation_id,
            reason,
            "outbound message rejected at admission"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(request.tenant_id),
                None,
                correlation_id,
                "outbox_rejected",
                AuditCategory::Outbox,
                "outbox_service",
                AuditOutcome::Rejected,
            )
            .with_metadata("reason", reason),
        );
    }
}

#[derive(Clone, Debug)]
pub struct DeliveryWorkerConfig {
    pub worker_id: String,
    pub poll_interval: StdDuration,
    pub claim_batch_size: u32,
    /// Hard cap on one adapter `send` call; a hung bridge counts as a
    /// transient failure.
    pub send_timeout: StdDuration,
}

pub struct DeliveryWorker {
    outbox: Arc<dyn OutboxRepository>,
    messages: Arc<dyn MessageRepository>,
    tenants: Arc<dyn TenantRepository>,
    adapters: Arc<AdapterRegistry>,
    engine: OutboxEngine,
    audit: Arc<dyn AuditSink>,
    config: DeliveryWorkerConfig,
}

impl DeliveryWorker {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        messages: Arc<dyn MessageRepository>,
        tenants: Arc<dyn TenantRepository>,
        adapters: Arc<AdapterRegistry>,
        engine: OutboxEngine,
        audit: Arc<dyn AuditSink>,
        config: DeliveryWorkerConfig,
    ) -> Self {
        Self { outbox, messages, tenants, adapters, engine, audit, config }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(error) = self.run_once(Utc::now()).await {
                    warn!(
                        worker_id = %self.config.worker_id,
                        error = %error,
                        "delivery pass failed; retrying on next poll"
                    );
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        })
    }

    /// One delivery pass: claim every currently due item this worker can win
    /// and settle each attempt. Returns the number of attempted deliveries.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<usize, ApplicationError> {
        let stale_cutoff = now - Duration::seconds(self.engine.config().claim_timeout_seconds);
        let due = self
            .outbox
            .due_items(now, stale_cutoff, self.config.claim_batch_size)
            .await
            .map_err(storage_error)?;

        let mut attempted = 0;
        for item in due {
            // Disabling a provider parks its queued items; an attempt already
            // claimed by another worker still runs to completion.
            let enabled = self
                .tenants
                .find_provider_settings(&item.tenant_id, item.channel)
                .await
                .map_err(storage_error)?
                .map_or(false, |settings| settings.enabled);
            if !enabled {
                debug!(
                    worker_id = %self.config.worker_id,
                    item_id = %item.id,
                    "provider disabled; leaving item unclaimed"
                );
                continue;
            }

            let claimed = self
                .outbox
                .try_claim(&item.id, &self.config.worker_id, now, stale_cutoff)
                .await
                .map_err(storage_error)?;
            let Some(claimed) = claimed else {
                // Another worker won the row between listing and claiming.
                debug!(
                    worker_id = %self.config.worker_id,
                    item_id = %item.id,
                    "lost claim race"
                );
                continue;
            };

            attempted += 1;
            self.deliver(claimed, now).await?;
        }

        Ok(attempted)
    }

    async fn deliver(&self, item: OutboxItem, now: DateTime<Utc>) -> Result<(), ApplicationError> {
        let adapter = self.adapters.get(item.channel);
        let attempt = tokio::time::timeout(
            self.config.send_timeout,
            adapter.send(&item.tenant_id, &item.to_peer, &item.text, &item.attachments),
        )
        .await;

        let (settled, receipt) = match attempt {
            Ok(Ok(receipt)) => {
                let sent = self
                    .engine
                    .complete(item, now)
                    .map_err(|error| ApplicationError::from(DomainError::from(error)))?;
                info!(
                    event_name = "outbox.sent",
                    worker_id = %self.config.worker_id,
                    tenant_id = %sent.tenant_id,
                    lead_id = %sent.lead_id,
                    item_id = %sent.id,
                    correlation_id = %sent.id,
                    attempts = sent.attempts + 1,
                    "outbound message delivered"
                );
                self.emit_settlement(&sent, AuditOutcome::Success, "delivered");
                (sent, Some(receipt.provider_message_id))
            }
            Ok(Err(error)) => {
                (self.settle_failure(item, error.failure_kind(), error.to_string(), now)?, None)
            }
            Err(_) => {
                let reason = format!(
                    "send timed out after {}s",
                    self.config.send_timeout.as_secs()
                );
                (self.settle_failure(item, FailureKind::Transient, reason, now)?, None)
            }
        };

        // The settled item lands before the conversation row: if this save
        // fails the item is re-claimed after the visibility timeout with no
        // duplicate message row to show for it.
        self.outbox.save(settled.clone()).await.map_err(storage_error)?;
        if let Some(provider_message_id) = receipt {
            self.record_outbound_message(&settled, provider_message_id, now).await?;
        }
        Ok(())
    }

    fn settle_failure(
        &self,
        item: OutboxItem,
        kind: FailureKind,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<OutboxItem, ApplicationError> {
        let failed = self
            .engine
            .fail(item, kind, reason.clone(), now)
            .map_err(|error| ApplicationError::from(DomainError::from(error)))?;

        warn!(
            event_name = "outbox.attempt_failed",
            worker_id = %self.config.worker_id,
            tenant_id = %failed.tenant_id,
            lead_id = %failed.lead_id,
            item_id = %failed.id,
            correlation_id = %failed.id,
            attempts = failed.attempts,
            status = failed.status.as_str(),
            reason,
            "delivery attempt failed"
        );
        let detail =
            if failed.status == OutboxStatus::Failed { "terminal_failure" } else { "retry_scheduled" };
        self.emit_settlement(&failed, AuditOutcome::Failed, detail);

        Ok(failed)
    }

    async fn record_outbound_message(
        &self,
        item: &OutboxItem,
        provider_message_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        self.messages
            .append(Message {
                id: MessageId(Uuid::new_v4()),
                lead_id: item.lead_id,
                direction: MessageDirection::Outbound,
                text: Some(item.text.clone()),
                attachments: item.attachments.clone(),
                provider_message_id,
                status: MessageStatus::Sent,
                occurred_at: now,
                recorded_at: now,
            })
            .await
            .map_err(storage_error)
    }

    fn emit_settlement(&self, item: &OutboxItem, outcome: AuditOutcome, detail: &str) {
        self.audit.emit(
            AuditEvent::new(
                Some(item.tenant_id),
                Some(item.lead_id),
                item.id.to_string(),
                "outbox_attempt_settled",
                AuditCategory::Outbox,
                &self.config.worker_id,
                outcome,
            )
            .with_metadata("status", item.status.as_str())
            .with_metadata("detail", detail),
        );
    }
}
