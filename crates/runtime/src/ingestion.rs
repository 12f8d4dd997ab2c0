//! Inbound webhook pipeline: authenticate, validate, deduplicate, resolve
//! identity, hand off.
//!
//! The pipeline stops at the first failing step and produces no side effects
//! for rejected events. An accepted content message is acknowledged as soon
//! as it is on the event queue; session events are routed to the session
//! service instead.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use courier_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use courier_core::domain::contact::{Contact, ContactId};
use courier_core::domain::lead::{Lead, LeadId, LeadStage};
use courier_core::domain::tenant::ProviderSettings;
use courier_core::domain::webhook::{
    InboundEnvelope, InboundEventType, NormalizedEvent, WebhookAuditEvent,
};
use courier_core::errors::{ApplicationError, DomainError};
use courier_core::identity::{derive_peer, resolution_candidates, stored_identifiers};
use courier_db::repositories::{
    ContactRepository, LeadRepository, TenantRepository, WebhookAuditRepository,
};

use crate::events::EventQueue;
use crate::sessions::SessionService;
use crate::storage_error;

/// Acknowledgment returned to the webhook caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Content message accepted and queued behind the resolved lead.
    Queued { lead_id: LeadId },
    /// Replay of an already-accepted event; acknowledged, nothing done.
    Duplicate,
    /// Session-status or login-code event handed to the session service.
    SessionRouted,
}

pub struct IngestionService {
    tenants: Arc<dyn TenantRepository>,
    contacts: Arc<dyn ContactRepository>,
    leads: Arc<dyn LeadRepository>,
    webhook_audit: Arc<dyn WebhookAuditRepository>,
    queue: Arc<dyn EventQueue>,
    sessions: Arc<SessionService>,
    audit: Arc<dyn AuditSink>,
}

impl IngestionService {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        contacts: Arc<dyn ContactRepository>,
        leads: Arc<dyn LeadRepository>,
        webhook_audit: Arc<dyn WebhookAuditRepository>,
        queue: Arc<dyn EventQueue>,
        sessions: Arc<SessionService>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { tenants, contacts, leads, webhook_audit, queue, sessions, audit }
    }

    pub async fn ingest(
        &self,
        envelope: InboundEnvelope,
        presented_secret: &str,
        correlation_id: &str,
    ) -> Result<IngestOutcome, ApplicationError> {
        // Auth first: nothing below runs for an unauthenticated caller.
        let settings = self
            .tenants
            .find_provider_settings(&envelope.tenant_id, envelope.channel)
            .await
            .map_err(storage_error)?;
        let Some(settings) = settings else {
            self.emit_rejection(&envelope, correlation_id, "unknown_tenant_provider");
            return Err(ApplicationError::Unauthorized(
                "no provider settings for tenant".to_string(),
            ));
        };
        if !settings.secret_matches(presented_secret) {
            self.emit_rejection(&envelope, correlation_id, "secret_mismatch");
            return Err(ApplicationError::Unauthorized("webhook secret mismatch".to_string()));
        }

        if let Err(violation) = envelope.validate() {
            self.emit_rejection(&envelope, correlation_id, violation.reason);
            return Err(DomainError::InvariantViolation(format!(
                "{}: {}",
                violation.reason,
                violation.missing_fields.join(", ")
            ))
            .into());
        }

        // The audit log doubles as the replay detector; recording and
        // checking are one write.
        let now = Utc::now();
        let fresh = self
            .webhook_audit
            .record_if_new(WebhookAuditEvent {
                id: Uuid::new_v4(),
                tenant_id: envelope.tenant_id,
                channel: envelope.channel,
                message_id: envelope.message_id.clone(),
                event_type: envelope.event_type,
                received_at: now,
            })
            .await
            .map_err(storage_error)?;
        if !fresh {
            info!(
                event_name = "ingress.webhook_replayed",
                tenant_id = %envelope.tenant_id,
                channel = envelope.channel.as_str(),
                message_id = %envelope.message_id,
                correlation_id,
                "duplicate provider event acknowledged without side effects"
            );
            self.emit_accepted(&envelope, correlation_id, "replay", None);
            return Ok(IngestOutcome::Duplicate);
        }

        let outcome = self.dispatch(&envelope, &settings, now, correlation_id).await;
        if outcome.is_err() {
            // Roll back the dedup mark so the provider's retry of this event
            // is processed instead of being swallowed as a replay.
            if let Err(rollback) = self
                .webhook_audit
                .remove(&envelope.tenant_id, envelope.channel, &envelope.message_id)
                .await
            {
                warn!(
                    tenant_id = %envelope.tenant_id,
                    channel = envelope.channel.as_str(),
                    message_id = %envelope.message_id,
                    correlation_id,
                    error = %rollback,
                    "failed to roll back webhook dedup mark after ingest error"
                );
            }
        }
        outcome
    }

    async fn dispatch(
        &self,
        envelope: &InboundEnvelope,
        settings: &ProviderSettings,
        now: chrono::DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<IngestOutcome, ApplicationError> {
        match envelope.event_type {
            InboundEventType::SessionStatus => {
                // Validation guarantees the signal is present.
                if let Some(signal) = envelope.session_signal {
                    self.sessions
                        .apply_signal(envelope.tenant_id, envelope.channel, signal, now)
                        .await?;
                }
                self.emit_accepted(envelope, correlation_id, "session_status", None);
                Ok(IngestOutcome::SessionRouted)
            }
            InboundEventType::LoginCode => {
                if let (Some(code_id), Some(expires_at)) =
                    (envelope.code_id.clone(), envelope.code_expires_at)
                {
                    self.sessions
                        .record_login_code(
                            envelope.tenant_id,
                            envelope.channel,
                            code_id,
                            expires_at,
                            now,
                        )
                        .await?;
                }
                self.emit_accepted(envelope, correlation_id, "login_code", None);
                Ok(IngestOutcome::SessionRouted)
            }
            InboundEventType::ContentMessage => {
                let lead = self.resolve_lead(envelope, settings, correlation_id).await?;

                self.queue
                    .publish(NormalizedEvent {
                        tenant_id: envelope.tenant_id,
                        lead_id: lead.id,
                        channel: envelope.channel,
                        message_id: envelope.message_id.clone(),
                        text: envelope.text.clone(),
                        attachments: envelope.attachments.clone(),
                        occurred_at: envelope.occurred_at,
                    })
                    .await?;

                info!(
                    event_name = "ingress.webhook_queued",
                    tenant_id = %envelope.tenant_id,
                    channel = envelope.channel.as_str(),
                    message_id = %envelope.message_id,
                    lead_id = %lead.id,
                    correlation_id,
                    "content message queued"
                );
                self.emit_accepted(envelope, correlation_id, "content_message", Some(lead.id));
                Ok(IngestOutcome::Queued { lead_id: lead.id })
            }
        }
    }

    /// Exact pass, canonical pass, then create. Exactly one lead comes back.
    async fn resolve_lead(
        &self,
        envelope: &InboundEnvelope,
        settings: &ProviderSettings,
        correlation_id: &str,
    ) -> Result<Lead, ApplicationError> {
        let candidates =
            resolution_candidates(&envelope.sender, envelope.channel, &settings.normalization);

        let mut contact = None;
        for identifier in candidates.exact.iter().chain(candidates.canonical.iter()) {
            if let Some(found) = self
                .contacts
                .find_by_identifier(&envelope.tenant_id, identifier)
                .await
                .map_err(storage_error)?
            {
                contact = Some(found);
                break;
            }
        }

        let peer = derive_peer(&envelope.sender, envelope.channel, &settings.normalization)
            .ok_or_else(|| {
                DomainError::InvariantViolation("sender carries no addressable identifier".to_string())
            })?;
        let identifiers =
            stored_identifiers(&envelope.sender, envelope.channel, &settings.normalization);
        let now = Utc::now();

        let contact = match contact {
            Some(mut known) => {
                // Newly observed identifiers accrete onto the existing
                // contact so future variants resolve on the exact pass.
                let mut grew = false;
                for identifier in identifiers {
                    if !known.has_identifier(&identifier) {
                        known.identifiers.push(identifier);
                        grew = true;
                    }
                }
                if grew {
                    self.contacts.save(known.clone()).await.map_err(storage_error)?;
                }
                known
            }
            None => {
                let created = Contact {
                    id: ContactId(Uuid::new_v4()),
                    tenant_id: envelope.tenant_id,
                    display_name: None,
                    identifiers,
                    created_at: now,
                };
                self.contacts.save(created.clone()).await.map_err(storage_error)?;
                self.emit_identity(envelope, correlation_id, "contact_created", None);
                created
            }
        };

        let existing = match &envelope.sender.provider_user_id {
            Some(provider_user_id) => {
                let by_user = self
                    .leads
                    .find_by_provider_user_id(&envelope.tenant_id, envelope.channel, provider_user_id)
                    .await
                    .map_err(storage_error)?;
                match by_user {
                    Some(lead) => Some(lead),
                    None => self
                        .leads
                        .find_by_peer(&envelope.tenant_id, envelope.channel, &peer)
                        .await
                        .map_err(storage_error)?,
                }
            }
            None => self
                .leads
                .find_by_peer(&envelope.tenant_id, envelope.channel, &peer)
                .await
                .map_err(storage_error)?,
        };

        if let Some(lead) = existing {
            return Ok(lead);
        }

        let lead = Lead {
            id: LeadId(Uuid::new_v4()),
            tenant_id: envelope.tenant_id,
            contact_id: contact.id,
            channel: envelope.channel,
            peer,
            provider_user_id: envelope.sender.provider_user_id.clone(),
            stage: LeadStage::New,
            created_at: now,
            updated_at: now,
        };
        self.leads.save(lead.clone()).await.map_err(storage_error)?;
        self.emit_identity(envelope, correlation_id, "lead_created", Some(lead.id));

        Ok(lead)
    }

    fn emit_rejection(&self, envelope: &InboundEnvelope, correlation_id: &str, reason: &str) {
        info!(
            event_name = "ingress.webhook_rejected",
            tenant_id = %envelope.tenant_id,
            channel = envelope.channel.as_str(),
            message_id = %envelope.message_id,
            correlation_id,
            reason,
            "inbound event rejected"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(envelope.tenant_id),
                None,
                correlation_id,
                "webhook_rejected",
                AuditCategory::Ingress,
                "ingestion",
                AuditOutcome::Rejected,
            )
            .with_metadata("channel", envelope.channel.as_str())
            .with_metadata("reason", reason),
        );
    }

    fn emit_accepted(
        &self,
        envelope: &InboundEnvelope,
        correlation_id: &str,
        detail: &str,
        lead_id: Option<LeadId>,
    ) {
        self.audit.emit(
            AuditEvent::new(
                Some(envelope.tenant_id),
                lead_id,
                correlation_id,
                "webhook_accepted",
                AuditCategory::Ingress,
                "ingestion",
                AuditOutcome::Success,
            )
            .with_metadata("channel", envelope.channel.as_str())
            .with_metadata("event", detail),
        );
    }

    fn emit_identity(
        &self,
        envelope: &InboundEnvelope,
        correlation_id: &str,
        event_type: &str,
        lead_id: Option<LeadId>,
    ) {
        self.audit.emit(
            AuditEvent::new(
                Some(envelope.tenant_id),
                lead_id,
                correlation_id,
                event_type,
                AuditCategory::Identity,
                "ingestion",
                AuditOutcome::Success,
            )
            .with_metadata("channel", envelope.channel.as_str()),
        );
    }
}
