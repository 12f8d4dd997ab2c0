use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::lead::LeadId;
use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Ingress,
    Identity,
    Outbox,
    Session,
    Persistence,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub tenant_id: Option<TenantId>,
    pub lead_id: Option<LeadId>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        tenant_id: Option<TenantId>,
        lead_id: Option<LeadId>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { tenant_id, lead_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub tenant_id: Option<TenantId>,
    pub lead_id: Option<LeadId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        tenant_id: Option<TenantId>,
        lead_id: Option<LeadId>,
        correlation_id: impl Into<String>,
        event_type: impl Into<String>,
        category: AuditCategory,
        actor: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            tenant_id,
            lead_id,
            correlation_id: correlation_id.into(),
            event_type: event_type.into(),
            category,
            actor: actor.into(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn from_context(
        context: &AuditContext,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> Self {
        Self::new(
            context.tenant_id,
            context.lead_id,
            context.correlation_id.clone(),
            event_type,
            category,
            context.actor.clone(),
            outcome,
        )
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
    use crate::domain::tenant::TenantId;

    #[test]
    fn in_memory_sink_records_emitted_events() {
        let sink = InMemoryAuditSink::default();
        let event = AuditEvent::new(
            Some(TenantId(Uuid::new_v4())),
            None,
            "corr-1",
            "webhook_accepted",
            AuditCategory::Ingress,
            "webhook",
            AuditOutcome::Success,
        )
        .with_metadata("channel", "whatsapp");

        sink.emit(event.clone());

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], event);
        assert_eq!(events[0].metadata.get("channel").map(String::as_str), Some("whatsapp"));
    }

    #[test]
    fn from_context_copies_identifiers_and_actor() {
        let tenant_id = TenantId(Uuid::new_v4());
        let context = AuditContext::new(Some(tenant_id), None, "corr-2", "delivery_worker");

        let event = AuditEvent::from_context(
            &context,
            "outbox_claimed",
            AuditCategory::Outbox,
            AuditOutcome::Success,
        );

        assert_eq!(event.tenant_id, Some(tenant_id));
        assert_eq!(event.correlation_id, "corr-2");
        assert_eq!(event.actor, "delivery_worker");
    }
}
