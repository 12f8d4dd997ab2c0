use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use courier_core::domain::channel::Channel;
use courier_core::domain::contact::{ChannelIdentifier, Contact};
use courier_core::domain::lead::{Lead, LeadId, LeadStageChange};
use courier_core::domain::message::Message;
use courier_core::domain::outbox::{ContentHash, OutboxItem, OutboxItemId, OutboxStatus};
use courier_core::domain::session::SessionState;
use courier_core::domain::tenant::{ProviderSettings, Tenant, TenantId};
use courier_core::domain::webhook::WebhookAuditEvent;

use super::{
    ContactRepository, LeadRepository, MessageRepository, OutboxRepository, RepositoryError,
    SessionRepository, TenantRepository, WebhookAuditRepository,
};

#[derive(Default)]
pub struct InMemoryTenantRepository {
    tenants: RwLock<HashMap<Uuid, Tenant>>,
    settings: RwLock<HashMap<(Uuid, Channel), ProviderSettings>>,
}

#[async_trait::async_trait]
impl TenantRepository for InMemoryTenantRepository {
    async fn find_tenant(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.get(&id.0).cloned())
    }

    async fn save_tenant(&self, tenant: Tenant) -> Result<(), RepositoryError> {
        let mut tenants = self.tenants.write().await;
        tenants.insert(tenant.id.0, tenant);
        Ok(())
    }

    async fn find_provider_settings(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
    ) -> Result<Option<ProviderSettings>, RepositoryError> {
        let settings = self.settings.read().await;
        Ok(settings.get(&(tenant_id.0, channel)).cloned())
    }

    async fn save_provider_settings(
        &self,
        settings: ProviderSettings,
    ) -> Result<(), RepositoryError> {
        let mut stored = self.settings.write().await;
        stored.insert((settings.tenant_id.0, settings.channel), settings);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryContactRepository {
    contacts: RwLock<HashMap<Uuid, Contact>>,
}

#[async_trait::async_trait]
impl ContactRepository for InMemoryContactRepository {
    async fn find_by_identifier(
        &self,
        tenant_id: &TenantId,
        identifier: &ChannelIdentifier,
    ) -> Result<Option<Contact>, RepositoryError> {
        let contacts = self.contacts.read().await;
        Ok(contacts
            .values()
            .find(|contact| contact.tenant_id == *tenant_id && contact.has_identifier(identifier))
            .cloned())
    }

    async fn save(&self, contact: Contact) -> Result<(), RepositoryError> {
        let mut contacts = self.contacts.write().await;
        contacts.insert(contact.id.0, contact);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryLeadRepository {
    leads: RwLock<HashMap<Uuid, Lead>>,
    stage_changes: RwLock<Vec<LeadStageChange>>,
}

#[async_trait::async_trait]
impl LeadRepository for InMemoryLeadRepository {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        Ok(leads.get(&id.0).cloned())
    }

    async fn find_by_peer(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
        peer: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        Ok(leads
            .values()
            .find(|lead| {
                lead.tenant_id == *tenant_id && lead.channel == channel && lead.peer == peer
            })
            .cloned())
    }

    async fn find_by_provider_user_id(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
        provider_user_id: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        Ok(leads
            .values()
            .find(|lead| {
                lead.tenant_id == *tenant_id
                    && lead.channel == channel
                    && lead.provider_user_id.as_deref() == Some(provider_user_id)
            })
            .cloned())
    }

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError> {
        let mut leads = self.leads.write().await;
        leads.insert(lead.id.0, lead);
        Ok(())
    }

    async fn append_stage_change(&self, change: LeadStageChange) -> Result<(), RepositoryError> {
        let mut changes = self.stage_changes.write().await;
        changes.push(change);
        Ok(())
    }

    async fn list_stage_changes(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<LeadStageChange>, RepositoryError> {
        let changes = self.stage_changes.read().await;
        Ok(changes.iter().filter(|change| change.lead_id == *lead_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<Message>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        messages.push(message);
        Ok(())
    }

    async fn list_for_lead(&self, lead_id: &LeadId) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut found: Vec<Message> =
            messages.iter().filter(|message| message.lead_id == *lead_id).cloned().collect();
        found.sort_by_key(|message| (message.occurred_at, message.recorded_at));
        Ok(found)
    }
}

#[derive(Default)]
pub struct InMemoryOutboxRepository {
    items: RwLock<HashMap<Uuid, OutboxItem>>,
}

impl InMemoryOutboxRepository {
    fn claimable(item: &OutboxItem, now: DateTime<Utc>, stale_cutoff: DateTime<Utc>) -> bool {
        match item.status {
            OutboxStatus::Queued | OutboxStatus::Retry => item.next_attempt_at <= now,
            OutboxStatus::Sending => {
                item.claimed_at.map_or(false, |claimed_at| claimed_at <= stale_cutoff)
            }
            OutboxStatus::Sent | OutboxStatus::Failed => false,
        }
    }
}

#[async_trait::async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn find_by_id(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>, RepositoryError> {
        let items = self.items.read().await;
        Ok(items.get(&id.0).cloned())
    }

    async fn find_by_lead_and_hash(
        &self,
        lead_id: &LeadId,
        content_hash: &ContentHash,
    ) -> Result<Option<OutboxItem>, RepositoryError> {
        let items = self.items.read().await;
        Ok(items
            .values()
            .find(|item| item.lead_id == *lead_id && item.content_hash == *content_hash)
            .cloned())
    }

    async fn insert_if_absent(&self, item: OutboxItem) -> Result<OutboxItem, RepositoryError> {
        let mut items = self.items.write().await;
        if let Some(existing) = items
            .values()
            .find(|stored| stored.lead_id == item.lead_id && stored.content_hash == item.content_hash)
        {
            return Ok(existing.clone());
        }
        items.insert(item.id.0, item.clone());
        Ok(item)
    }

    async fn save(&self, item: OutboxItem) -> Result<(), RepositoryError> {
        let mut items = self.items.write().await;
        items.insert(item.id.0, item);
        Ok(())
    }

    async fn due_items(
        &self,
        now: DateTime<Utc>,
        stale_cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxItem>, RepositoryError> {
        let items = self.items.read().await;
        let mut due: Vec<OutboxItem> = items
            .values()
            .filter(|item| Self::claimable(item, now, stale_cutoff))
            .cloned()
            .collect();
        due.sort_by_key(|item| (item.next_attempt_at, item.created_at));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn try_claim(
        &self,
        id: &OutboxItemId,
        worker_id: &str,
        now: DateTime<Utc>,
        stale_cutoff: DateTime<Utc>,
    ) -> Result<Option<OutboxItem>, RepositoryError> {
        let mut items = self.items.write().await;
        let Some(item) = items.get_mut(&id.0) else {
            return Ok(None);
        };
        if !Self::claimable(item, now, stale_cutoff) {
            return Ok(None);
        }

        item.status = OutboxStatus::Sending;
        item.claimed_by = Some(worker_id.to_string());
        item.claimed_at = Some(now);
        item.updated_at = now;
        Ok(Some(item.clone()))
    }
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<(Uuid, Channel), SessionState>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
    ) -> Result<Option<SessionState>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&(tenant_id.0, channel)).cloned())
    }

    async fn save(&self, state: SessionState) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert((state.tenant_id.0, state.channel), state);
        Ok(())
    }

    async fn list_deadline_elapsed(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionState>, RepositoryError> {
        use courier_core::domain::session::SessionPhase;

        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|state| match state.phase {
                SessionPhase::WaitingQr => {
                    state.code_expires_at.map_or(false, |deadline| deadline <= now)
                }
                SessionPhase::Needs2fa => {
                    state.second_factor_deadline.map_or(false, |deadline| deadline <= now)
                }
                SessionPhase::Authorized | SessionPhase::Disconnected => false,
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryWebhookAuditRepository {
    seen: RwLock<HashSet<(Uuid, Channel, String)>>,
    events: RwLock<Vec<WebhookAuditEvent>>,
}

impl InMemoryWebhookAuditRepository {
    pub async fn events(&self) -> Vec<WebhookAuditEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait::async_trait]
impl WebhookAuditRepository for InMemoryWebhookAuditRepository {
    async fn record_if_new(&self, event: WebhookAuditEvent) -> Result<bool, RepositoryError> {
        let key = (event.tenant_id.0, event.channel, event.message_id.clone());
        let mut seen = self.seen.write().await;
        if !seen.insert(key) {
            return Ok(false);
        }
        let mut events = self.events.write().await;
        events.push(event);
        Ok(true)
    }

    async fn remove(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
        message_id: &str,
    ) -> Result<(), RepositoryError> {
        let key = (tenant_id.0, channel, message_id.to_string());
        self.seen.write().await.remove(&key);
        self.events.write().await.retain(|event| {
            !(event.tenant_id == *tenant_id
                && event.channel == channel
                && event.message_id == message_id)
        });
        Ok(())
    }
}
