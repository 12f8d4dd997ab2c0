use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use courier_core::domain::channel::Channel;
use courier_core::domain::contact::{ChannelIdentifier, Contact};
use courier_core::domain::lead::{Lead, LeadId, LeadStageChange};
use courier_core::domain::message::Message;
use courier_core::domain::outbox::{ContentHash, OutboxItem, OutboxItemId};
use courier_core::domain::session::SessionState;
use courier_core::domain::tenant::{ProviderSettings, Tenant, TenantId};
use courier_core::domain::webhook::WebhookAuditEvent;

pub mod contact;
pub mod lead;
pub mod memory;
pub mod message;
pub mod outbox;
pub mod session;
pub mod tenant;
pub mod webhook_audit;

pub use contact::SqlContactRepository;
pub use lead::SqlLeadRepository;
pub use memory::{
    InMemoryContactRepository, InMemoryLeadRepository, InMemoryMessageRepository,
    InMemoryOutboxRepository, InMemorySessionRepository, InMemoryTenantRepository,
    InMemoryWebhookAuditRepository,
};
pub use message::SqlMessageRepository;
pub use outbox::SqlOutboxRepository;
pub use session::SqlSessionRepository;
pub use tenant::SqlTenantRepository;
pub use webhook_audit::SqlWebhookAuditRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn find_tenant(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError>;
    async fn save_tenant(&self, tenant: Tenant) -> Result<(), RepositoryError>;

    async fn find_provider_settings(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
    ) -> Result<Option<ProviderSettings>, RepositoryError>;

    async fn save_provider_settings(
        &self,
        settings: ProviderSettings,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn find_by_identifier(
        &self,
        tenant_id: &TenantId,
        identifier: &ChannelIdentifier,
    ) -> Result<Option<Contact>, RepositoryError>;

    async fn save(&self, contact: Contact) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;

    async fn find_by_peer(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
        peer: &str,
    ) -> Result<Option<Lead>, RepositoryError>;

    async fn find_by_provider_user_id(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
        provider_user_id: &str,
    ) -> Result<Option<Lead>, RepositoryError>;

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError>;

    async fn append_stage_change(&self, change: LeadStageChange) -> Result<(), RepositoryError>;

    async fn list_stage_changes(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<LeadStageChange>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: Message) -> Result<(), RepositoryError>;
    async fn list_for_lead(&self, lead_id: &LeadId) -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn find_by_id(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>, RepositoryError>;

    async fn find_by_lead_and_hash(
        &self,
        lead_id: &LeadId,
        content_hash: &ContentHash,
    ) -> Result<Option<OutboxItem>, RepositoryError>;

    /// Insert the item unless a row for its (lead, content hash) pair already
    /// exists, in which case the stored row is returned untouched.
    async fn insert_if_absent(&self, item: OutboxItem) -> Result<OutboxItem, RepositoryError>;

    async fn save(&self, item: OutboxItem) -> Result<(), RepositoryError>;

    /// Items a worker may currently attempt: queued or retry rows that are
    /// due, plus sending rows whose claim went stale before `stale_cutoff`.
    async fn due_items(
        &self,
        now: DateTime<Utc>,
        stale_cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxItem>, RepositoryError>;

    /// Atomically move one due item into `sending` under this worker's name.
    /// Returns `None` when another worker won the race.
    async fn try_claim(
        &self,
        id: &OutboxItemId,
        worker_id: &str,
        now: DateTime<Utc>,
        stale_cutoff: DateTime<Utc>,
    ) -> Result<Option<OutboxItem>, RepositoryError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
    ) -> Result<Option<SessionState>, RepositoryError>;

    async fn save(&self, state: SessionState) -> Result<(), RepositoryError>;

    /// Sessions sitting in a pending phase whose persisted deadline has
    /// already passed.
    async fn list_deadline_elapsed(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionState>, RepositoryError>;
}

#[async_trait]
pub trait WebhookAuditRepository: Send + Sync {
    /// Append the event unless the (tenant, channel, message id) triple was
    /// already recorded. Returns `false` for a replay.
    async fn record_if_new(&self, event: WebhookAuditEvent) -> Result<bool, RepositoryError>;

    /// Drop a recorded triple so the provider's retry is treated as new.
    /// Rolls back the dedup mark when processing fails after the append.
    async fn remove(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
        message_id: &str,
    ) -> Result<(), RepositoryError>;
}

pub(crate) fn parse_uuid(column: &str, value: String) -> Result<uuid::Uuid, RepositoryError> {
    uuid::Uuid::parse_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid uuid in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(value).map_err(|error| {
        RepositoryError::Decode(format!("invalid json in `{column}`: {error}"))
    })
}

pub(crate) fn encode_json<T: serde::Serialize>(
    column: &str,
    value: &T,
) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|error| {
        RepositoryError::Decode(format!("could not encode `{column}` as json: {error}"))
    })
}
