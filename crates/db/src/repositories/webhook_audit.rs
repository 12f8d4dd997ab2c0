use courier_core::domain::channel::Channel;
use courier_core::domain::tenant::TenantId;
use courier_core::domain::webhook::WebhookAuditEvent;

use super::{RepositoryError, WebhookAuditRepository};
use crate::DbPool;

pub struct SqlWebhookAuditRepository {
    pool: DbPool,
}

impl SqlWebhookAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WebhookAuditRepository for SqlWebhookAuditRepository {
    async fn record_if_new(&self, event: WebhookAuditEvent) -> Result<bool, RepositoryError> {
        // The unique (tenant, channel, message id) index makes the append
        // double as the replay check.
        let result = sqlx::query(
            "INSERT INTO webhook_audit_log (
                id,
                tenant_id,
                channel,
                message_id,
                event_type,
                received_at
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, channel, message_id) DO NOTHING",
        )
        .bind(event.id.to_string())
        .bind(event.tenant_id.0.to_string())
        .bind(event.channel.as_str())
        .bind(&event.message_id)
        .bind(event.event_type.as_str())
        .bind(event.received_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn remove(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
        message_id: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "DELETE FROM webhook_audit_log
             WHERE tenant_id = ? AND channel = ? AND message_id = ?",
        )
        .bind(tenant_id.0.to_string())
        .bind(channel.as_str())
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
