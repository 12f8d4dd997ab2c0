use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use courier_core::domain::channel::Channel;
use courier_core::domain::lead::LeadId;
use courier_core::domain::outbox::{ContentHash, OutboxItem, OutboxItemId, OutboxStatus};
use courier_core::domain::tenant::TenantId;

use super::{
    encode_json, parse_json, parse_optional_timestamp, parse_timestamp, parse_u32, parse_uuid,
    OutboxRepository, RepositoryError,
};
use crate::DbPool;

const OUTBOX_COLUMNS: &str = "id,
    tenant_id,
    lead_id,
    channel,
    to_peer,
    text,
    attachments_json,
    content_hash,
    status,
    attempts,
    max_attempts,
    next_attempt_at,
    claimed_by,
    claimed_at,
    last_error,
    sent_at,
    created_at,
    updated_at";

pub struct SqlOutboxRepository {
    pool: DbPool,
}

impl SqlOutboxRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OutboxRepository for SqlOutboxRepository {
    async fn find_by_id(&self, id: &OutboxItemId) -> Result<Option<OutboxItem>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {OUTBOX_COLUMNS} FROM outbox_items WHERE id = ?"))
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(item_from_row).transpose()
    }

    async fn find_by_lead_and_hash(
        &self,
        lead_id: &LeadId,
        content_hash: &ContentHash,
    ) -> Result<Option<OutboxItem>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_items WHERE lead_id = ? AND content_hash = ?"
        ))
        .bind(lead_id.0.to_string())
        .bind(&content_hash.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(item_from_row).transpose()
    }

    async fn insert_if_absent(&self, item: OutboxItem) -> Result<OutboxItem, RepositoryError> {
        let attachments_json = encode_json("attachments_json", &item.attachments)?;

        sqlx::query(
            "INSERT INTO outbox_items (
                id,
                tenant_id,
                lead_id,
                channel,
                to_peer,
                text,
                attachments_json,
                content_hash,
                status,
                attempts,
                max_attempts,
                next_attempt_at,
                claimed_by,
                claimed_at,
                last_error,
                sent_at,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(lead_id, content_hash) DO NOTHING",
        )
        .bind(item.id.0.to_string())
        .bind(item.tenant_id.0.to_string())
        .bind(item.lead_id.0.to_string())
        .bind(item.channel.as_str())
        .bind(&item.to_peer)
        .bind(&item.text)
        .bind(attachments_json)
        .bind(&item.content_hash.0)
        .bind(item.status.as_str())
        .bind(i64::from(item.attempts))
        .bind(i64::from(item.max_attempts))
        .bind(item.next_attempt_at.to_rfc3339())
        .bind(item.claimed_by.as_deref())
        .bind(item.claimed_at.map(|value| value.to_rfc3339()))
        .bind(item.last_error.as_deref())
        .bind(item.sent_at.map(|value| value.to_rfc3339()))
        .bind(item.created_at.to_rfc3339())
        .bind(item.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let stored = self.find_by_lead_and_hash(&item.lead_id, &item.content_hash).await?;
        stored.ok_or_else(|| {
            RepositoryError::Decode("outbox row missing immediately after insert".to_string())
        })
    }

    async fn save(&self, item: OutboxItem) -> Result<(), RepositoryError> {
        let attachments_json = encode_json("attachments_json", &item.attachments)?;

        sqlx::query(
            "UPDATE outbox_items SET
                status = ?,
                attempts = ?,
                next_attempt_at = ?,
                claimed_by = ?,
                claimed_at = ?,
                last_error = ?,
                sent_at = ?,
                attachments_json = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(item.status.as_str())
        .bind(i64::from(item.attempts))
        .bind(item.next_attempt_at.to_rfc3339())
        .bind(item.claimed_by.as_deref())
        .bind(item.claimed_at.map(|value| value.to_rfc3339()))
        .bind(item.last_error.as_deref())
        .bind(item.sent_at.map(|value| value.to_rfc3339()))
        .bind(attachments_json)
        .bind(item.updated_at.to_rfc3339())
        .bind(item.id.0.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn due_items(
        &self,
        now: DateTime<Utc>,
        stale_cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<OutboxItem>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_items
             WHERE (status IN ('queued', 'retry') AND next_attempt_at <= ?)
                OR (status = 'sending' AND claimed_at IS NOT NULL AND claimed_at <= ?)
             ORDER BY next_attempt_at ASC, created_at ASC
             LIMIT ?"
        ))
        .bind(now.to_rfc3339())
        .bind(stale_cutoff.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }

    async fn try_claim(
        &self,
        id: &OutboxItemId,
        worker_id: &str,
        now: DateTime<Utc>,
        stale_cutoff: DateTime<Utc>,
    ) -> Result<Option<OutboxItem>, RepositoryError> {
        // Single conditional UPDATE so two workers can never both win; the
        // loser's rows_affected is zero.
        let result = sqlx::query(
            "UPDATE outbox_items SET
                status = 'sending',
                claimed_by = ?,
                claimed_at = ?,
                updated_at = ?
             WHERE id = ?
               AND (
                    (status IN ('queued', 'retry') AND next_attempt_at <= ?)
                    OR (status = 'sending' AND claimed_at IS NOT NULL AND claimed_at <= ?)
               )",
        )
        .bind(worker_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(id.0.to_string())
        .bind(now.to_rfc3339())
        .bind(stale_cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.find_by_id(id).await
    }
}

fn item_from_row(row: SqliteRow) -> Result<OutboxItem, RepositoryError> {
    let channel_raw = row.try_get::<String, _>("channel")?;
    let channel = Channel::parse(&channel_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown channel `{channel_raw}`")))?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = OutboxStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown outbox status `{status_raw}`")))?;

    let attachments_raw = row.try_get::<String, _>("attachments_json")?;
    let attachments = parse_json::<Vec<String>>("attachments_json", &attachments_raw)?;

    Ok(OutboxItem {
        id: OutboxItemId(parse_uuid("id", row.try_get("id")?)?),
        tenant_id: TenantId(parse_uuid("tenant_id", row.try_get("tenant_id")?)?),
        lead_id: LeadId(parse_uuid("lead_id", row.try_get("lead_id")?)?),
        channel,
        to_peer: row.try_get("to_peer")?,
        text: row.try_get("text")?,
        attachments,
        content_hash: ContentHash(row.try_get("content_hash")?),
        status,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        max_attempts: parse_u32("max_attempts", row.try_get("max_attempts")?)?,
        next_attempt_at: parse_timestamp("next_attempt_at", row.try_get("next_attempt_at")?)?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: parse_optional_timestamp("claimed_at", row.try_get("claimed_at")?)?,
        last_error: row.try_get("last_error")?,
        sent_at: parse_optional_timestamp("sent_at", row.try_get("sent_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
