use sqlx::{sqlite::SqliteRow, Row};

use courier_core::domain::lead::LeadId;
use courier_core::domain::message::{Message, MessageDirection, MessageId, MessageStatus};

use super::{encode_json, parse_json, parse_timestamp, parse_uuid, MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        let attachments_json = encode_json("attachments_json", &message.attachments)?;

        sqlx::query(
            "INSERT INTO messages (
                id,
                lead_id,
                direction,
                text,
                attachments_json,
                provider_message_id,
                status,
                occurred_at,
                recorded_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.0.to_string())
        .bind(message.lead_id.0.to_string())
        .bind(message.direction.as_str())
        .bind(message.text.as_deref())
        .bind(attachments_json)
        .bind(message.provider_message_id.as_deref())
        .bind(message.status.as_str())
        .bind(message.occurred_at.to_rfc3339())
        .bind(message.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_lead(&self, lead_id: &LeadId) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                lead_id,
                direction,
                text,
                attachments_json,
                provider_message_id,
                status,
                occurred_at,
                recorded_at
             FROM messages
             WHERE lead_id = ?
             ORDER BY occurred_at ASC, recorded_at ASC",
        )
        .bind(lead_id.0.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let direction_raw = row.try_get::<String, _>("direction")?;
    let direction = MessageDirection::parse(&direction_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown message direction `{direction_raw}`"))
    })?;

    let status_raw = row.try_get::<String, _>("status")?;
    let status = MessageStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message status `{status_raw}`")))?;

    let attachments_raw = row.try_get::<String, _>("attachments_json")?;
    let attachments = parse_json::<Vec<String>>("attachments_json", &attachments_raw)?;

    Ok(Message {
        id: MessageId(parse_uuid("id", row.try_get("id")?)?),
        lead_id: LeadId(parse_uuid("lead_id", row.try_get("lead_id")?)?),
        direction,
        text: row.try_get("text")?,
        attachments,
        provider_message_id: row.try_get("provider_message_id")?,
        status,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
        recorded_at: parse_timestamp("recorded_at", row.try_get("recorded_at")?)?,
    })
}
