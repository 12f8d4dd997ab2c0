use sqlx::{sqlite::SqliteRow, Row};

use courier_core::domain::channel::Channel;
use courier_core::domain::contact::ContactId;
use courier_core::domain::lead::{Lead, LeadId, LeadStage, LeadStageChange};
use courier_core::domain::tenant::TenantId;

use super::{parse_timestamp, parse_uuid, LeadRepository, RepositoryError};
use crate::DbPool;

const LEAD_COLUMNS: &str = "id,
    tenant_id,
    contact_id,
    channel,
    peer,
    provider_user_id,
    stage,
    created_at,
    updated_at";

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?"))
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(lead_from_row).transpose()
    }

    async fn find_by_peer(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
        peer: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads WHERE tenant_id = ? AND channel = ? AND peer = ?"
        ))
        .bind(tenant_id.0.to_string())
        .bind(channel.as_str())
        .bind(peer)
        .fetch_optional(&self.pool)
        .await?;

        row.map(lead_from_row).transpose()
    }

    async fn find_by_provider_user_id(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
        provider_user_id: &str,
    ) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads
             WHERE tenant_id = ? AND channel = ? AND provider_user_id = ?"
        ))
        .bind(tenant_id.0.to_string())
        .bind(channel.as_str())
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(lead_from_row).transpose()
    }

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO leads (
                id,
                tenant_id,
                contact_id,
                channel,
                peer,
                provider_user_id,
                stage,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                contact_id = excluded.contact_id,
                peer = excluded.peer,
                provider_user_id = excluded.provider_user_id,
                stage = excluded.stage,
                updated_at = excluded.updated_at",
        )
        .bind(lead.id.0.to_string())
        .bind(lead.tenant_id.0.to_string())
        .bind(lead.contact_id.0.to_string())
        .bind(lead.channel.as_str())
        .bind(&lead.peer)
        .bind(lead.provider_user_id.as_deref())
        .bind(lead.stage.as_str())
        .bind(lead.created_at.to_rfc3339())
        .bind(lead.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_stage_change(&self, change: LeadStageChange) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO lead_stage_changes (id, lead_id, from_stage, to_stage, reason, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(change.id.to_string())
        .bind(change.lead_id.0.to_string())
        .bind(change.from_stage.as_ref().map(LeadStage::as_str))
        .bind(change.to_stage.as_str())
        .bind(&change.reason)
        .bind(change.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_stage_changes(
        &self,
        lead_id: &LeadId,
    ) -> Result<Vec<LeadStageChange>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, lead_id, from_stage, to_stage, reason, occurred_at
             FROM lead_stage_changes
             WHERE lead_id = ?
             ORDER BY occurred_at ASC",
        )
        .bind(lead_id.0.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(stage_change_from_row).collect()
    }
}

fn lead_from_row(row: SqliteRow) -> Result<Lead, RepositoryError> {
    let channel_raw = row.try_get::<String, _>("channel")?;
    let channel = Channel::parse(&channel_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown channel `{channel_raw}`")))?;

    let stage_raw = row.try_get::<String, _>("stage")?;
    let stage = LeadStage::parse(&stage_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown lead stage `{stage_raw}`")))?;

    Ok(Lead {
        id: LeadId(parse_uuid("id", row.try_get("id")?)?),
        tenant_id: TenantId(parse_uuid("tenant_id", row.try_get("tenant_id")?)?),
        contact_id: ContactId(parse_uuid("contact_id", row.try_get("contact_id")?)?),
        channel,
        peer: row.try_get("peer")?,
        provider_user_id: row.try_get("provider_user_id")?,
        stage,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn stage_change_from_row(row: SqliteRow) -> Result<LeadStageChange, RepositoryError> {
    let from_stage = row
        .try_get::<Option<String>, _>("from_stage")?
        .map(|value| {
            LeadStage::parse(&value)
                .ok_or_else(|| RepositoryError::Decode(format!("unknown from_stage `{value}`")))
        })
        .transpose()?;

    let to_stage_raw = row.try_get::<String, _>("to_stage")?;
    let to_stage = LeadStage::parse(&to_stage_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown to_stage `{to_stage_raw}`")))?;

    Ok(LeadStageChange {
        id: parse_uuid("id", row.try_get("id")?)?,
        lead_id: LeadId(parse_uuid("lead_id", row.try_get("lead_id")?)?),
        from_stage,
        to_stage,
        reason: row.try_get("reason")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}
