use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use courier_core::domain::channel::Channel;
use courier_core::domain::session::{SessionErrorCode, SessionPhase, SessionState};
use courier_core::domain::tenant::TenantId;

use super::{parse_optional_timestamp, parse_timestamp, parse_uuid, RepositoryError, SessionRepository};
use crate::DbPool;

const SESSION_COLUMNS: &str = "tenant_id,
    channel,
    phase,
    code_id,
    code_expires_at,
    second_factor_deadline,
    last_error,
    updated_at";

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn get(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
    ) -> Result<Option<SessionState>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM session_state WHERE tenant_id = ? AND channel = ?"
        ))
        .bind(tenant_id.0.to_string())
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(state_from_row).transpose()
    }

    async fn save(&self, state: SessionState) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO session_state (
                tenant_id,
                channel,
                phase,
                code_id,
                code_expires_at,
                second_factor_deadline,
                last_error,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, channel) DO UPDATE SET
                phase = excluded.phase,
                code_id = excluded.code_id,
                code_expires_at = excluded.code_expires_at,
                second_factor_deadline = excluded.second_factor_deadline,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at",
        )
        .bind(state.tenant_id.0.to_string())
        .bind(state.channel.as_str())
        .bind(state.phase.as_str())
        .bind(state.code_id.as_deref())
        .bind(state.code_expires_at.map(|value| value.to_rfc3339()))
        .bind(state.second_factor_deadline.map(|value| value.to_rfc3339()))
        .bind(state.last_error.map(|code| code.as_str()))
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_deadline_elapsed(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionState>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM session_state
             WHERE (phase = 'waiting_qr' AND code_expires_at IS NOT NULL AND code_expires_at <= ?)
                OR (phase = 'needs_2fa' AND second_factor_deadline IS NOT NULL
                    AND second_factor_deadline <= ?)"
        ))
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(state_from_row).collect()
    }
}

fn state_from_row(row: SqliteRow) -> Result<SessionState, RepositoryError> {
    let channel_raw = row.try_get::<String, _>("channel")?;
    let channel = Channel::parse(&channel_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown channel `{channel_raw}`")))?;

    let phase_raw = row.try_get::<String, _>("phase")?;
    let phase = SessionPhase::parse(&phase_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown session phase `{phase_raw}`")))?;

    let last_error = row
        .try_get::<Option<String>, _>("last_error")?
        .map(|value| {
            SessionErrorCode::parse(&value).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown session error code `{value}`"))
            })
        })
        .transpose()?;

    Ok(SessionState {
        tenant_id: TenantId(parse_uuid("tenant_id", row.try_get("tenant_id")?)?),
        channel,
        phase,
        code_id: row.try_get("code_id")?,
        code_expires_at: parse_optional_timestamp("code_expires_at", row.try_get("code_expires_at")?)?,
        second_factor_deadline: parse_optional_timestamp(
            "second_factor_deadline",
            row.try_get("second_factor_deadline")?,
        )?,
        last_error,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
