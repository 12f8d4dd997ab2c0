use sqlx::{sqlite::SqliteRow, Row};

use courier_core::domain::channel::Channel;
use courier_core::domain::tenant::{ProviderSettings, Tenant, TenantId};
use courier_core::identity::PhoneNormalization;

use super::{
    encode_json, parse_json, parse_timestamp, parse_uuid, RepositoryError, TenantRepository,
};
use crate::DbPool;

pub struct SqlTenantRepository {
    pool: DbPool,
}

impl SqlTenantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TenantRepository for SqlTenantRepository {
    async fn find_tenant(&self, id: &TenantId) -> Result<Option<Tenant>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, created_at FROM tenants WHERE id = ?")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(tenant_from_row).transpose()
    }

    async fn save_tenant(&self, tenant: Tenant) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tenants (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(tenant.id.0.to_string())
        .bind(&tenant.name)
        .bind(tenant.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_provider_settings(
        &self,
        tenant_id: &TenantId,
        channel: Channel,
    ) -> Result<Option<ProviderSettings>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                tenant_id,
                channel,
                enabled,
                webhook_secret,
                allow_list_json,
                normalization_json,
                secret_issued_at,
                updated_at
             FROM provider_settings
             WHERE tenant_id = ? AND channel = ?",
        )
        .bind(tenant_id.0.to_string())
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(settings_from_row).transpose()
    }

    async fn save_provider_settings(
        &self,
        settings: ProviderSettings,
    ) -> Result<(), RepositoryError> {
        let allow_list_json = settings
            .allow_list
            .as_ref()
            .map(|list| encode_json("allow_list_json", list))
            .transpose()?;
        let normalization_json = encode_json("normalization_json", &settings.normalization)?;

        sqlx::query(
            "INSERT INTO provider_settings (
                tenant_id,
                channel,
                enabled,
                webhook_secret,
                allow_list_json,
                normalization_json,
                secret_issued_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, channel) DO UPDATE SET
                enabled = excluded.enabled,
                webhook_secret = excluded.webhook_secret,
                allow_list_json = excluded.allow_list_json,
                normalization_json = excluded.normalization_json,
                secret_issued_at = excluded.secret_issued_at,
                updated_at = excluded.updated_at",
        )
        .bind(settings.tenant_id.0.to_string())
        .bind(settings.channel.as_str())
        .bind(settings.enabled)
        .bind(&settings.webhook_secret)
        .bind(allow_list_json)
        .bind(normalization_json)
        .bind(settings.secret_issued_at.to_rfc3339())
        .bind(settings.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn tenant_from_row(row: SqliteRow) -> Result<Tenant, RepositoryError> {
    Ok(Tenant {
        id: TenantId(parse_uuid("id", row.try_get("id")?)?),
        name: row.try_get("name")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn settings_from_row(row: SqliteRow) -> Result<ProviderSettings, RepositoryError> {
    let channel_raw = row.try_get::<String, _>("channel")?;
    let channel = Channel::parse(&channel_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown channel `{channel_raw}`")))?;

    let allow_list = row
        .try_get::<Option<String>, _>("allow_list_json")?
        .map(|raw| parse_json::<Vec<String>>("allow_list_json", &raw))
        .transpose()?;

    let normalization_raw = row.try_get::<String, _>("normalization_json")?;
    let normalization =
        parse_json::<PhoneNormalization>("normalization_json", &normalization_raw)?;

    Ok(ProviderSettings {
        tenant_id: TenantId(parse_uuid("tenant_id", row.try_get("tenant_id")?)?),
        channel,
        enabled: row.try_get("enabled")?,
        webhook_secret: row.try_get("webhook_secret")?,
        allow_list,
        normalization,
        secret_issued_at: parse_timestamp("secret_issued_at", row.try_get("secret_issued_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use courier_core::domain::channel::Channel;
    use courier_core::domain::tenant::{ProviderSettings, Tenant, TenantId};
    use courier_core::identity::{DigitSwap, PhoneNormalization};

    use super::SqlTenantRepository;
    use crate::migrations;
    use crate::repositories::TenantRepository;
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    #[tokio::test]
    async fn provider_settings_round_trip() {
        let pool = setup_pool().await;
        let repo = SqlTenantRepository::new(pool);

        let tenant = Tenant {
            id: TenantId(Uuid::new_v4()),
            name: "acme".to_string(),
            created_at: Utc::now(),
        };
        repo.save_tenant(tenant.clone()).await.expect("save tenant");

        let settings = ProviderSettings {
            tenant_id: tenant.id,
            channel: Channel::Whatsapp,
            enabled: true,
            webhook_secret: "hook-secret".to_string(),
            allow_list: Some(vec!["15551112222".to_string()]),
            normalization: PhoneNormalization {
                default_country_prefix: Some("1".to_string()),
                leading_digit_swap: Some(DigitSwap {
                    match_prefix: "8".to_string(),
                    replacement: "7".to_string(),
                }),
            },
            secret_issued_at: Utc::now(),
            updated_at: Utc::now(),
        };
        repo.save_provider_settings(settings.clone()).await.expect("save settings");

        let loaded = repo
            .find_provider_settings(&tenant.id, Channel::Whatsapp)
            .await
            .expect("find settings")
            .expect("settings present");

        assert_eq!(loaded.webhook_secret, settings.webhook_secret);
        assert_eq!(loaded.allow_list, settings.allow_list);
        assert_eq!(loaded.normalization, settings.normalization);
    }

    #[tokio::test]
    async fn reissued_secret_replaces_the_stored_one() {
        let pool = setup_pool().await;
        let repo = SqlTenantRepository::new(pool);

        let tenant = Tenant {
            id: TenantId(Uuid::new_v4()),
            name: "acme".to_string(),
            created_at: Utc::now(),
        };
        repo.save_tenant(tenant.clone()).await.expect("save tenant");

        let mut settings = ProviderSettings {
            tenant_id: tenant.id,
            channel: Channel::Telegram,
            enabled: true,
            webhook_secret: "old-secret".to_string(),
            allow_list: None,
            normalization: PhoneNormalization::default(),
            secret_issued_at: Utc::now(),
            updated_at: Utc::now(),
        };
        repo.save_provider_settings(settings.clone()).await.expect("save settings");

        settings.webhook_secret = "new-secret".to_string();
        settings.secret_issued_at = Utc::now();
        repo.save_provider_settings(settings).await.expect("reissue");

        let loaded = repo
            .find_provider_settings(&tenant.id, Channel::Telegram)
            .await
            .expect("find settings")
            .expect("settings present");

        assert!(loaded.secret_matches("new-secret"));
        assert!(!loaded.secret_matches("old-secret"));
    }
}
