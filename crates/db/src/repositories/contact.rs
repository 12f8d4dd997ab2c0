use sqlx::{sqlite::SqliteRow, Row};

use courier_core::domain::contact::{ChannelIdentifier, Contact, ContactId, IdentifierKind};
use courier_core::domain::tenant::TenantId;

use super::{parse_timestamp, parse_uuid, ContactRepository, RepositoryError};
use crate::DbPool;

pub struct SqlContactRepository {
    pool: DbPool,
}

impl SqlContactRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_identifiers(
        &self,
        contact_id: &ContactId,
    ) -> Result<Vec<ChannelIdentifier>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT kind, value FROM contact_identifiers WHERE contact_id = ? ORDER BY kind, value",
        )
        .bind(contact_id.0.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(identifier_from_row).collect()
    }
}

#[async_trait::async_trait]
impl ContactRepository for SqlContactRepository {
    async fn find_by_identifier(
        &self,
        tenant_id: &TenantId,
        identifier: &ChannelIdentifier,
    ) -> Result<Option<Contact>, RepositoryError> {
        let row = sqlx::query(
            "SELECT c.id, c.tenant_id, c.display_name, c.created_at
             FROM contacts c
             JOIN contact_identifiers ci ON ci.contact_id = c.id
             WHERE ci.tenant_id = ? AND ci.kind = ? AND ci.value = ?",
        )
        .bind(tenant_id.0.to_string())
        .bind(identifier.kind.as_str())
        .bind(&identifier.value)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut contact = contact_from_row(row)?;
        contact.identifiers = self.load_identifiers(&contact.id).await?;
        Ok(Some(contact))
    }

    async fn save(&self, contact: Contact) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO contacts (id, tenant_id, display_name, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
        )
        .bind(contact.id.0.to_string())
        .bind(contact.tenant_id.0.to_string())
        .bind(contact.display_name.as_deref())
        .bind(contact.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for identifier in &contact.identifiers {
            sqlx::query(
                "INSERT INTO contact_identifiers (contact_id, tenant_id, kind, value)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(tenant_id, kind, value) DO NOTHING",
            )
            .bind(contact.id.0.to_string())
            .bind(contact.tenant_id.0.to_string())
            .bind(identifier.kind.as_str())
            .bind(&identifier.value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn contact_from_row(row: SqliteRow) -> Result<Contact, RepositoryError> {
    Ok(Contact {
        id: ContactId(parse_uuid("id", row.try_get("id")?)?),
        tenant_id: TenantId(parse_uuid("tenant_id", row.try_get("tenant_id")?)?),
        display_name: row.try_get("display_name")?,
        identifiers: Vec::new(),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn identifier_from_row(row: SqliteRow) -> Result<ChannelIdentifier, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = IdentifierKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown identifier kind `{kind_raw}`")))?;

    Ok(ChannelIdentifier { kind, value: row.try_get("value")? })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use courier_core::domain::contact::{ChannelIdentifier, Contact, ContactId, IdentifierKind};
    use courier_core::domain::tenant::{Tenant, TenantId};

    use super::SqlContactRepository;
    use crate::migrations;
    use crate::repositories::{ContactRepository, SqlTenantRepository, TenantRepository};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        pool
    }

    async fn insert_tenant(pool: &DbPool) -> TenantId {
        let tenant = Tenant {
            id: TenantId(Uuid::new_v4()),
            name: "acme".to_string(),
            created_at: Utc::now(),
        };
        SqlTenantRepository::new(pool.clone()).save_tenant(tenant.clone()).await.expect("tenant");
        tenant.id
    }

    #[tokio::test]
    async fn contact_is_reachable_through_any_stored_identifier() {
        let pool = setup_pool().await;
        let tenant_id = insert_tenant(&pool).await;
        let repo = SqlContactRepository::new(pool);

        let contact = Contact {
            id: ContactId(Uuid::new_v4()),
            tenant_id,
            display_name: Some("Dana".to_string()),
            identifiers: vec![
                ChannelIdentifier::new(IdentifierKind::Phone, "15551112222"),
                ChannelIdentifier::new(IdentifierKind::ProviderUserId, "u-900"),
            ],
            created_at: Utc::now(),
        };
        repo.save(contact.clone()).await.expect("save");

        for identifier in &contact.identifiers {
            let found = repo
                .find_by_identifier(&tenant_id, identifier)
                .await
                .expect("lookup")
                .expect("contact present");
            assert_eq!(found.id, contact.id);
            assert_eq!(found.identifiers.len(), 2);
        }
    }

    #[tokio::test]
    async fn unknown_identifier_resolves_to_none() {
        let pool = setup_pool().await;
        let tenant_id = insert_tenant(&pool).await;
        let repo = SqlContactRepository::new(pool);

        let missing = repo
            .find_by_identifier(
                &tenant_id,
                &ChannelIdentifier::new(IdentifierKind::Username, "nobody"),
            )
            .await
            .expect("lookup");
        assert!(missing.is_none());
    }
}
