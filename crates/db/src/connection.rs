//! SQLite pool construction.
//!
//! Every connection gets the same session PRAGMAs: foreign keys enforced,
//! WAL so status reads stay unblocked during delivery bursts, and a busy
//! timeout so competing outbox writers queue instead of erroring.

use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use courier_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Busy-handler wait before a locked write surfaces as an error.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Connect using the application's `[database]` section.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                let pragmas = [
                    "PRAGMA foreign_keys = ON".to_string(),
                    "PRAGMA journal_mode = WAL".to_string(),
                    format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"),
                ];
                for pragma in &pragmas {
                    sqlx::query(pragma).execute(&mut *conn).await?;
                }
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use courier_core::config::DatabaseConfig;

    use super::connect;

    #[tokio::test]
    async fn connect_applies_session_pragmas_from_the_database_section() {
        let pool = connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            timeout_secs: 5,
        })
        .await
        .expect("pool should connect");

        let foreign_keys: i64 =
            sqlx::query_scalar("PRAGMA foreign_keys").fetch_one(&pool).await.expect("pragma");
        assert_eq!(foreign_keys, 1);

        pool.close().await;
    }
}
