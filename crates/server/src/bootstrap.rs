use std::sync::Arc;
use std::time::Duration as StdDuration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use courier_channels::adapter::ChannelAdapter;
use courier_channels::bridge::{HttpBridgeAdapter, HttpBridgeSettings};
use courier_channels::registry::AdapterRegistry;
use courier_core::audit::{AuditSink, InMemoryAuditSink};
use courier_core::config::{AppConfig, ConfigError, LoadOptions};
use courier_core::domain::channel::Channel;
use courier_core::outbox_engine::{OutboxEngine, OutboxEngineConfig};
use courier_db::repositories::{
    SqlContactRepository, SqlLeadRepository, SqlMessageRepository, SqlOutboxRepository,
    SqlSessionRepository, SqlTenantRepository, SqlWebhookAuditRepository,
};
use courier_db::{connect_with_settings, migrations, DbPool};
use courier_runtime::{
    DeliveryWorker, DeliveryWorkerConfig, InProcessEventQueue, IngestionService, MessageConsumer,
    OutboxService, SessionService, SessionServiceConfig,
};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub outbox: Arc<OutboxService>,
    pub ingestion: Arc<IngestionService>,
    pub sessions: Arc<SessionService>,
    pub background_tasks: Vec<JoinHandle<()>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("channel adapter setup failed: {0}")]
    Adapter(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let tenants = Arc::new(SqlTenantRepository::new(db_pool.clone()));
    let contacts = Arc::new(SqlContactRepository::new(db_pool.clone()));
    let leads = Arc::new(SqlLeadRepository::new(db_pool.clone()));
    let messages = Arc::new(SqlMessageRepository::new(db_pool.clone()));
    let outbox_repo = Arc::new(SqlOutboxRepository::new(db_pool.clone()));
    let sessions_repo = Arc::new(SqlSessionRepository::new(db_pool.clone()));
    let webhook_audit = Arc::new(SqlWebhookAuditRepository::new(db_pool.clone()));

    let audit: Arc<dyn AuditSink> = Arc::new(InMemoryAuditSink::default());
    let adapters = Arc::new(build_adapter_registry(&config)?);

    let engine_config = OutboxEngineConfig {
        max_attempts: config.outbox.max_attempts,
        retry_base_delay_seconds: config.outbox.retry_base_delay_secs as i64,
        retry_backoff_multiplier: config.outbox.retry_backoff_multiplier,
        retry_jitter_seconds: config.outbox.retry_jitter_secs as i64,
        claim_timeout_seconds: config.outbox.claim_timeout_secs as i64,
    };

    let outbox = Arc::new(OutboxService::new(
        tenants.clone(),
        leads.clone(),
        outbox_repo.clone(),
        OutboxEngine::new(engine_config.clone()),
        audit.clone(),
    ));

    let sessions = Arc::new(SessionService::new(
        sessions_repo,
        adapters.clone(),
        audit.clone(),
        SessionServiceConfig {
            start_timeout: StdDuration::from_secs(config.sessions.start_timeout_secs),
            second_factor_window: chrono::Duration::seconds(
                config.sessions.second_factor_window_secs as i64,
            ),
            sweep_interval: StdDuration::from_secs(config.sessions.sweep_interval_secs),
        },
    ));

    let (queue, receiver) = InProcessEventQueue::new();
    let ingestion = Arc::new(IngestionService::new(
        tenants.clone(),
        contacts,
        leads.clone(),
        webhook_audit,
        Arc::new(queue),
        sessions.clone(),
        audit.clone(),
    ));

    let mut background_tasks = Vec::new();

    let consumer = Arc::new(MessageConsumer::new(messages.clone(), leads, audit.clone()));
    background_tasks.push(consumer.spawn(receiver));

    for index in 0..config.outbox.worker_count.max(1) {
        let worker = Arc::new(DeliveryWorker::new(
            outbox_repo.clone(),
            messages.clone(),
            tenants.clone(),
            adapters.clone(),
            OutboxEngine::new(engine_config.clone()),
            audit.clone(),
            DeliveryWorkerConfig {
                worker_id: format!("delivery-{index}"),
                poll_interval: StdDuration::from_secs(config.outbox.poll_interval_secs),
                claim_batch_size: config.outbox.claim_batch_size,
                send_timeout: StdDuration::from_secs(config.outbox.send_timeout_secs),
            },
        ));
        background_tasks.push(worker.spawn());
    }

    background_tasks.push(sessions.clone().spawn_sweep());

    info!(
        event_name = "system.bootstrap.workers_started",
        correlation_id = "bootstrap",
        delivery_workers = config.outbox.worker_count.max(1),
        "background workers started"
    );

    Ok(Application { config, db_pool, outbox, ingestion, sessions, background_tasks })
}

/// One adapter per channel with a configured bridge URL. Channels without a
/// bridge fall back to the registry's no-op adapter and stay send-disabled.
fn build_adapter_registry(config: &AppConfig) -> Result<AdapterRegistry, BootstrapError> {
    let mut registry = AdapterRegistry::new();

    let bridges = [
        (Channel::Whatsapp, config.bridge.whatsapp_base_url.as_ref()),
        (Channel::Telegram, config.bridge.telegram_base_url.as_ref()),
    ];
    for (channel, base_url) in bridges {
        let Some(base_url) = base_url else {
            continue;
        };
        let adapter = HttpBridgeAdapter::new(
            channel,
            HttpBridgeSettings {
                base_url: base_url.clone(),
                auth_token: config.bridge.auth_token.clone(),
                request_timeout: StdDuration::from_secs(config.bridge.request_timeout_secs),
            },
        )
        .map_err(|error| BootstrapError::Adapter(error.to_string()))?;
        registry = registry.register(Arc::new(adapter) as Arc<dyn ChannelAdapter>);

        info!(
            event_name = "system.bootstrap.bridge_registered",
            correlation_id = "bootstrap",
            channel = channel.as_str(),
            "channel bridge adapter registered"
        );
    }

    Ok(registry)
}
