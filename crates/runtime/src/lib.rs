//! Services wiring the domain engines to storage and channel adapters:
//! outbox admission and delivery workers, the inbound ingestion pipeline with
//! identity resolution, the login-session service with its deadline sweep,
//! and the in-process event queue plus its message consumer.

pub mod events;
pub mod ingestion;
pub mod outbox;
pub mod sessions;

pub use events::{EventQueue, InProcessEventQueue, MessageConsumer};
pub use ingestion::{IngestOutcome, IngestionService};
pub use outbox::{DeliveryWorker, DeliveryWorkerConfig, EnqueueOutcome, OutboxService, SendRequest};
pub use sessions::{SessionService, SessionServiceConfig, SessionStatus};

use courier_core::errors::ApplicationError;
use courier_db::repositories::RepositoryError;

pub(crate) fn storage_error(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}
