pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod identity;
pub mod outbox_engine;
pub mod sessions;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::channel::Channel;
pub use domain::contact::{Contact, ContactId, ChannelIdentifier, IdentifierKind, SenderIdentifiers};
pub use domain::lead::{Lead, LeadId, LeadStage, LeadStageChange};
pub use domain::message::{Message, MessageDirection, MessageId, MessageStatus};
pub use domain::outbox::{ContentHash, OutboxItem, OutboxItemId, OutboxStatus};
pub use domain::session::{SessionErrorCode, SessionPhase, SessionState};
pub use domain::tenant::{ProviderSettings, Tenant, TenantId};
pub use domain::webhook::{
    EnvelopeViolation, InboundEnvelope, InboundEventType, NormalizedEvent, SessionSignal,
    WebhookAuditEvent,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use identity::{
    normalize_peer, resolution_candidates, DigitSwap, PhoneNormalization, ResolutionCandidates,
};
pub use outbox_engine::{FailureKind, OutboxEngine, OutboxEngineConfig, OutboxEngineError};
pub use sessions::{SessionAction, SessionEvent, SessionMachine, SessionTransitionError, SessionTransitionOutcome};
