//! Event queue hand-off between ingestion and conversation persistence.
//!
//! Ingestion acknowledges a webhook as soon as the normalized event is on the
//! queue; everything that touches the conversation record afterwards runs on
//! the consumer and never blocks the webhook response.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use courier_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use courier_core::domain::lead::LeadStage;
use courier_core::domain::message::{Message, MessageDirection, MessageId, MessageStatus};
use courier_core::domain::webhook::NormalizedEvent;
use courier_core::errors::ApplicationError;
use courier_db::repositories::{LeadRepository, MessageRepository};

use crate::storage_error;

#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn publish(&self, event: NormalizedEvent) -> Result<(), ApplicationError>;
}

/// Single-process queue backed by an unbounded channel. A durable broker can
/// slot in behind the same trait without touching the ingestion pipeline.
pub struct InProcessEventQueue {
    sender: mpsc::UnboundedSender<NormalizedEvent>,
}

impl InProcessEventQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NormalizedEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventQueue for InProcessEventQueue {
    async fn publish(&self, event: NormalizedEvent) -> Result<(), ApplicationError> {
        self.sender
            .send(event)
            .map_err(|_| ApplicationError::Integration("event queue consumer is gone".to_string()))
    }
}

/// Downstream side of the queue: persists inbound messages and advances the
/// lead lifecycle.
pub struct MessageConsumer {
    messages: Arc<dyn MessageRepository>,
    leads: Arc<dyn LeadRepository>,
    audit: Arc<dyn AuditSink>,
}

impl MessageConsumer {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        leads: Arc<dyn LeadRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { messages, leads, audit }
    }

    /// Persist one normalized inbound event. The webhook audit log already
    /// filtered replays, so every event seen here is appended exactly once.
    pub async fn handle(&self, event: NormalizedEvent) -> Result<(), ApplicationError> {
        let now = Utc::now();

        self.messages
            .append(Message {
                id: MessageId(Uuid::new_v4()),
                lead_id: event.lead_id,
                direction: MessageDirection::Inbound,
                text: event.text.clone(),
                attachments: event.attachments.clone(),
                provider_message_id: Some(event.message_id.clone()),
                status: MessageStatus::Received,
                occurred_at: event.occurred_at,
                recorded_at: now,
            })
            .await
            .map_err(storage_error)?;

        // First inbound content moves a fresh lead into the engaged stage.
        let lead = self.leads.find_by_id(&event.lead_id).await.map_err(storage_error)?;
        if let Some(mut lead) = lead {
            if lead.stage == LeadStage::New {
                if let Some(change) = lead.advance_stage(LeadStage::Engaged, "first_inbound_message", now)
                {
                    self.leads.save(lead.clone()).await.map_err(storage_error)?;
                    self.leads.append_stage_change(change).await.map_err(storage_error)?;

                    info!(
                        event_name = "conversation.lead_engaged",
                        tenant_id = %event.tenant_id,
                        lead_id = %event.lead_id,
                        correlation_id = %event.message_id,
                        "lead engaged by first inbound message"
                    );
                }
            }
        }

        self.audit.emit(
            AuditEvent::new(
                Some(event.tenant_id),
                Some(event.lead_id),
                event.message_id.clone(),
                "inbound_message_recorded",
                AuditCategory::Identity,
                "message_consumer",
                AuditOutcome::Success,
            )
            .with_metadata("channel", event.channel.as_str()),
        );

        Ok(())
    }

    /// Drain the queue until every publisher has been dropped. Handler errors
    /// are logged and skipped; one poisoned event must not stall the queue.
    pub fn spawn(
        self: Arc<Self>,
        mut receiver: mpsc::UnboundedReceiver<NormalizedEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(error) = self.handle(event.clone()).await {
                    warn!(
                        tenant_id = %event.tenant_id,
                        lead_id = %event.lead_id,
                        correlation_id = %event.message_id,
                        error = %error,
                        "failed to persist inbound event; continuing consumer loop"
                    );
                }
            }
        })
    }
}
