//! HTTP API surface.
//!
//! - `POST /webhooks/{channel}`                      — provider event intake
//! - `POST /api/v1/messages/send`                    — enqueue an outbound message
//! - `POST /api/v1/sessions/{channel}/start`         — begin a login attempt
//! - `POST /api/v1/sessions/{channel}/second-factor` — submit the 2FA secret
//! - `POST /api/v1/sessions/{channel}/logout`        — disconnect a session
//! - `GET  /api/v1/sessions/{channel}`               — read session status

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_core::domain::channel::Channel;
use courier_core::domain::tenant::TenantId;
use courier_core::domain::webhook::InboundEnvelope;
use courier_core::errors::{ApplicationError, InterfaceError};
use courier_runtime::{
    EnqueueOutcome, IngestOutcome, IngestionService, OutboxService, SendRequest, SessionService,
    SessionStatus,
};

const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Clone)]
pub struct AppState {
    pub outbox: Arc<OutboxService>,
    pub ingestion: Arc<IngestionService>,
    pub sessions: Arc<SessionService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/{channel}", post(receive_webhook))
        .route("/api/v1/messages/send", post(send_message))
        .route("/api/v1/sessions/{channel}/start", post(start_session))
        .route("/api/v1/sessions/{channel}/second-factor", post(submit_second_factor))
        .route("/api/v1/sessions/{channel}/logout", post(logout_session))
        .route("/api/v1/sessions/{channel}", get(session_status))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub tenant_id: TenantId,
    pub channel: Channel,
    pub to: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub tenant_id: TenantId,
}

#[derive(Debug, Deserialize)]
pub struct SecondFactorRequest {
    pub tenant_id: TenantId,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionStatusQuery {
    pub tenant_id: TenantId,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: &'static str,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

impl ApiError {
    fn bad_request(message: &'static str, correlation_id: String) -> Self {
        Self { status: StatusCode::BAD_REQUEST, body: ApiErrorBody { error: message, correlation_id } }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<InterfaceError> for ApiError {
    fn from(error: InterfaceError) -> Self {
        let status = match &error {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let correlation_id = match &error {
            InterfaceError::BadRequest { correlation_id, .. }
            | InterfaceError::Unauthorized { correlation_id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id, .. }
            | InterfaceError::Internal { correlation_id, .. } => correlation_id.clone(),
        };
        Self { status, body: ApiErrorBody { error: error.user_message(), correlation_id } }
    }
}

fn map_error(error: ApplicationError, correlation_id: &str) -> ApiError {
    error.into_interface(correlation_id).into()
}

fn parse_channel(raw: &str, correlation_id: String) -> Result<Channel, ApiError> {
    Channel::parse(raw)
        .ok_or_else(|| ApiError::bad_request("Unknown channel in request path.", correlation_id))
}

fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    Json(envelope): Json<InboundEnvelope>,
) -> Result<Json<IngestOutcome>, ApiError> {
    let correlation_id = new_correlation_id();
    let channel = parse_channel(&channel, correlation_id.clone())?;
    if envelope.channel != channel {
        return Err(ApiError::bad_request(
            "Envelope channel does not match the request path.",
            correlation_id,
        ));
    }

    let presented_secret = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let outcome = state
        .ingestion
        .ingest(envelope, presented_secret, &correlation_id)
        .await
        .map_err(|error| map_error(error, &correlation_id))?;
    Ok(Json(outcome))
}

pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<EnqueueOutcome>), ApiError> {
    let correlation_id = new_correlation_id();

    let outcome = state
        .outbox
        .enqueue(
            SendRequest {
                tenant_id: request.tenant_id,
                channel: request.channel,
                to: request.to,
                text: request.text,
                attachments: request.attachments,
            },
            &correlation_id,
        )
        .await
        .map_err(|error| map_error(error, &correlation_id))?;

    let status = match &outcome {
        EnqueueOutcome::Accepted { .. } => StatusCode::ACCEPTED,
        EnqueueOutcome::Declined { .. }
        | EnqueueOutcome::NotAllowed { .. }
        | EnqueueOutcome::NoLead { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    };
    Ok((status, Json(outcome)))
}

pub async fn start_session(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<SessionStatus>, ApiError> {
    let correlation_id = new_correlation_id();
    let channel = parse_channel(&channel, correlation_id.clone())?;

    let status = state
        .sessions
        .start(request.tenant_id, channel)
        .await
        .map_err(|error| map_error(error, &correlation_id))?;
    Ok(Json(status))
}

pub async fn submit_second_factor(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(request): Json<SecondFactorRequest>,
) -> Result<Json<SessionStatus>, ApiError> {
    let correlation_id = new_correlation_id();
    let channel = parse_channel(&channel, correlation_id.clone())?;
    let secret = SecretString::from(request.password);

    let status = state
        .sessions
        .submit_second_factor(request.tenant_id, channel, &secret)
        .await
        .map_err(|error| map_error(error, &correlation_id))?;
    Ok(Json(status))
}

pub async fn logout_session(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<SessionStatus>, ApiError> {
    let correlation_id = new_correlation_id();
    let channel = parse_channel(&channel, correlation_id.clone())?;

    let status = state
        .sessions
        .logout(request.tenant_id, channel)
        .await
        .map_err(|error| map_error(error, &correlation_id))?;
    Ok(Json(status))
}

pub async fn session_status(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Query(query): Query<SessionStatusQuery>,
) -> Result<Json<SessionStatus>, ApiError> {
    let correlation_id = new_correlation_id();
    let channel = parse_channel(&channel, correlation_id.clone())?;

    let status = state
        .sessions
        .status(query.tenant_id, channel)
        .await
        .map_err(|error| map_error(error, &correlation_id))?;
    Ok(Json(status))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use axum::Json;
    use chrono::Utc;
    use uuid::Uuid;

    use courier_channels::registry::AdapterRegistry;
    use courier_core::audit::InMemoryAuditSink;
    use courier_core::domain::channel::Channel;
    use courier_core::domain::contact::SenderIdentifiers;
    use courier_core::domain::session::SessionPhase;
    use courier_core::domain::tenant::{ProviderSettings, TenantId};
    use courier_core::domain::webhook::{InboundEnvelope, InboundEventType};
    use courier_core::identity::PhoneNormalization;
    use courier_core::outbox_engine::{OutboxEngine, OutboxEngineConfig};
    use courier_db::repositories::{
        InMemoryContactRepository, InMemoryLeadRepository, InMemoryOutboxRepository,
        InMemorySessionRepository, InMemoryTenantRepository, InMemoryWebhookAuditRepository,
        TenantRepository,
    };
    use courier_runtime::{
        EnqueueOutcome, InProcessEventQueue, IngestOutcome, IngestionService, OutboxService,
        SessionService, SessionServiceConfig,
    };

    use super::{
        receive_webhook, send_message, session_status, AppState, SendMessageRequest,
        SessionStatusQuery,
    };

    fn engine() -> OutboxEngine {
        OutboxEngine::new(OutboxEngineConfig {
            max_attempts: 3,
            retry_base_delay_seconds: 10,
            retry_backoff_multiplier: 2,
            retry_jitter_seconds: 0,
            claim_timeout_seconds: 120,
        })
    }

    async fn state_with_tenant() -> (AppState, TenantId) {
        let tenants = Arc::new(InMemoryTenantRepository::default());
        let contacts = Arc::new(InMemoryContactRepository::default());
        let leads = Arc::new(InMemoryLeadRepository::default());
        let outbox_repo = Arc::new(InMemoryOutboxRepository::default());
        let sessions_repo = Arc::new(InMemorySessionRepository::default());
        let webhook_audit = Arc::new(InMemoryWebhookAuditRepository::default());
        let audit = Arc::new(InMemoryAuditSink::default());
        let tenant_id = TenantId(Uuid::new_v4());

        tenants
            .save_provider_settings(ProviderSettings {
                tenant_id,
                channel: Channel::Whatsapp,
                enabled: true,
                webhook_secret: "hook-secret".to_string(),
                allow_list: None,
                normalization: PhoneNormalization {
                    default_country_prefix: Some("1".to_string()),
                    leading_digit_swap: None,
                },
                secret_issued_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let adapters = Arc::new(AdapterRegistry::new());
        let sessions = Arc::new(SessionService::new(
            sessions_repo,
            adapters,
            audit.clone(),
            SessionServiceConfig::default(),
        ));
        let (queue, _receiver) = InProcessEventQueue::new();
        // The receiver is dropped: these tests stop at the queue boundary.
        let ingestion = Arc::new(IngestionService::new(
            tenants.clone(),
            contacts,
            leads.clone(),
            webhook_audit,
            Arc::new(queue),
            sessions.clone(),
            audit.clone(),
        ));
        let outbox =
            Arc::new(OutboxService::new(tenants, leads, outbox_repo, engine(), audit));

        (AppState { outbox, ingestion, sessions }, tenant_id)
    }

    fn secret_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-webhook-secret", HeaderValue::from_str(value).unwrap());
        headers
    }

    fn session_status_envelope(tenant_id: TenantId) -> InboundEnvelope {
        InboundEnvelope {
            tenant_id,
            channel: Channel::Whatsapp,
            event_type: InboundEventType::SessionStatus,
            message_id: "evt-1".to_string(),
            sender: SenderIdentifiers::default(),
            text: None,
            attachments: Vec::new(),
            session_signal: Some(courier_core::domain::webhook::SessionSignal::ScanConfirmed),
            code_id: None,
            code_expires_at: None,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn webhook_with_wrong_secret_returns_unauthorized() {
        let (state, tenant_id) = state_with_tenant().await;

        let result = receive_webhook(
            State(state),
            Path("whatsapp".to_string()),
            secret_headers("wrong"),
            Json(session_status_envelope(tenant_id)),
        )
        .await;

        let error = result.err().expect("must reject");
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_channel_mismatch_is_a_bad_request() {
        let (state, tenant_id) = state_with_tenant().await;

        let result = receive_webhook(
            State(state),
            Path("telegram".to_string()),
            secret_headers("hook-secret"),
            Json(session_status_envelope(tenant_id)),
        )
        .await;

        let error = result.err().expect("must reject");
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn webhook_routes_a_session_signal() {
        let (state, tenant_id) = state_with_tenant().await;

        // A scan-confirmed signal with no prior session is stale and dropped,
        // but the webhook is still acknowledged as routed.
        let Json(outcome) = receive_webhook(
            State(state),
            Path("whatsapp".to_string()),
            secret_headers("hook-secret"),
            Json(session_status_envelope(tenant_id)),
        )
        .await
        .expect("must accept");
        assert_eq!(outcome, IngestOutcome::SessionRouted);
    }

    #[tokio::test]
    async fn send_to_unknown_peer_is_unprocessable() {
        let (state, tenant_id) = state_with_tenant().await;

        let (status, Json(outcome)) = send_message(
            State(state),
            Json(SendMessageRequest {
                tenant_id,
                channel: Channel::Whatsapp,
                to: "+1 555 999 0000".to_string(),
                text: "hello".to_string(),
                attachments: Vec::new(),
            }),
        )
        .await
        .expect("handler must answer");

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(matches!(outcome, EnqueueOutcome::NoLead { .. }));
    }

    #[tokio::test]
    async fn session_status_defaults_to_disconnected() {
        let (state, tenant_id) = state_with_tenant().await;

        let Json(status) = session_status(
            State(state),
            Path("whatsapp".to_string()),
            Query(SessionStatusQuery { tenant_id }),
        )
        .await
        .expect("status read must succeed");

        assert_eq!(status.state.phase, SessionPhase::Disconnected);
        assert!(status.restart_allowed);
    }

    #[tokio::test]
    async fn unknown_channel_in_path_is_a_bad_request() {
        let (state, tenant_id) = state_with_tenant().await;

        let result = session_status(
            State(state),
            Path("carrier-pigeon".to_string()),
            Query(SessionStatusQuery { tenant_id }),
        )
        .await;

        let error = result.err().expect("must reject");
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
