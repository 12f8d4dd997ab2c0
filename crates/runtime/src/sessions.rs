//! Login-session service: adapter calls, persistence, single-flight starts,
//! and deadline expiry (background sweep plus lazy checks on reads).
//!
//! Every phase change goes through the pure machine in `courier-core`; this
//! layer never edits phases by hand. Deadlines are persisted wall-clock
//! timestamps, so a restart loses nothing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use courier_channels::adapter::SecondFactorVerdict;
use courier_channels::registry::AdapterRegistry;
use courier_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use courier_core::domain::channel::Channel;
use courier_core::domain::session::{SessionErrorCode, SessionPhase, SessionState};
use courier_core::domain::tenant::TenantId;
use courier_core::domain::webhook::SessionSignal;
use courier_core::errors::{ApplicationError, DomainError};
use courier_core::sessions::{SessionEvent, SessionMachine, SessionTransitionError};
use courier_db::repositories::SessionRepository;

use crate::storage_error;

#[derive(Clone, Debug)]
pub struct SessionServiceConfig {
    /// Hard cap on one adapter login/second-factor/logout call.
    pub start_timeout: StdDuration,
    /// Window an operator gets to submit the second factor once demanded.
    pub second_factor_window: Duration,
    pub sweep_interval: StdDuration,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            start_timeout: StdDuration::from_secs(20),
            second_factor_window: Duration::seconds(120),
            sweep_interval: StdDuration::from_secs(30),
        }
    }
}

/// Status-read payload: the persisted record plus whether a manual `start`
/// would currently be honored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub restart_allowed: bool,
}

pub struct SessionService {
    sessions: Arc<dyn SessionRepository>,
    adapters: Arc<AdapterRegistry>,
    machine: SessionMachine,
    audit: Arc<dyn AuditSink>,
    config: SessionServiceConfig,
    starts_in_flight: Mutex<HashSet<(TenantId, Channel)>>,
}

impl SessionService {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        adapters: Arc<AdapterRegistry>,
        audit: Arc<dyn AuditSink>,
        config: SessionServiceConfig,
    ) -> Self {
        Self {
            sessions,
            adapters,
            machine: SessionMachine,
            audit,
            config,
            starts_in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Begin (or re-begin) a login. A still-live attempt is never interrupted:
    /// callers arriving while a code or second-factor window is active, or
    /// while another start is mid-adapter-call, get the current record back.
    pub async fn start(
        &self,
        tenant_id: TenantId,
        channel: Channel,
    ) -> Result<SessionStatus, ApplicationError> {
        let now = Utc::now();
        let current = self.load_current(tenant_id, channel, now).await?;

        if !current.restart_allowed(now) {
            return Ok(self.status_of(current, now));
        }

        let key = (tenant_id, channel);
        {
            let mut in_flight = self.starts_in_flight.lock().await;
            if !in_flight.insert(key) {
                return Ok(self.status_of(current, now));
            }
        }

        let result = self.issue_code(current, now).await;
        self.starts_in_flight.lock().await.remove(&key);

        let state = result?;
        Ok(self.status_of(state, now))
    }

    async fn issue_code(
        &self,
        current: SessionState,
        now: DateTime<Utc>,
    ) -> Result<SessionState, ApplicationError> {
        let adapter = self.adapters.get(current.channel);
        let attempt =
            tokio::time::timeout(self.config.start_timeout, adapter.start_login(&current.tenant_id))
                .await;

        let code = match attempt {
            Ok(Ok(code)) => code,
            Ok(Err(error)) => {
                return Err(self.record_adapter_outage(current, now, error.to_string()).await);
            }
            Err(_) => {
                let reason = format!(
                    "start_login timed out after {}s",
                    self.config.start_timeout.as_secs()
                );
                return Err(self.record_adapter_outage(current, now, reason).await);
            }
        };

        let (next, outcome) = self
            .machine
            .apply(
                &current,
                &SessionEvent::StartIssued { code_id: code.code_id, expires_at: code.expires_at },
                now,
            )
            .map_err(|error| ApplicationError::from(DomainError::from(error)))?;
        self.sessions.save(next.clone()).await.map_err(storage_error)?;

        info!(
            event_name = "session.start_issued",
            tenant_id = %next.tenant_id,
            channel = next.channel.as_str(),
            correlation_id = next.code_id.as_deref().unwrap_or("unknown"),
            from = outcome.from.as_str(),
            "login code issued"
        );
        self.emit_transition(&next, "session_start_issued", AuditOutcome::Success);

        Ok(next)
    }

    pub async fn submit_second_factor(
        &self,
        tenant_id: TenantId,
        channel: Channel,
        secret: &SecretString,
    ) -> Result<SessionStatus, ApplicationError> {
        let now = Utc::now();
        let current = self.load_current(tenant_id, channel, now).await?;

        if current.phase != SessionPhase::Needs2fa {
            return Err(DomainError::from(SessionTransitionError::InvalidTransition {
                phase: current.phase,
                event: "second_factor_submitted",
            })
            .into());
        }

        let adapter = self.adapters.get(channel);
        let attempt = tokio::time::timeout(
            self.config.start_timeout,
            adapter.submit_second_factor(&tenant_id, secret.expose_secret()),
        )
        .await;

        let verdict = match attempt {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(error)) => {
                return Err(self.record_adapter_outage(current, now, error.to_string()).await);
            }
            Err(_) => {
                return Err(self
                    .record_adapter_outage(current, now, "second factor call timed out".to_string())
                    .await);
            }
        };

        let event = match verdict {
            SecondFactorVerdict::Accepted => SessionEvent::TwoFactorAccepted,
            SecondFactorVerdict::Rejected => SessionEvent::TwoFactorRejected,
        };
        let (next, outcome) = self
            .machine
            .apply(&current, &event, now)
            .map_err(|error| ApplicationError::from(DomainError::from(error)))?;
        self.sessions.save(next.clone()).await.map_err(storage_error)?;

        let audit_outcome = match verdict {
            SecondFactorVerdict::Accepted => AuditOutcome::Success,
            SecondFactorVerdict::Rejected => AuditOutcome::Rejected,
        };
        info!(
            event_name = "session.second_factor",
            tenant_id = %next.tenant_id,
            channel = next.channel.as_str(),
            correlation_id = %next.tenant_id,
            to = outcome.to.as_str(),
            "second factor processed"
        );
        self.emit_transition(&next, "session_second_factor", audit_outcome);

        Ok(self.status_of(next, now))
    }

    pub async fn logout(
        &self,
        tenant_id: TenantId,
        channel: Channel,
    ) -> Result<SessionStatus, ApplicationError> {
        let now = Utc::now();
        let current = self.load_current(tenant_id, channel, now).await?;

        let (next, _outcome) = self
            .machine
            .apply(&current, &SessionEvent::LogoutRequested, now)
            .map_err(|error| ApplicationError::from(DomainError::from(error)))?;

        // Best effort on the provider side; the local record disconnects
        // either way so artifacts cannot outlive the operator's intent.
        let adapter = self.adapters.get(channel);
        let attempt =
            tokio::time::timeout(self.config.start_timeout, adapter.logout(&tenant_id)).await;
        match attempt {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(
                    tenant_id = %tenant_id,
                    channel = channel.as_str(),
                    error = %error,
                    "provider logout failed; disconnecting locally"
                );
            }
            Err(_) => {
                warn!(
                    tenant_id = %tenant_id,
                    channel = channel.as_str(),
                    "provider logout timed out; disconnecting locally"
                );
            }
        }

        self.sessions.save(next.clone()).await.map_err(storage_error)?;
        self.emit_transition(&next, "session_logout", AuditOutcome::Success);

        Ok(self.status_of(next, now))
    }

    /// Current record with lazy expiry already applied.
    pub async fn status(
        &self,
        tenant_id: TenantId,
        channel: Channel,
    ) -> Result<SessionStatus, ApplicationError> {
        let now = Utc::now();
        let state = self.load_current(tenant_id, channel, now).await?;
        Ok(self.status_of(state, now))
    }

    /// Provider-pushed session signal, already authenticated and deduplicated
    /// by the ingestion pipeline.
    pub async fn apply_signal(
        &self,
        tenant_id: TenantId,
        channel: Channel,
        signal: SessionSignal,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let current = self.load_current(tenant_id, channel, now).await?;
        let event = match signal {
            SessionSignal::TwoFactorRequired => {
                SessionEvent::TwoFactorRequired { deadline: now + self.config.second_factor_window }
            }
            SessionSignal::ScanConfirmed => SessionEvent::ScanConfirmed,
            SessionSignal::Revoked => SessionEvent::ExternalInvalidated,
        };

        match self.machine.apply(&current, &event, now) {
            Ok((next, outcome)) => {
                self.sessions.save(next.clone()).await.map_err(storage_error)?;
                info!(
                    event_name = "session.signal_applied",
                    tenant_id = %tenant_id,
                    channel = channel.as_str(),
                    correlation_id = %tenant_id,
                    signal = signal.as_str(),
                    to = outcome.to.as_str(),
                    "provider session signal applied"
                );
                self.emit_transition(&next, "session_signal", AuditOutcome::Success);
            }
            // Signals race against operator actions and sweeps; a stale one
            // is dropped, not surfaced as a failure.
            Err(error) => {
                warn!(
                    tenant_id = %tenant_id,
                    channel = channel.as_str(),
                    signal = signal.as_str(),
                    error = %error,
                    "ignoring out-of-order session signal"
                );
                self.emit_transition(&current, "session_signal_ignored", AuditOutcome::Rejected);
            }
        }

        Ok(())
    }

    /// Provider pushed a (possibly rotated) login code through the webhook.
    pub async fn record_login_code(
        &self,
        tenant_id: TenantId,
        channel: Channel,
        code_id: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let current = self.load_current(tenant_id, channel, now).await?;
        let event = if current.phase == SessionPhase::WaitingQr {
            SessionEvent::CodeRefreshed { code_id, expires_at }
        } else {
            SessionEvent::StartIssued { code_id, expires_at }
        };

        let (next, _outcome) = self
            .machine
            .apply(&current, &event, now)
            .map_err(|error| ApplicationError::from(DomainError::from(error)))?;
        self.sessions.save(next.clone()).await.map_err(storage_error)?;
        self.emit_transition(&next, "session_code_recorded", AuditOutcome::Success);

        Ok(())
    }

    /// Expire every session whose persisted deadline has passed. Returns how
    /// many records were disconnected.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, ApplicationError> {
        let elapsed = self.sessions.list_deadline_elapsed(now).await.map_err(storage_error)?;

        let mut expired = 0;
        for state in elapsed {
            if let Some((next, outcome)) = self.machine.expire_if_due(&state, now) {
                self.sessions.save(next.clone()).await.map_err(storage_error)?;
                expired += 1;
                info!(
                    event_name = "session.deadline_expired",
                    tenant_id = %next.tenant_id,
                    channel = next.channel.as_str(),
                    correlation_id = %next.tenant_id,
                    last_error =
                        outcome.last_error.map(|code| code.as_str()).unwrap_or("unknown"),
                    "session disconnected by deadline sweep"
                );
                self.emit_transition(&next, "session_deadline_expired", AuditOutcome::Failed);
            }
        }

        Ok(expired)
    }

    pub fn spawn_sweep(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.config.sweep_interval).await;
                if let Err(error) = self.sweep_once(Utc::now()).await {
                    warn!(error = %error, "session sweep pass failed");
                }
            }
        })
    }

    async fn load_current(
        &self,
        tenant_id: TenantId,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Result<SessionState, ApplicationError> {
        let stored = self.sessions.get(&tenant_id, channel).await.map_err(storage_error)?;
        let state =
            stored.unwrap_or_else(|| SessionState::disconnected(tenant_id, channel, now));

        // Lazy expiry: a read is as good as a sweep tick.
        if let Some((expired, _outcome)) = self.machine.expire_if_due(&state, now) {
            self.sessions.save(expired.clone()).await.map_err(storage_error)?;
            self.emit_transition(&expired, "session_deadline_expired", AuditOutcome::Failed);
            return Ok(expired);
        }

        Ok(state)
    }

    /// Adapter failure during an operator call: note it on the record without
    /// moving the phase, then surface the integration error.
    async fn record_adapter_outage(
        &self,
        mut current: SessionState,
        now: DateTime<Utc>,
        reason: String,
    ) -> ApplicationError {
        current.last_error = Some(SessionErrorCode::AdapterUnavailable);
        current.updated_at = now;
        if let Err(error) = self.sessions.save(current.clone()).await {
            warn!(
                tenant_id = %current.tenant_id,
                channel = current.channel.as_str(),
                error = %error,
                "could not persist adapter outage marker"
            );
        }
        self.emit_transition(&current, "session_adapter_outage", AuditOutcome::Failed);

        ApplicationError::Integration(reason)
    }

    fn status_of(&self, state: SessionState, now: DateTime<Utc>) -> SessionStatus {
        let restart_allowed = state.restart_allowed(now);
        SessionStatus { state, restart_allowed }
    }

    fn emit_transition(&self, state: &SessionState, event_type: &str, outcome: AuditOutcome) {
        self.audit.emit(
            AuditEvent::new(
                Some(state.tenant_id),
                None,
                state.tenant_id.to_string(),
                event_type,
                AuditCategory::Session,
                "session_service",
                outcome,
            )
            .with_metadata("channel", state.channel.as_str())
            .with_metadata("phase", state.phase.as_str()),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use secrecy::SecretString;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use courier_channels::adapter::{
        AdapterError, ChannelAdapter, LoginCode, SecondFactorVerdict, SendReceipt,
    };
    use courier_channels::registry::AdapterRegistry;
    use courier_core::audit::InMemoryAuditSink;
    use courier_core::domain::channel::Channel;
    use courier_core::domain::session::{SessionErrorCode, SessionPhase};
    use courier_core::domain::tenant::TenantId;
    use courier_core::domain::webhook::SessionSignal;
    use courier_core::errors::ApplicationError;
    use courier_db::repositories::{InMemorySessionRepository, SessionRepository};

    use super::{SessionService, SessionServiceConfig};

    struct ScriptedSessionAdapter {
        channel: Channel,
        login_results: Mutex<VecDeque<Result<LoginCode, AdapterError>>>,
        verdicts: Mutex<VecDeque<Result<SecondFactorVerdict, AdapterError>>>,
        start_calls: Mutex<usize>,
        logout_calls: Mutex<usize>,
    }

    impl ScriptedSessionAdapter {
        fn new(channel: Channel) -> Self {
            Self {
                channel,
                login_results: Mutex::new(VecDeque::new()),
                verdicts: Mutex::new(VecDeque::new()),
                start_calls: Mutex::new(0),
                logout_calls: Mutex::new(0),
            }
        }

        async fn push_login(&self, result: Result<LoginCode, AdapterError>) {
            self.login_results.lock().await.push_back(result);
        }

        async fn push_verdict(&self, result: Result<SecondFactorVerdict, AdapterError>) {
            self.verdicts.lock().await.push_back(result);
        }

        async fn start_calls(&self) -> usize {
            *self.start_calls.lock().await
        }
    }

    #[async_trait]
    impl ChannelAdapter for ScriptedSessionAdapter {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(
            &self,
            _tenant_id: &TenantId,
            _to_peer: &str,
            _text: &str,
            _attachments: &[String],
        ) -> Result<SendReceipt, AdapterError> {
            Err(AdapterError::Unreachable("not scripted".to_string()))
        }

        async fn start_login(&self, _tenant_id: &TenantId) -> Result<LoginCode, AdapterError> {
            *self.start_calls.lock().await += 1;
            self.login_results
                .lock()
                .await
                .pop_front()
                .unwrap_or(Err(AdapterError::Unreachable("script exhausted".to_string())))
        }

        async fn submit_second_factor(
            &self,
            _tenant_id: &TenantId,
            _password: &str,
        ) -> Result<SecondFactorVerdict, AdapterError> {
            self.verdicts
                .lock()
                .await
                .pop_front()
                .unwrap_or(Err(AdapterError::Unreachable("script exhausted".to_string())))
        }

        async fn logout(&self, _tenant_id: &TenantId) -> Result<(), AdapterError> {
            *self.logout_calls.lock().await += 1;
            Ok(())
        }
    }

    fn service(
        adapter: Arc<ScriptedSessionAdapter>,
    ) -> (SessionService, Arc<InMemorySessionRepository>) {
        let sessions = Arc::new(InMemorySessionRepository::default());
        let registry = Arc::new(AdapterRegistry::new().register(adapter));
        let service = SessionService::new(
            sessions.clone(),
            registry,
            Arc::new(InMemoryAuditSink::default()),
            SessionServiceConfig::default(),
        );
        (service, sessions)
    }

    fn login_code(code_id: &str, ttl_seconds: i64) -> LoginCode {
        LoginCode {
            code_id: code_id.to_string(),
            payload: "qr-payload".to_string(),
            expires_at: Utc::now() + Duration::seconds(ttl_seconds),
        }
    }

    #[tokio::test]
    async fn start_issues_code_and_persists_absolute_expiry() {
        let adapter = Arc::new(ScriptedSessionAdapter::new(Channel::Whatsapp));
        adapter.push_login(Ok(login_code("qr-1", 60))).await;
        let (service, sessions) = service(adapter);
        let tenant_id = TenantId(Uuid::new_v4());

        let status = service.start(tenant_id, Channel::Whatsapp).await.unwrap();
        assert_eq!(status.state.phase, SessionPhase::WaitingQr);
        assert_eq!(status.state.code_id.as_deref(), Some("qr-1"));
        assert!(!status.restart_allowed, "live code blocks manual restart");

        let stored = sessions.get(&tenant_id, Channel::Whatsapp).await.unwrap().unwrap();
        assert!(stored.code_expires_at.is_some());
    }

    #[tokio::test]
    async fn start_while_code_is_live_collapses_onto_existing_attempt() {
        let adapter = Arc::new(ScriptedSessionAdapter::new(Channel::Whatsapp));
        adapter.push_login(Ok(login_code("qr-1", 60))).await;
        adapter.push_login(Ok(login_code("qr-2", 60))).await;
        let (service, _) = service(adapter.clone());
        let tenant_id = TenantId(Uuid::new_v4());

        service.start(tenant_id, Channel::Whatsapp).await.unwrap();
        let second = service.start(tenant_id, Channel::Whatsapp).await.unwrap();

        assert_eq!(second.state.code_id.as_deref(), Some("qr-1"));
        assert_eq!(adapter.start_calls().await, 1, "live attempt must not be interrupted");
    }

    #[tokio::test]
    async fn second_factor_reject_keeps_deadline_then_accept_authorizes() {
        let adapter = Arc::new(ScriptedSessionAdapter::new(Channel::Telegram));
        adapter.push_login(Ok(login_code("qr-1", 60))).await;
        adapter.push_verdict(Ok(SecondFactorVerdict::Rejected)).await;
        adapter.push_verdict(Ok(SecondFactorVerdict::Accepted)).await;
        let (service, _) = service(adapter);
        let tenant_id = TenantId(Uuid::new_v4());
        let secret = SecretString::from("hunter2");

        service.start(tenant_id, Channel::Telegram).await.unwrap();
        service
            .apply_signal(tenant_id, Channel::Telegram, SessionSignal::TwoFactorRequired, Utc::now())
            .await
            .unwrap();

        let rejected =
            service.submit_second_factor(tenant_id, Channel::Telegram, &secret).await.unwrap();
        assert_eq!(rejected.state.phase, SessionPhase::Needs2fa);
        assert_eq!(rejected.state.last_error, Some(SessionErrorCode::InvalidPassword));
        let deadline = rejected.state.second_factor_deadline;
        assert!(deadline.is_some());

        let accepted =
            service.submit_second_factor(tenant_id, Channel::Telegram, &secret).await.unwrap();
        assert_eq!(accepted.state.phase, SessionPhase::Authorized);
        assert!(accepted.state.last_error.is_none());
    }

    #[tokio::test]
    async fn second_factor_outside_needs_2fa_is_a_domain_error() {
        let adapter = Arc::new(ScriptedSessionAdapter::new(Channel::Whatsapp));
        let (service, _) = service(adapter);
        let tenant_id = TenantId(Uuid::new_v4());
        let secret = SecretString::from("hunter2");

        let error = service
            .submit_second_factor(tenant_id, Channel::Whatsapp, &secret)
            .await
            .expect_err("must reject");
        assert!(matches!(error, ApplicationError::Domain(_)));
    }

    #[tokio::test]
    async fn expired_code_disconnects_with_qr_timeout_on_sweep() {
        let adapter = Arc::new(ScriptedSessionAdapter::new(Channel::Whatsapp));
        adapter.push_login(Ok(login_code("qr-1", 30))).await;
        let (service, sessions) = service(adapter);
        let tenant_id = TenantId(Uuid::new_v4());

        service.start(tenant_id, Channel::Whatsapp).await.unwrap();

        let expired = service.sweep_once(Utc::now() + Duration::seconds(31)).await.unwrap();
        assert_eq!(expired, 1);

        let stored = sessions.get(&tenant_id, Channel::Whatsapp).await.unwrap().unwrap();
        assert_eq!(stored.phase, SessionPhase::Disconnected);
        assert_eq!(stored.last_error, Some(SessionErrorCode::QrLoginTimeout));
    }

    #[tokio::test]
    async fn status_read_lazily_expires_a_due_deadline() {
        let adapter = Arc::new(ScriptedSessionAdapter::new(Channel::Whatsapp));
        adapter.push_login(Ok(login_code("qr-1", -1))).await;
        let (service, _) = service(adapter);
        let tenant_id = TenantId(Uuid::new_v4());

        service.start(tenant_id, Channel::Whatsapp).await.unwrap();

        let status = service.status(tenant_id, Channel::Whatsapp).await.unwrap();
        assert_eq!(status.state.phase, SessionPhase::Disconnected);
        assert_eq!(status.state.last_error, Some(SessionErrorCode::QrLoginTimeout));
        assert!(status.restart_allowed);
    }

    #[tokio::test]
    async fn adapter_outage_surfaces_integration_error_and_marks_record() {
        let adapter = Arc::new(ScriptedSessionAdapter::new(Channel::Whatsapp));
        adapter.push_login(Err(AdapterError::Unreachable("bridge down".to_string()))).await;
        let (service, sessions) = service(adapter);
        let tenant_id = TenantId(Uuid::new_v4());

        let error = service.start(tenant_id, Channel::Whatsapp).await.expect_err("must fail");
        assert!(matches!(error, ApplicationError::Integration(_)));

        let stored = sessions.get(&tenant_id, Channel::Whatsapp).await.unwrap().unwrap();
        assert_eq!(stored.phase, SessionPhase::Disconnected);
        assert_eq!(stored.last_error, Some(SessionErrorCode::AdapterUnavailable));
    }

    #[tokio::test]
    async fn revoked_signal_disconnects_an_authorized_session() {
        let adapter = Arc::new(ScriptedSessionAdapter::new(Channel::Whatsapp));
        adapter.push_login(Ok(login_code("qr-1", 60))).await;
        let (service, sessions) = service(adapter);
        let tenant_id = TenantId(Uuid::new_v4());

        service.start(tenant_id, Channel::Whatsapp).await.unwrap();
        service
            .apply_signal(tenant_id, Channel::Whatsapp, SessionSignal::ScanConfirmed, Utc::now())
            .await
            .unwrap();
        service
            .apply_signal(tenant_id, Channel::Whatsapp, SessionSignal::Revoked, Utc::now())
            .await
            .unwrap();

        let stored = sessions.get(&tenant_id, Channel::Whatsapp).await.unwrap().unwrap();
        assert_eq!(stored.phase, SessionPhase::Disconnected);
        assert_eq!(stored.last_error, Some(SessionErrorCode::Revoked));
    }

    #[tokio::test]
    async fn logout_requires_an_authorized_session() {
        let adapter = Arc::new(ScriptedSessionAdapter::new(Channel::Whatsapp));
        adapter.push_login(Ok(login_code("qr-1", 60))).await;
        let (service, _) = service(adapter.clone());
        let tenant_id = TenantId(Uuid::new_v4());

        let error =
            service.logout(tenant_id, Channel::Whatsapp).await.expect_err("logout from disconnected");
        assert!(matches!(error, ApplicationError::Domain(_)));

        service.start(tenant_id, Channel::Whatsapp).await.unwrap();
        service
            .apply_signal(tenant_id, Channel::Whatsapp, SessionSignal::ScanConfirmed, Utc::now())
            .await
            .unwrap();

        let status = service.logout(tenant_id, Channel::Whatsapp).await.unwrap();
        assert_eq!(status.state.phase, SessionPhase::Disconnected);
        assert_eq!(*adapter.logout_calls.lock().await, 1);
    }
}
