use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use courier_core::domain::channel::Channel;
use courier_core::domain::tenant::TenantId;
use courier_core::outbox_engine::FailureKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("provider request timed out: {0}")]
    Timeout(String),
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    #[error("unexpected provider response: {0}")]
    Protocol(String),
}

impl AdapterError {
    /// How a delivery attempt that hit this error should be treated by the
    /// retry machinery.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) => FailureKind::Transient,
            Self::Rejected(_) | Self::Protocol(_) => FailureKind::Fatal,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_message_id: Option<String>,
}

/// Fresh login code handed back by a provider when a session start is issued.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginCode {
    pub code_id: String,
    /// Provider-rendered payload the operator presents (QR content or
    /// similar).
    pub payload: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondFactorVerdict {
    Accepted,
    Rejected,
}

/// Provider-facing surface for one channel. Implementations talk to the
/// external bridge process; everything above this trait stays provider
/// agnostic.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(
        &self,
        tenant_id: &TenantId,
        to_peer: &str,
        text: &str,
        attachments: &[String],
    ) -> Result<SendReceipt, AdapterError>;

    async fn start_login(&self, tenant_id: &TenantId) -> Result<LoginCode, AdapterError>;

    async fn submit_second_factor(
        &self,
        tenant_id: &TenantId,
        password: &str,
    ) -> Result<SecondFactorVerdict, AdapterError>;

    async fn logout(&self, tenant_id: &TenantId) -> Result<(), AdapterError>;
}

/// Stands in for a channel with no configured bridge; every operation fails
/// as transiently unreachable.
pub struct NoopChannelAdapter {
    channel: Channel,
}

impl NoopChannelAdapter {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    fn unconfigured(&self) -> AdapterError {
        AdapterError::Unreachable(format!("no bridge configured for {}", self.channel.as_str()))
    }
}

#[async_trait]
impl ChannelAdapter for NoopChannelAdapter {
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
        Err(self.unconfigured())
    }

    async fn start_login(&self, _tenant_id: &TenantId) -> Result<LoginCode, AdapterError> {
        Err(self.unconfigured())
    }

    async fn submit_second_factor(
        &self,
        _tenant_id: &TenantId,
        _password: &str,
    ) -> Result<SecondFactorVerdict, AdapterError> {
        Err(self.unconfigured())
    }

    async fn logout(&self, _tenant_id: &TenantId) -> Result<(), AdapterError> {
        Err(self.unconfigured())
    }
}

#[cfg(test)]
mod tests {
    use courier_core::domain::channel::Channel;
    use courier_core::domain::tenant::TenantId;
    use courier_core::outbox_engine::FailureKind;
    use uuid::Uuid;

    use super::{AdapterError, ChannelAdapter, NoopChannelAdapter};

    #[test]
    fn connectivity_failures_are_transient() {
        assert_eq!(
            AdapterError::Unreachable("refused".to_string()).failure_kind(),
            FailureKind::Transient
        );
        assert_eq!(
            AdapterError::Timeout("15s elapsed".to_string()).failure_kind(),
            FailureKind::Transient
        );
    }

    #[test]
    fn provider_rejections_are_fatal() {
        assert_eq!(
            AdapterError::Rejected("unknown recipient".to_string()).failure_kind(),
            FailureKind::Fatal
        );
        assert_eq!(
            AdapterError::Protocol("missing field".to_string()).failure_kind(),
            FailureKind::Fatal
        );
    }

    #[tokio::test]
    async fn noop_adapter_reports_itself_unreachable() {
        let adapter = NoopChannelAdapter::new(Channel::Telegram);
        let tenant_id = TenantId(Uuid::new_v4());
        let result = adapter.send(&tenant_id, "dana_dev", "hi", &[]).await;
        assert!(matches!(result, Err(AdapterError::Unreachable(_))));
    }
}
