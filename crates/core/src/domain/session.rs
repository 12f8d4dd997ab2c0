use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::channel::Channel;
use crate::domain::tenant::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    WaitingQr,
    Needs2fa,
    Authorized,
    Disconnected,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingQr => "waiting_qr",
            Self::Needs2fa => "needs_2fa",
            Self::Authorized => "authorized",
            Self::Disconnected => "disconnected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "waiting_qr" => Some(Self::WaitingQr),
            "needs_2fa" => Some(Self::Needs2fa),
            "authorized" => Some(Self::Authorized),
            "disconnected" => Some(Self::Disconnected),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorCode {
    QrLoginTimeout,
    TwofaTimeout,
    InvalidPassword,
    Revoked,
    AdapterUnavailable,
}

impl SessionErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QrLoginTimeout => "qr_login_timeout",
            Self::TwofaTimeout => "twofa_timeout",
            Self::InvalidPassword => "invalid_password",
            Self::Revoked => "revoked",
            Self::AdapterUnavailable => "adapter_unavailable",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "qr_login_timeout" => Some(Self::QrLoginTimeout),
            "twofa_timeout" => Some(Self::TwofaTimeout),
            "invalid_password" => Some(Self::InvalidPassword),
            "revoked" => Some(Self::Revoked),
            "adapter_unavailable" => Some(Self::AdapterUnavailable),
            _ => None,
        }
    }
}

/// Login lifecycle record, one per (tenant, provider). All deadlines are
/// persisted wall-clock timestamps; nothing here relies on an in-memory
/// timer surviving a restart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub tenant_id: TenantId,
    pub channel: Channel,
    pub phase: SessionPhase,
    /// Identifier of the active login code; at most one is non-expired.
    pub code_id: Option<String>,
    pub code_expires_at: Option<DateTime<Utc>>,
    pub second_factor_deadline: Option<DateTime<Utc>>,
    pub last_error: Option<SessionErrorCode>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn disconnected(tenant_id: TenantId, channel: Channel, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id,
            channel,
            phase: SessionPhase::Disconnected,
            code_id: None,
            code_expires_at: None,
            second_factor_deadline: None,
            last_error: None,
            updated_at: now,
        }
    }

    /// Whether an operator-initiated `start` would do anything useful right
    /// now (as opposed to interrupting a still-live login attempt).
    pub fn restart_allowed(&self, now: DateTime<Utc>) -> bool {
        match self.phase {
            SessionPhase::Disconnected | SessionPhase::Authorized => true,
            SessionPhase::WaitingQr => {
                self.code_expires_at.map_or(true, |expires_at| expires_at <= now)
            }
            SessionPhase::Needs2fa => {
                self.second_factor_deadline.map_or(true, |deadline| deadline <= now)
            }
        }
    }
}
