use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::channel::Channel;
use crate::domain::contact::SenderIdentifiers;
use crate::domain::lead::LeadId;
use crate::domain::tenant::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundEventType {
    ContentMessage,
    SessionStatus,
    LoginCode,
}

impl InboundEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentMessage => "content_message",
            Self::SessionStatus => "session_status",
            Self::LoginCode => "login_code",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "content_message" => Some(Self::ContentMessage),
            "session_status" => Some(Self::SessionStatus),
            "login_code" => Some(Self::LoginCode),
            _ => None,
        }
    }
}

/// Session-related signal a provider can push through the webhook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSignal {
    TwoFactorRequired,
    ScanConfirmed,
    Revoked,
}

impl SessionSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TwoFactorRequired => "two_factor_required",
            Self::ScanConfirmed => "scan_confirmed",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "two_factor_required" => Some(Self::TwoFactorRequired),
            "scan_confirmed" => Some(Self::ScanConfirmed),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// Raw provider event as presented to the ingestion boundary, before any
/// validation or identity resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub tenant_id: TenantId,
    pub channel: Channel,
    pub event_type: InboundEventType,
    pub message_id: String,
    #[serde(default)]
    pub sender: SenderIdentifiers,
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub session_signal: Option<SessionSignal>,
    pub code_id: Option<String>,
    pub code_expires_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Structured validation verdict surfaced to the caller; names the fields a
/// malformed envelope is missing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeViolation {
    pub reason: &'static str,
    pub missing_fields: Vec<&'static str>,
}

impl InboundEnvelope {
    /// Required-field check per event type. Violations stop all further
    /// processing.
    pub fn validate(&self) -> Result<(), EnvelopeViolation> {
        let mut missing = Vec::new();
        if self.message_id.trim().is_empty() {
            missing.push("message_id");
        }

        match self.event_type {
            InboundEventType::ContentMessage => {
                if self.sender.is_empty() {
                    missing.push("sender_ids");
                }
                if self.text.as_deref().map_or(true, str::is_empty) && self.attachments.is_empty() {
                    missing.push("text_or_attachments");
                }
            }
            InboundEventType::SessionStatus => {
                if self.session_signal.is_none() {
                    missing.push("session_signal");
                }
            }
            InboundEventType::LoginCode => {
                if self.code_id.as_deref().map_or(true, str::is_empty) {
                    missing.push("code_id");
                }
                if self.code_expires_at.is_none() {
                    missing.push("code_expires_at");
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(EnvelopeViolation { reason: "missing_required_fields", missing_fields: missing })
        }
    }
}

/// Append-only record of an accepted raw event; the replay detector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookAuditEvent {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub channel: Channel,
    pub message_id: String,
    pub event_type: InboundEventType,
    pub received_at: DateTime<Utc>,
}

/// Event shape handed to the queue after identity resolution. Downstream
/// consumers only ever see this, never the raw envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub tenant_id: TenantId,
    pub lead_id: LeadId,
    pub channel: Channel,
    pub message_id: String,
    pub text: Option<String>,
    pub attachments: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{InboundEnvelope, InboundEventType, SessionSignal};
    use crate::domain::channel::Channel;
    use crate::domain::contact::SenderIdentifiers;
    use crate::domain::tenant::TenantId;

    fn envelope(event_type: InboundEventType) -> InboundEnvelope {
        InboundEnvelope {
            tenant_id: TenantId(Uuid::new_v4()),
            channel: Channel::Whatsapp,
            event_type,
            message_id: "wamid-1".to_string(),
            sender: SenderIdentifiers {
                phone: Some("+1 555 111 2222".to_string()),
                ..SenderIdentifiers::default()
            },
            text: Some("hello".to_string()),
            attachments: Vec::new(),
            session_signal: None,
            code_id: None,
            code_expires_at: None,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn content_message_with_text_is_valid() {
        assert!(envelope(InboundEventType::ContentMessage).validate().is_ok());
    }

    #[test]
    fn content_message_without_body_names_missing_field() {
        let mut envelope = envelope(InboundEventType::ContentMessage);
        envelope.text = None;
        let violation = envelope.validate().expect_err("must reject");
        assert_eq!(violation.reason, "missing_required_fields");
        assert_eq!(violation.missing_fields, vec!["text_or_attachments"]);
    }

    #[test]
    fn session_status_requires_a_signal() {
        let mut envelope = envelope(InboundEventType::SessionStatus);
        let violation = envelope.validate().expect_err("must reject");
        assert!(violation.missing_fields.contains(&"session_signal"));

        envelope.session_signal = Some(SessionSignal::Revoked);
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn login_code_requires_code_and_expiry() {
        let mut envelope = envelope(InboundEventType::LoginCode);
        let violation = envelope.validate().expect_err("must reject");
        assert_eq!(violation.missing_fields, vec!["code_id", "code_expires_at"]);

        envelope.code_id = Some("qr-7".to_string());
        envelope.code_expires_at = Some(Utc::now());
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn blank_message_id_is_rejected_for_every_event_type() {
        let mut envelope = envelope(InboundEventType::ContentMessage);
        envelope.message_id = "  ".to_string();
        let violation = envelope.validate().expect_err("must reject");
        assert!(violation.missing_fields.contains(&"message_id"));
    }
}
