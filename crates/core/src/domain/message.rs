use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::lead::LeadId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Received,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "received" => Some(Self::Received),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Immutable conversation record. Rows are append-only; delivery progress
/// lives on the outbox item, not here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub lead_id: LeadId,
    pub direction: MessageDirection,
    pub text: Option<String>,
    pub attachments: Vec<String>,
    /// Provider-side message id when known (always set for inbound rows).
    pub provider_message_id: Option<String>,
    pub status: MessageStatus,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{MessageDirection, MessageStatus};

    #[test]
    fn direction_round_trips_from_storage_encoding() {
        for direction in [MessageDirection::Inbound, MessageDirection::Outbound] {
            assert_eq!(MessageDirection::parse(direction.as_str()), Some(direction));
        }
    }

    #[test]
    fn status_round_trips_from_storage_encoding() {
        for status in [MessageStatus::Received, MessageStatus::Sent, MessageStatus::Failed] {
            assert_eq!(MessageStatus::parse(status.as_str()), Some(status));
        }
    }
}
