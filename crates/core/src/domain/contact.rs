use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::tenant::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactId(pub Uuid);

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Phone,
    ProviderUserId,
    Username,
    RawPeer,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::ProviderUserId => "provider_user_id",
            Self::Username => "username",
            Self::RawPeer => "raw_peer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "phone" => Some(Self::Phone),
            "provider_user_id" => Some(Self::ProviderUserId),
            "username" => Some(Self::Username),
            "raw_peer" => Some(Self::RawPeer),
            _ => None,
        }
    }
}

/// One stored identifier a contact is known by. Unique per tenant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelIdentifier {
    pub kind: IdentifierKind,
    pub value: String,
}

impl ChannelIdentifier {
    pub fn new(kind: IdentifierKind, value: impl Into<String>) -> Self {
        Self { kind, value: value.into() }
    }
}

/// Canonical identity merging every identifier one real counterparty has been
/// seen under for a tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub tenant_id: TenantId,
    pub display_name: Option<String>,
    pub identifiers: Vec<ChannelIdentifier>,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    pub fn has_identifier(&self, candidate: &ChannelIdentifier) -> bool {
        self.identifiers.iter().any(|stored| stored == candidate)
    }
}

/// Raw identifier set carried by an inbound provider event. Any subset may be
/// present; an envelope with none of them cannot be resolved.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentifiers {
    pub phone: Option<String>,
    pub provider_user_id: Option<String>,
    pub username: Option<String>,
    pub raw_peer: Option<String>,
}

impl SenderIdentifiers {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none()
            && self.provider_user_id.is_none()
            && self.username.is_none()
            && self.raw_peer.is_none()
    }

    /// Identifiers exactly as presented, in resolution priority order.
    pub fn as_identifiers(&self) -> Vec<ChannelIdentifier> {
        let mut out = Vec::new();
        if let Some(value) = &self.provider_user_id {
            out.push(ChannelIdentifier::new(IdentifierKind::ProviderUserId, value.clone()));
        }
        if let Some(value) = &self.phone {
            out.push(ChannelIdentifier::new(IdentifierKind::Phone, value.clone()));
        }
        if let Some(value) = &self.username {
            out.push(ChannelIdentifier::new(IdentifierKind::Username, value.clone()));
        }
        if let Some(value) = &self.raw_peer {
            out.push(ChannelIdentifier::new(IdentifierKind::RawPeer, value.clone()));
        }
        out
    }
}
