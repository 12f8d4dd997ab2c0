use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::channel::Channel;
use crate::identity::PhoneNormalization;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Per-tenant, per-provider configuration loaded and passed into engine calls.
///
/// There are no process-wide enable flags; toggling a tenant only ever touches
/// this record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub tenant_id: TenantId,
    pub channel: Channel,
    pub enabled: bool,
    /// Currently issued webhook secret. Exactly one is active at a time;
    /// reissuing replaces it and the prior value stops authenticating
    /// immediately.
    pub webhook_secret: String,
    /// `None` means no recipient restriction. `Some` restricts outbound
    /// delivery to the listed normalized peers.
    pub allow_list: Option<Vec<String>>,
    pub normalization: PhoneNormalization,
    pub secret_issued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderSettings {
    pub fn secret_matches(&self, presented: &str) -> bool {
        // Length-gated byte comparison; secrets are random tokens, not
        // attacker-influenced data with exploitable early-exit structure.
        self.webhook_secret.len() == presented.len()
            && self
                .webhook_secret
                .bytes()
                .zip(presented.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }

    pub fn recipient_allowed(&self, normalized_peer: &str) -> bool {
        match &self.allow_list {
            None => true,
            Some(list) => list.iter().any(|entry| entry == normalized_peer),
        }
    }
}
