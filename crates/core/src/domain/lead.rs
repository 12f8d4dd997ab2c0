use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::channel::Channel;
use crate::domain::contact::ContactId;
use crate::domain::tenant::TenantId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub Uuid);

impl std::fmt::Display for LeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStage {
    New,
    Engaged,
    Qualified,
    Won,
    Lost,
}

impl LeadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Engaged => "engaged",
            Self::Qualified => "qualified",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "engaged" => Some(Self::Engaged),
            "qualified" => Some(Self::Qualified),
            "won" => Some(Self::Won),
            "lost" => Some(Self::Lost),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }
}

/// One conversation thread with a single counterparty. Keyed by
/// (tenant, channel, peer); additionally unique by (tenant, provider user id)
/// when the provider exposes a stable user id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub tenant_id: TenantId,
    pub contact_id: ContactId,
    pub channel: Channel,
    /// Normalized peer identifier the conversation runs against.
    pub peer: String,
    pub provider_user_id: Option<String>,
    pub stage: LeadStage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadStageChange {
    pub id: Uuid,
    pub lead_id: LeadId,
    pub from_stage: Option<LeadStage>,
    pub to_stage: LeadStage,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

impl Lead {
    /// Move the lead to a new lifecycle stage, producing the history record.
    /// Terminal stages stay where they are.
    pub fn advance_stage(
        &mut self,
        to_stage: LeadStage,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Option<LeadStageChange> {
        if self.stage == to_stage || self.stage.is_terminal() {
            return None;
        }
        let change = LeadStageChange {
            id: Uuid::new_v4(),
            lead_id: self.id.clone(),
            from_stage: Some(self.stage),
            to_stage,
            reason: reason.into(),
            occurred_at: now,
        };
        self.stage = to_stage;
        self.updated_at = now;
        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{Lead, LeadId, LeadStage};
    use crate::domain::channel::Channel;
    use crate::domain::contact::ContactId;
    use crate::domain::tenant::TenantId;

    fn lead(stage: LeadStage) -> Lead {
        let now = Utc::now();
        Lead {
            id: LeadId(Uuid::new_v4()),
            tenant_id: TenantId(Uuid::new_v4()),
            contact_id: ContactId(Uuid::new_v4()),
            channel: Channel::Whatsapp,
            peer: "5551112222".to_string(),
            provider_user_id: None,
            stage,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn lead_stage_round_trips_from_storage_encoding() {
        for stage in
            [LeadStage::New, LeadStage::Engaged, LeadStage::Qualified, LeadStage::Won, LeadStage::Lost]
        {
            assert_eq!(LeadStage::parse(stage.as_str()), Some(stage));
        }
    }

    #[test]
    fn advance_stage_records_history() {
        let mut lead = lead(LeadStage::New);
        let change = lead
            .advance_stage(LeadStage::Engaged, "first_inbound_message", Utc::now())
            .expect("stage change");

        assert_eq!(lead.stage, LeadStage::Engaged);
        assert_eq!(change.from_stage, Some(LeadStage::New));
        assert_eq!(change.to_stage, LeadStage::Engaged);
    }

    #[test]
    fn advance_to_same_stage_is_a_noop() {
        let mut lead = lead(LeadStage::Engaged);
        assert!(lead.advance_stage(LeadStage::Engaged, "noop", Utc::now()).is_none());
    }

    #[test]
    fn terminal_stages_do_not_advance() {
        let mut lead = lead(LeadStage::Won);
        assert!(lead.advance_stage(LeadStage::Engaged, "reopen", Utc::now()).is_none());
        assert_eq!(lead.stage, LeadStage::Won);
    }
}
