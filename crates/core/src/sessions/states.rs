use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::session::{SessionErrorCode, SessionPhase};

/// Everything that can move a login session between phases: operator calls,
/// adapter/provider signals, and persisted deadlines elapsing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// A `start` call obtained a fresh login code from the adapter.
    StartIssued { code_id: String, expires_at: DateTime<Utc> },
    /// The provider rotated the active login code before it was scanned.
    CodeRefreshed { code_id: String, expires_at: DateTime<Utc> },
    ScanConfirmed,
    TwoFactorRequired { deadline: DateTime<Utc> },
    TwoFactorAccepted,
    TwoFactorRejected,
    DeadlineElapsed,
    ExternalInvalidated,
    LogoutRequested,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartIssued { .. } => "start_issued",
            Self::CodeRefreshed { .. } => "code_refreshed",
            Self::ScanConfirmed => "scan_confirmed",
            Self::TwoFactorRequired { .. } => "two_factor_required",
            Self::TwoFactorAccepted => "two_factor_accepted",
            Self::TwoFactorRejected => "two_factor_rejected",
            Self::DeadlineElapsed => "deadline_elapsed",
            Self::ExternalInvalidated => "external_invalidated",
            Self::LogoutRequested => "logout_requested",
        }
    }
}

/// Side effects a transition obligates the caller to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionAction {
    /// Any previously issued login code must stop being honored.
    InvalidatePriorCode,
    /// Local session artifacts (auth material cached by the adapter) must be
    /// cleared.
    ClearArtifacts,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTransitionOutcome {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub last_error: Option<SessionErrorCode>,
    pub actions: Vec<SessionAction>,
}
