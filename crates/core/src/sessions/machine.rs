//! Pure login-session transition rules.
//!
//! The service layer owns adapter calls, persistence, and single-flight
//! concurrency; this module only decides which (phase, event) pairs are legal
//! and what the resulting record looks like. Deadlines are evaluated against
//! a caller-supplied `now` so sweeps and lazy reads share one code path.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::session::{SessionErrorCode, SessionPhase, SessionState};
use crate::sessions::states::{SessionAction, SessionEvent, SessionTransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionTransitionError {
    #[error("invalid session transition from {phase:?} using event {event}")]
    InvalidTransition { phase: SessionPhase, event: &'static str },
    #[error("no deadline is due on a {phase:?} session")]
    NoDeadlineDue { phase: SessionPhase },
}

#[derive(Clone, Debug, Default)]
pub struct SessionMachine;

impl SessionMachine {
    /// Apply one event, returning the updated record and the transition
    /// outcome. The input state is never mutated on error.
    pub fn apply(
        &self,
        state: &SessionState,
        event: &SessionEvent,
        now: DateTime<Utc>,
    ) -> Result<(SessionState, SessionTransitionOutcome), SessionTransitionError> {
        let from = state.phase;
        let mut next = state.clone();
        next.updated_at = now;

        let outcome = match (from, event) {
            // `start` is legal from any phase; the fresh code supersedes any
            // prior one.
            (_, SessionEvent::StartIssued { code_id, expires_at }) => {
                next.phase = SessionPhase::WaitingQr;
                next.code_id = Some(code_id.clone());
                next.code_expires_at = Some(*expires_at);
                next.second_factor_deadline = None;
                next.last_error = None;
                SessionTransitionOutcome {
                    from,
                    to: SessionPhase::WaitingQr,
                    last_error: None,
                    actions: vec![SessionAction::InvalidatePriorCode],
                }
            }
            (SessionPhase::WaitingQr, SessionEvent::CodeRefreshed { code_id, expires_at }) => {
                next.code_id = Some(code_id.clone());
                next.code_expires_at = Some(*expires_at);
                SessionTransitionOutcome {
                    from,
                    to: SessionPhase::WaitingQr,
                    last_error: None,
                    actions: vec![SessionAction::InvalidatePriorCode],
                }
            }
            (SessionPhase::WaitingQr, SessionEvent::ScanConfirmed) => {
                next.phase = SessionPhase::Authorized;
                next.code_id = None;
                next.code_expires_at = None;
                next.last_error = None;
                SessionTransitionOutcome {
                    from,
                    to: SessionPhase::Authorized,
                    last_error: None,
                    actions: Vec::new(),
                }
            }
            (SessionPhase::WaitingQr, SessionEvent::TwoFactorRequired { deadline }) => {
                next.phase = SessionPhase::Needs2fa;
                next.code_id = None;
                next.code_expires_at = None;
                next.second_factor_deadline = Some(*deadline);
                SessionTransitionOutcome {
                    from,
                    to: SessionPhase::Needs2fa,
                    last_error: None,
                    actions: Vec::new(),
                }
            }
            (SessionPhase::Needs2fa, SessionEvent::TwoFactorAccepted) => {
                next.phase = SessionPhase::Authorized;
                next.second_factor_deadline = None;
                next.last_error = None;
                SessionTransitionOutcome {
                    from,
                    to: SessionPhase::Authorized,
                    last_error: None,
                    actions: Vec::new(),
                }
            }
            // A failed attempt does not reset the deadline; the original
            // window keeps counting down.
            (SessionPhase::Needs2fa, SessionEvent::TwoFactorRejected) => {
                next.last_error = Some(SessionErrorCode::InvalidPassword);
                SessionTransitionOutcome {
                    from,
                    to: SessionPhase::Needs2fa,
                    last_error: Some(SessionErrorCode::InvalidPassword),
                    actions: Vec::new(),
                }
            }
            (SessionPhase::WaitingQr | SessionPhase::Needs2fa, SessionEvent::DeadlineElapsed) => {
                let error = match from {
                    SessionPhase::WaitingQr => SessionErrorCode::QrLoginTimeout,
                    _ => SessionErrorCode::TwofaTimeout,
                };
                if !deadline_due(state, now) {
                    return Err(SessionTransitionError::NoDeadlineDue { phase: from });
                }
                next.phase = SessionPhase::Disconnected;
                next.code_id = None;
                next.code_expires_at = None;
                next.second_factor_deadline = None;
                next.last_error = Some(error);
                SessionTransitionOutcome {
                    from,
                    to: SessionPhase::Disconnected,
                    last_error: Some(error),
                    actions: vec![SessionAction::InvalidatePriorCode],
                }
            }
            (_, SessionEvent::ExternalInvalidated) => {
                next.phase = SessionPhase::Disconnected;
                next.code_id = None;
                next.code_expires_at = None;
                next.second_factor_deadline = None;
                next.last_error = Some(SessionErrorCode::Revoked);
                SessionTransitionOutcome {
                    from,
                    to: SessionPhase::Disconnected,
                    last_error: Some(SessionErrorCode::Revoked),
                    actions: vec![SessionAction::ClearArtifacts],
                }
            }
            (SessionPhase::Authorized, SessionEvent::LogoutRequested) => {
                next.phase = SessionPhase::Disconnected;
                next.last_error = None;
                SessionTransitionOutcome {
                    from,
                    to: SessionPhase::Disconnected,
                    last_error: None,
                    actions: vec![SessionAction::ClearArtifacts],
                }
            }
            (phase, event) => {
                return Err(SessionTransitionError::InvalidTransition {
                    phase,
                    event: event.name(),
                });
            }
        };

        Ok((next, outcome))
    }

    /// Lazy expiry: the `disconnected` record a session should read as if a
    /// persisted deadline has elapsed, or `None` when nothing is due. Used by
    /// both the background sweep and every status read.
    pub fn expire_if_due(
        &self,
        state: &SessionState,
        now: DateTime<Utc>,
    ) -> Option<(SessionState, SessionTransitionOutcome)> {
        match state.phase {
            SessionPhase::WaitingQr | SessionPhase::Needs2fa if deadline_due(state, now) => {
                self.apply(state, &SessionEvent::DeadlineElapsed, now).ok()
            }
            _ => None,
        }
    }
}

fn deadline_due(state: &SessionState, now: DateTime<Utc>) -> bool {
    let deadline = match state.phase {
        SessionPhase::WaitingQr => state.code_expires_at,
        SessionPhase::Needs2fa => state.second_factor_deadline,
        _ => None,
    };
    deadline.is_some_and(|at| at <= now)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{SessionMachine, SessionTransitionError};
    use crate::domain::channel::Channel;
    use crate::domain::session::{SessionErrorCode, SessionPhase, SessionState};
    use crate::sessions::states::{SessionAction, SessionEvent};

    fn machine() -> SessionMachine {
        SessionMachine
    }

    fn disconnected() -> SessionState {
        SessionState::disconnected(
            crate::domain::tenant::TenantId(Uuid::new_v4()),
            Channel::Whatsapp,
            Utc::now(),
        )
    }

    #[test]
    fn start_issues_code_from_any_phase_and_invalidates_prior() {
        let machine = machine();
        let now = Utc::now();
        let mut state = disconnected();
        state.phase = SessionPhase::Authorized;

        let (next, outcome) = machine
            .apply(
                &state,
                &SessionEvent::StartIssued {
                    code_id: "qr-1".to_string(),
                    expires_at: now + Duration::seconds(60),
                },
                now,
            )
            .expect("start");

        assert_eq!(next.phase, SessionPhase::WaitingQr);
        assert_eq!(next.code_id.as_deref(), Some("qr-1"));
        assert!(outcome.actions.contains(&SessionAction::InvalidatePriorCode));
        assert!(next.last_error.is_none());
    }

    #[test]
    fn scan_confirmation_authorizes_without_second_factor() {
        let machine = machine();
        let now = Utc::now();
        let mut state = disconnected();
        state.phase = SessionPhase::WaitingQr;
        state.code_id = Some("qr-1".to_string());
        state.code_expires_at = Some(now + Duration::seconds(60));

        let (next, _) = machine.apply(&state, &SessionEvent::ScanConfirmed, now).expect("scan");
        assert_eq!(next.phase, SessionPhase::Authorized);
        assert!(next.code_id.is_none());
    }

    #[test]
    fn second_factor_flow_accepts_and_rejects_without_resetting_deadline() {
        let machine = machine();
        let now = Utc::now();
        let deadline = now + Duration::seconds(120);

        let mut state = disconnected();
        state.phase = SessionPhase::WaitingQr;
        state.code_expires_at = Some(now + Duration::seconds(60));

        let (state, _) = machine
            .apply(&state, &SessionEvent::TwoFactorRequired { deadline }, now)
            .expect("needs 2fa");
        assert_eq!(state.phase, SessionPhase::Needs2fa);
        assert_eq!(state.second_factor_deadline, Some(deadline));

        let (rejected, outcome) = machine
            .apply(&state, &SessionEvent::TwoFactorRejected, now + Duration::seconds(10))
            .expect("reject keeps phase");
        assert_eq!(rejected.phase, SessionPhase::Needs2fa);
        assert_eq!(rejected.last_error, Some(SessionErrorCode::InvalidPassword));
        assert_eq!(rejected.second_factor_deadline, Some(deadline), "deadline must not reset");
        assert_eq!(outcome.to, SessionPhase::Needs2fa);

        let (accepted, _) = machine
            .apply(&rejected, &SessionEvent::TwoFactorAccepted, now + Duration::seconds(20))
            .expect("accept");
        assert_eq!(accepted.phase, SessionPhase::Authorized);
        assert!(accepted.second_factor_deadline.is_none());
        assert!(accepted.last_error.is_none());
    }

    #[test]
    fn code_expiry_disconnects_with_qr_timeout() {
        let machine = machine();
        let now = Utc::now();
        let mut state = disconnected();
        state.phase = SessionPhase::WaitingQr;
        state.code_id = Some("qr-1".to_string());
        state.code_expires_at = Some(now - Duration::seconds(1));

        let (next, _) = machine
            .expire_if_due(&state, now)
            .expect("deadline is due");
        assert_eq!(next.phase, SessionPhase::Disconnected);
        assert_eq!(next.last_error, Some(SessionErrorCode::QrLoginTimeout));
        assert!(next.code_id.is_none());
    }

    #[test]
    fn second_factor_expiry_disconnects_with_twofa_timeout() {
        let machine = machine();
        let now = Utc::now();
        let mut state = disconnected();
        state.phase = SessionPhase::Needs2fa;
        state.second_factor_deadline = Some(now - Duration::seconds(1));

        let (next, _) = machine.expire_if_due(&state, now).expect("deadline is due");
        assert_eq!(next.last_error, Some(SessionErrorCode::TwofaTimeout));
    }

    #[test]
    fn live_deadlines_do_not_expire_early() {
        let machine = machine();
        let now = Utc::now();
        let mut state = disconnected();
        state.phase = SessionPhase::WaitingQr;
        state.code_expires_at = Some(now + Duration::seconds(30));

        assert!(machine.expire_if_due(&state, now).is_none());
        assert!(matches!(
            machine.apply(&state, &SessionEvent::DeadlineElapsed, now),
            Err(SessionTransitionError::NoDeadlineDue { .. })
        ));
    }

    #[test]
    fn external_invalidation_disconnects_and_clears_artifacts() {
        let machine = machine();
        let now = Utc::now();
        let mut state = disconnected();
        state.phase = SessionPhase::Authorized;

        let (next, outcome) =
            machine.apply(&state, &SessionEvent::ExternalInvalidated, now).expect("revoke");
        assert_eq!(next.phase, SessionPhase::Disconnected);
        assert_eq!(next.last_error, Some(SessionErrorCode::Revoked));
        assert!(outcome.actions.contains(&SessionAction::ClearArtifacts));
    }

    #[test]
    fn logout_only_applies_to_authorized_sessions() {
        let machine = machine();
        let now = Utc::now();
        let mut state = disconnected();
        state.phase = SessionPhase::Authorized;

        let (next, outcome) =
            machine.apply(&state, &SessionEvent::LogoutRequested, now).expect("logout");
        assert_eq!(next.phase, SessionPhase::Disconnected);
        assert!(next.last_error.is_none());
        assert!(outcome.actions.contains(&SessionAction::ClearArtifacts));

        let error = machine
            .apply(&next, &SessionEvent::LogoutRequested, now)
            .expect_err("logout from disconnected is invalid");
        assert!(matches!(error, SessionTransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn two_factor_events_are_rejected_outside_needs_2fa() {
        let machine = machine();
        let error = machine
            .apply(&disconnected(), &SessionEvent::TwoFactorAccepted, Utc::now())
            .expect_err("must reject");
        assert!(matches!(
            error,
            SessionTransitionError::InvalidTransition { phase: SessionPhase::Disconnected, .. }
        ));
    }
}
