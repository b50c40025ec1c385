//! The composite machine's state space.
//!
//! One enum covers all three chained machines (signature proposal, DKG
//! proposal, signing proposal). Modeling the composite as a single state
//! space instead of three machines sharing a payload removes the mutable
//! aliasing the split design would need: the payload has exactly one owner
//! and phase hand-offs are ordinary transitions.

use covenant_core::DkgPhase;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current state of a round's composite machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Nothing has happened yet; only `sig_proposal_init` applies.
    Idle,

    // Signature proposal: invitation and opt-in.
    SigAwaitingConfirmations,
    SigConfirmed,
    SigCanceledByParticipant,
    SigCanceledByTimeout,

    // DKG proposal: four confirmation phases in strict order.
    DkgCommitsAwaitConfirmations,
    DkgDealsAwaitConfirmations,
    DkgResponsesAwaitConfirmations,
    DkgMasterKeyAwaitConfirmations,
    DkgCompleted,
    DkgCanceledByError,
    DkgCanceledByTimeout,

    // Signing proposal: rooted in a DKG-complete round, restartable.
    SigningAwaitConfirmations,
    SigningAwaitPartialSigns,
    SigningCompleted,
    SigningCanceledByError,
    SigningCanceledByTimeout,
}

impl State {
    /// Stable name used in persisted snapshots and status responses.
    pub fn name(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::SigAwaitingConfirmations => "sig_awaiting_confirmations",
            State::SigConfirmed => "sig_confirmed",
            State::SigCanceledByParticipant => "sig_canceled_by_participant",
            State::SigCanceledByTimeout => "sig_canceled_by_timeout",
            State::DkgCommitsAwaitConfirmations => "dkg_commits_await_confirmations",
            State::DkgDealsAwaitConfirmations => "dkg_deals_await_confirmations",
            State::DkgResponsesAwaitConfirmations => "dkg_responses_await_confirmations",
            State::DkgMasterKeyAwaitConfirmations => "dkg_master_key_await_confirmations",
            State::DkgCompleted => "dkg_completed",
            State::DkgCanceledByError => "dkg_canceled_by_error",
            State::DkgCanceledByTimeout => "dkg_canceled_by_timeout",
            State::SigningAwaitConfirmations => "signing_await_confirmations",
            State::SigningAwaitPartialSigns => "signing_await_partial_signs",
            State::SigningCompleted => "signing_completed",
            State::SigningCanceledByError => "signing_canceled_by_error",
            State::SigningCanceledByTimeout => "signing_canceled_by_timeout",
        }
    }

    /// True once the *round* can never transition again.
    ///
    /// Signing-terminal states are not round-terminal: the established key
    /// can root further signing sessions.
    pub fn is_round_terminal(&self) -> bool {
        matches!(
            self,
            State::SigCanceledByParticipant
                | State::SigCanceledByTimeout
                | State::DkgCanceledByError
                | State::DkgCanceledByTimeout
        )
    }

    /// The DKG confirmation phase this state is waiting on, if any.
    pub fn dkg_phase(&self) -> Option<DkgPhase> {
        match self {
            State::DkgCommitsAwaitConfirmations => Some(DkgPhase::Commits),
            State::DkgDealsAwaitConfirmations => Some(DkgPhase::Deals),
            State::DkgResponsesAwaitConfirmations => Some(DkgPhase::Responses),
            State::DkgMasterKeyAwaitConfirmations => Some(DkgPhase::MasterKey),
            _ => None,
        }
    }

    /// The await-state for a given DKG phase.
    pub fn awaiting(phase: DkgPhase) -> State {
        match phase {
            DkgPhase::Commits => State::DkgCommitsAwaitConfirmations,
            DkgPhase::Deals => State::DkgDealsAwaitConfirmations,
            DkgPhase::Responses => State::DkgResponsesAwaitConfirmations,
            DkgPhase::MasterKey => State::DkgMasterKeyAwaitConfirmations,
        }
    }

    /// States from which a new signing session may be proposed.
    pub fn accepts_signing_start(&self) -> bool {
        matches!(
            self,
            State::DkgCompleted
                | State::SigningCompleted
                | State::SigningCanceledByError
                | State::SigningCanceledByTimeout
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_terminal_states() {
        assert!(State::SigCanceledByTimeout.is_round_terminal());
        assert!(State::DkgCanceledByError.is_round_terminal());
        assert!(!State::DkgCompleted.is_round_terminal());
        assert!(!State::SigningCanceledByTimeout.is_round_terminal());
        assert!(!State::Idle.is_round_terminal());
    }

    #[test]
    fn signing_restart_states() {
        assert!(State::DkgCompleted.accepts_signing_start());
        assert!(State::SigningCompleted.accepts_signing_start());
        assert!(State::SigningCanceledByError.accepts_signing_start());
        assert!(!State::SigningAwaitPartialSigns.accepts_signing_start());
        assert!(!State::DkgCanceledByError.accepts_signing_start());
    }

    #[test]
    fn phase_round_trip() {
        for phase in [
            DkgPhase::Commits,
            DkgPhase::Deals,
            DkgPhase::Responses,
            DkgPhase::MasterKey,
        ] {
            assert_eq!(State::awaiting(phase).dkg_phase(), Some(phase));
        }
    }
}
