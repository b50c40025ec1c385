//! The round payload: everything a round's machine knows.
//!
//! The payload is one owned aggregate mutated only by actions. Actions run
//! against a scratch clone that is committed when the whole event chain
//! succeeds, so a failed or panicking action can never leave a half-written
//! payload behind.

use crate::error::FsmError;
use covenant_core::quorum::assign_once;
use covenant_core::{
    CoordinationConfig, DkgPhase, ParticipantId, ParticipantsList, Quorum, RoundId, SigningId,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ========== Signature proposal ==========

/// Opt-in status during the invitation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigProposalStatus {
    AwaitConfirmation,
    Confirmed,
    Declined,
}

/// One participant's invitation bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigProposalParticipant {
    pub username: String,
    pub status: SigProposalStatus,
    pub updated_at: Timestamp,
}

/// Invitation-stage payload, created by `sig_proposal_init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigProposalPayload {
    pub participants: ParticipantsList,
    pub quorum: Quorum<SigProposalParticipant>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expires_at: Timestamp,
}

// ========== DKG proposal ==========

/// Per-participant status across the four DKG phases.
///
/// The DAG is strictly forward: `await → confirmed` within a phase,
/// `confirmed → next phase's await` at phase hand-off, with the phase's
/// error status as a sink. [`DkgStatus::rank`] gives the topological
/// position, which the monotonicity property tests check against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DkgStatus {
    CommitAwaitConfirmation,
    CommitConfirmed,
    CommitConfirmationError,
    DealAwaitConfirmation,
    DealConfirmed,
    DealConfirmationError,
    ResponseAwaitConfirmation,
    ResponseConfirmed,
    ResponseConfirmationError,
    MasterKeyAwaitConfirmation,
    MasterKeyConfirmed,
    MasterKeyConfirmationError,
}

impl DkgStatus {
    /// The awaiting status for a phase.
    pub fn awaiting(phase: DkgPhase) -> Self {
        match phase {
            DkgPhase::Commits => DkgStatus::CommitAwaitConfirmation,
            DkgPhase::Deals => DkgStatus::DealAwaitConfirmation,
            DkgPhase::Responses => DkgStatus::ResponseAwaitConfirmation,
            DkgPhase::MasterKey => DkgStatus::MasterKeyAwaitConfirmation,
        }
    }

    /// The confirmed status for a phase.
    pub fn confirmed(phase: DkgPhase) -> Self {
        match phase {
            DkgPhase::Commits => DkgStatus::CommitConfirmed,
            DkgPhase::Deals => DkgStatus::DealConfirmed,
            DkgPhase::Responses => DkgStatus::ResponseConfirmed,
            DkgPhase::MasterKey => DkgStatus::MasterKeyConfirmed,
        }
    }

    /// The error sink for a phase.
    pub fn errored(phase: DkgPhase) -> Self {
        match phase {
            DkgPhase::Commits => DkgStatus::CommitConfirmationError,
            DkgPhase::Deals => DkgStatus::DealConfirmationError,
            DkgPhase::Responses => DkgStatus::ResponseConfirmationError,
            DkgPhase::MasterKey => DkgStatus::MasterKeyConfirmationError,
        }
    }

    /// Position along the forward DAG; error sinks share their phase's
    /// confirmed rank (both are one step past awaiting).
    pub fn rank(&self) -> u8 {
        match self {
            DkgStatus::CommitAwaitConfirmation => 0,
            DkgStatus::CommitConfirmed | DkgStatus::CommitConfirmationError => 1,
            DkgStatus::DealAwaitConfirmation => 2,
            DkgStatus::DealConfirmed | DkgStatus::DealConfirmationError => 3,
            DkgStatus::ResponseAwaitConfirmation => 4,
            DkgStatus::ResponseConfirmed | DkgStatus::ResponseConfirmationError => 5,
            DkgStatus::MasterKeyAwaitConfirmation => 6,
            DkgStatus::MasterKeyConfirmed | DkgStatus::MasterKeyConfirmationError => 7,
        }
    }
}

/// One participant's DKG bookkeeping across all four phases.
///
/// Each blob slot is write-once (see
/// [`covenant_core::quorum::assign_once`]); the DKG public key is carried by
/// value from the invitation stage so downstream consumers always see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgParticipant {
    pub username: String,
    pub dkg_pubkey: Vec<u8>,
    pub status: DkgStatus,
    pub commit: Vec<u8>,
    pub deal: Vec<u8>,
    pub response: Vec<u8>,
    pub master_key: Vec<u8>,
    pub updated_at: Timestamp,
    pub error: Option<String>,
}

impl DkgParticipant {
    /// The blob slot belonging to a phase.
    pub fn slot_mut(&mut self, phase: DkgPhase) -> &mut Vec<u8> {
        match phase {
            DkgPhase::Commits => &mut self.commit,
            DkgPhase::Deals => &mut self.deal,
            DkgPhase::Responses => &mut self.response,
            DkgPhase::MasterKey => &mut self.master_key,
        }
    }

    /// Read the blob slot belonging to a phase.
    pub fn slot(&self, phase: DkgPhase) -> &[u8] {
        match phase {
            DkgPhase::Commits => &self.commit,
            DkgPhase::Deals => &self.deal,
            DkgPhase::Responses => &self.response,
            DkgPhase::MasterKey => &self.master_key,
        }
    }
}

/// DKG-stage payload, created when the invitation stage confirms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgPayload {
    pub quorum: Quorum<DkgParticipant>,
    /// The phase currently awaiting confirmations.
    pub phase: DkgPhase,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Deadline of the current phase, reset at each phase entry.
    pub expires_at: Timestamp,
}

// ========== Signing proposal ==========

/// Opt-in and partial-signature status for one signing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningStatus {
    AwaitConfirmation,
    Confirmed,
    Declined,
    PartialSignReceived,
}

impl SigningStatus {
    /// Position along the forward DAG; `Declined` shares `Confirmed`'s rank.
    pub fn rank(&self) -> u8 {
        match self {
            SigningStatus::AwaitConfirmation => 0,
            SigningStatus::Confirmed | SigningStatus::Declined => 1,
            SigningStatus::PartialSignReceived => 2,
        }
    }
}

/// How a signing session ended, if it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningOutcome {
    InProgress,
    Completed,
    CanceledByError,
    CanceledByTimeout,
}

/// One participant's bookkeeping within a signing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningParticipant {
    pub username: String,
    pub status: SigningStatus,
    pub partial: Vec<u8>,
    pub updated_at: Timestamp,
}

/// One signing session keyed by its [`SigningId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningPayload {
    pub signing_id: SigningId,
    pub initiator: ParticipantId,
    pub src_payload: Vec<u8>,
    pub quorum: Quorum<SigningParticipant>,
    pub outcome: SigningOutcome,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub expires_at: Timestamp,
}

impl SigningPayload {
    /// Partial signatures collected so far, in participant order.
    pub fn collected_partials(&self) -> Vec<(ParticipantId, Vec<u8>)> {
        self.quorum
            .iter()
            .filter(|(_, p)| p.status == SigningStatus::PartialSignReceived)
            .map(|(id, p)| (*id, p.partial.clone()))
            .collect()
    }
}

// ========== Round-level ==========

/// Why a round was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// A phase deadline passed before full confirmation.
    Timeout,
    /// A participant reported failure (or master keys disagreed).
    Error,
    /// A participant declined the invitation.
    Declined,
}

/// Terminal cancellation record exposed through the round snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub reason: CancelReason,
    pub at: Timestamp,
    /// Participants that caused the cancellation: the decliners, the error
    /// reporters, or on timeout the ones that never confirmed.
    pub offenders: Vec<ParticipantId>,
    pub detail: String,
}

/// Everything a round's machine knows, in one owned aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundPayload {
    pub(crate) config: CoordinationConfig,
    pub(crate) proposal: Option<SigProposalPayload>,
    pub(crate) dkg: Option<DkgPayload>,
    /// Active (or most recent) signing session.
    pub(crate) signing: Option<SigningPayload>,
    /// Finished signing sessions, queryable for the life of the round.
    pub(crate) archived_signings: BTreeMap<SigningId, SigningPayload>,
    /// The agreed master key once DKG completes.
    pub(crate) master_key: Option<Vec<u8>>,
    pub(crate) cancellation: Option<Cancellation>,
}

impl RoundPayload {
    /// Fresh payload for an idle machine.
    pub fn new(config: CoordinationConfig) -> Self {
        Self {
            config,
            proposal: None,
            dkg: None,
            signing: None,
            archived_signings: BTreeMap::new(),
            master_key: None,
            cancellation: None,
        }
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    /// The validated participant list, available after init.
    pub fn participants(&self) -> Option<&ParticipantsList> {
        self.proposal.as_ref().map(|p| &p.participants)
    }

    /// The content-derived round identifier, available after init.
    pub fn round_id(&self) -> Option<RoundId> {
        self.participants().map(|p| p.round_id())
    }

    pub fn master_key(&self) -> Option<&[u8]> {
        self.master_key.as_deref()
    }

    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.cancellation.as_ref()
    }

    /// The most recent timestamp the round's current stage recorded.
    ///
    /// Events that carry no timestamp of their own (signing acks) are
    /// stamped with this instead of a live clock, so the payload stays a
    /// pure function of the event sequence.
    pub fn last_activity_at(&self) -> Option<Timestamp> {
        self.signing
            .as_ref()
            .map(|s| s.updated_at)
            .or_else(|| self.dkg.as_ref().map(|d| d.updated_at))
            .or_else(|| self.proposal.as_ref().map(|p| p.updated_at))
    }

    pub fn proposal(&self) -> Option<&SigProposalPayload> {
        self.proposal.as_ref()
    }

    pub fn dkg(&self) -> Option<&DkgPayload> {
        self.dkg.as_ref()
    }

    /// The active (or most recently finished, not yet superseded) session.
    pub fn signing(&self) -> Option<&SigningPayload> {
        self.signing.as_ref()
    }

    /// Finished signing sessions by id.
    pub fn archived_signings(&self) -> &BTreeMap<SigningId, SigningPayload> {
        &self.archived_signings
    }

    /// True if a signing id was used by the active or an archived session.
    pub fn signing_id_used(&self, id: &SigningId) -> bool {
        self.archived_signings.contains_key(id)
            || self.signing.as_ref().is_some_and(|s| &s.signing_id == id)
    }

    // -- internal accessors used by actions -------------------------------

    pub(crate) fn proposal_mut(&mut self) -> Result<&mut SigProposalPayload, FsmError> {
        self.proposal.as_mut().ok_or(FsmError::NotInitialized)
    }

    pub(crate) fn dkg_mut(&mut self) -> Result<&mut DkgPayload, FsmError> {
        self.dkg.as_mut().ok_or(FsmError::NotInitialized)
    }

    pub(crate) fn signing_mut(&mut self) -> Result<&mut SigningPayload, FsmError> {
        self.signing.as_mut().ok_or(FsmError::NotInitialized)
    }

    /// Record a phase blob for a participant, enforcing write-once.
    pub(crate) fn record_dkg_blob(
        &mut self,
        participant: ParticipantId,
        phase: DkgPhase,
        blob: &[u8],
        at: Timestamp,
    ) -> Result<(), FsmError> {
        let dkg = self.dkg_mut()?;
        let entry = dkg
            .quorum
            .get_mut(&participant)
            .ok_or(FsmError::UnknownParticipant(participant))?;
        assign_once(entry.slot_mut(phase), blob)?;
        entry.status = DkgStatus::confirmed(phase);
        entry.updated_at = at;
        dkg.updated_at = at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dkg_status_tables_are_consistent() {
        for phase in [
            DkgPhase::Commits,
            DkgPhase::Deals,
            DkgPhase::Responses,
            DkgPhase::MasterKey,
        ] {
            let awaiting = DkgStatus::awaiting(phase);
            let confirmed = DkgStatus::confirmed(phase);
            let errored = DkgStatus::errored(phase);
            assert!(awaiting.rank() < confirmed.rank());
            assert_eq!(confirmed.rank(), errored.rank());
        }
    }

    #[test]
    fn signing_status_ranks_are_forward() {
        assert!(SigningStatus::AwaitConfirmation.rank() < SigningStatus::Confirmed.rank());
        assert!(SigningStatus::Confirmed.rank() < SigningStatus::PartialSignReceived.rank());
    }

    #[test]
    fn fresh_payload_has_no_round_id() {
        let payload = RoundPayload::new(CoordinationConfig::default());
        assert!(payload.round_id().is_none());
        assert!(payload.participants().is_none());
        assert!(payload.master_key().is_none());
    }
}
