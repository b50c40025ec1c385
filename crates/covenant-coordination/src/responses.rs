//! Responses, status views, and air-gap operation intents.
//!
//! A response answers the front-end that submitted an event; an operation
//! intent is a work item destined for the air-gapped signer (ferried by the
//! operator as QR-coded blobs). Both carry only opaque byte payloads; the
//! canonical JSON task encodings here are the contract with the signer side.

use crate::payload::{Cancellation, RoundPayload, SigningPayload};
use crate::state::State;
use covenant_core::{CoreError, ParticipantId, RoundId, SigningId};
use serde::{Deserialize, Serialize};

/// One row of the invitation list returned by `sig_proposal_init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationEntry {
    pub participant_id: ParticipantId,
    pub username: String,
    pub threshold: u16,
    pub dkg_pubkey: Vec<u8>,
}

/// One participant's opaque blob, used in phase hand-off task payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobEntry {
    pub participant_id: ParticipantId,
    pub payload: Vec<u8>,
}

/// Front-end response attached to an applied event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundResponse {
    /// The invitation list for the proposed round.
    Invitations(Vec<InvitationEntry>),
    /// The round reached DKG completion with this agreed master key.
    DkgCompleted { master_key: Vec<u8> },
    /// A signing session collected enough partials.
    SigningCompleted {
        signing_id: SigningId,
        partials: Vec<BlobEntry>,
    },
}

/// What the air-gapped module is being asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Produce the commit for this round.
    ProduceCommits,
    /// Produce deals from everyone's commits.
    ProduceDeals,
    /// Produce responses from everyone's deals.
    ProduceResponses,
    /// Derive the master key from everyone's responses.
    ProduceMasterKey,
    /// Produce a partial signature over a proposed payload.
    ProducePartialSign,
    /// Recover the full threshold signature from collected partials.
    RecoverSignature,
}

/// A work item for the operation queue, emitted by a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationIntent {
    pub kind: OperationKind,
    /// Canonical JSON task payload; schema depends on `kind`.
    pub data: Vec<u8>,
}

/// Task payload for [`OperationKind::ProduceCommits`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitTask {
    pub round_id: RoundId,
    pub threshold: u16,
    pub participants: Vec<InvitationEntry>,
}

/// Task payload for the deal/response/master-key production steps: the
/// previous phase's blobs from every participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTask {
    pub round_id: RoundId,
    pub entries: Vec<BlobEntry>,
}

/// Task payload for [`OperationKind::ProducePartialSign`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningTask {
    pub round_id: RoundId,
    pub signing_id: SigningId,
    pub src_payload: Vec<u8>,
}

/// Task payload for [`OperationKind::RecoverSignature`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryTask {
    pub round_id: RoundId,
    pub signing_id: SigningId,
    pub src_payload: Vec<u8>,
    pub partials: Vec<BlobEntry>,
}

impl OperationIntent {
    pub(crate) fn produce_commits(task: &CommitTask) -> Result<Self, CoreError> {
        Ok(Self {
            kind: OperationKind::ProduceCommits,
            data: serde_json::to_vec(task)?,
        })
    }

    pub(crate) fn phase_task(kind: OperationKind, task: &PhaseTask) -> Result<Self, CoreError> {
        Ok(Self {
            kind,
            data: serde_json::to_vec(task)?,
        })
    }

    pub(crate) fn produce_partial_sign(task: &SigningTask) -> Result<Self, CoreError> {
        Ok(Self {
            kind: OperationKind::ProducePartialSign,
            data: serde_json::to_vec(task)?,
        })
    }

    pub(crate) fn recover_signature(task: &RecoveryTask) -> Result<Self, CoreError> {
        Ok(Self {
            kind: OperationKind::RecoverSignature,
            data: serde_json::to_vec(task)?,
        })
    }
}

/// One participant's status row in a [`RoundStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantStatusEntry {
    pub participant_id: ParticipantId,
    pub username: String,
    pub status: String,
    pub error: Option<String>,
}

/// Queryable view of a round for front-ends; terminal rounds keep answering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStatus {
    pub round_id: Option<RoundId>,
    pub state: String,
    pub threshold: Option<u16>,
    pub participants: Vec<ParticipantStatusEntry>,
    pub master_key_established: bool,
    pub cancellation: Option<Cancellation>,
}

impl RoundStatus {
    /// Build the status view for the stage the round is currently in.
    pub(crate) fn build(state: State, payload: &RoundPayload) -> Self {
        let participants = if let Some(signing) = stage_signing(state, payload) {
            signing
                .quorum
                .iter()
                .map(|(id, p)| ParticipantStatusEntry {
                    participant_id: *id,
                    username: p.username.clone(),
                    status: format!("{:?}", p.status),
                    error: None,
                })
                .collect()
        } else if let Some(dkg) = payload.dkg() {
            dkg.quorum
                .iter()
                .map(|(id, p)| ParticipantStatusEntry {
                    participant_id: *id,
                    username: p.username.clone(),
                    status: format!("{:?}", p.status),
                    error: p.error.clone(),
                })
                .collect()
        } else if let Some(proposal) = payload.proposal() {
            proposal
                .quorum
                .iter()
                .map(|(id, p)| ParticipantStatusEntry {
                    participant_id: *id,
                    username: p.username.clone(),
                    status: format!("{:?}", p.status),
                    error: None,
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            round_id: payload.round_id(),
            state: state.name().to_string(),
            threshold: payload.participants().map(|p| p.threshold()),
            participants,
            master_key_established: payload.master_key().is_some(),
            cancellation: payload.cancellation().cloned(),
        }
    }
}

fn stage_signing(state: State, payload: &RoundPayload) -> Option<&SigningPayload> {
    match state {
        State::SigningAwaitConfirmations
        | State::SigningAwaitPartialSigns
        | State::SigningCompleted
        | State::SigningCanceledByError
        | State::SigningCanceledByTimeout => payload.signing(),
        _ => None,
    }
}
