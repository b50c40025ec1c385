//! Canonical event payloads carried on the message log.
//!
//! Every externally visible event is one variant of [`RoundEvent`]; actions
//! in the coordination machines match on it exhaustively, so adding a
//! variant is a compile error everywhere it matters. On the wire an event is
//! a `(name, canonical JSON payload)` pair; field order is the struct
//! declaration order and must not be rearranged.

use crate::error::CoreError;
use crate::identifiers::{DkgPhase, ParticipantId, SigningId};
use crate::participant::ProposedParticipant;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

// Wire names. These are protocol constants shared with every other
// implementation talking to the same log.
pub const SIG_PROPOSAL_INIT: &str = "sig_proposal_init";
pub const SIG_PROPOSAL_CONFIRM: &str = "sig_proposal_confirm";
pub const SIG_PROPOSAL_DECLINE: &str = "sig_proposal_decline";
pub const DKG_COMMIT_CONFIRM: &str = "dkg_commit_confirm";
pub const DKG_DEAL_CONFIRM: &str = "dkg_deal_confirm";
pub const DKG_RESPONSE_CONFIRM: &str = "dkg_response_confirm";
pub const DKG_MASTER_KEY_CONFIRM: &str = "dkg_master_key_confirm";
pub const DKG_COMMIT_ERROR: &str = "dkg_commit_error";
pub const DKG_DEAL_ERROR: &str = "dkg_deal_error";
pub const DKG_RESPONSE_ERROR: &str = "dkg_response_error";
pub const DKG_MASTER_KEY_ERROR: &str = "dkg_master_key_error";
pub const SIGNING_START: &str = "signing_start";
pub const SIGNING_CONFIRM: &str = "signing_confirm";
pub const SIGNING_DECLINE: &str = "signing_decline";
pub const PARTIAL_SIGN_RECEIVED: &str = "partial_sign_received";

/// Initial proposal: threshold plus the named participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigProposalInit {
    pub threshold: u16,
    pub participants: Vec<ProposedParticipant>,
    pub created_at: Timestamp,
}

/// A participant accepting or declining the invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigProposalAck {
    pub participant_id: ParticipantId,
    pub created_at: Timestamp,
}

/// A participant's commit for the commit phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgCommitConfirmation {
    pub participant_id: ParticipantId,
    pub commit: Vec<u8>,
    pub created_at: Timestamp,
}

/// A participant's deal for the deal phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgDealConfirmation {
    pub participant_id: ParticipantId,
    pub deal: Vec<u8>,
    pub created_at: Timestamp,
}

/// A participant's response for the response phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgResponseConfirmation {
    pub participant_id: ParticipantId,
    pub response: Vec<u8>,
    pub created_at: Timestamp,
}

/// A participant's derived master key for the final phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgMasterKeyConfirmation {
    pub participant_id: ParticipantId,
    pub master_key: Vec<u8>,
    pub created_at: Timestamp,
}

/// A participant reporting failure for the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgConfirmationError {
    pub participant_id: ParticipantId,
    pub error: String,
    pub created_at: Timestamp,
}

/// Any participant proposing a signing session over `src_payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningStart {
    pub signing_id: SigningId,
    pub proposer_id: ParticipantId,
    pub src_payload: Vec<u8>,
    pub created_at: Timestamp,
}

/// A participant opting in to or out of a signing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningAck {
    pub signing_id: SigningId,
    pub participant_id: ParticipantId,
}

/// One partial signature from one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSign {
    pub signing_id: SigningId,
    pub participant_id: ParticipantId,
    pub partial: Vec<u8>,
    pub created_at: Timestamp,
}

/// Every external event the coordination machines accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundEvent {
    SigProposalInit(SigProposalInit),
    SigProposalConfirm(SigProposalAck),
    SigProposalDecline(SigProposalAck),
    DkgCommitConfirm(DkgCommitConfirmation),
    DkgDealConfirm(DkgDealConfirmation),
    DkgResponseConfirm(DkgResponseConfirmation),
    DkgMasterKeyConfirm(DkgMasterKeyConfirmation),
    DkgCommitError(DkgConfirmationError),
    DkgDealError(DkgConfirmationError),
    DkgResponseError(DkgConfirmationError),
    DkgMasterKeyError(DkgConfirmationError),
    SigningStart(SigningStart),
    SigningConfirm(SigningAck),
    SigningDecline(SigningAck),
    PartialSignReceived(PartialSign),
}

impl RoundEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            RoundEvent::SigProposalInit(_) => SIG_PROPOSAL_INIT,
            RoundEvent::SigProposalConfirm(_) => SIG_PROPOSAL_CONFIRM,
            RoundEvent::SigProposalDecline(_) => SIG_PROPOSAL_DECLINE,
            RoundEvent::DkgCommitConfirm(_) => DKG_COMMIT_CONFIRM,
            RoundEvent::DkgDealConfirm(_) => DKG_DEAL_CONFIRM,
            RoundEvent::DkgResponseConfirm(_) => DKG_RESPONSE_CONFIRM,
            RoundEvent::DkgMasterKeyConfirm(_) => DKG_MASTER_KEY_CONFIRM,
            RoundEvent::DkgCommitError(_) => DKG_COMMIT_ERROR,
            RoundEvent::DkgDealError(_) => DKG_DEAL_ERROR,
            RoundEvent::DkgResponseError(_) => DKG_RESPONSE_ERROR,
            RoundEvent::DkgMasterKeyError(_) => DKG_MASTER_KEY_ERROR,
            RoundEvent::SigningStart(_) => SIGNING_START,
            RoundEvent::SigningConfirm(_) => SIGNING_CONFIRM,
            RoundEvent::SigningDecline(_) => SIGNING_DECLINE,
            RoundEvent::PartialSignReceived(_) => PARTIAL_SIGN_RECEIVED,
        }
    }

    /// Canonical payload encoding for the log record's `data` field.
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        let bytes = match self {
            RoundEvent::SigProposalInit(p) => serde_json::to_vec(p)?,
            RoundEvent::SigProposalConfirm(p) | RoundEvent::SigProposalDecline(p) => {
                serde_json::to_vec(p)?
            }
            RoundEvent::DkgCommitConfirm(p) => serde_json::to_vec(p)?,
            RoundEvent::DkgDealConfirm(p) => serde_json::to_vec(p)?,
            RoundEvent::DkgResponseConfirm(p) => serde_json::to_vec(p)?,
            RoundEvent::DkgMasterKeyConfirm(p) => serde_json::to_vec(p)?,
            RoundEvent::DkgCommitError(p)
            | RoundEvent::DkgDealError(p)
            | RoundEvent::DkgResponseError(p)
            | RoundEvent::DkgMasterKeyError(p) => serde_json::to_vec(p)?,
            RoundEvent::SigningStart(p) => serde_json::to_vec(p)?,
            RoundEvent::SigningConfirm(p) | RoundEvent::SigningDecline(p) => {
                serde_json::to_vec(p)?
            }
            RoundEvent::PartialSignReceived(p) => serde_json::to_vec(p)?,
        };
        Ok(bytes)
    }

    /// Decode a `(name, data)` pair from a log record.
    pub fn decode(name: &str, data: &[u8]) -> Result<Self, CoreError> {
        let event = match name {
            SIG_PROPOSAL_INIT => RoundEvent::SigProposalInit(serde_json::from_slice(data)?),
            SIG_PROPOSAL_CONFIRM => RoundEvent::SigProposalConfirm(serde_json::from_slice(data)?),
            SIG_PROPOSAL_DECLINE => RoundEvent::SigProposalDecline(serde_json::from_slice(data)?),
            DKG_COMMIT_CONFIRM => RoundEvent::DkgCommitConfirm(serde_json::from_slice(data)?),
            DKG_DEAL_CONFIRM => RoundEvent::DkgDealConfirm(serde_json::from_slice(data)?),
            DKG_RESPONSE_CONFIRM => RoundEvent::DkgResponseConfirm(serde_json::from_slice(data)?),
            DKG_MASTER_KEY_CONFIRM => {
                RoundEvent::DkgMasterKeyConfirm(serde_json::from_slice(data)?)
            }
            DKG_COMMIT_ERROR => RoundEvent::DkgCommitError(serde_json::from_slice(data)?),
            DKG_DEAL_ERROR => RoundEvent::DkgDealError(serde_json::from_slice(data)?),
            DKG_RESPONSE_ERROR => RoundEvent::DkgResponseError(serde_json::from_slice(data)?),
            DKG_MASTER_KEY_ERROR => RoundEvent::DkgMasterKeyError(serde_json::from_slice(data)?),
            SIGNING_START => RoundEvent::SigningStart(serde_json::from_slice(data)?),
            SIGNING_CONFIRM => RoundEvent::SigningConfirm(serde_json::from_slice(data)?),
            SIGNING_DECLINE => RoundEvent::SigningDecline(serde_json::from_slice(data)?),
            PARTIAL_SIGN_RECEIVED => {
                RoundEvent::PartialSignReceived(serde_json::from_slice(data)?)
            }
            other => return Err(CoreError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }

    /// The timestamp the sender stamped on the event, when it carries one.
    ///
    /// Chained validation after an event evaluates deadlines at this time,
    /// which keeps log replay deterministic; only ticker-driven validation
    /// reads the live clock. Events that return `None` (signing acks) are
    /// stamped by the machine from the round's own last activity.
    pub fn created_at(&self) -> Option<Timestamp> {
        match self {
            RoundEvent::SigProposalInit(p) => Some(p.created_at),
            RoundEvent::SigProposalConfirm(p) | RoundEvent::SigProposalDecline(p) => {
                Some(p.created_at)
            }
            RoundEvent::DkgCommitConfirm(p) => Some(p.created_at),
            RoundEvent::DkgDealConfirm(p) => Some(p.created_at),
            RoundEvent::DkgResponseConfirm(p) => Some(p.created_at),
            RoundEvent::DkgMasterKeyConfirm(p) => Some(p.created_at),
            RoundEvent::DkgCommitError(p)
            | RoundEvent::DkgDealError(p)
            | RoundEvent::DkgResponseError(p)
            | RoundEvent::DkgMasterKeyError(p) => Some(p.created_at),
            RoundEvent::SigningStart(p) => Some(p.created_at),
            RoundEvent::SigningConfirm(_) | RoundEvent::SigningDecline(_) => None,
            RoundEvent::PartialSignReceived(p) => Some(p.created_at),
        }
    }

    /// The DKG phase a confirmation or error event belongs to, if any.
    pub fn dkg_phase(&self) -> Option<DkgPhase> {
        match self {
            RoundEvent::DkgCommitConfirm(_) | RoundEvent::DkgCommitError(_) => {
                Some(DkgPhase::Commits)
            }
            RoundEvent::DkgDealConfirm(_) | RoundEvent::DkgDealError(_) => Some(DkgPhase::Deals),
            RoundEvent::DkgResponseConfirm(_) | RoundEvent::DkgResponseError(_) => {
                Some(DkgPhase::Responses)
            }
            RoundEvent::DkgMasterKeyConfirm(_) | RoundEvent::DkgMasterKeyError(_) => {
                Some(DkgPhase::MasterKey)
            }
            _ => None,
        }
    }
}
