//! Signature proposal machine: invitation and opt-in.
//!
//! The first valid `sig_proposal_init` creates the round: it fixes the
//! participant set and threshold, hands out indices, and starts the
//! confirmation deadline. Every confirm or decline chains the validator,
//! which decides between cancellation (decline or deadline) and handing the
//! quorum over to the DKG machine.

use crate::error::FsmError;
use crate::kernel::{ActionCtx, ActionEffect, EventKey, InternalEvent, MachineEvent, Transition};
use crate::payload::{
    CancelReason, Cancellation, RoundPayload, SigProposalParticipant, SigProposalPayload,
};
use crate::responses::{InvitationEntry, RoundResponse};
use crate::state::State;
use covenant_core::{ParticipantsList, Quorum, RoundEvent};

/// Transition rows owned by this machine.
pub(crate) fn transitions() -> Vec<Transition> {
    vec![
        Transition {
            src: State::Idle,
            event: EventKey::SigProposalInit,
            dst: State::SigAwaitingConfirmations,
            action: Some(action_init),
        },
        Transition {
            src: State::SigAwaitingConfirmations,
            event: EventKey::SigProposalConfirm,
            dst: State::SigAwaitingConfirmations,
            action: Some(action_confirm),
        },
        Transition {
            src: State::SigAwaitingConfirmations,
            event: EventKey::SigProposalDecline,
            dst: State::SigAwaitingConfirmations,
            action: Some(action_decline),
        },
        Transition {
            src: State::SigAwaitingConfirmations,
            event: EventKey::SigProposalValidate,
            dst: State::SigAwaitingConfirmations,
            action: Some(action_validate),
        },
        Transition {
            src: State::SigAwaitingConfirmations,
            event: EventKey::SigCancelByTimeout,
            dst: State::SigCanceledByTimeout,
            action: Some(action_cancel_by_timeout),
        },
        Transition {
            src: State::SigAwaitingConfirmations,
            event: EventKey::SigCancelByParticipant,
            dst: State::SigCanceledByParticipant,
            action: Some(action_cancel_by_participant),
        },
        Transition {
            src: State::SigAwaitingConfirmations,
            event: EventKey::SigProposalConfirmedInternal,
            dst: State::SigConfirmed,
            action: Some(action_confirmed),
        },
    ]
}

fn action_init(
    payload: &mut RoundPayload,
    event: &MachineEvent,
    _ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let MachineEvent::External(RoundEvent::SigProposalInit(init)) = event else {
        return Err(FsmError::UnexpectedEventPayload {
            event: event.name().to_string(),
        });
    };

    let participants =
        ParticipantsList::new(init.threshold, init.participants.clone(), init.created_at)?;

    let mut quorum = Quorum::new();
    for participant in participants.participants() {
        quorum.insert(
            participant.id,
            SigProposalParticipant {
                username: participant.username.clone(),
                status: crate::payload::SigProposalStatus::AwaitConfirmation,
                updated_at: init.created_at,
            },
        );
    }

    let invitations = participants
        .participants()
        .iter()
        .map(|p| InvitationEntry {
            participant_id: p.id,
            username: p.username.clone(),
            threshold: participants.threshold(),
            dkg_pubkey: p.dkg_pubkey.clone(),
        })
        .collect();

    let expires_at = init
        .created_at
        .saturating_add_secs(payload.config().signature_proposal_deadline_secs);

    tracing::info!(
        round_id = %participants.round_id(),
        participants = participants.len(),
        threshold = participants.threshold(),
        "signature proposal initialized"
    );

    payload.proposal = Some(SigProposalPayload {
        participants,
        quorum,
        created_at: init.created_at,
        updated_at: init.created_at,
        expires_at,
    });

    Ok(ActionEffect {
        next: None,
        response: Some(RoundResponse::Invitations(invitations)),
        operation: None,
    })
}

fn action_confirm(
    payload: &mut RoundPayload,
    event: &MachineEvent,
    _ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let MachineEvent::External(RoundEvent::SigProposalConfirm(ack)) = event else {
        return Err(FsmError::UnexpectedEventPayload {
            event: event.name().to_string(),
        });
    };

    let proposal = payload.proposal_mut()?;
    let entry = proposal
        .quorum
        .get_mut(&ack.participant_id)
        .ok_or(FsmError::UnknownParticipant(ack.participant_id))?;

    use crate::payload::SigProposalStatus::*;
    if entry.status != AwaitConfirmation {
        return Err(FsmError::AlreadyAnswered {
            participant: ack.participant_id,
            status: format!("{:?}", entry.status),
        });
    }
    entry.status = Confirmed;
    entry.updated_at = ack.created_at;
    proposal.updated_at = ack.created_at;

    Ok(ActionEffect::chain(InternalEvent::SigProposalValidate))
}

fn action_decline(
    payload: &mut RoundPayload,
    event: &MachineEvent,
    _ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let MachineEvent::External(RoundEvent::SigProposalDecline(ack)) = event else {
        return Err(FsmError::UnexpectedEventPayload {
            event: event.name().to_string(),
        });
    };

    let proposal = payload.proposal_mut()?;
    let entry = proposal
        .quorum
        .get_mut(&ack.participant_id)
        .ok_or(FsmError::UnknownParticipant(ack.participant_id))?;

    use crate::payload::SigProposalStatus::*;
    if entry.status != AwaitConfirmation {
        return Err(FsmError::AlreadyAnswered {
            participant: ack.participant_id,
            status: format!("{:?}", entry.status),
        });
    }
    entry.status = Declined;
    entry.updated_at = ack.created_at;
    proposal.updated_at = ack.created_at;

    tracing::info!(participant = %ack.participant_id, "invitation declined");

    Ok(ActionEffect::chain(InternalEvent::SigProposalValidate))
}

/// Deadline first, then declines, then full confirmation.
fn action_validate(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let proposal = payload.proposal_mut()?;

    use crate::payload::SigProposalStatus::*;

    if proposal.expires_at.is_before(ctx.now) {
        return Ok(ActionEffect::chain(InternalEvent::SigCancelByTimeout));
    }
    if proposal.quorum.values().any(|p| p.status == Declined) {
        return Ok(ActionEffect::chain(InternalEvent::SigCancelByParticipant));
    }
    if proposal.quorum.values().all(|p| p.status == Confirmed) {
        return Ok(ActionEffect::chain(
            InternalEvent::SigProposalConfirmedInternal,
        ));
    }

    Ok(ActionEffect::none())
}

fn action_cancel_by_timeout(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    use crate::payload::SigProposalStatus::*;
    let offenders = {
        let proposal = payload.proposal_mut()?;
        proposal
            .quorum
            .iter()
            .filter(|(_, p)| p.status != Confirmed)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>()
    };
    tracing::warn!(?offenders, "signature proposal timed out");
    payload.cancellation = Some(Cancellation {
        reason: CancelReason::Timeout,
        at: ctx.now,
        offenders,
        detail: "confirmation deadline passed".to_string(),
    });
    Ok(ActionEffect::none())
}

fn action_cancel_by_participant(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    use crate::payload::SigProposalStatus::*;
    let offenders = {
        let proposal = payload.proposal_mut()?;
        proposal
            .quorum
            .iter()
            .filter(|(_, p)| p.status == Declined)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>()
    };
    payload.cancellation = Some(Cancellation {
        reason: CancelReason::Declined,
        at: ctx.now,
        offenders,
        detail: "invitation declined".to_string(),
    });
    Ok(ActionEffect::none())
}

/// Everyone accepted: hand the quorum to the DKG machine.
fn action_confirmed(
    _payload: &mut RoundPayload,
    _event: &MachineEvent,
    _ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    Ok(ActionEffect::chain(InternalEvent::DkgInitialize))
}
