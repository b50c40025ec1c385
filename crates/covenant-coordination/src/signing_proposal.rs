//! Signing proposal machine: per-message signing sessions.
//!
//! Rooted in a DKG-complete round. Any participant may propose a payload;
//! everyone opts in, then at least `threshold` partial signatures complete
//! the session. A decline cancels only the session, never the underlying
//! key: a fresh `signing_start` re-arms the machine from any
//! signing-terminal state, and finished sessions are archived under their
//! signing id.

use crate::error::FsmError;
use crate::kernel::{ActionCtx, ActionEffect, EventKey, InternalEvent, MachineEvent, Transition};
use crate::payload::{
    RoundPayload, SigningOutcome, SigningParticipant, SigningPayload, SigningStatus,
};
use crate::responses::{BlobEntry, OperationIntent, RecoveryTask, RoundResponse, SigningTask};
use crate::state::State;
use covenant_core::{Quorum, RoundEvent, SigningId};

const START_STATES: [State; 4] = [
    State::DkgCompleted,
    State::SigningCompleted,
    State::SigningCanceledByError,
    State::SigningCanceledByTimeout,
];

/// Transition rows owned by this machine.
pub(crate) fn transitions() -> Vec<Transition> {
    let mut rows: Vec<Transition> = START_STATES
        .into_iter()
        .map(|src| Transition {
            src,
            event: EventKey::SigningStart,
            dst: State::SigningAwaitConfirmations,
            action: Some(action_start),
        })
        .collect();

    rows.extend([
        Transition {
            src: State::SigningAwaitConfirmations,
            event: EventKey::SigningConfirm,
            dst: State::SigningAwaitConfirmations,
            action: Some(action_confirm),
        },
        Transition {
            src: State::SigningAwaitConfirmations,
            event: EventKey::SigningDecline,
            dst: State::SigningAwaitConfirmations,
            action: Some(action_decline),
        },
        Transition {
            src: State::SigningAwaitConfirmations,
            event: EventKey::SigningValidate,
            dst: State::SigningAwaitConfirmations,
            action: Some(action_validate_confirmations),
        },
        Transition {
            src: State::SigningAwaitConfirmations,
            event: EventKey::SigningConfirmedInternal,
            dst: State::SigningAwaitPartialSigns,
            action: Some(action_confirmed),
        },
        Transition {
            src: State::SigningAwaitConfirmations,
            event: EventKey::SigningCancelByError,
            dst: State::SigningCanceledByError,
            action: Some(action_cancel_by_error),
        },
        Transition {
            src: State::SigningAwaitConfirmations,
            event: EventKey::SigningCancelByTimeout,
            dst: State::SigningCanceledByTimeout,
            action: Some(action_cancel_by_timeout),
        },
        Transition {
            src: State::SigningAwaitPartialSigns,
            event: EventKey::PartialSignReceived,
            dst: State::SigningAwaitPartialSigns,
            action: Some(action_partial),
        },
        Transition {
            src: State::SigningAwaitPartialSigns,
            event: EventKey::SigningValidate,
            dst: State::SigningAwaitPartialSigns,
            action: Some(action_validate_partials),
        },
        Transition {
            src: State::SigningAwaitPartialSigns,
            event: EventKey::SigningCompleteInternal,
            dst: State::SigningCompleted,
            action: Some(action_complete),
        },
        Transition {
            src: State::SigningAwaitPartialSigns,
            event: EventKey::SigningCancelByError,
            dst: State::SigningCanceledByError,
            action: Some(action_cancel_by_error),
        },
        Transition {
            src: State::SigningAwaitPartialSigns,
            event: EventKey::SigningCancelByTimeout,
            dst: State::SigningCanceledByTimeout,
            action: Some(action_cancel_by_timeout),
        },
        // Partials that arrive after the threshold completed the session are
        // still recorded; they just cannot change the outcome.
        Transition {
            src: State::SigningCompleted,
            event: EventKey::PartialSignReceived,
            dst: State::SigningCompleted,
            action: Some(action_partial_late),
        },
    ]);

    rows
}

fn action_start(
    payload: &mut RoundPayload,
    event: &MachineEvent,
    _ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let MachineEvent::External(RoundEvent::SigningStart(start)) = event else {
        return Err(FsmError::UnexpectedEventPayload {
            event: event.name().to_string(),
        });
    };

    if payload.signing_id_used(&start.signing_id) {
        return Err(FsmError::SigningIdReused(start.signing_id.clone()));
    }
    let participants = payload.participants().ok_or(FsmError::NotInitialized)?;
    if participants.get(start.proposer_id).is_none() {
        return Err(FsmError::UnknownParticipant(start.proposer_id));
    }

    let mut quorum = Quorum::new();
    for participant in participants.participants() {
        quorum.insert(
            participant.id,
            SigningParticipant {
                username: participant.username.clone(),
                status: SigningStatus::AwaitConfirmation,
                partial: Vec::new(),
                updated_at: start.created_at,
            },
        );
    }

    let expires_at = start
        .created_at
        .saturating_add_secs(payload.config().signing_deadline_secs);

    // A finished session stays queryable from the archive.
    if let Some(previous) = payload.signing.take() {
        payload
            .archived_signings
            .insert(previous.signing_id.clone(), previous);
    }

    tracing::info!(
        signing_id = %start.signing_id,
        proposer = %start.proposer_id,
        "signing session proposed"
    );

    payload.signing = Some(SigningPayload {
        signing_id: start.signing_id.clone(),
        initiator: start.proposer_id,
        src_payload: start.src_payload.clone(),
        quorum,
        outcome: SigningOutcome::InProgress,
        created_at: start.created_at,
        updated_at: start.created_at,
        expires_at,
    });

    Ok(ActionEffect::none())
}

fn active_session_check(
    signing: &SigningPayload,
    signing_id: &SigningId,
) -> Result<(), FsmError> {
    if &signing.signing_id != signing_id {
        return Err(FsmError::UnknownSigningSession(signing_id.clone()));
    }
    Ok(())
}

fn action_confirm(
    payload: &mut RoundPayload,
    event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let MachineEvent::External(RoundEvent::SigningConfirm(ack)) = event else {
        return Err(FsmError::UnexpectedEventPayload {
            event: event.name().to_string(),
        });
    };

    let signing = payload.signing_mut()?;
    active_session_check(signing, &ack.signing_id)?;
    let entry = signing
        .quorum
        .get_mut(&ack.participant_id)
        .ok_or(FsmError::UnknownParticipant(ack.participant_id))?;
    if entry.status != SigningStatus::AwaitConfirmation {
        return Err(FsmError::AlreadyAnswered {
            participant: ack.participant_id,
            status: format!("{:?}", entry.status),
        });
    }
    entry.status = SigningStatus::Confirmed;
    entry.updated_at = ctx.now;
    signing.updated_at = ctx.now;

    Ok(ActionEffect::chain(InternalEvent::SigningValidate))
}

fn action_decline(
    payload: &mut RoundPayload,
    event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let MachineEvent::External(RoundEvent::SigningDecline(ack)) = event else {
        return Err(FsmError::UnexpectedEventPayload {
            event: event.name().to_string(),
        });
    };

    let signing = payload.signing_mut()?;
    active_session_check(signing, &ack.signing_id)?;
    let entry = signing
        .quorum
        .get_mut(&ack.participant_id)
        .ok_or(FsmError::UnknownParticipant(ack.participant_id))?;
    if entry.status != SigningStatus::AwaitConfirmation {
        return Err(FsmError::AlreadyAnswered {
            participant: ack.participant_id,
            status: format!("{:?}", entry.status),
        });
    }
    entry.status = SigningStatus::Declined;
    entry.updated_at = ctx.now;
    signing.updated_at = ctx.now;

    tracing::info!(participant = %ack.participant_id, "signing declined");

    Ok(ActionEffect::chain(InternalEvent::SigningValidate))
}

fn action_validate_confirmations(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let signing = payload.signing_mut()?;

    if signing.expires_at.is_before(ctx.now) {
        return Ok(ActionEffect::chain(InternalEvent::SigningCancelByTimeout));
    }
    if signing
        .quorum
        .values()
        .any(|p| p.status == SigningStatus::Declined)
    {
        return Ok(ActionEffect::chain(InternalEvent::SigningCancelByError));
    }
    if signing
        .quorum
        .values()
        .all(|p| p.status == SigningStatus::Confirmed)
    {
        return Ok(ActionEffect::chain(InternalEvent::SigningConfirmedInternal));
    }

    Ok(ActionEffect::none())
}

/// Everyone opted in: ask the air-gapped signers for partial signatures.
fn action_confirmed(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    _ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let round_id = payload.round_id().ok_or(FsmError::NotInitialized)?;
    let signing = payload.signing_mut()?;

    let operation = OperationIntent::produce_partial_sign(&SigningTask {
        round_id,
        signing_id: signing.signing_id.clone(),
        src_payload: signing.src_payload.clone(),
    })?;

    Ok(ActionEffect {
        next: None,
        response: None,
        operation: Some(operation),
    })
}

fn record_partial(
    payload: &mut RoundPayload,
    event: &MachineEvent,
) -> Result<(), FsmError> {
    let MachineEvent::External(RoundEvent::PartialSignReceived(partial)) = event else {
        return Err(FsmError::UnexpectedEventPayload {
            event: event.name().to_string(),
        });
    };

    let signing = payload.signing_mut()?;
    active_session_check(signing, &partial.signing_id)?;
    let entry = signing
        .quorum
        .get_mut(&partial.participant_id)
        .ok_or(FsmError::UnknownParticipant(partial.participant_id))?;
    if entry.status != SigningStatus::Confirmed {
        return Err(FsmError::PartialNotAllowed {
            participant: partial.participant_id,
            status: format!("{:?}", entry.status),
        });
    }
    covenant_core::quorum::assign_once(&mut entry.partial, &partial.partial)?;
    entry.status = SigningStatus::PartialSignReceived;
    entry.updated_at = partial.created_at;
    signing.updated_at = partial.created_at;
    Ok(())
}

fn action_partial(
    payload: &mut RoundPayload,
    event: &MachineEvent,
    _ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    record_partial(payload, event)?;
    Ok(ActionEffect::chain(InternalEvent::SigningValidate))
}

fn action_partial_late(
    payload: &mut RoundPayload,
    event: &MachineEvent,
    _ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    record_partial(payload, event)?;
    Ok(ActionEffect::none())
}

fn action_validate_partials(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let threshold = payload
        .participants()
        .ok_or(FsmError::NotInitialized)?
        .threshold() as usize;
    let signing = payload.signing_mut()?;

    if signing.expires_at.is_before(ctx.now) {
        return Ok(ActionEffect::chain(InternalEvent::SigningCancelByTimeout));
    }
    if signing
        .quorum
        .values()
        .any(|p| p.status == SigningStatus::Declined)
    {
        return Ok(ActionEffect::chain(InternalEvent::SigningCancelByError));
    }

    let collected = signing
        .quorum
        .values()
        .filter(|p| p.status == SigningStatus::PartialSignReceived)
        .count();
    if collected >= threshold {
        return Ok(ActionEffect::chain(InternalEvent::SigningCompleteInternal));
    }

    Ok(ActionEffect::none())
}

/// Threshold reached: expose the partials and queue signature recovery.
fn action_complete(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let round_id = payload.round_id().ok_or(FsmError::NotInitialized)?;
    let signing = payload.signing_mut()?;
    signing.outcome = SigningOutcome::Completed;
    signing.updated_at = ctx.now;

    let partials: Vec<BlobEntry> = signing
        .collected_partials()
        .into_iter()
        .map(|(participant_id, payload)| BlobEntry {
            participant_id,
            payload,
        })
        .collect();

    tracing::info!(
        signing_id = %signing.signing_id,
        partials = partials.len(),
        "signing session completed"
    );

    let operation = OperationIntent::recover_signature(&RecoveryTask {
        round_id,
        signing_id: signing.signing_id.clone(),
        src_payload: signing.src_payload.clone(),
        partials: partials.clone(),
    })?;

    Ok(ActionEffect {
        next: None,
        response: Some(RoundResponse::SigningCompleted {
            signing_id: signing.signing_id.clone(),
            partials,
        }),
        operation: Some(operation),
    })
}

fn action_cancel_by_error(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let signing = payload.signing_mut()?;
    signing.outcome = SigningOutcome::CanceledByError;
    signing.updated_at = ctx.now;
    tracing::warn!(signing_id = %signing.signing_id, "signing session canceled");
    Ok(ActionEffect::none())
}

fn action_cancel_by_timeout(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let signing = payload.signing_mut()?;
    signing.outcome = SigningOutcome::CanceledByTimeout;
    signing.updated_at = ctx.now;
    tracing::warn!(signing_id = %signing.signing_id, "signing session timed out");
    Ok(ActionEffect::none())
}
