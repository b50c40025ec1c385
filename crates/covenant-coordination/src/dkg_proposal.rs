//! DKG proposal machine: four confirmation phases in strict order.
//!
//! Commits, Deals, Responses and MasterKey share one structure: every
//! participant must submit its blob (or report failure) before the deadline,
//! and the validator decides between advancing the whole quorum to the next
//! phase, cancelling on timeout, or cancelling on a participant error. The
//! phase hand-off emits the operation that sends everyone's collected blobs
//! through the air gap for the next step.
//!
//! MasterKey additionally requires the submitted keys to be byte-equal; a
//! single disagreement fails the round, because a split key set is
//! unrecoverable.

use crate::error::FsmError;
use crate::kernel::{ActionCtx, ActionEffect, EventKey, InternalEvent, MachineEvent, Transition};
use crate::payload::{
    CancelReason, Cancellation, DkgParticipant, DkgPayload, DkgStatus, RoundPayload,
};
use crate::responses::{
    BlobEntry, CommitTask, InvitationEntry, OperationIntent, OperationKind, PhaseTask,
    RoundResponse,
};
use crate::state::State;
use covenant_core::{DkgPhase, ParticipantId, Quorum, RoundEvent, Timestamp};

const PHASES: [DkgPhase; 4] = [
    DkgPhase::Commits,
    DkgPhase::Deals,
    DkgPhase::Responses,
    DkgPhase::MasterKey,
];

/// Transition rows owned by this machine.
pub(crate) fn transitions() -> Vec<Transition> {
    let mut rows = vec![Transition {
        src: State::SigConfirmed,
        event: EventKey::DkgInitialize,
        dst: State::DkgCommitsAwaitConfirmations,
        action: Some(action_initialize),
    }];

    for phase in PHASES {
        let awaiting = State::awaiting(phase);
        let (confirm_key, error_key) = phase_event_keys(phase);
        let confirmed_dst = match phase.next() {
            Some(next) => State::awaiting(next),
            None => State::DkgCompleted,
        };

        rows.push(Transition {
            src: awaiting,
            event: confirm_key,
            dst: awaiting,
            action: Some(action_phase_confirm),
        });
        rows.push(Transition {
            src: awaiting,
            event: error_key,
            dst: awaiting,
            action: Some(action_phase_error),
        });
        rows.push(Transition {
            src: awaiting,
            event: EventKey::DkgValidate,
            dst: awaiting,
            action: Some(action_validate),
        });
        rows.push(Transition {
            src: awaiting,
            event: EventKey::DkgPhaseConfirmed,
            dst: confirmed_dst,
            action: Some(action_phase_confirmed),
        });
        rows.push(Transition {
            src: awaiting,
            event: EventKey::DkgCancelByTimeout,
            dst: State::DkgCanceledByTimeout,
            action: Some(action_cancel_by_timeout),
        });
        rows.push(Transition {
            src: awaiting,
            event: EventKey::DkgCancelByError,
            dst: State::DkgCanceledByError,
            action: Some(action_cancel_by_error),
        });
    }

    rows
}

fn phase_event_keys(phase: DkgPhase) -> (EventKey, EventKey) {
    match phase {
        DkgPhase::Commits => (EventKey::DkgCommitConfirm, EventKey::DkgCommitError),
        DkgPhase::Deals => (EventKey::DkgDealConfirm, EventKey::DkgDealError),
        DkgPhase::Responses => (EventKey::DkgResponseConfirm, EventKey::DkgResponseError),
        DkgPhase::MasterKey => (EventKey::DkgMasterKeyConfirm, EventKey::DkgMasterKeyError),
    }
}

/// The invitation stage confirmed: carry every participant (including its
/// DKG public key) into the DKG quorum and open the commit phase.
fn action_initialize(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let participants = payload.participants().ok_or(FsmError::NotInitialized)?;
    let round_id = participants.round_id();
    let threshold = participants.threshold();

    let mut quorum = Quorum::new();
    let mut invitation = Vec::with_capacity(participants.len());
    for participant in participants.participants() {
        quorum.insert(
            participant.id,
            DkgParticipant {
                username: participant.username.clone(),
                dkg_pubkey: participant.dkg_pubkey.clone(),
                status: DkgStatus::CommitAwaitConfirmation,
                commit: Vec::new(),
                deal: Vec::new(),
                response: Vec::new(),
                master_key: Vec::new(),
                updated_at: ctx.now,
                error: None,
            },
        );
        invitation.push(InvitationEntry {
            participant_id: participant.id,
            username: participant.username.clone(),
            threshold,
            dkg_pubkey: participant.dkg_pubkey.clone(),
        });
    }

    let deadline = payload.config().dkg_deadline_secs(DkgPhase::Commits);
    payload.dkg = Some(DkgPayload {
        quorum,
        phase: DkgPhase::Commits,
        created_at: ctx.now,
        updated_at: ctx.now,
        expires_at: ctx.now.saturating_add_secs(deadline),
    });

    tracing::info!(round_id = %round_id, "DKG started, awaiting commits");

    let operation = OperationIntent::produce_commits(&CommitTask {
        round_id,
        threshold,
        participants: invitation,
    })?;

    Ok(ActionEffect {
        next: None,
        response: None,
        operation: Some(operation),
    })
}

fn action_phase_confirm(
    payload: &mut RoundPayload,
    event: &MachineEvent,
    _ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let MachineEvent::External(external) = event else {
        return Err(FsmError::UnexpectedEventPayload {
            event: event.name().to_string(),
        });
    };
    let (participant_id, blob, created_at, phase): (ParticipantId, &[u8], Timestamp, DkgPhase) =
        match external {
            RoundEvent::DkgCommitConfirm(c) => {
                (c.participant_id, &c.commit, c.created_at, DkgPhase::Commits)
            }
            RoundEvent::DkgDealConfirm(c) => {
                (c.participant_id, &c.deal, c.created_at, DkgPhase::Deals)
            }
            RoundEvent::DkgResponseConfirm(c) => (
                c.participant_id,
                &c.response,
                c.created_at,
                DkgPhase::Responses,
            ),
            RoundEvent::DkgMasterKeyConfirm(c) => (
                c.participant_id,
                &c.master_key,
                c.created_at,
                DkgPhase::MasterKey,
            ),
            _ => {
                return Err(FsmError::UnexpectedEventPayload {
                    event: event.name().to_string(),
                })
            }
        };

    {
        let dkg = payload.dkg_mut()?;
        let entry = dkg
            .quorum
            .get(&participant_id)
            .ok_or(FsmError::UnknownParticipant(participant_id))?;
        if entry.status != DkgStatus::awaiting(phase) {
            return Err(FsmError::ConfirmNotAllowed {
                phase,
                participant: participant_id,
                status: format!("{:?}", entry.status),
            });
        }
    }
    payload.record_dkg_blob(participant_id, phase, blob, created_at)?;

    tracing::debug!(participant = %participant_id, phase = %phase, "confirmation recorded");

    Ok(ActionEffect::chain(InternalEvent::DkgValidate))
}

fn action_phase_error(
    payload: &mut RoundPayload,
    event: &MachineEvent,
    _ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let MachineEvent::External(external) = event else {
        return Err(FsmError::UnexpectedEventPayload {
            event: event.name().to_string(),
        });
    };
    let (report, phase) = match external {
        RoundEvent::DkgCommitError(r) => (r, DkgPhase::Commits),
        RoundEvent::DkgDealError(r) => (r, DkgPhase::Deals),
        RoundEvent::DkgResponseError(r) => (r, DkgPhase::Responses),
        RoundEvent::DkgMasterKeyError(r) => (r, DkgPhase::MasterKey),
        _ => {
            return Err(FsmError::UnexpectedEventPayload {
                event: event.name().to_string(),
            })
        }
    };

    let dkg = payload.dkg_mut()?;
    let entry = dkg
        .quorum
        .get_mut(&report.participant_id)
        .ok_or(FsmError::UnknownParticipant(report.participant_id))?;

    if entry.status == DkgStatus::confirmed(phase) {
        return Err(FsmError::ErrorAfterConfirmation {
            phase,
            participant: report.participant_id,
        });
    }
    if entry.status == DkgStatus::errored(phase) {
        return Err(FsmError::ErrorAlreadyRecorded {
            phase,
            participant: report.participant_id,
        });
    }
    if entry.status != DkgStatus::awaiting(phase) {
        return Err(FsmError::ErrorNotAllowed {
            phase,
            participant: report.participant_id,
            status: format!("{:?}", entry.status),
        });
    }

    entry.status = DkgStatus::errored(phase);
    entry.error = Some(report.error.clone());
    entry.updated_at = report.created_at;
    dkg.updated_at = report.created_at;

    tracing::warn!(
        participant = %report.participant_id,
        phase = %phase,
        error = %report.error,
        "participant reported failure"
    );

    // The validator runs on every inbound event, so a reported failure
    // cancels the phase immediately rather than at the next confirmation.
    Ok(ActionEffect::chain(InternalEvent::DkgValidate))
}

/// Deadline first, then participant errors, then (for MasterKey) byte
/// agreement, then full confirmation.
fn action_validate(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let dkg = payload.dkg_mut()?;
    let phase = dkg.phase;

    if dkg.expires_at.is_before(ctx.now) {
        return Ok(ActionEffect::chain(InternalEvent::DkgCancelByTimeout));
    }

    if dkg
        .quorum
        .values()
        .any(|p| p.status == DkgStatus::errored(phase))
    {
        return Ok(ActionEffect::chain(InternalEvent::DkgCancelByError));
    }

    if phase == DkgPhase::MasterKey {
        let confirmed: Vec<&[u8]> = dkg
            .quorum
            .values()
            .filter(|p| p.status == DkgStatus::MasterKeyConfirmed)
            .map(|p| p.master_key.as_slice())
            .collect();
        let mismatched = confirmed
            .first()
            .is_some_and(|first| confirmed.iter().any(|key| key != first));
        if mismatched {
            for participant in dkg.quorum.values_mut() {
                participant.status = DkgStatus::MasterKeyConfirmationError;
                participant.error = Some("master key is mismatched".to_string());
                participant.updated_at = ctx.now;
            }
            dkg.updated_at = ctx.now;
            return Ok(ActionEffect::chain(InternalEvent::DkgCancelByError));
        }
    }

    if dkg
        .quorum
        .values()
        .all(|p| p.status == DkgStatus::confirmed(phase))
    {
        return Ok(ActionEffect::chain(InternalEvent::DkgPhaseConfirmed));
    }

    Ok(ActionEffect::none())
}

/// Every participant confirmed: advance the quorum to the next phase, or
/// complete the DKG after MasterKey.
fn action_phase_confirmed(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let round_id = payload.round_id().ok_or(FsmError::NotInitialized)?;
    let config = payload.config().clone();
    let dkg = payload.dkg_mut()?;
    let phase = dkg.phase;

    match phase.next() {
        Some(next) => {
            let entries: Vec<BlobEntry> = dkg
                .quorum
                .iter()
                .map(|(id, p)| BlobEntry {
                    participant_id: *id,
                    payload: p.slot(phase).to_vec(),
                })
                .collect();

            for participant in dkg.quorum.values_mut() {
                participant.status = DkgStatus::awaiting(next);
                participant.updated_at = ctx.now;
            }
            dkg.phase = next;
            dkg.updated_at = ctx.now;
            dkg.expires_at = ctx.now.saturating_add_secs(config.dkg_deadline_secs(next));

            tracing::info!(round_id = %round_id, phase = %next, "phase confirmed, advancing");

            let kind = match next {
                DkgPhase::Deals => OperationKind::ProduceDeals,
                DkgPhase::Responses => OperationKind::ProduceResponses,
                DkgPhase::MasterKey => OperationKind::ProduceMasterKey,
                DkgPhase::Commits => unreachable!("commits is the first phase"),
            };
            let operation = OperationIntent::phase_task(kind, &PhaseTask { round_id, entries })?;

            Ok(ActionEffect {
                next: None,
                response: None,
                operation: Some(operation),
            })
        }
        None => {
            // MasterKey: the validator already established byte equality.
            let master_key = dkg
                .quorum
                .values()
                .map(|p| p.master_key.clone())
                .next()
                .unwrap_or_default();
            payload.master_key = Some(master_key.clone());

            tracing::info!(round_id = %round_id, "DKG completed");

            Ok(ActionEffect {
                next: None,
                response: Some(RoundResponse::DkgCompleted { master_key }),
                operation: None,
            })
        }
    }
}

fn action_cancel_by_timeout(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let (phase, offenders) = {
        let dkg = payload.dkg_mut()?;
        let phase = dkg.phase;
        let offenders: Vec<ParticipantId> = dkg
            .quorum
            .iter()
            .filter(|(_, p)| p.status != DkgStatus::confirmed(phase))
            .map(|(id, _)| *id)
            .collect();
        (phase, offenders)
    };
    tracing::warn!(phase = %phase, ?offenders, "DKG phase timed out");
    payload.cancellation = Some(Cancellation {
        reason: CancelReason::Timeout,
        at: ctx.now,
        offenders,
        detail: format!("{phase} confirmation deadline passed"),
    });
    Ok(ActionEffect::none())
}

fn action_cancel_by_error(
    payload: &mut RoundPayload,
    _event: &MachineEvent,
    ctx: &ActionCtx,
) -> Result<ActionEffect, FsmError> {
    let (phase, offenders, detail) = {
        let dkg = payload.dkg_mut()?;
        let phase = dkg.phase;
        let offenders: Vec<ParticipantId> = dkg
            .quorum
            .iter()
            .filter(|(_, p)| p.status == DkgStatus::errored(phase))
            .map(|(id, _)| *id)
            .collect();
        let detail = offenders
            .first()
            .and_then(|id| dkg.quorum.get(id))
            .and_then(|p| p.error.clone())
            .unwrap_or_else(|| "participant reported failure".to_string());
        (phase, offenders, detail)
    };
    tracing::warn!(phase = %phase, ?offenders, detail = %detail, "DKG canceled by error");
    payload.cancellation = Some(Cancellation {
        reason: CancelReason::Error,
        at: ctx.now,
        offenders,
        detail,
    });
    Ok(ActionEffect::none())
}
