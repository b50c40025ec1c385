//! The transition engine.
//!
//! Transitions are `(src_state, event, dst_state, action)` rows registered
//! once in an immutable table. External events arrive from the log or the
//! ticker; internal events are emitted by actions and re-applied immediately
//! within the same call, forming an atomic chain with no persistence between
//! links. Actions mutate the payload they are handed and may emit at most
//! one internal event.

use crate::error::FsmError;
use crate::payload::RoundPayload;
use crate::responses::{OperationIntent, RoundResponse};
use crate::state::State;
use covenant_core::{RoundEvent, Timestamp};
use serde::{Deserialize, Serialize};

/// Events that exist only inside an event chain; never on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InternalEvent {
    SigProposalValidate,
    SigProposalConfirmedInternal,
    SigCancelByParticipant,
    SigCancelByTimeout,
    DkgInitialize,
    DkgValidate,
    DkgPhaseConfirmed,
    DkgCancelByTimeout,
    DkgCancelByError,
    SigningValidate,
    SigningConfirmedInternal,
    SigningCompleteInternal,
    SigningCancelByError,
    SigningCancelByTimeout,
}

impl InternalEvent {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            InternalEvent::SigProposalValidate => "sig_proposal_validate",
            InternalEvent::SigProposalConfirmedInternal => "sig_proposal_confirmed_internal",
            InternalEvent::SigCancelByParticipant => "sig_cancel_by_participant",
            InternalEvent::SigCancelByTimeout => "sig_cancel_by_timeout",
            InternalEvent::DkgInitialize => "dkg_initialize",
            InternalEvent::DkgValidate => "dkg_validate",
            InternalEvent::DkgPhaseConfirmed => "dkg_phase_confirmed",
            InternalEvent::DkgCancelByTimeout => "dkg_cancel_by_timeout",
            InternalEvent::DkgCancelByError => "dkg_cancel_by_error",
            InternalEvent::SigningValidate => "signing_validate",
            InternalEvent::SigningConfirmedInternal => "signing_confirmed_internal",
            InternalEvent::SigningCompleteInternal => "signing_complete_internal",
            InternalEvent::SigningCancelByError => "signing_cancel_by_error",
            InternalEvent::SigningCancelByTimeout => "signing_cancel_by_timeout",
        }
    }
}

/// Either kind of event, as seen by the transition table.
#[derive(Debug, Clone)]
pub(crate) enum MachineEvent {
    External(RoundEvent),
    Internal(InternalEvent),
}

impl MachineEvent {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            MachineEvent::External(ev) => ev.name(),
            MachineEvent::Internal(ev) => ev.name(),
        }
    }

    /// Lookup key: discriminant without payload.
    pub(crate) fn key(&self) -> EventKey {
        match self {
            MachineEvent::External(ev) => match ev {
                RoundEvent::SigProposalInit(_) => EventKey::SigProposalInit,
                RoundEvent::SigProposalConfirm(_) => EventKey::SigProposalConfirm,
                RoundEvent::SigProposalDecline(_) => EventKey::SigProposalDecline,
                RoundEvent::DkgCommitConfirm(_) => EventKey::DkgCommitConfirm,
                RoundEvent::DkgDealConfirm(_) => EventKey::DkgDealConfirm,
                RoundEvent::DkgResponseConfirm(_) => EventKey::DkgResponseConfirm,
                RoundEvent::DkgMasterKeyConfirm(_) => EventKey::DkgMasterKeyConfirm,
                RoundEvent::DkgCommitError(_) => EventKey::DkgCommitError,
                RoundEvent::DkgDealError(_) => EventKey::DkgDealError,
                RoundEvent::DkgResponseError(_) => EventKey::DkgResponseError,
                RoundEvent::DkgMasterKeyError(_) => EventKey::DkgMasterKeyError,
                RoundEvent::SigningStart(_) => EventKey::SigningStart,
                RoundEvent::SigningConfirm(_) => EventKey::SigningConfirm,
                RoundEvent::SigningDecline(_) => EventKey::SigningDecline,
                RoundEvent::PartialSignReceived(_) => EventKey::PartialSignReceived,
            },
            MachineEvent::Internal(ev) => match ev {
                InternalEvent::SigProposalValidate => EventKey::SigProposalValidate,
                InternalEvent::SigProposalConfirmedInternal => {
                    EventKey::SigProposalConfirmedInternal
                }
                InternalEvent::SigCancelByParticipant => EventKey::SigCancelByParticipant,
                InternalEvent::SigCancelByTimeout => EventKey::SigCancelByTimeout,
                InternalEvent::DkgInitialize => EventKey::DkgInitialize,
                InternalEvent::DkgValidate => EventKey::DkgValidate,
                InternalEvent::DkgPhaseConfirmed => EventKey::DkgPhaseConfirmed,
                InternalEvent::DkgCancelByTimeout => EventKey::DkgCancelByTimeout,
                InternalEvent::DkgCancelByError => EventKey::DkgCancelByError,
                InternalEvent::SigningValidate => EventKey::SigningValidate,
                InternalEvent::SigningConfirmedInternal => EventKey::SigningConfirmedInternal,
                InternalEvent::SigningCompleteInternal => EventKey::SigningCompleteInternal,
                InternalEvent::SigningCancelByError => EventKey::SigningCancelByError,
                InternalEvent::SigningCancelByTimeout => EventKey::SigningCancelByTimeout,
            },
        }
    }
}

/// Fieldless discriminants used to key the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKey {
    // External.
    SigProposalInit,
    SigProposalConfirm,
    SigProposalDecline,
    DkgCommitConfirm,
    DkgDealConfirm,
    DkgResponseConfirm,
    DkgMasterKeyConfirm,
    DkgCommitError,
    DkgDealError,
    DkgResponseError,
    DkgMasterKeyError,
    SigningStart,
    SigningConfirm,
    SigningDecline,
    PartialSignReceived,
    // Internal.
    SigProposalValidate,
    SigProposalConfirmedInternal,
    SigCancelByParticipant,
    SigCancelByTimeout,
    DkgInitialize,
    DkgValidate,
    DkgPhaseConfirmed,
    DkgCancelByTimeout,
    DkgCancelByError,
    SigningValidate,
    SigningConfirmedInternal,
    SigningCompleteInternal,
    SigningCancelByError,
    SigningCancelByTimeout,
}

/// Context every action receives.
///
/// `now` is the triggering event's `created_at` when it carries one, else
/// the caller's clock; deadline checks read it so that replaying a log
/// re-evaluates expiry at the original event times.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActionCtx {
    pub now: Timestamp,
}

/// What an action produced besides its payload mutation.
#[derive(Debug, Default)]
pub(crate) struct ActionEffect {
    /// At most one internal event, applied next in the same chain.
    pub next: Option<InternalEvent>,
    pub response: Option<RoundResponse>,
    pub operation: Option<OperationIntent>,
}

impl ActionEffect {
    pub(crate) fn none() -> Self {
        Self::default()
    }

    pub(crate) fn chain(next: InternalEvent) -> Self {
        Self {
            next: Some(next),
            ..Self::default()
        }
    }
}

/// One row of the transition table.
pub(crate) struct Transition {
    pub src: State,
    pub event: EventKey,
    pub dst: State,
    pub action: Option<Action>,
}

pub(crate) type Action =
    fn(&mut RoundPayload, &MachineEvent, &ActionCtx) -> Result<ActionEffect, FsmError>;

/// Outcome of applying one external event (and its internal chain).
#[derive(Debug)]
pub struct Applied {
    /// State after the whole chain committed.
    pub state: State,
    /// Response for the front-end that submitted the event, if any.
    pub response: Option<RoundResponse>,
    /// Work items for the air-gap operation queue, in emission order.
    pub operations: Vec<OperationIntent>,
}

/// Run an event chain against a scratch payload.
///
/// Returns the final state and accumulated effects; on any error the caller
/// discards the scratch and keeps its committed payload, which is what makes
/// a failed action (or a panic unwinding through one) side-effect free.
pub(crate) fn run_chain(
    table: &[Transition],
    mut state: State,
    payload: &mut RoundPayload,
    head: MachineEvent,
    ctx: &ActionCtx,
) -> Result<Applied, FsmError> {
    let mut event = head;
    let mut response = None;
    let mut operations = Vec::new();

    loop {
        let key = event.key();
        let row = table
            .iter()
            .find(|t| t.src == state && t.event == key)
            .ok_or_else(|| FsmError::TransitionNotFound {
                state: state.name().to_string(),
                event: event.name().to_string(),
            })?;

        let effect = match row.action {
            Some(action) => action(payload, &event, ctx)?,
            None => ActionEffect::none(),
        };

        if state != row.dst {
            tracing::debug!(from = state.name(), to = row.dst.name(), event = event.name(), "transition");
        }
        state = row.dst;

        if effect.response.is_some() {
            response = effect.response;
        }
        if let Some(op) = effect.operation {
            operations.push(op);
        }

        match effect.next {
            Some(internal) => event = MachineEvent::Internal(internal),
            None => break,
        }
    }

    Ok(Applied {
        state,
        response,
        operations,
    })
}

// ========== Snapshots ==========

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Version-tagged serialized machine.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct VersionedSnapshot {
    pub version: u16,
    pub state: State,
    pub payload: RoundPayload,
}

pub(crate) fn encode_snapshot(state: State, payload: &RoundPayload) -> Result<Vec<u8>, FsmError> {
    let snapshot = VersionedSnapshot {
        version: SNAPSHOT_VERSION,
        state,
        payload: payload.clone(),
    };
    bincode::serialize(&snapshot).map_err(|e| FsmError::Snapshot(e.to_string()))
}

pub(crate) fn decode_snapshot(bytes: &[u8]) -> Result<(State, RoundPayload), FsmError> {
    // The version is the leading fixed-width field; check it before trusting
    // the rest of the layout.
    let version: u16 = bytes
        .get(..2)
        .ok_or_else(|| FsmError::Snapshot("snapshot too short".to_string()))
        .and_then(|prefix| {
            bincode::deserialize(prefix).map_err(|e| FsmError::Snapshot(e.to_string()))
        })?;
    if version != SNAPSHOT_VERSION {
        return Err(FsmError::UnsupportedSnapshotVersion(version));
    }
    let snapshot: VersionedSnapshot =
        bincode::deserialize(bytes).map_err(|e| FsmError::Snapshot(e.to_string()))?;
    Ok((snapshot.state, snapshot.payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::CoordinationConfig;

    #[test]
    fn snapshot_round_trip() {
        let payload = RoundPayload::new(CoordinationConfig::default());
        let bytes = encode_snapshot(State::Idle, &payload).unwrap();
        let (state, restored) = decode_snapshot(&bytes).unwrap();
        assert_eq!(state, State::Idle);
        assert_eq!(restored, payload);
    }

    #[test]
    fn snapshot_rejects_unknown_version() {
        let payload = RoundPayload::new(CoordinationConfig::default());
        let mut bytes = encode_snapshot(State::Idle, &payload).unwrap();
        bytes[0] = 0xFF;
        bytes[1] = 0xFF;
        let err = decode_snapshot(&bytes).unwrap_err();
        assert!(matches!(err, FsmError::UnsupportedSnapshotVersion(_)));
    }

    #[test]
    fn snapshot_rejects_truncation() {
        let err = decode_snapshot(&[1]).unwrap_err();
        assert!(matches!(err, FsmError::Snapshot(_)));
    }
}
