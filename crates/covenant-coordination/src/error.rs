//! Errors raised by the coordination machines.
//!
//! Transition and guard failures are recoverable values: the machine's state
//! and payload are untouched when an apply returns an error, and the caller
//! decides whether the failure is fatal (a malformed snapshot) or routine (a
//! late confirmation racing a phase change).

use covenant_core::{CoreError, DkgPhase, ParticipantId, SigningId};
use thiserror::Error;

/// Failure modes of event application.
#[derive(Debug, Error)]
pub enum FsmError {
    /// The event is not valid in the machine's current state. Routine for
    /// late or duplicated log messages; the runner demotes it to a warning.
    #[error("no transition from state {state:?} on event {event:?}")]
    TransitionNotFound { state: String, event: String },

    /// The event names a participant outside the round's quorum.
    #[error("participant {0} is not a member of this round")]
    UnknownParticipant(ParticipantId),

    /// A confirmation arrived for a participant whose status does not allow
    /// it (already confirmed, already failed, or out of phase).
    #[error("cannot confirm {phase}: participant {participant} status is {status:?}")]
    ConfirmNotAllowed {
        phase: DkgPhase,
        participant: ParticipantId,
        status: String,
    },

    /// A failure report arrived for a participant that already confirmed.
    #[error("cannot record {phase} error: participant {participant} already confirmed")]
    ErrorAfterConfirmation {
        phase: DkgPhase,
        participant: ParticipantId,
    },

    /// A failure report arrived twice for the same participant and phase.
    #[error("participant {participant} already reported a {phase} error")]
    ErrorAlreadyRecorded {
        phase: DkgPhase,
        participant: ParticipantId,
    },

    /// A failure report targeted a participant whose status belongs to a
    /// different phase entirely.
    #[error("participant {participant} status {status:?} cannot take a {phase} error")]
    ErrorNotAllowed {
        phase: DkgPhase,
        participant: ParticipantId,
        status: String,
    },

    /// A partial signature arrived from a participant that never confirmed
    /// the signing session, or that already submitted one.
    #[error("cannot accept partial signature: participant {participant} status is {status:?}")]
    PartialNotAllowed {
        participant: ParticipantId,
        status: String,
    },

    /// A proposal-stage ack arrived for a participant that already answered.
    #[error("participant {participant} already answered the proposal ({status:?})")]
    AlreadyAnswered {
        participant: ParticipantId,
        status: String,
    },

    /// An event required round payload that only exists after init.
    #[error("round payload not initialized")]
    NotInitialized,

    /// The transition table routed an event to an action expecting a
    /// different payload shape. Indicates a wiring bug, not bad input.
    #[error("event {event:?} does not carry the payload this transition expects")]
    UnexpectedEventPayload { event: String },

    /// Signing identifiers are single-use within a round.
    #[error("signing id {0} was already used in this round")]
    SigningIdReused(SigningId),

    /// The event references a signing session other than the active one.
    #[error("signing session {0} is not active")]
    UnknownSigningSession(SigningId),

    /// Validation failure from the shared vocabulary (threshold bounds,
    /// duplicate usernames, write-once payload slots).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Snapshot bytes could not be produced or parsed.
    #[error("snapshot codec: {0}")]
    Snapshot(String),

    /// Snapshot carries a version this build does not understand.
    #[error("unsupported snapshot version {0}")]
    UnsupportedSnapshotVersion(u16),
}

impl FsmError {
    /// True for the one failure the runner treats as noise rather than an
    /// error: an event that simply does not apply to the current state.
    pub fn is_transition_not_found(&self) -> bool {
        matches!(self, FsmError::TransitionNotFound { .. })
    }
}
