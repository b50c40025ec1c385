//! Composite per-round state machine for DKG and threshold-signing
//! coordination.
//!
//! One [`RoundMachine`] drives a round through three chained stages:
//!
//! 1. **Signature proposal** — invitation and opt-in; fixes the participant
//!    set and threshold.
//! 2. **DKG proposal** — Commits, Deals, Responses and MasterKey
//!    confirmation phases in strict order, each with its own deadline.
//! 3. **Signing proposal** — per-message sessions rooted in the established
//!    key; restartable, with finished sessions archived.
//!
//! The machine is a pure function of its applied event sequence: actions
//! never read clocks or randomness, timeouts arrive as ticks from the
//! runner, and everything the machine knows lives in one serializable
//! payload (`dump`/`restore`).

mod dkg_proposal;
mod error;
mod kernel;
mod machine;
mod payload;
mod responses;
mod signature_proposal;
mod signing_proposal;
mod state;

pub use error::FsmError;
pub use kernel::{Applied, SNAPSHOT_VERSION};
pub use machine::RoundMachine;
pub use payload::{
    CancelReason, Cancellation, DkgParticipant, DkgPayload, DkgStatus, RoundPayload,
    SigProposalParticipant, SigProposalPayload, SigProposalStatus, SigningOutcome,
    SigningParticipant, SigningPayload, SigningStatus,
};
pub use responses::{
    BlobEntry, CommitTask, InvitationEntry, OperationIntent, OperationKind, ParticipantStatusEntry,
    PhaseTask, RecoveryTask, RoundResponse, RoundStatus, SigningTask,
};
pub use state::State;

/// Convenience result alias for machine operations.
pub type FsmResult<T> = std::result::Result<T, FsmError>;
