//! Relay error taxonomy.
//!
//! Validation and transition failures never surface as errors here: the
//! runner demotes them to skip outcomes so one bad log record cannot stall
//! a round. Errors are reserved for system failures (store and log I/O,
//! exhausted retries) that need operator attention.

use covenant_coordination::FsmError;
use covenant_core::{CoreError, RoundId};
use thiserror::Error;

/// Failure modes of the relay layer.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Record signature did not verify against the sender's long-term key.
    #[error("record signature rejected: {0}")]
    SignatureInvalid(String),

    /// The record's sender is not a participant of the round it targets.
    #[error("unknown sender {0:?}")]
    UnknownSender(String),

    /// The record or its payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] CoreError),

    /// Machine-level failure bubbled up from event application.
    #[error(transparent)]
    Fsm(#[from] FsmError),

    /// Snapshot store I/O failed.
    #[error("snapshot store: {0}")]
    SnapshotStore(String),

    /// Message log I/O failed.
    #[error("message log: {0}")]
    Log(String),

    /// Operation queue I/O failed.
    #[error("operation queue: {0}")]
    Queue(String),

    /// The round exhausted its retry budget and was halted; its cursor is
    /// frozen until [`resume_round`](crate::runner::MachineRunner::resume_round).
    #[error("round {round_id} halted after {attempts} failed attempts: {last_error}")]
    RoundHalted {
        round_id: RoundId,
        attempts: u32,
        last_error: String,
    },
}
