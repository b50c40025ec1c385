//! Durable runner for covenant rounds.
//!
//! The relay connects the coordination machines to the world: signed
//! records on an append-only [`MessageLog`], whole-snapshot persistence in a
//! [`SnapshotStore`], air-gap work items on an [`OperationQueue`], and the
//! [`MachineRunner`] that serializes each round's event application and
//! drives deadline checks from a ticker.
//!
//! Front-ends (CLI/HTTP) and transports (broker topics, QR framing) sit on
//! the other side of these traits and are out of scope here.

mod error;
mod log;
mod operation;
mod record;
mod runner;
mod snapshot;

pub use error::RelayError;
pub use log::{InMemoryLog, MessageLog};
pub use operation::{MemoryOperationQueue, Operation, OperationQueue};
pub use record::SignedRecord;
pub use runner::{MachineRunner, ProcessOutcome, ProcessReport, RunnerConfig};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore, StoredRound};

/// Convenience result alias for relay operations.
pub type RelayResult<T> = std::result::Result<T, RelayError>;
