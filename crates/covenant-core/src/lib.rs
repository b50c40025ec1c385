//! Shared vocabulary for the covenant coordination core.
//!
//! This crate defines the types every other covenant crate speaks:
//! round/participant identifiers, the validated participant list a round is
//! born from, quorum bookkeeping, the canonical event payloads carried on
//! the message log, wall-clock abstraction, and configuration.
//!
//! Nothing in here performs cryptography beyond hashing: commits, deals,
//! responses, master keys and partial signatures are opaque byte strings
//! produced and consumed by the air-gapped signer.

pub mod config;
pub mod error;
pub mod events;
pub mod identifiers;
pub mod participant;
pub mod quorum;
pub mod time;

pub use config::CoordinationConfig;
pub use error::CoreError;
pub use events::RoundEvent;
pub use identifiers::{DkgPhase, ParticipantId, RoundId, SigningId};
pub use participant::{Participant, ParticipantsList, ProposedParticipant};
pub use quorum::Quorum;
pub use time::{Clock, ManualClock, SystemClock, Timestamp};

/// Convenience result alias for fallible core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
