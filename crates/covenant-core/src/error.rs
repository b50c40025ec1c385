//! Error type for the shared vocabulary crate.

use thiserror::Error;

/// Errors raised while validating or encoding core data.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Threshold outside the valid `1..=n` range.
    #[error("invalid threshold {threshold}: must be between {min} and {max}")]
    InvalidThreshold {
        threshold: u16,
        min: u16,
        max: u16,
    },

    /// A round needs at least two participants.
    #[error("too few participants: got {got}, need at least {min}")]
    TooFewParticipants { got: usize, min: usize },

    /// Usernames identify participants and must be unique within a round.
    #[error("duplicate participant username {0:?}")]
    DuplicateUsername(String),

    /// Payload slots are write-once; a second assignment is a protocol bug.
    #[error("payload already assigned for this phase")]
    PayloadAlreadyAssigned,

    /// An identifier had the wrong length.
    #[error("invalid {what} length: expected {expected} bytes, got {got}")]
    InvalidIdentifierLength {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Identifier could not be parsed from its hex form.
    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),

    /// The log carried an event name this build does not know.
    #[error("unknown event {0:?}")]
    UnknownEvent(String),

    /// Canonical JSON encoding or decoding failed.
    #[error("event encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A configuration field failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
