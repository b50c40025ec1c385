//! Identifier types for rounds, signing sessions and participants.
//!
//! A `RoundId` is content-derived: hashing the canonical encoding of the
//! initial proposal means every honest node computes the same identifier
//! without coordination, and the identifier doubles as a commitment to the
//! participant set and threshold.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Byte length of a [`RoundId`].
pub const ROUND_ID_LEN: usize = 16;

/// Minimum byte length of a [`SigningId`].
pub const SIGNING_ID_MIN_LEN: usize = 16;

/// Identifies one DKG round: the first 128 bits of the BLAKE3 digest of the
/// canonical proposal encoding (see [`ParticipantsList::content_hash`]).
///
/// [`ParticipantsList::content_hash`]: crate::participant::ParticipantsList::content_hash
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RoundId([u8; ROUND_ID_LEN]);

impl RoundId {
    /// Wrap raw bytes as a round identifier.
    pub fn from_bytes(bytes: [u8; ROUND_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Truncate a BLAKE3 digest to the identifier width.
    pub fn from_digest(digest: &blake3::Hash) -> Self {
        let mut bytes = [0u8; ROUND_ID_LEN];
        bytes.copy_from_slice(&digest.as_bytes()[..ROUND_ID_LEN]);
        Self(bytes)
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; ROUND_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for RoundId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|e| CoreError::MalformedIdentifier(e.to_string()))?;
        let bytes: [u8; ROUND_ID_LEN] =
            raw.try_into()
                .map_err(|raw: Vec<u8>| CoreError::InvalidIdentifierLength {
                    what: "round id",
                    expected: ROUND_ID_LEN,
                    got: raw.len(),
                })?;
        Ok(Self(bytes))
    }
}

/// Identifies one signing session within a DKG round.
///
/// Chosen by the proposer, opaque to the core; must be at least
/// [`SIGNING_ID_MIN_LEN`] bytes and unique within its round.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SigningId(Vec<u8>);

impl SigningId {
    /// Validate and wrap proposer-supplied bytes.
    pub fn new(bytes: Vec<u8>) -> Result<Self, CoreError> {
        if bytes.len() < SIGNING_ID_MIN_LEN {
            return Err(CoreError::InvalidIdentifierLength {
                what: "signing id",
                expected: SIGNING_ID_MIN_LEN,
                got: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for SigningId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Index of a participant within a round.
///
/// Assigned by the proposer as the position in the proposed participant
/// list; stable for the whole round.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ParticipantId(pub u16);

impl ParticipantId {
    /// Numeric index.
    pub fn index(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four confirmation phases of the DKG proposal machine, in protocol
/// order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum DkgPhase {
    Commits,
    Deals,
    Responses,
    MasterKey,
}

impl DkgPhase {
    /// Phase that follows this one, if any.
    pub fn next(&self) -> Option<DkgPhase> {
        match self {
            DkgPhase::Commits => Some(DkgPhase::Deals),
            DkgPhase::Deals => Some(DkgPhase::Responses),
            DkgPhase::Responses => Some(DkgPhase::MasterKey),
            DkgPhase::MasterKey => None,
        }
    }

    /// Lower-case name used in log lines and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            DkgPhase::Commits => "commit",
            DkgPhase::Deals => "deal",
            DkgPhase::Responses => "response",
            DkgPhase::MasterKey => "master key",
        }
    }
}

impl fmt::Display for DkgPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_id_hex_round_trip() {
        let id = RoundId::from_bytes([7u8; ROUND_ID_LEN]);
        let parsed: RoundId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn round_id_rejects_wrong_length() {
        let err = "0badc0de".parse::<RoundId>().unwrap_err();
        assert!(matches!(err, CoreError::InvalidIdentifierLength { .. }));
    }

    #[test]
    fn round_id_rejects_non_hex() {
        assert!("zz".repeat(16).parse::<RoundId>().is_err());
    }

    #[test]
    fn signing_id_enforces_minimum_length() {
        assert!(SigningId::new(vec![1u8; 15]).is_err());
        assert!(SigningId::new(vec![1u8; 16]).is_ok());
        assert!(SigningId::new(vec![1u8; 64]).is_ok());
    }

    #[test]
    fn phase_order_is_linear() {
        assert_eq!(DkgPhase::Commits.next(), Some(DkgPhase::Deals));
        assert_eq!(DkgPhase::Deals.next(), Some(DkgPhase::Responses));
        assert_eq!(DkgPhase::Responses.next(), Some(DkgPhase::MasterKey));
        assert_eq!(DkgPhase::MasterKey.next(), None);
    }
}
