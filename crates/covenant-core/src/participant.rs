//! Participants and the validated proposal list a round starts from.

use crate::error::CoreError;
use crate::identifiers::{ParticipantId, RoundId};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Smallest group that can meaningfully run a DKG.
pub const MIN_PARTICIPANTS: usize = 2;

/// A participant as named by the proposer, before indices are assigned.
///
/// Both keys are opaque to the coordination core: the long-term key signs
/// log records, the DKG key is relayed to the air-gapped module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedParticipant {
    pub username: String,
    pub long_term_pubkey: Vec<u8>,
    pub dkg_pubkey: Vec<u8>,
}

/// A participant with its round-stable index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub username: String,
    pub long_term_pubkey: Vec<u8>,
    pub dkg_pubkey: Vec<u8>,
}

/// The validated initial proposal: threshold plus indexed participants.
///
/// Indices follow the proposer's input order; the content hash (and thus the
/// round identifier) does not, so the identifier depends only on *who* is in
/// the round, not how the proposer happened to order them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantsList {
    threshold: u16,
    participants: Vec<Participant>,
    created_at: Timestamp,
}

impl ParticipantsList {
    /// Validate a proposal and assign participant indices.
    ///
    /// Rejects fewer than [`MIN_PARTICIPANTS`] entries, thresholds outside
    /// `1..=n`, and duplicate usernames.
    pub fn new(
        threshold: u16,
        proposed: Vec<ProposedParticipant>,
        created_at: Timestamp,
    ) -> Result<Self, CoreError> {
        if proposed.len() < MIN_PARTICIPANTS {
            return Err(CoreError::TooFewParticipants {
                got: proposed.len(),
                min: MIN_PARTICIPANTS,
            });
        }
        let max = proposed.len() as u16;
        if threshold < 1 || threshold > max {
            return Err(CoreError::InvalidThreshold {
                threshold,
                min: 1,
                max,
            });
        }

        let mut seen = HashSet::new();
        for entry in &proposed {
            if !seen.insert(entry.username.as_str()) {
                return Err(CoreError::DuplicateUsername(entry.username.clone()));
            }
        }

        let participants = proposed
            .into_iter()
            .enumerate()
            .map(|(i, entry)| Participant {
                id: ParticipantId(i as u16),
                username: entry.username,
                long_term_pubkey: entry.long_term_pubkey,
                dkg_pubkey: entry.dkg_pubkey,
            })
            .collect();

        Ok(Self {
            threshold,
            participants,
            created_at,
        })
    }

    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Participants in index order.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Look a participant up by index.
    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    /// Look a participant up by username.
    pub fn by_username(&self, username: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.username == username)
    }

    /// Canonical content digest of the proposal.
    ///
    /// Participants are sorted by username, then
    /// `ascii(threshold) || long_term_pubkey || dkg_pubkey || username` per
    /// participant is fed into BLAKE3. Operators compare this digest
    /// out-of-band before confirming an invitation.
    pub fn content_hash(&self) -> blake3::Hash {
        let mut sorted: Vec<&Participant> = self.participants.iter().collect();
        sorted.sort_by(|a, b| a.username.cmp(&b.username));

        let mut hasher = blake3::Hasher::new();
        hasher.update(self.threshold.to_string().as_bytes());
        for participant in sorted {
            hasher.update(&participant.long_term_pubkey);
            hasher.update(&participant.dkg_pubkey);
            hasher.update(participant.username.as_bytes());
        }
        hasher.finalize()
    }

    /// The round identifier: the content hash truncated to 128 bits.
    pub fn round_id(&self) -> RoundId {
        RoundId::from_digest(&self.content_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposed(name: &str, seed: u8) -> ProposedParticipant {
        ProposedParticipant {
            username: name.to_string(),
            long_term_pubkey: vec![seed; 32],
            dkg_pubkey: vec![seed.wrapping_add(1); 32],
        }
    }

    fn three() -> Vec<ProposedParticipant> {
        vec![proposed("alice", 1), proposed("bob", 2), proposed("carol", 3)]
    }

    #[test]
    fn assigns_indices_in_input_order() {
        let list = ParticipantsList::new(2, three(), Timestamp::from_unix_secs(0)).unwrap();
        let usernames: Vec<_> = list
            .participants()
            .iter()
            .map(|p| (p.id.index(), p.username.as_str()))
            .collect();
        assert_eq!(usernames, vec![(0, "alice"), (1, "bob"), (2, "carol")]);
    }

    #[test]
    fn rejects_bad_thresholds() {
        assert!(matches!(
            ParticipantsList::new(0, three(), Timestamp::default()),
            Err(CoreError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            ParticipantsList::new(4, three(), Timestamp::default()),
            Err(CoreError::InvalidThreshold { .. })
        ));
        assert!(ParticipantsList::new(3, three(), Timestamp::default()).is_ok());
    }

    #[test]
    fn rejects_singleton_group() {
        let err = ParticipantsList::new(1, vec![proposed("alice", 1)], Timestamp::default())
            .unwrap_err();
        assert!(matches!(err, CoreError::TooFewParticipants { got: 1, .. }));
    }

    #[test]
    fn rejects_duplicate_usernames() {
        let entries = vec![proposed("alice", 1), proposed("alice", 2)];
        let err = ParticipantsList::new(1, entries, Timestamp::default()).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateUsername(name) if name == "alice"));
    }

    #[test]
    fn round_id_ignores_input_order() {
        let forward = ParticipantsList::new(2, three(), Timestamp::default()).unwrap();
        let mut shuffled = three();
        shuffled.reverse();
        let backward = ParticipantsList::new(2, shuffled, Timestamp::default()).unwrap();
        assert_eq!(forward.round_id(), backward.round_id());
    }

    #[test]
    fn round_id_binds_threshold_and_members() {
        let base = ParticipantsList::new(2, three(), Timestamp::default()).unwrap();
        let other_threshold = ParticipantsList::new(3, three(), Timestamp::default()).unwrap();
        assert_ne!(base.round_id(), other_threshold.round_id());

        let mut entries = three();
        entries[2] = proposed("dave", 9);
        let other_member = ParticipantsList::new(2, entries, Timestamp::default()).unwrap();
        assert_ne!(base.round_id(), other_member.round_id());
    }
}
