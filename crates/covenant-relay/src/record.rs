//! Signed records on the message log.
//!
//! Every record carries a detached ed25519 signature over its canonical
//! form minus `signature` and `offset` (the log assigns the offset after
//! signing). The runner refuses to apply a record whose signature does not
//! verify against the sender's long-term key from the round's participant
//! set.

use crate::error::RelayError;
use covenant_core::{RoundEvent, RoundId};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One message on the append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRecord {
    /// Sender-chosen unique id; part of the dedupe key.
    pub id: Uuid,
    /// The round this record belongs to.
    pub round_id: RoundId,
    /// Wire name of the event (see [`covenant_core::events`]).
    pub event: String,
    /// Canonical JSON event payload.
    pub data: Vec<u8>,
    /// Detached ed25519 signature over [`signable_bytes`](Self::signable_bytes).
    pub signature: Vec<u8>,
    /// Username of the sending participant.
    pub sender: String,
    /// Optional addressee for point-to-point payloads.
    pub recipient: Option<String>,
    /// Assigned by the log on append; zero until then.
    pub offset: u64,
}

/// The canonical view that gets signed: everything except `signature` and
/// `offset`. Field order is part of the wire contract.
#[derive(Serialize)]
struct SignableView<'a> {
    id: &'a Uuid,
    round_id: &'a RoundId,
    event: &'a str,
    data: &'a [u8],
    sender: &'a str,
    recipient: &'a Option<String>,
}

impl SignedRecord {
    /// Build and sign a record for an event.
    pub fn create(
        round_id: RoundId,
        event: &RoundEvent,
        sender: impl Into<String>,
        recipient: Option<String>,
        key: &SigningKey,
    ) -> Result<Self, RelayError> {
        let mut record = Self {
            id: Uuid::new_v4(),
            round_id,
            event: event.name().to_string(),
            data: event.encode()?,
            signature: Vec::new(),
            sender: sender.into(),
            recipient,
            offset: 0,
        };
        let signature = key.sign(&record.signable_bytes()?);
        record.signature = signature.to_bytes().to_vec();
        Ok(record)
    }

    /// Canonical bytes covered by the signature.
    pub fn signable_bytes(&self) -> Result<Vec<u8>, RelayError> {
        let view = SignableView {
            id: &self.id,
            round_id: &self.round_id,
            event: &self.event,
            data: &self.data,
            sender: &self.sender,
            recipient: &self.recipient,
        };
        serde_json::to_vec(&view)
            .map_err(|e| RelayError::Decode(covenant_core::CoreError::Encoding(e)))
    }

    /// Verify the detached signature against a long-term public key.
    pub fn verify(&self, public_key: &[u8]) -> Result<(), RelayError> {
        let key_bytes: [u8; 32] = public_key
            .try_into()
            .map_err(|_| RelayError::SignatureInvalid("long-term key is not 32 bytes".into()))?;
        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| RelayError::SignatureInvalid(e.to_string()))?;
        let signature = Signature::from_slice(&self.signature)
            .map_err(|e| RelayError::SignatureInvalid(e.to_string()))?;
        key.verify(&self.signable_bytes()?, &signature)
            .map_err(|e| RelayError::SignatureInvalid(e.to_string()))
    }

    /// Decode the event this record carries.
    pub fn decode_event(&self) -> Result<RoundEvent, RelayError> {
        Ok(RoundEvent::decode(&self.event, &self.data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::events::{SigProposalAck, SigProposalInit};
    use covenant_core::{ParticipantId, ProposedParticipant, Timestamp};

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn round_id() -> RoundId {
        RoundId::from_bytes([9; 16])
    }

    fn confirm_event() -> RoundEvent {
        RoundEvent::SigProposalConfirm(SigProposalAck {
            participant_id: ParticipantId(0),
            created_at: Timestamp::from_unix_secs(5),
        })
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let key = key(7);
        let record =
            SignedRecord::create(round_id(), &confirm_event(), "alice", None, &key).unwrap();
        record
            .verify(key.verifying_key().as_bytes())
            .expect("signature should verify");
        assert_eq!(record.decode_event().unwrap(), confirm_event());
    }

    #[test]
    fn verification_fails_for_wrong_key() {
        let record =
            SignedRecord::create(round_id(), &confirm_event(), "alice", None, &key(7)).unwrap();
        let err = record
            .verify(key(8).verifying_key().as_bytes())
            .unwrap_err();
        assert!(matches!(err, RelayError::SignatureInvalid(_)));
    }

    #[test]
    fn verification_fails_for_tampered_payload() {
        let mut record =
            SignedRecord::create(round_id(), &confirm_event(), "alice", None, &key(7)).unwrap();
        record.data[0] ^= 0xFF;
        assert!(record.verify(key(7).verifying_key().as_bytes()).is_err());
    }

    #[test]
    fn offset_is_outside_the_signature() {
        let key = key(7);
        let mut record =
            SignedRecord::create(round_id(), &confirm_event(), "alice", None, &key).unwrap();
        record.offset = 123;
        record
            .verify(key.verifying_key().as_bytes())
            .expect("offset must not affect the signature");
    }

    #[test]
    fn init_record_carries_the_full_proposal() {
        let key = key(1);
        let event = RoundEvent::SigProposalInit(SigProposalInit {
            threshold: 2,
            participants: vec![
                ProposedParticipant {
                    username: "alice".into(),
                    long_term_pubkey: key.verifying_key().as_bytes().to_vec(),
                    dkg_pubkey: vec![0xAA; 32],
                },
                ProposedParticipant {
                    username: "bob".into(),
                    long_term_pubkey: vec![0xBB; 32],
                    dkg_pubkey: vec![0xBC; 32],
                },
            ],
            created_at: Timestamp::from_unix_secs(0),
        });
        let record = SignedRecord::create(round_id(), &event, "alice", None, &key).unwrap();
        match record.decode_event().unwrap() {
            RoundEvent::SigProposalInit(init) => assert_eq!(init.participants.len(), 2),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
