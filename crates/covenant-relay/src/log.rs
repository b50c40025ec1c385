//! The append-only message log contract.
//!
//! Production deployments back this with a broker or chain topic; the
//! contract is only what the runner consumes: append with offset
//! assignment, and ordered reads from an offset. The in-memory
//! implementation serves tests and single-process embeddings.

use crate::error::RelayError;
use crate::record::SignedRecord;
use async_trait::async_trait;
use parking_lot::RwLock;

/// An ordered stream of signed records with monotonically increasing
/// offsets.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Append a record; the log assigns and returns its offset.
    async fn append(&self, record: SignedRecord) -> Result<u64, RelayError>;

    /// All records with `offset >= from_offset`, in offset order.
    async fn get_messages(&self, from_offset: u64) -> Result<Vec<SignedRecord>, RelayError>;
}

/// Vec-backed log for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryLog {
    records: RwLock<Vec<SignedRecord>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl MessageLog for InMemoryLog {
    async fn append(&self, mut record: SignedRecord) -> Result<u64, RelayError> {
        let mut records = self.records.write();
        let offset = records.len() as u64;
        record.offset = offset;
        records.push(record);
        Ok(offset)
    }

    async fn get_messages(&self, from_offset: u64) -> Result<Vec<SignedRecord>, RelayError> {
        let records = self.records.read();
        let start = (from_offset as usize).min(records.len());
        Ok(records[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_core::events::SigProposalAck;
    use covenant_core::{ParticipantId, RoundEvent, RoundId, Timestamp};
    use ed25519_dalek::SigningKey;

    fn record() -> SignedRecord {
        let event = RoundEvent::SigProposalConfirm(SigProposalAck {
            participant_id: ParticipantId(0),
            created_at: Timestamp::from_unix_secs(1),
        });
        SignedRecord::create(
            RoundId::from_bytes([1; 16]),
            &event,
            "alice",
            None,
            &SigningKey::from_bytes(&[3; 32]),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn append_assigns_sequential_offsets() {
        let log = InMemoryLog::new();
        assert_eq!(log.append(record()).await.unwrap(), 0);
        assert_eq!(log.append(record()).await.unwrap(), 1);
        assert_eq!(log.append(record()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reads_start_at_the_requested_offset() {
        let log = InMemoryLog::new();
        for _ in 0..3 {
            log.append(record()).await.unwrap();
        }
        let tail = log.get_messages(1).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].offset, 1);
        assert_eq!(tail[1].offset, 2);

        assert!(log.get_messages(99).await.unwrap().is_empty());
    }
}
