//! The air-gap operation queue contract.
//!
//! Completed transitions produce operations: opaque task blobs the human
//! operator ferries to the air-gapped signer (QR encoding happens in the
//! front-end, out of scope here). Many transitions produce, one operator
//! consumes.

use crate::error::RelayError;
use async_trait::async_trait;
use covenant_coordination::{OperationIntent, OperationKind};
use covenant_core::{RoundId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A queued work item for the air-gapped module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub round_id: RoundId,
    pub kind: OperationKind,
    /// Canonical JSON task payload, schema per kind.
    pub data: Vec<u8>,
    pub created_at: Timestamp,
}

impl Operation {
    /// Materialize a machine-emitted intent into a queueable operation.
    pub fn from_intent(round_id: RoundId, intent: OperationIntent, created_at: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            round_id,
            kind: intent.kind,
            data: intent.data,
            created_at,
        }
    }
}

/// Multi-producer, single-consumer queue of pending operations.
#[async_trait]
pub trait OperationQueue: Send + Sync {
    async fn push(&self, operation: Operation) -> Result<(), RelayError>;

    /// Remove and return everything pending, oldest first.
    async fn drain(&self) -> Result<Vec<Operation>, RelayError>;
}

/// In-memory queue for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryOperationQueue {
    pending: Mutex<Vec<Operation>>,
}

impl MemoryOperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending count without consuming.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[async_trait]
impl OperationQueue for MemoryOperationQueue {
    async fn push(&self, operation: Operation) -> Result<(), RelayError> {
        self.pending.lock().push(operation);
        Ok(())
    }

    async fn drain(&self) -> Result<Vec<Operation>, RelayError> {
        Ok(std::mem::take(&mut *self.pending.lock()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operation(kind: OperationKind) -> Operation {
        Operation {
            id: Uuid::new_v4(),
            round_id: RoundId::from_bytes([1; 16]),
            kind,
            data: vec![1, 2, 3],
            created_at: Timestamp::from_unix_secs(0),
        }
    }

    #[tokio::test]
    async fn drain_empties_the_queue_in_order() {
        let queue = MemoryOperationQueue::new();
        queue
            .push(operation(OperationKind::ProduceCommits))
            .await
            .unwrap();
        queue
            .push(operation(OperationKind::ProduceDeals))
            .await
            .unwrap();
        assert_eq!(queue.len(), 2);

        let drained = queue.drain().await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].kind, OperationKind::ProduceCommits);
        assert_eq!(drained[1].kind, OperationKind::ProduceDeals);
        assert!(queue.is_empty());
    }
}
