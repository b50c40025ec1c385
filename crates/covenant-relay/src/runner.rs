//! The durable single-writer-per-round event loop.
//!
//! For every inbound record the runner loads the round's snapshot, verifies
//! the sender's signature, applies the event, persists the new snapshot and
//! queues any emitted operations. A per-round mutex serializes application;
//! different rounds proceed in parallel. Timeout transitions are driven
//! exclusively by [`tick`](MachineRunner::tick), so machines stay clock-free.
//!
//! Failure policy: validation problems skip the record, transition
//! mismatches are demoted to warnings, and system errors are retried with
//! bounded backoff before the round is halted with its cursor frozen.

use crate::error::RelayError;
use crate::log::MessageLog;
use crate::operation::{Operation, OperationQueue};
use crate::record::SignedRecord;
use crate::snapshot::{SnapshotStore, StoredRound};
use covenant_coordination::{Applied, RoundMachine, RoundResponse, State};
use covenant_core::{Clock, CoordinationConfig, RoundEvent, RoundId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Runner limits and pacing.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Extra attempts after the first failure of a store/log operation.
    pub retry_budget: u32,
    /// Base backoff delay; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Interval of the embedded ticker (see [`MachineRunner::run_ticker`]).
    pub tick_interval_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            backoff_base_ms: 100,
            tick_interval_secs: 60,
        }
    }
}

/// How one record was handled.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Event applied; snapshot persisted.
    Applied {
        state: State,
        response: Option<RoundResponse>,
        operations: usize,
    },
    /// Offset at or below the round's cursor; replay no-op.
    Duplicate,
    /// Validation failure (signature, sender, decoding); record skipped.
    Rejected { reason: String },
    /// Event not valid in the round's current state; expected log noise.
    Elided { reason: String },
    /// The round is halted; record left for [`resume_round`](MachineRunner::resume_round).
    Halted,
}

/// One entry of a [`poll`](MachineRunner::poll) report.
#[derive(Debug)]
pub struct ProcessReport {
    pub offset: u64,
    pub round_id: RoundId,
    pub outcome: ProcessOutcome,
}

struct RoundSlot {
    halted: bool,
}

/// Drives every live round from the message log.
pub struct MachineRunner {
    log: Arc<dyn MessageLog>,
    store: Arc<dyn SnapshotStore>,
    queue: Arc<dyn OperationQueue>,
    clock: Arc<dyn Clock>,
    coordination_config: CoordinationConfig,
    config: RunnerConfig,
    rounds: RwLock<HashMap<RoundId, Arc<Mutex<RoundSlot>>>>,
    cursor: AtomicU64,
}

impl MachineRunner {
    pub fn new(
        log: Arc<dyn MessageLog>,
        store: Arc<dyn SnapshotStore>,
        queue: Arc<dyn OperationQueue>,
        clock: Arc<dyn Clock>,
        coordination_config: CoordinationConfig,
        config: RunnerConfig,
    ) -> Self {
        Self {
            log,
            store,
            queue,
            clock,
            coordination_config,
            config,
            rounds: RwLock::new(HashMap::new()),
            cursor: AtomicU64::new(0),
        }
    }

    /// The per-round mutex, created lazily and reclaimed when the round
    /// terminates.
    async fn slot(&self, round_id: RoundId) -> Arc<Mutex<RoundSlot>> {
        if let Some(slot) = self.rounds.read().await.get(&round_id) {
            return slot.clone();
        }
        let mut rounds = self.rounds.write().await;
        rounds
            .entry(round_id)
            .or_insert_with(|| Arc::new(Mutex::new(RoundSlot { halted: false })))
            .clone()
    }

    /// Retry a store/log operation with bounded exponential backoff,
    /// returning the last error once the budget is spent.
    async fn with_retry<T, F, Fut>(&self, what: &'static str, mut attempt_fn: F) -> Result<T, RelayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RelayError>>,
    {
        let mut attempt = 0u32;
        loop {
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.config.retry_budget => {
                    attempt += 1;
                    let delay = self
                        .config
                        .backoff_base_ms
                        .saturating_mul(1u64 << (attempt - 1).min(6));
                    warn!(what, attempt, error = %e, "retrying after system error");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Apply one log record to its round.
    ///
    /// Returns `Err(RoundHalted)` only when a system error survived its
    /// retry budget; every content-level problem is a skip outcome.
    pub async fn process(&self, record: &SignedRecord) -> Result<ProcessOutcome, RelayError> {
        let round_id = record.round_id;
        let slot = self.slot(round_id).await;
        let mut guard = slot.lock().await;

        if guard.halted {
            debug!(%round_id, offset = record.offset, "round halted, leaving record for resume");
            return Ok(ProcessOutcome::Halted);
        }

        let store = self.store.clone();
        let stored = match self
            .with_retry("load snapshot", move || {
                let store = store.clone();
                async move { store.load(&round_id).await }
            })
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                guard.halted = true;
                error!(%round_id, error = %e, "halting round: snapshot load failed");
                return Err(RelayError::RoundHalted {
                    round_id,
                    attempts: self.config.retry_budget + 1,
                    last_error: e.to_string(),
                });
            }
        };

        // Idempotent replay: anything at or below the cursor is a no-op.
        if let Some(last) = stored.as_ref().and_then(|s| s.last_offset) {
            if record.offset <= last {
                debug!(%round_id, offset = record.offset, last, "duplicate offset elided");
                return Ok(ProcessOutcome::Duplicate);
            }
        }

        let mut machine = match stored {
            Some(ref stored) => match RoundMachine::restore(&stored.machine) {
                Ok(machine) => machine,
                Err(e) => {
                    guard.halted = true;
                    error!(%round_id, error = %e, "halting round: snapshot is unreadable");
                    return Err(RelayError::RoundHalted {
                        round_id,
                        attempts: 1,
                        last_error: e.to_string(),
                    });
                }
            },
            None => RoundMachine::new(self.coordination_config.clone()),
        };

        let event = match record.decode_event() {
            Ok(event) => event,
            Err(e) => {
                warn!(%round_id, offset = record.offset, error = %e, "undecodable record skipped");
                return Ok(ProcessOutcome::Rejected {
                    reason: e.to_string(),
                });
            }
        };

        // Resolve the sender's long-term key: from the round's participant
        // set, or for the creating init event from its own payload.
        let sender_key = match machine.participants() {
            Some(list) => list
                .by_username(&record.sender)
                .map(|p| p.long_term_pubkey.clone()),
            None => match &event {
                RoundEvent::SigProposalInit(init) => init
                    .participants
                    .iter()
                    .find(|p| p.username == record.sender)
                    .map(|p| p.long_term_pubkey.clone()),
                _ => None,
            },
        };
        let Some(sender_key) = sender_key else {
            warn!(%round_id, sender = %record.sender, "record from non-member skipped");
            return Ok(ProcessOutcome::Rejected {
                reason: RelayError::UnknownSender(record.sender.clone()).to_string(),
            });
        };

        if let Err(e) = record.verify(&sender_key) {
            warn!(%round_id, sender = %record.sender, error = %e, "bad signature skipped");
            return Ok(ProcessOutcome::Rejected {
                reason: e.to_string(),
            });
        }

        let applied = match machine.apply(event, self.clock.now()) {
            Ok(applied) => applied,
            Err(e) if e.is_transition_not_found() => {
                debug!(%round_id, event = %record.event, reason = %e, "event elided");
                return Ok(ProcessOutcome::Elided {
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                warn!(%round_id, event = %record.event, error = %e, "event rejected");
                return Ok(ProcessOutcome::Rejected {
                    reason: e.to_string(),
                });
            }
        };

        // An init record must agree with the identifier derived from its own
        // participant list, or someone is mislabeling rounds.
        if machine.round_id() != Some(round_id) {
            warn!(%round_id, derived = ?machine.round_id(), "round id mismatch, init discarded");
            return Ok(ProcessOutcome::Rejected {
                reason: "round id does not match proposal contents".to_string(),
            });
        }

        self.persist_and_enqueue(round_id, &machine, &applied, Some(record.offset), &mut guard)
            .await?;

        if machine.state().is_round_terminal() {
            drop(guard);
            self.rounds.write().await.remove(&round_id);
            info!(%round_id, state = %machine.state(), "round terminal, slot reclaimed");
        }

        Ok(ProcessOutcome::Applied {
            state: applied.state,
            response: applied.response,
            operations: applied.operations.len(),
        })
    }

    /// Persist the machine (with the new cursor) and queue emitted
    /// operations. Operations go out only after the snapshot is durable so
    /// a persist failure cannot double-issue work on replay.
    async fn persist_and_enqueue(
        &self,
        round_id: RoundId,
        machine: &RoundMachine,
        applied: &Applied,
        offset: Option<u64>,
        guard: &mut RoundSlot,
    ) -> Result<(), RelayError> {
        let machine_bytes = machine.dump()?;
        let previous_offset = match offset {
            Some(_) => None,
            None => {
                // Tick path: keep the round's cursor untouched.
                self.store
                    .load(&round_id)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|s| s.last_offset)
            }
        };
        let stored = StoredRound {
            machine: machine_bytes,
            last_offset: offset.or(previous_offset),
        };

        let store = self.store.clone();
        let to_store = stored.clone();
        if let Err(e) = self
            .with_retry("store snapshot", move || {
                let store = store.clone();
                let stored = to_store.clone();
                async move { store.store(&round_id, &stored).await }
            })
            .await
        {
            guard.halted = true;
            error!(%round_id, error = %e, "halting round: snapshot store failed");
            return Err(RelayError::RoundHalted {
                round_id,
                attempts: self.config.retry_budget + 1,
                last_error: e.to_string(),
            });
        }

        for intent in &applied.operations {
            let operation = Operation::from_intent(round_id, intent.clone(), self.clock.now());
            if let Err(e) = self.queue.push(operation).await {
                // The snapshot is durable; the operator can rebuild the task
                // from round status if the queue write was lost.
                error!(%round_id, error = %e, "operation enqueue failed");
            }
        }

        Ok(())
    }

    /// Drain the log from the global cursor, routing records to their
    /// rounds. A halted round skips its records without stopping the sweep.
    pub async fn poll(&self) -> Result<Vec<ProcessReport>, RelayError> {
        let from = self.cursor.load(Ordering::SeqCst);
        let log = self.log.clone();
        let records = self
            .with_retry("read log", move || {
                let log = log.clone();
                async move { log.get_messages(from).await }
            })
            .await?;

        let mut reports = Vec::with_capacity(records.len());
        for record in records {
            let outcome = match self.process(&record).await {
                Ok(outcome) => outcome,
                Err(RelayError::RoundHalted { round_id, last_error, .. }) => {
                    error!(%round_id, error = %last_error, "round halted during poll");
                    ProcessOutcome::Halted
                }
                Err(e) => return Err(e),
            };
            self.cursor.store(record.offset + 1, Ordering::SeqCst);
            reports.push(ProcessReport {
                offset: record.offset,
                round_id: record.round_id,
                outcome,
            });
        }
        Ok(reports)
    }

    /// Synthesize the validator for every live round so deadline
    /// cancellations fire without inbound traffic.
    pub async fn tick(&self) -> Result<(), RelayError> {
        let now = self.clock.now();
        for round_id in self.store.list_rounds().await? {
            let slot = self.slot(round_id).await;
            let mut guard = slot.lock().await;
            if guard.halted {
                continue;
            }
            let Some(stored) = self.store.load(&round_id).await? else {
                continue;
            };
            let mut machine = match RoundMachine::restore(&stored.machine) {
                Ok(machine) => machine,
                Err(e) => {
                    warn!(%round_id, error = %e, "tick skipping unreadable snapshot");
                    continue;
                }
            };

            match machine.tick(now) {
                Ok(Some(applied)) => {
                    // Persist only when the tick actually moved something.
                    if machine.dump()? != stored.machine {
                        info!(%round_id, state = %applied.state, "tick advanced round");
                        self.persist_and_enqueue(round_id, &machine, &applied, None, &mut guard)
                            .await?;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(%round_id, error = %e, "tick validation failed"),
            }
        }
        Ok(())
    }

    /// Drive [`tick`](Self::tick) from a steady interval; run inside a
    /// spawned task for embedded deployments.
    pub async fn run_ticker(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.tick_interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "ticker sweep failed");
            }
        }
    }

    /// Un-halt a round and reprocess its records from its frozen cursor.
    pub async fn resume_round(&self, round_id: RoundId) -> Result<usize, RelayError> {
        {
            let slot = self.slot(round_id).await;
            slot.lock().await.halted = false;
        }
        let from = self
            .store
            .load(&round_id)
            .await?
            .and_then(|s| s.last_offset)
            .map(|offset| offset + 1)
            .unwrap_or(0);

        let mut applied = 0usize;
        for record in self.log.get_messages(from).await? {
            if record.round_id != round_id {
                continue;
            }
            if matches!(
                self.process(&record).await?,
                ProcessOutcome::Applied { .. }
            ) {
                applied += 1;
            }
        }
        info!(%round_id, applied, "round resumed");
        Ok(applied)
    }

    /// The runner's global log cursor (next offset it will read).
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Status view of a stored round; works for terminal rounds too.
    pub async fn round_status(
        &self,
        round_id: RoundId,
    ) -> Result<Option<covenant_coordination::RoundStatus>, RelayError> {
        let Some(stored) = self.store.load(&round_id).await? else {
            return Ok(None);
        };
        let machine = RoundMachine::restore(&stored.machine)?;
        Ok(Some(machine.status()))
    }
}
