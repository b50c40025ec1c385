//! End-to-end scenarios: signed records on an in-memory log, driven through
//! the runner into snapshots and the operation queue, with a manual clock
//! for deadline cases.

use covenant_coordination::{CancelReason, OperationKind};
use covenant_core::events::{
    DkgCommitConfirmation, DkgDealConfirmation, DkgMasterKeyConfirmation,
    DkgResponseConfirmation, PartialSign, SigProposalAck, SigProposalInit, SigningAck,
    SigningStart,
};
use covenant_core::{
    CoordinationConfig, ManualClock, ParticipantId, ParticipantsList, ProposedParticipant,
    RoundEvent, RoundId, SigningId, Timestamp,
};
use covenant_relay::{
    InMemoryLog, MachineRunner, MemoryOperationQueue, MemorySnapshotStore, MessageLog,
    OperationQueue, ProcessOutcome, RunnerConfig, SignedRecord, SnapshotStore,
};
use ed25519_dalek::SigningKey;
use std::sync::Arc;

const NAMES: [&str; 3] = ["alice", "bob", "carol"];

fn ts(secs: u64) -> Timestamp {
    Timestamp::from_unix_secs(secs)
}

fn member_key(index: usize) -> SigningKey {
    SigningKey::from_bytes(&[index as u8 + 1; 32])
}

fn proposed_participants() -> Vec<ProposedParticipant> {
    NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| ProposedParticipant {
            username: name.to_string(),
            long_term_pubkey: member_key(i).verifying_key().as_bytes().to_vec(),
            dkg_pubkey: vec![i as u8 + 0x50; 32],
        })
        .collect()
}

fn round_id() -> RoundId {
    ParticipantsList::new(2, proposed_participants(), ts(0))
        .unwrap()
        .round_id()
}

struct Harness {
    log: Arc<InMemoryLog>,
    store: Arc<MemorySnapshotStore>,
    queue: Arc<MemoryOperationQueue>,
    clock: ManualClock,
    runner: MachineRunner,
}

fn harness() -> Harness {
    let log = Arc::new(InMemoryLog::new());
    let store = Arc::new(MemorySnapshotStore::new());
    let queue = Arc::new(MemoryOperationQueue::new());
    let clock = ManualClock::starting_at(ts(0));
    let runner = MachineRunner::new(
        log.clone(),
        store.clone(),
        queue.clone(),
        Arc::new(clock.clone()),
        CoordinationConfig::default(),
        RunnerConfig::default(),
    );
    Harness {
        log,
        store,
        queue,
        clock,
        runner,
    }
}

async fn append(log: &InMemoryLog, sender: usize, event: RoundEvent) {
    let record = SignedRecord::create(
        round_id(),
        &event,
        NAMES[sender],
        None,
        &member_key(sender),
    )
    .unwrap();
    log.append(record).await.unwrap();
}

fn init_event() -> RoundEvent {
    RoundEvent::SigProposalInit(SigProposalInit {
        threshold: 2,
        participants: proposed_participants(),
        created_at: ts(0),
    })
}

fn sig_confirm(pid: u16, at: u64) -> RoundEvent {
    RoundEvent::SigProposalConfirm(SigProposalAck {
        participant_id: ParticipantId(pid),
        created_at: ts(at),
    })
}

async fn append_proposal_round(log: &InMemoryLog) {
    append(log, 0, init_event()).await;
    for pid in 0..3usize {
        append(log, pid, sig_confirm(pid as u16, 1)).await;
    }
}

async fn append_dkg_rounds(log: &InMemoryLog, master_keys: [&[u8]; 3]) {
    for pid in 0..3usize {
        append(
            log,
            pid,
            RoundEvent::DkgCommitConfirm(DkgCommitConfirmation {
                participant_id: ParticipantId(pid as u16),
                commit: vec![pid as u8, 0xC0],
                created_at: ts(10),
            }),
        )
        .await;
    }
    for pid in 0..3usize {
        append(
            log,
            pid,
            RoundEvent::DkgDealConfirm(DkgDealConfirmation {
                participant_id: ParticipantId(pid as u16),
                deal: vec![pid as u8, 0xD0],
                created_at: ts(11),
            }),
        )
        .await;
    }
    for pid in 0..3usize {
        append(
            log,
            pid,
            RoundEvent::DkgResponseConfirm(DkgResponseConfirmation {
                participant_id: ParticipantId(pid as u16),
                response: vec![pid as u8, 0xE0],
                created_at: ts(12),
            }),
        )
        .await;
    }
    for pid in 0..3usize {
        append(
            log,
            pid,
            RoundEvent::DkgMasterKeyConfirm(DkgMasterKeyConfirmation {
                participant_id: ParticipantId(pid as u16),
                master_key: master_keys[pid].to_vec(),
                created_at: ts(13),
            }),
        )
        .await;
    }
}

fn sid() -> SigningId {
    SigningId::new(vec![0x10; 16]).unwrap()
}

/// One full signing session: proposal, all confirmations, two partials.
async fn append_signing_session(log: &InMemoryLog) {
    append(
        log,
        0,
        RoundEvent::SigningStart(SigningStart {
            signing_id: sid(),
            proposer_id: ParticipantId(0),
            src_payload: vec![0xDE, 0xAD],
            created_at: ts(20),
        }),
    )
    .await;
    for pid in 0..3usize {
        append(
            log,
            pid,
            RoundEvent::SigningConfirm(SigningAck {
                signing_id: sid(),
                participant_id: ParticipantId(pid as u16),
            }),
        )
        .await;
    }
    for pid in 0..2usize {
        append(
            log,
            pid,
            RoundEvent::PartialSignReceived(PartialSign {
                signing_id: sid(),
                participant_id: ParticipantId(pid as u16),
                partial: vec![pid as u8, 0xF0],
                created_at: ts(22),
            }),
        )
        .await;
    }
}

// S1: happy path, N=3, t=2.
#[tokio::test]
async fn s1_happy_path_reaches_dkg_complete() {
    let h = harness();
    append_proposal_round(&h.log).await;
    append_dkg_rounds(&h.log, [&[0xCA, 0xFE], &[0xCA, 0xFE], &[0xCA, 0xFE]]).await;

    let reports = h.runner.poll().await.unwrap();
    assert_eq!(reports.len(), 16);
    assert!(reports
        .iter()
        .all(|r| matches!(r.outcome, ProcessOutcome::Applied { .. })));

    let status = h.runner.round_status(round_id()).await.unwrap().unwrap();
    assert_eq!(status.state, "dkg_completed");
    assert!(status.master_key_established);

    // One air-gap task per stage hand-off.
    let kinds: Vec<OperationKind> = h
        .queue
        .drain()
        .await
        .unwrap()
        .into_iter()
        .map(|op| op.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            OperationKind::ProduceCommits,
            OperationKind::ProduceDeals,
            OperationKind::ProduceResponses,
            OperationKind::ProduceMasterKey,
        ]
    );
}

// S2: timeout in the commit phase.
#[tokio::test]
async fn s2_commit_timeout_cancels_round() {
    let h = harness();
    append_proposal_round(&h.log).await;
    // Only alice confirms her commit.
    append(
        &h.log,
        0,
        RoundEvent::DkgCommitConfirm(DkgCommitConfirmation {
            participant_id: ParticipantId(0),
            commit: vec![0xC0],
            created_at: ts(10),
        }),
    )
    .await;
    h.runner.poll().await.unwrap();

    // Fire the ticker one second past the commit deadline (the DKG stage
    // began at t=1, when the last invitation confirmation landed).
    let deadline = CoordinationConfig::default().commit_deadline_secs;
    h.clock.set(ts(1 + deadline + 1));
    h.runner.tick().await.unwrap();

    let status = h.runner.round_status(round_id()).await.unwrap().unwrap();
    assert_eq!(status.state, "dkg_canceled_by_timeout");
    let cancellation = status.cancellation.unwrap();
    assert_eq!(cancellation.reason, CancelReason::Timeout);
    assert_eq!(
        cancellation.offenders,
        vec![ParticipantId(1), ParticipantId(2)]
    );
}

// S3: master-key mismatch.
#[tokio::test]
async fn s3_master_key_mismatch_cancels_with_reason() {
    let h = harness();
    append_proposal_round(&h.log).await;
    append_dkg_rounds(&h.log, [&[0x01], &[0x01], &[0x02]]).await;

    h.runner.poll().await.unwrap();

    let status = h.runner.round_status(round_id()).await.unwrap().unwrap();
    assert_eq!(status.state, "dkg_canceled_by_error");
    let cancellation = status.cancellation.unwrap();
    assert_eq!(cancellation.reason, CancelReason::Error);
    assert_eq!(cancellation.detail, "master key is mismatched");
    assert!(!status.master_key_established);
}

// S4: decline.
#[tokio::test]
async fn s4_decline_cancels_proposal() {
    let h = harness();
    append(&h.log, 0, init_event()).await;
    append(
        &h.log,
        1,
        RoundEvent::SigProposalDecline(SigProposalAck {
            participant_id: ParticipantId(1),
            created_at: ts(1),
        }),
    )
    .await;

    h.runner.poll().await.unwrap();

    let status = h.runner.round_status(round_id()).await.unwrap().unwrap();
    assert_eq!(status.state, "sig_canceled_by_participant");
    let cancellation = status.cancellation.unwrap();
    assert_eq!(cancellation.reason, CancelReason::Declined);
    assert_eq!(cancellation.offenders, vec![ParticipantId(1)]);
}

// S5: signing happy path after S1.
#[tokio::test]
async fn s5_signing_completes_with_threshold_partials() {
    let h = harness();
    append_proposal_round(&h.log).await;
    append_dkg_rounds(&h.log, [&[0xCA, 0xFE], &[0xCA, 0xFE], &[0xCA, 0xFE]]).await;
    append_signing_session(&h.log).await;

    h.runner.poll().await.unwrap();

    let status = h.runner.round_status(round_id()).await.unwrap().unwrap();
    assert_eq!(status.state, "signing_completed");

    let operations = h.queue.drain().await.unwrap();
    let recovery = operations
        .iter()
        .find(|op| op.kind == OperationKind::RecoverSignature)
        .expect("signature recovery task queued");
    let task: covenant_coordination::RecoveryTask =
        serde_json::from_slice(&recovery.data).unwrap();
    assert_eq!(task.partials.len(), 2);
    assert_eq!(task.src_payload, vec![0xDE, 0xAD]);
    assert!(operations
        .iter()
        .any(|op| op.kind == OperationKind::ProducePartialSign));
}

// S6: replay equivalence, through a completed signing session so the
// timestamp-less signing acks are covered too.
#[tokio::test]
async fn s6_replaying_the_log_reproduces_the_snapshot() {
    let h = harness();
    append_proposal_round(&h.log).await;
    append_dkg_rounds(&h.log, [&[0xCA, 0xFE], &[0xCA, 0xFE], &[0xCA, 0xFE]]).await;
    append_signing_session(&h.log).await;
    h.runner.poll().await.unwrap();

    let original = h.store.load(&round_id()).await.unwrap().unwrap();

    // Fresh store and runner, same log, wall clock far in the future: the
    // replayed snapshot must still match bit for bit.
    let replay_store = Arc::new(MemorySnapshotStore::new());
    let replay_runner = MachineRunner::new(
        h.log.clone(),
        replay_store.clone(),
        Arc::new(MemoryOperationQueue::new()),
        Arc::new(ManualClock::starting_at(ts(1_000_000))),
        CoordinationConfig::default(),
        RunnerConfig::default(),
    );
    replay_runner.poll().await.unwrap();

    let replayed = replay_store.load(&round_id()).await.unwrap().unwrap();
    assert_eq!(replayed, original);
}

// Replaying into a *warm* store must be a pure no-op.
#[tokio::test]
async fn replayed_offsets_are_elided() {
    let h = harness();
    append_proposal_round(&h.log).await;
    h.runner.poll().await.unwrap();
    let before = h.store.load(&round_id()).await.unwrap().unwrap();

    // Re-read everything from offset zero through a second runner that
    // shares the warm store.
    let second = MachineRunner::new(
        h.log.clone(),
        h.store.clone(),
        h.queue.clone(),
        Arc::new(h.clock.clone()),
        CoordinationConfig::default(),
        RunnerConfig::default(),
    );
    let reports = second.poll().await.unwrap();
    assert!(reports
        .iter()
        .all(|r| matches!(r.outcome, ProcessOutcome::Duplicate)));
    assert_eq!(h.store.load(&round_id()).await.unwrap().unwrap(), before);
}

#[tokio::test]
async fn forged_and_foreign_records_are_rejected() {
    let h = harness();
    append(&h.log, 0, init_event()).await;

    // bob's confirmation signed with carol's key.
    let forged = SignedRecord::create(
        round_id(),
        &sig_confirm(1, 1),
        NAMES[1],
        None,
        &member_key(2),
    )
    .unwrap();
    h.log.append(forged).await.unwrap();

    // A confirmation for a round nobody initialized.
    let foreign = SignedRecord::create(
        RoundId::from_bytes([7; 16]),
        &sig_confirm(0, 1),
        NAMES[0],
        None,
        &member_key(0),
    )
    .unwrap();
    h.log.append(foreign).await.unwrap();

    let reports = h.runner.poll().await.unwrap();
    assert!(matches!(reports[0].outcome, ProcessOutcome::Applied { .. }));
    assert!(matches!(
        &reports[1].outcome,
        ProcessOutcome::Rejected { .. }
    ));
    assert!(matches!(
        &reports[2].outcome,
        ProcessOutcome::Rejected { .. }
    ));

    // The forged confirmation left no trace.
    let status = h.runner.round_status(round_id()).await.unwrap().unwrap();
    assert_eq!(status.state, "sig_awaiting_confirmations");
}

#[tokio::test]
async fn late_confirmations_are_elided_not_fatal() {
    let h = harness();
    append(&h.log, 0, init_event()).await;
    append(
        &h.log,
        1,
        RoundEvent::SigProposalDecline(SigProposalAck {
            participant_id: ParticipantId(1),
            created_at: ts(1),
        }),
    )
    .await;
    // carol's confirm arrives after the decline already canceled the round.
    append(&h.log, 2, sig_confirm(2, 2)).await;

    let reports = h.runner.poll().await.unwrap();
    assert!(matches!(
        &reports[2].outcome,
        ProcessOutcome::Elided { .. }
    ));
    let status = h.runner.round_status(round_id()).await.unwrap().unwrap();
    assert_eq!(status.state, "sig_canceled_by_participant");
}
