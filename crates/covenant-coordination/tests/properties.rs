//! Property tests for the composite round machine.
//!
//! These check the stream-level guarantees: the round identifier depends
//! only on the participant multiset, event application is deterministic,
//! statuses only move forward, and the quorum never changes shape.

use covenant_coordination::{DkgStatus, RoundMachine, State};
use covenant_core::events::{
    DkgCommitConfirmation, DkgConfirmationError, DkgDealConfirmation, DkgMasterKeyConfirmation,
    DkgResponseConfirmation, PartialSign, SigProposalAck, SigProposalInit, SigningAck,
    SigningStart,
};
use covenant_core::{
    CoordinationConfig, ParticipantId, ParticipantsList, ProposedParticipant, RoundEvent,
    SigningId, Timestamp,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn ts(secs: u64) -> Timestamp {
    Timestamp::from_unix_secs(secs)
}

fn proposed(name: &str, seed: u8) -> ProposedParticipant {
    ProposedParticipant {
        username: name.to_string(),
        long_term_pubkey: vec![seed; 32],
        dkg_pubkey: vec![seed.wrapping_add(0x40); 32],
    }
}

const NAMES: [&str; 5] = ["alice", "bob", "carol", "dave", "erin"];

fn participant_set() -> impl Strategy<Value = Vec<ProposedParticipant>> {
    (2usize..=5).prop_map(|n| {
        NAMES[..n]
            .iter()
            .enumerate()
            .map(|(i, name)| proposed(name, i as u8 + 1))
            .collect()
    })
}

/// A sender-chosen action against a running round, to be interleaved
/// arbitrarily. Invalid orderings are expected and must be rejected cleanly.
#[derive(Debug, Clone)]
enum Move {
    SigConfirm(u16),
    SigDecline(u16),
    Commit(u16),
    Deal(u16),
    Response(u16),
    MasterKey(u16, u8),
    PhaseError(u16),
    SignStart(u8),
    SignConfirm(u16),
    SignDecline(u16),
    Partial(u16),
}

fn arb_move(n: u16) -> impl Strategy<Value = Move> {
    let pid = 0..n;
    prop_oneof![
        pid.clone().prop_map(Move::SigConfirm),
        pid.clone().prop_map(Move::SigDecline),
        pid.clone().prop_map(Move::Commit),
        pid.clone().prop_map(Move::Deal),
        pid.clone().prop_map(Move::Response),
        (pid.clone(), any::<u8>()).prop_map(|(p, k)| Move::MasterKey(p, k)),
        pid.clone().prop_map(Move::PhaseError),
        any::<u8>().prop_map(Move::SignStart),
        pid.clone().prop_map(Move::SignConfirm),
        pid.clone().prop_map(Move::SignDecline),
        pid.prop_map(Move::Partial),
    ]
}

fn sid(tag: u8) -> SigningId {
    SigningId::new(vec![tag; 16]).expect("16 bytes is a valid signing id")
}

fn to_event(m: &Move, at: u64) -> RoundEvent {
    let created_at = ts(at);
    match m {
        Move::SigConfirm(p) => RoundEvent::SigProposalConfirm(SigProposalAck {
            participant_id: ParticipantId(*p),
            created_at,
        }),
        Move::SigDecline(p) => RoundEvent::SigProposalDecline(SigProposalAck {
            participant_id: ParticipantId(*p),
            created_at,
        }),
        Move::Commit(p) => RoundEvent::DkgCommitConfirm(DkgCommitConfirmation {
            participant_id: ParticipantId(*p),
            commit: vec![*p as u8, 0xC0],
            created_at,
        }),
        Move::Deal(p) => RoundEvent::DkgDealConfirm(DkgDealConfirmation {
            participant_id: ParticipantId(*p),
            deal: vec![*p as u8, 0xD0],
            created_at,
        }),
        Move::Response(p) => RoundEvent::DkgResponseConfirm(DkgResponseConfirmation {
            participant_id: ParticipantId(*p),
            response: vec![*p as u8, 0xE0],
            created_at,
        }),
        Move::MasterKey(p, key) => RoundEvent::DkgMasterKeyConfirm(DkgMasterKeyConfirmation {
            participant_id: ParticipantId(*p),
            master_key: vec![*key],
            created_at,
        }),
        Move::PhaseError(p) => RoundEvent::DkgCommitError(DkgConfirmationError {
            participant_id: ParticipantId(*p),
            error: "simulated failure".to_string(),
            created_at,
        }),
        Move::SignStart(tag) => RoundEvent::SigningStart(SigningStart {
            signing_id: sid(*tag),
            proposer_id: ParticipantId(0),
            src_payload: vec![0xDE, 0xAD],
            created_at,
        }),
        Move::SignConfirm(p) => RoundEvent::SigningConfirm(SigningAck {
            signing_id: sid(0),
            participant_id: ParticipantId(*p),
        }),
        Move::SignDecline(p) => RoundEvent::SigningDecline(SigningAck {
            signing_id: sid(0),
            participant_id: ParticipantId(*p),
        }),
        Move::Partial(p) => RoundEvent::PartialSignReceived(PartialSign {
            signing_id: sid(0),
            participant_id: ParticipantId(*p),
            partial: vec![*p as u8, 0xF0],
            created_at,
        }),
    }
}

fn init_event(participants: Vec<ProposedParticipant>, threshold: u16) -> RoundEvent {
    RoundEvent::SigProposalInit(SigProposalInit {
        threshold,
        participants,
        created_at: ts(0),
    })
}

/// Current per-participant DKG rank map, if the DKG stage exists.
fn dkg_ranks(machine: &RoundMachine) -> Option<BTreeMap<ParticipantId, u8>> {
    machine.payload().dkg().map(|dkg| {
        dkg.quorum
            .iter()
            .map(|(id, p)| (*id, p.status.rank()))
            .collect()
    })
}

proptest! {
    /// The round identifier depends only on the participant multiset and
    /// threshold, never on proposal order.
    #[test]
    fn round_id_is_order_independent(
        participants in participant_set(),
        permutation_seed in any::<u64>(),
    ) {
        let threshold = (participants.len() as u16).max(1);
        let forward =
            ParticipantsList::new(threshold, participants.clone(), ts(0)).unwrap();

        let mut shuffled = participants;
        // Cheap deterministic shuffle keyed by the seed.
        let len = shuffled.len();
        for i in 0..len {
            let j = ((permutation_seed >> (i * 8)) as usize) % len;
            shuffled.swap(i, j);
        }
        let reordered = ParticipantsList::new(threshold, shuffled, ts(0)).unwrap();

        prop_assert_eq!(forward.round_id(), reordered.round_id());
    }

    /// Applying the same accepted stream twice yields bitwise-identical
    /// snapshots, and rejected events leave no trace.
    #[test]
    fn event_application_is_deterministic(
        participants in participant_set(),
        moves in prop::collection::vec(arb_move(5), 0..60),
    ) {
        let n = participants.len() as u16;
        let threshold = 2.min(n);

        let run = || {
            let mut machine = RoundMachine::new(CoordinationConfig::default());
            machine
                .apply(init_event(participants.clone(), threshold), ts(0))
                .unwrap();
            for (i, m) in moves.iter().enumerate() {
                // Errors are fine; they must not mutate the machine.
                let _ = machine.apply(to_event(m, 1 + i as u64), ts(1 + i as u64));
            }
            machine.dump().unwrap()
        };

        prop_assert_eq!(run(), run());
    }

    /// No participant's DKG status ever moves backward, and the quorum's
    /// membership never changes after init.
    #[test]
    fn statuses_are_monotonic_and_quorum_is_fixed(
        participants in participant_set(),
        moves in prop::collection::vec(arb_move(5), 0..80),
    ) {
        let n = participants.len() as u16;
        let threshold = 2.min(n);
        let expected_ids: Vec<ParticipantId> =
            (0..n).map(ParticipantId).collect();

        let mut machine = RoundMachine::new(CoordinationConfig::default());
        machine
            .apply(init_event(participants, threshold), ts(0))
            .unwrap();

        let mut previous = dkg_ranks(&machine);
        for (i, m) in moves.iter().enumerate() {
            let before = machine.clone();
            let result = machine.apply(to_event(m, 1 + i as u64), ts(1 + i as u64));
            if result.is_err() {
                prop_assert_eq!(&machine, &before, "rejected event mutated the machine");
                continue;
            }

            if let Some(current) = dkg_ranks(&machine) {
                let ids: Vec<ParticipantId> = current.keys().copied().collect();
                prop_assert_eq!(&ids, &expected_ids, "quorum membership changed");
                if let Some(prev) = &previous {
                    for (id, rank) in &current {
                        prop_assert!(
                            rank >= &prev[id],
                            "participant {} moved backward: {} -> {}",
                            id, prev[id], rank
                        );
                    }
                }
                previous = Some(current);
            }
        }
    }

    /// A full confirmation sweep always lands in the same state regardless
    /// of the order participants answer in.
    #[test]
    fn confirmation_order_does_not_matter(
        participants in participant_set(),
        order_seed in any::<u64>(),
    ) {
        let n = participants.len() as u16;
        let mut order: Vec<u16> = (0..n).collect();
        let len = order.len();
        for i in 0..len {
            let j = ((order_seed >> (i * 8)) as usize) % len;
            order.swap(i, j);
        }

        let mut machine = RoundMachine::new(CoordinationConfig::default());
        machine.apply(init_event(participants, n), ts(0)).unwrap();
        for (i, pid) in order.iter().enumerate() {
            machine
                .apply(
                    RoundEvent::SigProposalConfirm(SigProposalAck {
                        participant_id: ParticipantId(*pid),
                        created_at: ts(1 + i as u64),
                    }),
                    ts(1 + i as u64),
                )
                .unwrap();
        }
        prop_assert_eq!(machine.state(), State::DkgCommitsAwaitConfirmations);
        prop_assert!(machine.payload().dkg().unwrap().quorum.values().all(
            |p| p.status == DkgStatus::CommitAwaitConfirmation
        ));
    }
}
