//! The composite per-round machine.
//!
//! `RoundMachine` owns a round's state and payload and exposes the runner's
//! whole contract: `apply` for log events, `tick` for timer-driven
//! validation, `dump`/`restore` for durable snapshots, and read-only status
//! queries that keep answering after the round goes terminal.

use crate::error::FsmError;
use crate::kernel::{
    decode_snapshot, encode_snapshot, run_chain, ActionCtx, Applied, InternalEvent, MachineEvent,
    Transition,
};
use crate::payload::RoundPayload;
use crate::responses::RoundStatus;
use crate::state::State;
use crate::{dkg_proposal, signature_proposal, signing_proposal};
use covenant_core::{CoordinationConfig, ParticipantsList, RoundEvent, RoundId, Timestamp};
use std::sync::OnceLock;

/// One round's composite state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundMachine {
    state: State,
    payload: RoundPayload,
}

impl RoundMachine {
    /// A fresh idle machine; the first valid `sig_proposal_init` creates the
    /// round proper.
    pub fn new(config: CoordinationConfig) -> Self {
        Self {
            state: State::Idle,
            payload: RoundPayload::new(config),
        }
    }

    /// The immutable transition table, assembled once from the three
    /// chained machines.
    fn table() -> &'static [Transition] {
        static TABLE: OnceLock<Vec<Transition>> = OnceLock::new();
        TABLE.get_or_init(|| {
            let mut rows = signature_proposal::transitions();
            rows.extend(dkg_proposal::transitions());
            rows.extend(signing_proposal::transitions());
            rows
        })
    }

    /// Apply one external event and drain its internal chain atomically.
    ///
    /// Deadline checks and timestamp updates run at the event's own
    /// `created_at` when it carries one; events without a timestamp
    /// (signing acks) fall back to the round's last recorded activity, so a
    /// snapshot is a pure function of the event sequence and never of the
    /// caller's clock. `now` only seeds a round that has no history yet.
    /// On error neither state nor payload changes.
    pub fn apply(&mut self, event: RoundEvent, now: Timestamp) -> Result<Applied, FsmError> {
        let ctx = ActionCtx {
            now: event
                .created_at()
                .or_else(|| self.payload.last_activity_at())
                .unwrap_or(now),
        };
        let head = MachineEvent::External(event);

        let mut scratch = self.payload.clone();
        let applied = run_chain(Self::table(), self.state, &mut scratch, head, &ctx)?;
        self.payload = scratch;
        self.state = applied.state;
        Ok(applied)
    }

    /// Run the state's validator at `now` so timeout transitions fire
    /// without inbound traffic. Returns `None` when the state has nothing to
    /// validate (idle, terminal, or between phases).
    pub fn tick(&mut self, now: Timestamp) -> Result<Option<Applied>, FsmError> {
        let Some(validate) = validate_event_for(self.state) else {
            return Ok(None);
        };
        let ctx = ActionCtx { now };

        let mut scratch = self.payload.clone();
        let applied = run_chain(
            Self::table(),
            self.state,
            &mut scratch,
            MachineEvent::Internal(validate),
            &ctx,
        )?;
        self.payload = scratch;
        self.state = applied.state;
        Ok(Some(applied))
    }

    /// Serialize state and payload into the version-tagged snapshot form.
    pub fn dump(&self) -> Result<Vec<u8>, FsmError> {
        encode_snapshot(self.state, &self.payload)
    }

    /// Rebuild a machine from [`dump`](Self::dump) output.
    ///
    /// The snapshot carries the configuration the round was created under,
    /// so a restored round keeps its original deadlines.
    pub fn restore(bytes: &[u8]) -> Result<Self, FsmError> {
        let (state, payload) = decode_snapshot(bytes)?;
        Ok(Self { state, payload })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn payload(&self) -> &RoundPayload {
        &self.payload
    }

    /// Content-derived round identifier, once initialized.
    pub fn round_id(&self) -> Option<RoundId> {
        self.payload.round_id()
    }

    /// The participant set, once initialized. The runner uses it to resolve
    /// senders' long-term keys for signature verification.
    pub fn participants(&self) -> Option<&ParticipantsList> {
        self.payload.participants()
    }

    /// Queryable status view; keeps working for terminal rounds.
    pub fn status(&self) -> RoundStatus {
        RoundStatus::build(self.state, &self.payload)
    }
}

/// The validator internal event for states that have one.
fn validate_event_for(state: State) -> Option<InternalEvent> {
    match state {
        State::SigAwaitingConfirmations => Some(InternalEvent::SigProposalValidate),
        State::DkgCommitsAwaitConfirmations
        | State::DkgDealsAwaitConfirmations
        | State::DkgResponsesAwaitConfirmations
        | State::DkgMasterKeyAwaitConfirmations => Some(InternalEvent::DkgValidate),
        State::SigningAwaitConfirmations | State::SigningAwaitPartialSigns => {
            Some(InternalEvent::SigningValidate)
        }
        _ => None,
    }
}
