use std::collections::HashMap;

use parking_lot::Mutex;

use kvstore_wire::ProposalNumber;

/// Outcome of [`ConsensusState::observe_prepare`]: either a PROMISE for the
/// proposal number that was accepted, or the evidence to build a
/// PREPARE_NACK carrying the number that won instead.
#[derive(Debug, Clone, Copy)]
pub enum PrepareOutcome {
    Promise { prop_num: ProposalNumber },
    Nack { prop_num: ProposalNumber, leader_id: Option<i64>, last_heartbeat: i64 },
}

/// Outcome of [`ConsensusState::observe_accept`].
#[derive(Debug, Clone, Copy)]
pub enum AcceptOutcome {
    Accept,
    Nack { leader_id: Option<i64>, leader_prop_num: ProposalNumber },
}

/// The consensus fields mutated by timers, inbound handlers, and the write
/// engine, consolidated under one lock (the timer slots get their own
/// separate lock, see [`crate::timers::Timers`]). Guarding every field
/// independently would mean read-modify operations spanning two fields have
/// to take both locks in a fixed order to avoid deadlock; one lock for this
/// whole group makes that hazard impossible.
struct Inner {
    /// prop_num of the highest PREPARE this node has accepted as acceptor.
    /// Only the prop_num of that PREPARE is ever read back, so that's all
    /// that's stored here rather than the whole message.
    highest_prepare_prop_num: ProposalNumber,
    /// The proposal number this node will use next when acting as
    /// proposer. Invariant: `own_prop_num.node_id == self.id` always holds
    /// because every update preserves `node_id` via [`ProposalNumber`]'s
    /// constructors.
    own_prop_num: ProposalNumber,
    leader_id: Option<i64>,
    last_heartbeat: i64,
    prepare_phase_complete: bool,
}

/// Per-node consensus state shared across the accept-loop handlers, the
/// timers, and the write engine.
pub struct ConsensusState {
    id: i64,
    peers: HashMap<i64, String>,
    quorum_size: usize,
    inner: Mutex<Inner>,
}

impl ConsensusState {
    pub fn new(id: i64, peers: HashMap<i64, String>) -> Self {
        let quorum_size = (peers.len() + 1) / 2 + 1;
        Self {
            id,
            peers,
            quorum_size,
            inner: Mutex::new(Inner {
                highest_prepare_prop_num: ProposalNumber::new(0, id),
                own_prop_num: ProposalNumber::initial(id),
                leader_id: None,
                last_heartbeat: 0,
                prepare_phase_complete: false,
            }),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn peers(&self) -> &HashMap<i64, String> {
        &self.peers
    }

    /// `⌊N/2⌋ + 1` where `N` is the full cluster size (this node plus its
    /// peers).
    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    pub fn leader_id(&self) -> Option<i64> {
        self.inner.lock().leader_id
    }

    pub fn last_heartbeat(&self) -> i64 {
        self.inner.lock().last_heartbeat
    }

    pub fn own_prop_num(&self) -> ProposalNumber {
        self.inner.lock().own_prop_num
    }

    pub fn highest_prepare_prop_num(&self) -> ProposalNumber {
        self.inner.lock().highest_prepare_prop_num
    }

    pub fn prepare_phase_complete(&self) -> bool {
        self.inner.lock().prepare_phase_complete
    }

    pub fn set_prepare_phase_complete(&self, complete: bool) {
        self.inner.lock().prepare_phase_complete = complete;
    }

    pub fn clear_leader(&self) {
        self.inner.lock().leader_id = None;
    }

    /// Records a HEARTBEAT from `sender_id`. Heartbeats from a node whose id
    /// is not greater than ours are ignored (tie-break: higher id wins).
    /// Returns whether the heartbeat was accepted.
    ///
    /// Accepting a heartbeat from a new, higher-id leader is evidence of a
    /// new remote leader, so it also clears `prepare_phase_complete`: any
    /// promise this node won is for a tenure that's now over.
    pub fn on_heartbeat(&self, sender_id: i64, heartbeat: i64) -> bool {
        if sender_id <= self.id {
            return false;
        }
        let mut inner = self.inner.lock();
        inner.leader_id = Some(sender_id);
        inner.last_heartbeat = heartbeat;
        inner.prepare_phase_complete = false;
        true
    }

    /// Adopts `leader` as believed leader without touching `last_heartbeat`
    /// (used when the low-ball prepare probe finds majority-agreed evidence
    /// of a stable higher-id leader).
    pub fn adopt_leader(&self, leader: i64) {
        self.inner.lock().leader_id = Some(leader);
    }

    /// Self-promotion: becomes the believed leader and starts a fresh
    /// proposal round. A fresh round_no means any previously-won promise is
    /// for a stale number, so `prepare_phase_complete` is cleared.
    pub fn self_promote(&self) -> ProposalNumber {
        let mut inner = self.inner.lock();
        inner.leader_id = Some(self.id);
        inner.own_prop_num = inner.own_prop_num.increased();
        inner.prepare_phase_complete = false;
        inner.own_prop_num
    }

    /// Returns a fresh own proposal number for a new Prepare attempt.
    pub fn next_own_prop_num(&self) -> ProposalNumber {
        let mut inner = self.inner.lock();
        inner.own_prop_num = inner.own_prop_num.increased();
        inner.own_prop_num
    }

    /// Raises `own_prop_num` to strictly exceed `winning` and clears
    /// `prepare_phase_complete`, in response to a PREPARE_NACK or
    /// ACCEPT_NACK carrying a higher proposal number.
    pub fn observe_higher_proposal(&self, winning: ProposalNumber) {
        let mut inner = self.inner.lock();
        if winning.round_no >= inner.own_prop_num.round_no {
            inner.own_prop_num = ProposalNumber::new(winning.round_no, self.id);
        }
        inner.prepare_phase_complete = false;
    }

    /// Acceptor logic for an inbound PREPARE. The `≥` comparison (not
    /// strict `>`) is deliberate so retries of the same logical proposal
    /// from the same proposer aren't starved.
    pub fn observe_prepare(&self, prop_num: ProposalNumber) -> PrepareOutcome {
        let mut inner = self.inner.lock();
        if prop_num >= inner.highest_prepare_prop_num {
            inner.highest_prepare_prop_num = prop_num;
            if prop_num.round_no > inner.own_prop_num.round_no {
                inner.own_prop_num = ProposalNumber::new(prop_num.round_no, self.id);
                // Witnessed a higher-numbered PREPARE as acceptor: this
                // node's own promise (if any) is for a stale round.
                inner.prepare_phase_complete = false;
            }
            PrepareOutcome::Promise { prop_num }
        } else {
            PrepareOutcome::Nack {
                prop_num: inner.highest_prepare_prop_num,
                leader_id: inner.leader_id,
                last_heartbeat: inner.last_heartbeat,
            }
        }
    }

    /// Acceptor logic for an inbound ACCEPT_REQUEST.
    pub fn observe_accept(&self, prop_num: ProposalNumber) -> AcceptOutcome {
        let inner = self.inner.lock();
        if prop_num == inner.highest_prepare_prop_num {
            AcceptOutcome::Accept
        } else {
            AcceptOutcome::Nack {
                leader_id: inner.leader_id,
                leader_prop_num: inner.highest_prepare_prop_num,
            }
        }
    }
}
