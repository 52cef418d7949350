//! Leader election: heartbeat send/receive, timeout handling, low-ball
//! prepare probe, NACK tallying, self-promotion.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use kvstore_transport::{send, TimeoutClass};
use kvstore_wire::{Message, ProposalNumber};

use crate::state::ConsensusState;
use crate::timers::{jittered_heartbeat_timeout, Timers, HEARTBEAT_PERIOD};

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Arms the heartbeat-timeout timer with a randomized timeout and starts
/// the two timer-driving tasks. Call once at node startup. Returns the two
/// task handles so the caller can track them for shutdown.
pub fn start(state: Arc<ConsensusState>, timers: Arc<Timers>) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
    let timeout_handle = {
        let state = Arc::clone(&state);
        let timers = Arc::clone(&timers);
        timers.spawn_heartbeat_timeout(move || {
            let state = Arc::clone(&state);
            let timers = Arc::clone(&timers);
            async move { on_heartbeat_timeout(&state, &timers).await }
        })
    };
    let send_handle = {
        let state = Arc::clone(&state);
        let timers = Arc::clone(&timers);
        timers.spawn_send_heartbeat(move || {
            let state = Arc::clone(&state);
            let timers = Arc::clone(&timers);
            async move { on_send_heartbeat_fired(&state, &timers).await }
        })
    };
    timers.reset_heartbeat_timeout(jittered_heartbeat_timeout());
    (timeout_handle, send_handle)
}

/// Handles an inbound HEARTBEAT. Heartbeats from `sender_id <= self.id` are
/// ignored — higher id wins on a tie. An accepted heartbeat yields the
/// leader the timer, which is why this always resets the
/// heartbeat-timeout timer on acceptance — including when this node was
/// itself a self-promoted (split-brain) leader: the demotion is enforced
/// by [`on_send_heartbeat_fired`] re-checking `leader_id` before every
/// broadcast, not by cancelling the timer directly.
pub fn on_heartbeat(state: &ConsensusState, timers: &Timers, sender_id: i64, heartbeat: i64) {
    if state.on_heartbeat(sender_id, heartbeat) {
        debug!(node = state.id(), from = sender_id, "adopted heartbeat, yielding to higher id");
        timers.reset_heartbeat_timeout(jittered_heartbeat_timeout());
    }
}

async fn on_heartbeat_timeout(state: &ConsensusState, timers: &Timers) {
    state.clear_leader();

    let probe = Message::Prepare {
        sender_id: state.id(),
        prop_num: ProposalNumber::LOWEST,
        key: String::new(),
    };
    debug!(node = state.id(), "heartbeat timeout; sending low-ball prepare probe");
    let responses = broadcast(state.peers(), &probe, TimeoutClass::Immediate).await;

    if let Some(top_leader) = stable_higher_leader(state.id(), state.quorum_size(), &responses) {
        info!(node = state.id(), leader = top_leader, "probe found a stable higher-id leader");
        state.adopt_leader(top_leader);
        timers.reset_heartbeat_timeout(jittered_heartbeat_timeout());
        return;
    }

    let prop_num = state.self_promote();
    info!(node = state.id(), round = prop_num.round_no, "self-promoting to leader");
    timers.reset_heartbeat_timeout(jittered_heartbeat_timeout());
    on_send_heartbeat_fired(state, timers).await;
}

/// Tallies PREPARE_NACK responses by `(leader_id, last_heartbeat)` and
/// decides whether they describe a stable higher-id leader.
fn stable_higher_leader(self_id: i64, quorum_size: usize, responses: &[Message]) -> Option<i64> {
    let mut leader_counts: HashMap<Option<i64>, usize> = HashMap::new();
    let mut heartbeat_counts: HashMap<(Option<i64>, i64), usize> = HashMap::new();

    for response in responses {
        if let Message::PrepareNack { leader_id, last_heartbeat, .. } = response {
            *leader_counts.entry(*leader_id).or_insert(0) += 1;
            *heartbeat_counts.entry((*leader_id, *last_heartbeat)).or_insert(0) += 1;
        }
    }

    let (&top_leader, &top_leader_count) = leader_counts.iter().max_by_key(|(_, count)| **count)?;
    let top_leader = top_leader?;
    if top_leader <= self_id || top_leader_count < quorum_size {
        return None;
    }

    let heartbeat_count = heartbeat_counts
        .iter()
        .filter(|((leader_id, _), _)| *leader_id == Some(top_leader))
        .map(|(_, count)| *count)
        .max()
        .unwrap_or(0);
    if heartbeat_count < quorum_size {
        return None;
    }

    Some(top_leader)
}

/// Fires on every `send_heartbeat_timer` tick. Broadcasts a HEARTBEAT and
/// rearms, but only while this node still believes itself the leader —
/// this is the mechanism that makes a demotion (via [`on_heartbeat`])
/// "cancel" the periodic broadcast without a separate cancel call.
async fn on_send_heartbeat_fired(state: &ConsensusState, timers: &Timers) {
    if state.leader_id() != Some(state.id()) {
        return;
    }
    let heartbeat = Message::Heartbeat { sender_id: state.id(), heartbeat: now_millis() };
    let _ = broadcast(state.peers(), &heartbeat, TimeoutClass::Immediate).await;
    timers.reset_send_heartbeat(HEARTBEAT_PERIOD);
}

/// Broadcasts `message` to every peer with the given timeout class and
/// collects the responses, ignoring which peer sent which (callers that
/// need per-peer identity read `sender_id` out of the response itself).
async fn broadcast(peers: &HashMap<i64, String>, message: &Message, class: TimeoutClass) -> Vec<Message> {
    let sends = peers.values().map(|addr| send(addr, message, class));
    futures::future::join_all(sends).await
}
