//! Proposer-role write engine: Prepare then Accept against a quorum of
//! other peers.

use std::collections::HashMap;

use tracing::{debug, warn};

use kvstore_storage::PersistentStore;
use kvstore_transport::{send, TimeoutClass};
use kvstore_wire::{Message, ProposalNumber};

use crate::state::ConsensusState;

/// Upper bound on Prepare retries for one client WRITE. In practice the
/// client's own awaiting timeout cuts a stuck write off first; this cap
/// exists so a leader handler never spins forever if the client has
/// already given up and the loop keeps losing proposal numbers.
const MAX_PREPARE_ATTEMPTS: u32 = 10;

async fn broadcast(peers: &HashMap<i64, String>, message: &Message, class: TimeoutClass) -> Vec<Message> {
    let sends = peers.values().map(|addr| send(addr, message, class));
    futures::future::join_all(sends).await
}

/// Runs the full Prepare (if needed) + Accept sequence for one WRITE and
/// returns the message to send back to the client: ACCEPTED on success,
/// WRITE_NACK otherwise.
pub async fn propose_write(state: &ConsensusState, store: &dyn PersistentStore, key: String, value: String) -> Message {
    for attempt in 0..MAX_PREPARE_ATTEMPTS {
        if !state.prepare_phase_complete() {
            match run_prepare_phase(state, &key).await {
                PrepareResult::Won => state.set_prepare_phase_complete(true),
                PrepareResult::Lost => {
                    debug!(node = state.id(), attempt, "prepare phase lost quorum, retrying");
                    continue;
                }
            }
        }

        match run_accept_phase(state, &key, &value).await {
            Some(response) => {
                if matches!(response, Message::Accepted { .. }) {
                    store.set(&key, value.clone().into_bytes());
                }
                return response;
            }
            None => {
                debug!(node = state.id(), attempt, "accept phase lost quorum");
                return Message::WriteNack { key, value };
            }
        }
    }
    warn!(node = state.id(), "exhausted prepare retries for one write");
    Message::WriteNack { key, value }
}

enum PrepareResult {
    Won,
    Lost,
}

async fn run_prepare_phase(state: &ConsensusState, key: &str) -> PrepareResult {
    let prop_num = state.next_own_prop_num();
    let prepare = Message::Prepare { sender_id: state.id(), prop_num, key: key.to_string() };
    let responses = broadcast(state.peers(), &prepare, TimeoutClass::Immediate).await;

    let mut promises = 0;
    let mut highest_nack: Option<ProposalNumber> = None;
    for response in &responses {
        match response {
            Message::Promise { prop_num: got, .. } if *got == prop_num => promises += 1,
            Message::PrepareNack { prop_num: winning, .. } => {
                highest_nack = Some(highest_nack.map_or(*winning, |h| h.max(*winning)));
            }
            _ => {}
        }
    }

    if promises >= state.quorum_size() - 1 {
        PrepareResult::Won
    } else {
        if let Some(winning) = highest_nack {
            state.observe_higher_proposal(winning);
        }
        PrepareResult::Lost
    }
}

/// Returns `Some(message)` — ACCEPTED or a forced retry-causing NACK result
/// is not distinguished here, only the final outcome of this one round —
/// or `None` if the accept quorum was not reached.
async fn run_accept_phase(state: &ConsensusState, key: &str, value: &str) -> Option<Message> {
    let prop_num = state.own_prop_num();
    let accept_request = Message::AcceptRequest {
        sender_id: state.id(),
        prop_num,
        key: key.to_string(),
        value: value.to_string(),
    };
    let responses = broadcast(state.peers(), &accept_request, TimeoutClass::Immediate).await;

    let mut accepted = 0;
    let mut highest_nack: Option<ProposalNumber> = None;
    for response in &responses {
        match response {
            Message::Accepted { prop_num: got, .. } if *got == prop_num => accepted += 1,
            Message::AcceptNack { leader_prop_num, .. } => {
                highest_nack = Some(highest_nack.map_or(*leader_prop_num, |h| h.max(*leader_prop_num)));
            }
            _ => {}
        }
    }

    if accepted >= state.quorum_size() - 1 {
        Some(Message::Accepted {
            sender_id: state.id(),
            prop_num,
            leader_id: state.leader_id(),
            key: key.to_string(),
            value: value.to_string(),
        })
    } else {
        if let Some(winning) = highest_nack {
            state.observe_higher_proposal(winning);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvstore_storage::InMemoryStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// With zero peers (a degenerate one-node cluster), quorum_size is 1,
    /// so `quorum_size - 1 == 0` other promises/accepts are needed: every
    /// write should succeed locally without any network round-trip.
    #[tokio::test]
    async fn single_node_cluster_always_wins_its_own_write() {
        let state = ConsensusState::new(0, HashMap::new());
        let store = InMemoryStore::new();
        let response = propose_write(&state, &store, "k".into(), "v".into()).await;
        assert!(matches!(response, Message::Accepted { .. }));
        assert_eq!(store.get("k"), Some(b"v".to_vec()));
    }

    /// Answers one connection per entry of `responses`, in order, ignoring
    /// the request's contents beyond decoding it.
    async fn scripted_peer(listener: TcpListener, responses: Vec<Message>) {
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; kvstore_wire::MAX_MESSAGE_BYTES];
            let n = socket.read(&mut buf).await.unwrap();
            kvstore_wire::decode(&buf[..n]).expect("scripted peer received a malformed request");
            let bytes = kvstore_wire::encode(&response).unwrap();
            socket.write_all(&bytes).await.unwrap();
            socket.shutdown().await.unwrap();
        }
    }

    /// Scenario: Prepare loses and retries. The sole peer nacks the first
    /// Prepare with a higher proposal number, then promises the retry.
    #[tokio::test]
    async fn prepare_loses_and_retries_to_win() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = listener.local_addr().unwrap().to_string();
        let peers = HashMap::from([(5, peer_addr)]);
        let state = ConsensusState::new(0, peers);
        let store = InMemoryStore::new();

        let responder = tokio::spawn(scripted_peer(
            listener,
            vec![
                Message::PrepareNack {
                    sender_id: 5,
                    prop_num: ProposalNumber::new(1, 5),
                    leader_id: None,
                    last_heartbeat: 0,
                },
                Message::Promise { sender_id: 5, prop_num: ProposalNumber::new(2, 0) },
                Message::Accepted {
                    sender_id: 5,
                    prop_num: ProposalNumber::new(2, 0),
                    leader_id: Some(0),
                    key: "a".into(),
                    value: "1".into(),
                },
            ],
        ));

        let response = propose_write(&state, &store, "a".into(), "1".into()).await;
        assert!(matches!(response, Message::Accepted { .. }));
        assert_eq!(store.get("a"), Some(b"1".to_vec()));
        responder.await.unwrap();
    }

    /// Scenario: ACCEPT rejected after an interleaved higher Prepare. The
    /// first write attempt wins Prepare but loses Accept to a peer that
    /// meanwhile promised a higher proposer; the write fails, and a second
    /// attempt (standing in for the client's retry) wins outright.
    #[tokio::test]
    async fn accept_rejected_after_interleaved_prepare_then_retry_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = listener.local_addr().unwrap().to_string();
        let peers = HashMap::from([(7, peer_addr)]);
        let state = ConsensusState::new(0, peers);
        let store = InMemoryStore::new();

        let responder = tokio::spawn(scripted_peer(
            listener,
            vec![
                Message::Promise { sender_id: 7, prop_num: ProposalNumber::new(1, 0) },
                Message::AcceptNack {
                    sender_id: 7,
                    prop_num: ProposalNumber::new(1, 0),
                    leader_id: Some(7),
                    leader_prop_num: ProposalNumber::new(1, 7),
                },
                Message::Promise { sender_id: 7, prop_num: ProposalNumber::new(2, 0) },
                Message::Accepted {
                    sender_id: 7,
                    prop_num: ProposalNumber::new(2, 0),
                    leader_id: Some(0),
                    key: "a".into(),
                    value: "1".into(),
                },
            ],
        ));

        let first = propose_write(&state, &store, "a".into(), "1".into()).await;
        assert!(matches!(first, Message::WriteNack { .. }));
        assert_eq!(store.get("a"), None);

        let second = propose_write(&state, &store, "a".into(), "1".into()).await;
        assert!(matches!(second, Message::Accepted { .. }));
        assert_eq!(store.get("a"), Some(b"1".to_vec()));
        responder.await.unwrap();
    }
}
