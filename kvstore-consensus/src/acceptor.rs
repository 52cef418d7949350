//! Acceptor-role handlers: `on_prepare`, `on_accept_request`, `on_read`.

use kvstore_storage::PersistentStore;
use kvstore_wire::Message;

use crate::state::{AcceptOutcome, ConsensusState, PrepareOutcome};

/// Handles an inbound PREPARE and returns the PROMISE or PREPARE_NACK to
/// send back.
pub fn on_prepare(state: &ConsensusState, prop_num: kvstore_wire::ProposalNumber) -> Message {
    match state.observe_prepare(prop_num) {
        PrepareOutcome::Promise { prop_num } => {
            Message::Promise { sender_id: state.id(), prop_num }
        }
        PrepareOutcome::Nack { prop_num, leader_id, last_heartbeat } => Message::PrepareNack {
            sender_id: state.id(),
            prop_num,
            leader_id,
            last_heartbeat,
        },
    }
}

/// Handles an inbound ACCEPT_REQUEST. On acceptance, commits `value` to the
/// store before replying ACCEPTED.
pub fn on_accept_request(
    state: &ConsensusState,
    store: &dyn PersistentStore,
    prop_num: kvstore_wire::ProposalNumber,
    key: String,
    value: String,
) -> Message {
    match state.observe_accept(prop_num) {
        AcceptOutcome::Accept => {
            store.set(&key, value.clone().into_bytes());
            Message::Accepted {
                sender_id: state.id(),
                prop_num,
                leader_id: state.leader_id(),
                key,
                value,
            }
        }
        AcceptOutcome::Nack { leader_id, leader_prop_num } => Message::AcceptNack {
            sender_id: state.id(),
            prop_num,
            leader_id,
            leader_prop_num,
        },
    }
}

/// Handles an inbound READ. Readers rely on quorum agreement across peers;
/// this handler never consults other peers.
pub fn on_read(state: &ConsensusState, store: &dyn PersistentStore, key: String) -> Message {
    let value = store
        .get(&key)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    Message::Accepted {
        sender_id: state.id(),
        prop_num: state.own_prop_num(),
        leader_id: state.leader_id(),
        key,
        value,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use kvstore_storage::InMemoryStore;
    use kvstore_wire::ProposalNumber;

    use super::*;

    fn state(id: i64) -> ConsensusState {
        ConsensusState::new(id, HashMap::from([(1 - id, "127.0.0.1:9000".to_string())]))
    }

    #[test]
    fn on_prepare_promises_and_on_accept_commits() {
        let s = state(0);
        let store = InMemoryStore::new();
        let p = ProposalNumber::new(1, 2);

        let promise = on_prepare(&s, p);
        assert!(matches!(promise, Message::Promise { prop_num, .. } if prop_num == p));

        let accepted = on_accept_request(&s, &store, p, "k".into(), "v".into());
        assert!(matches!(accepted, Message::Accepted { .. }));
        assert_eq!(store.get("k"), Some(b"v".to_vec()));
    }

    #[test]
    fn on_accept_without_matching_prepare_is_nacked_and_store_untouched() {
        let s = state(0);
        let store = InMemoryStore::new();
        let accepted = on_accept_request(&s, &store, ProposalNumber::new(5, 2), "k".into(), "v".into());
        assert!(matches!(accepted, Message::AcceptNack { .. }));
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn on_read_returns_empty_string_for_missing_key() {
        let s = state(0);
        let store = InMemoryStore::new();
        match on_read(&s, &store, "missing".into()) {
            Message::Accepted { value, .. } => assert_eq!(value, ""),
            other => panic!("expected Accepted, got {other:?}"),
        }
    }
}
