//! Client-side leader discovery, quorum read, and leader-directed write.

use std::time::Duration;

use tracing::{debug, warn};

use kvstore_transport::{send, TimeoutClass};
use kvstore_wire::Message;

/// Default bound on client retry attempts.
pub const DEFAULT_RETRIES: usize = 3;

/// The key `find_leader` probes with — any peer's answer to a read of this
/// key carries the `leader_id` it currently believes in, which is all
/// leader discovery needs.
pub const FIND_LEADER_PROBE_KEY: &str = "dummy";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no majority-agreed leader could be found")]
    NoLeader,
    #[error("fewer than quorum peers agreed on a value")]
    QuorumNotReached,
    #[error("write was not accepted")]
    WriteRejected,
}

/// A short-lived client: membership list, quorum size, and the leader
/// discovered at runtime. The leader is rediscovered at the start of every
/// write attempt rather than cached once, so a write retries against
/// whichever node the cluster currently agrees is leader, even if that
/// changed since the last attempt.
pub struct Client {
    peers: Vec<(i64, String)>,
    quorum_size: usize,
    retries: usize,
}

impl Client {
    /// `peers` should be given in cluster-config order (index = node id);
    /// that order is what makes tie-breaking in [`tally`] deterministic.
    pub fn new(peers: Vec<(i64, String)>) -> Self {
        let quorum_size = peers.len() / 2 + 1;
        Self { peers, quorum_size, retries: DEFAULT_RETRIES }
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    async fn broadcast(&self, message: &Message, class: TimeoutClass) -> Vec<Message> {
        let sends = self.peers.iter().map(|(_, addr)| send(addr, message, class));
        futures::future::join_all(sends).await
    }

    /// Sends `READ{key="dummy"}` to every peer and tallies by `leader_id`.
    /// Returns the peer whose reported leader reached quorum, or `None`.
    pub async fn find_leader(&self) -> Option<(i64, String)> {
        let probe = Message::Read { key: FIND_LEADER_PROBE_KEY.to_string() };
        let responses = self.broadcast(&probe, TimeoutClass::Immediate).await;

        let reported: Vec<Option<i64>> = responses
            .iter()
            .map(|m| match m {
                Message::Accepted { leader_id, .. } => *leader_id,
                _ => None,
            })
            .collect();

        let leader_id = tally(reported, self.quorum_size)??;
        self.peers.iter().find(|(id, _)| *id == leader_id).cloned()
    }

    /// Sends `READ{key}` to every peer and tallies by `value`. Succeeds iff
    /// some value's count reaches `quorum_size`.
    pub async fn read(&self, key: &str) -> Result<String, ClientError> {
        for attempt in 0..self.retries {
            let probe = Message::Read { key: key.to_string() };
            let responses = self.broadcast(&probe, TimeoutClass::Immediate).await;
            let values: Vec<String> = responses
                .into_iter()
                .filter_map(|m| match m {
                    Message::Accepted { value, .. } => Some(value),
                    _ => None,
                })
                .collect();

            if let Some(value) = tally(values, self.quorum_size) {
                return Ok(value);
            }
            debug!(attempt, key, "read quorum not reached, retrying");
        }
        Err(ClientError::QuorumNotReached)
    }

    /// Rediscovers the leader and sends `WRITE{key,value}` to it with the
    /// *awaiting* timeout class. Succeeds iff the response is ACCEPTED.
    pub async fn write(&self, key: &str, value: &str) -> Result<(), ClientError> {
        for attempt in 0..self.retries {
            let Some((leader_id, leader_addr)) = self.find_leader().await else {
                debug!(attempt, "no leader found, retrying");
                continue;
            };
            let request = Message::Write { key: key.to_string(), value: value.to_string() };
            let response = send(&leader_addr, &request, TimeoutClass::Awaiting).await;
            match response {
                Message::Accepted { .. } => return Ok(()),
                Message::WriteNack { .. } => {
                    debug!(attempt, leader_id, "leader nacked the write, retrying");
                }
                other => {
                    warn!(attempt, leader_id, kind = other.kind(), "unexpected write response, retrying");
                }
            }
        }
        Err(ClientError::WriteRejected)
    }
}

/// Tallies `items` by equality and returns the first-seen item whose final
/// count reaches `quorum_size` — "first-seen" meaning first in the
/// caller's iteration order, which for both call sites above is peer
/// declaration order. Ties below quorum fail regardless of which value is
/// picked, and ties at or above quorum can't occur in a well-formed
/// cluster, so this tie-break only has to be deterministic, not
/// "correct" in any stronger sense.
fn tally<T: PartialEq + Clone>(items: Vec<T>, quorum_size: usize) -> Option<T> {
    let mut counts: Vec<(T, usize)> = Vec::new();
    for item in items {
        match counts.iter_mut().find(|(k, _)| *k == item) {
            Some(entry) => entry.1 += 1,
            None => counts.push((item, 1)),
        }
    }
    counts.into_iter().find(|(_, count)| *count >= quorum_size).map(|(k, _)| k)
}

/// Small helper exposed for CLI/tests that want to size a sensible
/// end-to-end wait without reaching into `kvstore-transport` directly.
pub fn awaiting_timeout() -> Duration {
    TimeoutClass::Awaiting.duration()
}
