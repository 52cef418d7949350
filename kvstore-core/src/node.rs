//! Node orchestration: wires consensus state, timers, storage, and the
//! request dispatcher together and runs/shuts the process down.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use kvstore_consensus::{election, ConsensusState, Timers};
use kvstore_storage::PersistentStore;

use crate::dispatcher;

/// Immutable per-node wiring: consensus state, timers, and the storage
/// handle the acceptor/write engines commit through.
pub struct Node {
    pub state: Arc<ConsensusState>,
    pub timers: Arc<Timers>,
    pub store: Arc<dyn PersistentStore>,
}

impl Node {
    pub fn new(id: i64, peers: HashMap<i64, String>, store: Arc<dyn PersistentStore>) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(ConsensusState::new(id, peers)),
            timers: Timers::new(),
            store,
        })
    }
}

/// A running node: the accept loop and the two timer-driving tasks.
/// Dropping or calling [`NodeHandle::shutdown`] cancels all three; any
/// connection handler already spawned off the accept loop keeps running to
/// completion under its own timeout.
pub struct NodeHandle {
    pub node: Arc<Node>,
    pub local_addr: std::net::SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    /// Binds `address`, arms the election timers, and starts accepting
    /// connections.
    pub async fn bind(node: Arc<Node>, address: &str) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("failed to bind {address}"))?;
        let local_addr = listener.local_addr()?;
        info!(
            node = node.state.id(),
            addr = %local_addr,
            peers = node.state.peers().len(),
            "node listening"
        );

        let (heartbeat_timeout_task, send_heartbeat_task) =
            election::start(Arc::clone(&node.state), Arc::clone(&node.timers));
        let accept_task = tokio::spawn(dispatcher::run_accept_loop(listener, Arc::clone(&node)));

        Ok(Self {
            node,
            local_addr,
            tasks: vec![heartbeat_timeout_task, send_heartbeat_task, accept_task],
        })
    }

    /// Cancels the accept loop and both timer tasks. In-flight connection
    /// handlers are not tracked here — they were spawned detached so they
    /// can run to completion under their own timeout.
    pub fn shutdown(self) {
        info!(node = self.node.state.id(), "shutting down node");
        for task in self.tasks {
            task.abort();
        }
    }
}
