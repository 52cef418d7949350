//! Request dispatcher: one inbound TCP connection per request, decode,
//! dispatch by message type, write one response, close.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use kvstore_consensus::{acceptor, election, write};
use kvstore_wire::{decode, encode, Message, MAX_MESSAGE_BYTES};

use crate::node::Node;

/// Runs forever, accepting one connection at a time and handing each off to
/// its own task so handlers run in parallel. Exits when the listener is
/// dropped (the caller aborts this task's `JoinHandle` on shutdown, which
/// closes the listening socket).
pub async fn run_accept_loop(listener: TcpListener, node: Arc<Node>) {
    loop {
        let (socket, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, &node).await {
                debug!(peer = %peer_addr, error = %e, "connection handling failed");
            }
        });
    }
}

async fn handle_connection(mut socket: TcpStream, node: &Node) -> std::io::Result<()> {
    let mut buf = vec![0u8; MAX_MESSAGE_BYTES];
    let n = socket.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }

    let response = match decode(&buf[..n]) {
        Ok(message) => dispatch(node, message).await,
        Err(e) => {
            warn!(node = node.state.id(), error = %e, "failed to decode request");
            Some(Message::error(e.to_string()))
        }
    };

    if let Some(response) = response {
        let bytes = encode(&response).unwrap_or_else(|e| {
            warn!(error = %e, "failed to encode response, sending ERROR instead");
            encode(&Message::error(e.to_string())).expect("ERROR message always encodes")
        });
        socket.write_all(&bytes).await?;
        socket.shutdown().await?;
    }
    Ok(())
}

/// Dispatches one decoded message to its handler. Returns `None` for
/// message types that are never valid as an inbound request (they're
/// response-only types in this protocol); those are logged and the
/// connection is closed without a response.
async fn dispatch(node: &Node, message: Message) -> Option<Message> {
    match message {
        Message::Read { key } => Some(acceptor::on_read(&node.state, node.store.as_ref(), key)),
        Message::Write { key, value } => Some(handle_write(node, key, value).await),
        Message::Prepare { prop_num, .. } => Some(acceptor::on_prepare(&node.state, prop_num)),
        Message::AcceptRequest { prop_num, key, value, .. } => {
            Some(acceptor::on_accept_request(&node.state, node.store.as_ref(), prop_num, key, value))
        }
        Message::Heartbeat { sender_id, heartbeat } => {
            election::on_heartbeat(&node.state, &node.timers, sender_id, heartbeat);
            Some(Message::Heartbeat { sender_id: node.state.id(), heartbeat: node.state.last_heartbeat() })
        }
        other @ (Message::Promise { .. }
        | Message::PrepareNack { .. }
        | Message::Accepted { .. }
        | Message::AcceptNack { .. }
        | Message::WriteNack { .. }
        | Message::Error { .. }) => {
            warn!(node = node.state.id(), kind = other.kind(), "response-only message type received as a request");
            None
        }
    }
}

/// A WRITE only ever succeeds if this node currently believes itself the
/// leader; a stray WRITE at a non-leader is rejected with WRITE_NACK
/// rather than attempting to propose without leadership, letting the
/// client's retry loop rediscover the real leader.
async fn handle_write(node: &Node, key: String, value: String) -> Message {
    if node.state.leader_id() != Some(node.state.id()) {
        debug!(node = node.state.id(), "rejecting WRITE: not the believed leader");
        return Message::WriteNack { key, value };
    }
    write::propose_write(&node.state, node.store.as_ref(), key, value).await
}
