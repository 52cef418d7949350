//! Per-peer outbound TCP transport: one request, one response, close.
//!
//! `send` never retries — a caller that wants retries (the client) builds
//! its own loop around this. Every failure mode (connection refused,
//! timeout, malformed response) is folded into a synthetic
//! [`kvstore_wire::Message::Error`] so callers see one uniform return type.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use kvstore_wire::{decode, encode, Message, MAX_MESSAGE_BYTES};

/// Distinguishes fast single-hop RPCs from write RPCs whose server-side
/// handling may itself fan out to other peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// For probes and single-hop exchanges: HEARTBEAT, PREPARE,
    /// ACCEPT_REQUEST, READ.
    Immediate,
    /// For WRITE to the leader, whose handling may span multiple peer
    /// round-trips.
    Awaiting,
}

impl TimeoutClass {
    pub fn duration(self) -> Duration {
        match self {
            TimeoutClass::Immediate => Duration::from_secs(1),
            TimeoutClass::Awaiting => Duration::from_secs(10),
        }
    }
}

/// Opens a TCP connection to `addr`, writes `message`, reads one response,
/// and closes the socket. Returns `Message::Error` on any failure
/// (connection refused, timeout, malformed payload) instead of propagating
/// an error type, so every caller has one return shape to handle.
pub async fn send(addr: &str, message: &Message, class: TimeoutClass) -> Message {
    match tokio::time::timeout(class.duration(), send_inner(addr, message)).await {
        Ok(Ok(response)) => response,
        Ok(Err(reason)) => {
            warn!(addr, %reason, "peer send failed");
            Message::error(reason)
        }
        Err(_) => {
            warn!(addr, timeout_ms = class.duration().as_millis() as u64, "peer send timed out");
            Message::error(format!("timed out sending to {addr}"))
        }
    }
}

async fn send_inner(addr: &str, message: &Message) -> Result<Message, String> {
    let bytes = encode(message).map_err(|e| e.to_string())?;

    let mut stream = TcpStream::connect(addr).await.map_err(|e| e.to_string())?;
    stream.write_all(&bytes).await.map_err(|e| e.to_string())?;
    stream.shutdown().await.map_err(|e| e.to_string())?;

    let mut buf = vec![0u8; MAX_MESSAGE_BYTES];
    let n = stream.read(&mut buf).await.map_err(|e| e.to_string())?;
    if n == 0 {
        return Err(format!("peer {addr} closed connection without a response"));
    }
    debug!(addr, kind = message.kind(), bytes = n, "peer responded");
    decode(&buf[..n]).map_err(|e| e.to_string())
}
