use crate::message::Message;

/// Largest JSON-encoded message the wire protocol will carry: 1024 bytes of
/// headroom for one message per connection. This is also the read buffer
/// size used by the transport and dispatcher.
pub const MAX_MESSAGE_BYTES: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("message exceeds {MAX_MESSAGE_BYTES} byte limit ({0} bytes)")]
    TooLarge(usize),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serializes a message as a single JSON object, rejecting anything over
/// [`MAX_MESSAGE_BYTES`].
pub fn encode(message: &Message) -> Result<Vec<u8>, WireError> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(WireError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

/// Decodes exactly one message from a byte slice (the bytes read off one
/// TCP connection). Unknown fields are ignored; this is serde's default.
pub fn decode(bytes: &[u8]) -> Result<Message, WireError> {
    Ok(serde_json::from_slice(bytes)?)
}
