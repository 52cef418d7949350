//! Wire schema for the consensus protocol: proposal numbers, messages, and
//! the bounded JSON codec used to move them over a TCP connection.

mod codec;
mod message;
mod proposal;

pub use codec::{decode, encode, WireError, MAX_MESSAGE_BYTES};
pub use message::Message;
pub use proposal::ProposalNumber;
