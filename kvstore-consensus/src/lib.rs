//! The per-node consensus state machine: leader election, the Paxos
//! proposer and acceptor roles, and the timers and shared state that tie
//! them together.

pub mod acceptor;
pub mod election;
pub mod state;
pub mod timers;
pub mod write;

pub use state::ConsensusState;
pub use timers::Timers;
