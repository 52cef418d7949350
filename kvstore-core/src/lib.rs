//! Node orchestration and the request dispatcher: wires consensus state,
//! storage, and transport together into a running process.

mod dispatcher;
mod node;

pub use node::{Node, NodeHandle};
