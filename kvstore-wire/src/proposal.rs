use serde::{Deserialize, Serialize};

/// A totally ordered `(round_no, node_id)` pair used to sequence Paxos
/// rounds. `round_no` is the dominant axis: two numbers compare equal iff
/// both fields match, and round_no is compared first.
///
/// Deriving `Ord` compares fields in declaration order, which is exactly
/// `(round_no, node_id)`, so no hand-written `Ord` impl is needed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalNumber {
    pub round_no: i64,
    pub node_id: i64,
}

impl ProposalNumber {
    /// The smallest possible proposal number. Used for the low-ball prepare
    /// probe: it can never win acceptance, only elicit NACKs.
    pub const LOWEST: ProposalNumber = ProposalNumber {
        round_no: i64::MIN,
        node_id: i64::MIN,
    };

    pub fn new(round_no: i64, node_id: i64) -> Self {
        Self { round_no, node_id }
    }

    /// Returns this node's first own proposal number, `(0, node_id)`.
    pub fn initial(node_id: i64) -> Self {
        Self { round_no: 0, node_id }
    }

    /// Returns the next proposal number for the same node: round_no + 1.
    pub fn increased(self) -> Self {
        Self {
            round_no: self.round_no + 1,
            node_id: self.node_id,
        }
    }
}
