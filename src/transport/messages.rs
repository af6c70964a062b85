use crate::backlog::{Record, SeqNo};
use crate::cluster::{NodeAddr, NodeStatus};
use std::fmt;

/// Identifies the client connection a write originated on, so the sequenced result can be
/// routed back to the right session by the query front end.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ConnId(pub u64);

impl fmt::Debug for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// getStatus reply: the probe target's view of itself, plus the caller's address as the
/// target saw it (how a node learns its own externally visible address).
#[derive(Clone, Debug)]
pub struct StatusReport {
    pub status: NodeStatus,
    pub sequence_number: SeqNo,
    pub remote_addr: NodeAddr,
    pub master_addr: Option<NodeAddr>,
}

/// One page of the catch-up protocol.
#[derive(Clone, Debug)]
pub struct BacklogPage {
    pub status: NodeStatus,
    /// The master's committed sequence number at fetch time.
    pub master_seq: SeqNo,
    pub records: Vec<Record>,
}

/// writeQuery reply: the sequence assigned to a forwarded write.
#[derive(Clone, Debug)]
pub struct WriteAck {
    pub status: NodeStatus,
    pub seq: SeqNo,
    pub timestamp: i64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionOp {
    Add,
    Remove,
}
