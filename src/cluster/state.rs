use crate::cluster::directory::{Node, NodeAddr};
use std::fmt;

/// Lifecycle status of this node within the cluster.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeStatus {
    /// Booting or mid-election; writes are not accepted yet.
    Init,
    /// Catching up against the master.
    Sync,
    Ok,
    /// Replaying history after a rollback.
    Rollback,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Init => "INIT",
            NodeStatus::Sync => "SYNC",
            NodeStatus::Ok => "OK",
            NodeStatus::Rollback => "ROLLBACK",
        };
        write!(f, "{}", name)
    }
}

/// ClusterState is this node's view of the cluster: the candidate directory, the resolved
/// master, and our own role. Rebuilt on every election cycle; mutated only by the
/// election coordinator and the health-check task.
pub struct ClusterState {
    pub op_nodes: Vec<Node>,
    pub app_nodes: Vec<NodeAddr>,
    /// Active nodes at the top seq, ordered for leader preference.
    pub master_candidates: Vec<NodeAddr>,
    pub master_node: Option<NodeAddr>,
    pub is_master: bool,
    pub status: NodeStatus,
}

impl ClusterState {
    pub fn new() -> Self {
        ClusterState {
            op_nodes: Vec::new(),
            app_nodes: Vec::new(),
            master_candidates: Vec::new(),
            master_node: None,
            is_master: false,
            status: NodeStatus::Init,
        }
    }

    /// The master if resolved, else the best current guess (first candidate).
    pub fn master_or_candidate(&self) -> Option<NodeAddr> {
        self.master_node
            .clone()
            .or_else(|| self.master_candidates.first().cloned())
    }
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::new()
    }
}
