use crate::backlog::SeqNo;
use std::fmt;

/// NodeAddr is a peer's address as reported by deployment discovery. Port-mapped (UPnP)
/// nodes show up as `host:port`; directly reachable nodes as a bare host.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeAddr(String);

impl NodeAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        NodeAddr(addr.into())
    }

    /// The bare host, with any mapped port stripped.
    pub fn host(&self) -> &str {
        match self.0.find(':') {
            Some(colon) => &self.0[..colon],
            None => &self.0,
        }
    }

    /// Nodes reachable only through a mapped port are deprioritized as leaders.
    pub fn is_port_mapped(&self) -> bool {
        self.0.contains(':')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One directory row: a candidate node's last-observed liveness and sequence number.
#[derive(Clone, Debug)]
pub struct Node {
    pub addr: NodeAddr,
    /// Answered a liveness probe this cycle.
    pub active: bool,
    pub seq_no: SeqNo,
    pub upnp: bool,
}

/// Election candidate list: every active node holding the top seq number, non-upnp nodes
/// first. Ties within each reachability class keep the directory's order (stable sort).
pub fn master_candidates(nodes: &[Node]) -> Vec<NodeAddr> {
    let mut sorted: Vec<&Node> = nodes.iter().collect();
    sorted.sort_by(|a, b| b.seq_no.cmp(&a.seq_no));

    let top_seq = match sorted.first() {
        Some(top) => top.seq_no,
        None => return Vec::new(),
    };

    let mut candidates = Vec::new();
    let mut mapped = Vec::new();
    for node in sorted.iter().filter(|n| n.active && n.seq_no == top_seq) {
        if node.upnp {
            mapped.push(node.addr.clone());
        } else {
            candidates.push(node.addr.clone());
        }
    }
    candidates.extend(mapped);

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(addr: &str, active: bool, seq: u64, upnp: bool) -> Node {
        Node {
            addr: NodeAddr::new(addr),
            active,
            seq_no: SeqNo::new(seq),
            upnp,
        }
    }

    #[test]
    fn upnp_nodes_are_deprioritized() {
        let nodes = vec![
            node("10.0.0.2:33100", true, 10, true),
            node("10.0.0.1", true, 10, false),
            node("10.0.0.3", true, 8, false),
        ];

        let candidates = master_candidates(&nodes);
        assert_eq!(
            candidates,
            vec![NodeAddr::new("10.0.0.1"), NodeAddr::new("10.0.0.2:33100")]
        );
    }

    #[test]
    fn inactive_top_seq_node_is_excluded() {
        let nodes = vec![
            node("10.0.0.1", false, 10, false),
            node("10.0.0.2", true, 10, false),
        ];

        assert_eq!(master_candidates(&nodes), vec![NodeAddr::new("10.0.0.2")]);
    }

    #[test]
    fn lower_seq_nodes_are_excluded() {
        let nodes = vec![
            node("10.0.0.1", true, 10, false),
            node("10.0.0.2", true, 9, false),
        ];

        assert_eq!(master_candidates(&nodes), vec![NodeAddr::new("10.0.0.1")]);
    }

    #[test]
    fn empty_directory_yields_no_candidates() {
        assert!(master_candidates(&[]).is_empty());
    }

    #[test]
    fn port_mapped_addr_host() {
        let addr = NodeAddr::new("10.0.0.2:33100");
        assert_eq!(addr.host(), "10.0.0.2");
        assert!(addr.is_port_mapped());
        assert!(!NodeAddr::new("10.0.0.2").is_port_mapped());
    }
}
