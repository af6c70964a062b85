use crate::backlog::{Record, SeqNo};
use crate::cluster::NodeAddr;
use crate::security::KeyBundle;
use crate::transport::messages::{BacklogPage, ConnId, SessionOp, StatusReport, WriteAck};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),
    #[error("connection closed")]
    Closed,
}

/// A follower's persistent connection to the current master. One exists at a time; it is
/// replaced wholesale on re-election.
#[async_trait]
pub trait MasterLink: Send + Sync {
    /// Forward a write for sequencing. The ack carries the assigned sequence number.
    async fn write_query(&self, sql: &str, origin: Option<ConnId>) -> Result<WriteAck, LinkError>;

    /// Ask the master for one specific sequenced record (gap recovery).
    async fn ask_query(&self, seq: SeqNo) -> Result<Option<Record>, LinkError>;

    /// Fetch one catch-up page starting at `from`.
    async fn get_backlog(&self, from: SeqNo) -> Result<BacklogPage, LinkError>;

    /// All shared key/value entries, values comm-encrypted.
    async fn get_keys(&self) -> Result<Vec<(String, String)>, LinkError>;

    /// shareKeys handshake: offer our public key, receive the cluster comm keys.
    async fn share_keys(&self, public_key: &str) -> Result<KeyBundle, LinkError>;

    async fn update_key(&self, key: &str, value: &str) -> Result<(), LinkError>;

    async fn roll_back(&self, seq: SeqNo) -> Result<(), LinkError>;

    async fn user_session(&self, op: SessionOp, key: &str, value: &str) -> Result<(), LinkError>;

    fn is_connected(&self) -> bool;
}

/// Connectionless node probing used by elections and health checks.
#[async_trait]
pub trait NodeProbe: Send + Sync {
    /// Ask a node who it believes the master is. None means unreachable.
    async fn get_master(&self, addr: &NodeAddr) -> Option<NodeAddr>;

    /// Liveness probe. None means unreachable.
    async fn get_status(&self, addr: &NodeAddr) -> Option<StatusReport>;
}

/// Master-side broadcast to every connected follower. Delivery is fire-and-forget;
/// followers repair losses through the gap protocol.
pub trait PeerFanout: Send + Sync {
    fn broadcast_record(&self, record: &Record, origin: Option<ConnId>);
    fn broadcast_rollback(&self, seq: SeqNo);
    fn broadcast_key_update(&self, key: &str, value: &str);
    fn broadcast_user_session(&self, op: SessionOp, key: &str, value: &str);

    /// How many followers currently hold a connection to us.
    fn inbound_peer_count(&self) -> usize;
}

/// Deployment discovery: the authoritative list of sequencer and application nodes.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn list_nodes(&self) -> Vec<NodeAddr>;
    async fn list_app_nodes(&self) -> Vec<NodeAddr>;
}

/// Dials a master and hands back a live link.
#[async_trait]
pub trait LinkFactory: Send + Sync {
    async fn connect(&self, master: &NodeAddr) -> Result<Arc<dyn MasterLink>, LinkError>;
}
