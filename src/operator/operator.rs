use crate::analyzer::{analyze, QueryKind};
use crate::backlog::{Backlog, Record, SeqNo};
use crate::buffer::{GapTracker, ReplicationBuffer};
use crate::cluster::{ClusterState, NodeAddr, NodeStatus};
use crate::security::{KeyBundle, KeyGuard, KeyGuardError};
use crate::sessions::SessionRegistry;
use crate::transport::{
    BacklogPage, ConnId, Discovery, LinkFactory, MasterLink, NodeProbe, PeerFanout, SessionOp,
    StatusReport, WriteAck,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Tunables. Defaults match production deployments; tests shrink the intervals.
pub struct OperatorOptions {
    /// Max records per getBackLog page (byte cap applies on top).
    pub backlog_page_size: usize,
    /// How long a gap request suppresses re-requests for the same seq.
    pub gap_request_ttl: Duration,
    pub health_interval: Duration,
    /// Base delay between election retries; jitter is added on top.
    pub election_retry_base: Duration,
    /// Master connection drops tolerated per health cycle before self-ghosting.
    pub max_connection_drops: u32,
}

impl Default for OperatorOptions {
    fn default() -> Self {
        OperatorOptions {
            backlog_page_size: 200,
            gap_request_ttl: Duration::from_secs(10),
            health_interval: Duration::from_secs(120),
            election_retry_base: Duration::from_secs(2),
            max_connection_drops: 3,
        }
    }
}

pub struct OperatorConfig {
    pub logger: slog::Logger,
    pub backlog: Arc<Backlog>,
    pub fanout: Arc<dyn PeerFanout>,
    pub probe: Arc<dyn NodeProbe>,
    pub discovery: Arc<dyn Discovery>,
    pub links: Arc<dyn LinkFactory>,
    pub guard: Arc<dyn KeyGuard>,
    pub sessions: Arc<dyn SessionRegistry>,
    pub options: OperatorOptions,
}

/// Where a classified statement went.
#[derive(Debug)]
pub enum Routed {
    /// Execute locally against the engine, read-only. Carries the cleaned statement.
    Read(String),
    /// Remembered for this connection; replayed ahead of its next write.
    SessionCached,
    /// Sequenced through the backlog. None means no seq was assigned; the caller
    /// times out and retries.
    Write(Option<WriteAck>),
}

/// Operator drives one node's participation in the cluster: classifying and sequencing
/// writes, ingesting replicated records, electing masters, and syncing after a restart.
///
/// Locking discipline: every `Mutex` here is a plain std mutex and is never held across
/// an await. Snapshots are taken under the lock, then acted on.
pub struct Operator {
    pub(super) logger: slog::Logger,
    pub(super) backlog: Arc<Backlog>,
    pub(super) buffer: Mutex<ReplicationBuffer>,
    pub(super) gaps: Mutex<GapTracker>,
    pub(super) cluster: Mutex<ClusterState>,
    pub(super) master_link: Mutex<Option<Arc<dyn MasterLink>>>,
    pub(super) fanout: Arc<dyn PeerFanout>,
    pub(super) probe: Arc<dyn NodeProbe>,
    pub(super) discovery: Arc<dyn Discovery>,
    pub(super) links: Arc<dyn LinkFactory>,
    pub(super) guard: Arc<dyn KeyGuard>,
    pub(super) sessions: Arc<dyn SessionRegistry>,
    session_queries: Mutex<HashMap<ConnId, String>>,
    /// Our address as peers see it, learned from probe replies.
    pub(super) my_addr: Mutex<Option<NodeAddr>>,
    /// Master connection drops since the last health cycle.
    pub(super) connection_drops: AtomicU32,
    /// Set when this node decides its connectivity can't be trusted.
    pub(super) ghosted: AtomicBool,
    pub(super) health_running: AtomicBool,
    pub(super) options: OperatorOptions,
}

impl Operator {
    pub fn new(config: OperatorConfig) -> Arc<Self> {
        let gap_ttl = config.options.gap_request_ttl;

        Arc::new(Operator {
            logger: config.logger,
            backlog: config.backlog,
            buffer: Mutex::new(ReplicationBuffer::new()),
            gaps: Mutex::new(GapTracker::new(gap_ttl)),
            cluster: Mutex::new(ClusterState::new()),
            master_link: Mutex::new(None),
            fanout: config.fanout,
            probe: config.probe,
            discovery: config.discovery,
            links: config.links,
            guard: config.guard,
            sessions: config.sessions,
            session_queries: Mutex::new(HashMap::new()),
            my_addr: Mutex::new(None),
            connection_drops: AtomicU32::new(0),
            ghosted: AtomicBool::new(false),
            health_running: AtomicBool::new(false),
            options: config.options,
        })
    }

    pub fn status(&self) -> NodeStatus {
        self.locked_cluster().status
    }

    pub(super) fn set_status(&self, status: NodeStatus) {
        let mut cluster = self.locked_cluster();
        if cluster.status != status {
            slog::info!(self.logger, "Status change {} -> {}", cluster.status, status);
            cluster.status = status;
        }
    }

    pub fn is_master(&self) -> bool {
        self.locked_cluster().is_master
    }

    pub fn master_node(&self) -> Option<NodeAddr> {
        self.locked_cluster().master_node.clone()
    }

    pub fn is_ghosted(&self) -> bool {
        self.ghosted.load(Ordering::SeqCst)
    }

    pub(super) fn locked_cluster(&self) -> MutexGuard<'_, ClusterState> {
        self.cluster.lock().expect("cluster state lock poisoned")
    }

    pub(super) fn locked_buffer(&self) -> MutexGuard<'_, ReplicationBuffer> {
        self.buffer.lock().expect("replication buffer lock poisoned")
    }

    pub(super) fn master_link(&self) -> Option<Arc<dyn MasterLink>> {
        self.master_link
            .lock()
            .expect("master link lock poisoned")
            .clone()
    }

    /// Classifies a client statement and routes it. Writes are preceded by the
    /// connection's pending session statement, if one was cached.
    pub async fn handle_statement(&self, sql: &str, conn: ConnId) -> Routed {
        let analyzed = analyze(sql);
        match analyzed.kind {
            QueryKind::Read => Routed::Read(analyzed.sql),
            QueryKind::Session => {
                self.locked_sessions().insert(conn, analyzed.sql);
                Routed::SessionCached
            }
            QueryKind::Write => {
                let pending = self.locked_sessions().remove(&conn);
                if let Some(session_sql) = pending {
                    self.send_write_query(&session_sql, Some(conn)).await;
                }

                Routed::Write(self.send_write_query(&analyzed.sql, Some(conn)).await)
            }
        }
    }

    fn locked_sessions(&self) -> MutexGuard<'_, HashMap<ConnId, String>> {
        self.session_queries
            .lock()
            .expect("session query lock poisoned")
    }

    /// Sequences a write. On the master this appends locally and fans out; on a follower
    /// it forwards over the master link. None means the write got no seq number.
    pub async fn send_write_query(&self, sql: &str, origin: Option<ConnId>) -> Option<WriteAck> {
        let (is_master, has_master) = {
            let cluster = self.locked_cluster();
            (cluster.is_master, cluster.master_node.is_some())
        };

        if !has_master {
            slog::warn!(self.logger, "No master resolved, dropping write");
            return None;
        }

        if !is_master {
            let link = self.master_link()?;
            return match link.write_query(sql, origin).await {
                Ok(ack) => Some(ack),
                Err(e) => {
                    slog::warn!(self.logger, "Write forward to master failed: {}", e);
                    None
                }
            };
        }

        let timestamp = Utc::now().timestamp_millis();
        let outcome = self.backlog.append(sql, SeqNo::UNASSIGNED, timestamp).await;
        let record = outcome.record?;
        self.fanout.broadcast_record(&record, origin);

        Some(WriteAck {
            status: self.status(),
            seq: record.seq,
            timestamp: record.timestamp,
        })
    }

    /// Ingests one replicated record from the master. The expected next seq is applied
    /// immediately; anything ahead of it is buffered and the gap requested; anything at
    /// or below the committed seq is discarded as a redelivery.
    pub async fn handle_record(&self, record: Record, origin: Option<ConnId>) {
        slog::debug!(
            self.logger,
            "Inbound record seq {} (origin {:?})",
            record.seq,
            origin
        );

        match self.status() {
            NodeStatus::Ok => {
                let expected = self.backlog.expected_next();
                if record.seq == expected {
                    self.backlog
                        .append(&record.query, record.seq, record.timestamp)
                        .await;
                    self.drain_buffer().await;
                    if !self.locked_buffer().is_empty() {
                        self.recover_gaps().await;
                    }
                } else if record.seq > expected {
                    self.locked_buffer().insert(record);
                    self.recover_gaps().await;
                } else {
                    slog::debug!(
                        self.logger,
                        "Discarding redelivered seq {} (committed through {})",
                        record.seq,
                        self.backlog.sequence_number()
                    );
                }
            }
            // Live traffic keeps flowing during catch-up; sync drains it at the end.
            NodeStatus::Sync => self.locked_buffer().insert(record),
            status => {
                slog::info!(self.logger, "Omitted inbound seq {}, status: {}", record.seq, status)
            }
        }
    }

    /// Applies every buffered record that has become contiguous with the committed seq.
    pub(super) async fn drain_buffer(&self) {
        // Seqs committed through sync or gap answers leave stale copies behind.
        self.locked_buffer()
            .discard_through(self.backlog.sequence_number());
        loop {
            let next = self.backlog.expected_next();
            let record = self.locked_buffer().take(next);
            match record {
                Some(record) => {
                    self.backlog
                        .append(&record.query, record.seq, record.timestamp)
                        .await;
                }
                None => break,
            }
        }

        let mut buffer = self.locked_buffer();
        if buffer.is_empty() {
            buffer.clear();
        }
    }

    /// Asks the master for up to REQUEST_WINDOW missing seqs above the committed one.
    /// Answers re-enter the normal ingest path; duplicate requests inside the TTL are
    /// suppressed by the gap tracker.
    pub(super) async fn recover_gaps(&self) {
        let link = match self.master_link() {
            Some(link) => link,
            None => return,
        };

        // The window is anchored at the seq committed when the gap was noticed; answers
        // applied mid-loop must not shift which seqs get requested.
        let base = self.backlog.expected_next();
        for offset in 0..GapTracker::REQUEST_WINDOW {
            if self.status() != NodeStatus::Ok {
                break;
            }

            let target = base.plus(offset);
            if target <= self.backlog.sequence_number() {
                // An earlier answer already closed this seq.
                continue;
            }
            if self.locked_buffer().contains(target) {
                continue;
            }
            let fresh = {
                let mut gaps = self.gaps.lock().expect("gap tracker lock poisoned");
                gaps.mark_requested(target)
            };
            if !fresh {
                continue;
            }

            slog::info!(self.logger, "Asking master for missing seq {}", target);
            match link.ask_query(target).await {
                Ok(Some(record)) => {
                    let expected = self.backlog.expected_next();
                    if record.seq == expected {
                        self.backlog
                            .append(&record.query, record.seq, record.timestamp)
                            .await;
                        self.drain_buffer().await;
                    } else if record.seq > expected {
                        self.locked_buffer().insert(record);
                    }
                }
                Ok(None) => {
                    slog::warn!(self.logger, "Master holds no record for seq {}", target)
                }
                Err(e) => {
                    slog::warn!(self.logger, "Gap request for seq {} failed: {}", target, e);
                    break;
                }
            }
        }
    }

    /// Rolls the cluster back so `target` is the highest committed seq. Only the master
    /// coordinates; a follower forwards the request upstream.
    pub async fn roll_back(&self, target: SeqNo) {
        if self.status() == NodeStatus::Rollback {
            return;
        }

        if !self.is_master() {
            if let Some(link) = self.master_link() {
                if let Err(e) = link.roll_back(target).await {
                    slog::warn!(self.logger, "Rollback forward to master failed: {}", e);
                }
            }
            return;
        }

        slog::info!(self.logger, "Rolling back cluster to seq {}", target);
        self.set_status(NodeStatus::Rollback);
        self.fanout.broadcast_rollback(target);
        self.rebuild_local(target).await;
        self.set_status(NodeStatus::Ok);
    }

    /// Follower side of a rollback broadcast. A node that was mid-sync restarts its sync
    /// from the rolled-back state.
    pub async fn handle_rollback_broadcast(&self, target: SeqNo) {
        let prior = self.status();
        if prior == NodeStatus::Rollback {
            return;
        }

        slog::info!(self.logger, "Master ordered rollback to seq {}", target);
        self.set_status(NodeStatus::Rollback);
        self.rebuild_local(target).await;

        if prior == NodeStatus::Sync {
            self.set_status(NodeStatus::Ok);
            self.run_sync().await;
        } else {
            self.set_status(prior);
        }
    }

    async fn rebuild_local(&self, target: SeqNo) {
        self.backlog.rebuild(target).await;
        self.locked_buffer().clear();
        self.gaps.lock().expect("gap tracker lock poisoned").clear();
    }

    /// Whether an inbound peer session may attach right now.
    pub fn authorize_session(&self, remote: &NodeAddr) -> bool {
        if self.is_ghosted() {
            slog::warn!(self.logger, "Refusing session from {}: ghosted", remote);
            return false;
        }

        match self.status() {
            NodeStatus::Ok | NodeStatus::Sync => true,
            status => {
                slog::info!(self.logger, "Refusing session from {}: status {}", remote, status);
                false
            }
        }
    }

    // Inbound RPC surface. Thin wrappers so the transport glue stays mechanical.

    pub fn on_get_status(&self, remote: NodeAddr) -> StatusReport {
        let cluster = self.locked_cluster();

        StatusReport {
            status: cluster.status,
            sequence_number: self.backlog.sequence_number(),
            remote_addr: remote,
            master_addr: cluster.master_or_candidate(),
        }
    }

    pub fn on_get_master(&self) -> Option<NodeAddr> {
        self.locked_cluster().master_or_candidate()
    }

    pub async fn on_get_backlog(&self, from: SeqNo) -> BacklogPage {
        let records = self
            .backlog
            .read_range(from, self.options.backlog_page_size)
            .await;

        BacklogPage {
            status: self.status(),
            master_seq: self.backlog.sequence_number(),
            records,
        }
    }

    pub async fn on_ask_query(&self, seq: SeqNo) -> Option<Record> {
        self.backlog.lookup(seq).await
    }

    pub async fn on_write_query(&self, sql: &str, origin: Option<ConnId>) -> Option<WriteAck> {
        self.send_write_query(sql, origin).await
    }

    /// getKeys: every shared entry, values re-encrypted for the wire.
    pub async fn on_get_keys(&self) -> Vec<(String, String)> {
        let mut wire = Vec::new();
        for (key, value) in self.backlog.all_keys().await {
            match self.guard.encrypt_comm(&value) {
                Ok(ciphertext) => wire.push((key, ciphertext)),
                Err(e) => slog::warn!(self.logger, "Comm-encrypt of key {:?} failed: {}", key, e),
            }
        }

        wire
    }

    /// shareKeys: wrap the cluster comm keys (and the caller's stored node secret) for
    /// the requesting node.
    pub async fn on_share_keys(
        &self,
        public_key: &str,
        remote: &NodeAddr,
    ) -> Result<KeyBundle, KeyGuardError> {
        let node_key = self
            .backlog
            .get_key(&format!("N{}", remote.host()), true)
            .await;

        self.guard.bundle_for(public_key, node_key.as_deref())
    }

    /// updateKey: store a comm-encrypted entry and, on the master, fan it out.
    pub async fn on_update_key(&self, key: &str, value: &str) {
        let plain_key = match self.guard.decrypt_comm(key) {
            Ok(plain) => plain,
            Err(e) => {
                slog::warn!(self.logger, "Rejecting key update, comm-decrypt failed: {}", e);
                return;
            }
        };
        let plain_value = match self.guard.decrypt_comm(value) {
            Ok(plain) => plain,
            Err(e) => {
                slog::warn!(self.logger, "Rejecting key update, comm-decrypt failed: {}", e);
                return;
            }
        };

        self.backlog.push_key(&plain_key, &plain_value, true).await;
        if self.is_master() {
            self.fanout.broadcast_key_update(key, value);
        }
    }

    /// Client-facing key update: store locally, then propagate (masterward or fanout).
    pub async fn update_key(&self, key: &str, value: &str) {
        self.backlog.push_key(key, value, true).await;

        if self.is_master() {
            match (self.guard.encrypt_comm(key), self.guard.encrypt_comm(value)) {
                (Ok(wire_key), Ok(wire_value)) => {
                    self.fanout.broadcast_key_update(&wire_key, &wire_value)
                }
                (Err(e), _) | (_, Err(e)) => {
                    slog::warn!(self.logger, "Comm-encrypt for key fanout failed: {}", e)
                }
            }
            return;
        }

        if let Some(link) = self.master_link() {
            match (self.guard.encrypt_comm(key), self.guard.encrypt_comm(value)) {
                (Ok(wire_key), Ok(wire_value)) => {
                    if let Err(e) = link.update_key(&wire_key, &wire_value).await {
                        slog::warn!(self.logger, "Key update forward failed: {}", e);
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    slog::warn!(self.logger, "Comm-encrypt for key update failed: {}", e)
                }
            }
        }
    }

    /// userSession: apply to the local registry and, on the master, fan out.
    pub fn on_user_session(&self, op: SessionOp, key: &str, value: &str) {
        match op {
            SessionOp::Add => self.sessions.add(key, value),
            SessionOp::Remove => self.sessions.remove(key),
        }

        if self.is_master() {
            self.fanout.broadcast_user_session(op, key, value);
        }
    }

    /// Client-facing session op: apply locally, then propagate (masterward or fanout).
    pub async fn emit_user_session(&self, op: SessionOp, key: &str, value: &str) {
        match op {
            SessionOp::Add => self.sessions.add(key, value),
            SessionOp::Remove => self.sessions.remove(key),
        }

        if self.is_master() {
            self.fanout.broadcast_user_session(op, key, value);
            return;
        }

        if let Some(link) = self.master_link() {
            if let Err(e) = link.user_session(op, key, value).await {
                slog::warn!(self.logger, "Session op forward to master failed: {}", e);
            }
        }
    }

    /// The master link dropped. Count it for the health check, then re-elect and
    /// reconnect.
    pub async fn handle_master_disconnect(&self) {
        let drops = self.connection_drops.fetch_add(1, Ordering::SeqCst) + 1;
        slog::warn!(self.logger, "Master connection lost (drop #{})", drops);

        {
            let mut cluster = self.locked_cluster();
            cluster.master_node = None;
        }
        self.master_link
            .lock()
            .expect("master link lock poisoned")
            .take();

        if self.find_master().await.is_some() {
            self.init_master_connection().await;
        }
    }
}
