//! Master election: highest committed seq wins, confirmed by asking the candidates
//! themselves. Runs at startup, after a master disconnect, and when the health check
//! loses sight of the master.

use crate::backlog::SeqNo;
use crate::cluster::{master_candidates, Node, NodeAddr, NodeStatus};
use crate::operator::Operator;
use rand::Rng;
use std::time::Duration;

impl Operator {
    /// Resolves the cluster master, retrying with jittered backoff until the directory
    /// yields a confirmed answer. Returns None only if this node ghosts itself while
    /// waiting.
    pub async fn find_master(&self) -> Option<NodeAddr> {
        let mut attempt: u32 = 0;
        loop {
            if self.is_ghosted() {
                slog::warn!(self.logger, "Abandoning election: ghosted");
                return None;
            }

            if let Some(master) = self.election_round().await {
                return Some(master);
            }

            attempt += 1;
            let jitter = {
                let mut rng = rand::thread_rng();
                Duration::from_millis(rng.gen_range(0..500))
            };
            let delay = self.options.election_retry_base * attempt.min(5) + jitter;
            slog::info!(
                self.logger,
                "Election round {} unresolved, retrying in {:?}",
                attempt,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One election pass. None means the directory was inconclusive (a candidate was
    /// unreachable, or two nodes disagreed) and the whole pass must be retried.
    async fn election_round(&self) -> Option<NodeAddr> {
        {
            let mut cluster = self.locked_cluster();
            cluster.status = NodeStatus::Init;
            cluster.master_node = None;
            cluster.is_master = false;
        }
        // Records buffered under the previous master mean nothing to the next one; a
        // stale seq surviving into the new regime's sync could shadow a real record.
        self.locked_buffer().clear();
        self.gaps.lock().expect("gap tracker lock poisoned").clear();

        self.refresh_directory().await;

        let (candidates, my_addr) = {
            let mut cluster = self.locked_cluster();
            cluster.master_candidates = master_candidates(&cluster.op_nodes);
            let me = self.my_addr.lock().expect("my_addr lock poisoned").clone();
            (cluster.master_candidates.clone(), me)
        };

        // Without knowing our own externally visible address we can't tell whether the
        // top candidate is us. Happens before any peer has answered a probe.
        let my_addr = match my_addr {
            Some(me) => me,
            None => {
                slog::info!(self.logger, "Own address unknown, deferring election");
                return None;
            }
        };

        let first = candidates.first()?.clone();

        if first.host() == my_addr.host() {
            // We look like the winner. Confirm against the runner-up before claiming,
            // so a node waking up with a stale directory can't split the cluster.
            if let Some(second) = candidates.get(1) {
                return match self.probe.get_master(second).await {
                    None => None,
                    Some(named) if named.host() == my_addr.host() => {
                        self.become_master(my_addr).await
                    }
                    Some(named) => self.adopt_master(named).await,
                };
            }
            return self.become_master(my_addr).await;
        }

        // Someone else leads. Ask them, then double-confirm their answer names itself.
        match self.probe.get_master(&first).await {
            None => None,
            Some(named) if named.host() == my_addr.host() => self.become_master(my_addr).await,
            Some(named) => match self.probe.get_master(&named).await {
                Some(confirmed) if confirmed.host() == named.host() => {
                    self.adopt_master(named).await
                }
                _ => None,
            },
        }
    }

    async fn become_master(&self, me: NodeAddr) -> Option<NodeAddr> {
        {
            let mut cluster = self.locked_cluster();
            cluster.is_master = true;
            cluster.master_node = Some(me.clone());
            cluster.status = NodeStatus::Ok;
        }
        self.backlog.push_key("masterIP", me.as_str(), false).await;
        slog::info!(self.logger, "Elected master: this node ({})", me);

        Some(me)
    }

    /// Follower path. Status stays INIT until sync against the new master completes.
    async fn adopt_master(&self, master: NodeAddr) -> Option<NodeAddr> {
        {
            let mut cluster = self.locked_cluster();
            cluster.is_master = false;
            cluster.master_node = Some(master.clone());
        }
        self.backlog
            .push_key("masterIP", master.as_str(), false)
            .await;
        slog::info!(self.logger, "Adopted master {}", master);

        Some(master)
    }

    /// Probes every discovered node and rebuilds the directory. Unreachable nodes stay
    /// listed as inactive so the candidate filter can skip them. Our own row carries the
    /// local counter, which is fresher than any probe echo.
    pub(super) async fn refresh_directory(&self) {
        let raw = self.discovery.list_nodes().await;
        let app_nodes = self.discovery.list_app_nodes().await;

        let mut nodes = Vec::with_capacity(raw.len());
        for addr in raw {
            let upnp = addr.is_port_mapped();
            match self.probe.get_status(&addr).await {
                Some(report) => {
                    // The probe target echoes our address back; that is how we learn it.
                    *self.my_addr.lock().expect("my_addr lock poisoned") =
                        Some(report.remote_addr.clone());
                    nodes.push(Node {
                        addr,
                        active: true,
                        seq_no: report.sequence_number,
                        upnp,
                    });
                }
                None => nodes.push(Node {
                    addr,
                    active: false,
                    seq_no: SeqNo::UNASSIGNED,
                    upnp,
                }),
            }
        }

        let me = self.my_addr.lock().expect("my_addr lock poisoned").clone();
        if let Some(my_addr) = me {
            for node in nodes.iter_mut() {
                if node.addr.host() == my_addr.host() {
                    node.active = true;
                    node.seq_no = self.backlog.sequence_number();
                }
            }
        }

        let mut cluster = self.locked_cluster();
        cluster.op_nodes = nodes;
        cluster.app_nodes = app_nodes;
    }

    /// Dials the elected master (follower only), runs the key handshake, and syncs.
    pub async fn init_master_connection(&self) {
        let (is_master, master) = {
            let cluster = self.locked_cluster();
            (cluster.is_master, cluster.master_node.clone())
        };

        self.master_link
            .lock()
            .expect("master link lock poisoned")
            .take();

        let master = match master {
            Some(master) if !is_master => master,
            _ => return,
        };

        let link = match self.links.connect(&master).await {
            Ok(link) => link,
            Err(e) => {
                slog::warn!(self.logger, "Could not connect to master {}: {}", master, e);
                return;
            }
        };
        *self
            .master_link
            .lock()
            .expect("master link lock poisoned") = Some(link.clone());
        slog::info!(self.logger, "Connected to master {}", master);

        match link.share_keys(&self.guard.public_key()).await {
            Ok(bundle) => {
                if let Err(e) = self.guard.install_comm_keys(&bundle) {
                    slog::warn!(self.logger, "Comm key install failed: {}", e);
                }
            }
            Err(e) => slog::warn!(self.logger, "Key handshake with master failed: {}", e),
        }

        self.run_sync().await;
    }
}
