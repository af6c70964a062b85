//! Periodic health check: notices a vanished master, a master nobody follows, and our
//! own flapping connectivity (self-ghosting).

use crate::operator::Operator;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

impl Operator {
    /// Spawns the background health loop. Ticks at the configured interval; a cycle that
    /// overlaps a still-running one is skipped, not queued.
    pub fn spawn_health_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let operator = Arc::clone(self);

        tokio::task::spawn(async move {
            let mut interval = tokio::time::interval(operator.options.health_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup elections settle.
            interval.tick().await;

            loop {
                interval.tick().await;
                operator.run_health_check().await;
            }
        })
    }

    /// One health cycle.
    pub async fn run_health_check(&self) {
        if self.health_running.swap(true, Ordering::SeqCst) {
            slog::debug!(self.logger, "Health check still running, skipping cycle");
            return;
        }

        self.health_cycle().await;
        self.health_running.store(false, Ordering::SeqCst);
    }

    async fn health_cycle(&self) {
        slog::debug!(self.logger, "Health check started");

        // Too many master connection drops since the last cycle means our own network
        // is the suspect. A ghosted node refuses sessions and stays out of elections
        // until a clean cycle passes.
        let drops = self.connection_drops.swap(0, Ordering::SeqCst);
        if drops > self.options.max_connection_drops {
            if !self.ghosted.swap(true, Ordering::SeqCst) {
                slog::warn!(
                    self.logger,
                    "{} master connection drops this cycle, ghosting this node",
                    drops
                );
            }
            return;
        }
        if self.ghosted.swap(false, Ordering::SeqCst) {
            slog::info!(self.logger, "Connectivity stable again, leaving ghosted state");
        }

        let nodes = self.discovery.list_nodes().await;
        let (is_master, master) = {
            let cluster = self.locked_cluster();
            (cluster.is_master, cluster.master_node.clone())
        };

        if let Some(master) = master {
            if !is_master && !nodes.iter().any(|n| n.host() == master.host()) {
                slog::warn!(self.logger, "Master {} left the deployment, re-electing", master);
                {
                    self.locked_cluster().master_node = None;
                }
                if self.find_master().await.is_some() {
                    self.init_master_connection().await;
                }
                return;
            }
        } else {
            slog::warn!(self.logger, "No master resolved, re-electing");
            if self.find_master().await.is_some() {
                self.init_master_connection().await;
            }
            return;
        }

        // A master no follower connects to is a master cut off from the cluster.
        if is_master && nodes.len() > 1 && self.fanout.inbound_peer_count() == 0 {
            slog::warn!(self.logger, "No followers connected, standing for re-election");
            if self.find_master().await.is_some() {
                self.init_master_connection().await;
            }
        }
    }
}
