//! Catch-up after restart or re-election: page the master's backlog into ours until the
//! live replication stream takes over.

use crate::cluster::NodeStatus;
use crate::operator::Operator;

impl Operator {
    /// Pulls the master's backlog in pages until either the master's seq is reached or
    /// the records buffered from live traffic become contiguous with ours, then drains
    /// that buffer. An external status change (rollback, re-election) aborts the loop at
    /// the next page or record boundary.
    pub async fn run_sync(&self) {
        let link = match self.master_link() {
            Some(link) if link.is_connected() => link,
            _ => return,
        };

        {
            let mut cluster = self.locked_cluster();
            if cluster.is_master
                || cluster.status == NodeStatus::Sync
                || cluster.status == NodeStatus::Rollback
            {
                return;
            }
            cluster.status = NodeStatus::Sync;
        }
        slog::info!(
            self.logger,
            "Syncing backlog from master, local seq {}",
            self.backlog.sequence_number()
        );

        // Shared key/value entries merge first; values travel comm-encrypted.
        match link.get_keys().await {
            Ok(keys) => {
                for (key, value) in keys {
                    match self.guard.decrypt_comm(&value) {
                        Ok(plain) => self.backlog.push_key(&key, &plain, true).await,
                        Err(e) => {
                            slog::warn!(self.logger, "Comm-decrypt of key {:?} failed: {}", key, e)
                        }
                    }
                }
            }
            Err(e) => slog::warn!(self.logger, "Key merge during sync failed: {}", e),
        }

        // Forces at least one page fetch; the first reply corrects it.
        let mut master_seq = self.backlog.expected_next();
        let mut buffer_reached = false;

        while self.backlog.sequence_number() < master_seq && !buffer_reached {
            if self.status() != NodeStatus::Sync {
                slog::warn!(self.logger, "Sync aborted at seq {}", self.backlog.sequence_number());
                self.backlog.set_replay_logging(true);
                return;
            }

            let page = match link.get_backlog(self.backlog.expected_next()).await {
                Ok(page) => page,
                Err(e) => {
                    slog::warn!(self.logger, "Backlog page fetch failed: {}", e);
                    break;
                }
            };
            master_seq = page.master_seq;

            if page.records.is_empty() {
                if self.backlog.sequence_number() < master_seq {
                    // The master acknowledges more records than it can serve. Stop here;
                    // the health check re-drives sync later.
                    slog::warn!(
                        self.logger,
                        "Master served no records below its seq {}, stopping sync",
                        master_seq
                    );
                }
                break;
            }

            self.backlog.set_replay_logging(false);
            for record in page.records {
                if self.status() != NodeStatus::Sync {
                    slog::warn!(self.logger, "Sync aborted at seq {}", self.backlog.sequence_number());
                    self.backlog.set_replay_logging(true);
                    return;
                }
                self.backlog
                    .append(&record.query, record.seq, record.timestamp)
                    .await;
            }
            self.backlog.set_replay_logging(true);

            slog::info!(
                self.logger,
                "Sync progress: {} of {}",
                self.backlog.sequence_number(),
                master_seq
            );

            // Once the lowest live-buffered seq falls at or below our committed seq,
            // the pages have overtaken the stream and the buffer finishes the job.
            let start = self.locked_buffer().start_seq();
            buffer_reached = !start.is_unassigned() && start <= self.backlog.sequence_number();
        }

        if buffer_reached {
            let drained = self.locked_buffer().drain_all();
            slog::info!(self.logger, "Applying {} records buffered during sync", drained.len());
            for record in drained {
                // Overlap with already-synced seqs surfaces as duplicate inserts, which
                // the backlog discards.
                self.backlog
                    .append(&record.query, record.seq, record.timestamp)
                    .await;
            }
        }

        self.set_status(NodeStatus::Ok);
        slog::info!(self.logger, "Sync finished at seq {}", self.backlog.sequence_number());
    }
}
