use crate::backlog::cache::RecentCache;
use crate::backlog::storage::{BacklogStorage, Record, SeqNo, StorageError};
use crate::engine::SqlEngine;
use crate::security::KeyGuard;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A single getBackLog response page never carries more than this many bytes of query
/// text. Trimming drops whole records off the tail, never a partial record.
pub const PAGE_BYTE_CAP: usize = 3 * 1024 * 1024;

/// How long a just-appended record stays servable without a storage round trip.
const RECENT_CACHE_TTL: Duration = Duration::from_secs(60);

/// How many records rebuild() replays per storage read.
const REBUILD_PAGE_SIZE: usize = 200;

pub struct AppendOutcome {
    /// None means the write is not yet durable (storage was unavailable or the seq was a
    /// duplicate); callers may re-drive from their own retry loop.
    pub record: Option<Record>,
    pub seq: SeqNo,
    pub timestamp: i64,
}

/// Backlog is the durable, seq-ordered write log plus its key/value side table. It owns
/// the authoritative sequence counter.
///
/// Counter discipline: assigning a seq for a local write is a single atomic step that
/// completes before the durable write is awaited, so two overlapping local writers can
/// never reserve the same seq.
pub struct Backlog {
    logger: slog::Logger,
    storage: Arc<dyn BacklogStorage>,
    engine: Arc<dyn SqlEngine>,
    guard: Arc<dyn KeyGuard>,
    seq: AtomicU64,
    recent: RecentCache,
    replay_logging: AtomicBool,
}

impl Backlog {
    /// Loads the counter from storage. The one place a storage error is allowed to
    /// surface; everything after construction degrades to no-op results instead.
    pub async fn open(
        logger: slog::Logger,
        storage: Arc<dyn BacklogStorage>,
        engine: Arc<dyn SqlEngine>,
        guard: Arc<dyn KeyGuard>,
    ) -> Result<Self, StorageError> {
        let last = storage.last_sequence().await?;
        slog::info!(logger, "Opened backlog. Last seq no: {}", last);

        Ok(Backlog {
            logger,
            storage,
            engine,
            guard,
            seq: AtomicU64::new(last.as_u64()),
            recent: RecentCache::new(RECENT_CACHE_TTL),
            replay_logging: AtomicBool::new(true),
        })
    }

    /// Highest seq ever committed (or reserved by an in-flight local append).
    pub fn sequence_number(&self) -> SeqNo {
        SeqNo::new(self.seq.load(Ordering::SeqCst))
    }

    /// The seq the next in-order replicated record must carry.
    pub fn expected_next(&self) -> SeqNo {
        self.sequence_number().next()
    }

    /// Appends a record and executes it against the engine. `seq == UNASSIGNED` assigns
    /// the next local seq; any other value stores that exact seq (replication/replay).
    pub async fn append(&self, query: &str, seq: SeqNo, timestamp: i64) -> AppendOutcome {
        let assigned = if seq.is_unassigned() {
            SeqNo::new(self.seq.fetch_add(1, Ordering::SeqCst) + 1)
        } else {
            self.seq.fetch_max(seq.as_u64(), Ordering::SeqCst);
            seq
        };

        let record = Record {
            seq: assigned,
            query: query.to_string(),
            timestamp,
        };

        match self.storage.insert(record.clone()).await {
            Ok(()) => {}
            Err(StorageError::DuplicateSequence(dup)) => {
                slog::warn!(self.logger, "Discarding duplicate seq {} insert", dup);
                return AppendOutcome {
                    record: None,
                    seq: assigned,
                    timestamp,
                };
            }
            Err(e) => {
                slog::warn!(self.logger, "Backlog append {} failed: {}", assigned, e);
                return AppendOutcome {
                    record: None,
                    seq: assigned,
                    timestamp,
                };
            }
        }

        if self.replay_logging.load(Ordering::Relaxed) {
            slog::info!(self.logger, "Executed {}", assigned);
        }
        self.recent.put(record.clone());

        if let Err(e) = self.engine.execute(&record.query).await {
            slog::error!(self.logger, "Error in SQL at seq {}: {}", assigned, e);
        }

        AppendOutcome {
            record: Some(record),
            seq: assigned,
            timestamp,
        }
    }

    /// Paged historical read, bounded by `limit` records and PAGE_BYTE_CAP bytes.
    pub async fn read_range(&self, from: SeqNo, limit: usize) -> Vec<Record> {
        match self.storage.read_range(from, limit).await {
            Ok(records) => {
                let trimmed = trim_to_byte_cap(records, PAGE_BYTE_CAP);
                slog::info!(
                    self.logger,
                    "Sending backlog records from {}, count: {}",
                    from,
                    trimmed.len()
                );
                trimmed
            }
            Err(e) => {
                slog::warn!(self.logger, "Backlog range read from {} failed: {}", from, e);
                Vec::new()
            }
        }
    }

    /// Point lookup, serving from the recent-append cache when possible.
    pub async fn lookup(&self, seq: SeqNo) -> Option<Record> {
        if let Some(record) = self.recent.get(seq) {
            return Some(record);
        }

        match self.storage.read_one(seq).await {
            Ok(record) => record,
            Err(e) => {
                slog::warn!(self.logger, "Backlog read of seq {} failed: {}", seq, e);
                None
            }
        }
    }

    pub async fn last_sequence(&self) -> SeqNo {
        match self.storage.last_sequence().await {
            Ok(last) => last,
            Err(e) => {
                slog::warn!(self.logger, "Backlog last-sequence read failed: {}", e);
                SeqNo::UNASSIGNED
            }
        }
    }

    /// Deletes everything above `seq`. Rollback only.
    pub async fn truncate_after(&self, seq: SeqNo) {
        if let Err(e) = self.storage.truncate_after(seq).await {
            slog::warn!(self.logger, "Backlog truncate after {} failed: {}", seq, e);
        }
    }

    /// Empties the store and resets the counter.
    pub async fn clear(&self) {
        match self.storage.clear().await {
            Ok(()) => {
                self.recent.clear();
                self.seq.store(0, Ordering::SeqCst);
                slog::info!(self.logger, "All backlog data removed");
            }
            Err(e) => slog::warn!(self.logger, "Backlog clear failed: {}", e),
        }
    }

    /// Rollback support: recreates the engine database, replays records up to and
    /// including `target` in ascending order (a record that fails to replay is logged
    /// and skipped), drops everything above `target`, and rebases the counter.
    pub async fn rebuild(&self, target: SeqNo) {
        if let Err(e) = self.engine.recreate_database().await {
            slog::error!(self.logger, "Engine recreate failed during rollback: {}", e);
            return;
        }

        let mut from = SeqNo::new(1);
        loop {
            let page = match self.storage.read_range(from, REBUILD_PAGE_SIZE).await {
                Ok(page) => page,
                Err(e) => {
                    slog::error!(self.logger, "Rollback replay read at {} failed: {}", from, e);
                    break;
                }
            };
            if page.is_empty() {
                break;
            }

            let mut done = false;
            for record in &page {
                if record.seq > target {
                    done = true;
                    break;
                }
                slog::info!(self.logger, "Replaying seq({})", record.seq);
                if let Err(e) = self.engine.execute(&record.query).await {
                    slog::error!(self.logger, "Replay of seq {} failed: {}", record.seq, e);
                }
            }

            let page_len = page.len();
            match page.last() {
                Some(last) if !done && page_len == REBUILD_PAGE_SIZE => from = last.seq.next(),
                _ => break,
            }
        }

        self.truncate_after(target).await;
        // Truncated seqs must not stay servable through the cache.
        self.recent.clear();
        self.seq.store(target.as_u64(), Ordering::SeqCst);
        slog::info!(self.logger, "DB and backlog rolled back to {}", target);
    }

    /// Sync mutes per-record progress logging to avoid log storms; records are still
    /// executed and cached as usual.
    pub fn set_replay_logging(&self, enabled: bool) {
        self.replay_logging.store(enabled, Ordering::Relaxed);
    }

    /// Stores a key/value entry, encrypting the value at rest unless told otherwise.
    pub async fn push_key(&self, key: &str, value: &str, encrypt: bool) {
        let stored = if encrypt {
            match self.guard.encrypt(value) {
                Ok(ciphertext) => ciphertext,
                Err(e) => {
                    slog::warn!(self.logger, "Refusing to store key {:?} unencrypted: {}", key, e);
                    return;
                }
            }
        } else {
            value.to_string()
        };

        if let Err(e) = self.storage.put_key(key, &stored).await {
            slog::warn!(self.logger, "Key {:?} store failed: {}", key, e);
        }
    }

    pub async fn get_key(&self, key: &str, decrypt: bool) -> Option<String> {
        let stored = match self.storage.get_key(key).await {
            Ok(stored) => stored?,
            Err(e) => {
                slog::warn!(self.logger, "Key {:?} read failed: {}", key, e);
                return None;
            }
        };

        if !decrypt {
            return Some(stored);
        }

        match self.guard.decrypt(&stored) {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                slog::warn!(self.logger, "Key {:?} decrypt failed: {}", key, e);
                None
            }
        }
    }

    /// All key/value entries, decrypted.
    pub async fn all_keys(&self) -> Vec<(String, String)> {
        let stored = match self.storage.all_keys().await {
            Ok(stored) => stored,
            Err(e) => {
                slog::warn!(self.logger, "Key table read failed: {}", e);
                return Vec::new();
            }
        };

        let mut keys = Vec::with_capacity(stored.len());
        for (key, value) in stored {
            match self.guard.decrypt(&value) {
                Ok(plaintext) => keys.push((key, plaintext)),
                Err(e) => slog::warn!(self.logger, "Key {:?} decrypt failed: {}", key, e),
            }
        }

        keys
    }

    pub async fn remove_key(&self, key: &str) -> bool {
        match self.storage.remove_key(key).await {
            Ok(removed) => removed,
            Err(e) => {
                slog::warn!(self.logger, "Key {:?} removal failed: {}", key, e);
                false
            }
        }
    }
}

fn trim_to_byte_cap(records: Vec<Record>, cap: usize) -> Vec<Record> {
    let mut total = 0usize;
    let mut trimmed = Vec::with_capacity(records.len());
    for record in records {
        total += record.query.len();
        if total > cap && !trimmed.is_empty() {
            break;
        }
        trimmed.push(record);
    }

    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::in_memory::InMemoryStorage;
    use crate::engine::NullEngine;
    use crate::security::PlaintextKeyGuard;
    use slog::Drain;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard.fuse(), slog::o!())
    }

    async fn test_backlog() -> Backlog {
        Backlog::open(
            test_logger(),
            Arc::new(InMemoryStorage::new()),
            Arc::new(NullEngine),
            Arc::new(PlaintextKeyGuard),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn local_appends_assign_contiguous_seqs() {
        let backlog = test_backlog().await;

        for expected in 1u64..=5 {
            let outcome = backlog.append("INSERT INTO t VALUES (1)", SeqNo::UNASSIGNED, 0).await;
            assert_eq!(outcome.seq, SeqNo::new(expected));
            assert!(outcome.record.is_some());
        }

        assert_eq!(backlog.last_sequence().await, SeqNo::new(5));
        assert_eq!(backlog.sequence_number(), SeqNo::new(5));
    }

    #[tokio::test]
    async fn explicit_seq_advances_counter() {
        let backlog = test_backlog().await;

        backlog.append("q", SeqNo::new(7), 0).await;
        assert_eq!(backlog.sequence_number(), SeqNo::new(7));

        // Lower explicit seq must not move the counter backwards.
        backlog.append("q", SeqNo::new(3), 0).await;
        assert_eq!(backlog.sequence_number(), SeqNo::new(7));
    }

    #[tokio::test]
    async fn duplicate_seq_reports_no_record() {
        let backlog = test_backlog().await;

        backlog.append("first", SeqNo::new(1), 0).await;
        let outcome = backlog.append("second", SeqNo::new(1), 0).await;

        assert!(outcome.record.is_none());
        assert_eq!(backlog.lookup(SeqNo::new(1)).await.unwrap().query, "first");
    }

    #[tokio::test]
    async fn rebuild_truncates_and_rebases_counter() {
        let backlog = test_backlog().await;
        for _ in 0..5 {
            backlog.append("q", SeqNo::UNASSIGNED, 0).await;
        }

        backlog.rebuild(SeqNo::new(2)).await;

        assert_eq!(backlog.last_sequence().await, SeqNo::new(2));
        assert_eq!(backlog.sequence_number(), SeqNo::new(2));
        // Truncated records are gone from the cache too, not just storage.
        assert!(backlog.lookup(SeqNo::new(4)).await.is_none());

        // Appends continue contiguously after the rollback point.
        let outcome = backlog.append("q", SeqNo::UNASSIGNED, 0).await;
        assert_eq!(outcome.seq, SeqNo::new(3));
    }

    struct RecordingEngine {
        executed: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl SqlEngine for RecordingEngine {
        async fn execute(&self, sql: &str) -> Result<(), crate::engine::EngineError> {
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(())
        }

        async fn recreate_database(&self) -> Result<(), crate::engine::EngineError> {
            self.executed.lock().unwrap().clear();
            Ok(())
        }
    }

    #[tokio::test]
    async fn rebuild_leaves_engine_with_only_kept_records() {
        let engine = Arc::new(RecordingEngine {
            executed: std::sync::Mutex::new(Vec::new()),
        });
        let backlog = Backlog::open(
            test_logger(),
            Arc::new(InMemoryStorage::new()),
            engine.clone(),
            Arc::new(PlaintextKeyGuard),
        )
        .await
        .unwrap();

        for i in 1u64..=5 {
            backlog.append(&format!("q{}", i), SeqNo::UNASSIGNED, 0).await;
        }

        backlog.rebuild(SeqNo::new(2)).await;

        // The engine database was recreated and holds exactly the replay of 1..=2.
        assert_eq!(*engine.executed.lock().unwrap(), vec!["q1", "q2"]);
    }

    #[tokio::test]
    async fn key_table_round_trips() {
        let backlog = test_backlog().await;

        backlog.push_key("masterIP", "10.0.0.1", false).await;
        assert_eq!(
            backlog.get_key("masterIP", false).await,
            Some("10.0.0.1".to_string())
        );

        assert!(backlog.remove_key("masterIP").await);
        assert_eq!(backlog.get_key("masterIP", false).await, None);
    }

    #[test]
    fn byte_cap_trims_whole_records() {
        let records: Vec<Record> = (1..=4)
            .map(|seq| Record {
                seq: SeqNo::new(seq),
                query: "x".repeat(10),
                timestamp: 0,
            })
            .collect();

        let trimmed = trim_to_byte_cap(records.clone(), 25);
        assert_eq!(trimmed.len(), 2);

        // A single oversized record is still sent rather than an empty page.
        let big = vec![Record {
            seq: SeqNo::new(1),
            query: "x".repeat(100),
            timestamp: 0,
        }];
        assert_eq!(trim_to_byte_cap(big, 25).len(), 1);
    }
}
