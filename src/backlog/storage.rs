use async_trait::async_trait;
use std::fmt;

/// SeqNo is the position of a committed write in the replicated backlog. Seq numbers are
/// assigned by the master, start at 1, and have no holes except those opened by a rollback.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SeqNo(u64);

impl SeqNo {
    /// The zero seq is never stored; on input it means "assign the next local seq".
    pub const UNASSIGNED: SeqNo = SeqNo(0);

    pub fn new(seq: u64) -> Self {
        SeqNo(seq)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_unassigned(&self) -> bool {
        self.0 == 0
    }

    pub fn next(&self) -> SeqNo {
        SeqNo(self.0 + 1)
    }

    pub fn plus(&self, offset: u64) -> SeqNo {
        SeqNo(self.0 + offset)
    }
}

impl fmt::Debug for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single sequenced write. Immutable once stored.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub seq: SeqNo,
    pub query: String,
    pub timestamp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The durable store is unreachable. Callers re-drive from their own retry loop.
    #[error("backlog storage unavailable: {0}")]
    Unavailable(String),

    /// Insert collided with an already-stored seq. Logged and discarded, never retried.
    #[error("duplicate sequence number {0}")]
    DuplicateSequence(SeqNo),

    /// Unknown storage backend name. Fatal at startup only.
    #[error("storage backend {0:?} not supported")]
    ProtocolUnsupported(String),
}

/// BacklogStorage is the durable, seq-indexed record store plus the small key/value side
/// table. Selected once at startup; everything above it is backend-agnostic.
#[async_trait]
pub trait BacklogStorage: Send + Sync {
    /// Stores a record at its seq. Fails with `DuplicateSequence` if the seq is taken.
    async fn insert(&self, record: Record) -> Result<(), StorageError>;

    async fn read_one(&self, seq: SeqNo) -> Result<Option<Record>, StorageError>;

    /// Up to `limit` records with seq >= `from`, ascending.
    async fn read_range(&self, from: SeqNo, limit: usize) -> Result<Vec<Record>, StorageError>;

    /// Highest stored seq; UNASSIGNED if the store is empty.
    async fn last_sequence(&self) -> Result<SeqNo, StorageError>;

    /// Deletes every record with seq > `seq`. Used only by rollback.
    async fn truncate_after(&self, seq: SeqNo) -> Result<(), StorageError>;

    /// Empties the record store.
    async fn clear(&self) -> Result<(), StorageError>;

    // Key/value side table. Not sequence-ordered, last-write-wins.
    async fn put_key(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn get_key(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn all_keys(&self) -> Result<Vec<(String, String)>, StorageError>;
    async fn remove_key(&self, key: &str) -> Result<bool, StorageError>;
}
