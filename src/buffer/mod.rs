use crate::backlog::{Record, SeqNo};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// ReplicationBuffer holds records that arrived ahead of the expected next seq, until the
/// gap below them closes. Transient: rebuilt on every election cycle or reconnect.
///
/// Invariant: every buffered seq was strictly greater than the expected next seq at the
/// moment it was inserted; a record equal to the expected next is applied immediately and
/// never buffered.
pub struct ReplicationBuffer {
    pending: BTreeMap<u64, Record>,
    start_seq: SeqNo,
}

impl ReplicationBuffer {
    pub fn new() -> Self {
        ReplicationBuffer {
            pending: BTreeMap::new(),
            start_seq: SeqNo::UNASSIGNED,
        }
    }

    /// Stores an out-of-order record. First insert pins `start_seq`; a seq already
    /// buffered is left untouched (first delivery wins).
    pub fn insert(&mut self, record: Record) {
        if self.start_seq.is_unassigned() {
            self.start_seq = record.seq;
        }
        self.pending.entry(record.seq.as_u64()).or_insert(record);
    }

    pub fn take(&mut self, seq: SeqNo) -> Option<Record> {
        self.pending.remove(&seq.as_u64())
    }

    pub fn contains(&self, seq: SeqNo) -> bool {
        self.pending.contains_key(&seq.as_u64())
    }

    /// Lowest buffered seq; UNASSIGNED when empty.
    pub fn start_seq(&self) -> SeqNo {
        self.start_seq
    }

    pub fn highest(&self) -> SeqNo {
        self.pending
            .keys()
            .next_back()
            .copied()
            .map(SeqNo::new)
            .unwrap_or(SeqNo::UNASSIGNED)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Removes and returns everything in ascending seq order.
    pub fn drain_all(&mut self) -> Vec<Record> {
        self.start_seq = SeqNo::UNASSIGNED;
        let drained: Vec<Record> = std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(_, record)| record)
            .collect();

        drained
    }

    /// Drops every buffered record at or below `seq`; those were committed through
    /// another path and would only replay as duplicates.
    pub fn discard_through(&mut self, seq: SeqNo) {
        self.pending = self.pending.split_off(&(seq.as_u64() + 1));
        self.start_seq = self
            .pending
            .keys()
            .next()
            .copied()
            .map(SeqNo::new)
            .unwrap_or(SeqNo::UNASSIGNED);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.start_seq = SeqNo::UNASSIGNED;
    }
}

impl Default for ReplicationBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// GapTracker remembers which missing seqs were recently requested from the master, so
/// repeated gap detections inside the TTL don't turn into request storms.
pub struct GapTracker {
    ttl: Duration,
    requested: HashMap<u64, Instant>,
}

impl GapTracker {
    /// How many missing seqs a single recovery pass may request.
    pub const REQUEST_WINDOW: u64 = 4;

    pub fn new(ttl: Duration) -> Self {
        GapTracker {
            ttl,
            requested: HashMap::new(),
        }
    }

    /// Marks `seq` as requested. Returns false (and does not re-mark) if a request for it
    /// is still within the TTL.
    pub fn mark_requested(&mut self, seq: SeqNo) -> bool {
        let now = Instant::now();
        let ttl = self.ttl;
        self.requested.retain(|_, at| now.duration_since(*at) < ttl);

        if self.requested.contains_key(&seq.as_u64()) {
            return false;
        }
        self.requested.insert(seq.as_u64(), now);

        true
    }

    pub fn clear(&mut self) {
        self.requested.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seq: u64) -> Record {
        Record {
            seq: SeqNo::new(seq),
            query: format!("q{}", seq),
            timestamp: 0,
        }
    }

    #[test]
    fn start_seq_pins_to_first_insert() {
        let mut buffer = ReplicationBuffer::new();
        assert_eq!(buffer.start_seq(), SeqNo::UNASSIGNED);

        buffer.insert(record(7));
        buffer.insert(record(4));
        assert_eq!(buffer.start_seq(), SeqNo::new(7));
        assert_eq!(buffer.highest(), SeqNo::new(7));
    }

    #[test]
    fn first_delivery_wins() {
        let mut buffer = ReplicationBuffer::new();
        buffer.insert(record(5));
        buffer.insert(Record {
            seq: SeqNo::new(5),
            query: "late duplicate".to_string(),
            timestamp: 9,
        });

        assert_eq!(buffer.take(SeqNo::new(5)).unwrap().query, "q5");
    }

    #[test]
    fn drain_is_ascending_and_empties() {
        let mut buffer = ReplicationBuffer::new();
        for seq in [6u64, 3, 5, 4].iter() {
            buffer.insert(record(*seq));
        }

        let seqs: Vec<u64> = buffer.drain_all().iter().map(|r| r.seq.as_u64()).collect();
        assert_eq!(seqs, vec![3, 4, 5, 6]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.start_seq(), SeqNo::UNASSIGNED);
    }

    #[test]
    fn discard_through_drops_committed_seqs() {
        let mut buffer = ReplicationBuffer::new();
        buffer.insert(record(3));
        buffer.insert(record(5));

        buffer.discard_through(SeqNo::new(3));
        assert!(!buffer.contains(SeqNo::new(3)));
        assert_eq!(buffer.start_seq(), SeqNo::new(5));

        buffer.discard_through(SeqNo::new(9));
        assert!(buffer.is_empty());
        assert_eq!(buffer.start_seq(), SeqNo::UNASSIGNED);
    }

    #[test]
    fn gap_tracker_dedupes_within_ttl() {
        let mut tracker = GapTracker::new(Duration::from_secs(10));
        assert!(tracker.mark_requested(SeqNo::new(3)));
        assert!(!tracker.mark_requested(SeqNo::new(3)));
        assert!(tracker.mark_requested(SeqNo::new(4)));
    }

    #[test]
    fn gap_tracker_forgets_after_ttl() {
        let mut tracker = GapTracker::new(Duration::from_millis(0));
        assert!(tracker.mark_requested(SeqNo::new(3)));
        assert!(tracker.mark_requested(SeqNo::new(3)));
    }
}
