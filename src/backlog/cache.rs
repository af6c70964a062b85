use crate::backlog::storage::{Record, SeqNo};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// RecentCache holds just-appended records for a short TTL so a peer asking for a seq it
/// missed can be answered without a storage round trip.
pub(crate) struct RecentCache {
    ttl: Duration,
    entries: Mutex<HashMap<u64, (Record, Instant)>>,
}

impl RecentCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        RecentCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn put(&self, record: Record) {
        let mut entries = self.entries.lock().expect("recent cache lock poisoned");
        let now = Instant::now();
        entries.retain(|_, (_, inserted)| now.duration_since(*inserted) < self.ttl);
        entries.insert(record.seq.as_u64(), (record, now));
    }

    pub(crate) fn get(&self, seq: SeqNo) -> Option<Record> {
        let entries = self.entries.lock().expect("recent cache lock poisoned");
        match entries.get(&seq.as_u64()) {
            Some((record, inserted)) if inserted.elapsed() < self.ttl => Some(record.clone()),
            _ => None,
        }
    }

    pub(crate) fn clear(&self) {
        self.entries
            .lock()
            .expect("recent cache lock poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entry_is_not_served() {
        let cache = RecentCache::new(Duration::from_millis(0));
        cache.put(Record {
            seq: SeqNo::new(7),
            query: "q".to_string(),
            timestamp: 0,
        });

        assert!(cache.get(SeqNo::new(7)).is_none());
    }

    #[test]
    fn fresh_entry_is_served() {
        let cache = RecentCache::new(Duration::from_secs(60));
        cache.put(Record {
            seq: SeqNo::new(7),
            query: "q".to_string(),
            timestamp: 0,
        });

        assert_eq!(cache.get(SeqNo::new(7)).map(|r| r.query), Some("q".to_string()));
    }
}
