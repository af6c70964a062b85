use crate::backlog::storage::{BacklogStorage, Record, SeqNo, StorageError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

// The relational backend belongs to the engine integration; this models the same contract
// in memory, the only backend the sequencer itself needs for tests and single-node runs.
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

struct Inner {
    records: BTreeMap<u64, Record>,
    options: HashMap<String, String>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        InMemoryStorage {
            inner: Mutex::new(Inner {
                records: BTreeMap::new(),
                options: HashMap::new(),
            }),
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("backlog storage lock poisoned")
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BacklogStorage for InMemoryStorage {
    async fn insert(&self, record: Record) -> Result<(), StorageError> {
        let mut inner = self.locked();
        let seq = record.seq;
        if inner.records.contains_key(&seq.as_u64()) {
            return Err(StorageError::DuplicateSequence(seq));
        }
        inner.records.insert(seq.as_u64(), record);

        Ok(())
    }

    async fn read_one(&self, seq: SeqNo) -> Result<Option<Record>, StorageError> {
        Ok(self.locked().records.get(&seq.as_u64()).cloned())
    }

    async fn read_range(&self, from: SeqNo, limit: usize) -> Result<Vec<Record>, StorageError> {
        let inner = self.locked();
        let records = inner
            .records
            .range(from.as_u64()..)
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect();

        Ok(records)
    }

    async fn last_sequence(&self) -> Result<SeqNo, StorageError> {
        let inner = self.locked();
        let last = inner
            .records
            .keys()
            .next_back()
            .copied()
            .map(SeqNo::new)
            .unwrap_or(SeqNo::UNASSIGNED);

        Ok(last)
    }

    async fn truncate_after(&self, seq: SeqNo) -> Result<(), StorageError> {
        let mut inner = self.locked();
        inner.records.split_off(&(seq.as_u64() + 1));

        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.locked().records.clear();

        Ok(())
    }

    async fn put_key(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.locked().options.insert(key.to_string(), value.to_string());

        Ok(())
    }

    async fn get_key(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.locked().options.get(key).cloned())
    }

    async fn all_keys(&self) -> Result<Vec<(String, String)>, StorageError> {
        let inner = self.locked();
        let mut keys: Vec<(String, String)> = inner
            .options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        keys.sort();

        Ok(keys)
    }

    async fn remove_key(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.locked().options.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seq: u64, query: &str) -> Record {
        Record {
            seq: SeqNo::new(seq),
            query: query.to_string(),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let storage = InMemoryStorage::new();
        storage.insert(record(1, "a")).await.unwrap();

        match storage.insert(record(1, "b")).await {
            Err(StorageError::DuplicateSequence(seq)) => assert_eq!(seq, SeqNo::new(1)),
            other => panic!("expected DuplicateSequence, got {:?}", other),
        }

        // First write wins.
        let stored = storage.read_one(SeqNo::new(1)).await.unwrap().unwrap();
        assert_eq!(stored.query, "a");
    }

    #[tokio::test]
    async fn truncate_after_drops_tail_only() {
        let storage = InMemoryStorage::new();
        for seq in 1..=5 {
            storage.insert(record(seq, "q")).await.unwrap();
        }

        storage.truncate_after(SeqNo::new(2)).await.unwrap();

        assert_eq!(storage.last_sequence().await.unwrap(), SeqNo::new(2));
        assert!(storage.read_one(SeqNo::new(3)).await.unwrap().is_none());
        assert!(storage.read_one(SeqNo::new(2)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn read_range_is_ordered_and_bounded() {
        let storage = InMemoryStorage::new();
        for seq in [3u64, 1, 5, 2, 4].iter() {
            storage.insert(record(*seq, "q")).await.unwrap();
        }

        let page = storage.read_range(SeqNo::new(2), 3).await.unwrap();
        let seqs: Vec<u64> = page.iter().map(|r| r.seq.as_u64()).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }
}
