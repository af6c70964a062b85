mod cache;
mod in_memory;
mod log;
mod storage;

pub use self::log::AppendOutcome;
pub use self::log::Backlog;
pub use self::log::PAGE_BYTE_CAP;
pub use in_memory::InMemoryStorage;
pub use storage::BacklogStorage;
pub use storage::Record;
pub use storage::SeqNo;
pub use storage::StorageError;

use std::sync::Arc;

/// Selects the storage backend once at startup. Anything unrecognized is fatal here and
/// nowhere else.
pub fn open_storage(backend: &str) -> Result<Arc<dyn BacklogStorage>, StorageError> {
    match backend {
        "memory" => Ok(Arc::new(InMemoryStorage::new())),
        other => Err(StorageError::ProtocolUnsupported(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_is_rejected() {
        match open_storage("MongoDB") {
            Err(StorageError::ProtocolUnsupported(name)) => assert_eq!(name, "MongoDB"),
            other => panic!("expected ProtocolUnsupported, got {:?}", other.map(|_| ())),
        }
    }
}
