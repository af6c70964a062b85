/// SessionRegistry is the seam to the user-session cache that `userSession` messages fan
/// out to. It sits entirely outside the sequencing path.
pub trait SessionRegistry: Send + Sync {
    fn add(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Registry that drops everything. For nodes that don't serve client sessions.
pub struct NullSessionRegistry;

impl SessionRegistry for NullSessionRegistry {
    fn add(&self, _key: &str, _value: &str) {}

    fn remove(&self, _key: &str) {}
}
