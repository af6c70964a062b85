mod directory;
mod state;

pub use directory::master_candidates;
pub use directory::Node;
pub use directory::NodeAddr;
pub use state::ClusterState;
pub use state::NodeStatus;
