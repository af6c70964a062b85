mod analyzer;
mod backlog;
mod buffer;
mod cluster;
mod engine;
mod logging;
mod operator;
mod security;
mod sessions;
mod transport;

pub use analyzer::analyze;
pub use analyzer::AnalyzedQuery;
pub use analyzer::QueryKind;
pub use backlog::open_storage;
pub use backlog::AppendOutcome;
pub use backlog::Backlog;
pub use backlog::BacklogStorage;
pub use backlog::InMemoryStorage;
pub use backlog::Record;
pub use backlog::SeqNo;
pub use backlog::StorageError;
pub use backlog::PAGE_BYTE_CAP;
pub use buffer::GapTracker;
pub use buffer::ReplicationBuffer;
pub use cluster::master_candidates;
pub use cluster::ClusterState;
pub use cluster::Node;
pub use cluster::NodeAddr;
pub use cluster::NodeStatus;
pub use engine::EngineError;
pub use engine::NullEngine;
pub use engine::SqlEngine;
pub use logging::file_logger;
pub use logging::stdout_logger;
pub use operator::Operator;
pub use operator::OperatorConfig;
pub use operator::OperatorOptions;
pub use operator::Routed;
pub use security::KeyBundle;
pub use security::KeyGuard;
pub use security::KeyGuardError;
pub use security::PlaintextKeyGuard;
pub use sessions::NullSessionRegistry;
pub use sessions::SessionRegistry;
pub use transport::BacklogPage;
pub use transport::ConnId;
pub use transport::Discovery;
pub use transport::LinkError;
pub use transport::LinkFactory;
pub use transport::MasterLink;
pub use transport::NodeProbe;
pub use transport::PeerFanout;
pub use transport::SessionOp;
pub use transport::StatusReport;
pub use transport::WriteAck;
