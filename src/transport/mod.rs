mod messages;
mod traits;

pub use messages::BacklogPage;
pub use messages::ConnId;
pub use messages::SessionOp;
pub use messages::StatusReport;
pub use messages::WriteAck;
pub use traits::Discovery;
pub use traits::LinkError;
pub use traits::LinkFactory;
pub use traits::MasterLink;
pub use traits::NodeProbe;
pub use traits::PeerFanout;
