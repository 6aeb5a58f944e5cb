pub mod metrics;
pub mod protocol;

pub use metrics::{init_metrics, serve_metrics, sync_counter};
pub use protocol::{
    DispatchError, OperatorMessage, ProtocolError, ProtocolVersion, ReplyMsg, SetSetpointMsg,
    SnapshotMsg,
};
