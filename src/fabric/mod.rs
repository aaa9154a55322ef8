//! RPC fabric coupling the conductor to remote workers through the broker.

pub mod messages;
pub mod redis;
pub mod requests;

pub use messages::{
    ActiveTask, ActiveTaskHandles, MsgTranscodingTask, MsgWorkRequest, MsgWorkerHeartbeat,
    MsgWorkerProgress, MsgWorkerResult, TaskError, TaskSuccess,
};
pub use self::redis::RedisFabric;
pub use requests::{MsgTranscodingRequest, RequestIntake};
