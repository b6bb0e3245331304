//! The seam between consensus and application logic: committed entries become state-machine
//! calls, nothing more.

use crate::error::StateMachineError;
use serde_json::Value;

/// Applies committed log items in order and answers client reads.
///
/// `apply` is called exactly once per committed index, strictly in log order (invariant S1).
/// An `Err` result does not stop replication: its message becomes the client-visible `result`
/// and `last_applied` still advances, matching the source's treatment of `kvstore` command
/// errors as ordinary results rather than fatal conditions.
pub trait StateMachine: Send {
    fn apply(&mut self, item: &Value) -> Result<Value, StateMachineError>;
}
