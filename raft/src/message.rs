//! The wire protocol: a tagged union of every message a node or client can send.

use crate::log::LogEntry;
use crate::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `(host, port)` a client expects a `ClientResponse` delivered back to.
pub type ClientAddress = (String, u16);

/// Every message that can cross the wire or be enqueued into a node's own mailbox.
///
/// Tagged with `msg_type` (snake_case) so the JSON on the wire is self-describing, matching
/// the source protocol's dispatch-by-field-name scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum Message {
    ClientRequest {
        item: Value,
        client_address: ClientAddress,
    },
    ClientResponse { result: Value },
    AppendEntriesRequest {
        term: u32,
        leader_id: NodeId,
        prev_log_index: i64,
        prev_log_term: i32,
        entries: Vec<LogEntry>,
        leader_commit: i64,
    },
    AppendEntriesResponse {
        term: u32,
        success: bool,
        match_index: i64,
        responder_id: NodeId,
    },
    VoteRequest {
        term: u32,
        candidate_id: NodeId,
        last_log_index: i64,
        last_log_term: i32,
    },
    VoteResponse {
        term: u32,
        vote_granted: bool,
        responder_id: NodeId,
    },
    /// Self-addressed: fires when the heartbeat timer elapses on a leader.
    ///
    /// `empty` is set on the first heartbeat sent right after promotion, so the leadership
    /// announcement goes out without racing optimistic `next_index` guesses against entries
    /// that may not have replicated anywhere yet.
    HeartbeatRequest { empty: bool },
    /// Self-addressed: fires when the election timer elapses without a heartbeat.
    ElectionRequest,
}
