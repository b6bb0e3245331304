//! The outbound-delivery seam: how a [`crate::node::RaftNode`] reaches other nodes and clients.

use crate::message::{ClientAddress, Message};
use crate::NodeId;
use async_trait::async_trait;

/// Delivers a [`Message`] to a peer node or a waiting client.
///
/// Implemented once per transport (in-process router for tests, TCP for `raftd`). A node never
/// resolves addresses itself — that's the implementation's job, mirroring how the source
/// hands `msg_type`-tagged dicts to a `Transport` without knowing sockets.
#[async_trait]
pub trait Network: Send + Sync {
    async fn send_to_node(&self, target: &NodeId, message: Message);

    async fn send_to_client(&self, target: &ClientAddress, message: Message);

    /// A human-displayable address for `target`, used only to build the `NotLeader` redirect a
    /// client sees. The core crate has no notion of host/port; an embedder that can resolve one
    /// overrides this. Defaults to the bare `NodeId`, same as having no address to offer.
    fn describe(&self, target: &NodeId) -> String {
        target.clone()
    }
}
