//! The TCP [`raft::Network`] implementation: resolves node IDs against the cluster config and
//! opens a short-lived connection per outbound message.

use crate::config::Config;
use crate::transport;
use async_trait::async_trait;
use raft::{ClientAddress, Message, Network, NodeId, TransportError};
use std::net::SocketAddr;
use tracing::{debug, warn};

pub struct TcpNetwork {
    cluster: std::collections::BTreeMap<NodeId, SocketAddr>,
}

impl TcpNetwork {
    pub fn new(config: &Config) -> Self {
        let cluster = config
            .cluster
            .keys()
            .filter_map(|id| config.addr_of(id).map(|addr| (id.clone(), addr)))
            .collect();
        Self { cluster }
    }
}

#[async_trait]
impl Network for TcpNetwork {
    async fn send_to_node(&self, target: &NodeId, message: Message) {
        match self.cluster.get(target) {
            Some(addr) => {
                if let Err(source) = transport::send_message(*addr, &message).await {
                    let err = TransportError {
                        target: format!("{} ({})", target, addr),
                        source,
                    };
                    debug!(error = %err, "failed to deliver message, relying on the next heartbeat to retry");
                }
            }
            None => warn!(node_id = %target, "no known address for peer, dropping message"),
        }
    }

    async fn send_to_client(&self, target: &ClientAddress, message: Message) {
        let addr = match format!("{}:{}", target.0, target.1).parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(err) => {
                warn!(host = %target.0, port = target.1, error = %err, "invalid client address");
                return;
            }
        };
        if let Err(source) = transport::send_message(addr, &message).await {
            let err = TransportError {
                target: addr.to_string(),
                source,
            };
            debug!(error = %err, "failed to deliver client response");
        }
    }

    fn describe(&self, target: &NodeId) -> String {
        match self.cluster.get(target) {
            Some(addr) => addr.to_string(),
            None => "?".to_string(),
        }
    }
}
