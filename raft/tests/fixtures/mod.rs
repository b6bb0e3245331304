//! An in-process cluster fixture: every node runs in its own task, wired together by a
//! [`TestNetwork`] that routes through `mpsc` channels instead of sockets. Grounded in the
//! `RaftRouter` pattern used for the source project's own multi-node integration tests, but
//! simplified to this crate's flat `Network` trait.

use async_trait::async_trait;
use raft::{ClientAddress, Message, Network, NodeHandle, NodeId, RaftNode, TimerConfig};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

struct Shared {
    nodes: Mutex<HashMap<NodeId, NodeHandle>>,
    isolated: Mutex<HashSet<NodeId>>,
    clients: Mutex<HashMap<ClientAddress, oneshot::Sender<Message>>>,
}

/// A `Network` bound to one node's identity, so it can honor that node's own isolation state
/// as well as the target's.
pub struct TestNetwork {
    id: NodeId,
    shared: Arc<Shared>,
}

#[async_trait]
impl Network for TestNetwork {
    async fn send_to_node(&self, target: &NodeId, message: Message) {
        let isolated = self.shared.isolated.lock().unwrap();
        if isolated.contains(&self.id) || isolated.contains(target) {
            return;
        }
        drop(isolated);
        let handle = self.shared.nodes.lock().unwrap().get(target).cloned();
        if let Some(handle) = handle {
            let _ = handle.send(message);
        }
    }

    async fn send_to_client(&self, target: &ClientAddress, message: Message) {
        if self.shared.isolated.lock().unwrap().contains(&self.id) {
            return;
        }
        if let Some(tx) = self.shared.clients.lock().unwrap().remove(target) {
            let _ = tx.send(message);
        }
    }
}

/// A whole in-process cluster: every node's mailbox, plus the shared routing table used to
/// simulate partitions.
pub struct Cluster {
    shared: Arc<Shared>,
    pub node_ids: Vec<NodeId>,
    _storage: tempfile::TempDir,
}

impl Cluster {
    /// Spawns `n` nodes, all pointed at each other, using aggressive timers so tests settle
    /// quickly.
    pub fn start(n: usize) -> Self {
        let storage = tempfile::tempdir().unwrap();
        let node_ids: Vec<NodeId> = (0..n).map(|i| format!("n{}", i)).collect();
        let shared = Arc::new(Shared {
            nodes: Mutex::new(HashMap::new()),
            isolated: Mutex::new(HashSet::new()),
            clients: Mutex::new(HashMap::new()),
        });

        let timers = TimerConfig {
            election_timeout_min: Duration::from_millis(40),
            election_timeout_max: Duration::from_millis(80),
            heartbeat_interval: Duration::from_millis(15),
        };

        for id in &node_ids {
            let peers: Vec<NodeId> = node_ids.iter().filter(|p| *p != id).cloned().collect();
            let network = Arc::new(TestNetwork {
                id: id.clone(),
                shared: shared.clone(),
            });
            let handle = RaftNode::spawn(
                id.clone(),
                peers,
                storage.path().join(id),
                network,
                Box::new(kvstore::KVStore::new()),
                timers.clone(),
            )
            .expect("node storage should open cleanly");
            shared.nodes.lock().unwrap().insert(id.clone(), handle);
        }

        Self {
            shared,
            node_ids,
            _storage: storage,
        }
    }

    pub fn isolate(&self, id: &str) {
        self.shared.isolated.lock().unwrap().insert(id.to_string());
    }

    pub fn heal(&self, id: &str) {
        self.shared.isolated.lock().unwrap().remove(id);
    }

    fn handle(&self, id: &str) -> NodeHandle {
        self.shared.nodes.lock().unwrap().get(id).unwrap().clone()
    }

    /// Sends a `ClientRequest` directly to `node_id` and waits up to `timeout` for the
    /// `ClientResponse`.
    pub async fn request(&self, node_id: &str, item: serde_json::Value, timeout: Duration) -> Option<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        let client_address: ClientAddress = (format!("test-client-{}", node_id), rand_port());
        self.shared.clients.lock().unwrap().insert(client_address.clone(), tx);

        let _ = self.handle(node_id).send(Message::ClientRequest { item, client_address });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Message::ClientResponse { result })) => Some(result),
            _ => None,
        }
    }

    /// Retries `item` against every node in round-robin until one reports success, or gives
    /// up after `attempts` full rounds. Mirrors how a real client would find the leader.
    pub async fn request_until_committed(&self, item: serde_json::Value, attempts: usize) -> serde_json::Value {
        for _ in 0..attempts {
            for node_id in &self.node_ids {
                if let Some(result) = self.request(node_id, item.clone(), Duration::from_millis(200)).await {
                    if !is_not_leader(&result) {
                        return result;
                    }
                }
            }
        }
        panic!("no node in the cluster committed the request after {} rounds", attempts);
    }
}

/// The only failure signal the protocol carries on a `ClientResponse` is the `NotLeader: …`
/// string a follower replies with; every other result (including state-machine errors) is a
/// value the caller is meant to see as-is.
pub fn is_not_leader(result: &serde_json::Value) -> bool {
    matches!(result, serde_json::Value::String(s) if s.starts_with("NotLeader"))
}

fn rand_port() -> u16 {
    use std::sync::atomic::{AtomicU16, Ordering};
    static NEXT: AtomicU16 = AtomicU16::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
