//! The node actor: one task per cluster member, one mailbox, no shared mutable state.
//!
//! [`RaftNode::spawn`] owns everything the node needs — durable [`RaftState`], the outbound
//! [`Network`], the [`StateMachine`], and its own timers — and drives them purely by draining
//! [`Message`] values off an `mpsc` channel, mirroring the source's single-threaded,
//! message-dispatch actor loop.

use crate::error::StorageError;
use crate::log::LogEntry;
use crate::message::{ClientAddress, Message};
use crate::network::Network;
use crate::state::{RaftState, Role};
use crate::state_machine::StateMachine;
use crate::NodeId;
use futures::future::{AbortHandle, Abortable};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Timer intervals a node runs on. `election_timeout` is redrawn uniformly from
/// `[election_timeout_min, election_timeout_max)` on every reset, per the paper's
/// randomization requirement for avoiding split votes.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
        }
    }
}

/// A running node's mailbox handle — clone freely, it's just a channel sender.
pub type NodeHandle = mpsc::UnboundedSender<Message>;

/// The node actor itself. Not `Clone` or `Send`-shared: it lives entirely inside the task
/// spawned by [`RaftNode::spawn`].
pub struct RaftNode {
    id: NodeId,
    peers: Vec<NodeId>,
    state: RaftState,
    network: Arc<dyn Network>,
    state_machine: Box<dyn StateMachine>,
    client_callbacks: HashMap<i64, ClientAddress>,
    timers: TimerConfig,
    self_tx: NodeHandle,
    election_timer: Option<AbortHandle>,
    heartbeat_timer: Option<AbortHandle>,
}

impl RaftNode {
    /// Opens durable state for `id` under `storage_dir`, then spawns the node's mailbox task.
    /// Returns the sender other actors use to deliver messages to it.
    pub fn spawn(
        id: NodeId,
        peers: Vec<NodeId>,
        storage_dir: PathBuf,
        network: Arc<dyn Network>,
        state_machine: Box<dyn StateMachine>,
        timers: TimerConfig,
    ) -> Result<NodeHandle, StorageError> {
        let state = RaftState::open(&storage_dir, id.clone())?;
        let (self_tx, mailbox) = mpsc::unbounded_channel();

        let mut node = RaftNode {
            id,
            peers,
            state,
            network,
            state_machine,
            client_callbacks: HashMap::new(),
            timers,
            self_tx: self_tx.clone(),
            election_timer: None,
            heartbeat_timer: None,
        };

        let handle = self_tx.clone();
        tokio::spawn(async move {
            node.reset_election_timer();
            node.run(mailbox).await;
        });
        Ok(handle)
    }

    #[tracing::instrument(name = "node", skip(self, mailbox), fields(node_id = %self.id))]
    async fn run(&mut self, mut mailbox: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = mailbox.recv().await {
            if let Err(err) = self.handle(message).await {
                warn!(error = %err, "fatal storage error, node shutting down");
                return;
            }
        }
    }

    async fn handle(&mut self, message: Message) -> Result<(), StorageError> {
        match message {
            Message::HeartbeatRequest { empty } => self.on_heartbeat_timer(empty).await,
            Message::ElectionRequest => self.on_election_timer().await?,
            Message::ClientRequest { item, client_address } => {
                self.on_client_request(item, client_address).await?
            }
            Message::AppendEntriesRequest {
                term,
                leader_id,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => {
                self.on_append_entries_request(
                    term,
                    leader_id,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit,
                )
                .await?
            }
            Message::AppendEntriesResponse {
                term,
                success,
                match_index,
                responder_id,
            } => {
                self.on_append_entries_response(term, success, match_index, responder_id)
                    .await?
            }
            Message::VoteRequest {
                term,
                candidate_id,
                last_log_index,
                last_log_term,
            } => {
                self.on_vote_request(term, candidate_id, last_log_index, last_log_term)
                    .await?
            }
            Message::VoteResponse {
                term,
                vote_granted,
                responder_id,
            } => self.on_vote_response(term, vote_granted, responder_id).await?,
            Message::ClientResponse { .. } => {
                // A node never receives this; it only ever sends it to clients.
            }
        }
        Ok(())
    }

    // --- timers -----------------------------------------------------------------------

    fn reset_election_timer(&mut self) {
        if let Some(handle) = self.election_timer.take() {
            handle.abort();
        }
        let timeout = {
            let min_ms = self.timers.election_timeout_min.as_millis() as u64;
            let max_ms = self.timers.election_timeout_max.as_millis() as u64;
            let millis = rand::thread_rng().gen_range(min_ms..max_ms);
            Duration::from_millis(millis)
        };
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        let tx = self.self_tx.clone();
        tokio::spawn(Abortable::new(
            async move {
                tokio::time::sleep(timeout).await;
                let _ = tx.send(Message::ElectionRequest);
            },
            abort_registration,
        ));
        self.election_timer = Some(abort_handle);
    }

    fn start_heartbeat_timer(&mut self) {
        if let Some(handle) = self.heartbeat_timer.take() {
            handle.abort();
        }
        let interval = self.timers.heartbeat_interval;
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        let tx = self.self_tx.clone();
        tokio::spawn(Abortable::new(
            async move {
                tokio::time::sleep(interval).await;
                let _ = tx.send(Message::HeartbeatRequest { empty: false });
            },
            abort_registration,
        ));
        self.heartbeat_timer = Some(abort_handle);
    }

    fn stop_heartbeat_timer(&mut self) {
        if let Some(handle) = self.heartbeat_timer.take() {
            handle.abort();
        }
    }

    /// Steps down to `Follower`: cancels the heartbeat cadence, clears leader bookkeeping and
    /// the current vote, and starts a fresh election timer.
    ///
    /// Also drops any pending client callbacks — a new leader may truncate and replace the
    /// entries they were waiting on, so replying to them later (keyed by an index that now
    /// means something else) would deliver a wrong or stale result to the wrong client.
    fn demote(&mut self) -> Result<(), StorageError> {
        self.stop_heartbeat_timer();
        self.state.demote()?;
        self.client_callbacks.clear();
        self.reset_election_timer();
        Ok(())
    }

    // --- handlers -----------------------------------------------------------------------

    async fn on_heartbeat_timer(&mut self, empty: bool) {
        // Defensive: a demoted leader's in-flight heartbeat tick is simply dropped rather
        // than rescheduled forever (unlike a naive unconditional reschedule loop).
        if self.state.role != Role::Leader {
            return;
        }
        for peer in self.peers.clone() {
            self.send_append_entries(&peer, empty).await;
        }
        self.start_heartbeat_timer();
    }

    /// Never role-gated: a leader that happens to receive its own stale election timer just
    /// starts (and immediately wins, or loses to a real election already in progress) another
    /// one, same as any other role.
    async fn on_election_timer(&mut self) -> Result<(), StorageError> {
        self.state.become_candidate()?;
        info!(term = self.state.current_term(), "starting election");

        let last_log_index = self.state.log.len() - 1;
        let last_log_term = self.state.log.last_term();
        self.reset_election_timer();
        for peer in self.peers.clone() {
            self.network
                .send_to_node(
                    &peer,
                    Message::VoteRequest {
                        term: self.state.current_term(),
                        candidate_id: self.id.clone(),
                        last_log_index,
                        last_log_term,
                    },
                )
                .await;
        }

        // A single-node cluster's own vote is already a majority.
        self.maybe_become_leader();
        Ok(())
    }

    async fn on_client_request(&mut self, item: Value, client_address: ClientAddress) -> Result<(), StorageError> {
        if self.state.role != Role::Leader {
            let redirect = match &self.state.current_leader {
                Some(leader_id) => self.network.describe(leader_id),
                None => "?".to_string(),
            };
            self.network
                .send_to_client(
                    &client_address,
                    Message::ClientResponse {
                        result: Value::String(format!("NotLeader: reconnect to {}", redirect)),
                    },
                )
                .await;
            return Ok(());
        }

        let prev_index = self.state.log.len() - 1;
        let prev_term = self.state.log.last_term();
        let entry = LogEntry::new(self.state.current_term(), item);
        let applied = crate::log::append_entries(&mut self.state.log, prev_index, prev_term, vec![entry])?;
        debug_assert!(applied, "a leader's own append_entries call must always succeed");

        let match_index = self.state.log.len() - 1;
        self.state.match_index.insert(self.id.clone(), match_index);
        self.state.next_index.insert(self.id.clone(), match_index + 1);
        self.client_callbacks.insert(match_index, client_address);

        // Replication to peers happens on the next heartbeat; a single-node cluster has no
        // peers to wait on, so check for consensus (trivially, on its own log) right away.
        self.try_advance_commit_index();
        self.apply_committed().await;
        Ok(())
    }

    async fn on_append_entries_request(
        &mut self,
        term: u32,
        leader_id: NodeId,
        prev_log_index: i64,
        prev_log_term: i32,
        entries: Vec<LogEntry>,
        leader_commit: i64,
    ) -> Result<(), StorageError> {
        self.reset_election_timer();
        if self.state.role != Role::Follower {
            self.demote()?;
        }
        if term > self.state.current_term() {
            self.state.set_current_term(term)?;
        }
        self.state.current_leader = Some(leader_id.clone());

        if term < self.state.current_term() {
            self.network
                .send_to_node(
                    &leader_id,
                    Message::AppendEntriesResponse {
                        term: self.state.current_term(),
                        success: false,
                        match_index: self.state.log.len() - 1,
                        responder_id: self.id.clone(),
                    },
                )
                .await;
            return Ok(());
        }

        let success = crate::log::append_entries(&mut self.state.log, prev_log_index, prev_log_term, entries)?;

        let match_index_reply = if success {
            let reply = self.state.log.len() - 1;
            if leader_commit > self.state.commit_index {
                self.state.commit_index = leader_commit.min(reply);
            }
            reply
        } else {
            0
        };

        self.network
            .send_to_node(
                &leader_id,
                Message::AppendEntriesResponse {
                    term: self.state.current_term(),
                    success,
                    match_index: match_index_reply,
                    responder_id: self.id.clone(),
                },
            )
            .await;
        self.apply_committed().await;
        Ok(())
    }

    async fn on_append_entries_response(
        &mut self,
        term: u32,
        success: bool,
        match_index: i64,
        responder_id: NodeId,
    ) -> Result<(), StorageError> {
        if term > self.state.current_term() {
            self.state.set_current_term(term)?;
            self.demote()?;
            return Ok(());
        }

        if self.state.role != Role::Leader {
            return Ok(());
        }

        if success {
            let current = self.state.match_index.get(&responder_id).copied().unwrap_or(-1);
            let new_match = match_index.max(current);
            self.state.match_index.insert(responder_id.clone(), new_match);
            self.state.next_index.insert(responder_id.clone(), new_match + 1);
        } else {
            let next = self.state.next_index.get(&responder_id).copied().unwrap_or(0);
            self.state.next_index.insert(responder_id.clone(), (next - 1).max(0));
        }

        let current_match = self.state.match_index.get(&responder_id).copied().unwrap_or(-1);
        if current_match != self.state.log.len() - 1 {
            self.replicate_to_one(&responder_id).await;
        }

        // The leader can't commit until there's consensus on an entry (replicated to a
        // quorum) and it has committed an entry from its own term — Figure 8 in the paper.
        if current_match > -1
            && self.state.has_consensus(current_match)
            && self.state.log.entry(current_match).map(|e| e.term) == Some(self.state.current_term())
            && self.state.commit_index < current_match
        {
            self.state.commit_index = current_match;
        }

        self.apply_committed().await;
        Ok(())
    }

    async fn on_vote_request(
        &mut self,
        term: u32,
        candidate_id: NodeId,
        last_log_index: i64,
        last_log_term: i32,
    ) -> Result<(), StorageError> {
        self.reset_election_timer();

        if term < self.state.current_term() {
            self.network
                .send_to_node(
                    &candidate_id,
                    Message::VoteResponse {
                        term: self.state.current_term(),
                        vote_granted: false,
                        responder_id: self.id.clone(),
                    },
                )
                .await;
            return Ok(());
        }

        if term > self.state.current_term() {
            self.state.set_current_term(term)?;
            self.state.set_voted_for(None)?;
            if self.state.role != Role::Follower {
                self.demote()?;
            }
        }

        let already_voted_elsewhere = match self.state.voted_for() {
            Some(v) => v != candidate_id,
            None => false,
        };
        let candidate_log_is_current = (last_log_term > self.state.log.last_term())
            || (last_log_term == self.state.log.last_term() && last_log_index >= self.state.log.len() - 1);

        let grant = !already_voted_elsewhere && candidate_log_is_current;

        if grant {
            self.state.set_voted_for(Some(candidate_id.clone()))?;
        }

        self.network
            .send_to_node(
                &candidate_id,
                Message::VoteResponse {
                    term: self.state.current_term(),
                    vote_granted: grant,
                    responder_id: self.id.clone(),
                },
            )
            .await;
        Ok(())
    }

    async fn on_vote_response(&mut self, term: u32, vote_granted: bool, responder_id: NodeId) -> Result<(), StorageError> {
        if term > self.state.current_term() {
            self.state.set_current_term(term)?;
            self.demote()?;
            return Ok(());
        }

        if self.state.role != Role::Candidate {
            return Ok(());
        }

        if vote_granted {
            self.state.votes_received.insert(responder_id);
            self.maybe_become_leader();
        }
        Ok(())
    }

    // --- helpers -----------------------------------------------------------------------

    fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// Promotes to leader if the vote tally now has a majority, announcing leadership with an
    /// immediate, empty heartbeat rather than replicating right away — `next_index` was just
    /// reset optimistically and hasn't been confirmed against any follower yet.
    fn maybe_become_leader(&mut self) {
        if self.state.role != Role::Candidate {
            return;
        }
        if self.state.votes_received.len() * 2 <= self.cluster_size() {
            return;
        }
        let mut members = self.peers.clone();
        members.push(self.id.clone());
        self.state.become_leader(&members);
        info!(term = self.state.current_term(), "became leader");
        if let Some(handle) = self.election_timer.take() {
            handle.abort();
        }
        let _ = self.self_tx.send(Message::HeartbeatRequest { empty: true });
    }

    async fn replicate_to_one(&mut self, peer: &NodeId) {
        self.send_append_entries(peer, false).await;
    }

    async fn send_append_entries(&mut self, peer: &NodeId, force_empty: bool) {
        let next = self.state.next_index.get(peer).copied().unwrap_or(self.state.log.len());
        let prev_log_index = next - 1;
        let prev_log_term = if prev_log_index >= 0 {
            self.state.log.entry(prev_log_index).map(|e| e.term as i32).unwrap_or(-1)
        } else {
            -1
        };
        let entries = if force_empty { Vec::new() } else { self.state.log.slice_from(next) };

        self.network
            .send_to_node(
                peer,
                Message::AppendEntriesRequest {
                    term: self.state.current_term(),
                    leader_id: self.id.clone(),
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit: self.state.commit_index,
                },
            )
            .await;
    }

    /// Figure-8: only entries from the current term are counted as direct commit candidates;
    /// once one is committed, every earlier entry commits with it because `commit_index` is a
    /// single monotonic counter.
    fn try_advance_commit_index(&mut self) {
        let log_len = self.state.log.len();
        let mut n = self.state.commit_index + 1;
        while n < log_len {
            let term_matches = self.state.log.entry(n).map(|e| e.term) == Some(self.state.current_term());
            if term_matches && self.state.has_consensus(n) {
                self.state.commit_index = n;
            }
            n += 1;
        }
    }

    async fn apply_committed(&mut self) {
        while self.state.last_applied < self.state.commit_index {
            let index = self.state.last_applied + 1;
            let item = match self.state.log.entry(index) {
                Some(entry) => entry.item.clone(),
                None => break,
            };
            let outcome = self.state_machine.apply(&item);
            self.state.last_applied = index;

            if self.state.role == Role::Leader {
                if let Some(client_address) = self.client_callbacks.remove(&index) {
                    let result = match outcome {
                        Ok(value) => value,
                        Err(err) => Value::String(err.0),
                    };
                    self.network
                        .send_to_client(&client_address, Message::ClientResponse { result })
                        .await;
                }
            }
        }
    }
}
