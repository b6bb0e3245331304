//! Durable node state: role, term, vote, and the volatile replication-tracking maps.

use crate::error::StorageError;
use crate::log::Log;
use crate::NodeId;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

/// The role a node currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// A file-backed `u32` that is fsynced before every write returns.
///
/// Grounded in the on-disk layout of the source's `current_term` cell: four big-endian bytes,
/// nothing else. Missing on first run, in which case the value defaults to `0`.
struct TermCell {
    path: PathBuf,
}

impl TermCell {
    fn open(path: PathBuf) -> Result<Self, StorageError> {
        Ok(Self { path })
    }

    fn load(&self) -> Result<u32, StorageError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.len() == 4 => Ok(u32::from_be_bytes(bytes.try_into().unwrap())),
            Ok(_) => Err(StorageError::Corrupt {
                path: self.path.clone(),
                reason: "current_term file is not 4 bytes".into(),
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(source) => Err(StorageError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn store(&self, term: u32) -> Result<(), StorageError> {
        write_fsync(&self.path, &term.to_be_bytes())
    }
}

/// A file-backed, optional `NodeId` — the candidate this node voted for in the current term.
struct VoteCell {
    path: PathBuf,
}

impl VoteCell {
    fn open(path: PathBuf) -> Result<Self, StorageError> {
        Ok(Self { path })
    }

    fn load(&self) -> Result<Option<NodeId>, StorageError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => {
                let text = String::from_utf8(bytes).map_err(|_| StorageError::Corrupt {
                    path: self.path.clone(),
                    reason: "voted_for file is not valid UTF-8".into(),
                })?;
                Ok(Some(text))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn store(&self, voted_for: Option<&str>) -> Result<(), StorageError> {
        write_fsync(&self.path, voted_for.unwrap_or("").as_bytes())
    }
}

fn write_fsync(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    file.write_all(bytes).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    file.sync_all().map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Everything a node tracks about itself: durable (term, vote, log) and volatile (role,
/// commit progress, replication indices) state.
///
/// `RaftState` has no knowledge of messages or timers — it is the data a [`crate::node::RaftNode`]
/// mutates in response to them. Keeping the two separate mirrors the source's split between
/// `RaftState`/`RaftLog` and the handler functions that act on them.
pub struct RaftState {
    pub id: NodeId,
    pub role: Role,
    term_cell: TermCell,
    vote_cell: VoteCell,
    current_term: u32,
    voted_for: Option<NodeId>,
    pub log: Log,
    pub commit_index: i64,
    pub last_applied: i64,
    pub votes_received: HashSet<NodeId>,
    pub next_index: HashMap<NodeId, i64>,
    pub match_index: HashMap<NodeId, i64>,
    pub current_leader: Option<NodeId>,
}

impl RaftState {
    /// Opens (or initializes) durable state under `storage_dir` for node `id`.
    pub fn open(storage_dir: impl AsRef<Path>, id: NodeId) -> Result<Self, StorageError> {
        let dir = storage_dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| StorageError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let term_cell = TermCell::open(dir.join(format!("{}.term", id)))?;
        let vote_cell = VoteCell::open(dir.join(format!("{}.vote", id)))?;
        let current_term = term_cell.load()?;
        let voted_for = vote_cell.load()?;
        let log = Log::open(dir.join(format!("{}.log", id)))?;

        Ok(Self {
            id,
            role: Role::Follower,
            term_cell,
            vote_cell,
            current_term,
            voted_for,
            log,
            commit_index: -1,
            last_applied: -1,
            votes_received: HashSet::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            current_leader: None,
        })
    }

    pub fn current_term(&self) -> u32 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<&str> {
        self.voted_for.as_deref()
    }

    /// Persists `term` before updating the in-memory value (L3: durability precedes
    /// visibility).
    pub fn set_current_term(&mut self, term: u32) -> Result<(), StorageError> {
        self.term_cell.store(term)?;
        self.current_term = term;
        Ok(())
    }

    pub fn set_voted_for(&mut self, candidate: Option<NodeId>) -> Result<(), StorageError> {
        self.vote_cell.store(candidate.as_deref())?;
        self.voted_for = candidate;
        Ok(())
    }

    /// Transitions to `Candidate` for a new term: increments the term, votes for self, and
    /// resets the vote tally to just this node.
    pub fn become_candidate(&mut self) -> Result<(), StorageError> {
        self.role = Role::Candidate;
        self.set_current_term(self.current_term + 1)?;
        self.set_voted_for(Some(self.id.clone()))?;
        self.votes_received = HashSet::new();
        self.votes_received.insert(self.id.clone());
        self.current_leader = None;
        Ok(())
    }

    /// Transitions to `Leader`: initializes `next_index`/`match_index` for every member of
    /// `members` (peers and self alike) to `len(log)`/`-1` respectively.
    pub fn become_leader(&mut self, members: &[NodeId]) {
        self.role = Role::Leader;
        self.current_leader = Some(self.id.clone());
        let next = self.log.len();
        self.next_index = members.iter().cloned().map(|p| (p, next)).collect();
        self.match_index = members.iter().cloned().map(|p| (p, -1)).collect();
    }

    /// Steps down to `Follower`, clearing the vote and leader-only bookkeeping.
    pub fn demote(&mut self) -> Result<(), StorageError> {
        self.role = Role::Follower;
        self.set_voted_for(None)?;
        self.votes_received.clear();
        self.next_index.clear();
        self.match_index.clear();
        Ok(())
    }

    /// Whether `index` has been replicated to a quorum, computed as the median of every
    /// tracked `match_index` (self included): sort the values, take the middle one, and
    /// check it has reached at least `index`. A value at the median is guaranteed to sit on
    /// a majority of logs.
    pub fn has_consensus(&self, index: i64) -> bool {
        if self.match_index.is_empty() {
            return false;
        }
        let mut matched: Vec<i64> = self.match_index.values().copied().collect();
        matched.sort_unstable();
        let median = matched[(matched.len() - 1) / 2];
        median >= index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_and_vote_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut state = RaftState::open(dir.path(), "n0".to_string()).unwrap();
            state.set_current_term(7).unwrap();
            state.set_voted_for(Some("n1".to_string())).unwrap();
        }
        let state = RaftState::open(dir.path(), "n0".to_string()).unwrap();
        assert_eq!(state.current_term(), 7);
        assert_eq!(state.voted_for(), Some("n1"));
    }

    #[test]
    fn fresh_state_defaults_to_term_zero_no_vote() {
        let dir = tempfile::tempdir().unwrap();
        let state = RaftState::open(dir.path(), "n0".to_string()).unwrap();
        assert_eq!(state.current_term(), 0);
        assert_eq!(state.voted_for(), None);
        assert_eq!(state.role, Role::Follower);
    }

    #[test]
    fn become_candidate_votes_for_self_and_bumps_term() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = RaftState::open(dir.path(), "n0".to_string()).unwrap();
        state.become_candidate().unwrap();
        assert_eq!(state.current_term(), 1);
        assert_eq!(state.voted_for(), Some("n0"));
        assert!(state.votes_received.contains("n0"));
        assert_eq!(state.role, Role::Candidate);
    }

    #[test]
    fn has_consensus_is_the_median_of_match_index() {
        let dir = tempfile::tempdir().unwrap();
        let state = RaftState::open(dir.path(), "n0".to_string()).unwrap();

        // 5-node cluster: [1, 3, 2, 3, 3] sorts to [1, 2, 3, 3, 3]; median (index 2) is 3.
        let mut state = state;
        state.match_index = maplit::hashmap! {
            "n0".to_string() => 1,
            "n1".to_string() => 3,
            "n2".to_string() => 2,
            "n3".to_string() => 3,
            "n4".to_string() => 3,
        };
        assert!(state.has_consensus(3));
        assert!(!state.has_consensus(4));
    }

    #[test]
    fn has_consensus_on_empty_match_index_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let state = RaftState::open(dir.path(), "n0".to_string()).unwrap();
        assert!(!state.has_consensus(0));
    }

    #[test]
    fn demote_clears_leader_bookkeeping_and_vote() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = RaftState::open(dir.path(), "n0".to_string()).unwrap();
        state.set_voted_for(Some("n1".to_string())).unwrap();
        state.become_leader(&["n0".to_string(), "n1".to_string()]);
        state.demote().unwrap();
        assert_eq!(state.role, Role::Follower);
        assert!(state.next_index.is_empty());
        assert!(state.match_index.is_empty());
        assert_eq!(state.voted_for(), None);
    }
}
