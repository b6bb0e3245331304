//! A page-structured, actor-based Raft implementation: a durable log, a single-mailbox node
//! actor per cluster member, and the seams (`Network`, `StateMachine`) an embedder fills in to
//! get a replicated service.

pub mod error;
pub mod log;
pub mod message;
pub mod network;
pub mod node;
pub mod state;
pub mod state_machine;

/// A cluster member's identity. Opaque to this crate beyond equality and ordering — the
/// embedder decides what it means (a hostname, a UUID, a config-file label).
pub type NodeId = String;

pub use error::{MalformedMessage, StateMachineError, StorageError, TransportError};
pub use log::{Log, LogEntry};
pub use message::{ClientAddress, Message};
pub use network::Network;
pub use node::{NodeHandle, RaftNode, TimerConfig};
pub use state::{RaftState, Role};
pub use state_machine::StateMachine;
