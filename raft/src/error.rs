//! The error taxonomy shared by the storage, reconciliation, and node layers.

use thiserror::Error;

/// Errors that can arise from the paged log store or the durable term/vote cells.
///
/// A `StorageError` on the critical path is fatal to the owning node: its task logs the
/// failure at `error` level and returns, never propagating the panic or the error to other
/// nodes or to the process as a whole.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O failure at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("log entry too large: {size} bytes exceeds the {capacity} byte page budget")]
    EntryTooLarge { size: usize, capacity: usize },

    #[error("log file {path} is corrupt: {reason}")]
    Corrupt {
        path: std::path::PathBuf,
        reason: String,
    },
}

/// Errors raised while decoding a frame received from the transport.
///
/// An unrecognized `msg_type` surfaces here too: deserializing an internally-tagged enum with
/// an unknown discriminator is itself a `serde_json::Error`, not a separate failure mode.
#[derive(Debug, Error)]
#[error("invalid JSON: {0}")]
pub struct MalformedMessage(#[from] pub serde_json::Error);

/// Errors raised while sending a frame to a peer or client address.
#[derive(Debug, Error)]
#[error("transport error sending to {target}: {source}")]
pub struct TransportError {
    pub target: String,
    #[source]
    pub source: std::io::Error,
}

/// The user state machine raised while applying a committed entry.
///
/// Caught by the apply loop; its `Display` text becomes the client-visible `result` and
/// application continues with the next committed index.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StateMachineError(pub String);

impl StateMachineError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
