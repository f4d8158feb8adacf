use super::{port::Direction, registry::BlockId};
use std::fmt;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("cannot allocate a buffer of {capacity_bytes} bytes: {reason}")]
    Allocation {
        capacity_bytes: usize,
        reason: String,
    },
    #[error("overrun: {requested} items committed but only {available} were writable")]
    Overrun { requested: usize, available: usize },
    #[error("underrun: {requested} items consumed but only {available} were readable")]
    Underrun { requested: usize, available: usize },
    #[error("the runtime is already running")]
    AlreadyRunning,
    #[error("the runtime has no flowgraph")]
    NotInitialized,
    #[error("message queue is closed")]
    QueueClosed,
    #[error("unknown message port '{0}'")]
    UnknownMessagePort(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("could not spawn thread for block {name}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{} block(s) failed: {}", .0.len(), FailureList(.0))]
    BlockFailures(Vec<BlockFailure>),
}

impl Error {
    pub(crate) fn allocation(capacity_bytes: usize, reason: impl fmt::Display) -> Error {
        Error::Allocation {
            capacity_bytes,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("block {0:?} does not belong to this flowgraph")]
    UnknownBlock(BlockId),
    #[error("external ports can only be used inside a hierarchical block")]
    NotHierarchical,
    #[error("hierarchical block was created for a different registry")]
    ForeignRegistry,
    #[error("{direction} port {port} of {block} is out of range (at most {max} ports)")]
    PortOutOfRange {
        block: String,
        direction: Direction,
        port: usize,
        max: usize,
    },
    #[error("{direction} port {port} of {block} is already connected")]
    PortAlreadyConnected {
        block: String,
        direction: Direction,
        port: usize,
    },
    #[error("{direction} port {port} of {block} is not connected")]
    UnconnectedPort {
        block: String,
        direction: Direction,
        port: usize,
    },
    #[error("{block} has {connected} {direction} connections, but needs between {min} and {max}")]
    Arity {
        block: String,
        direction: Direction,
        connected: usize,
        min: usize,
        max: String,
    },
    #[error("item size mismatch: {source_block} port {source_port} has {source_size} bytes, {dest_block} port {dest_port} has {dest_size} bytes")]
    ItemSizeMismatch {
        source_block: String,
        source_port: usize,
        source_size: usize,
        dest_block: String,
        dest_port: usize,
        dest_size: usize,
    },
    #[error("{direction} port {port} of hierarchical block {block} has no internal connection")]
    UnresolvedExternalPort {
        block: String,
        direction: Direction,
        port: usize,
    },
    #[error("an external input cannot be wired directly to an external output")]
    ExternalPassthrough,
    #[error("connection {0} does not exist")]
    EdgeNotFound(String),
    #[error("connection {0} already exists")]
    DuplicateEdge(String),
    #[error("{block} has no message {direction} port '{port}'")]
    UnknownMessagePort {
        block: String,
        direction: Direction,
        port: String,
    },
    #[error("stream connections form a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Failure of a single block during a run.
#[derive(Debug)]
pub struct BlockFailure {
    pub block: BlockId,
    pub name: String,
    pub error: anyhow::Error,
}

impl fmt::Display for BlockFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.name, self.error)
    }
}

struct FailureList<'a>(&'a [BlockFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, failure) in self.0.iter().enumerate() {
            if n != 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}
