use super::{item::Item, registry::BlockId};
use std::fmt;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Input => "input",
            Direction::Output => "output",
        })
    }
}

/// Stream port signature of one side of a block.
///
/// `item_sizes` gives the item size in bytes of each port. If there are more
/// ports than sizes, the last size applies to the remaining ports.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IoSignature {
    pub min_streams: usize,
    pub max_streams: Option<usize>,
    pub item_sizes: Vec<usize>,
}

impl IoSignature {
    /// Signature without any ports.
    pub fn empty() -> IoSignature {
        IoSignature {
            min_streams: 0,
            max_streams: Some(0),
            item_sizes: Vec::new(),
        }
    }

    /// `max_streams` set to `None` allows any number of ports.
    pub fn new(min_streams: usize, max_streams: Option<usize>, item_size: usize) -> IoSignature {
        IoSignature {
            min_streams,
            max_streams,
            item_sizes: vec![item_size],
        }
    }

    /// Exactly `n` ports carrying items of type `T`.
    pub fn exactly<T: Item>(n: usize) -> IoSignature {
        IoSignature::new(n, Some(n), size_of::<T>())
    }

    /// Between `min` and `max` ports carrying items of type `T`.
    pub fn range<T: Item>(min: usize, max: Option<usize>) -> IoSignature {
        IoSignature::new(min, max, size_of::<T>())
    }

    pub fn with_sizes(mut self, item_sizes: Vec<usize>) -> IoSignature {
        self.item_sizes = item_sizes;
        self
    }

    pub fn item_size(&self, port: usize) -> Option<usize> {
        if !self.allows(port) {
            return None;
        }
        self.item_sizes
            .get(port)
            .or_else(|| self.item_sizes.last())
            .copied()
    }

    /// Whether port index `port` exists in this signature.
    pub fn allows(&self, port: usize) -> bool {
        self.max_streams.is_none_or(|max| port < max)
    }

    pub fn max_label(&self) -> String {
        match self.max_streams {
            Some(max) => max.to_string(),
            None => "unbounded".to_string(),
        }
    }
}

/// Node referenced by an endpoint.
///
/// `External` is the enclosing hierarchical block's own port, and is only
/// meaningful inside a hierarchical block.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NodeRef {
    Block(BlockId),
    External,
}

/// One end of a connection in a `Flowgraph`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Endpoint {
    pub node: NodeRef,
    pub port: usize,
}

impl Endpoint {
    pub fn new(block: BlockId, port: usize) -> Endpoint {
        Endpoint {
            node: NodeRef::Block(block),
            port,
        }
    }

    pub fn external(port: usize) -> Endpoint {
        Endpoint {
            node: NodeRef::External,
            port,
        }
    }

    pub fn block(&self) -> Option<BlockId> {
        match self.node {
            NodeRef::Block(id) => Some(id),
            NodeRef::External => None,
        }
    }
}

impl From<(BlockId, usize)> for Endpoint {
    fn from((block, port): (BlockId, usize)) -> Endpoint {
        Endpoint::new(block, port)
    }
}

impl From<BlockId> for Endpoint {
    fn from(block: BlockId) -> Endpoint {
        Endpoint::new(block, 0)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            NodeRef::Block(id) => write!(f, "block {}:{}", id.as_u64(), self.port),
            NodeRef::External => write!(f, "external:{}", self.port),
        }
    }
}

/// Message port endpoint.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MessageEndpoint {
    pub node: NodeRef,
    pub port: String,
}

impl MessageEndpoint {
    pub fn new(block: BlockId, port: impl Into<String>) -> MessageEndpoint {
        MessageEndpoint {
            node: NodeRef::Block(block),
            port: port.into(),
        }
    }

    pub fn external(port: impl Into<String>) -> MessageEndpoint {
        MessageEndpoint {
            node: NodeRef::External,
            port: port.into(),
        }
    }
}

impl<S: Into<String>> From<(BlockId, S)> for MessageEndpoint {
    fn from((block, port): (BlockId, S)) -> MessageEndpoint {
        MessageEndpoint::new(block, port)
    }
}

impl fmt::Display for MessageEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            NodeRef::Block(id) => write!(f, "block {}:'{}'", id.as_u64(), self.port),
            NodeRef::External => write!(f, "external:'{}'", self.port),
        }
    }
}

/// Port of a leaf block in a flattened graph.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PortRef {
    pub block: BlockId,
    pub port: usize,
}

impl PortRef {
    pub fn new(block: BlockId, port: usize) -> PortRef {
        PortRef { block, port }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn last_size_repeats() {
        let sig = IoSignature::new(1, None, 4).with_sizes(vec![8, 2]);
        assert_eq!(sig.item_size(0), Some(8));
        assert_eq!(sig.item_size(1), Some(2));
        assert_eq!(sig.item_size(7), Some(2));
        assert_eq!(sig.max_label(), "unbounded");

        let sig = IoSignature::exactly::<f32>(2);
        assert_eq!(sig.item_size(1), Some(4));
        assert_eq!(sig.item_size(2), None);
        assert!(!IoSignature::empty().allows(0));
    }
}
