use super::{
    block::{Block, BlockInfo, SharedBlock},
    error::{Error, Result, TopologyError},
    flatten::{self, FlatGraph},
    port::{Direction, Endpoint, IoSignature, MessageEndpoint, NodeRef},
    registry::{BlockId, BlockRegistry},
};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex},
};

/// Stream connection between two endpoints.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Edge {
    pub src: Endpoint,
    pub dst: Endpoint,
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// Message connection between two endpoints.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MessageEdge {
    pub src: MessageEndpoint,
    pub dst: MessageEndpoint,
}

impl fmt::Display for MessageEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// User-facing flowgraph.
///
/// Blocks are owned by the flowgraph. Hierarchical blocks are built with
/// [`Flowgraph::new_hier_block`], filled with their own blocks and
/// connections, and then added as a single node with
/// [`Flowgraph::add_hier_block`].
#[derive(Debug)]
pub struct Flowgraph {
    graph: Graph,
}

/// Block made of other blocks.
///
/// Inside a hierarchical block, [`Endpoint::external`] refers to the ports of
/// the hierarchical block itself: an external endpoint used as a source is
/// one of its inputs, and used as a destination is one of its outputs.
#[derive(Debug)]
pub struct HierBlock {
    id: BlockId,
    ports: ExternalPorts,
    graph: Graph,
}

#[derive(Debug, Clone)]
pub(crate) struct ExternalPorts {
    pub(crate) name: String,
    pub(crate) input_signature: IoSignature,
    pub(crate) output_signature: IoSignature,
    pub(crate) message_inputs: Vec<String>,
    pub(crate) message_outputs: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct Graph {
    pub(crate) registry: Arc<BlockRegistry>,
    pub(crate) nodes: BTreeMap<BlockId, Node>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) msg_edges: Vec<MessageEdge>,
}

#[derive(Debug)]
pub(crate) enum Node {
    Leaf(Leaf),
    Hier(HierBlock),
}

pub(crate) struct Leaf {
    pub(crate) name: String,
    pub(crate) info: BlockInfo,
    pub(crate) block: SharedBlock,
}

impl fmt::Debug for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leaf")
            .field("name", &self.name)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Flowgraph {
    pub fn new() -> Flowgraph {
        Flowgraph::with_registry(Arc::new(BlockRegistry::new()))
    }

    /// Flowgraph that takes ids and names from an existing registry.
    pub fn with_registry(registry: Arc<BlockRegistry>) -> Flowgraph {
        Flowgraph {
            graph: Graph::new(registry),
        }
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.graph.registry
    }

    pub fn add_block<B: Block>(&mut self, block: B) -> BlockId {
        self.graph.add_block(block)
    }

    /// Creates an empty hierarchical block that can later be added to this
    /// flowgraph.
    pub fn new_hier_block(
        &self,
        name: &str,
        input_signature: IoSignature,
        output_signature: IoSignature,
    ) -> HierBlock {
        HierBlock::new(
            Arc::clone(&self.graph.registry),
            name,
            input_signature,
            output_signature,
        )
    }

    pub fn add_hier_block(&mut self, hier: HierBlock) -> Result<BlockId> {
        self.graph.add_hier_block(hier)
    }

    pub fn connect(&mut self, src: impl Into<Endpoint>, dst: impl Into<Endpoint>) -> Result<()> {
        self.graph.connect(src.into(), dst.into(), None)
    }

    pub fn disconnect(
        &mut self,
        src: impl Into<Endpoint>,
        dst: impl Into<Endpoint>,
    ) -> Result<()> {
        self.graph.disconnect(src.into(), dst.into())
    }

    /// Removes every stream and message connection.
    pub fn disconnect_all(&mut self) {
        self.graph.edges.clear();
        self.graph.msg_edges.clear();
    }

    pub fn msg_connect(
        &mut self,
        src: impl Into<MessageEndpoint>,
        dst: impl Into<MessageEndpoint>,
    ) -> Result<()> {
        self.graph.msg_connect(src.into(), dst.into(), None)
    }

    pub fn msg_disconnect(
        &mut self,
        src: impl Into<MessageEndpoint>,
        dst: impl Into<MessageEndpoint>,
    ) -> Result<()> {
        self.graph.msg_disconnect(src.into(), dst.into())
    }

    /// Removes a block and all of its connections.
    pub fn remove_block(&mut self, id: BlockId) -> Result<()> {
        self.graph.remove_block(id)
    }

    pub fn block_info(&self, id: BlockId) -> Option<&BlockInfo> {
        self.graph.block_info(id)
    }

    /// Gives access to the parameters of a block, such as its history or
    /// output multiple, so that they can be tuned between runs.
    pub fn block_info_mut(&mut self, id: BlockId) -> Option<&mut BlockInfo> {
        self.graph.block_info_mut(id)
    }

    pub fn block_name(&self, id: BlockId) -> Option<&str> {
        self.graph.block_name(id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.graph.nodes.keys().copied()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.graph.edges
    }

    pub fn msg_edges(&self) -> &[MessageEdge] {
        &self.graph.msg_edges
    }

    /// Resolves hierarchical blocks and checks the topology.
    pub fn flatten(&self) -> Result<FlatGraph> {
        flatten::flatten(&self.graph)
    }
}

impl Default for Flowgraph {
    fn default() -> Flowgraph {
        Flowgraph::new()
    }
}

impl HierBlock {
    fn new(
        registry: Arc<BlockRegistry>,
        name: &str,
        input_signature: IoSignature,
        output_signature: IoSignature,
    ) -> HierBlock {
        let (id, name) = registry.register(name);
        HierBlock {
            id,
            ports: ExternalPorts {
                name,
                input_signature,
                output_signature,
                message_inputs: Vec::new(),
                message_outputs: Vec::new(),
            },
            graph: Graph::new(registry),
        }
    }

    pub fn with_message_ports<I, O>(mut self, inputs: I, outputs: O) -> HierBlock
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        self.ports.message_inputs = inputs.into_iter().map(Into::into).collect();
        self.ports.message_outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.ports.name
    }

    pub fn add_block<B: Block>(&mut self, block: B) -> BlockId {
        self.graph.add_block(block)
    }

    /// Creates an empty hierarchical block that can be nested in this one.
    pub fn new_hier_block(
        &self,
        name: &str,
        input_signature: IoSignature,
        output_signature: IoSignature,
    ) -> HierBlock {
        HierBlock::new(
            Arc::clone(&self.graph.registry),
            name,
            input_signature,
            output_signature,
        )
    }

    pub fn add_hier_block(&mut self, hier: HierBlock) -> Result<BlockId> {
        self.graph.add_hier_block(hier)
    }

    pub fn connect(&mut self, src: impl Into<Endpoint>, dst: impl Into<Endpoint>) -> Result<()> {
        self.graph.connect(src.into(), dst.into(), Some(&self.ports))
    }

    pub fn disconnect(
        &mut self,
        src: impl Into<Endpoint>,
        dst: impl Into<Endpoint>,
    ) -> Result<()> {
        self.graph.disconnect(src.into(), dst.into())
    }

    pub fn msg_connect(
        &mut self,
        src: impl Into<MessageEndpoint>,
        dst: impl Into<MessageEndpoint>,
    ) -> Result<()> {
        self.graph
            .msg_connect(src.into(), dst.into(), Some(&self.ports))
    }

    pub fn remove_block(&mut self, id: BlockId) -> Result<()> {
        self.graph.remove_block(id)
    }

    pub fn block_info(&self, id: BlockId) -> Option<&BlockInfo> {
        self.graph.block_info(id)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.graph.edges
    }

    pub(crate) fn ports(&self) -> &ExternalPorts {
        &self.ports
    }

    pub(crate) fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl Drop for HierBlock {
    fn drop(&mut self) {
        self.graph.registry.unregister(self.id);
    }
}

impl Graph {
    fn new(registry: Arc<BlockRegistry>) -> Graph {
        Graph {
            registry,
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            msg_edges: Vec::new(),
        }
    }

    fn add_block<B: Block>(&mut self, block: B) -> BlockId {
        let info = block.info();
        let (id, name) = self.registry.register(&info.name);
        tracing::debug!(block = %name, id = id.as_u64(), "added block");
        let block: SharedBlock = Arc::new(Mutex::new(Box::new(block)));
        self.nodes
            .insert(id, Node::Leaf(Leaf { name, info, block }));
        id
    }

    fn add_hier_block(&mut self, hier: HierBlock) -> Result<BlockId> {
        if !Arc::ptr_eq(&self.registry, &hier.graph.registry) {
            return Err(TopologyError::ForeignRegistry.into());
        }
        let id = hier.id;
        tracing::debug!(block = %hier.ports.name, id = id.as_u64(), "added hierarchical block");
        self.nodes.insert(id, Node::Hier(hier));
        Ok(id)
    }

    /// Signature and display name of the port that `node` exposes in
    /// `direction` as seen from this graph.
    fn stream_side<'a>(
        &'a self,
        node: NodeRef,
        direction: Direction,
        external: Option<&'a ExternalPorts>,
    ) -> Result<(&'a str, &'a IoSignature)> {
        match node {
            NodeRef::Block(id) => {
                let node = self
                    .nodes
                    .get(&id)
                    .ok_or(TopologyError::UnknownBlock(id))?;
                let (name, input, output) = match node {
                    Node::Leaf(leaf) => (
                        leaf.name.as_str(),
                        &leaf.info.input_signature,
                        &leaf.info.output_signature,
                    ),
                    Node::Hier(hier) => (
                        hier.ports.name.as_str(),
                        &hier.ports.input_signature,
                        &hier.ports.output_signature,
                    ),
                };
                Ok(match direction {
                    Direction::Input => (name, input),
                    Direction::Output => (name, output),
                })
            }
            NodeRef::External => {
                let ports = external.ok_or(TopologyError::NotHierarchical)?;
                // the source side of an external endpoint is an input of the
                // enclosing block, and the destination side one of its outputs
                Ok(match direction {
                    Direction::Output => (ports.name.as_str(), &ports.input_signature),
                    Direction::Input => (ports.name.as_str(), &ports.output_signature),
                })
            }
        }
    }

    fn message_side<'a>(
        &'a self,
        node: NodeRef,
        direction: Direction,
        external: Option<&'a ExternalPorts>,
    ) -> Result<(&'a str, &'a [String])> {
        match node {
            NodeRef::Block(id) => {
                let node = self
                    .nodes
                    .get(&id)
                    .ok_or(TopologyError::UnknownBlock(id))?;
                let (name, inputs, outputs) = match node {
                    Node::Leaf(leaf) => (
                        leaf.name.as_str(),
                        &leaf.info.message_inputs,
                        &leaf.info.message_outputs,
                    ),
                    Node::Hier(hier) => (
                        hier.ports.name.as_str(),
                        &hier.ports.message_inputs,
                        &hier.ports.message_outputs,
                    ),
                };
                Ok(match direction {
                    Direction::Input => (name, inputs.as_slice()),
                    Direction::Output => (name, outputs.as_slice()),
                })
            }
            NodeRef::External => {
                let ports = external.ok_or(TopologyError::NotHierarchical)?;
                Ok(match direction {
                    Direction::Output => (ports.name.as_str(), ports.message_inputs.as_slice()),
                    Direction::Input => (ports.name.as_str(), ports.message_outputs.as_slice()),
                })
            }
        }
    }

    fn connect(
        &mut self,
        src: Endpoint,
        dst: Endpoint,
        external: Option<&ExternalPorts>,
    ) -> Result<()> {
        if src.node == NodeRef::External && dst.node == NodeRef::External {
            return Err(TopologyError::ExternalPassthrough.into());
        }
        let (src_name, src_sig) = self.stream_side(src.node, Direction::Output, external)?;
        let (dst_name, dst_sig) = self.stream_side(dst.node, Direction::Input, external)?;
        let src_size = src_sig
            .item_size(src.port)
            .ok_or_else(|| out_of_range(src_name, Direction::Output, src.port, src_sig))?;
        let dst_size = dst_sig
            .item_size(dst.port)
            .ok_or_else(|| out_of_range(dst_name, Direction::Input, dst.port, dst_sig))?;
        if src_size != dst_size {
            return Err(TopologyError::ItemSizeMismatch {
                source_block: src_name.to_string(),
                source_port: src.port,
                source_size: src_size,
                dest_block: dst_name.to_string(),
                dest_port: dst.port,
                dest_size: dst_size,
            }
            .into());
        }
        let edge = Edge { src, dst };
        if self.edges.contains(&edge) {
            return Err(TopologyError::DuplicateEdge(edge.to_string()).into());
        }
        if self.edges.iter().any(|e| e.dst == dst) {
            return Err(TopologyError::PortAlreadyConnected {
                block: dst_name.to_string(),
                direction: Direction::Input,
                port: dst.port,
            }
            .into());
        }
        tracing::trace!(%edge, "connected");
        self.edges.push(edge);
        Ok(())
    }

    fn disconnect(&mut self, src: Endpoint, dst: Endpoint) -> Result<()> {
        let edge = Edge { src, dst };
        let len = self.edges.len();
        self.edges.retain(|e| *e != edge);
        if self.edges.len() == len {
            return Err(TopologyError::EdgeNotFound(edge.to_string()).into());
        }
        Ok(())
    }

    fn msg_connect(
        &mut self,
        src: MessageEndpoint,
        dst: MessageEndpoint,
        external: Option<&ExternalPorts>,
    ) -> Result<()> {
        if src.node == NodeRef::External && dst.node == NodeRef::External {
            return Err(TopologyError::ExternalPassthrough.into());
        }
        for (endpoint, direction) in [(&src, Direction::Output), (&dst, Direction::Input)] {
            let (name, ports) = self.message_side(endpoint.node, direction, external)?;
            if !ports.contains(&endpoint.port) {
                return Err(TopologyError::UnknownMessagePort {
                    block: name.to_string(),
                    direction,
                    port: endpoint.port.clone(),
                }
                .into());
            }
        }
        let edge = MessageEdge { src, dst };
        if self.msg_edges.contains(&edge) {
            return Err(TopologyError::DuplicateEdge(edge.to_string()).into());
        }
        self.msg_edges.push(edge);
        Ok(())
    }

    fn msg_disconnect(&mut self, src: MessageEndpoint, dst: MessageEndpoint) -> Result<()> {
        let edge = MessageEdge { src, dst };
        let len = self.msg_edges.len();
        self.msg_edges.retain(|e| *e != edge);
        if self.msg_edges.len() == len {
            return Err(TopologyError::EdgeNotFound(edge.to_string()).into());
        }
        Ok(())
    }

    fn remove_block(&mut self, id: BlockId) -> Result<()> {
        let node = self
            .nodes
            .remove(&id)
            .ok_or(TopologyError::UnknownBlock(id))?;
        let node_ref = NodeRef::Block(id);
        self.edges
            .retain(|e| e.src.node != node_ref && e.dst.node != node_ref);
        self.msg_edges
            .retain(|e| e.src.node != node_ref && e.dst.node != node_ref);
        if let Node::Leaf(leaf) = node {
            self.registry.unregister(id);
            tracing::debug!(block = %leaf.name, "removed block");
        }
        Ok(())
    }

    fn block_info(&self, id: BlockId) -> Option<&BlockInfo> {
        match self.nodes.get(&id)? {
            Node::Leaf(leaf) => Some(&leaf.info),
            Node::Hier(_) => None,
        }
    }

    fn block_info_mut(&mut self, id: BlockId) -> Option<&mut BlockInfo> {
        match self.nodes.get_mut(&id)? {
            Node::Leaf(leaf) => Some(&mut leaf.info),
            Node::Hier(_) => None,
        }
    }

    fn block_name(&self, id: BlockId) -> Option<&str> {
        match self.nodes.get(&id)? {
            Node::Leaf(leaf) => Some(&leaf.name),
            Node::Hier(hier) => Some(&hier.ports.name),
        }
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        for (id, node) in &self.nodes {
            if let Node::Leaf(_) = node {
                self.registry.unregister(*id);
            }
        }
    }
}

fn out_of_range(block: &str, direction: Direction, port: usize, sig: &IoSignature) -> Error {
    TopologyError::PortOutOfRange {
        block: block.to_string(),
        direction,
        port,
        max: sig.max_streams.unwrap_or(usize::MAX),
    }
    .into()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        blocks::basic::{Copy, NullSink, NullSource, VectorSource},
        runtime::{
            message::MessageOutputs,
            pmt::Pmt,
            work::{WorkIo, WorkStatus},
        },
    };

    struct Probe;

    impl Block for Probe {
        fn info(&self) -> BlockInfo {
            BlockInfo::new("probe", IoSignature::empty(), IoSignature::empty())
                .with_message_inputs(["in"])
                .with_message_outputs(["out"])
        }

        fn work(&mut self, _: &mut WorkIo<'_>) -> anyhow::Result<WorkStatus> {
            Ok(WorkStatus::DoneWithoutOutput)
        }

        fn handle_message(&mut self, _: &str, _: Pmt, _: &MessageOutputs) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn topology(result: Result<()>) -> TopologyError {
        match result {
            Err(Error::Topology(err)) => err,
            other => panic!("expected a topology error, got {other:?}"),
        }
    }

    #[test]
    fn connect_checks() {
        let mut fg = Flowgraph::new();
        let src = fg.add_block(NullSource::<f32>::new());
        let copy = fg.add_block(Copy::<f32>::new());
        let narrow = fg.add_block(NullSink::<u16>::new());

        assert!(matches!(
            topology(fg.connect((src, 1), copy)),
            TopologyError::PortOutOfRange { port: 1, .. }
        ));
        assert!(matches!(
            topology(fg.connect(src, narrow)),
            TopologyError::ItemSizeMismatch {
                source_size: 4,
                dest_size: 2,
                ..
            }
        ));
        fg.connect(src, copy).unwrap();
        assert!(matches!(
            topology(fg.connect(src, copy)),
            TopologyError::DuplicateEdge(_)
        ));
        let other = fg.add_block(NullSource::<f32>::new());
        assert!(matches!(
            topology(fg.connect(other, copy)),
            TopologyError::PortAlreadyConnected { .. }
        ));
        assert!(matches!(
            topology(fg.connect(Endpoint::external(0), copy)),
            TopologyError::NotHierarchical
        ));
        assert_eq!(fg.edges().len(), 1);
    }

    #[test]
    fn disconnect_and_remove() {
        let mut fg = Flowgraph::new();
        let src = fg.add_block(VectorSource::new(vec![1u8, 2, 3]));
        let sink = fg.add_block(NullSink::<u8>::new());
        fg.connect(src, sink).unwrap();
        fg.disconnect(src, sink).unwrap();
        assert!(matches!(
            topology(fg.disconnect(src, sink)),
            TopologyError::EdgeNotFound(_)
        ));
        fg.connect(src, sink).unwrap();
        assert_eq!(fg.registry().len(), 2);
        fg.remove_block(sink).unwrap();
        assert!(fg.edges().is_empty());
        assert_eq!(fg.registry().len(), 1);
        assert!(fg.block_name(sink).is_none());
    }

    #[test]
    fn message_ports() {
        let mut fg = Flowgraph::new();
        let a = fg.add_block(Probe);
        let b = fg.add_block(Probe);
        fg.msg_connect((a, "out"), (b, "in")).unwrap();
        // message edges may form cycles
        fg.msg_connect((b, "out"), (a, "in")).unwrap();
        assert!(matches!(
            topology(fg.msg_connect((a, "in"), (b, "in"))),
            TopologyError::UnknownMessagePort {
                direction: Direction::Output,
                ..
            }
        ));
        fg.msg_disconnect((b, "out"), (a, "in")).unwrap();
        assert_eq!(fg.msg_edges().len(), 1);
    }

    #[test]
    fn hier_external_rules() {
        let mut fg = Flowgraph::new();
        let mut hier = fg.new_hier_block(
            "chain",
            IoSignature::exactly::<f32>(1),
            IoSignature::exactly::<f32>(1),
        );
        assert!(matches!(
            topology(hier.connect(Endpoint::external(0), Endpoint::external(0))),
            TopologyError::ExternalPassthrough
        ));
        let copy = hier.add_block(Copy::<f32>::new());
        hier.connect(Endpoint::external(0), copy).unwrap();
        hier.connect(copy, Endpoint::external(0)).unwrap();
        let second = hier.add_block(Copy::<f32>::new());
        // an external output has a single driver
        assert!(matches!(
            topology(hier.connect(second, Endpoint::external(0))),
            TopologyError::PortAlreadyConnected { .. }
        ));
        hier.remove_block(second).unwrap();
        let id = fg.add_hier_block(hier).unwrap();
        assert_eq!(fg.block_name(id), Some("chain_0"));

        let mut other = Flowgraph::new();
        let foreign = other.new_hier_block("x", IoSignature::empty(), IoSignature::empty());
        assert!(matches!(
            fg.add_hier_block(foreign),
            Err(Error::Topology(TopologyError::ForeignRegistry))
        ));
    }

    #[test]
    fn drop_releases_names() {
        let registry = Arc::new(BlockRegistry::new());
        {
            let mut fg = Flowgraph::with_registry(Arc::clone(&registry));
            fg.add_block(NullSource::<f32>::new());
            let mut hier = fg.new_hier_block("h", IoSignature::empty(), IoSignature::empty());
            hier.add_block(NullSink::<f32>::new());
            fg.add_hier_block(hier).unwrap();
            assert_eq!(registry.len(), 3);
        }
        assert!(registry.is_empty());
    }
}
