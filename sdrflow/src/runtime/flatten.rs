use super::{
    block::{BlockInfo, SharedBlock},
    error::{Error, Result, TopologyError},
    flowgraph::{Graph, HierBlock, Leaf, Node},
    port::{Direction, Endpoint, MessageEndpoint, NodeRef, PortRef},
    registry::BlockId,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

/// Leaf block of a flattened graph.
pub struct FlatBlock {
    pub id: BlockId,
    pub name: String,
    pub info: BlockInfo,
    pub(crate) block: SharedBlock,
}

impl fmt::Debug for FlatBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatBlock")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FlatEdge {
    pub src: PortRef,
    pub dst: PortRef,
    pub item_size: usize,
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FlatMessageEdge {
    pub src: BlockId,
    pub src_port: String,
    pub dst: BlockId,
    pub dst_port: String,
}

/// Flowgraph with hierarchical blocks resolved.
///
/// Blocks are stored in topological order of the stream connections, which
/// is the order in which they are started.
#[derive(Debug)]
pub struct FlatGraph {
    blocks: Vec<FlatBlock>,
    edges: Vec<FlatEdge>,
    msg_edges: Vec<FlatMessageEdge>,
}

impl FlatGraph {
    pub fn blocks(&self) -> &[FlatBlock] {
        &self.blocks
    }

    pub fn edges(&self) -> &[FlatEdge] {
        &self.edges
    }

    pub fn msg_edges(&self) -> &[FlatMessageEdge] {
        &self.msg_edges
    }

    pub fn block(&self, id: BlockId) -> Option<&FlatBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn order(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().map(|b| b.id)
    }

    /// Edges leaving the output port `src`.
    pub fn readers_of(&self, src: PortRef) -> impl Iterator<Item = &FlatEdge> + '_ {
        self.edges.iter().filter(move |e| e.src == src)
    }

    /// Distinct output ports that have at least one reader, in order.
    pub fn sources(&self) -> Vec<PortRef> {
        self.edges
            .iter()
            .map(|e| e.src)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

struct Collector<'a> {
    leaves: BTreeMap<BlockId, &'a Leaf>,
    edges: BTreeSet<(PortRef, PortRef)>,
    msg_edges: BTreeSet<FlatMessageEdge>,
}

pub(crate) fn flatten(graph: &Graph) -> Result<FlatGraph> {
    let mut collector = Collector {
        leaves: BTreeMap::new(),
        edges: BTreeSet::new(),
        msg_edges: BTreeSet::new(),
    };
    collector.visit(graph)?;
    let Collector {
        leaves,
        edges,
        msg_edges,
    } = collector;

    let edges = check_stream_ports(&leaves, &edges)?;
    check_message_ports(&leaves, &msg_edges)?;
    let order = topological_order(&leaves, &edges)?;

    let blocks = order
        .into_iter()
        .map(|id| {
            let leaf = leaves[&id];
            FlatBlock {
                id,
                name: leaf.name.clone(),
                info: leaf.info.clone(),
                block: SharedBlock::clone(&leaf.block),
            }
        })
        .collect::<Vec<_>>();
    tracing::debug!(
        blocks = blocks.len(),
        edges = edges.len(),
        msg_edges = msg_edges.len(),
        "flattened flowgraph"
    );
    Ok(FlatGraph {
        blocks,
        edges,
        msg_edges: msg_edges.into_iter().collect(),
    })
}

impl<'a> Collector<'a> {
    fn visit(&mut self, graph: &'a Graph) -> Result<()> {
        for (&id, node) in &graph.nodes {
            match node {
                Node::Leaf(leaf) => {
                    self.leaves.insert(id, leaf);
                }
                Node::Hier(hier) => self.visit(hier.graph())?,
            }
        }
        // Edges from an external input are resolved by the enclosing graph,
        // and edges to an external output by the graph that reads it.
        for edge in &graph.edges {
            if edge.src.node == NodeRef::External || edge.dst.node == NodeRef::External {
                continue;
            }
            let src = resolve_source(graph, edge.src)?;
            for dst in resolve_destinations(graph, edge.dst)? {
                self.edges.insert((src, dst));
            }
        }
        for edge in &graph.msg_edges {
            if edge.src.node == NodeRef::External || edge.dst.node == NodeRef::External {
                continue;
            }
            let srcs = resolve_message_sources(graph, &edge.src);
            let dsts = resolve_message_destinations(graph, &edge.dst);
            for (src, src_port) in &srcs {
                for (dst, dst_port) in &dsts {
                    self.msg_edges.insert(FlatMessageEdge {
                        src: *src,
                        src_port: src_port.clone(),
                        dst: *dst,
                        dst_port: dst_port.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn hier_of(graph: &Graph, id: BlockId) -> Option<&HierBlock> {
    match graph.nodes.get(&id)? {
        Node::Hier(hier) => Some(hier),
        Node::Leaf(_) => None,
    }
}

/// Leaf output port that drives `src`, looking inside hierarchical blocks.
fn resolve_source(graph: &Graph, src: Endpoint) -> Result<PortRef> {
    let NodeRef::Block(id) = src.node else {
        return Err(TopologyError::ExternalPassthrough.into());
    };
    let Some(hier) = hier_of(graph, id) else {
        return Ok(PortRef::new(id, src.port));
    };
    let inner = hier
        .graph()
        .edges
        .iter()
        .find(|e| e.dst == Endpoint::external(src.port))
        .ok_or_else(|| TopologyError::UnresolvedExternalPort {
            block: hier.name().to_string(),
            direction: Direction::Output,
            port: src.port,
        })?;
    resolve_source(hier.graph(), inner.src)
}

/// Leaf input ports reached from `dst`, looking inside hierarchical blocks.
fn resolve_destinations(graph: &Graph, dst: Endpoint) -> Result<Vec<PortRef>> {
    let NodeRef::Block(id) = dst.node else {
        return Err(TopologyError::ExternalPassthrough.into());
    };
    let Some(hier) = hier_of(graph, id) else {
        return Ok(vec![PortRef::new(id, dst.port)]);
    };
    let mut resolved = Vec::new();
    for inner in hier
        .graph()
        .edges
        .iter()
        .filter(|e| e.src == Endpoint::external(dst.port))
    {
        resolved.extend(resolve_destinations(hier.graph(), inner.dst)?);
    }
    if resolved.is_empty() {
        return Err(TopologyError::UnresolvedExternalPort {
            block: hier.name().to_string(),
            direction: Direction::Input,
            port: dst.port,
        }
        .into());
    }
    Ok(resolved)
}

fn resolve_message_sources(graph: &Graph, src: &MessageEndpoint) -> Vec<(BlockId, String)> {
    let NodeRef::Block(id) = src.node else {
        return Vec::new();
    };
    let Some(hier) = hier_of(graph, id) else {
        return vec![(id, src.port.clone())];
    };
    let resolved = hier
        .graph()
        .msg_edges
        .iter()
        .filter(|e| e.dst == MessageEndpoint::external(src.port.as_str()))
        .flat_map(|e| resolve_message_sources(hier.graph(), &e.src))
        .collect::<Vec<_>>();
    if resolved.is_empty() {
        tracing::debug!(block = hier.name(), port = %src.port, "message output not driven");
    }
    resolved
}

fn resolve_message_destinations(graph: &Graph, dst: &MessageEndpoint) -> Vec<(BlockId, String)> {
    let NodeRef::Block(id) = dst.node else {
        return Vec::new();
    };
    let Some(hier) = hier_of(graph, id) else {
        return vec![(id, dst.port.clone())];
    };
    let resolved = hier
        .graph()
        .msg_edges
        .iter()
        .filter(|e| e.src == MessageEndpoint::external(dst.port.as_str()))
        .flat_map(|e| resolve_message_destinations(hier.graph(), &e.dst))
        .collect::<Vec<_>>();
    if resolved.is_empty() {
        tracing::debug!(block = hier.name(), port = %dst.port, "message input not used");
    }
    resolved
}

type Leaves<'a> = BTreeMap<BlockId, &'a Leaf>;

/// Checks the stream ports of every leaf and annotates the edges with their
/// item size.
fn check_stream_ports(
    leaves: &Leaves<'_>,
    edges: &BTreeSet<(PortRef, PortRef)>,
) -> Result<Vec<FlatEdge>> {
    let mut inputs: BTreeMap<BlockId, BTreeSet<usize>> = BTreeMap::new();
    let mut outputs: BTreeMap<BlockId, BTreeSet<usize>> = BTreeMap::new();
    let mut drivers: BTreeMap<PortRef, PortRef> = BTreeMap::new();
    let mut flat = Vec::with_capacity(edges.len());

    for &(src, dst) in edges {
        let src_leaf = leaves[&src.block];
        let dst_leaf = leaves[&dst.block];
        if drivers.insert(dst, src).is_some() {
            return Err(TopologyError::PortAlreadyConnected {
                block: dst_leaf.name.clone(),
                direction: Direction::Input,
                port: dst.port,
            }
            .into());
        }
        let out_of_range = |leaf: &Leaf, direction: Direction, port: usize| -> Error {
            let sig = match direction {
                Direction::Input => &leaf.info.input_signature,
                Direction::Output => &leaf.info.output_signature,
            };
            TopologyError::PortOutOfRange {
                block: leaf.name.clone(),
                direction,
                port,
                max: sig.max_streams.unwrap_or(usize::MAX),
            }
            .into()
        };
        let src_size = src_leaf
            .info
            .output_signature
            .item_size(src.port)
            .ok_or_else(|| out_of_range(src_leaf, Direction::Output, src.port))?;
        let dst_size = dst_leaf
            .info
            .input_signature
            .item_size(dst.port)
            .ok_or_else(|| out_of_range(dst_leaf, Direction::Input, dst.port))?;
        if src_size != dst_size {
            return Err(TopologyError::ItemSizeMismatch {
                source_block: src_leaf.name.clone(),
                source_port: src.port,
                source_size: src_size,
                dest_block: dst_leaf.name.clone(),
                dest_port: dst.port,
                dest_size: dst_size,
            }
            .into());
        }
        inputs.entry(dst.block).or_default().insert(dst.port);
        outputs.entry(src.block).or_default().insert(src.port);
        flat.push(FlatEdge {
            src,
            dst,
            item_size: src_size,
        });
    }

    let empty = BTreeSet::new();
    for (&id, leaf) in leaves {
        for (direction, ports, sig) in [
            (
                Direction::Input,
                inputs.get(&id).unwrap_or(&empty),
                &leaf.info.input_signature,
            ),
            (
                Direction::Output,
                outputs.get(&id).unwrap_or(&empty),
                &leaf.info.output_signature,
            ),
        ] {
            // connected ports must be 0..n
            if let Some(missing) = (0..ports.len()).find(|port| !ports.contains(port)) {
                return Err(TopologyError::UnconnectedPort {
                    block: leaf.name.clone(),
                    direction,
                    port: missing,
                }
                .into());
            }
            let connected = ports.len();
            if connected < sig.min_streams || sig.max_streams.is_some_and(|max| connected > max) {
                return Err(TopologyError::Arity {
                    block: leaf.name.clone(),
                    direction,
                    connected,
                    min: sig.min_streams,
                    max: sig.max_label(),
                }
                .into());
            }
        }
    }
    Ok(flat)
}

fn check_message_ports(leaves: &Leaves<'_>, msg_edges: &BTreeSet<FlatMessageEdge>) -> Result<()> {
    for edge in msg_edges {
        let src = leaves[&edge.src];
        if !src.info.message_outputs.contains(&edge.src_port) {
            return Err(TopologyError::UnknownMessagePort {
                block: src.name.clone(),
                direction: Direction::Output,
                port: edge.src_port.clone(),
            }
            .into());
        }
        let dst = leaves[&edge.dst];
        if !dst.info.message_inputs.contains(&edge.dst_port) {
            return Err(TopologyError::UnknownMessagePort {
                block: dst.name.clone(),
                direction: Direction::Input,
                port: edge.dst_port.clone(),
            }
            .into());
        }
    }
    Ok(())
}

/// Kahn's algorithm over the stream edges. Ready blocks are taken in id
/// order, so the result is deterministic.
fn topological_order(leaves: &Leaves<'_>, edges: &[FlatEdge]) -> Result<Vec<BlockId>> {
    let mut indegree = leaves
        .keys()
        .map(|&id| (id, 0usize))
        .collect::<BTreeMap<_, _>>();
    let mut successors: BTreeMap<BlockId, BTreeSet<BlockId>> = BTreeMap::new();
    for edge in edges {
        if successors
            .entry(edge.src.block)
            .or_default()
            .insert(edge.dst.block)
        {
            *indegree.entry(edge.dst.block).or_default() += 1;
        }
    }

    let mut ready = indegree
        .iter()
        .filter(|&(_, &n)| n == 0)
        .map(|(&id, _)| id)
        .collect::<BTreeSet<_>>();
    let mut order = Vec::with_capacity(leaves.len());
    while let Some(id) = ready.pop_first() {
        order.push(id);
        for next in successors.get(&id).into_iter().flatten() {
            let n = indegree.entry(*next).or_default();
            *n -= 1;
            if *n == 0 {
                ready.insert(*next);
            }
        }
    }

    if order.len() != leaves.len() {
        let placed = order.iter().collect::<BTreeSet<_>>();
        let cycle = leaves
            .iter()
            .filter(|(id, _)| !placed.contains(id))
            .map(|(_, leaf)| leaf.name.clone())
            .collect();
        return Err(TopologyError::Cycle(cycle).into());
    }
    Ok(order)
}
