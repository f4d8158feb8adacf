use super::{
    buffer::{Buffer, BufferReader},
    config::RuntimeConfig,
    error::{BlockFailure, Error, Result},
    flatten::FlatGraph,
    message::{MessageOutputs, MessageQueue},
    notify::Notifier,
    registry::BlockId,
    sizer::BufferSizer,
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

mod executor;
mod state;
pub(crate) use state::BlockState;
pub use state::{BlockPhase, BlockStatus};

/// Handle to a block of a prepared or running flowgraph.
#[derive(Debug, Clone)]
pub(crate) struct BlockHandle {
    pub id: BlockId,
    pub name: String,
    pub status: Arc<BlockStatus>,
    pub notifier: Arc<Notifier>,
}

/// Blocks of a flattened flowgraph wired to their buffers and message
/// queues, ready to be started.
#[derive(Debug)]
pub(crate) struct PreparedRun {
    blocks: Vec<BlockState>,
    queues: Vec<Arc<MessageQueue>>,
}

impl PreparedRun {
    pub(crate) fn new(graph: &FlatGraph, config: &RuntimeConfig) -> Result<PreparedRun> {
        let notifiers = graph
            .blocks()
            .iter()
            .map(|block| (block.id, Arc::new(Notifier::new())))
            .collect::<BTreeMap<_, _>>();

        let sizer = BufferSizer::new(config);
        let mut inputs: BTreeMap<BlockId, BTreeMap<usize, BufferReader>> = BTreeMap::new();
        let mut outputs: BTreeMap<BlockId, BTreeMap<usize, Buffer>> = BTreeMap::new();
        for plan in sizer.plan(graph)? {
            let mut buffer = sizer.allocate(&plan)?;
            buffer.set_writer_notifier(Arc::clone(&notifiers[&plan.source.block]));
            for reader in &plan.readers {
                let notifier = Arc::clone(&notifiers[&reader.dest.block]);
                let reader_end = buffer.attach_reader(reader.history, Some(notifier))?;
                inputs
                    .entry(reader.dest.block)
                    .or_default()
                    .insert(reader.dest.port, reader_end);
            }
            outputs
                .entry(plan.source.block)
                .or_default()
                .insert(plan.source.port, buffer);
        }

        let mut queues = Vec::new();
        let mut message_inputs: BTreeMap<BlockId, Vec<(String, Arc<MessageQueue>)>> =
            BTreeMap::new();
        for block in graph.blocks() {
            for port in &block.info.message_inputs {
                let queue = Arc::new(MessageQueue::with_listener(
                    config.message_queue_bound,
                    Some(Arc::clone(&notifiers[&block.id])),
                ));
                queues.push(Arc::clone(&queue));
                message_inputs
                    .entry(block.id)
                    .or_default()
                    .push((port.clone(), queue));
            }
        }
        let queue_of = |block: BlockId, port: &str| {
            message_inputs
                .get(&block)
                .and_then(|ports| ports.iter().find(|(name, _)| name == port))
                .map(|(_, queue)| Arc::clone(queue))
        };

        let mut blocks = Vec::with_capacity(graph.blocks().len());
        for block in graph.blocks() {
            let message_outputs = block
                .info
                .message_outputs
                .iter()
                .map(|port| {
                    let queues = graph
                        .msg_edges()
                        .iter()
                        .filter(|edge| edge.src == block.id && &edge.src_port == port)
                        .filter_map(|edge| queue_of(edge.dst, &edge.dst_port))
                        .inspect(|queue| queue.add_publisher())
                        .collect::<Vec<_>>();
                    (port.clone(), queues)
                })
                .collect();
            let inputs = inputs
                .remove(&block.id)
                .unwrap_or_default()
                .into_values()
                .collect::<Vec<_>>();
            let outputs = outputs
                .remove(&block.id)
                .unwrap_or_default()
                .into_values()
                .collect::<Vec<_>>();
            blocks.push(BlockState {
                id: block.id,
                name: block.name.clone(),
                info: block.info.clone(),
                block: Arc::clone(&block.block),
                status: Arc::new(BlockStatus::new(inputs.len(), outputs.len())),
                inputs,
                outputs,
                message_inputs: message_inputs.get(&block.id).cloned().unwrap_or_default(),
                message_outputs: MessageOutputs::new(message_outputs),
                notifier: Arc::clone(&notifiers[&block.id]),
                max_noutput_items: block.info.max_noutput_items.or(config.max_noutput_items),
            });
        }
        tracing::debug!(
            blocks = blocks.len(),
            message_queues = queues.len(),
            "prepared flowgraph run"
        );
        Ok(PreparedRun { blocks, queues })
    }

    pub(crate) fn handles(&self) -> Vec<BlockHandle> {
        self.blocks
            .iter()
            .map(|state| BlockHandle {
                id: state.id,
                name: state.name.clone(),
                status: Arc::clone(&state.status),
                notifier: Arc::clone(&state.notifier),
            })
            .collect()
    }

    /// Spawns one thread per block, in topological order.
    pub(crate) fn spawn(self) -> Result<RunningGraph> {
        let blocks = self.handles();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let mut threads = Vec::with_capacity(self.blocks.len());
        for state in self.blocks {
            let name = state.name.clone();
            let thread_failures = Arc::clone(&failures);
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || executor::run_block(state, &thread_failures));
            match spawned {
                Ok(handle) => {
                    tracing::debug!(block = %name, "spawned block thread");
                    threads.push((name, handle));
                }
                Err(source) => {
                    let running = RunningGraph {
                        threads,
                        blocks,
                        queues: self.queues,
                        failures,
                    };
                    running.interrupt();
                    running.join();
                    return Err(Error::Spawn { name, source });
                }
            }
        }
        Ok(RunningGraph {
            threads,
            blocks,
            queues: self.queues,
            failures,
        })
    }
}

/// Threads of a started flowgraph.
#[derive(Debug)]
pub(crate) struct RunningGraph {
    threads: Vec<(String, JoinHandle<()>)>,
    blocks: Vec<BlockHandle>,
    queues: Vec<Arc<MessageQueue>>,
    failures: Arc<Mutex<Vec<BlockFailure>>>,
}

impl RunningGraph {
    pub(crate) fn blocks(&self) -> &[BlockHandle] {
        &self.blocks
    }

    /// Asks every block to terminate and wakes the blocks that are waiting.
    pub(crate) fn interrupt(&self) {
        for block in &self.blocks {
            block.notifier.interrupt();
        }
        for queue in &self.queues {
            queue.close();
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.threads.iter().all(|(_, handle)| handle.is_finished())
    }

    /// Joins every block thread and returns the block handles and the
    /// failures recorded during the run.
    pub(crate) fn join(self) -> (Vec<BlockHandle>, Vec<BlockFailure>) {
        let mut panicked = Vec::new();
        for (name, handle) in self.threads {
            if handle.join().is_err() {
                tracing::error!(block = %name, "block thread panicked");
                panicked.push(name);
            }
        }
        let mut failures = std::mem::take(
            &mut *self
                .failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for name in panicked {
            if let Some(block) = self.blocks.iter().find(|block| block.name == name) {
                failures.push(BlockFailure {
                    block: block.id,
                    name,
                    error: anyhow::anyhow!("block thread panicked"),
                });
            }
        }
        (self.blocks, failures)
    }
}
