use super::{
    config::RuntimeConfig,
    error::{Error, Result},
    flowgraph::Flowgraph,
    registry::BlockId,
    scheduler::{BlockHandle, BlockPhase, PreparedRun, RunningGraph},
};
use std::{
    mem,
    time::{Duration, Instant},
};

/// Runs a [`Flowgraph`], one thread per block.
///
/// The flowgraph is flattened and its buffers are allocated by
/// [`initialize`](Runtime::initialize). [`start`](Runtime::start) spawns the
/// block threads and [`wait`](Runtime::wait) joins them once every block has
/// finished. After a run, the same flowgraph can be started again.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    flowgraph: Option<Flowgraph>,
    state: State,
    blocks: Vec<BlockHandle>,
    last_report: Option<RunReport>,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Stopped,
    Prepared(PreparedRun),
    Running {
        graph: RunningGraph,
        started: Instant,
    },
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub elapsed: Duration,
    pub blocks: Vec<BlockReport>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BlockReport {
    pub id: BlockId,
    pub name: String,
    pub phase: BlockPhase,
    pub items_read: Vec<u64>,
    pub items_written: Vec<u64>,
    pub work_calls: u64,
}

impl RunReport {
    pub fn block(&self, name: &str) -> Option<&BlockReport> {
        self.blocks.iter().find(|block| block.name == name)
    }
}

impl Default for Runtime {
    fn default() -> Runtime {
        Runtime::new()
    }
}

impl Runtime {
    pub fn new() -> Runtime {
        Runtime::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Runtime {
        Runtime {
            config,
            flowgraph: None,
            state: State::Stopped,
            blocks: Vec::new(),
            last_report: None,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Takes `flowgraph` and prepares a run: the flowgraph is flattened and
    /// validated, and its buffers and message queues are created.
    pub fn initialize(&mut self, flowgraph: Flowgraph) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        self.state = State::Stopped;
        self.flowgraph = Some(flowgraph);
        self.prepare()
    }

    fn prepare(&mut self) -> Result<()> {
        self.config.validate()?;
        let flowgraph = self.flowgraph.as_ref().ok_or(Error::NotInitialized)?;
        let flat = flowgraph.flatten()?;
        let run = PreparedRun::new(&flat, &self.config)?;
        self.blocks = run.handles();
        tracing::info!(
            blocks = flat.blocks().len(),
            edges = flat.edges().len(),
            "flowgraph initialized"
        );
        self.state = State::Prepared(run);
        Ok(())
    }

    /// Starts the block threads.
    ///
    /// If the flowgraph has already run, or was modified since
    /// [`initialize`](Runtime::initialize), it is prepared again.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        if matches!(self.state, State::Stopped) {
            self.prepare()?;
        }
        let State::Prepared(run) = mem::take(&mut self.state) else {
            return Err(Error::NotInitialized);
        };
        let graph = run.spawn()?;
        tracing::info!("flowgraph started");
        self.state = State::Running {
            graph,
            started: Instant::now(),
        };
        Ok(())
    }

    /// Waits until every block has terminated.
    ///
    /// Returns [`Error::BlockFailures`] if any block failed.
    pub fn wait(&mut self) -> Result<RunReport> {
        if !self.is_running() {
            return self.last_report.clone().ok_or(Error::NotInitialized);
        }
        self.finish()
    }

    /// Interrupts every block and waits for their threads to exit.
    ///
    /// Does nothing if the runtime is not running, other than dropping a
    /// prepared run.
    pub fn stop(&mut self) -> Result<()> {
        match &self.state {
            State::Running { graph, .. } => {
                tracing::info!("stopping flowgraph");
                graph.interrupt();
                self.finish().map(|_| ())
            }
            State::Prepared(_) => {
                self.state = State::Stopped;
                Ok(())
            }
            State::Stopped => Ok(()),
        }
    }

    /// Initializes, starts and waits for `flowgraph`.
    pub fn run(&mut self, flowgraph: Flowgraph) -> Result<RunReport> {
        self.initialize(flowgraph)?;
        self.start()?;
        self.wait()
    }

    fn finish(&mut self) -> Result<RunReport> {
        let State::Running { graph, started } = mem::take(&mut self.state) else {
            return Err(Error::NotInitialized);
        };
        let (blocks, failures) = graph.join();
        let report = RunReport {
            elapsed: started.elapsed(),
            blocks: blocks
                .iter()
                .map(|block| BlockReport {
                    id: block.id,
                    name: block.name.clone(),
                    phase: block.status.phase(),
                    items_read: block.status.items_read(),
                    items_written: block.status.items_written(),
                    work_calls: block.status.work_calls(),
                })
                .collect(),
        };
        tracing::info!(
            elapsed = ?report.elapsed,
            failures = failures.len(),
            "flowgraph finished"
        );
        self.blocks = blocks;
        self.last_report = Some(report.clone());
        if failures.is_empty() {
            Ok(report)
        } else {
            Err(Error::BlockFailures(failures))
        }
    }

    /// Whether block threads have been started and not joined yet.
    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    /// Whether every block thread of the current run has exited. `wait`
    /// returns immediately when this is true.
    pub fn is_finished(&self) -> bool {
        match &self.state {
            State::Running { graph, .. } => graph.is_finished(),
            _ => true,
        }
    }

    /// Current phase of each block of the prepared, running or last run.
    pub fn block_phases(&self) -> Vec<(String, BlockPhase)> {
        let blocks = match &self.state {
            State::Running { graph, .. } => graph.blocks(),
            _ => &self.blocks,
        };
        blocks
            .iter()
            .map(|block| (block.name.clone(), block.status.phase()))
            .collect()
    }

    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    pub fn flowgraph(&self) -> Option<&Flowgraph> {
        self.flowgraph.as_ref()
    }

    /// Gives access to the flowgraph between runs. A prepared run is
    /// discarded, since the topology may change.
    pub fn flowgraph_mut(&mut self) -> Result<&mut Flowgraph> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        self.state = State::Stopped;
        self.flowgraph.as_mut().ok_or(Error::NotInitialized)
    }

    /// Returns the flowgraph, stopping the runtime if it is running.
    pub fn into_flowgraph(mut self) -> Option<Flowgraph> {
        if let Err(err) = self.stop() {
            tracing::warn!("flowgraph stopped with errors: {err}");
        }
        self.flowgraph.take()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(err) = self.stop() {
                tracing::warn!("flowgraph stopped with errors: {err}");
            }
        }
    }
}
