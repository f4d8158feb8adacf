use crate::runtime::{
    block::{BlockInfo, SharedBlock},
    buffer::{Buffer, BufferReader},
    message::{MessageOutputs, MessageQueue},
    notify::Notifier,
    registry::BlockId,
};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};

/// Lifecycle phase of a block thread.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum BlockPhase {
    Init,
    Running,
    WaitingInput,
    WaitingOutput,
    Done,
    Terminated,
}

impl BlockPhase {
    fn from_u8(value: u8) -> BlockPhase {
        match value {
            0 => BlockPhase::Init,
            1 => BlockPhase::Running,
            2 => BlockPhase::WaitingInput,
            3 => BlockPhase::WaitingOutput,
            4 => BlockPhase::Done,
            _ => BlockPhase::Terminated,
        }
    }
}

impl fmt::Display for BlockPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            BlockPhase::Init => "init",
            BlockPhase::Running => "running",
            BlockPhase::WaitingInput => "waiting for input",
            BlockPhase::WaitingOutput => "waiting for output",
            BlockPhase::Done => "done",
            BlockPhase::Terminated => "terminated",
        };
        f.write_str(phase)
    }
}

/// Counters of a block thread, readable from other threads.
#[derive(Debug)]
pub struct BlockStatus {
    phase: AtomicU8,
    items_read: Vec<AtomicU64>,
    items_written: Vec<AtomicU64>,
    work_calls: AtomicU64,
}

impl BlockStatus {
    pub(crate) fn new(ninputs: usize, noutputs: usize) -> BlockStatus {
        BlockStatus {
            phase: AtomicU8::new(BlockPhase::Init as u8),
            items_read: (0..ninputs).map(|_| AtomicU64::new(0)).collect(),
            items_written: (0..noutputs).map(|_| AtomicU64::new(0)).collect(),
            work_calls: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> BlockPhase {
        BlockPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: BlockPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn items_read(&self) -> Vec<u64> {
        self.items_read
            .iter()
            .map(|n| n.load(Ordering::Relaxed))
            .collect()
    }

    pub fn items_written(&self) -> Vec<u64> {
        self.items_written
            .iter()
            .map(|n| n.load(Ordering::Relaxed))
            .collect()
    }

    pub fn work_calls(&self) -> u64 {
        self.work_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn record_read(&self, port: usize, n: usize) {
        self.items_read[port].fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_written(&self, port: usize, n: usize) {
        self.items_written[port].fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_work_call(&self) {
        self.work_calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything a block thread owns during a run.
pub(crate) struct BlockState {
    pub id: BlockId,
    pub name: String,
    pub info: BlockInfo,
    pub block: SharedBlock,
    pub inputs: Vec<BufferReader>,
    pub outputs: Vec<Buffer>,
    pub message_inputs: Vec<(String, Arc<MessageQueue>)>,
    pub message_outputs: MessageOutputs,
    pub notifier: Arc<Notifier>,
    pub status: Arc<BlockStatus>,
    /// `max_noutput_items` of the block, or of the runtime if the block does
    /// not set one.
    pub max_noutput_items: Option<usize>,
}

impl fmt::Debug for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockState")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("phase", &self.status.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn phase_roundtrip() {
        let status = BlockStatus::new(1, 2);
        assert_eq!(status.phase(), BlockPhase::Init);
        for phase in [
            BlockPhase::Running,
            BlockPhase::WaitingInput,
            BlockPhase::WaitingOutput,
            BlockPhase::Done,
            BlockPhase::Terminated,
        ] {
            status.set_phase(phase);
            assert_eq!(status.phase(), phase);
        }
        status.record_written(1, 5);
        status.record_read(0, 3);
        assert_eq!(status.items_written(), vec![0, 5]);
        assert_eq!(status.items_read(), vec![3]);
    }
}
