use super::{
    message::MessageOutputs,
    pmt::Pmt,
    port::IoSignature,
    work::{WorkIo, WorkStatus},
};
use anyhow::Result;
use std::sync::{Arc, Mutex};

/// Exact output/input item ratio of a block.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RelativeRate {
    interpolation: u64,
    decimation: u64,
}

impl RelativeRate {
    pub const ONE: RelativeRate = RelativeRate {
        interpolation: 1,
        decimation: 1,
    };

    /// `interpolation` output items for every `decimation` input items.
    ///
    /// # Panics
    ///
    /// Panics if either argument is zero.
    pub fn new(interpolation: u64, decimation: u64) -> RelativeRate {
        assert!(interpolation > 0 && decimation > 0);
        let g = gcd(interpolation, decimation);
        RelativeRate {
            interpolation: interpolation / g,
            decimation: decimation / g,
        }
    }

    pub fn interpolation(&self) -> u64 {
        self.interpolation
    }

    pub fn decimation(&self) -> u64 {
        self.decimation
    }

    /// Input items needed to produce `noutput` items.
    pub fn inputs_for(&self, noutput: usize) -> usize {
        (noutput as u64 * self.decimation).div_ceil(self.interpolation) as usize
    }

    /// Output items that `ninput` input items are enough for.
    pub fn outputs_for(&self, ninput: usize) -> usize {
        (ninput as u64 * self.interpolation / self.decimation) as usize
    }

    /// Maps an absolute input offset to the corresponding output offset.
    pub fn map_offset(&self, offset: u64) -> u64 {
        (u128::from(offset) * u128::from(self.interpolation) / u128::from(self.decimation)) as u64
    }
}

impl Default for RelativeRate {
    fn default() -> RelativeRate {
        RelativeRate::ONE
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum TagPropagation {
    DontPropagate,
    /// Every input tag goes to every output, with its offset scaled by the
    /// relative rate.
    #[default]
    AllToAll,
    /// Tags of input `i` go to output `i`.
    OneToOne,
}

/// Static description of a block, returned when the block is added to a
/// flowgraph.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub name: String,
    pub input_signature: IoSignature,
    pub output_signature: IoSignature,
    pub message_inputs: Vec<String>,
    pub message_outputs: Vec<String>,
    pub history: usize,
    pub relative_rate: RelativeRate,
    pub output_multiple: usize,
    pub tag_propagation: TagPropagation,
    pub max_noutput_items: Option<usize>,
    pub affinity: Option<usize>,
}

impl BlockInfo {
    pub fn new(
        name: impl Into<String>,
        input_signature: IoSignature,
        output_signature: IoSignature,
    ) -> BlockInfo {
        BlockInfo {
            name: name.into(),
            input_signature,
            output_signature,
            message_inputs: Vec::new(),
            message_outputs: Vec::new(),
            history: 0,
            relative_rate: RelativeRate::ONE,
            output_multiple: 1,
            tag_propagation: TagPropagation::default(),
            max_noutput_items: None,
            affinity: None,
        }
    }

    pub fn with_message_inputs<S: Into<String>>(
        mut self,
        ports: impl IntoIterator<Item = S>,
    ) -> BlockInfo {
        self.message_inputs = ports.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_message_outputs<S: Into<String>>(
        mut self,
        ports: impl IntoIterator<Item = S>,
    ) -> BlockInfo {
        self.message_outputs = ports.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_history(mut self, history: usize) -> BlockInfo {
        self.history = history;
        self
    }

    pub fn with_relative_rate(mut self, relative_rate: RelativeRate) -> BlockInfo {
        self.relative_rate = relative_rate;
        self
    }

    /// # Panics
    ///
    /// Panics if `output_multiple` is zero.
    pub fn with_output_multiple(mut self, output_multiple: usize) -> BlockInfo {
        assert!(output_multiple > 0);
        self.output_multiple = output_multiple;
        self
    }

    pub fn with_tag_propagation(mut self, tag_propagation: TagPropagation) -> BlockInfo {
        self.tag_propagation = tag_propagation;
        self
    }

    pub fn with_max_noutput_items(mut self, max_noutput_items: usize) -> BlockInfo {
        self.max_noutput_items = Some(max_noutput_items);
        self
    }

    /// Pins the block thread to the CPU core with this index.
    pub fn with_affinity(mut self, core: usize) -> BlockInfo {
        self.affinity = Some(core);
        self
    }

    /// Smallest number of input items of each port for which the block can
    /// produce one `output_multiple` of output.
    pub(crate) fn min_batch(&self) -> usize {
        self.relative_rate.inputs_for(self.output_multiple).max(1)
    }
}

/// Block.
///
/// This trait is implemented by every processing node. The runtime calls
/// `work` on the block's own thread whenever the block has input available
/// and space for its output.
pub trait Block: Send + 'static {
    fn info(&self) -> BlockInfo;

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus>;

    /// Fills `required` with the number of input items needed on each input
    /// to produce `noutput_items`. On entry `required` contains the default
    /// estimate obtained from the relative rate.
    fn forecast(&self, noutput_items: usize, required: &mut [usize]) {
        let _ = (noutput_items, required);
    }

    fn handle_message(&mut self, port: &str, msg: Pmt, outputs: &MessageOutputs) -> Result<()> {
        let _ = (port, msg, outputs);
        Ok(())
    }

    /// Called on the block thread before the first call to `work`.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called on the block thread after the block has finished.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

pub(crate) type SharedBlock = Arc<Mutex<Box<dyn Block>>>;

pub(crate) fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

pub(crate) fn lcm(a: u64, b: u64) -> u64 {
    if a == 0 || b == 0 {
        return 0;
    }
    a / gcd(a, b) * b
}
