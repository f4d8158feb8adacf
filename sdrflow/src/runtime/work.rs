use super::{
    buffer::BufferReader,
    error::Result,
    item::{Item, cast_slice, cast_slice_mut},
    message::MessageOutputs,
    pmt::Pmt,
    tag::Tag,
};
use std::any::type_name;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum WorkStatus {
    #[default]
    Run,
    DoneWithOutput,
    DoneWithoutOutput,
}

impl WorkStatus {
    pub fn produces_output(&self) -> bool {
        match self {
            WorkStatus::Run | WorkStatus::DoneWithOutput => true,
            WorkStatus::DoneWithoutOutput => false,
        }
    }
}

/// Arguments of one call to [`Block::work`](super::block::Block::work).
#[derive(Debug)]
pub struct WorkIo<'a> {
    pub inputs: Vec<InputSlot<'a>>,
    pub outputs: Vec<OutputSlot<'a>>,
    messages: &'a MessageOutputs,
    noutput_items: usize,
}

impl<'a> WorkIo<'a> {
    pub(crate) fn new(
        inputs: Vec<InputSlot<'a>>,
        outputs: Vec<OutputSlot<'a>>,
        messages: &'a MessageOutputs,
        noutput_items: usize,
    ) -> WorkIo<'a> {
        WorkIo {
            inputs,
            outputs,
            messages,
            noutput_items,
        }
    }

    /// Number of items that may be produced on each output in this call.
    pub fn noutput_items(&self) -> usize {
        self.noutput_items
    }

    pub fn consume_each(&mut self, n: usize) {
        for input in &mut self.inputs {
            input.consume(n);
        }
    }

    pub fn produce_each(&mut self, n: usize) {
        for output in &mut self.outputs {
            output.produce(n);
        }
    }

    /// Posts a message on the message output port `port`.
    pub fn post(&self, port: &str, msg: impl Into<Pmt>) -> Result<()> {
        self.messages.post(port, msg)
    }
}

/// Readable items of one input port.
#[derive(Debug)]
pub struct InputSlot<'a> {
    reader: &'a BufferReader,
    window: &'a [u8],
    history: usize,
    available: usize,
    pub(crate) consumed: usize,
}

impl<'a> InputSlot<'a> {
    pub(crate) fn new(reader: &'a BufferReader) -> InputSlot<'a> {
        let window = reader.read_slot();
        let history = reader.history();
        InputSlot {
            reader,
            window,
            history,
            available: window.len() / reader.item_size() - history,
            consumed: 0,
        }
    }

    /// Available items, not including history.
    pub fn items<T: Item>(&self) -> &'a [T] {
        &self.items_with_history::<T>()[self.history..]
    }

    /// Available items preceded by `history` items of lookback.
    pub fn items_with_history<T: Item>(&self) -> &'a [T] {
        self.check_type::<T>();
        cast_slice(self.window)
    }

    pub fn bytes(&self) -> &'a [u8] {
        &self.window[self.history * self.reader.item_size()..]
    }

    pub fn history(&self) -> usize {
        self.history
    }

    pub fn available(&self) -> usize {
        self.available
    }

    pub fn item_size(&self) -> usize {
        self.reader.item_size()
    }

    /// Marks `n` more items as consumed. They are released when `work`
    /// returns.
    pub fn consume(&mut self, n: usize) {
        self.consumed += n;
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Tags attached to the available items, with absolute offsets.
    pub fn tags(&self) -> Vec<Tag> {
        let start = self.reader.nitems_read();
        self.reader.tags_in_range(start, start + self.available as u64)
    }

    pub fn tags_in_range(&self, lo: u64, hi: u64) -> Vec<Tag> {
        self.reader.tags_in_range(lo, hi)
    }

    /// Absolute index of the first available item.
    pub fn nitems_read(&self) -> u64 {
        self.reader.nitems_read()
    }

    /// Whether the upstream block has finished. Items that are already
    /// available are not affected.
    pub fn is_upstream_done(&self) -> bool {
        self.reader.is_upstream_done()
    }

    fn check_type<T: Item>(&self) {
        assert_eq!(
            size_of::<T>(),
            self.reader.item_size(),
            "input item type {} does not match the port item size",
            type_name::<T>()
        );
    }
}

/// Writable items of one output port.
#[derive(Debug)]
pub struct OutputSlot<'a> {
    bytes: &'a mut [u8],
    len: usize,
    item_size: usize,
    nitems_written: u64,
    pub(crate) produced: usize,
    pub(crate) tags: Vec<Tag>,
}

impl<'a> OutputSlot<'a> {
    pub(crate) fn new(
        bytes: &'a mut [u8],
        len: usize,
        item_size: usize,
        nitems_written: u64,
    ) -> OutputSlot<'a> {
        let bytes = &mut bytes[..len * item_size];
        OutputSlot {
            bytes,
            len,
            item_size,
            nitems_written,
            produced: 0,
            tags: Vec::new(),
        }
    }

    pub fn items_mut<T: Item>(&mut self) -> &mut [T] {
        assert_eq!(
            size_of::<T>(),
            self.item_size,
            "output item type {} does not match the port item size",
            type_name::<T>()
        );
        cast_slice_mut(&mut *self.bytes)
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut *self.bytes
    }

    /// Number of items that may be produced.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Marks `n` more items as produced. They are published when `work`
    /// returns.
    pub fn produce(&mut self, n: usize) {
        self.produced += n;
    }

    pub fn produced(&self) -> usize {
        self.produced
    }

    /// Attaches a tag to item `index` of this slot.
    pub fn add_tag(&mut self, index: usize, key: impl Into<String>, value: impl Into<Pmt>) {
        self.tags
            .push(Tag::new(self.nitems_written + index as u64, key, value));
    }

    /// Absolute index of the first item of this slot.
    pub fn nitems_written(&self) -> u64 {
        self.nitems_written
    }
}
