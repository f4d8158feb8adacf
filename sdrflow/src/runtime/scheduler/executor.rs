use super::state::{BlockPhase, BlockState};
use crate::runtime::{
    block::{Block, RelativeRate, TagPropagation},
    buffer::{Buffer, BufferReader},
    error::{BlockFailure, Error},
    tag::Tag,
    work::{InputSlot, OutputSlot, WorkIo, WorkStatus},
};
use anyhow::{Context, Result, anyhow};
use std::{
    any::Any,
    mem,
    panic::{self, AssertUnwindSafe},
    slice,
    sync::{Arc, Mutex, PoisonError},
    thread,
};

enum Outcome {
    Done,
    Interrupted,
}

enum Step {
    Progress,
    /// No progress and nothing to wait for. Only sources get here.
    Idle,
    WaitInput,
    WaitOutput,
    Done,
}

/// Body of a block thread.
pub(crate) fn run_block(mut state: BlockState, failures: &Mutex<Vec<BlockFailure>>) {
    let span = tracing::info_span!("block", name = %state.name);
    let _enter = span.enter();

    if let Some(core) = state.info.affinity {
        if !core_affinity::set_for_current(core_affinity::CoreId { id: core }) {
            tracing::warn!(core, "could not pin block thread");
        }
    }
    tracing::debug!("block thread started");
    state.status.set_phase(BlockPhase::Running);

    let block = Arc::clone(&state.block);
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut block = block.lock().unwrap_or_else(PoisonError::into_inner);
        execute(&mut **block, &mut state)
    }))
    .unwrap_or_else(|payload| Err(anyhow!("block panicked: {}", panic_message(&*payload))));

    match result {
        Ok(Outcome::Done) => {
            state.status.set_phase(BlockPhase::Done);
            finish(&mut state);
            tracing::debug!(
                items_read = ?state.status.items_read(),
                items_written = ?state.status.items_written(),
                "block done"
            );
        }
        Ok(Outcome::Interrupted) => {
            tracing::trace!("block interrupted");
            // an interrupted stream is not finished; it stays open
            for buffer in state.outputs.drain(..) {
                buffer.abandon();
            }
            release(&mut state);
        }
        Err(error) => {
            tracing::error!("block failed: {error:#}");
            failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(BlockFailure {
                    block: state.id,
                    name: state.name.clone(),
                    error,
                });
            // downstream blocks see this like a regular end of stream
            finish(&mut state);
        }
    }
    state.status.set_phase(BlockPhase::Terminated);
}

fn execute(block: &mut dyn Block, state: &mut BlockState) -> Result<Outcome> {
    block.start().context("block start failed")?;
    let outcome = run_loop(block, state);
    let stopped = block.stop();
    let outcome = outcome?;
    stopped.context("block stop failed")?;
    Ok(outcome)
}

fn run_loop(block: &mut dyn Block, state: &mut BlockState) -> Result<Outcome> {
    let message_only =
        state.inputs.is_empty() && state.outputs.is_empty() && !state.message_inputs.is_empty();
    loop {
        if state.notifier.is_interrupted() {
            return Ok(Outcome::Interrupted);
        }
        drain_messages(block, state)?;
        let step = if message_only {
            message_step(state)
        } else {
            work_step(block, state)?
        };
        match step {
            Step::Progress => {}
            Step::Idle => thread::yield_now(),
            Step::WaitInput => {
                if !wait(state, BlockPhase::WaitingInput) {
                    return Ok(Outcome::Interrupted);
                }
            }
            Step::WaitOutput => {
                if !wait(state, BlockPhase::WaitingOutput) {
                    return Ok(Outcome::Interrupted);
                }
            }
            Step::Done => return Ok(Outcome::Done),
        }
    }
}

fn wait(state: &BlockState, phase: BlockPhase) -> bool {
    state.status.set_phase(phase);
    tracing::trace!(%phase, "waiting");
    let woken = match phase {
        BlockPhase::WaitingOutput => state.notifier.wait_output(),
        _ => state.notifier.wait_input(),
    };
    state.status.set_phase(BlockPhase::Running);
    woken
}

fn drain_messages(block: &mut dyn Block, state: &BlockState) -> Result<()> {
    for (port, queue) in &state.message_inputs {
        while let Some(msg) = queue.try_pop() {
            block
                .handle_message(port, msg, &state.message_outputs)
                .with_context(|| format!("failed to handle message on port '{port}'"))?;
        }
    }
    Ok(())
}

fn message_step(state: &BlockState) -> Step {
    // publishers are checked first: once the last one is gone, nothing else
    // can be appended to the queues
    let publishers_gone = state
        .message_inputs
        .iter()
        .all(|(_, queue)| !queue.has_publishers());
    let drained = state
        .message_inputs
        .iter()
        .all(|(_, queue)| queue.is_empty());
    if publishers_gone && drained {
        Step::Done
    } else {
        Step::WaitInput
    }
}

fn required_inputs(
    block: &dyn Block,
    rate: RelativeRate,
    noutput_items: usize,
    ninputs: usize,
) -> Vec<usize> {
    let mut required = vec![rate.inputs_for(noutput_items); ninputs];
    block.forecast(noutput_items, &mut required);
    required
}

fn forecast_met(block: &dyn Block, rate: RelativeRate, n: usize, available: &[usize]) -> bool {
    required_inputs(block, rate, n, available.len())
        .iter()
        .zip(available)
        .all(|(required, available)| required <= available)
}

/// Chooses `noutput_items` for the next call to `work`, or the step to take
/// if `work` cannot be called.
fn plan_work(block: &dyn Block, state: &BlockState) -> Result<usize, Step> {
    let ninputs = state.inputs.len();
    let noutputs = state.outputs.len();
    if ninputs == 0 && noutputs == 0 {
        return Ok(0);
    }
    let rate = state.info.relative_rate;
    let multiple = state.info.output_multiple.max(1);

    // the done flags are read before the indices, so that a done upstream
    // cannot have committed anything after `available` was sampled
    let upstream_done = state
        .inputs
        .iter()
        .map(BufferReader::is_upstream_done)
        .collect::<Vec<_>>();
    let available = state
        .inputs
        .iter()
        .map(BufferReader::available_items)
        .collect::<Vec<_>>();

    let required = required_inputs(block, rate, multiple, ninputs);
    let starved = (0..ninputs)
        .filter(|&port| available[port] < required[port])
        .collect::<Vec<_>>();
    if !starved.is_empty() {
        return Err(if starved.iter().any(|&port| upstream_done[port]) {
            Step::Done
        } else {
            Step::WaitInput
        });
    }

    let space = state
        .outputs
        .iter()
        .map(Buffer::space_available)
        .min()
        .unwrap_or(usize::MAX);
    if noutputs > 0 && space < multiple {
        return Err(Step::WaitOutput);
    }
    let mut limit = space;
    if let Some(max) = state.max_noutput_items {
        // the cap never goes below one output_multiple
        limit = limit.min((max / multiple * multiple).max(multiple));
    }
    if let Some(input_limit) = available.iter().map(|&n| rate.outputs_for(n)).min() {
        limit = limit.min(input_limit);
    }

    let mut n = (limit / multiple * multiple).max(multiple);
    while n > multiple && !forecast_met(block, rate, n, &available) {
        n = (n / 2 / multiple * multiple).max(multiple);
    }
    Ok(n)
}

fn work_step(block: &mut dyn Block, state: &mut BlockState) -> Result<Step> {
    if !state.outputs.is_empty() && state.outputs.iter().all(|b| b.reader_count() == 0) {
        tracing::trace!("every downstream reader is gone");
        return Ok(Step::Done);
    }
    let noutput_items = match plan_work(block, state) {
        Ok(n) => n,
        Err(step) => return Ok(step),
    };

    let inputs = state.inputs.iter().map(InputSlot::new).collect::<Vec<_>>();
    let outputs = state
        .outputs
        .iter_mut()
        .map(|buffer| {
            let item_size = buffer.item_size();
            let nitems_written = buffer.nitems_written();
            let slot = buffer.write_slot();
            let len = noutput_items.min(slot.items);
            OutputSlot::new(slot.bytes, len, item_size, nitems_written)
        })
        .collect::<Vec<_>>();
    let mut io = WorkIo::new(inputs, outputs, &state.message_outputs, noutput_items);
    let status = block.work(&mut io)?;
    state.status.record_work_call();

    let consumed = io.inputs.iter().map(InputSlot::consumed).collect::<Vec<_>>();
    let mut produced = Vec::with_capacity(io.outputs.len());
    let mut pending_tags = Vec::with_capacity(io.outputs.len());
    for output in &mut io.outputs {
        if output.produced > output.len() {
            return Err(Error::Overrun {
                requested: output.produced,
                available: output.len(),
            }
            .into());
        }
        produced.push(output.produced);
        pending_tags.push(mem::take(&mut output.tags));
    }
    // nothing from a call that over-consumed may reach the outputs
    for input in &io.inputs {
        if input.consumed() > input.available() {
            return Err(Error::Underrun {
                requested: input.consumed(),
                available: input.available(),
            }
            .into());
        }
    }
    drop(io);

    if status == WorkStatus::DoneWithoutOutput {
        return Ok(Step::Done);
    }

    // tags go in before the items are published
    propagate_tags(state, &consumed, pending_tags);
    for (port, (buffer, &n)) in state.outputs.iter_mut().zip(&produced).enumerate() {
        buffer.commit_write(n)?;
        state.status.record_written(port, n);
    }
    for (port, (reader, &n)) in state.inputs.iter_mut().zip(&consumed).enumerate() {
        reader.consume(n)?;
        state.status.record_read(port, n);
    }

    if status == WorkStatus::DoneWithOutput {
        return Ok(Step::Done);
    }
    let progress = produced.iter().chain(&consumed).any(|&n| n > 0);
    Ok(if progress {
        Step::Progress
    } else if state.inputs.is_empty() {
        Step::Idle
    } else if state.inputs.iter().all(BufferReader::is_upstream_done) {
        Step::Done
    } else {
        Step::WaitInput
    })
}

fn propagate_tags(state: &BlockState, consumed: &[usize], pending: Vec<Vec<Tag>>) {
    let rate = state.info.relative_rate;
    for (port, reader) in state.inputs.iter().enumerate() {
        if consumed[port] == 0 {
            continue;
        }
        let targets: &[Buffer] = match state.info.tag_propagation {
            TagPropagation::DontPropagate => &[],
            TagPropagation::AllToAll => &state.outputs,
            TagPropagation::OneToOne => state
                .outputs
                .get(port)
                .map(slice::from_ref)
                .unwrap_or_default(),
        };
        if targets.is_empty() {
            continue;
        }
        let start = reader.nitems_read();
        for tag in reader.tags_in_range(start, start + consumed[port] as u64) {
            for buffer in targets {
                buffer.add_tag(Tag {
                    offset: rate.map_offset(tag.offset),
                    ..tag.clone()
                });
            }
        }
    }
    for (buffer, tags) in state.outputs.iter().zip(pending) {
        for mut tag in tags {
            if tag.source.is_none() {
                tag.source = Some(state.id);
            }
            buffer.add_tag(tag);
        }
    }
}

/// Ends the streams of the block and releases its inputs.
fn finish(state: &mut BlockState) {
    for buffer in &state.outputs {
        buffer.set_done();
    }
    release(state);
}

fn release(state: &mut BlockState) {
    // dropping the readers lets the upstream writers reuse their space
    state.inputs.clear();
    for (_, queue) in &state.message_inputs {
        queue.close();
    }
    for queue in state.message_outputs.queues() {
        queue.release_publisher();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        blocks::basic::{NullSource, VectorSource},
        runtime::{
            buffer::BufferKind, message::MessageOutputs, notify::Notifier, registry::BlockId,
            scheduler::BlockStatus,
        },
    };

    fn state(block: impl Block, outputs: Vec<Buffer>, notifier: Arc<Notifier>) -> BlockState {
        let info = block.info();
        let block: Box<dyn Block> = Box::new(block);
        BlockState {
            id: BlockId::from_raw(0),
            name: info.name.clone(),
            status: Arc::new(BlockStatus::new(0, outputs.len())),
            info,
            block: Arc::new(Mutex::new(block)),
            inputs: Vec::new(),
            outputs,
            message_inputs: Vec::new(),
            message_outputs: MessageOutputs::default(),
            notifier,
            max_noutput_items: None,
        }
    }

    #[test]
    fn interrupted_block_leaves_outputs_open() {
        let mut buffer = Buffer::allocate_with(64, 4, BufferKind::Heap).unwrap();
        let reader = buffer.add_reader(0).unwrap();
        let notifier = Arc::new(Notifier::new());
        notifier.interrupt();
        let state = state(NullSource::<f32>::new(), vec![buffer], notifier);
        let status = Arc::clone(&state.status);
        let failures = Mutex::new(Vec::new());

        run_block(state, &failures);
        assert!(failures.lock().unwrap().is_empty());
        assert_eq!(status.phase(), BlockPhase::Terminated);
        assert!(!reader.is_upstream_done());
    }

    #[test]
    fn finished_block_marks_outputs_done() {
        let mut buffer = Buffer::allocate_with(64, 4, BufferKind::Heap).unwrap();
        let reader = buffer.add_reader(0).unwrap();
        let source = VectorSource::<u32>::new(Vec::new());
        let state = state(source, vec![buffer], Arc::new(Notifier::new()));
        let failures = Mutex::new(Vec::new());

        run_block(state, &failures);
        assert!(failures.lock().unwrap().is_empty());
        assert!(reader.is_upstream_done());
    }
}
