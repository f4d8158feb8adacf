use sdrflow::{
    Error, Tag, TopologyError,
    blocks::{
        basic::{
            Copy, Head, KeepOneInN, NullSink, NullSource, Repeat, VectorSink, VectorSource,
        },
        message::{MessageBurst, MessageSink},
    },
    ports::Endpoint,
    prelude::*,
    scheduler::BlockPhase,
};
use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

#[test]
fn source_copy_sink() {
    let data = (0..1000u32).collect::<Vec<_>>();
    let mut fg = Flowgraph::new();
    let source = fg.add_block(VectorSource::new(data.clone()));
    let copy = fg.add_block(Copy::<u32>::new());
    let sink = VectorSink::<u32>::new();
    let received = sink.data();
    let sink = fg.add_block(sink);
    fg.connect(source, copy).unwrap();
    fg.connect(copy, sink).unwrap();

    let mut runtime = Runtime::new();
    let report = runtime.run(fg).unwrap();
    assert_eq!(received.items(), data);
    assert_eq!(report.block("vector_sink_0").unwrap().items_read, vec![1000]);
    assert_eq!(report.block("copy_0").unwrap().items_written, vec![1000]);
    assert!(
        report
            .blocks
            .iter()
            .all(|block| block.phase == BlockPhase::Terminated)
    );
    assert!(
        runtime
            .block_phases()
            .iter()
            .all(|(_, phase)| *phase == BlockPhase::Terminated)
    );
}

/// Sink that records the input window of its first `work` call.
struct FirstWindow {
    history: usize,
    window: Arc<Mutex<Option<Vec<f32>>>>,
}

impl Block for FirstWindow {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "first_window",
            IoSignature::exactly::<f32>(1),
            IoSignature::empty(),
        )
        .with_history(self.history)
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        let input = &mut io.inputs[0];
        self.window
            .lock()
            .unwrap()
            .get_or_insert_with(|| input.items_with_history::<f32>().to_vec());
        input.consume(input.available());
        Ok(Run)
    }
}

#[test]
fn history_preroll_is_zero() {
    let window = Arc::new(Mutex::new(None));
    let mut fg = Flowgraph::new();
    let source = fg.add_block(VectorSource::new(
        (1..=8).map(|x| x as f32).collect::<Vec<_>>(),
    ));
    let probe = fg.add_block(FirstWindow {
        history: 4,
        window: Arc::clone(&window),
    });
    fg.connect(source, probe).unwrap();
    Runtime::new().run(fg).unwrap();

    let window = window.lock().unwrap().clone().unwrap();
    assert_eq!(&window[..5], &[0.0, 0.0, 0.0, 0.0, 1.0]);
}

#[test]
fn hierarchical_block() {
    let data = (0..5000i32).collect::<Vec<_>>();
    let mut fg = Flowgraph::new();
    let mut hier = fg.new_hier_block(
        "double_copy",
        IoSignature::exactly::<i32>(1),
        IoSignature::exactly::<i32>(1),
    );
    let first = hier.add_block(Copy::<i32>::new());
    let second = hier.add_block(Copy::<i32>::new());
    hier.connect(Endpoint::external(0), first).unwrap();
    hier.connect(first, second).unwrap();
    hier.connect(second, Endpoint::external(0)).unwrap();
    let hier = fg.add_hier_block(hier).unwrap();

    let source = fg.add_block(VectorSource::new(data.clone()));
    let sink = VectorSink::<i32>::new();
    let received = sink.data();
    let sink = fg.add_block(sink);
    fg.connect(source, hier).unwrap();
    fg.connect(hier, sink).unwrap();

    let flat = fg.flatten().unwrap();
    assert_eq!(flat.blocks().len(), 4);
    assert_eq!(flat.edges().len(), 3);

    Runtime::new().run(fg).unwrap();
    assert_eq!(received.items(), data);
}

#[test]
fn fan_out() {
    let data = (0..30_000u16).map(|x| x.wrapping_mul(7)).collect::<Vec<_>>();
    let mut fg = Flowgraph::new();
    let source = fg.add_block(VectorSource::new(data.clone()));
    let sinks = (0..3)
        .map(|_| {
            let sink = VectorSink::<u16>::new();
            let received = sink.data();
            let id = fg.add_block(sink);
            fg.connect(source, id).unwrap();
            received
        })
        .collect::<Vec<_>>();
    let config = RuntimeConfig::default()
        .with_default_buffer_bytes(4096)
        .with_buffer_kind(sdrflow::buffers::BufferKind::Heap);
    Runtime::with_config(config).run(fg).unwrap();
    for received in sinks {
        assert_eq!(received.items(), data);
    }
}

#[test]
fn decimation_with_small_buffers() {
    let mut fg = Flowgraph::new();
    let source = fg.add_block(NullSource::<u32>::new());
    let head = fg.add_block(Head::<u32>::new(100_000));
    let keep = fg.add_block(KeepOneInN::<u32>::new(3));
    let sink = fg.add_block(NullSink::<u32>::new());
    fg.connect(source, head).unwrap();
    fg.connect(head, keep).unwrap();
    fg.connect(keep, sink).unwrap();
    let config = RuntimeConfig::default()
        .with_default_buffer_bytes(256)
        .with_buffer_kind(sdrflow::buffers::BufferKind::Heap);
    let report = Runtime::with_config(config).run(fg).unwrap();
    assert_eq!(
        report.block("null_sink_0").unwrap().items_read,
        vec![100_000 / 3]
    );
}

/// Passes items through and fails after `limit` items.
struct FailAfter {
    limit: usize,
    seen: usize,
    panic: bool,
}

impl Block for FailAfter {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "fail_after",
            IoSignature::exactly::<u8>(1),
            IoSignature::exactly::<u8>(1),
        )
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        if self.seen >= self.limit {
            if self.panic {
                panic!("gave up after {} items", self.seen);
            }
            anyhow::bail!("gave up after {} items", self.seen);
        }
        let n = io
            .noutput_items()
            .min(io.inputs[0].available())
            .min(self.limit - self.seen);
        let input = &io.inputs[0].items::<u8>()[..n];
        io.outputs[0].items_mut::<u8>()[..n].copy_from_slice(input);
        io.consume_each(n);
        io.produce_each(n);
        self.seen += n;
        Ok(Run)
    }
}

fn run_failing(panic: bool) -> (Error, usize) {
    let mut fg = Flowgraph::new();
    let source = fg.add_block(NullSource::<u8>::new());
    let failing = fg.add_block(FailAfter {
        limit: 10_000,
        seen: 0,
        panic,
    });
    let sink = VectorSink::<u8>::new();
    let received = sink.data();
    let sink = fg.add_block(sink);
    fg.connect(source, failing).unwrap();
    fg.connect(failing, sink).unwrap();
    let mut runtime = Runtime::new();
    let err = runtime.run(fg).unwrap_err();
    assert!(
        runtime
            .block_phases()
            .iter()
            .all(|(_, phase)| *phase == BlockPhase::Terminated)
    );
    (err, received.len())
}

#[test]
fn failing_block_ends_the_run() {
    let (err, received) = run_failing(false);
    let Error::BlockFailures(failures) = err else {
        panic!("unexpected error {err}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].name, "fail_after_0");
    assert!(failures[0].error.to_string().contains("gave up"));
    // the items produced before the failure still reach the sink
    assert_eq!(received, 10_000);
}

#[test]
fn panicking_block_ends_the_run() {
    let (err, received) = run_failing(true);
    let Error::BlockFailures(failures) = err else {
        panic!("unexpected error {err}");
    };
    assert_eq!(failures.len(), 1);
    assert!(format!("{:#}", failures[0].error).contains("panicked"));
    assert_eq!(received, 10_000);
}

/// Claims to produce more items than it was given room for.
struct Overproducer;

impl Block for Overproducer {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "overproducer",
            IoSignature::empty(),
            IoSignature::exactly::<u32>(1),
        )
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        let n = io.outputs[0].len();
        io.outputs[0].produce(n + 1);
        Ok(Run)
    }
}

#[test]
fn overrun_is_fatal() {
    let mut fg = Flowgraph::new();
    let source = fg.add_block(Overproducer);
    let sink = fg.add_block(NullSink::<u32>::new());
    fg.connect(source, sink).unwrap();
    let err = Runtime::new().run(fg).unwrap_err();
    let Error::BlockFailures(failures) = err else {
        panic!("unexpected error {err}");
    };
    assert_eq!(failures[0].name, "overproducer_0");
    assert!(failures[0].error.to_string().contains("overrun"));
}

/// Consumes one item more than it is given.
struct Overconsumer;

impl Block for Overconsumer {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "overconsumer",
            IoSignature::exactly::<u32>(1),
            IoSignature::exactly::<u32>(1),
        )
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        let n = io.inputs[0].available().min(io.outputs[0].len());
        let input = &io.inputs[0].items::<u32>()[..n];
        io.outputs[0].items_mut::<u32>()[..n].copy_from_slice(input);
        io.inputs[0].consume(n + 1);
        io.outputs[0].produce(n);
        Ok(Run)
    }
}

#[test]
fn underrun_is_fatal_and_publishes_nothing() {
    let mut fg = Flowgraph::new();
    let source = fg.add_block(VectorSource::new((0..10u32).collect::<Vec<_>>()));
    let block = fg.add_block(Overconsumer);
    let sink = VectorSink::<u32>::new();
    let received = sink.data();
    let sink = fg.add_block(sink);
    fg.connect(source, block).unwrap();
    fg.connect(block, sink).unwrap();

    let err = Runtime::new().run(fg).unwrap_err();
    let Error::BlockFailures(failures) = err else {
        panic!("unexpected error {err}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].name, "overconsumer_0");
    assert!(failures[0].error.to_string().contains("underrun"));
    assert!(received.is_empty());
}

#[test]
fn max_noutput_items_below_output_multiple() {
    let mut fg = Flowgraph::new();
    let source = fg.add_block(VectorSource::new(vec![1i16, 2, 3]));
    let repeat = fg.add_block(Repeat::<i16>::new(7));
    let sink = VectorSink::<i16>::new();
    let received = sink.data();
    let sink = fg.add_block(sink);
    fg.connect(source, repeat).unwrap();
    fg.connect(repeat, sink).unwrap();

    let config = RuntimeConfig::default().with_max_noutput_items(2);
    let mut runtime = Runtime::with_config(config);
    runtime.initialize(fg).unwrap();
    runtime.start().unwrap();
    let finished = wait_until(Duration::from_secs(5), || runtime.is_finished());
    assert!(finished, "flowgraph stalled: {:?}", runtime.block_phases());
    runtime.wait().unwrap();
    let expected = [1i16, 2, 3]
        .iter()
        .flat_map(|&x| [x; 7])
        .collect::<Vec<_>>();
    assert_eq!(received.items(), expected);
}

/// Source that never produces anything.
struct Stalled;

impl Block for Stalled {
    fn info(&self) -> BlockInfo {
        BlockInfo::new("stalled", IoSignature::empty(), IoSignature::exactly::<f32>(1))
    }

    fn work(&mut self, _: &mut WorkIo<'_>) -> Result<WorkStatus> {
        thread::sleep(Duration::from_millis(1));
        Ok(Run)
    }
}

#[test]
fn stop_interrupts_waiting_blocks() {
    let mut fg = Flowgraph::new();
    let source = fg.add_block(Stalled);
    let copy = fg.add_block(Copy::<f32>::new());
    let sink = fg.add_block(NullSink::<f32>::new());
    fg.connect(source, copy).unwrap();
    fg.connect(copy, sink).unwrap();

    let mut runtime = Runtime::new();
    runtime.initialize(fg).unwrap();
    runtime.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        runtime
            .block_phases()
            .iter()
            .any(|(name, phase)| name == "null_sink_0" && *phase == BlockPhase::WaitingInput)
    }));
    assert!(!runtime.is_finished());

    let start = Instant::now();
    runtime.stop().unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!runtime.is_running());
    assert!(
        runtime
            .block_phases()
            .iter()
            .all(|(_, phase)| *phase == BlockPhase::Terminated)
    );
}

#[test]
fn lifecycle_errors() {
    let mut runtime = Runtime::new();
    assert!(matches!(runtime.start(), Err(Error::NotInitialized)));
    assert!(matches!(runtime.wait(), Err(Error::NotInitialized)));
    assert!(matches!(runtime.flowgraph_mut(), Err(Error::NotInitialized)));

    let mut fg = Flowgraph::new();
    let source = fg.add_block(Stalled);
    let sink = fg.add_block(NullSink::<f32>::new());
    fg.connect(source, sink).unwrap();
    runtime.initialize(fg).unwrap();
    runtime.start().unwrap();
    assert!(matches!(runtime.start(), Err(Error::AlreadyRunning)));
    assert!(matches!(runtime.flowgraph_mut(), Err(Error::AlreadyRunning)));
    runtime.stop().unwrap();

    // the flowgraph can be modified and started again
    let fg = runtime.flowgraph_mut().unwrap();
    fg.disconnect(source, sink).unwrap();
    fg.remove_block(source).unwrap();
    let source = fg.add_block(VectorSource::new(vec![1.0f32; 100]));
    fg.connect(source, sink).unwrap();
    runtime.start().unwrap();
    let report = runtime.wait().unwrap();
    assert_eq!(report.block("null_sink_0").unwrap().items_read, vec![100]);
    assert!(runtime.last_report().is_some());
}

#[test]
fn topology_errors_abort_initialize() {
    let mut fg = Flowgraph::new();
    let source = fg.add_block(NullSource::<f32>::new());
    let copy = fg.add_block(Copy::<f32>::new());
    fg.connect(source, copy).unwrap();
    let mut runtime = Runtime::new();
    assert!(matches!(
        runtime.initialize(fg),
        Err(Error::Topology(
            TopologyError::UnconnectedPort { .. } | TopologyError::Arity { .. }
        ))
    ));
    assert!(!runtime.is_running());
}

#[test]
fn oversized_buffer_aborts_initialize() {
    let mut fg = Flowgraph::new();
    let source = fg.add_block(NullSource::<u8>::new());
    let sink = fg.add_block(NullSink::<u8>::new());
    fg.connect(source, sink).unwrap();
    fg.block_info_mut(sink).unwrap().history = 1 << 20;
    let config = RuntimeConfig::default().with_max_buffer_bytes(1 << 16);
    assert!(matches!(
        Runtime::with_config(config).initialize(fg),
        Err(Error::Allocation { .. })
    ));
}

/// Sink that checks the `noutput_items` limit and the forecast it asks for.
struct Lookahead {
    extra: usize,
    max_seen: Arc<Mutex<usize>>,
}

impl Block for Lookahead {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "lookahead",
            IoSignature::exactly::<u32>(1),
            IoSignature::exactly::<u32>(1),
        )
    }

    fn forecast(&self, noutput_items: usize, required: &mut [usize]) {
        required.fill(noutput_items + self.extra);
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        let n = io.noutput_items();
        anyhow::ensure!(
            io.inputs[0].available() >= n + self.extra,
            "forecast not honored"
        );
        let mut max_seen = self.max_seen.lock().unwrap();
        *max_seen = (*max_seen).max(n);
        let input = &io.inputs[0].items::<u32>()[..n];
        io.outputs[0].items_mut::<u32>().copy_from_slice(input);
        io.consume_each(n);
        io.produce_each(n);
        Ok(Run)
    }
}

#[test]
fn forecast_and_max_noutput_items() {
    let max_seen = Arc::new(Mutex::new(0));
    let mut fg = Flowgraph::new();
    let source = fg.add_block(VectorSource::new((0..20_000u32).collect()));
    let lookahead = fg.add_block(Lookahead {
        extra: 3,
        max_seen: Arc::clone(&max_seen),
    });
    let sink = VectorSink::<u32>::new();
    let received = sink.data();
    let sink = fg.add_block(sink);
    fg.connect(source, lookahead).unwrap();
    fg.connect(lookahead, sink).unwrap();
    let config = RuntimeConfig::default().with_max_noutput_items(64);
    Runtime::with_config(config).run(fg).unwrap();

    // the last items never satisfy the forecast
    assert_eq!(received.items(), (0..19_997).collect::<Vec<_>>());
    let max_seen = *max_seen.lock().unwrap();
    assert!(max_seen > 0 && max_seen <= 64);
}

/// Counts the tagged items it sees and reports them as messages.
struct TagCounter;

impl Block for TagCounter {
    fn info(&self) -> BlockInfo {
        BlockInfo::new(
            "tag_counter",
            IoSignature::exactly::<u8>(1),
            IoSignature::empty(),
        )
        .with_message_outputs(["count"])
    }

    fn work(&mut self, io: &mut WorkIo<'_>) -> Result<WorkStatus> {
        for tag in io.inputs[0].tags() {
            io.post("count", tag.offset)?;
        }
        let input = &mut io.inputs[0];
        input.consume(input.available());
        Ok(Run)
    }
}

#[test]
fn tags_to_messages() {
    let tags = (0..50).map(|n| Tag::new(n * 20, "mark", n)).collect::<Vec<_>>();
    let mut fg = Flowgraph::new();
    let source = fg.add_block(VectorSource::new(vec![0u8; 1000]).with_tags(tags));
    let counter = fg.add_block(TagCounter);
    let sink = MessageSink::new();
    let received = sink.data();
    let sink = fg.add_block(sink);
    fg.connect(source, counter).unwrap();
    fg.msg_connect((counter, "count"), (sink, "in")).unwrap();
    Runtime::new().run(fg).unwrap();

    let offsets = received
        .messages()
        .iter()
        .map(|msg| msg.as_u64().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(offsets, (0..50).map(|n| n * 20).collect::<Vec<_>>());
}

#[test]
fn message_fan_in() {
    let mut fg = Flowgraph::new();
    let first = fg.add_block(MessageBurst::new(100));
    let second = fg.add_block(MessageBurst::new(50));
    let sink = MessageSink::new();
    let received = sink.data();
    let sink = fg.add_block(sink);
    fg.msg_connect((first, "out"), (sink, "in")).unwrap();
    fg.msg_connect((second, "out"), (sink, "in")).unwrap();
    Runtime::new().run(fg).unwrap();
    assert_eq!(received.messages().len(), 150);
}
