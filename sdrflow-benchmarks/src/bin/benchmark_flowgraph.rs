use anyhow::Result;
use clap::Parser;
use sdrflow::{
    BlockId, Flowgraph, Runtime, RuntimeConfig,
    blocks::basic::{Copy, Head, NullSink, NullSource},
    buffers::BufferKind,
};
use sdrflow_benchmarks::{
    affinity::{core_for_block, get_core_ids},
    logging,
    report::{print_header, print_rate},
};

/// Throughput of a null source, a head, a chain of copy blocks and a null
/// sink, each running on its own thread.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of items streamed in each run.
    #[arg(long, default_value_t = 100_000_000)]
    items: u64,
    /// Number of copy blocks.
    #[arg(long, default_value_t = 4)]
    num_copies: usize,
    /// Default buffer size (bytes).
    #[arg(long, default_value_t = 32768)]
    buffer_size: usize,
    /// Buffer storage (auto, double-mapped or heap).
    #[arg(long, default_value_t = BufferKind::Auto)]
    buffer_kind: BufferKind,
    /// Pin the blocks round-robin to this many CPUs.
    #[arg(long)]
    num_cpus: Option<usize>,
    /// Number of runs.
    #[arg(long, default_value_t = 3)]
    runs: usize,
}

fn build(args: &Args) -> Result<(Flowgraph, Vec<BlockId>)> {
    let mut fg = Flowgraph::new();
    let source = fg.add_block(NullSource::<f32>::new());
    let head = fg.add_block(Head::<f32>::new(args.items));
    fg.connect(source, head)?;
    let mut blocks = vec![source, head];
    for _ in 0..args.num_copies {
        let copy = fg.add_block(Copy::<f32>::new());
        fg.connect(blocks[blocks.len() - 1], copy)?;
        blocks.push(copy);
    }
    let sink = fg.add_block(NullSink::<f32>::new());
    fg.connect(blocks[blocks.len() - 1], sink)?;
    blocks.push(sink);
    Ok((fg, blocks))
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let core_ids = match args.num_cpus {
        Some(num_cpus) => {
            let core_ids = get_core_ids()?;
            anyhow::ensure!(
                num_cpus <= core_ids.len(),
                "requested more CPUs ({}) than cores are in the system ({})",
                num_cpus,
                core_ids.len()
            );
            Some((core_ids, num_cpus))
        }
        None => None,
    };
    let config = RuntimeConfig::from_env()?
        .with_default_buffer_bytes(args.buffer_size)
        .with_buffer_kind(args.buffer_kind);

    print_header(&format!(
        "flowgraph: {} copies, {} byte buffers ({})",
        args.num_copies, args.buffer_size, args.buffer_kind
    ));
    for run in 0..args.runs {
        let (mut fg, blocks) = build(&args)?;
        if let Some((core_ids, num_cpus)) = &core_ids {
            for (n, &block) in blocks.iter().enumerate() {
                let info = fg
                    .block_info_mut(block)
                    .ok_or_else(|| anyhow::anyhow!("block {block:?} not found"))?;
                info.affinity = Some(core_for_block(core_ids, *num_cpus, n));
            }
        }
        let report = Runtime::with_config(config.clone()).run(fg)?;
        print_rate(&format!("run {run}"), args.items, report.elapsed);
    }
    Ok(())
}
